#![no_main]
use libfuzzer_sys::fuzz_target;
use servo_config::HostSettings;
use servo_core::{ControlCfg, ControlMode, HostRunner, session_params};

fuzz_target!(|data: &str| {
    let mut runner = HostRunner::default();
    let before = *runner.settings();
    match runner.accept(data) {
        // accepted settings always convert to finite, positive timing
        Ok(Some(settings)) => {
            for mode in [ControlMode::Velocity, ControlMode::Angle] {
                let control = ControlCfg {
                    mode,
                    ..ControlCfg::default()
                };
                if let Ok(p) = session_params(&settings, &control, 2000) {
                    assert!(!p.interval.is_zero());
                    assert!(!p.time_limit.is_zero());
                    assert!(p.bias.abs() <= 1.0);
                }
            }
        }
        Ok(None) => assert_eq!(*runner.settings(), before),
        // rejected lines never disturb the previous settings
        Err(_) => assert_eq!(*runner.settings(), HostSettings::default()),
    }
});
