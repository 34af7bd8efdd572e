#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse errors and validation errors are both fine; panics are not.
    if let Ok(cfg) = servo_config::load_toml(data)
        && cfg.validate().is_ok()
    {
        // a validated file must always map onto the core config types
        let _control: servo_core::ControlCfg = (&cfg.control).into();
        let _calibration: servo_core::CalibrationCfg = (&cfg.calibration).into();
        let _buffer: servo_core::BufferCfg = (&cfg).into();
    }
});
