//! Human-readable error descriptions, exit codes and structured JSON errors.

use servo_core::error::{BuildError, ServoError};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingEncoder => {
                "What happened: No encoder was provided to the servo.\nLikely causes: The encoder backend failed to initialize or was not wired into the builder.\nHow to fix: Ensure the encoder is created successfully and passed via with_encoder(...).".to_string()
            }
            BuildError::MissingBus => {
                "What happened: No SPI bus was provided to the servo.\nLikely causes: The bus or chip select backend failed to initialize.\nHow to fix: Ensure both are created successfully and passed via with_actuator(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/servo_config.toml for a sample."
            ),
        };
    }

    if let Some(se) = err.downcast_ref::<ServoError>() {
        return match se {
            ServoError::BusInitFailure { attempts } => format!(
                "What happened: The SPI bus could not be locked after {attempts} attempt(s).\nLikely causes: Another process holds the device, SPI is disabled, or the [pins] bus index is wrong.\nHow to fix: Enable SPI (raspi-config), free the device, and check spi_bus/spi_slave_select."
            ),
            ServoError::BusUnavailable => {
                "What happened: The actuator is disabled because the SPI bus never came up.\nLikely causes: Bus initialization failed earlier; see the preceding warnings.\nHow to fix: Fix the bus problem and restart; commands are refused until then.".to_string()
            }
            ServoError::ActuatorWrite(detail) => format!(
                "What happened: A write to the digipot failed ({detail}).\nLikely causes: Loose wiring, a dropped SPI device, or a chip select fault.\nHow to fix: Check the SPI and chip select wiring; the output was zeroed and the session ended."
            ),
            ServoError::CalibrationTimeout { ticks } => format!(
                "What happened: Calibration gave up after {ticks} ticks without rotor movement.\nLikely causes: Motor not powered, mechanically jammed, or encoder not wired.\nHow to fix: Check motor power and the encoder pins, or raise calibration.max_ticks / movement_threshold."
            ),
            ServoError::Aborted => {
                "What happened: The session was aborted by the operator.\nLikely causes: Ctrl-C or SIGTERM.\nHow to fix: Nothing to fix; the output was zeroed. Start a new run when ready.".to_string()
            }
            ServoError::MalformedCommand(detail) => format!(
                "What happened: Session parameters were rejected ({detail}).\nLikely causes: Non-finite values, rate or time_limit <= 0, or |bias| > 512.\nHow to fix: Correct the command-line overrides or the [session] section."
            ),
            ServoError::Config(detail) => format!(
                "What happened: Configuration is invalid ({detail}).\nLikely causes: A missing file, a TOML syntax error, or an out-of-range value.\nHow to fix: Edit the TOML config (see etc/servo_config.toml) and try again."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // String-based heuristics for errors coming from backend setup
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("open spi") || lower.contains("open chip select") || lower.contains("open encoder") {
        return "What happened: Failed to initialize hardware pins.\nLikely causes: Incorrect pin numbers or insufficient GPIO/SPI permissions.\nHow to fix: Fix the [pins] values in the config; ensure the process may access /dev/spidev* and GPIO.".to_string();
    }

    if lower.contains("hardware backend") {
        return format!(
            "What happened: {msg}.\nHow to fix: Build with `cargo build -p servo_cli --features hardware` on the target, or use --backend sim."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable process exit codes; anything unclassified is 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if let Some(se) = err.downcast_ref::<ServoError>() {
        return match se {
            ServoError::BusInitFailure { .. } | ServoError::BusUnavailable => 3,
            ServoError::ActuatorWrite(_) => 4,
            ServoError::CalibrationTimeout { .. } => 5,
            ServoError::Aborted => 6,
            ServoError::Config(_) | ServoError::MalformedCommand(_) => 7,
            _ => 1,
        };
    }
    if let Some(BuildError::InvalidConfig(_)) = err.downcast_ref::<BuildError>() {
        return 7;
    }
    1
}

fn reason_name(err: &eyre::Report) -> &'static str {
    match err.downcast_ref::<ServoError>() {
        Some(ServoError::BusInitFailure { .. }) => "BusInitFailure",
        Some(ServoError::BusUnavailable) => "BusUnavailable",
        Some(ServoError::ActuatorWrite(_)) => "ActuatorWrite",
        Some(ServoError::CalibrationTimeout { .. }) => "CalibrationTimeout",
        Some(ServoError::Aborted) => "Aborted",
        Some(ServoError::MalformedCommand(_)) => "MalformedCommand",
        Some(ServoError::Config(_)) => "Config",
        Some(_) => "ServoError",
        None if err.downcast_ref::<BuildError>().is_some() => "BuildError",
        None => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let mut obj = json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    });
    if let Some(ServoError::CalibrationTimeout { ticks }) = err.downcast_ref::<ServoError>() {
        obj["details"] = json!({ "ticks": ticks });
    }
    if let Some(ServoError::BusInitFailure { attempts }) = err.downcast_ref::<ServoError>() {
        obj["details"] = json!({ "attempts": attempts });
    }
    obj.to_string()
}
