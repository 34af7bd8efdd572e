mod cli;
mod error_fmt;
mod rt;
mod session;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use servo_config::{Config, Logging};
use servo_core::error::{Report, ServoError};
use tracing_appender::non_blocking::WorkerGuard;

use crate::cli::{Cli, Commands, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(e) = color_eyre::install() {
        eprintln!("Warning: color-eyre not installed: {e}");
    }

    let code = match run(cli) {
        Ok(()) => 0,
        Err(err) => {
            if JSON_MODE.get().copied().unwrap_or(false) {
                eprintln!("{}", format_error_json(&err));
            } else {
                eprintln!("{}", humanize(&err));
            }
            exit_code_for_error(&err)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> eyre::Result<()> {
    let cfg = load_config(&cli.config)?;
    // dropped when `run` returns, which flushes the file sink before exit
    let _guard = init_tracing(&cli, &cfg.logging)?;
    tracing::debug!(config = %cli.config.display(), backend = ?cli.backend, "config loaded");

    let abort = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&abort);
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
            tracing::warn!(error = %e, "Ctrl-C handler not installed; abort by signal is unavailable");
        }
    }

    let mut servo = session::build_servo(&cfg, cli.backend, abort)?;
    let outcome = match cli.cmd {
        Commands::Run {
            session: overrides,
            trace,
            rt,
        } => {
            session::apply_rt(&cfg.runtime, &rt);
            session::run_once(&mut servo, &cfg, &overrides, trace.as_deref())
        }
        Commands::Serve { rt } => {
            session::apply_rt(&cfg.runtime, &rt);
            session::serve(&mut servo, &cfg)
        }
        Commands::Sweep {
            steps,
            step,
            interval_ms,
        } => session::sweep(&mut servo, steps, step, interval_ms),
        Commands::SelfCheck => session::self_check(&mut servo),
    };
    session::release(&mut servo);
    outcome
}

fn config_error(msg: String) -> Report {
    Report::new(ServoError::Config(msg))
}

fn load_config(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| config_error(format!("read {}: {e}", path.display())))?;
    let cfg = servo_config::load_toml(&text)
        .map_err(|e| config_error(format!("parse {}: {e}", path.display())))?;
    cfg.validate().map_err(|e| config_error(e.to_string()))?;
    Ok(cfg)
}

/// Console logs go to stderr so stdout stays machine-readable telemetry.
///
/// Level precedence: `--log-level`, then `RUST_LOG`, then `[logging].level`, then `info`.
fn init_tracing(cli: &Cli, logging: &Logging) -> eyre::Result<Option<WorkerGuard>> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match cli.log_level.as_deref() {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(logging.level.as_deref().unwrap_or("info")))?,
    };

    let console_json = cli
        .json
        .then(|| fmt::layer().json().with_writer(std::io::stderr));
    let console_pretty = (!cli.json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    let (file_layer, guard) = match logging.file.as_deref() {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| config_error(format!("logging.file has no file name: {file}")))?;
            let appender = match logging.rotation.as_deref() {
                Some("daily") => tracing_appender::rolling::daily(dir, name),
                Some("hourly") => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_json)
        .with(console_pretty)
        .with(file_layer)
        .try_init()?;
    Ok(guard)
}
