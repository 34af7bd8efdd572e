//! CLI argument definitions and shared statics.

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "servo", version, about = "Closed-loop digipot motor controller")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/servo_config.toml")]
    pub config: PathBuf,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); falls back to RUST_LOG
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Where the encoder and actuator come from
    #[arg(long, value_enum, default_value_t = Backend::Sim)]
    pub backend: Backend,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum Backend {
    /// Simulated rotor driven through a simulated pot
    Sim,
    /// SPI digipot and GPIO quadrature encoder (needs the `hardware` feature)
    Hardware,
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

impl RtLock {
    #[inline]
    pub fn os_default() -> Self {
        if cfg!(target_os = "linux") {
            RtLock::Current
        } else {
            RtLock::None
        }
    }
}

/// Real-time knobs shared by the loop-running commands.
#[derive(Args, Debug, Clone, Default)]
pub struct RtArgs {
    /// Enable real-time mode (SCHED_FIFO, affinity, mlockall); also settable via [runtime].rt
    #[arg(
        long,
        action = ArgAction::SetTrue,
        long_help = "Enable real-time mode on supported OSes.\n\nLinux: requests SCHED_FIFO, pins the process to one CPU and locks memory with mlockall. Needs CAP_SYS_NICE / CAP_IPC_LOCK or root; failures are reported and the loop runs anyway.\n\nOther OSes: only memory locking is attempted."
    )]
    pub rt: bool,
    /// SCHED_FIFO priority (Linux only); defaults to the system maximum
    #[arg(long, value_name = "PRIO")]
    pub rt_prio: Option<i32>,
    /// Memory locking mode for --rt: none, current, or all
    #[arg(long, value_enum, value_name = "MODE")]
    pub rt_lock: Option<RtLock>,
    /// CPU index to pin to (Linux only); defaults to 0
    #[arg(long, value_name = "CPU")]
    pub rt_cpu: Option<usize>,
}

/// Host-unit overrides for a single session; absent values come from [session].
#[derive(Args, Debug, Clone, Default)]
pub struct SessionArgs {
    /// Target speed in rad/s (degrees in angle mode)
    #[arg(long, allow_negative_numbers = true)]
    pub target: Option<f64>,
    /// Session length in seconds
    #[arg(long, value_name = "SECS")]
    pub time_limit: Option<f64>,
    /// Control loop rate in Hz
    #[arg(long, value_name = "HZ")]
    pub rate: Option<f64>,
    /// Raw bias in pot units, used when calibration.mode = "fixed"
    #[arg(long, allow_negative_numbers = true)]
    pub bias: Option<f64>,
    #[arg(long = "kp", value_name = "KP")]
    pub kp: Option<f64>,
    #[arg(long = "ki", value_name = "KI")]
    pub ki: Option<f64>,
    #[arg(long = "kd", value_name = "KD")]
    pub kd: Option<f64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Calibrate and run one closed-loop session
    Run {
        #[command(flatten)]
        session: SessionArgs,
        /// Write the sample trace as CSV (`-` for stdout)
        #[arg(long, value_name = "FILE")]
        trace: Option<PathBuf>,
        #[command(flatten)]
        rt: RtArgs,
    },
    /// Read host JSON lines from stdin; one session per accepted line
    Serve {
        #[command(flatten)]
        rt: RtArgs,
    },
    /// Sweep the raw wiper register as a triangle wave (bench test)
    Sweep {
        /// Number of register writes
        #[arg(long, default_value_t = 2048)]
        steps: u32,
        /// Register increment per write
        #[arg(long, default_value_t = 1)]
        step: i32,
        /// Milliseconds between writes
        #[arg(long, value_name = "MS", default_value_t = 2)]
        interval_ms: u64,
    },
    /// Bring up the bus, zero the pot and read the encoder once
    SelfCheck,
}
