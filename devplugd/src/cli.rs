//! The command-line surface (§6): `--debug`, `--dry-run`, `--version`.
//! Uses `clap`'s derive API for this small, fixed flag set, unlike the
//! teacher's own builder-style `Command::new(...).arg(...)` in
//! `drmemd`'s config module -- derive is the better fit here since
//! there's no need to build the parser up dynamically per feature flag.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "devplugd", about = "Device-plugin framework runtime", version)]
pub struct Cli {
    /// Raise the log level to debug regardless of configuration.
    #[arg(long)]
    pub debug: bool,

    /// Load configuration, build the device set, run setup actions,
    /// then exit without serving.
    #[arg(long)]
    pub dry_run: bool,

    /// Prefix used to derive environment-variable configuration
    /// overrides (§6): `PREFIX_A_B=1` overrides `a.b`.
    #[arg(long, default_value = "PLUGIN")]
    pub env_prefix: String,
}

/// Process exit codes (§6): 0 success, 1 configuration error, 2
/// runtime error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}
