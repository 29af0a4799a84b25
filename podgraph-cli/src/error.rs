use colored::Colorize;
use podgraph_change::ChangeError;
use std::fmt;
use std::process;

/// Exit codes for the CLI.
#[allow(dead_code)]
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
/// The request was processed but did not commit.
pub const EXIT_REQUEST_FAILED: i32 = 3;

/// Unified error type for CLI operations.
pub enum CliError {
    /// Error from the change pipeline.
    Pipeline(ChangeError),
    /// Pipeline config could not be loaded or is invalid.
    Config(String),
    /// Unreadable input file or parse failure.
    Input(String),
    /// Argument / usage errors.
    Usage(String),
    /// The request finished with a non-committed status.
    RequestFailed(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Pipeline(e) => write!(f, "{} {e}", "error:".red().bold()),
            CliError::Config(msg) => write!(
                f,
                "{} {msg}\n  {} run 'podgraph check' to validate a config file",
                "error:".red().bold(),
                "help:".cyan().bold(),
            ),
            CliError::Input(msg) => write!(f, "{} {msg}", "error:".red().bold()),
            CliError::Usage(msg) => write!(f, "{} {msg}", "error:".red().bold()),
            CliError::RequestFailed(msg) => write!(f, "{} {msg}", "failed:".yellow().bold()),
        }
    }
}

impl fmt::Debug for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl From<ChangeError> for CliError {
    fn from(e: ChangeError) -> Self {
        match e {
            ChangeError::Config(msg) => CliError::Config(msg),
            other => CliError::Pipeline(other),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Input(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Input(format!("JSON parse error: {e}"))
    }
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage(_) => EXIT_USAGE,
            CliError::RequestFailed(_) => EXIT_REQUEST_FAILED,
            _ => EXIT_ERROR,
        }
    }
}

/// Print error and exit with the appropriate code.
pub fn exit_with_error(err: CliError) -> ! {
    eprintln!("{err}");
    process::exit(err.exit_code())
}

pub type CliResult<T> = std::result::Result<T, CliError>;
