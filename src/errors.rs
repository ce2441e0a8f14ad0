use thiserror::Error;

/// Error taxonomy for backup and restore jobs.
///
/// Configuration errors are surfaced before any destructive action;
/// connectivity and transform errors abort the affected job (a fleet run in
/// rescue mode isolates them per target instead). Cleanup failures are never
/// represented here, they are logged and swallowed at the call site.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Dump failed: {0}")]
    Dump(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Restore failed: {0}")]
    Restore(String),

    #[error("Storage operation failed: {0}")]
    Storage(String),

    #[error("Unknown file extension: {0}")]
    UnknownExtension(String),

    #[error("Command execution failed: {stderr}")]
    Command { stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
