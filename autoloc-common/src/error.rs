//! Common error types for autoloc

use thiserror::Error;

/// Common result type for autoloc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the autoloc crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed line in a station, grid or similar text file
    #[error("Parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
