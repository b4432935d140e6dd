//! CLI error types.

use std::path::PathBuf;
use thiserror::Error;

/// CLI errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The database file does not exist.
    ///
    /// Nothing has been recorded yet; any mutating command creates it.
    #[error("database not found at {path}")]
    DatabaseNotFound { path: PathBuf },

    /// Configuration is invalid.
    #[error("config error: {0}")]
    Config(String),

    /// A command-line argument could not be interpreted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Runtime(#[from] runtime::Error),

    #[error(transparent)]
    Storage(#[from] storage::Error),

    #[error(transparent)]
    Policy(#[from] policy::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
