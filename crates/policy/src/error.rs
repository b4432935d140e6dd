//! Policy error types.

use thiserror::Error;

/// Policy errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No preset is registered under the given id.
    #[error("unknown preset: {0}")]
    UnknownPreset(String),

    /// A capability name did not match any known capability.
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    /// A policy document or preset is invalid.
    #[error("invalid policy: {0}")]
    Invalid(String),

    /// Failed to parse a policy or preset file.
    #[error("failed to parse policy: {0}")]
    Parse(String),

    /// An I/O error occurred while reading policy.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
