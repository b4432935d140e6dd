use thiserror::Error;

use crate::channel::ChannelError;

/// Runtime errors.
///
/// Nothing on the enforcement path returns these; they surface only from
/// the command surface and start-up.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Storage(#[from] storage::Error),

    #[error(transparent)]
    Policy(#[from] policy::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
