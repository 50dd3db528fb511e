use thiserror::Error;

use crate::api::ApiError;
use crate::state::IllegalTransition;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Transition(#[from] IllegalTransition),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Cancelled")]
    Cancelled,
}

impl Error {
    /// True when the error represents a user-initiated stop rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled | Error::Api(ApiError::Cancelled))
    }
}
