use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Relay error (Status: {status_code}): {details}")]
    ServerError { status_code: u16, details: String },

    #[error("Relay rejected {operation}: {details}")]
    Rejected { operation: String, details: String },

    #[error("Failed to parse response from {endpoint}: {details}")]
    ResponseParsing { endpoint: String, details: String },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Stream error: {details}")]
    Stream { details: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ApiError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }
}
