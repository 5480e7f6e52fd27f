use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Filesystem error: {0}")]
    Filesystem(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Encryption error: {0}")]
    Encryption(String),
}

impl AppError {
    /// Whether a manual retry of the same operation can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Network(_) | AppError::Http(_) | AppError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
