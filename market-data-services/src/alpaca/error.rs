use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlpacaError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Alpaca API returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Failed to decode response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    #[error("Request to {endpoint} timed out after {seconds}s")]
    Timeout { endpoint: String, seconds: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing API credentials: set {0}")]
    MissingCredentials(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Stream rejected request ({code}): {message}")]
    Stream { code: i64, message: String },
}

impl AlpacaError {
    /// Whether repeating the request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            AlpacaError::Http(_) | AlpacaError::Timeout { .. } | AlpacaError::WebSocket(_) => true,
            AlpacaError::Status { status, .. } => *status == 429 || *status >= 500,
            AlpacaError::Decode { .. }
            | AlpacaError::Config(_)
            | AlpacaError::MissingCredentials(_)
            | AlpacaError::Stream { .. } => false,
        }
    }
}

impl From<reqwest::Error> for AlpacaError {
    fn from(err: reqwest::Error) -> Self {
        AlpacaError::Http(err.to_string())
    }
}

pub type AlpacaResult<T> = Result<T, AlpacaError>;
