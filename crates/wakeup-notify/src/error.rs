use thiserror::Error;

/// Failure talking to the telephony provider.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider error ({status}): {message}")]
    Api {
        status: u16,
        /// Provider-specific error code, when the body carried one.
        code: Option<String>,
        message: String,
    },

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("parse error: {0}")]
    Parse(String),
}

impl TransportError {
    pub fn code(&self) -> Option<&str> {
        match self {
            TransportError::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// Storage-side failures of the delivery log and callback audit.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NotifyError>;
