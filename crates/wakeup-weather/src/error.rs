use thiserror::Error;

use crate::types::ApiLogStatus;

/// Failure of a single provider lookup.
#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("weather API request timeout")]
    Timeout,

    #[error("weather API error {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("weather API rate limit exceeded")]
    RateLimited,

    #[error("weather API request error: {0}")]
    Request(String),

    #[error("weather API response parse error: {0}")]
    Parse(String),
}

impl WeatherError {
    /// Outcome recorded in `weather_api_log` for this failure.
    pub fn log_status(&self) -> ApiLogStatus {
        match self {
            WeatherError::RateLimited => ApiLogStatus::RateLimited,
            _ => ApiLogStatus::Error,
        }
    }
}

impl From<reqwest::Error> for WeatherError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            WeatherError::Timeout
        } else {
            WeatherError::Request(e.to_string())
        }
    }
}

/// Storage-side failures of the cache tables.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;
