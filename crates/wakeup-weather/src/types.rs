use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Spoken/texted when no snapshot could be obtained.
pub const WEATHER_UNAVAILABLE: &str = "Weather information is currently unavailable.";

/// Current conditions as returned by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherReport {
    pub temperature_f: Option<f64>,
    pub condition: Option<String>,
    /// Untouched provider payload, kept for auditing.
    pub raw: serde_json::Value,
}

/// A cached report for one location key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeatherSnapshot {
    pub location: String,
    pub temperature_f: Option<f64>,
    pub condition: Option<String>,
    pub raw: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl WeatherSnapshot {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// One-sentence announcement used in wake-up messages.
    pub fn announcement(&self) -> String {
        let condition = self
            .condition
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        let temp = self.temperature_f.map(|t| t.round() as i64);

        match (condition, temp) {
            (Some(c), Some(t)) => format!(
                "The current weather is {c} with a temperature of {t} degrees Fahrenheit."
            ),
            (None, Some(t)) => format!("The current temperature is {t} degrees Fahrenheit."),
            (Some(c), None) => format!("The current weather is {c}."),
            (None, None) => WEATHER_UNAVAILABLE.to_string(),
        }
    }
}

/// Outcome of one provider call as recorded in `weather_api_log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiLogStatus {
    Success,
    Error,
    RateLimited,
}

impl std::fmt::Display for ApiLogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApiLogStatus::Success => "success",
            ApiLogStatus::Error => "error",
            ApiLogStatus::RateLimited => "rate_limited",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ApiLogStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(ApiLogStatus::Success),
            "error" => Ok(ApiLogStatus::Error),
            "rate_limited" => Ok(ApiLogStatus::RateLimited),
            other => Err(format!("unknown weather log status: {other}")),
        }
    }
}

/// A row of `weather_api_log`.
#[derive(Debug, Clone, Serialize)]
pub struct ApiLogEntry {
    pub location: String,
    pub status: ApiLogStatus,
    pub error_message: Option<String>,
    pub response_time_ms: Option<i64>,
    pub created_at: String,
}
