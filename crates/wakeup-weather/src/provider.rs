use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::WeatherError;
use crate::types::WeatherReport;

/// Common interface for current-conditions providers.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Fetch current conditions for a location key (ZIP code or place name).
    async fn fetch_current(&self, location: &str) -> Result<WeatherReport, WeatherError>;
}

/// WeatherAPI.com `current.json` client.
pub struct WeatherApiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl WeatherApiProvider {
    pub fn new(api_key: String, base_url: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "weather client builder failed, using defaults");
                reqwest::Client::new()
            });
        Self {
            client,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "http://api.weatherapi.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
    fn name(&self) -> &str {
        "weatherapi"
    }

    async fn fetch_current(&self, location: &str) -> Result<WeatherReport, WeatherError> {
        let url = format!("{}/current.json", self.base_url);
        let query = location_query(location);

        debug!(%location, "fetching current weather");

        let resp = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str()), ("q", query.as_str()), ("aqi", "no")])
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            return Err(WeatherError::RateLimited);
        }
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(WeatherError::HttpStatus { status, body });
        }

        let raw: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| WeatherError::Parse(e.to_string()))?;
        let parsed: ApiResponse = serde_json::from_value(raw.clone())
            .map_err(|e| WeatherError::Parse(e.to_string()))?;

        Ok(WeatherReport {
            temperature_f: parsed.current.temp_f,
            condition: parsed.current.condition.map(|c| c.text),
            raw,
        })
    }
}

/// Bare US ZIP codes are qualified with the country so the provider does not
/// match a foreign postal code.
fn location_query(location: &str) -> String {
    let trimmed = location.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        format!("{trimmed},US")
    } else {
        trimmed.to_string()
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    current: ApiCurrent,
}

#[derive(Deserialize)]
struct ApiCurrent {
    temp_f: Option<f64>,
    condition: Option<ApiCondition>,
}

#[derive(Deserialize)]
struct ApiCondition {
    text: String,
}
