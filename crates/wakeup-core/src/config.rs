use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_TICK_SECS: u64 = 60;
pub const DEFAULT_SNOOZE_MINUTES: i64 = 10;
pub const WEATHER_TTL_SECS: i64 = 3600; // one hour per cached snapshot

/// Top-level config (wakeup.toml + WAKEUP_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WakeupConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub webhooks: WebhooksConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token required on `/api/*`. `None` leaves the job API open.
    pub api_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            api_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl DatabaseConfig {
    /// Create the directory that will hold the database file.
    pub fn ensure_parent_dir(&self) -> crate::error::Result<()> {
        if let Some(parent) = std::path::Path::new(&self.path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

/// Tick loop and worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// How far behind `now` a `next_fire` may be and still be selected.
    #[serde(default = "default_window_secs")]
    pub grace_secs: i64,
    /// How far ahead of `now` a `next_fire` is already selected.
    #[serde(default = "default_window_secs")]
    pub lookahead_secs: i64,
    /// Maximum number of executions running concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_snooze_minutes")]
    pub snooze_minutes: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: DEFAULT_TICK_SECS,
            grace_secs: default_window_secs(),
            lookahead_secs: default_window_secs(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            snooze_minutes: DEFAULT_SNOOZE_MINUTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Global demo switch: no dispatch ever reaches the real transport.
    #[serde(default)]
    pub demo_mode: bool,
    /// Externally reachable base URL of this gateway, used to build voice
    /// script and status callback URLs handed to the provider.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    pub twilio: Option<TwilioConfig>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            demo_mode: false,
            public_base_url: default_public_base_url(),
            twilio: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Caller ID / sender number in E.164 form.
    pub from_number: String,
    #[serde(default = "default_twilio_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_weather_base_url")]
    pub base_url: String,
    #[serde(default = "default_weather_ttl")]
    pub ttl_secs: i64,
    #[serde(default = "default_weather_timeout")]
    pub timeout_secs: u64,
    /// Refresh every location used by active jobs on each maintenance pass.
    #[serde(default)]
    pub prefetch: bool,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_weather_base_url(),
            ttl_secs: WEATHER_TTL_SECS,
            timeout_secs: default_weather_timeout(),
            prefetch: false,
        }
    }
}

/// Authentication mode for provider callbacks (delivery status + voice).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum WebhookAuthMode {
    /// HMAC-SHA256 over the raw request body in `X-Wakeup-Signature: sha256=<hex>`.
    HmacSha256,
    /// Shared secret passed as the `token` query parameter.
    Token,
    /// No authentication. Use only for internal/trusted networks.
    #[default]
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhooksConfig {
    #[serde(default)]
    pub auth_mode: WebhookAuthMode,
    /// HMAC signing secret or query token value.
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Name announced in the greeting ("This is your wake-up call from …").
    #[serde(default = "default_brand")]
    pub brand: String,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            brand: default_brand(),
        }
    }
}

/// Retention windows for the periodic cleanup pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_maintenance_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_notification_log_days")]
    pub notification_log_days: i64,
    #[serde(default = "default_short_retention_days")]
    pub webhook_log_days: i64,
    #[serde(default = "default_short_retention_days")]
    pub weather_log_days: i64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_maintenance_interval(),
            notification_log_days: default_notification_log_days(),
            webhook_log_days: default_short_retention_days(),
            weather_log_days: default_short_retention_days(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_tick_secs() -> u64 {
    DEFAULT_TICK_SECS
}
fn default_window_secs() -> i64 {
    60
}
fn default_workers() -> usize {
    8
}
fn default_queue_capacity() -> usize {
    256
}
fn default_snooze_minutes() -> i64 {
    DEFAULT_SNOOZE_MINUTES
}
fn default_public_base_url() -> String {
    format!("http://localhost:{DEFAULT_PORT}")
}
fn default_twilio_base_url() -> String {
    "https://api.twilio.com".to_string()
}
fn default_weather_base_url() -> String {
    "http://api.weatherapi.com/v1".to_string()
}
fn default_weather_ttl() -> i64 {
    WEATHER_TTL_SECS
}
fn default_weather_timeout() -> u64 {
    10
}
fn default_brand() -> String {
    "Wakeup".to_string()
}
fn default_maintenance_interval() -> u64 {
    3600
}
fn default_notification_log_days() -> i64 {
    90
}
fn default_short_retention_days() -> i64 {
    30
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.wakeup/wakeup.db", home)
}

impl WakeupConfig {
    /// Load config from a TOML file with WAKEUP_* env var overrides.
    ///
    /// Nested keys use a double underscore:
    /// `WAKEUP_SCHEDULER__TICK_SECS=30`, `WAKEUP_NOTIFY__DEMO_MODE=true`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("WAKEUP_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.wakeup/wakeup.toml", home)
}
