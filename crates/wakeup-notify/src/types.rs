use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Channel used for one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Sms,
    Voice,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationKind::Sms => write!(f, "sms"),
            NotificationKind::Voice => write!(f, "voice"),
        }
    }
}

/// Lifecycle of a `notification_log` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    /// Rows in a terminal status are never touched by reconciliation again.
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Failed)
    }

    /// Map the provider's status vocabulary onto the terminal outcomes.
    /// Progress tokens (`queued`, `sent`, `ringing`, `in-progress`, ...) map
    /// to `None`: a `sent` SMS can still come back `undelivered`.
    pub fn from_provider(token: &str) -> Option<DeliveryStatus> {
        match token.trim().to_ascii_lowercase().as_str() {
            "delivered" | "completed" => Some(DeliveryStatus::Delivered),
            "failed" | "undelivered" | "busy" | "no-answer" | "canceled" => {
                Some(DeliveryStatus::Failed)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "sent" => Ok(DeliveryStatus::Sent),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

/// What the provider answered when it accepted a message or call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReceipt {
    pub provider_id: String,
    pub status: Option<String>,
}

/// Correlation data stored alongside a dispatch attempt.
#[derive(Debug, Clone, Default)]
pub struct DispatchMeta {
    pub job_id: Option<String>,
    pub execution_id: Option<String>,
    /// Per-job demo flag; the dispatcher also honours its global switch.
    pub demo: bool,
}

/// Uniform outcome of `send_text` / `place_call`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchResult {
    pub success: bool,
    pub provider_id: Option<String>,
    pub provider_status: Option<String>,
    pub error: Option<String>,
    /// `notification_log` row written for this attempt, if logging succeeded.
    #[serde(skip)]
    pub log_id: Option<i64>,
}

impl DispatchResult {
    pub fn failed(error: impl Into<String>, log_id: Option<i64>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            log_id,
            ..Default::default()
        }
    }
}

/// A delivery status callback as posted by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusCallback {
    pub provider_id: String,
    pub status: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    /// Every field of the callback, stored verbatim for audit.
    pub raw: serde_json::Value,
}

impl StatusCallback {
    /// Build from form fields. SMS callbacks carry `MessageSid`/`MessageStatus`,
    /// call callbacks `CallSid`/`CallStatus`. Returns `None` without an id.
    pub fn from_form(fields: &HashMap<String, String>) -> Option<Self> {
        let non_empty = |key: &str| {
            fields
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(String::from)
        };
        let provider_id = non_empty("MessageSid").or_else(|| non_empty("CallSid"))?;
        let status = non_empty("MessageStatus")
            .or_else(|| non_empty("CallStatus"))
            .unwrap_or_default();

        let raw = fields
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect::<serde_json::Map<_, _>>();

        Some(Self {
            provider_id,
            status,
            error_code: non_empty("ErrorCode"),
            error_message: non_empty("ErrorMessage"),
            raw: serde_json::Value::Object(raw),
        })
    }
}

/// What reconciliation did with one callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Delivered,
    Failed,
    /// Non-terminal provider status recorded, delivery state unchanged.
    Progress,
    /// The matched row was already delivered/failed; nothing changed.
    AlreadyTerminal,
    /// No delivery record carries this provider id.
    Unmatched,
}

/// Builds the externally reachable URLs handed to the provider.
#[derive(Debug, Clone)]
pub struct CallbackUrls {
    base: String,
    token: Option<String>,
}

impl CallbackUrls {
    /// `token` is appended as `?token=` when callbacks authenticate by query token.
    pub fn new(base: &str, token: Option<String>) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn voice_script(&self, execution_id: &str) -> String {
        self.build(&format!("/voice/{execution_id}"))
    }

    pub fn voice_response(&self, execution_id: &str) -> String {
        self.build(&format!("/voice/{execution_id}/response"))
    }

    pub fn delivery_status(&self) -> String {
        self.build("/webhooks/delivery")
    }

    fn build(&self, path: &str) -> String {
        let raw = format!("{}{}", self.base, path);
        let Some(token) = self.token.as_deref() else {
            return raw;
        };
        match reqwest::Url::parse(&raw) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair("token", token);
                url.to_string()
            }
            Err(_) => raw,
        }
    }
}
