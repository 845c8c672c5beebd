use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use wakeup_core::config::TwilioConfig;

use crate::error::TransportError;
use crate::transport::NotificationTransport;
use crate::types::ProviderReceipt;

/// Twilio REST API (2010-04-01) client for Messages and Calls.
pub struct TwilioTransport {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    base_url: String,
}

impl TwilioTransport {
    pub fn new(cfg: &TwilioConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            account_sid: cfg.account_sid.clone(),
            auth_token: cfg.auth_token.clone(),
            from_number: cfg.from_number.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn resource_url(&self, resource: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/{}.json",
            self.base_url, self.account_sid, resource
        )
    }

    async fn create(
        &self,
        resource: &str,
        form: &[(&str, &str)],
    ) -> Result<ProviderReceipt, TransportError> {
        let url = self.resource_url(resource);
        debug!(%resource, "posting to Twilio");

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(form)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(5000);
            return Err(TransportError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Twilio API error");
            let parsed: Option<ApiError> = serde_json::from_str(&text).ok();
            return Err(match parsed {
                Some(e) => TransportError::Api {
                    status,
                    code: e.code.map(|c| c.to_string()),
                    message: e.message.unwrap_or(text),
                },
                None => TransportError::Api {
                    status,
                    code: None,
                    message: text,
                },
            });
        }

        let created: ApiResource = resp
            .json()
            .await
            .map_err(|e| TransportError::Parse(e.to_string()))?;

        Ok(ProviderReceipt {
            provider_id: created.sid,
            status: created.status,
        })
    }
}

#[async_trait]
impl NotificationTransport for TwilioTransport {
    fn name(&self) -> &str {
        "twilio"
    }

    async fn send_sms(
        &self,
        to: &str,
        body: &str,
        status_callback: Option<&str>,
    ) -> Result<ProviderReceipt, TransportError> {
        let mut form = vec![("To", to), ("From", self.from_number.as_str()), ("Body", body)];
        if let Some(cb) = status_callback {
            form.push(("StatusCallback", cb));
        }
        self.create("Messages", &form).await
    }

    async fn place_call(
        &self,
        to: &str,
        content_url: &str,
        status_callback: Option<&str>,
    ) -> Result<ProviderReceipt, TransportError> {
        let mut form = vec![
            ("To", to),
            ("From", self.from_number.as_str()),
            ("Url", content_url),
            ("Method", "POST"),
        ];
        if let Some(cb) = status_callback {
            form.push(("StatusCallback", cb));
            form.push(("StatusCallbackMethod", "POST"));
        }
        self.create("Calls", &form).await
    }
}

#[derive(Deserialize)]
struct ApiResource {
    sid: String,
    status: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    code: Option<i64>,
    message: Option<String>,
}
