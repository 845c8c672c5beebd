use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::ProviderReceipt;

/// Telephony provider seam: one SMS or one outbound call per invocation.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    async fn send_sms(
        &self,
        to: &str,
        body: &str,
        status_callback: Option<&str>,
    ) -> Result<ProviderReceipt, TransportError>;

    /// Start a call whose spoken content is fetched from `content_url`.
    async fn place_call(
        &self,
        to: &str,
        content_url: &str,
        status_callback: Option<&str>,
    ) -> Result<ProviderReceipt, TransportError>;
}
