use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{error, info, warn};
use wakeup_core::time::to_db;

use crate::error::Result;
use crate::transport::NotificationTransport;
use crate::types::{DeliveryStatus, DispatchMeta, DispatchResult, NotificationKind, ProviderReceipt};

const NOT_CONFIGURED: &str = "notification provider not configured";

/// Sends SMS and voice notifications, logging every attempt.
///
/// Demo dispatches (global switch or per-job flag) take the same path as real
/// ones, including the log rows, but never reach the transport.
pub struct NotificationDispatcher {
    db: Arc<Mutex<Connection>>,
    transport: Option<Arc<dyn NotificationTransport>>,
    demo_mode: bool,
    status_callback: Option<String>,
}

enum Outgoing<'a> {
    Text { body: &'a str },
    Call { content_url: &'a str, script: &'a str },
}

impl Outgoing<'_> {
    fn kind(&self) -> NotificationKind {
        match self {
            Outgoing::Text { .. } => NotificationKind::Sms,
            Outgoing::Call { .. } => NotificationKind::Voice,
        }
    }

    fn logged_content(&self) -> &str {
        match self {
            Outgoing::Text { body } => body,
            Outgoing::Call { script, .. } => script,
        }
    }
}

/// A `notification_log` row.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryLogEntry {
    pub id: i64,
    pub kind: String,
    pub to_address: String,
    pub status: DeliveryStatus,
    pub provider_id: Option<String>,
    pub provider_status: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub is_demo: bool,
    pub delivered_at: Option<String>,
}

impl NotificationDispatcher {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        transport: Option<Arc<dyn NotificationTransport>>,
        demo_mode: bool,
    ) -> Self {
        Self {
            db,
            transport,
            demo_mode,
            status_callback: None,
        }
    }

    /// Register the delivery webhook URL on every outbound message and call.
    pub fn with_status_callback(mut self, url: impl Into<String>) -> Self {
        self.status_callback = Some(url.into());
        self
    }

    pub async fn send_text(&self, to: &str, body: &str, meta: &DispatchMeta) -> DispatchResult {
        self.dispatch(to, Outgoing::Text { body }, meta).await
    }

    /// Start a voice call. `script` is the composed message, stored in the log;
    /// the provider fetches the spoken content from `content_url`.
    pub async fn place_call(
        &self,
        to: &str,
        content_url: &str,
        script: &str,
        meta: &DispatchMeta,
    ) -> DispatchResult {
        self.dispatch(to, Outgoing::Call { content_url, script }, meta)
            .await
    }

    async fn dispatch(&self, to: &str, out: Outgoing<'_>, meta: &DispatchMeta) -> DispatchResult {
        let kind = out.kind();
        let demo = self.demo_mode || meta.demo;
        let log_id = match self.begin_log(kind, to, out.logged_content(), meta, demo) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(%kind, error = %e, "failed to write notification log");
                None
            }
        };

        if demo {
            let suffix = log_id.unwrap_or_else(|| Utc::now().timestamp_millis());
            let receipt = ProviderReceipt {
                provider_id: format!("demo_{}_{suffix}", demo_prefix(kind)),
                status: Some(match kind {
                    NotificationKind::Sms => "sent".to_string(),
                    NotificationKind::Voice => "initiated".to_string(),
                }),
            };
            info!(%kind, %to, provider_id = %receipt.provider_id, "demo dispatch, transport skipped");
            self.finish_sent(log_id, &receipt);
            return DispatchResult {
                success: true,
                provider_id: Some(receipt.provider_id),
                provider_status: receipt.status,
                error: None,
                log_id,
            };
        }

        let Some(transport) = self.transport.as_ref() else {
            error!(%kind, %to, "dispatch requested but {NOT_CONFIGURED}");
            self.finish_failed(log_id, None, NOT_CONFIGURED);
            return DispatchResult::failed(NOT_CONFIGURED, log_id);
        };

        let callback = self.status_callback.as_deref();
        let outcome = match out {
            Outgoing::Text { body } => transport.send_sms(to, body, callback).await,
            Outgoing::Call { content_url, .. } => {
                transport.place_call(to, content_url, callback).await
            }
        };

        match outcome {
            Ok(receipt) => {
                info!(
                    %kind,
                    %to,
                    provider_id = %receipt.provider_id,
                    provider = transport.name(),
                    "notification dispatched"
                );
                self.finish_sent(log_id, &receipt);
                DispatchResult {
                    success: true,
                    provider_id: Some(receipt.provider_id),
                    provider_status: receipt.status,
                    error: None,
                    log_id,
                }
            }
            Err(e) => {
                let message = format!("{} error: {e}", transport.name());
                error!(%kind, %to, error = %message, "notification dispatch failed");
                self.finish_failed(log_id, e.code(), &message);
                DispatchResult::failed(message, log_id)
            }
        }
    }

    fn begin_log(
        &self,
        kind: NotificationKind,
        to: &str,
        content: &str,
        meta: &DispatchMeta,
        demo: bool,
    ) -> Result<i64> {
        let now = to_db(Utc::now());
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        db.execute(
            "INSERT INTO notification_log
             (job_id, execution_id, kind, to_address, content, status, is_demo,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, ?7)",
            rusqlite::params![
                meta.job_id,
                meta.execution_id,
                kind.to_string(),
                to,
                content,
                demo,
                now
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    fn finish_sent(&self, log_id: Option<i64>, receipt: &ProviderReceipt) {
        let Some(id) = log_id else { return };
        let now = to_db(Utc::now());
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = db.execute(
            "UPDATE notification_log
             SET status = 'sent', provider_id = ?1, provider_status = ?2,
                 sent_at = ?3, updated_at = ?3
             WHERE id = ?4",
            rusqlite::params![receipt.provider_id, receipt.status, now, id],
        ) {
            warn!(log_id = id, error = %e, "failed to update notification log");
        }
    }

    fn finish_failed(&self, log_id: Option<i64>, code: Option<&str>, message: &str) {
        let Some(id) = log_id else { return };
        let now = to_db(Utc::now());
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = db.execute(
            "UPDATE notification_log
             SET status = 'failed', error_code = ?1, error_message = ?2, updated_at = ?3
             WHERE id = ?4",
            rusqlite::params![code, message, now, id],
        ) {
            warn!(log_id = id, error = %e, "failed to update notification log");
        }
    }

    /// Delivery log rows written for one execution, oldest first.
    pub fn log_for_execution(&self, execution_id: &str) -> Result<Vec<DeliveryLogEntry>> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = db.prepare(
            "SELECT id, kind, to_address, status, provider_id, provider_status,
                    error_code, error_message, is_demo, delivered_at
             FROM notification_log WHERE execution_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([execution_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, bool>(8)?,
                    row.get::<_, Option<String>>(9)?,
                ))
            })?
            .filter_map(|r| {
                let (
                    id,
                    kind,
                    to_address,
                    status,
                    provider_id,
                    provider_status,
                    error_code,
                    error_message,
                    is_demo,
                    delivered_at,
                ) = r.ok()?;
                Some(DeliveryLogEntry {
                    id,
                    kind,
                    to_address,
                    status: status.parse().ok()?,
                    provider_id,
                    provider_status,
                    error_code,
                    error_message,
                    is_demo,
                    delivered_at,
                })
            })
            .collect();
        Ok(rows)
    }

    /// Delete delivery log rows created before `cutoff`.
    pub fn prune_log(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let n = db.execute(
            "DELETE FROM notification_log WHERE created_at < ?1",
            [to_db(cutoff)],
        )?;
        Ok(n)
    }
}

fn demo_prefix(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::Sms => "sms",
        NotificationKind::Voice => "call",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::error::TransportError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Transport that accepts SMS and rejects calls.
    #[derive(Default)]
    struct SmsOnly {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NotificationTransport for SmsOnly {
        fn name(&self) -> &str {
            "fake"
        }

        async fn send_sms(
            &self,
            _to: &str,
            _body: &str,
            status_callback: Option<&str>,
        ) -> std::result::Result<ProviderReceipt, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(status_callback, Some("https://x/webhooks/delivery"));
            Ok(ProviderReceipt {
                provider_id: "SM1".into(),
                status: Some("queued".into()),
            })
        }

        async fn place_call(
            &self,
            _to: &str,
            _content_url: &str,
            _status_callback: Option<&str>,
        ) -> std::result::Result<ProviderReceipt, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Api {
                status: 400,
                code: Some("21215".into()),
                message: "geo permissions".into(),
            })
        }
    }

    fn db() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        Arc::new(Mutex::new(conn))
    }

    fn meta(execution_id: &str, demo: bool) -> DispatchMeta {
        DispatchMeta {
            job_id: Some("job-1".into()),
            execution_id: Some(execution_id.into()),
            demo,
        }
    }

    #[tokio::test]
    async fn successful_sms_is_logged_as_sent() {
        let transport = Arc::new(SmsOnly::default());
        let d = NotificationDispatcher::new(db(), Some(transport.clone()), false)
            .with_status_callback("https://x/webhooks/delivery");

        let r = d.send_text("+15551234567", "Good morning!", &meta("e1", false)).await;
        assert!(r.success);
        assert_eq!(r.provider_id.as_deref(), Some("SM1"));

        let log = d.log_for_execution("e1").unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, DeliveryStatus::Sent);
        assert_eq!(log[0].provider_id.as_deref(), Some("SM1"));
        assert!(!log[0].is_demo);
    }

    #[tokio::test]
    async fn failed_call_records_code_and_message() {
        let d = NotificationDispatcher::new(db(), Some(Arc::new(SmsOnly::default())), false);

        let r = d
            .place_call("+15551234567", "https://x/voice/e2", "script", &meta("e2", false))
            .await;
        assert!(!r.success);
        assert!(r.error.as_deref().unwrap_or_default().contains("geo permissions"));

        let log = d.log_for_execution("e2").unwrap();
        assert_eq!(log[0].status, DeliveryStatus::Failed);
        assert_eq!(log[0].error_code.as_deref(), Some("21215"));
    }

    #[tokio::test]
    async fn demo_dispatch_never_touches_transport() {
        let transport = Arc::new(SmsOnly::default());
        let d = NotificationDispatcher::new(db(), Some(transport.clone()), false);

        let sms = d.send_text("+15551234567", "hi", &meta("e3", true)).await;
        let call = d
            .place_call("+15551234567", "https://x/voice/e3", "hi", &meta("e3", true))
            .await;

        assert!(sms.success && call.success);
        assert!(sms.provider_id.as_deref().unwrap_or_default().starts_with("demo_sms_"));
        assert!(call.provider_id.as_deref().unwrap_or_default().starts_with("demo_call_"));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);

        let log = d.log_for_execution("e3").unwrap();
        assert!(log.iter().all(|e| e.is_demo && e.status == DeliveryStatus::Sent));
    }

    #[tokio::test]
    async fn global_demo_mode_overrides_job_flag() {
        let d = NotificationDispatcher::new(db(), None, true);
        let r = d.send_text("+15551234567", "hi", &meta("e4", false)).await;
        assert!(r.success);
        assert!(r.provider_id.unwrap_or_default().starts_with("demo_sms_"));
    }

    #[tokio::test]
    async fn missing_transport_is_a_clear_failure() {
        let d = NotificationDispatcher::new(db(), None, false);
        let r = d.send_text("+15551234567", "hi", &meta("e5", false)).await;
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some(NOT_CONFIGURED));

        let log = d.log_for_execution("e5").unwrap();
        assert_eq!(log[0].status, DeliveryStatus::Failed);
        assert_eq!(log[0].error_message.as_deref(), Some(NOT_CONFIGURED));
    }
}
