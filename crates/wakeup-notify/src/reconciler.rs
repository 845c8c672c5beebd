use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info, warn};
use wakeup_core::time::to_db;

use crate::error::Result;
use crate::types::{DeliveryStatus, ReconcileOutcome, StatusCallback};

/// Applies provider status callbacks to `notification_log`.
///
/// Every callback is stored in `provider_webhooks` first. Rows already in a
/// terminal status are left alone, so replayed or out-of-order callbacks
/// cannot move a delivered message back to failed or vice versa.
pub struct DeliveryReconciler {
    db: Arc<Mutex<Connection>>,
}

impl DeliveryReconciler {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn reconcile(&self, cb: &StatusCallback) -> Result<ReconcileOutcome> {
        let now = to_db(Utc::now());
        let payload = serde_json::to_string(&cb.raw)?;

        let mut db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let tx = db.transaction()?;

        tx.execute(
            "INSERT INTO provider_webhooks (provider_id, event_type, payload, received_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![cb.provider_id, cb.status, payload, now],
        )?;
        let audit_id = tx.last_insert_rowid();

        let matched: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, status FROM notification_log
                 WHERE provider_id = ?1 ORDER BY id DESC LIMIT 1",
                [&cb.provider_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let outcome = match matched {
            None => {
                warn!(provider_id = %cb.provider_id, status = %cb.status, "no delivery record for callback");
                ReconcileOutcome::Unmatched
            }
            Some((log_id, current)) => {
                tx.execute(
                    "UPDATE provider_webhooks SET log_id = ?1 WHERE id = ?2",
                    rusqlite::params![log_id, audit_id],
                )?;
                let current: DeliveryStatus = current.parse().unwrap_or(DeliveryStatus::Pending);
                if current.is_terminal() {
                    debug!(provider_id = %cb.provider_id, %log_id, %current, "callback for terminal record ignored");
                    ReconcileOutcome::AlreadyTerminal
                } else {
                    apply(&tx, log_id, cb, &now)?
                }
            }
        };

        tx.execute(
            "UPDATE provider_webhooks SET processed = 1 WHERE id = ?1",
            [audit_id],
        )?;
        tx.commit()?;

        if matches!(outcome, ReconcileOutcome::Delivered | ReconcileOutcome::Failed) {
            info!(provider_id = %cb.provider_id, status = %cb.status, ?outcome, "delivery reconciled");
        }
        Ok(outcome)
    }

    /// Delete callback audit rows received before `cutoff`.
    pub fn prune_webhooks(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let n = db.execute(
            "DELETE FROM provider_webhooks WHERE received_at < ?1",
            [to_db(cutoff)],
        )?;
        Ok(n)
    }
}

fn apply(
    tx: &rusqlite::Transaction<'_>,
    log_id: i64,
    cb: &StatusCallback,
    now: &str,
) -> Result<ReconcileOutcome> {
    let outcome = match DeliveryStatus::from_provider(&cb.status) {
        Some(DeliveryStatus::Delivered) => {
            tx.execute(
                "UPDATE notification_log
                 SET status = 'delivered', provider_status = ?1, delivered_at = ?2, updated_at = ?2
                 WHERE id = ?3",
                rusqlite::params![cb.status, now, log_id],
            )?;
            ReconcileOutcome::Delivered
        }
        Some(_) => {
            tx.execute(
                "UPDATE notification_log
                 SET status = 'failed', provider_status = ?1, error_code = ?2,
                     error_message = ?3, updated_at = ?4
                 WHERE id = ?5",
                rusqlite::params![cb.status, cb.error_code, cb.error_message, now, log_id],
            )?;
            ReconcileOutcome::Failed
        }
        None => {
            tx.execute(
                "UPDATE notification_log SET provider_status = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![cb.status, now, log_id],
            )?;
            ReconcileOutcome::Progress
        }
    };
    Ok(outcome)
}
