use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use wakeup_core::time::truncate_secs;

use crate::{
    error::Result,
    store::JobStore,
    types::JobStatus,
    worker::ExecutionQueue,
};

/// Said when the interaction could not be processed at all.
pub const FALLBACK_REPLY: &str = "Thank you! Have a great day!";

/// Said when a snooze was requested but could not be scheduled.
pub const SNOOZE_UNAVAILABLE_REPLY: &str =
    "Sorry, I could not schedule a snooze. Time to get up! Have a great day!";

/// Successive one-second slots tried when the snooze instant is taken.
const SNOOZE_CLAIM_ATTEMPTS: i64 = 5;

/// What the caller's input was taken to mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionAction {
    Snooze,
    CancelJob,
    Reschedule,
    Acknowledge,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionReply {
    pub action: InteractionAction,
    /// Text to speak back before hanging up.
    pub speech: String,
}

/// Interprets keypad or speech input collected during a live call.
pub struct InteractionHandler {
    store: Arc<JobStore>,
    queue: ExecutionQueue,
    snooze_minutes: i64,
    brand: String,
}

impl InteractionHandler {
    pub fn new(
        store: Arc<JobStore>,
        queue: ExecutionQueue,
        snooze_minutes: i64,
        brand: impl Into<String>,
    ) -> Self {
        Self {
            store,
            queue,
            snooze_minutes,
            brand: brand.into(),
        }
    }

    /// Handle caller input for `execution_id`.
    ///
    /// Digits win over speech. The raw provider payload is stored with the
    /// execution whatever the input was.
    pub async fn handle(
        &self,
        execution_id: &str,
        digits: Option<&str>,
        speech: Option<&str>,
        raw: Value,
        now: DateTime<Utc>,
    ) -> Result<InteractionReply> {
        let execution = self.store.get_execution(execution_id)?;

        let response = match digits.map(str::trim).filter(|d| !d.is_empty()) {
            Some(d) => d.to_string(),
            None => speech.map(|s| s.trim().to_lowercase()).unwrap_or_default(),
        };

        let reply = if response == "1" {
            self.store.record_interaction(
                execution_id,
                &format!("{response} (snoozed for {} min)", self.snooze_minutes),
                &raw,
                now,
            )?;
            if self.schedule_snooze(execution_id, &execution.job_id, now)? {
                InteractionReply {
                    action: InteractionAction::Snooze,
                    speech: format!("Snoozing for {} minutes. Sweet dreams!", self.snooze_minutes),
                }
            } else {
                InteractionReply {
                    action: InteractionAction::Acknowledge,
                    speech: SNOOZE_UNAVAILABLE_REPLY.to_string(),
                }
            }
        } else if response == "2" {
            self.store.record_interaction(execution_id, &response, &raw, now)?;
            self.store
                .set_status(&execution.job_id, JobStatus::Cancelled, now)?;
            info!(%execution_id, job_id = %execution.job_id, "job cancelled by caller");
            InteractionReply {
                action: InteractionAction::CancelJob,
                speech: "All future wake-up calls have been cancelled.".to_string(),
            }
        } else if response.contains("reschedule") {
            self.store.record_interaction(execution_id, &response, &raw, now)?;
            InteractionReply {
                action: InteractionAction::Reschedule,
                speech: format!(
                    "To reschedule your wake-up calls, please use the {} app or website. \
                     Your current schedule remains unchanged.",
                    self.brand
                ),
            }
        } else {
            self.store.record_interaction(execution_id, &response, &raw, now)?;
            InteractionReply {
                action: InteractionAction::Acknowledge,
                speech: "Thank you! Have a wonderful day!".to_string(),
            }
        };
        Ok(reply)
    }

    /// Claim and queue the follow-up execution. The instant moves forward a
    /// second at a time while its slot is taken. Returns whether a snooze is
    /// actually queued.
    fn schedule_snooze(&self, execution_id: &str, job_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let first = truncate_secs(now) + Duration::minutes(self.snooze_minutes);
        for offset in 0..SNOOZE_CLAIM_ATTEMPTS {
            let at = first + Duration::seconds(offset);
            if let Some(snooze) = self.store.claim_execution(job_id, at, true, now)? {
                info!(%execution_id, snooze_id = %snooze.id, at = %at, "snooze scheduled");
                return Ok(self.queue.enqueue(&snooze.id, at));
            }
            debug!(%execution_id, at = %at, "snooze slot already taken");
        }
        warn!(%execution_id, "no free snooze slot, snooze dropped");
        Ok(false)
    }
}
