use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use wakeup_notify::{CallbackUrls, DispatchMeta, DispatchResult, NotificationDispatcher};
use wakeup_weather::{WeatherCache, WeatherSnapshot};

use crate::{
    content::{weather_sentence, MessageComposer},
    error::{Result, SchedulerError},
    store::JobStore,
    types::{ContactMethod, Execution, ExecutionOutcome, ExecutionStatus, ScheduledJob},
};

/// Runs one execution: weather, message, dispatch, call-to-SMS fallback.
pub struct ExecutionRunner {
    store: Arc<JobStore>,
    weather: Arc<WeatherCache>,
    dispatcher: Arc<NotificationDispatcher>,
    composer: MessageComposer,
    urls: CallbackUrls,
}

impl ExecutionRunner {
    pub fn new(
        store: Arc<JobStore>,
        weather: Arc<WeatherCache>,
        dispatcher: Arc<NotificationDispatcher>,
        composer: MessageComposer,
        urls: CallbackUrls,
    ) -> Self {
        Self {
            store,
            weather,
            dispatcher,
            composer,
            urls,
        }
    }

    /// Execute a pending execution. Returns the final status, or `None` when
    /// there was nothing to do (unknown id, or no longer pending).
    pub async fn run(&self, execution_id: &str) -> Result<Option<ExecutionStatus>> {
        let execution = match self.store.get_execution(execution_id) {
            Ok(e) => e,
            Err(SchedulerError::ExecutionNotFound { .. }) => {
                warn!(%execution_id, "execution vanished before it could run");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let job = match self.store.get_job(&execution.job_id) {
            Ok(j) => j,
            Err(SchedulerError::JobNotFound { .. }) => {
                warn!(%execution_id, job_id = %execution.job_id, "job vanished before execution");
                self.store
                    .fail_execution(execution_id, "job no longer exists", Utc::now())?;
                return Ok(Some(ExecutionStatus::Failed));
            }
            Err(e) => return Err(e),
        };

        let started = Utc::now();
        if !self.store.start_execution(execution_id, started)? {
            debug!(%execution_id, "execution is no longer pending, skipping");
            return Ok(None);
        }
        info!(
            %execution_id,
            job_id = %job.id,
            method = %job.contact_method,
            snooze = execution.is_snooze,
            "executing wake-up"
        );

        let snapshot = self.resolve_weather(&job).await;
        if let Some(s) = &snapshot {
            if let Err(e) = self.store.set_execution_weather(execution_id, s) {
                warn!(%execution_id, error = %e, "failed to store weather snapshot");
            }
        }
        let weather = weather_sentence(&job, snapshot.as_ref());
        let message =
            self.composer
                .compose(execution.is_snooze, weather.as_deref(), job.custom_text.as_deref());

        let outcome = self.deliver(&job, &execution, &message).await;
        self.store
            .finish_execution(execution_id, &outcome, Utc::now())?;

        if outcome.status == ExecutionStatus::Completed {
            self.store.record_last_fired(&job.id, started)?;
            info!(%execution_id, job_id = %job.id, provider_id = ?outcome.provider_id, "wake-up delivered");
        } else {
            error!(%execution_id, job_id = %job.id, error = ?outcome.error, "wake-up failed");
        }
        Ok(Some(outcome.status))
    }

    async fn resolve_weather(&self, job: &ScheduledJob) -> Option<WeatherSnapshot> {
        if !job.include_weather {
            return None;
        }
        let location = job.weather_location()?;
        self.weather.get(location, false).await
    }

    async fn deliver(&self, job: &ScheduledJob, execution: &Execution, message: &str) -> ExecutionOutcome {
        let meta = DispatchMeta {
            job_id: Some(job.id.clone()),
            execution_id: Some(execution.id.clone()),
            demo: job.is_demo,
        };
        let to = job.contact_address.as_str();

        match job.contact_method {
            ContactMethod::Sms => {
                let sms = self.dispatcher.send_text(to, message, &meta).await;
                outcome_of(sms, None)
            }
            ContactMethod::Voice => {
                let content_url = self.urls.voice_script(&execution.id);
                let call = self
                    .dispatcher
                    .place_call(to, &content_url, message, &meta)
                    .await;
                if call.success {
                    return outcome_of(call, None);
                }

                let call_error = call.error.unwrap_or_else(|| "unknown error".to_string());
                warn!(execution_id = %execution.id, error = %call_error, "voice call failed, falling back to SMS");

                let sms = self.dispatcher.send_text(to, message, &meta).await;
                if sms.success {
                    outcome_of(
                        sms,
                        Some(format!("Voice call failed, SMS sent instead: {call_error}")),
                    )
                } else {
                    let sms_error = sms.error.unwrap_or_else(|| "unknown error".to_string());
                    ExecutionOutcome {
                        status: ExecutionStatus::Failed,
                        provider_id: None,
                        provider_status: None,
                        error: Some(format!(
                            "Voice call failed: {call_error}. SMS fallback also failed: {sms_error}"
                        )),
                    }
                }
            }
        }
    }
}

fn outcome_of(result: DispatchResult, note: Option<String>) -> ExecutionOutcome {
    if result.success {
        ExecutionOutcome {
            status: ExecutionStatus::Completed,
            provider_id: result.provider_id,
            provider_status: result.provider_status,
            error: note,
        }
    } else {
        ExecutionOutcome {
            status: ExecutionStatus::Failed,
            provider_id: None,
            provider_status: None,
            error: result.error.or(note),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{JobSchedule, NewJob, Recurrence};
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveTime};
    use rusqlite::Connection;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use wakeup_notify::{NotificationTransport, ProviderReceipt, TransportError};
    use wakeup_weather::{WeatherError, WeatherProvider, WeatherReport};

    /// Transport whose SMS and call legs can be made to fail independently.
    pub(crate) struct ScriptedTransport {
        pub calls_fail: bool,
        pub sms_fail: bool,
        pub sms_sent: AtomicUsize,
        pub calls_placed: AtomicUsize,
        /// How long the provider takes to accept a call.
        pub call_delay: std::time::Duration,
    }

    impl ScriptedTransport {
        pub(crate) fn new(calls_fail: bool, sms_fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls_fail,
                sms_fail,
                sms_sent: AtomicUsize::new(0),
                calls_placed: AtomicUsize::new(0),
                call_delay: std::time::Duration::ZERO,
            })
        }

        pub(crate) fn slow(call_delay: std::time::Duration) -> Arc<Self> {
            Arc::new(Self {
                calls_fail: false,
                sms_fail: false,
                sms_sent: AtomicUsize::new(0),
                calls_placed: AtomicUsize::new(0),
                call_delay,
            })
        }
    }

    #[async_trait]
    impl NotificationTransport for ScriptedTransport {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send_sms(
            &self,
            _to: &str,
            _body: &str,
            _status_callback: Option<&str>,
        ) -> std::result::Result<ProviderReceipt, TransportError> {
            let n = self.sms_sent.fetch_add(1, Ordering::SeqCst);
            if self.sms_fail {
                return Err(TransportError::Parse("sms leg down".into()));
            }
            Ok(ProviderReceipt {
                provider_id: format!("SM{n}"),
                status: Some("queued".into()),
            })
        }

        async fn place_call(
            &self,
            _to: &str,
            _content_url: &str,
            _status_callback: Option<&str>,
        ) -> std::result::Result<ProviderReceipt, TransportError> {
            let n = self.calls_placed.fetch_add(1, Ordering::SeqCst);
            if !self.call_delay.is_zero() {
                tokio::time::sleep(self.call_delay).await;
            }
            if self.calls_fail {
                return Err(TransportError::Parse("voice leg down".into()));
            }
            Ok(ProviderReceipt {
                provider_id: format!("CA{n}"),
                status: Some("queued".into()),
            })
        }
    }

    /// Weather provider that always answers with HTTP 429.
    pub(crate) struct RateLimitedWeather;

    #[async_trait]
    impl WeatherProvider for RateLimitedWeather {
        fn name(&self) -> &str {
            "limited"
        }

        async fn fetch_current(&self, _location: &str) -> std::result::Result<WeatherReport, WeatherError> {
            Err(WeatherError::RateLimited)
        }
    }

    pub(crate) struct Harness {
        pub db: Arc<Mutex<Connection>>,
        pub store: Arc<JobStore>,
        pub runner: ExecutionRunner,
    }

    pub(crate) fn harness(
        transport: Arc<ScriptedTransport>,
        weather: Option<Arc<dyn WeatherProvider>>,
    ) -> Harness {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        wakeup_notify::db::init_db(&conn).unwrap();
        wakeup_weather::db::init_db(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));

        let store = Arc::new(JobStore::new(db.clone()));
        let cache = Arc::new(WeatherCache::new(db.clone(), weather, 3600));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            db.clone(),
            Some(transport as Arc<dyn NotificationTransport>),
            false,
        ));
        let runner = ExecutionRunner::new(
            store.clone(),
            cache,
            dispatcher,
            MessageComposer::new("Wakeup", 10),
            CallbackUrls::new("https://wake.example.com", None),
        );
        Harness { db, store, runner }
    }

    pub(crate) fn voice_job(include_weather: bool) -> NewJob {
        NewJob {
            owner_id: "owner-1".into(),
            contact_address: "+15551234567".into(),
            contact_method: ContactMethod::Voice,
            schedule: JobSchedule {
                fire_time: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
                recurrence: Recurrence::Daily,
                start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                end_date: None,
            },
            include_weather,
            weather_location: None,
            custom_text: Some("Stretch first.".into()),
            owner_timezone: "UTC".into(),
            owner_location: Some("10001".into()),
            is_demo: false,
        }
    }

    fn claim(h: &Harness, new: NewJob) -> Execution {
        let job = h.store.create_job(new, Utc::now()).unwrap();
        h.store
            .claim_execution(&job.id, wakeup_core::time::truncate_secs(Utc::now()), false, Utc::now())
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn voice_success_completes_with_call_id() {
        let transport = ScriptedTransport::new(false, false);
        let h = harness(transport.clone(), None);
        let exec = claim(&h, voice_job(false));

        let status = h.runner.run(&exec.id).await.unwrap();
        assert_eq!(status, Some(ExecutionStatus::Completed));

        let stored = h.store.get_execution(&exec.id).unwrap();
        assert_eq!(stored.provider_id.as_deref(), Some("CA0"));
        assert!(stored.error.is_none());
        assert!(stored.executed_at.unwrap() >= stored.scheduled_for);
        assert!(h.store.get_job(&stored.job_id).unwrap().last_fired.is_some());
        assert_eq!(transport.sms_sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_call_falls_back_to_sms() {
        let transport = ScriptedTransport::new(true, false);
        let h = harness(transport.clone(), None);
        let exec = claim(&h, voice_job(false));

        assert_eq!(h.runner.run(&exec.id).await.unwrap(), Some(ExecutionStatus::Completed));
        let stored = h.store.get_execution(&exec.id).unwrap();
        assert_eq!(stored.provider_id.as_deref(), Some("SM0"));
        let error = stored.error.unwrap();
        assert!(error.starts_with("Voice call failed, SMS sent instead:"));
        assert!(error.contains("voice leg down"));
    }

    #[tokio::test]
    async fn both_legs_failing_fails_execution() {
        let transport = ScriptedTransport::new(true, true);
        let h = harness(transport, None);
        let exec = claim(&h, voice_job(false));

        assert_eq!(h.runner.run(&exec.id).await.unwrap(), Some(ExecutionStatus::Failed));
        let stored = h.store.get_execution(&exec.id).unwrap();
        let error = stored.error.unwrap();
        assert!(error.contains("voice leg down"));
        assert!(error.contains("SMS fallback also failed"));
        assert!(error.contains("sms leg down"));
        assert!(stored.provider_id.is_none());
        assert!(h.store.get_job(&stored.job_id).unwrap().last_fired.is_none());
    }

    #[tokio::test]
    async fn rate_limited_weather_does_not_fail_execution() {
        let transport = ScriptedTransport::new(false, false);
        let h = harness(transport, Some(Arc::new(RateLimitedWeather)));
        let mut new = voice_job(true);
        new.contact_method = ContactMethod::Sms;
        let exec = claim(&h, new);

        assert_eq!(h.runner.run(&exec.id).await.unwrap(), Some(ExecutionStatus::Completed));
        let stored = h.store.get_execution(&exec.id).unwrap();
        assert!(stored.weather.is_none());

        let content: String = h
            .db
            .lock()
            .unwrap()
            .query_row(
                "SELECT content FROM notification_log WHERE execution_id = ?1",
                [&exec.id],
                |r| r.get(0),
            )
            .unwrap();
        assert!(content.contains(wakeup_weather::WEATHER_UNAVAILABLE));
        assert!(content.ends_with("Stretch first."));
    }

    #[tokio::test]
    async fn missing_location_uses_placeholder() {
        let transport = ScriptedTransport::new(false, false);
        let h = harness(transport, Some(Arc::new(RateLimitedWeather)));
        let mut new = voice_job(true);
        new.contact_method = ContactMethod::Sms;
        new.owner_location = None;
        let exec = claim(&h, new);

        h.runner.run(&exec.id).await.unwrap();
        let content: String = h
            .db
            .lock()
            .unwrap()
            .query_row(
                "SELECT content FROM notification_log WHERE execution_id = ?1",
                [&exec.id],
                |r| r.get(0),
            )
            .unwrap();
        assert!(content.contains(crate::content::NO_WEATHER_LOCATION));
    }

    #[tokio::test]
    async fn second_run_of_same_execution_is_skipped() {
        let transport = ScriptedTransport::new(false, false);
        let h = harness(transport.clone(), None);
        let exec = claim(&h, voice_job(false));

        h.runner.run(&exec.id).await.unwrap();
        assert_eq!(h.runner.run(&exec.id).await.unwrap(), None);
        assert_eq!(transport.calls_placed.load(Ordering::SeqCst), 1);
        assert_eq!(h.runner.run("no-such-execution").await.unwrap(), None);
    }
}
