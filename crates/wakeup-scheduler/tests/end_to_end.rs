//! Tick → run → delivery callback, wired the way the gateway wires it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rusqlite::Connection;
use serde_json::json;
use wakeup_core::config::SchedulerConfig;
use wakeup_notify::{
    CallbackUrls, DeliveryReconciler, DeliveryStatus, NotificationDispatcher,
    NotificationTransport, ProviderReceipt, ReconcileOutcome, StatusCallback, TransportError,
};
use wakeup_scheduler::{
    ContactMethod, ExecutionQueue, ExecutionRunner, ExecutionStatus, InteractionAction,
    InteractionHandler, JobSchedule, JobStore, MessageComposer, NewJob, Recurrence,
    SchedulerEngine,
};
use wakeup_weather::{WeatherCache, WeatherError, WeatherProvider, WeatherReport};

struct Telephony {
    voice_up: bool,
}

#[async_trait]
impl NotificationTransport for Telephony {
    fn name(&self) -> &str {
        "telephony"
    }

    async fn send_sms(
        &self,
        _to: &str,
        _body: &str,
        _cb: Option<&str>,
    ) -> Result<ProviderReceipt, TransportError> {
        Ok(ProviderReceipt {
            provider_id: "SM-e2e".into(),
            status: Some("queued".into()),
        })
    }

    async fn place_call(
        &self,
        _to: &str,
        _url: &str,
        _cb: Option<&str>,
    ) -> Result<ProviderReceipt, TransportError> {
        if !self.voice_up {
            return Err(TransportError::Api {
                status: 400,
                code: Some("21215".into()),
                message: "Geographic permission disabled".into(),
            });
        }
        Ok(ProviderReceipt {
            provider_id: "CA-e2e".into(),
            status: Some("queued".into()),
        })
    }
}

struct Sunny;

#[async_trait]
impl WeatherProvider for Sunny {
    fn name(&self) -> &str {
        "sunny"
    }

    async fn fetch_current(&self, _location: &str) -> Result<WeatherReport, WeatherError> {
        Ok(WeatherReport {
            temperature_f: Some(71.6),
            condition: Some("Sunny".into()),
            raw: json!({}),
        })
    }
}

struct System {
    db: Arc<Mutex<Connection>>,
    store: Arc<JobStore>,
    engine: SchedulerEngine,
    runner: ExecutionRunner,
    interactions: InteractionHandler,
    rx: tokio::sync::mpsc::Receiver<wakeup_scheduler::WorkItem>,
}

fn system(voice_up: bool) -> System {
    let conn = Connection::open_in_memory().unwrap();
    wakeup_scheduler::db::init_db(&conn).unwrap();
    wakeup_notify::db::init_db(&conn).unwrap();
    wakeup_weather::db::init_db(&conn).unwrap();
    let db = Arc::new(Mutex::new(conn));

    let store = Arc::new(JobStore::new(db.clone()));
    let (queue, rx) = ExecutionQueue::channel(16, store.clone());
    let cfg = SchedulerConfig::default();
    let engine = SchedulerEngine::new(store.clone(), queue.clone(), &cfg);
    let dispatcher = NotificationDispatcher::new(
        db.clone(),
        Some(Arc::new(Telephony { voice_up })),
        false,
    );
    let runner = ExecutionRunner::new(
        store.clone(),
        Arc::new(WeatherCache::new(db.clone(), Some(Arc::new(Sunny)), 1800)),
        Arc::new(dispatcher),
        MessageComposer::new("Wakeup", cfg.snooze_minutes),
        CallbackUrls::new("https://wake.example.com", None),
    );
    let interactions = InteractionHandler::new(store.clone(), queue, cfg.snooze_minutes, "Wakeup");
    System {
        db,
        store,
        engine,
        runner,
        interactions,
        rx,
    }
}

fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn weekly_job() -> NewJob {
    NewJob {
        owner_id: "owner-7".into(),
        contact_address: "+15550001111".into(),
        contact_method: ContactMethod::Voice,
        schedule: JobSchedule {
            fire_time: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            recurrence: Recurrence::Weekly,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: None,
        },
        include_weather: true,
        weather_location: None,
        custom_text: Some("Big meeting at nine.".into()),
        owner_timezone: "America/New_York".into(),
        owner_location: Some("10001".into()),
        is_demo: false,
    }
}

#[tokio::test]
async fn weekly_call_is_delivered_and_reconciled() {
    let mut sys = system(true);
    let job = sys.store.create_job(weekly_job(), utc("2024-01-05T00:00:00Z")).unwrap();

    let report = sys.engine.tick(utc("2024-01-08T11:59:00Z")).unwrap();
    assert_eq!(report.claimed, 1);
    let item = sys.rx.try_recv().unwrap();
    assert_eq!(item.not_before, utc("2024-01-08T12:00:00Z"));
    assert_eq!(
        sys.store.get_job(&job.id).unwrap().next_fire,
        Some(utc("2024-01-15T12:00:00Z"))
    );

    let status = sys.runner.run(&item.execution_id).await.unwrap();
    assert_eq!(status, Some(ExecutionStatus::Completed));
    let exec = sys.store.get_execution(&item.execution_id).unwrap();
    assert_eq!(exec.provider_id.as_deref(), Some("CA-e2e"));
    let weather = exec.weather.expect("weather snapshot stored");
    assert_eq!(weather.condition.as_deref(), Some("Sunny"));

    let reconciler = DeliveryReconciler::new(sys.db.clone());
    let mut form = HashMap::new();
    form.insert("CallSid".to_string(), "CA-e2e".to_string());
    form.insert("CallStatus".to_string(), "completed".to_string());
    let cb = StatusCallback::from_form(&form).unwrap();
    assert_eq!(reconciler.reconcile(&cb).unwrap(), ReconcileOutcome::Delivered);

    form.insert("CallStatus".to_string(), "failed".to_string());
    let late = StatusCallback::from_form(&form).unwrap();
    assert_eq!(reconciler.reconcile(&late).unwrap(), ReconcileOutcome::AlreadyTerminal);

    let status: String = sys
        .db
        .lock()
        .unwrap()
        .query_row(
            "SELECT status FROM notification_log WHERE provider_id = 'CA-e2e'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(status, DeliveryStatus::Delivered.to_string());
}

#[tokio::test]
async fn voice_outage_falls_back_to_sms_and_snooze_follows() {
    let mut sys = system(false);
    sys.store.create_job(weekly_job(), utc("2024-01-05T00:00:00Z")).unwrap();
    sys.engine.tick(utc("2024-01-08T12:00:00Z")).unwrap();
    let item = sys.rx.try_recv().unwrap();

    assert_eq!(
        sys.runner.run(&item.execution_id).await.unwrap(),
        Some(ExecutionStatus::Completed)
    );
    let exec = sys.store.get_execution(&item.execution_id).unwrap();
    assert_eq!(exec.provider_id.as_deref(), Some("SM-e2e"));
    assert!(exec
        .error
        .as_deref()
        .unwrap()
        .starts_with("Voice call failed, SMS sent instead"));

    let now = utc("2024-01-08T12:01:00Z");
    let reply = sys
        .interactions
        .handle(&exec.id, Some("1"), None, json!({"Digits": "1"}), now)
        .await
        .unwrap();
    assert_eq!(reply.action, InteractionAction::Snooze);

    let snooze = sys.rx.try_recv().unwrap();
    assert_eq!(snooze.not_before, utc("2024-01-08T12:11:00Z"));
    let snooze = sys.store.get_execution(&snooze.execution_id).unwrap();
    assert!(snooze.is_snooze);
    assert_eq!(snooze.job_id, exec.job_id);
    assert_eq!(
        sys.store.get_execution(&exec.id).unwrap().user_response.as_deref(),
        Some("1 (snoozed for 10 min)")
    );
}
