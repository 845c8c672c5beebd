use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use wakeup_core::{
    config::SchedulerConfig,
    time::{resolve_zone, to_db, truncate_secs},
};

use crate::{
    error::{Result, SchedulerError},
    recurrence::{first_fire_from, next_fire_after, should_fire_on},
    store::JobStore,
    types::{Execution, ExecutionStatus, ScheduledJob},
    worker::ExecutionQueue,
};

/// Counters for one pass of the tick loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Executions created and queued.
    pub claimed: usize,
    /// Slots that already had an execution.
    pub duplicates: usize,
    /// Stale jobs moved to a fresh `next_fire`.
    pub rescheduled: usize,
    /// Jobs skipped because of an error.
    pub errors: usize,
}

/// Tick-driven scheduler: finds due jobs, claims exactly one execution per
/// `(job, scheduled_for)` slot and advances `next_fire`.
#[derive(Clone)]
pub struct SchedulerEngine {
    store: Arc<JobStore>,
    queue: ExecutionQueue,
    tick_every: std::time::Duration,
    grace: Duration,
    lookahead: Duration,
}

impl SchedulerEngine {
    pub fn new(store: Arc<JobStore>, queue: ExecutionQueue, cfg: &SchedulerConfig) -> Self {
        Self {
            store,
            queue,
            tick_every: std::time::Duration::from_secs(cfg.tick_secs.max(1)),
            grace: Duration::seconds(cfg.grace_secs.max(0)),
            lookahead: Duration::seconds(cfg.lookahead_secs.max(0)),
        }
    }

    /// Main loop. Ticks every `tick_secs` until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(tick = ?self.tick_every, "scheduler engine started");
        if let Err(e) = self.recover_on_startup(Utc::now()) {
            error!("scheduler startup recovery failed: {e}");
        }

        let mut interval = tokio::time::interval(self.tick_every);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick(Utc::now()) {
                        Ok(report) if report != TickReport::default() => {
                            debug!(?report, "scheduler tick");
                        }
                        Ok(_) => {}
                        Err(e) => error!("scheduler tick error: {e}"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Bring persisted state back in line after a restart.
    ///
    /// Active jobs without `next_fire` get one, executions left running are
    /// failed, pending executions inside the grace window (or in the future,
    /// such as snoozes) are queued again and older ones are cancelled.
    pub fn recover_on_startup(&self, now: DateTime<Utc>) -> Result<()> {
        for job in self.store.unscheduled_jobs()? {
            let next = first_fire_from(&job.schedule, resolve_zone(&job.owner_timezone), now);
            if let Err(e) = self.store.advance_next_fire(&job.id, None, next, now) {
                error!(job_id = %job.id, "failed to schedule job on startup: {e}");
            }
        }

        let interrupted = self.store.fail_interrupted(now)?;
        if interrupted > 0 {
            warn!(count = interrupted, "executions interrupted by restart marked failed");
        }

        let cutoff = now - self.grace;
        let mut requeued = 0;
        let mut missed = 0;
        for exec in self.store.executions_with_status(ExecutionStatus::Pending)? {
            if exec.scheduled_for >= cutoff {
                if self.queue.enqueue(&exec.id, exec.scheduled_for) {
                    requeued += 1;
                }
                continue;
            }
            match self
                .store
                .cancel_execution(&exec.id, "missed while scheduler was offline", now)
            {
                Ok(true) => missed += 1,
                Ok(false) => {}
                Err(e) => error!(execution_id = %exec.id, "failed to cancel missed execution: {e}"),
            }
        }
        if requeued > 0 || missed > 0 {
            info!(requeued, missed, "pending executions recovered on startup");
        }

        let mut report = TickReport::default();
        self.sweep_stale(now, &mut report)?;
        Ok(())
    }

    /// One pass: reschedule stale jobs, then claim and queue every job due in
    /// `[now - grace, now + lookahead]`. A failing job never stops the others.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();
        self.sweep_stale(now, &mut report)?;

        let due = self
            .store
            .due_jobs(now - self.grace, now + self.lookahead)?;
        for job in due {
            match self.fire(&job, now) {
                Ok(Some(_)) => report.claimed += 1,
                Ok(None) => report.duplicates += 1,
                Err(e) => {
                    report.errors += 1;
                    error!(job_id = %job.id, "failed to process due job: {e}");
                }
            }
        }
        Ok(report)
    }

    /// Claim the slot at `job.next_fire` (if the pattern still allows it) and
    /// advance. Returns the new execution, or `None` when nothing was claimed.
    fn fire(&self, job: &ScheduledJob, now: DateTime<Utc>) -> Result<Option<Execution>> {
        let Some(scheduled) = job.next_fire else {
            return Ok(None);
        };
        let tz = resolve_zone(&job.owner_timezone);
        let local_date = scheduled.with_timezone(&tz).date_naive();

        let (claimed, next) = if should_fire_on(&job.schedule, local_date) {
            let claimed = self.store.claim_execution(&job.id, scheduled, false, now)?;
            match &claimed {
                Some(exec) => {
                    info!(job_id = %job.id, execution_id = %exec.id, scheduled_for = %to_db(scheduled), "execution claimed");
                    self.queue.enqueue(&exec.id, scheduled);
                }
                None => debug!(job_id = %job.id, scheduled_for = %to_db(scheduled), "slot already claimed"),
            }
            (claimed, next_fire_after(&job.schedule, tz, scheduled))
        } else {
            debug!(job_id = %job.id, %local_date, "pattern no longer matches, recomputing");
            (None, first_fire_from(&job.schedule, tz, now.max(scheduled)))
        };

        if !self
            .store
            .advance_next_fire(&job.id, Some(scheduled), next, now)?
        {
            debug!(job_id = %job.id, "next_fire already advanced elsewhere");
        }
        Ok(claimed)
    }

    /// Jobs whose `next_fire` fell out of the grace window are moved to their
    /// next occurrence after `now` without firing. Only the selection query
    /// can fail the sweep; per-job errors are counted in `report.errors`.
    fn sweep_stale(&self, now: DateTime<Utc>, report: &mut TickReport) -> Result<()> {
        for job in self.store.stale_jobs(now - self.grace)? {
            let next = first_fire_from(&job.schedule, resolve_zone(&job.owner_timezone), now);
            match self.store.advance_next_fire(&job.id, job.next_fire, next, now) {
                Ok(true) => {
                    warn!(
                        job_id = %job.id,
                        missed = ?job.next_fire.map(to_db),
                        next = ?next,
                        "missed occurrence, job rescheduled"
                    );
                    report.rescheduled += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    report.errors += 1;
                    error!(job_id = %job.id, "failed to reschedule stale job: {e}");
                }
            }
        }
        Ok(())
    }

    /// Fire a job right now, outside its schedule. `next_fire` is untouched.
    pub fn trigger_now(&self, job_id: &str, now: DateTime<Utc>) -> Result<Execution> {
        let job = self.store.get_job(job_id)?;
        let at = truncate_secs(now);
        let Some(exec) = self.store.claim_execution(&job.id, at, false, now)? else {
            return Err(SchedulerError::DuplicateExecution {
                job_id: job.id,
                scheduled_for: to_db(at),
            });
        };
        info!(job_id = %job.id, execution_id = %exec.id, "manual trigger");
        self.queue.enqueue(&exec.id, at);
        Ok(exec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::tests::{harness, voice_job, Harness, ScriptedTransport};
    use crate::types::{JobSchedule, JobStatus, Recurrence};
    use chrono::{NaiveDate, NaiveTime};
    use tokio::sync::mpsc;

    use crate::worker::WorkItem;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn engine(h: &Harness) -> (SchedulerEngine, mpsc::Receiver<WorkItem>) {
        let (queue, rx) = ExecutionQueue::channel(16, h.store.clone());
        let cfg = SchedulerConfig {
            grace_secs: 60,
            lookahead_secs: 60,
            ..Default::default()
        };
        (SchedulerEngine::new(h.store.clone(), queue, &cfg), rx)
    }

    fn weekly_new_york(h: &Harness, created: DateTime<Utc>) -> ScheduledJob {
        let mut new = voice_job(false);
        new.owner_timezone = "America/New_York".into();
        new.schedule = JobSchedule {
            fire_time: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            recurrence: Recurrence::Weekly,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: None,
        };
        h.store.create_job(new, created).unwrap()
    }

    #[tokio::test]
    async fn due_job_is_claimed_once_and_advanced() {
        let h = harness(ScriptedTransport::new(false, false), None);
        let (engine, mut rx) = engine(&h);
        let job = weekly_new_york(&h, utc("2024-01-07T00:00:00Z"));
        assert_eq!(job.next_fire, Some(utc("2024-01-08T12:00:00Z")));

        let report = engine.tick(utc("2024-01-08T11:59:30Z")).unwrap();
        assert_eq!(report.claimed, 1);

        let item = rx.try_recv().unwrap();
        assert_eq!(item.not_before, utc("2024-01-08T12:00:00Z"));
        let exec = h.store.get_execution(&item.execution_id).unwrap();
        assert_eq!(exec.scheduled_for, utc("2024-01-08T12:00:00Z"));
        assert!(!exec.is_snooze);

        let job = h.store.get_job(&job.id).unwrap();
        assert_eq!(job.next_fire, Some(utc("2024-01-15T12:00:00Z")));

        let again = engine.tick(utc("2024-01-08T12:00:10Z")).unwrap();
        assert_eq!(again.claimed, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn two_engines_never_double_claim() {
        let h = harness(ScriptedTransport::new(false, false), None);
        let (a, mut rx_a) = engine(&h);
        let (b, mut rx_b) = engine(&h);
        let job = weekly_new_york(&h, utc("2024-01-07T00:00:00Z"));

        // Simulate b reading the job before a advanced it.
        let stale_view = h.store.get_job(&job.id).unwrap();
        a.tick(utc("2024-01-08T12:00:00Z")).unwrap();
        assert!(b.fire(&stale_view, utc("2024-01-08T12:00:00Z")).unwrap().is_none());

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
        assert_eq!(h.store.list_executions(&job.id, 10).unwrap().len(), 1);
        assert_eq!(
            h.store.get_job(&job.id).unwrap().next_fire,
            Some(utc("2024-01-15T12:00:00Z"))
        );
    }

    #[tokio::test]
    async fn stale_job_is_rescheduled_without_firing() {
        let h = harness(ScriptedTransport::new(false, false), None);
        let (engine, mut rx) = engine(&h);
        let job = weekly_new_york(&h, utc("2024-01-07T00:00:00Z"));

        let report = engine.tick(utc("2024-01-09T00:00:00Z")).unwrap();
        assert_eq!(report.rescheduled, 1);
        assert_eq!(report.claimed, 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(
            h.store.get_job(&job.id).unwrap().next_fire,
            Some(utc("2024-01-15T12:00:00Z"))
        );
    }

    #[tokio::test]
    async fn failing_stale_job_does_not_block_due_jobs() {
        let h = harness(ScriptedTransport::new(false, false), None);
        let (engine, mut rx) = engine(&h);
        let stuck = weekly_new_york(&h, utc("2024-01-01T00:00:00Z"));
        assert_eq!(stuck.next_fire, Some(utc("2024-01-01T12:00:00Z")));
        let mut daily = voice_job(false);
        daily.schedule.fire_time = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        let due = h.store.create_job(daily, utc("2024-01-02T00:00:00Z")).unwrap();
        assert_eq!(due.next_fire, Some(utc("2024-01-02T12:00:00Z")));

        h.db.lock()
            .unwrap()
            .execute_batch(&format!(
                "CREATE TRIGGER reject_stuck BEFORE UPDATE ON wakeup_jobs
                 WHEN OLD.id = '{}'
                 BEGIN SELECT RAISE(ABORT, 'database is locked'); END;",
                stuck.id
            ))
            .unwrap();

        let report = engine.tick(utc("2024-01-02T12:00:00Z")).unwrap();
        assert_eq!(report.errors, 1);
        assert_eq!(report.rescheduled, 0);
        assert_eq!(report.claimed, 1);
        let item = rx.try_recv().unwrap();
        assert_eq!(h.store.get_execution(&item.execution_id).unwrap().job_id, due.id);
        assert_eq!(
            h.store.get_job(&due.id).unwrap().next_fire,
            Some(utc("2024-01-03T12:00:00Z"))
        );
    }

    #[tokio::test]
    async fn once_job_completes_after_firing() {
        let h = harness(ScriptedTransport::new(false, false), None);
        let (engine, mut rx) = engine(&h);
        let mut new = voice_job(false);
        new.schedule.recurrence = Recurrence::Once;
        new.schedule.start_date = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let job = h.store.create_job(new, utc("2024-01-01T00:00:00Z")).unwrap();

        engine.tick(utc("2024-01-10T07:00:00Z")).unwrap();
        assert!(rx.try_recv().is_ok());
        let job = h.store.get_job(&job.id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.next_fire.is_none());
    }

    #[tokio::test]
    async fn startup_recovery_requeues_recent_and_cancels_old() {
        let h = harness(ScriptedTransport::new(false, false), None);
        let (engine, mut rx) = engine(&h);
        let job = h.store.create_job(voice_job(false), utc("2024-01-01T00:00:00Z")).unwrap();
        let now = utc("2024-01-05T07:00:30Z");

        let old = h
            .store
            .claim_execution(&job.id, utc("2024-01-04T07:00:00Z"), false, now)
            .unwrap()
            .unwrap();
        let recent = h
            .store
            .claim_execution(&job.id, utc("2024-01-05T07:00:00Z"), false, now)
            .unwrap()
            .unwrap();
        let snooze = h
            .store
            .claim_execution(&job.id, utc("2024-01-05T07:10:00Z"), true, now)
            .unwrap()
            .unwrap();
        let running = h
            .store
            .claim_execution(&job.id, utc("2024-01-03T07:00:00Z"), false, now)
            .unwrap()
            .unwrap();
        h.store.start_execution(&running.id, now).unwrap();

        engine.recover_on_startup(now).unwrap();

        let old = h.store.get_execution(&old.id).unwrap();
        assert_eq!(old.status, ExecutionStatus::Cancelled);
        assert_eq!(old.error.as_deref(), Some("missed while scheduler was offline"));
        let running = h.store.get_execution(&running.id).unwrap();
        assert_eq!(running.status, ExecutionStatus::Failed);
        assert_eq!(running.error.as_deref(), Some("interrupted by restart"));

        let mut queued = vec![rx.try_recv().unwrap().execution_id, rx.try_recv().unwrap().execution_id];
        queued.sort();
        let mut expected = vec![recent.id, snooze.id];
        expected.sort();
        assert_eq!(queued, expected);
    }

    #[tokio::test]
    async fn manual_trigger_rejects_duplicate_slot() {
        let h = harness(ScriptedTransport::new(false, false), None);
        let (engine, mut rx) = engine(&h);
        let job = h.store.create_job(voice_job(false), Utc::now()).unwrap();
        let now = utc("2024-03-01T09:15:00Z");

        let exec = engine.trigger_now(&job.id, now).unwrap();
        assert_eq!(exec.scheduled_for, now);
        assert_eq!(rx.try_recv().unwrap().execution_id, exec.id);

        let err = engine.trigger_now(&job.id, now).unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateExecution { .. }));
        assert!(matches!(
            engine.trigger_now("nope", now).unwrap_err(),
            SchedulerError::JobNotFound { .. }
        ));
    }
}
