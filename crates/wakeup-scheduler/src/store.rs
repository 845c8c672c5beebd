use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::{info, warn};
use uuid::Uuid;
use wakeup_core::time::{from_db, resolve_zone, to_db};

use crate::{
    error::{Result, SchedulerError},
    recurrence::{first_fire_from, NextFire},
    types::{
        Execution, ExecutionOutcome, ExecutionStatus, JobSchedule, JobStatus, NewJob,
        ScheduledJob,
    },
};

const JOB_COLUMNS: &str = "id, owner_id, contact_address, contact_method, fire_time, recurrence,
    start_date, end_date, include_weather, weather_location, custom_text, status,
    owner_timezone, owner_location, last_fired, next_fire, is_demo, created_at, updated_at";

const EXECUTION_COLUMNS: &str = "id, job_id, scheduled_for, executed_at, status, provider_id,
    provider_status, weather, error, user_response, interaction_data, is_snooze, created_at";

const FIRE_TIME_FORMAT: &str = "%H:%M:%S";

/// Persistence boundary for jobs and executions.
///
/// Every mutation that can change when a job fires goes through here, so
/// `next_fire` is recomputed in exactly one place and invalid schedules never
/// reach the table.
pub struct JobStore {
    db: Arc<Mutex<Connection>>,
}

impl JobStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    // --- jobs ----------------------------------------------------------------

    /// Validate and insert a job; `next_fire` is computed immediately.
    pub fn create_job(&self, new: NewJob, now: DateTime<Utc>) -> Result<ScheduledJob> {
        new.schedule.validate().map_err(SchedulerError::InvalidJob)?;
        if new.contact_address.trim().is_empty() {
            return Err(SchedulerError::InvalidJob(
                "contact_address must not be empty".to_string(),
            ));
        }
        if new.owner_id.trim().is_empty() {
            return Err(SchedulerError::InvalidJob("owner_id must not be empty".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let (status, next_fire) = initial_state(&new.schedule, &new.owner_timezone, now);
        let recurrence = serde_json::to_string(&new.schedule.recurrence)?;
        let now_str = to_db(now);

        self.conn().execute(
            &format!(
                "INSERT INTO wakeup_jobs ({JOB_COLUMNS})
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,NULL,?15,?16,?17,?17)"
            ),
            rusqlite::params![
                id,
                new.owner_id,
                new.contact_address,
                new.contact_method.to_string(),
                new.schedule.fire_time.format(FIRE_TIME_FORMAT).to_string(),
                recurrence,
                new.schedule.start_date.to_string(),
                new.schedule.end_date.map(|d| d.to_string()),
                new.include_weather,
                new.weather_location,
                new.custom_text,
                status.to_string(),
                new.owner_timezone,
                new.owner_location,
                next_fire.map(to_db),
                new.is_demo,
                now_str,
            ],
        )?;

        info!(job_id = %id, owner_id = %new.owner_id, %status, next_fire = ?next_fire, "job created");
        self.get_job(&id)
    }

    pub fn get_job(&self, id: &str) -> Result<ScheduledJob> {
        let conn = self.conn();
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM wakeup_jobs WHERE id = ?1"),
                [id],
                job_from_row,
            )
            .optional()?
            .flatten();
        job.ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })
    }

    /// Move a job to `status`. Leaving `active` clears `next_fire`; entering it
    /// recomputes from `now`, which may complete a one-shot whose time passed.
    pub fn set_status(&self, id: &str, status: JobStatus, now: DateTime<Utc>) -> Result<ScheduledJob> {
        let job = self.get_job(id)?;
        if job.status == status {
            return Ok(job);
        }

        let (new_status, next_fire) = match status {
            JobStatus::Active => initial_state(&job.schedule, &job.owner_timezone, now),
            other => (other, None),
        };

        self.conn().execute(
            "UPDATE wakeup_jobs SET status = ?1, next_fire = ?2, updated_at = ?3 WHERE id = ?4",
            rusqlite::params![new_status.to_string(), next_fire.map(to_db), to_db(now), id],
        )?;
        info!(job_id = %id, from = %job.status, to = %new_status, next_fire = ?next_fire, "job status changed");
        self.get_job(id)
    }

    /// Replace a job's timing. Active jobs get `next_fire` recomputed.
    pub fn update_schedule(
        &self,
        id: &str,
        schedule: JobSchedule,
        now: DateTime<Utc>,
    ) -> Result<ScheduledJob> {
        schedule.validate().map_err(SchedulerError::InvalidJob)?;
        let job = self.get_job(id)?;

        let (status, next_fire) = if job.status == JobStatus::Active {
            initial_state(&schedule, &job.owner_timezone, now)
        } else {
            (job.status, None)
        };

        self.conn().execute(
            "UPDATE wakeup_jobs
             SET fire_time = ?1, recurrence = ?2, start_date = ?3, end_date = ?4,
                 status = ?5, next_fire = ?6, updated_at = ?7
             WHERE id = ?8",
            rusqlite::params![
                schedule.fire_time.format(FIRE_TIME_FORMAT).to_string(),
                serde_json::to_string(&schedule.recurrence)?,
                schedule.start_date.to_string(),
                schedule.end_date.map(|d| d.to_string()),
                status.to_string(),
                next_fire.map(to_db),
                to_db(now),
                id
            ],
        )?;
        info!(job_id = %id, next_fire = ?next_fire, "job schedule updated");
        self.get_job(id)
    }

    /// Propagate an owner's zone and default location to all of their jobs,
    /// recomputing `next_fire` for the active ones. Returns the number of jobs touched.
    pub fn update_owner_profile(
        &self,
        owner_id: &str,
        timezone: &str,
        location: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let jobs = self.query_jobs(
            &format!("SELECT {JOB_COLUMNS} FROM wakeup_jobs WHERE owner_id = ?1"),
            [owner_id],
        )?;

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for job in &jobs {
            let (status, next_fire) = if job.status == JobStatus::Active {
                initial_state(&job.schedule, timezone, now)
            } else {
                (job.status, None)
            };
            tx.execute(
                "UPDATE wakeup_jobs
                 SET owner_timezone = ?1, owner_location = ?2, status = ?3,
                     next_fire = ?4, updated_at = ?5
                 WHERE id = ?6",
                rusqlite::params![
                    timezone,
                    location,
                    status.to_string(),
                    next_fire.map(to_db),
                    to_db(now),
                    job.id
                ],
            )?;
        }
        tx.commit()?;

        info!(%owner_id, %timezone, jobs = jobs.len(), "owner profile synced to jobs");
        Ok(jobs.len())
    }

    /// Active jobs whose `next_fire` lies in `[from, to]`, earliest first.
    pub fn due_jobs(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<ScheduledJob>> {
        self.query_jobs(
            &format!(
                "SELECT {JOB_COLUMNS} FROM wakeup_jobs
                 WHERE status = 'active' AND next_fire IS NOT NULL
                   AND next_fire >= ?1 AND next_fire <= ?2
                 ORDER BY next_fire"
            ),
            [to_db(from), to_db(to)],
        )
    }

    /// Active jobs whose `next_fire` fell before `before`.
    pub fn stale_jobs(&self, before: DateTime<Utc>) -> Result<Vec<ScheduledJob>> {
        self.query_jobs(
            &format!(
                "SELECT {JOB_COLUMNS} FROM wakeup_jobs
                 WHERE status = 'active' AND next_fire IS NOT NULL AND next_fire < ?1"
            ),
            [to_db(before)],
        )
    }

    /// Active jobs with no `next_fire` at all.
    pub fn unscheduled_jobs(&self) -> Result<Vec<ScheduledJob>> {
        self.query_jobs(
            &format!(
                "SELECT {JOB_COLUMNS} FROM wakeup_jobs
                 WHERE status = 'active' AND next_fire IS NULL"
            ),
            [],
        )
    }

    /// Store the next occurrence, but only if `next_fire` still equals
    /// `expected`. Returns `false` when another writer got there first.
    pub fn advance_next_fire(
        &self,
        job_id: &str,
        expected: Option<DateTime<Utc>>,
        next: NextFire,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let expected = expected.map(to_db);
        let now = to_db(now);
        let conn = self.conn();
        let n = match next {
            NextFire::At(at) => conn.execute(
                "UPDATE wakeup_jobs SET next_fire = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = 'active' AND next_fire IS ?4",
                rusqlite::params![to_db(at), now, job_id, expected],
            )?,
            NextFire::Completed => conn.execute(
                "UPDATE wakeup_jobs SET status = 'completed', next_fire = NULL, updated_at = ?1
                 WHERE id = ?2 AND status = 'active' AND next_fire IS ?3",
                rusqlite::params![now, job_id, expected],
            )?,
            NextFire::Unschedulable => {
                warn!(%job_id, "job has no upcoming occurrence, leaving it unscheduled");
                conn.execute(
                    "UPDATE wakeup_jobs SET next_fire = NULL, updated_at = ?1
                     WHERE id = ?2 AND status = 'active' AND next_fire IS ?3",
                    rusqlite::params![now, job_id, expected],
                )?
            }
        };
        Ok(n > 0)
    }

    pub fn record_last_fired(&self, job_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE wakeup_jobs SET last_fired = ?1, updated_at = ?1 WHERE id = ?2",
            rusqlite::params![to_db(at), job_id],
        )?;
        Ok(())
    }

    /// Distinct weather locations of active, weather-enabled jobs.
    pub fn active_weather_locations(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT loc FROM (
                 SELECT COALESCE(NULLIF(TRIM(weather_location), ''),
                                 NULLIF(TRIM(owner_location), '')) AS loc
                 FROM wakeup_jobs
                 WHERE status = 'active' AND include_weather = 1
             ) WHERE loc IS NOT NULL ORDER BY loc",
        )?;
        let locations = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(locations)
    }

    fn query_jobs<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<ScheduledJob>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let jobs = stmt
            .query_map(params, job_from_row)?
            .filter_map(|r| r.ok().flatten())
            .collect();
        Ok(jobs)
    }

    // --- executions ----------------------------------------------------------

    /// Create the execution for `(job_id, scheduled_for)` unless one exists.
    /// Returns `None` when the slot was already claimed.
    pub fn claim_execution(
        &self,
        job_id: &str,
        scheduled_for: DateTime<Utc>,
        is_snooze: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<Execution>> {
        let id = Uuid::new_v4().to_string();
        let n = self.conn().execute(
            "INSERT OR IGNORE INTO executions
             (id, job_id, scheduled_for, status, is_snooze, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?5)",
            rusqlite::params![id, job_id, to_db(scheduled_for), is_snooze, to_db(now)],
        )?;
        if n == 0 {
            return Ok(None);
        }
        self.get_execution(&id).map(Some)
    }

    pub fn get_execution(&self, id: &str) -> Result<Execution> {
        let conn = self.conn();
        let execution = conn
            .query_row(
                &format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = ?1"),
                [id],
                execution_from_row,
            )
            .optional()?
            .flatten();
        execution.ok_or_else(|| SchedulerError::ExecutionNotFound { id: id.to_string() })
    }

    /// Most recent executions of a job, newest first.
    pub fn list_executions(&self, job_id: &str, limit: usize) -> Result<Vec<Execution>> {
        self.query_executions(
            &format!(
                "SELECT {EXECUTION_COLUMNS} FROM executions
                 WHERE job_id = ?1 ORDER BY scheduled_for DESC LIMIT ?2"
            ),
            rusqlite::params![job_id, limit as i64],
        )
    }

    pub fn executions_with_status(&self, status: ExecutionStatus) -> Result<Vec<Execution>> {
        self.query_executions(
            &format!(
                "SELECT {EXECUTION_COLUMNS} FROM executions
                 WHERE status = ?1 ORDER BY scheduled_for"
            ),
            [status.to_string()],
        )
    }

    /// `pending -> in_progress`. Returns `false` if the execution was not pending.
    pub fn start_execution(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let now = to_db(now);
        let n = self.conn().execute(
            "UPDATE executions SET status = 'in_progress', executed_at = ?1, updated_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            rusqlite::params![now, id],
        )?;
        Ok(n > 0)
    }

    pub fn set_execution_weather(
        &self,
        id: &str,
        snapshot: &wakeup_weather::WeatherSnapshot,
    ) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        self.conn().execute(
            "UPDATE executions SET weather = ?1 WHERE id = ?2",
            rusqlite::params![json, id],
        )?;
        Ok(())
    }

    /// Write the final state of an in-progress execution.
    pub fn finish_execution(
        &self,
        id: &str,
        outcome: &ExecutionOutcome,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let n = self.conn().execute(
            "UPDATE executions
             SET status = ?1, provider_id = ?2, provider_status = ?3, error = ?4, updated_at = ?5
             WHERE id = ?6 AND status = 'in_progress'",
            rusqlite::params![
                outcome.status.to_string(),
                outcome.provider_id,
                outcome.provider_status,
                outcome.error,
                to_db(now),
                id
            ],
        )?;
        Ok(n > 0)
    }

    /// Fail an execution that has not reached a terminal state.
    pub fn fail_execution(&self, id: &str, error: &str, now: DateTime<Utc>) -> Result<bool> {
        let n = self.conn().execute(
            "UPDATE executions SET status = 'failed', error = ?1, updated_at = ?2
             WHERE id = ?3 AND status IN ('pending', 'in_progress')",
            rusqlite::params![error, to_db(now), id],
        )?;
        Ok(n > 0)
    }

    /// Cancel a pending execution (never started).
    pub fn cancel_execution(&self, id: &str, reason: &str, now: DateTime<Utc>) -> Result<bool> {
        let n = self.conn().execute(
            "UPDATE executions SET status = 'cancelled', error = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'pending'",
            rusqlite::params![reason, to_db(now), id],
        )?;
        Ok(n > 0)
    }

    /// Fail every execution left `in_progress` by a previous process.
    pub fn fail_interrupted(&self, now: DateTime<Utc>) -> Result<usize> {
        let n = self.conn().execute(
            "UPDATE executions SET status = 'failed', error = 'interrupted by restart',
                 updated_at = ?1
             WHERE status = 'in_progress'",
            [to_db(now)],
        )?;
        Ok(n)
    }

    /// Store what the user answered during a live session plus the raw payload.
    pub fn record_interaction(
        &self,
        id: &str,
        user_response: &str,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let n = self.conn().execute(
            "UPDATE executions
             SET user_response = ?1, interaction_data = ?2, updated_at = ?3
             WHERE id = ?4",
            rusqlite::params![user_response, payload.to_string(), to_db(now), id],
        )?;
        if n == 0 {
            return Err(SchedulerError::ExecutionNotFound { id: id.to_string() });
        }
        Ok(())
    }

    fn query_executions<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Execution>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, execution_from_row)?
            .filter_map(|r| r.ok().flatten())
            .collect();
        Ok(rows)
    }
}

/// Status and `next_fire` for a job (re)entering the active state.
fn initial_state(
    schedule: &JobSchedule,
    timezone: &str,
    now: DateTime<Utc>,
) -> (JobStatus, Option<DateTime<Utc>>) {
    match first_fire_from(schedule, resolve_zone(timezone), now) {
        NextFire::At(at) => (JobStatus::Active, Some(at)),
        NextFire::Completed => (JobStatus::Completed, None),
        NextFire::Unschedulable => (JobStatus::Active, None),
    }
}

/// Map a `wakeup_jobs` row. Rows that fail to parse are skipped with a warning.
fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Option<ScheduledJob>> {
    let id: String = row.get(0)?;
    let fire_time: String = row.get(4)?;
    let recurrence: String = row.get(5)?;
    let start_date: String = row.get(6)?;
    let end_date: Option<String> = row.get(7)?;
    let contact_method: String = row.get(3)?;
    let status: String = row.get(11)?;

    let parsed = (|| {
        Some(ScheduledJob {
            id: id.clone(),
            owner_id: row.get(1).ok()?,
            contact_address: row.get(2).ok()?,
            contact_method: contact_method.parse().ok()?,
            schedule: JobSchedule {
                fire_time: NaiveTime::parse_from_str(&fire_time, FIRE_TIME_FORMAT).ok()?,
                recurrence: serde_json::from_str(&recurrence).ok()?,
                start_date: start_date.parse::<NaiveDate>().ok()?,
                end_date: match end_date.as_deref() {
                    Some(d) => Some(d.parse::<NaiveDate>().ok()?),
                    None => None,
                },
            },
            include_weather: row.get(8).ok()?,
            weather_location: row.get(9).ok()?,
            custom_text: row.get(10).ok()?,
            status: status.parse().ok()?,
            owner_timezone: row.get(12).ok()?,
            owner_location: row.get(13).ok()?,
            last_fired: row.get::<_, Option<String>>(14).ok()?.as_deref().and_then(from_db),
            next_fire: row.get::<_, Option<String>>(15).ok()?.as_deref().and_then(from_db),
            is_demo: row.get(16).ok()?,
            created_at: from_db(&row.get::<_, String>(17).ok()?)?,
            updated_at: from_db(&row.get::<_, String>(18).ok()?)?,
        })
    })();

    if parsed.is_none() {
        warn!(job_id = %id, "skipping unparseable job row");
    }
    Ok(parsed)
}

/// Map an `executions` row. Rows that fail to parse are skipped with a warning.
fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<Option<Execution>> {
    let id: String = row.get(0)?;
    let status: String = row.get(4)?;
    let weather: Option<String> = row.get(7)?;
    let interaction: Option<String> = row.get(10)?;

    let parsed = (|| {
        Some(Execution {
            id: id.clone(),
            job_id: row.get(1).ok()?,
            scheduled_for: from_db(&row.get::<_, String>(2).ok()?)?,
            executed_at: row.get::<_, Option<String>>(3).ok()?.as_deref().and_then(from_db),
            status: status.parse().ok()?,
            provider_id: row.get(5).ok()?,
            provider_status: row.get(6).ok()?,
            weather: weather.as_deref().and_then(|w| serde_json::from_str(w).ok()),
            error: row.get(8).ok()?,
            user_response: row.get(9).ok()?,
            interaction_data: interaction.as_deref().and_then(|v| serde_json::from_str(v).ok()),
            is_snooze: row.get(11).ok()?,
            created_at: from_db(&row.get::<_, String>(12).ok()?)?,
        })
    })();

    if parsed.is_none() {
        warn!(execution_id = %id, "skipping unparseable execution row");
    }
    Ok(parsed)
}
