use rusqlite::Connection;

use crate::error::Result;

/// Initialise the job and execution tables in `conn` (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS wakeup_jobs (
            id               TEXT    NOT NULL PRIMARY KEY,
            owner_id         TEXT    NOT NULL,
            contact_address  TEXT    NOT NULL,
            contact_method   TEXT    NOT NULL,   -- voice | sms
            fire_time        TEXT    NOT NULL,   -- local HH:MM:SS
            recurrence       TEXT    NOT NULL,   -- JSON-encoded Recurrence enum
            start_date       TEXT    NOT NULL,
            end_date         TEXT,
            include_weather  INTEGER NOT NULL DEFAULT 0,
            weather_location TEXT,
            custom_text      TEXT,
            status           TEXT    NOT NULL DEFAULT 'active',
            owner_timezone   TEXT    NOT NULL DEFAULT 'UTC',
            owner_location   TEXT,
            last_fired       TEXT,
            next_fire        TEXT,               -- UTC, NULL unless active
            is_demo          INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL
        ) STRICT;

        -- Tick selection: WHERE status = 'active' AND next_fire BETWEEN ? AND ?
        CREATE INDEX IF NOT EXISTS idx_wakeup_jobs_due ON wakeup_jobs (status, next_fire);
        CREATE INDEX IF NOT EXISTS idx_wakeup_jobs_owner ON wakeup_jobs (owner_id);

        CREATE TABLE IF NOT EXISTS executions (
            id               TEXT    NOT NULL PRIMARY KEY,
            job_id           TEXT    NOT NULL REFERENCES wakeup_jobs(id),
            scheduled_for    TEXT    NOT NULL,
            executed_at      TEXT,
            status           TEXT    NOT NULL DEFAULT 'pending',
            provider_id      TEXT,
            provider_status  TEXT,
            weather          TEXT,               -- JSON WeatherSnapshot
            error            TEXT,
            user_response    TEXT,
            interaction_data TEXT,               -- raw JSON payload
            is_snooze        INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL,
            -- the claim: one execution per job and instant
            UNIQUE (job_id, scheduled_for)
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_executions_status ON executions (status);
        CREATE INDEX IF NOT EXISTS idx_executions_provider ON executions (provider_id);
        ",
    )?;
    Ok(())
}
