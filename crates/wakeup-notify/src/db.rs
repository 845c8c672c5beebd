use rusqlite::{Connection, Result};

/// Initialise delivery-log tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_notification_log(conn)?;
    create_provider_webhooks(conn)?;
    Ok(())
}

fn create_notification_log(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS notification_log (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id          TEXT,
            execution_id    TEXT,
            kind            TEXT NOT NULL,   -- sms | voice
            to_address      TEXT NOT NULL,
            content         TEXT,
            status          TEXT NOT NULL DEFAULT 'pending',
            provider_id     TEXT,
            provider_status TEXT,
            error_code      TEXT,
            error_message   TEXT,
            is_demo         INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            sent_at         TEXT,
            delivered_at    TEXT
        );
        -- callbacks are matched on provider_id
        CREATE INDEX IF NOT EXISTS idx_notification_log_provider
            ON notification_log(provider_id);
        CREATE INDEX IF NOT EXISTS idx_notification_log_created
            ON notification_log(created_at);",
    )
}

fn create_provider_webhooks(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS provider_webhooks (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            provider_id TEXT NOT NULL,
            event_type  TEXT,
            payload     TEXT NOT NULL,   -- raw callback fields as JSON
            log_id      INTEGER,         -- matched notification_log row
            processed   INTEGER NOT NULL DEFAULT 0,
            received_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_provider_webhooks_provider
            ON provider_webhooks(provider_id);
        CREATE INDEX IF NOT EXISTS idx_provider_webhooks_received
            ON provider_webhooks(received_at);",
    )
}
