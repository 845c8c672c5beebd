use rusqlite::{Connection, Result};

/// Initialise weather tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_cache_table(conn)?;
    create_api_log_table(conn)?;
    Ok(())
}

/// One row per location key. Refreshes delete the old row and insert a new
/// one inside a transaction; rows are never updated in place.
fn create_cache_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS weather_cache (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            location      TEXT NOT NULL UNIQUE,
            temperature_f REAL,
            condition     TEXT,
            payload       TEXT NOT NULL,   -- raw provider JSON
            fetched_at    TEXT NOT NULL,
            expires_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_weather_cache_expiry
            ON weather_cache(location, expires_at);",
    )
}

fn create_api_log_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS weather_api_log (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            location         TEXT NOT NULL,
            status           TEXT NOT NULL,   -- success | error | rate_limited
            response_data    TEXT,
            error_message    TEXT,
            response_time_ms INTEGER,
            created_at       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_weather_api_log_created
            ON weather_api_log(created_at);",
    )
}
