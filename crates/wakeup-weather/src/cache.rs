use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, error, info, warn};
use wakeup_core::time::{from_db, to_db, truncate_secs};

use crate::error::Result;
use crate::provider::WeatherProvider;
use crate::types::{ApiLogEntry, ApiLogStatus, WeatherSnapshot};

/// Read-through weather cache keyed by location string.
///
/// The SQLite connection is shared with the rest of the process; the lock is
/// only held for individual statements and never across the provider call.
pub struct WeatherCache {
    db: Arc<Mutex<Connection>>,
    provider: Option<Arc<dyn WeatherProvider>>,
    ttl: Duration,
}

impl WeatherCache {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        provider: Option<Arc<dyn WeatherProvider>>,
        ttl_secs: i64,
    ) -> Self {
        Self {
            db,
            provider,
            ttl: Duration::seconds(ttl_secs.max(1)),
        }
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Return a live snapshot for `location`, fetching when the cache is cold,
    /// expired, or `force_refresh` is set. Any failure yields `None`.
    pub async fn get(&self, location: &str, force_refresh: bool) -> Option<WeatherSnapshot> {
        let key = location.trim();
        if key.is_empty() {
            return None;
        }
        let now = Utc::now();

        if !force_refresh {
            match self.cached(key, now) {
                Ok(Some(hit)) => {
                    debug!(location = %key, "weather cache hit");
                    return Some(hit);
                }
                Ok(None) => {}
                Err(e) => warn!(location = %key, error = %e, "weather cache read failed"),
            }
        }

        let Some(provider) = self.provider.as_ref() else {
            error!(location = %key, "weather lookup requested but no provider is configured");
            return None;
        };

        let started = Instant::now();
        let outcome = provider.fetch_current(key).await;
        let elapsed_ms = started.elapsed().as_millis() as i64;

        match outcome {
            Ok(report) => {
                self.log_attempt(key, ApiLogStatus::Success, Some(&report.raw), None, elapsed_ms);
                let fetched_at = truncate_secs(Utc::now());
                let snapshot = WeatherSnapshot {
                    location: key.to_string(),
                    temperature_f: report.temperature_f,
                    condition: report.condition,
                    raw: report.raw,
                    fetched_at,
                    expires_at: fetched_at + self.ttl,
                };
                if let Err(e) = self.store(&snapshot) {
                    warn!(location = %key, error = %e, "failed to store weather snapshot");
                }
                info!(
                    location = %key,
                    provider = provider.name(),
                    elapsed_ms,
                    "weather refreshed"
                );
                Some(snapshot)
            }
            Err(e) => {
                let message = e.to_string();
                self.log_attempt(key, e.log_status(), None, Some(&message), elapsed_ms);
                warn!(location = %key, error = %message, "weather fetch failed");
                None
            }
        }
    }

    fn cached(&self, location: &str, now: DateTime<Utc>) -> Result<Option<WeatherSnapshot>> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let row = db
            .query_row(
                "SELECT temperature_f, condition, payload, fetched_at, expires_at
                 FROM weather_cache WHERE location = ?1",
                [location],
                |row| {
                    Ok((
                        row.get::<_, Option<f64>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((temperature_f, condition, payload, fetched_at, expires_at)) = row else {
            return Ok(None);
        };
        let (Some(fetched_at), Some(expires_at)) = (from_db(&fetched_at), from_db(&expires_at))
        else {
            return Ok(None);
        };
        let snapshot = WeatherSnapshot {
            location: location.to_string(),
            temperature_f,
            condition,
            raw: serde_json::from_str(&payload)?,
            fetched_at,
            expires_at,
        };
        Ok(snapshot.is_live(now).then_some(snapshot))
    }

    /// Replace the location's row; the old snapshot is removed first so a
    /// location never has more than one entry.
    fn store(&self, snapshot: &WeatherSnapshot) -> Result<()> {
        let payload = serde_json::to_string(&snapshot.raw)?;
        let mut db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let tx = db.transaction()?;
        tx.execute(
            "DELETE FROM weather_cache WHERE location = ?1",
            [&snapshot.location],
        )?;
        tx.execute(
            "INSERT INTO weather_cache
             (location, temperature_f, condition, payload, fetched_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                snapshot.location,
                snapshot.temperature_f,
                snapshot.condition,
                payload,
                to_db(snapshot.fetched_at),
                to_db(snapshot.expires_at),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn log_attempt(
        &self,
        location: &str,
        status: ApiLogStatus,
        response: Option<&serde_json::Value>,
        error_message: Option<&str>,
        elapsed_ms: i64,
    ) {
        let response = response.map(|v| v.to_string());
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = db.execute(
            "INSERT INTO weather_api_log
             (location, status, response_data, error_message, response_time_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                location,
                status.to_string(),
                response,
                error_message,
                elapsed_ms,
                to_db(Utc::now()),
            ],
        ) {
            warn!(%location, error = %e, "failed to write weather api log");
        }
    }

    /// Delete snapshots that have already expired.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let n = db.execute(
            "DELETE FROM weather_cache WHERE expires_at <= ?1",
            [to_db(now)],
        )?;
        Ok(n)
    }

    /// Delete API log rows created before `cutoff`.
    pub fn prune_api_log(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let n = db.execute(
            "DELETE FROM weather_api_log WHERE created_at < ?1",
            [to_db(cutoff)],
        )?;
        Ok(n)
    }

    /// Most recent provider calls, newest first.
    pub fn recent_api_log(&self, limit: usize) -> Result<Vec<ApiLogEntry>> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = db.prepare(
            "SELECT location, status, error_message, response_time_ms, created_at
             FROM weather_api_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .filter_map(|r| {
                let (location, status, error_message, response_time_ms, created_at) = r.ok()?;
                Some(ApiLogEntry {
                    location,
                    status: status.parse().ok()?,
                    error_message,
                    response_time_ms,
                    created_at,
                })
            })
            .collect();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::error::WeatherError;
    use crate::types::WeatherReport;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted provider: answers with a fixed temperature or a 429.
    struct FakeProvider {
        calls: AtomicUsize,
        rate_limited: bool,
        temperature_f: f64,
    }

    impl FakeProvider {
        fn ok(temperature_f: f64) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                rate_limited: false,
                temperature_f,
            })
        }

        fn rate_limited() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                rate_limited: true,
                temperature_f: 0.0,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WeatherProvider for FakeProvider {
        fn name(&self) -> &str {
            "fake"
        }

        async fn fetch_current(&self, _location: &str) -> std::result::Result<WeatherReport, WeatherError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.rate_limited {
                return Err(WeatherError::RateLimited);
            }
            Ok(WeatherReport {
                temperature_f: Some(self.temperature_f),
                condition: Some("Sunny".into()),
                raw: serde_json::json!({"current": {"temp_f": self.temperature_f}}),
            })
        }
    }

    fn db() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        Arc::new(Mutex::new(conn))
    }

    fn row_count(db: &Arc<Mutex<Connection>>, table: &str) -> i64 {
        db.lock()
            .unwrap()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    fn insert_expired(db: &Arc<Mutex<Connection>>, location: &str) {
        let past = Utc::now() - Duration::hours(2);
        db.lock()
            .unwrap()
            .execute(
                "INSERT INTO weather_cache
                 (location, temperature_f, condition, payload, fetched_at, expires_at)
                 VALUES (?1, 10.0, 'Old', '{}', ?2, ?3)",
                rusqlite::params![location, to_db(past), to_db(past + Duration::hours(1))],
            )
            .unwrap();
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let db = db();
        let provider = FakeProvider::ok(55.0);
        let cache = WeatherCache::new(db.clone(), Some(provider.clone()), 3600);

        let first = cache.get("10001", false).await.expect("fetched");
        let second = cache.get("10001", false).await.expect("cached");

        assert_eq!(provider.calls(), 1);
        assert_eq!(first, second);
        assert_eq!(second.expires_at - second.fetched_at, Duration::hours(1));
        assert_eq!(row_count(&db, "weather_api_log"), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_replaced_not_duplicated() {
        let db = db();
        insert_expired(&db, "10001");
        let provider = FakeProvider::ok(61.0);
        let cache = WeatherCache::new(db.clone(), Some(provider.clone()), 3600);

        let snap = cache.get("10001", false).await.expect("refreshed");
        assert_eq!(provider.calls(), 1);
        assert_eq!(snap.temperature_f, Some(61.0));
        assert_eq!(row_count(&db, "weather_cache"), 1);
    }

    #[tokio::test]
    async fn force_refresh_bypasses_live_entry() {
        let db = db();
        let provider = FakeProvider::ok(40.0);
        let cache = WeatherCache::new(db.clone(), Some(provider.clone()), 3600);

        cache.get("Boston", false).await.expect("first");
        cache.get("Boston", true).await.expect("forced");
        assert_eq!(provider.calls(), 2);
        assert_eq!(row_count(&db, "weather_cache"), 1);
    }

    #[tokio::test]
    async fn rate_limit_yields_none_and_is_logged() {
        let db = db();
        let cache = WeatherCache::new(db.clone(), Some(FakeProvider::rate_limited()), 3600);

        assert!(cache.get("10001", false).await.is_none());
        let log = cache.recent_api_log(10).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, ApiLogStatus::RateLimited);
        assert!(log[0].error_message.is_some());
        assert_eq!(row_count(&db, "weather_cache"), 0);
    }

    #[tokio::test]
    async fn missing_provider_or_location_yields_none() {
        let db = db();
        let cache = WeatherCache::new(db.clone(), None, 3600);
        assert!(cache.get("10001", false).await.is_none());

        let provider = FakeProvider::ok(50.0);
        let cache = WeatherCache::new(db, Some(provider.clone()), 3600);
        assert!(cache.get("   ", false).await.is_none());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn purge_removes_only_expired_rows() {
        let db = db();
        insert_expired(&db, "old");
        let cache = WeatherCache::new(db.clone(), Some(FakeProvider::ok(70.0)), 3600);
        cache.get("fresh", false).await.expect("fetched");

        assert_eq!(cache.purge_expired(Utc::now()).unwrap(), 1);
        assert_eq!(row_count(&db, "weather_cache"), 1);

        assert_eq!(cache.prune_api_log(Utc::now() + Duration::days(1)).unwrap(), 1);
        assert_eq!(row_count(&db, "weather_api_log"), 0);
    }
}
