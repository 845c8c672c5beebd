//! Timestamp and time-zone helpers shared by every persistence layer.
//!
//! All instants are stored as second-precision RFC 3339 UTC strings
//! (`2024-01-15T12:00:00Z`). Keeping a single format means SQL string
//! comparison orders rows chronologically and the `(job_id, scheduled_for)`
//! uniqueness constraint sees identical text for identical instants.

use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use tracing::warn;

/// Format an instant for storage.
pub fn to_db(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a stored instant. Returns `None` for malformed text.
pub fn from_db(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Drop sub-second precision so an instant round-trips through [`to_db`] unchanged.
pub fn truncate_secs(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.timestamp(), 0).unwrap_or(ts)
}

/// Resolve an IANA zone name, falling back to UTC when it is unknown.
pub fn resolve_zone(name: &str) -> Tz {
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(zone = %name, "unresolvable time zone, using UTC");
            Tz::UTC
        }
    }
}
