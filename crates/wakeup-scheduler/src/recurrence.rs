//! Recurrence math: which local dates a job fires on and the UTC instant of
//! its next occurrence.
//!
//! Everything here is a pure function of the schedule, the owner's zone and a
//! reference instant, so recomputing with the same inputs always yields the
//! same answer.

use chrono::{DateTime, Datelike, Days, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::types::{JobSchedule, Recurrence};

/// Longest forward scan for weekday-set recurrences.
const SCAN_DAYS: u64 = 7;

/// Result of a next-occurrence computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextFire {
    At(DateTime<Utc>),
    /// No further occurrence: one-shot already used or end date passed.
    Completed,
    /// Pattern matched no date in the scan window.
    Unschedulable,
}

/// Whether the job fires on `date` (a local date in the owner's zone).
pub fn should_fire_on(schedule: &JobSchedule, date: NaiveDate) -> bool {
    if date < schedule.start_date {
        return false;
    }
    if schedule.end_date.is_some_and(|end| date > end) {
        return false;
    }
    matches_pattern(schedule, date)
}

fn matches_pattern(schedule: &JobSchedule, date: NaiveDate) -> bool {
    match &schedule.recurrence {
        Recurrence::Once => date == schedule.start_date,
        Recurrence::Daily => true,
        Recurrence::Weekly => (date - schedule.start_date).num_days().rem_euclid(7) == 0,
        Recurrence::Weekdays => date.weekday().number_from_monday() <= 5,
        Recurrence::Weekends => date.weekday().number_from_monday() >= 6,
        Recurrence::Custom { days } => days.contains(date.weekday()),
    }
}

/// Convert a local date and wall-clock time to UTC.
///
/// A time inside a DST gap moves forward one hour; an ambiguous time (DST
/// fall-back) takes the earlier instant.
pub fn local_instant(date: NaiveDate, time: NaiveTime, tz: Tz) -> Option<DateTime<Utc>> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
    }
}

/// First occurrence strictly after `from`.
///
/// Used whenever a schedule is (re)established: creation, reactivation,
/// schedule edits, owner zone changes and stale recovery.
pub fn first_fire_from(schedule: &JobSchedule, tz: Tz, from: DateTime<Utc>) -> NextFire {
    if schedule.recurrence == Recurrence::Once {
        return match local_instant(schedule.start_date, schedule.fire_time, tz) {
            Some(at) if at > from => NextFire::At(at),
            _ => NextFire::Completed,
        };
    }

    let today = from.with_timezone(&tz).date_naive();
    let mut date = today.max(schedule.start_date);
    // Today plus a full week, so a weekly slot whose time already passed today
    // is still found seven days later.
    for _ in 0..=SCAN_DAYS {
        if schedule.end_date.is_some_and(|end| date > end) {
            return NextFire::Completed;
        }
        if matches_pattern(schedule, date) {
            if let Some(at) = local_instant(date, schedule.fire_time, tz) {
                if at > from {
                    return NextFire::At(at);
                }
            }
        }
        date = match date.checked_add_days(Days::new(1)) {
            Some(d) => d,
            None => break,
        };
    }

    warn!(recurrence = ?schedule.recurrence, "no matching date within scan window");
    NextFire::Unschedulable
}

/// Occurrence following the one at `fired`.
///
/// Daily and weekly schedules jump straight to the next local date; weekday
/// sets scan the following seven days.
pub fn next_fire_after(schedule: &JobSchedule, tz: Tz, fired: DateTime<Utc>) -> NextFire {
    let fired_date = fired.with_timezone(&tz).date_naive();

    let candidate = match &schedule.recurrence {
        Recurrence::Once => return NextFire::Completed,
        Recurrence::Daily => fired_date.checked_add_days(Days::new(1)),
        Recurrence::Weekly => fired_date.checked_add_days(Days::new(7)),
        Recurrence::Weekdays | Recurrence::Weekends | Recurrence::Custom { .. } => (1..=SCAN_DAYS)
            .filter_map(|n| fired_date.checked_add_days(Days::new(n)))
            .find(|d| matches_pattern(schedule, *d)),
    };

    let Some(date) = candidate else {
        warn!(recurrence = ?schedule.recurrence, "no matching date within scan window");
        return NextFire::Unschedulable;
    };
    if schedule.end_date.is_some_and(|end| date > end) {
        return NextFire::Completed;
    }
    match local_instant(date, schedule.fire_time, tz) {
        Some(at) => NextFire::At(at),
        None => NextFire::Unschedulable,
    }
}
