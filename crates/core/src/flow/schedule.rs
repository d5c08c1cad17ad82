//! # Task Scheduling
//!
//! Pure date math for placing sprint tasks on the calendar. Weeks are
//! anchored to the day finalization runs: week N starts at UTC midnight of
//! `anchor + (N-1) * 7 days`, and a task is due `timeline_days` (fractional
//! allowed) after its week starts.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

/// Start and due timestamps for one scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledWindow {
    pub start: DateTime<Utc>,
    pub due: DateTime<Utc>,
}

/// The calendar day week 1 starts on. When the caller has already spent
/// today (finalization late in the day), planning starts tomorrow.
pub fn anchor_date(base: DateTime<Utc>, today_already_used: bool) -> NaiveDate {
    let date = base.date_naive();
    if today_already_used {
        date + Duration::days(1)
    } else {
        date
    }
}

/// UTC midnight opening the given 1-based week
pub fn week_start(anchor: NaiveDate, week: u32) -> DateTime<Utc> {
    let offset = i64::from(week.saturating_sub(1)) * 7;
    (anchor + Duration::days(offset))
        .and_time(NaiveTime::MIN)
        .and_utc()
}

/// Window for a task in the given week lasting `timeline_days`.
/// Fractional days resolve to millisecond precision.
pub fn schedule_for_week(
    base: DateTime<Utc>,
    today_already_used: bool,
    week: u32,
    timeline_days: f64,
) -> ScheduledWindow {
    let start = week_start(anchor_date(base, today_already_used), week);
    let millis = (timeline_days * 86_400_000.0).round() as i64;
    ScheduledWindow {
        start,
        due: start + Duration::milliseconds(millis),
    }
}

/// Row key for a scheduled task: project key plus the shared counter
pub fn task_key(project_key: &str, counter: i64) -> String {
    format!("{}-SP-{}", project_key, counter)
}
