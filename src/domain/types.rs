use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Minute-of-day helpers
// ============================================================================

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Parse an `HH:MM` string into minutes after midnight.
///
/// `24:00` is accepted and maps to [`MINUTES_PER_DAY`] so that a window can
/// end exactly at midnight.
pub fn parse_hhmm(value: &str) -> Option<u32> {
    let (h, m) = value.trim().split_once(':')?;
    let hours: u32 = h.parse().ok()?;
    let minutes: u32 = m.parse().ok()?;
    if hours > 24 || minutes >= 60 {
        return None;
    }
    let total = hours * 60 + minutes;
    (total <= MINUTES_PER_DAY).then_some(total)
}

/// Format minutes after midnight as `HH:MM` (1440 renders as `24:00`).
pub fn format_hhmm(minutes: u32) -> String {
    let minutes = minutes.min(MINUTES_PER_DAY);
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Minutes after midnight for a wall-clock time.
pub fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// Minutes after local midnight for a timestamp.
pub fn local_minute_of_day(ts: &DateTime<FixedOffset>) -> u32 {
    ts.hour() * 60 + ts.minute()
}

/// Half-open interval `[start_mins, end_mins)` inside a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    pub start_mins: u32,
    pub end_mins: u32,
}

impl TimeWindow {
    pub const FULL_DAY: TimeWindow = TimeWindow {
        start_mins: 0,
        end_mins: MINUTES_PER_DAY,
    };

    pub fn new(start_mins: u32, end_mins: u32) -> Self {
        Self {
            start_mins: start_mins.min(MINUTES_PER_DAY),
            end_mins: end_mins.min(MINUTES_PER_DAY),
        }
    }

    pub fn duration_mins(&self) -> u32 {
        self.end_mins.saturating_sub(self.start_mins)
    }

    pub fn hours(&self) -> f64 {
        self.duration_mins() as f64 / 60.0
    }

    pub fn is_empty(&self) -> bool {
        self.duration_mins() == 0
    }

    /// Overlapping part of two windows, `None` when they do not overlap.
    pub fn intersect(&self, other: &TimeWindow) -> Option<TimeWindow> {
        let start = self.start_mins.max(other.start_mins);
        let end = self.end_mins.min(other.end_mins);
        (end > start).then(|| TimeWindow::new(start, end))
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.intersect(other).is_some()
    }

    /// Split a possibly overnight `start..end` pair into in-day windows.
    ///
    /// `22:00-06:00` becomes `[00:00, 06:00)` and `[22:00, 24:00)`; equal
    /// bounds mean the whole day.
    pub fn wrapping(start_mins: u32, end_mins: u32) -> Vec<TimeWindow> {
        if start_mins == end_mins || (start_mins == 0 && end_mins >= MINUTES_PER_DAY) {
            return vec![TimeWindow::FULL_DAY];
        }
        if end_mins > start_mins {
            return vec![TimeWindow::new(start_mins, end_mins)];
        }
        let mut out = Vec::with_capacity(2);
        if end_mins > 0 {
            out.push(TimeWindow::new(0, end_mins));
        }
        if start_mins < MINUTES_PER_DAY {
            out.push(TimeWindow::new(start_mins, MINUTES_PER_DAY));
        }
        out
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            format_hhmm(self.start_mins),
            format_hhmm(self.end_mins)
        )
    }
}

// ============================================================================
// Weekday helpers
// ============================================================================

pub fn is_weekend(day: Weekday) -> bool {
    matches!(day, Weekday::Sat | Weekday::Sun)
}

/// Position of a weekday in the published weekly plan: Saturday first,
/// then Sunday, then Monday through Friday.
pub fn plan_order(day: Weekday) -> u32 {
    (day.num_days_from_monday() + 2) % 7
}

/// Local weekday of a timestamp.
pub fn local_weekday(ts: &DateTime<FixedOffset>) -> Weekday {
    ts.weekday()
}
