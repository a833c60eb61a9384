use chrono::{Datelike, FixedOffset, Weekday};
use std::collections::HashMap;

use crate::domain::{local_minute_of_day, TimeWindow, Trip, MINUTES_PER_DAY};

/// Trips needed on a weekday before its driving pattern is trusted
pub const MIN_TRIPS_FOR_PATTERN: usize = 2;
/// Earliest departure to latest arrival must span more than this (min)
pub const MIN_DRIVING_SPAN_MINS: u32 = 60;

/// When the car is typically free to charge, per weekday.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeeklyAvailability {
    busy: HashMap<Weekday, TimeWindow>,
}

impl WeeklyAvailability {
    /// Infer the driving span of each weekday from trip start/end times.
    ///
    /// A weekday with fewer than [`MIN_TRIPS_FOR_PATTERN`] trips, or whose
    /// span is not longer than [`MIN_DRIVING_SPAN_MINS`], is free all day.
    pub fn from_trips(trips: &[Trip], offset: &FixedOffset) -> Self {
        let mut spans: HashMap<Weekday, (usize, u32, u32)> = HashMap::new();
        for trip in trips {
            let (Some(start), Some(end)) = (trip.local_start(offset), trip.local_end(offset))
            else {
                continue;
            };
            let start_mins = local_minute_of_day(&start);
            let end_mins = if end.date_naive() == start.date_naive() {
                local_minute_of_day(&end)
            } else {
                MINUTES_PER_DAY
            };
            let entry = spans
                .entry(start.weekday())
                .or_insert((0, MINUTES_PER_DAY, 0));
            entry.0 += 1;
            entry.1 = entry.1.min(start_mins);
            entry.2 = entry.2.max(end_mins);
        }

        let busy = spans
            .into_iter()
            .filter(|(_, (count, earliest, latest))| {
                *count >= MIN_TRIPS_FOR_PATTERN
                    && latest.saturating_sub(*earliest) > MIN_DRIVING_SPAN_MINS
            })
            .map(|(day, (_, earliest, latest))| (day, TimeWindow::new(earliest, latest)))
            .collect();
        Self { busy }
    }

    /// Free blocks of a weekday: before the first departure and after the
    /// last arrival, or the whole day.
    pub fn free_windows(&self, day: Weekday) -> Vec<TimeWindow> {
        match self.busy.get(&day) {
            None => vec![TimeWindow::FULL_DAY],
            Some(busy) => [
                TimeWindow::new(0, busy.start_mins),
                TimeWindow::new(busy.end_mins, MINUTES_PER_DAY),
            ]
            .into_iter()
            .filter(|w| !w.is_empty())
            .collect(),
        }
    }
}
