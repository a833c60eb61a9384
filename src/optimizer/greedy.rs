use chrono::Weekday;

use super::types::WindowSource;
use crate::domain::{TimeWindow, MINUTES_PER_DAY};

/// Bonus for a window that extends an already selected one
pub const CONTIGUITY_BONUS: f64 = 50.0;
/// Gap still considered "touching" for the contiguity bonus (min)
pub const CONTIGUITY_TOLERANCE_MINS: u32 = 5;
/// Largest gap around midnight the continuity pass will close (min)
pub const MIDNIGHT_BRIDGE_MINS: u32 = 120;

/// Scored charging slot competing for a place in the plan
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub day: Weekday,
    pub window: TimeWindow,
    pub tariff_limit: Option<TimeWindow>,
    pub score: f64,
    pub source: WindowSource,
}

impl Candidate {
    fn clashes_with(&self, other: &Candidate) -> bool {
        self.day == other.day && self.window.overlaps(&other.window)
    }

    /// Whether the two windows meet end-to-start, on the same day or across
    /// midnight into the following day.
    fn abuts(&self, other: &Candidate) -> bool {
        let near = |a: u32, b: u32| a.abs_diff(b) <= CONTIGUITY_TOLERANCE_MINS;
        let tail = MINUTES_PER_DAY - CONTIGUITY_TOLERANCE_MINS;

        if self.day == other.day {
            return near(self.window.start_mins, other.window.end_mins)
                || near(other.window.start_mins, self.window.end_mins);
        }
        (other.day.succ() == self.day
            && other.window.end_mins >= tail
            && self.window.start_mins <= CONTIGUITY_TOLERANCE_MINS)
            || (self.day.succ() == other.day
                && self.window.end_mins >= tail
                && other.window.start_mins <= CONTIGUITY_TOLERANCE_MINS)
    }
}

/// Greedy anchored selection.
///
/// Repeatedly takes the candidate with the highest score plus contiguity
/// bonus that does not overlap anything already taken, until the selected
/// windows add up to `required_hours` or nothing fits. Ties go to the
/// earlier candidate.
pub fn select_windows(candidates: Vec<Candidate>, required_hours: f64) -> Vec<Candidate> {
    let mut remaining = candidates;
    let mut selected: Vec<Candidate> = Vec::new();
    let mut hours = 0.0;

    while hours < required_hours {
        remaining.retain(|c| !selected.iter().any(|s| s.clashes_with(c)));

        let mut best: Option<(usize, f64)> = None;
        for (idx, candidate) in remaining.iter().enumerate() {
            let bonus = if selected.iter().any(|s| candidate.abuts(s)) {
                CONTIGUITY_BONUS
            } else {
                0.0
            };
            let total = candidate.score + bonus;
            if best.map_or(true, |(_, b)| total > b) {
                best = Some((idx, total));
            }
        }

        let Some((idx, _)) = best else {
            break;
        };
        let pick = remaining.remove(idx);
        hours += pick.window.hours();
        selected.push(pick);
    }
    selected
}

/// Close small gaps across midnight so an evening window and the next
/// morning's window become one continuous session meeting at 24:00/00:00.
pub fn bridge_midnight_gaps(selected: &mut [Candidate]) {
    for i in 0..selected.len() {
        for j in 0..selected.len() {
            if i == j || selected[i].day.succ() != selected[j].day {
                continue;
            }
            let evening = selected[i].window;
            let morning = selected[j].window;
            let gap = (MINUTES_PER_DAY - evening.end_mins) + morning.start_mins;
            if gap == 0 || gap > MIDNIGHT_BRIDGE_MINS {
                continue;
            }

            let extended_evening = TimeWindow::new(evening.start_mins, MINUTES_PER_DAY);
            let extended_morning = TimeWindow::new(0, morning.end_mins);
            let blocked = selected.iter().enumerate().any(|(k, other)| {
                (k != i && other.day == selected[i].day && other.window.overlaps(&extended_evening))
                    || (k != j
                        && other.day == selected[j].day
                        && other.window.overlaps(&extended_morning))
            });
            if blocked {
                continue;
            }

            selected[i].window = extended_evening;
            selected[j].window = extended_morning;
        }
    }
}
