use chrono::Weekday;
use serde::{Deserialize, Serialize};

use crate::domain::{format_hhmm, TimeWindow};

/// Where a planned window came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSource {
    /// Parking stay predicted by the departure oracle
    Predicted,
    /// Pinned by the user in the smart-charging preferences
    UserPreference,
    /// Static plan used when no oracle is available
    Fallback,
}

/// Why a plan is incomplete or degraded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanNote {
    InsufficientTime,
    AiMissing,
}

/// Recommended charging slot inside one weekday.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingWindow {
    pub day: Weekday,
    pub start_mins: u32,
    pub end_mins: u32,
    /// `HH:MM`
    pub start: String,
    /// `HH:MM`, `24:00` when the window runs to midnight
    pub end: String,
    /// Off-peak period the window was cut from
    pub tariff_limit: Option<TimeWindow>,
    pub source: WindowSource,
}

impl ChargingWindow {
    pub fn new(
        day: Weekday,
        window: TimeWindow,
        tariff_limit: Option<TimeWindow>,
        source: WindowSource,
    ) -> Self {
        Self {
            day,
            start_mins: window.start_mins,
            end_mins: window.end_mins,
            start: format_hhmm(window.start_mins),
            end: format_hhmm(window.end_mins),
            tariff_limit,
            source,
        }
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start_mins, self.end_mins)
    }

    pub fn hours(&self) -> f64 {
        self.window().hours()
    }
}

/// Weekly charging plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartChargingPlan {
    /// Saturday first, then Sunday, then Monday to Friday; by start time within a day
    pub windows: Vec<ChargingWindow>,
    /// Projected weekly need including the safety buffer (kWh)
    pub weekly_kwh: f64,
    pub required_hours: f64,
    pub hours_found: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<PlanNote>,
}
