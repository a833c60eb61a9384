use chrono::{FixedOffset, Offset, Utc, Weekday};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::charge::ChargerType;
use super::types::{is_weekend, parse_hhmm, TimeWindow};

/// Default home charger current when none is configured (A)
pub const DEFAULT_CHARGER_AMPS: f64 = 16.0;
/// Single-phase mains voltage (V)
pub const DEFAULT_CHARGER_VOLTAGE: f64 = 230.0;

/// Off-peak tariff configuration. Weekday and weekend windows may wrap
/// past midnight (`22:00`-`06:00`).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct OffPeakSettings {
    pub enabled: bool,
    pub weekday_start: String,
    pub weekday_end: String,
    pub weekend_start: String,
    pub weekend_end: String,
    /// Off-peak energy price (per kWh)
    #[validate(range(min = 0.0))]
    pub price_per_kwh: f64,
}

impl Default for OffPeakSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            weekday_start: "00:00".to_string(),
            weekday_end: "08:00".to_string(),
            weekend_start: "00:00".to_string(),
            weekend_end: "24:00".to_string(),
            price_per_kwh: 0.10,
        }
    }
}

impl OffPeakSettings {
    fn bounds(&self, day: Weekday) -> (&str, &str) {
        if is_weekend(day) {
            (&self.weekend_start, &self.weekend_end)
        } else {
            (&self.weekday_start, &self.weekday_end)
        }
    }

    /// In-day off-peak windows for a weekday. Unparseable bounds fall back
    /// to the stock weekday valley `00:00`-`08:00`.
    pub fn windows_for(&self, day: Weekday) -> Vec<TimeWindow> {
        let (start, end) = self.bounds(day);
        match (parse_hhmm(start), parse_hhmm(end)) {
            (Some(s), Some(e)) => TimeWindow::wrapping(s, e),
            _ => vec![TimeWindow::new(0, 8 * 60)],
        }
    }

    /// Length of the weekday off-peak window (hours).
    pub fn weekday_window_hours(&self) -> f64 {
        self.windows_for(Weekday::Mon).iter().map(|w| w.hours()).sum()
    }
}

/// User-pinned charging slot for one weekday.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartChargingPreference {
    pub day: Weekday,
    pub active: bool,
    pub start: String,
    pub end: String,
}

/// Vehicle and tariff configuration. Read-only input to every analytic.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[validate(range(min = 0.0))]
    pub battery_capacity_kwh: f64,
    /// Reported state of health (%)
    #[validate(range(min = 0.0, max = 100.0))]
    pub soh_percent: f64,
    #[serde(default)]
    #[validate(nested)]
    pub off_peak: OffPeakSettings,
    #[serde(default)]
    #[validate(range(min = 1.0, max = 80.0))]
    pub home_charger_amps: Option<f64>,
    #[serde(default = "default_voltage")]
    pub charger_voltage: f64,
    #[serde(default)]
    pub smart_charging_preferences: Vec<SmartChargingPreference>,
    #[serde(default)]
    pub charger_types: Vec<ChargerType>,
    /// Local offset from UTC used to place timestamps on the wall clock
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

fn default_voltage() -> f64 {
    DEFAULT_CHARGER_VOLTAGE
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            battery_capacity_kwh: 60.48,
            soh_percent: 100.0,
            off_peak: OffPeakSettings::default(),
            home_charger_amps: None,
            charger_voltage: DEFAULT_CHARGER_VOLTAGE,
            smart_charging_preferences: Vec::new(),
            charger_types: Vec::new(),
            utc_offset_minutes: 0,
        }
    }
}

impl Settings {
    /// Home charger power (kW) from configured amperage; 16A @ 230V when unset.
    pub fn charge_power_kw(&self) -> f64 {
        let amps = self.home_charger_amps.unwrap_or(DEFAULT_CHARGER_AMPS);
        amps * self.charger_voltage / 1000.0
    }

    /// Capacity available after degradation (kWh).
    pub fn usable_capacity_kwh(&self) -> f64 {
        self.battery_capacity_kwh * self.soh_percent / 100.0
    }

    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Windows in which charging is billed at the cheap rate. With the
    /// off-peak tariff disabled there is no cheaper period, so the whole
    /// day qualifies.
    pub fn tariff_windows(&self, day: Weekday) -> Vec<TimeWindow> {
        if self.off_peak.enabled {
            self.off_peak.windows_for(day)
        } else {
            vec![TimeWindow::FULL_DAY]
        }
    }

    pub fn charger_type(&self, id: &str) -> Option<&ChargerType> {
        self.charger_types.iter().find(|c| c.id == id)
    }
}
