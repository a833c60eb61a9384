use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::Display;

use super::savings::CostSavings;
use crate::domain::{Charge, Settings};

/// Weekly need above this multiple of usable capacity calls for fast charging
pub const FAST_CHARGING_RATIO: f64 = 2.0;
/// Weekly need above usable capacity calls for a mix of slow and fast
pub const MIXED_CHARGING_RATIO: f64 = 1.0;
/// A full charge this often keeps the BMS SoC estimate calibrated (days)
pub const CALIBRATION_INTERVAL_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChargingType {
    Slow,
    Fast,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecommendationReason {
    CapacityOverrun,
    CalibrationDue,
    OffPeakSavings,
    SlowSufficient,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingRecommendation {
    pub charging_type: ChargingType,
    pub reason: RecommendationReason,
    /// Weekly need over usable capacity
    pub capacity_ratio: f64,
    /// Days since the last charge to 100%, `None` if there never was one
    pub days_since_full_charge: Option<i64>,
}

/// Pick slow/fast/mixed guidance. Priority: capacity overrun, calibration
/// staleness, off-peak saving opportunity, then slow charging.
pub fn charging_recommendation(
    weekly_kwh: f64,
    settings: &Settings,
    charges: &[Charge],
    savings: &CostSavings,
    today: NaiveDate,
) -> ChargingRecommendation {
    let usable = settings.usable_capacity_kwh();
    let capacity_ratio = if usable > 0.0 { weekly_kwh / usable } else { 0.0 };
    let days_since_full_charge = charges
        .iter()
        .filter(|c| c.final_percentage >= 100.0)
        .map(|c| c.date)
        .max()
        .map(|last| (today - last).num_days());

    let (charging_type, reason) = if capacity_ratio > FAST_CHARGING_RATIO {
        (ChargingType::Fast, RecommendationReason::CapacityOverrun)
    } else if capacity_ratio > MIXED_CHARGING_RATIO {
        (ChargingType::Mixed, RecommendationReason::CapacityOverrun)
    } else if days_since_full_charge.map_or(true, |d| d > CALIBRATION_INTERVAL_DAYS) {
        (ChargingType::Slow, RecommendationReason::CalibrationDue)
    } else if settings.off_peak.enabled && savings.potential_monthly_savings > 0.0 {
        (ChargingType::Slow, RecommendationReason::OffPeakSavings)
    } else {
        (ChargingType::Slow, RecommendationReason::SlowSufficient)
    };

    ChargingRecommendation {
        charging_type,
        reason,
        capacity_ratio,
        days_since_full_charge,
    }
}
