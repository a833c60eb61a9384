use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Charge, Settings};
use crate::stats::round_to;

/// Days in the savings projection
pub const DAYS_PER_MONTH: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostSavings {
    /// Projected monthly saving from moving home charging to the off-peak tariff
    pub potential_monthly_savings: f64,
    /// Whether the charger can cover the daily need inside the off-peak window
    pub feasible_in_off_peak: bool,
    /// Daily energy that does not fit the off-peak window (kWh)
    pub deficit_kwh: f64,
    pub off_peak_window_hours: f64,
}

impl CostSavings {
    fn none() -> Self {
        Self {
            potential_monthly_savings: 0.0,
            feasible_in_off_peak: true,
            deficit_kwh: 0.0,
            off_peak_window_hours: 0.0,
        }
    }
}

/// Energy-weighted average price actually paid (per kWh).
fn average_price(charges: &[Charge]) -> Option<f64> {
    let kwh: f64 = charges.iter().map(|c| c.kwh_charged.max(0.0)).sum();
    (kwh > 0.0).then(|| {
        charges
            .iter()
            .map(|c| c.price_per_kwh * c.kwh_charged.max(0.0))
            .sum::<f64>()
            / kwh
    })
}

/// Average energy charged per calendar day over the charging history.
fn average_daily_kwh(charges: &[Charge]) -> f64 {
    let (Some(first), Some(last)) = (
        charges.iter().map(|c| c.date).min(),
        charges.iter().map(|c| c.date).max(),
    ) else {
        return 0.0;
    };
    let span_days = ((last - first).num_days() + 1).max(1) as f64;
    charges.iter().map(|c| c.kwh_charged.max(0.0)).sum::<f64>() / span_days
}

/// Monthly saving from shifting charges into the off-peak tariff, with a
/// check that the home charger can deliver the daily need inside the window.
pub fn calculate_cost_savings(charges: &[Charge], settings: &Settings) -> CostSavings {
    if !settings.off_peak.enabled {
        return CostSavings::none();
    }

    let window_hours = settings.off_peak.weekday_window_hours();
    let window_kwh = settings.charge_power_kw() * window_hours;
    let daily_kwh = average_daily_kwh(charges);
    let shiftable_kwh = daily_kwh.min(window_kwh);

    let price_gap = average_price(charges)
        .map(|avg| (avg - settings.off_peak.price_per_kwh).max(0.0))
        .unwrap_or(0.0);
    let savings = round_to(price_gap * shiftable_kwh * DAYS_PER_MONTH, 2);
    debug!(daily_kwh, window_kwh, price_gap, savings, "Off-peak savings estimated");

    CostSavings {
        potential_monthly_savings: savings,
        feasible_in_off_peak: window_kwh >= daily_kwh,
        deficit_kwh: round_to((daily_kwh - window_kwh).max(0.0), 2),
        off_peak_window_hours: window_hours,
    }
}
