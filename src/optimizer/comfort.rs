use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};
use strum::Display;

use crate::domain::Trip;
use crate::stats::{round_to, MonthlyStats};

/// Percentile of arrival SoC treated as the driver's habitual floor
pub const COMFORT_PERCENTILE: usize = 10;
/// Floor above which charging can safely be spaced further apart (%)
pub const EXTEND_INTERVAL_SOC: f64 = 30.0;
/// Months compared against the latest one
pub const SEASONAL_LOOKBACK_MONTHS: usize = 12;
/// Relative efficiency change flagged as seasonal
pub const SEASONAL_DEVIATION_LIMIT: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComfortZone {
    /// 10th percentile of trip-end SoC (%)
    pub min_soc: f64,
    pub can_extend_interval: bool,
}

/// How low the driver usually lets the battery get, `None` without trips.
pub fn calculate_comfort_zone(trips: &[Trip]) -> Option<ComfortZone> {
    let soc: Vec<f64> = trips
        .iter()
        .map(|t| t.soc_end)
        .filter(|s| s.is_finite())
        .collect();
    if soc.is_empty() {
        return None;
    }
    let min_soc = round_to(Data::new(soc).percentile(COMFORT_PERCENTILE), 1);
    Some(ComfortZone {
        min_soc,
        can_extend_interval: min_soc > EXTEND_INTERVAL_SOC,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Season {
    Winter,
    Summer,
}

impl Season {
    /// Season of a `YYYY-MM` month, `None` for spring and autumn.
    pub fn of_month(month: &str) -> Option<Self> {
        let number: u32 = month.split('-').nth(1)?.parse().ok()?;
        match number {
            12 | 1 | 2 => Some(Self::Winter),
            6..=8 => Some(Self::Summer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonalFactor {
    pub month: String,
    pub season: Option<Season>,
    /// Latest month versus the yearly average, in percent
    pub deviation_percent: f64,
    /// Consumption multiplier to apply while the season lasts
    pub factor: f64,
}

/// Compare the latest month's efficiency with the distance-weighted average
/// of the last twelve months. A deviation beyond 5% during winter or summer
/// becomes a multiplier; anything else is 1.0. `None` with fewer than two
/// months.
pub fn calculate_seasonal_factor(monthly: &[MonthlyStats]) -> Option<SeasonalFactor> {
    if monthly.len() < 2 {
        return None;
    }
    let recent = &monthly[monthly.len().saturating_sub(SEASONAL_LOOKBACK_MONTHS)..];
    let latest = recent.last()?;

    let km: f64 = recent.iter().map(|m| m.km).sum();
    let kwh: f64 = recent.iter().map(|m| m.kwh).sum();
    if km <= 0.0 || kwh <= 0.0 || latest.efficiency <= 0.0 {
        return None;
    }
    let yearly = kwh * 100.0 / km;
    let ratio = latest.efficiency / yearly;
    let deviation = ratio - 1.0;
    let season = Season::of_month(&latest.month);

    let factor = if season.is_some() && deviation.abs() > SEASONAL_DEVIATION_LIMIT {
        round_to(ratio, 2)
    } else {
        1.0
    };

    Some(SeasonalFactor {
        month: latest.month.clone(),
        season,
        deviation_percent: round_to(deviation * 100.0, 1),
        factor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn trip(soc_end: f64) -> Trip {
        Trip {
            start_timestamp: 0,
            end_timestamp: 600,
            distance_km: 5.0,
            electricity_kwh: 1.0,
            duration_secs: 600.0,
            soc_start: soc_end + 2.0,
            soc_end,
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            month: "2024-01".to_string(),
        }
    }

    fn month(month: &str, km: f64, kwh: f64) -> MonthlyStats {
        MonthlyStats {
            month: month.to_string(),
            trips: 10,
            km,
            kwh,
            efficiency: kwh * 100.0 / km,
        }
    }

    #[test]
    fn test_comfort_zone() {
        assert_eq!(calculate_comfort_zone(&[]), None);

        let high: Vec<Trip> = (0..20).map(|i| trip(40.0 + i as f64)).collect();
        let zone = calculate_comfort_zone(&high).unwrap();
        assert!(zone.min_soc > 40.0 && zone.min_soc < 45.0);
        assert!(zone.can_extend_interval);

        let low: Vec<Trip> = (0..20).map(|i| trip(10.0 + i as f64)).collect();
        assert!(!calculate_comfort_zone(&low).unwrap().can_extend_interval);
    }

    #[test]
    fn test_winter_deviation_becomes_factor() {
        let monthly = vec![
            month("2023-10", 1000.0, 160.0),
            month("2023-11", 1000.0, 160.0),
            month("2024-01", 1000.0, 200.0),
        ];
        let seasonal = calculate_seasonal_factor(&monthly).unwrap();
        assert_eq!(seasonal.season, Some(Season::Winter));
        // 20 vs 17.33 yearly
        assert_eq!(seasonal.factor, 1.15);
        assert_eq!(seasonal.deviation_percent, 15.4);
    }

    #[test]
    fn test_spring_or_small_deviation_is_neutral() {
        let spring = vec![month("2024-03", 1000.0, 160.0), month("2024-04", 1000.0, 200.0)];
        assert_eq!(calculate_seasonal_factor(&spring).unwrap().factor, 1.0);

        let steady = vec![month("2024-06", 1000.0, 160.0), month("2024-07", 1000.0, 165.0)];
        assert_eq!(calculate_seasonal_factor(&steady).unwrap().factor, 1.0);

        assert_eq!(calculate_seasonal_factor(&steady[..1]), None);
    }
}
