//! Trip Statistics Aggregation
//!
//! Rolls raw trips up into the summary, monthly and daily breakdowns that the
//! predictors, scheduler advice and health rules consume.

use chrono::NaiveDate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::Trip;

/// Width of one efficiency histogram bucket (kWh/100km)
pub const EFFICIENCY_BUCKET_WIDTH: f64 = 2.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_trips: usize,
    pub total_km: f64,
    pub total_kwh: f64,
    /// Distance-weighted average consumption (kWh/100km)
    pub avg_efficiency: f64,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    /// Inclusive calendar span of the history, at least one day
    pub span_days: i64,
    pub avg_km_per_day: f64,
    pub avg_kwh_per_day: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyStats {
    /// `YYYY-MM`
    pub month: String,
    pub trips: usize,
    pub km: f64,
    pub kwh: f64,
    pub efficiency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    pub date: NaiveDate,
    pub trips: usize,
    pub km: f64,
    pub kwh: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EfficiencyBucket {
    /// Lower bound of the bucket (kWh/100km)
    pub from: f64,
    pub to: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedData {
    pub summary: Summary,
    /// Chronological
    pub monthly: Vec<MonthlyStats>,
    /// Chronological
    pub daily: Vec<DailyStats>,
    pub efficiency_distribution: Vec<EfficiencyBucket>,
}

/// Round to `decimals` places for presentation.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn efficiency(kwh: f64, km: f64) -> f64 {
    if km > 0.0 {
        kwh * 100.0 / km
    } else {
        0.0
    }
}

/// Aggregate a trip history.
pub fn process_trips(trips: &[Trip]) -> ProcessedData {
    if trips.is_empty() {
        return ProcessedData::default();
    }

    let total_km: f64 = trips.iter().map(|t| t.distance_km).sum();
    let total_kwh: f64 = trips.iter().map(|t| t.electricity_kwh).sum();
    let first_date = trips.iter().map(|t| t.date).min();
    let last_date = trips.iter().map(|t| t.date).max();
    let span_days = match (first_date, last_date) {
        (Some(first), Some(last)) => ((last - first).num_days() + 1).max(1),
        _ => 1,
    };

    let summary = Summary {
        total_trips: trips.len(),
        total_km,
        total_kwh,
        avg_efficiency: efficiency(total_kwh, total_km),
        first_date,
        last_date,
        span_days,
        avg_km_per_day: total_km / span_days as f64,
        avg_kwh_per_day: total_kwh / span_days as f64,
    };

    let mut monthly: BTreeMap<&str, (usize, f64, f64)> = BTreeMap::new();
    for trip in trips {
        let entry = monthly.entry(trip.month.as_str()).or_default();
        entry.0 += 1;
        entry.1 += trip.distance_km;
        entry.2 += trip.electricity_kwh;
    }
    let monthly = monthly
        .into_iter()
        .map(|(month, (trips, km, kwh))| MonthlyStats {
            month: month.to_string(),
            trips,
            km,
            kwh,
            efficiency: efficiency(kwh, km),
        })
        .collect();

    let daily = trips
        .iter()
        .into_group_map_by(|t| t.date)
        .into_iter()
        .sorted_by_key(|(date, _)| *date)
        .map(|(date, day)| DailyStats {
            date,
            trips: day.len(),
            km: day.iter().map(|t| t.distance_km).sum(),
            kwh: day.iter().map(|t| t.electricity_kwh).sum(),
        })
        .collect();

    let efficiency_distribution = trips
        .iter()
        .filter_map(|t| t.efficiency())
        .filter(|e| e.is_finite())
        .map(|e| (e / EFFICIENCY_BUCKET_WIDTH).floor() as i64)
        .counts()
        .into_iter()
        .sorted()
        .map(|(bucket, count)| EfficiencyBucket {
            from: bucket as f64 * EFFICIENCY_BUCKET_WIDTH,
            to: (bucket + 1) as f64 * EFFICIENCY_BUCKET_WIDTH,
            count,
        })
        .collect();

    ProcessedData {
        summary,
        monthly,
        daily,
        efficiency_distribution,
    }
}
