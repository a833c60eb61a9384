//! # Vehicle Health Monitor
//!
//! Rule-based diagnostics over the trip and charging history. Each rule is
//! independent and any subset may fire:
//! - Battery degradation from the reported state of health
//! - Phantom drain while parked
//! - Charging losses above what the charger type explains
//! - Consumption drift on recent trips (tire pressure, brakes)
//!
//! Checks are pure; acknowledging or dismissing anomalies is up to the caller.

use chrono::{FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{minute_of_day, Anomaly, AnomalyType, Charge, Settings, Severity, Trip};
use crate::stats::{round_to, ProcessedData};

/// Health rule thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Reported SoH below this is critical (%)
    pub soh_critical_percent: f64,
    /// Reported SoH below this is a warning (%)
    pub soh_warning_percent: f64,

    /// Parking gaps shorter than this are ignored for drain (hours)
    pub drain_min_gap_hours: f64,
    /// SoC loss per 24h parked that is flagged (%)
    pub drain_info_rate: f64,
    pub drain_warning_rate: f64,

    /// Most recent sessions inspected for charging losses
    pub charging_recent_sessions: usize,
    /// Below this a charger is slow and loses more to overhead (kW)
    pub slow_charger_kw: f64,
    /// Expected wall-to-battery efficiency for slow or night sessions
    pub slow_efficiency_threshold: f64,
    pub normal_efficiency_threshold: f64,
    /// Ratio this far below the threshold escalates to a warning
    pub efficiency_warning_margin: f64,
    /// Ratios outside this band point at bad data, not a bad charger
    pub plausible_ratio_min: f64,
    pub plausible_ratio_max: f64,
    /// Session length assumed for a charge logged at the end of the night (hours)
    pub overnight_session_hours: f64,
    /// Longest parking gap used to derive charger power (hours)
    pub max_power_gap_hours: f64,

    /// Recent trips compared against the historical average
    pub tire_recent_trips: usize,
    /// Trip consumption above this multiple of the average counts as high
    pub tire_efficiency_ratio: f64,
    pub tire_min_flagged: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            soh_critical_percent: 75.0,
            soh_warning_percent: 85.0,
            drain_min_gap_hours: 12.0,
            drain_info_rate: 2.0,
            drain_warning_rate: 4.0,
            charging_recent_sessions: 5,
            slow_charger_kw: 4.0,
            slow_efficiency_threshold: 0.70, // Slow AC and night sessions lose more to standby
            normal_efficiency_threshold: 0.80,
            efficiency_warning_margin: 0.10,
            plausible_ratio_min: 0.45,
            plausible_ratio_max: 1.1,
            overnight_session_hours: 8.0,
            max_power_gap_hours: 72.0,
            tire_recent_trips: 5,
            tire_efficiency_ratio: 1.25,
            tire_min_flagged: 3, // 3 of 5
        }
    }
}

/// End of the off-peak valley a session must be logged by (min)
const VALLEY_END_MINS: u32 = 8 * 60;

pub struct HealthMonitor {
    config: HealthConfig,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Run every rule and collect what fired.
    pub fn check(
        &self,
        data: &ProcessedData,
        settings: &Settings,
        charges: &[Charge],
        trips: &[Trip],
    ) -> Vec<Anomaly> {
        let anomalies: Vec<Anomaly> = [
            self.check_battery(settings),
            self.check_phantom_drain(trips),
            self.check_charging_efficiency(settings, charges, trips),
            self.check_efficiency_drift(data, trips),
        ]
        .into_iter()
        .flatten()
        .collect();

        if !anomalies.is_empty() {
            info!(count = anomalies.len(), "Health check flagged anomalies");
        }
        anomalies
    }

    pub fn check_battery(&self, settings: &Settings) -> Option<Anomaly> {
        let soh = settings.soh_percent;
        let severity = if soh < self.config.soh_critical_percent {
            Severity::Critical
        } else if soh < self.config.soh_warning_percent {
            Severity::Warning
        } else {
            return None;
        };

        Some(
            Anomaly::new(
                "battery-soh",
                AnomalyType::Battery,
                severity,
                "Battery degradation",
                format!(
                    "Battery state of health is {:.1}%, usable capacity is {:.1} kWh",
                    soh,
                    settings.usable_capacity_kwh()
                ),
            )
            .with_value(soh),
        )
    }

    /// Most recent parking gap where the SoC fell faster than the drain
    /// threshold. Only one gap is reported.
    pub fn check_phantom_drain(&self, trips: &[Trip]) -> Option<Anomaly> {
        let mut ordered: Vec<&Trip> = trips.iter().collect();
        ordered.sort_by_key(|t| t.start_timestamp);

        ordered.windows(2).rev().find_map(|pair| {
            let (parked, next) = (pair[0], pair[1]);
            let gap_hours = (next.start_timestamp - parked.end_timestamp) as f64 / 3600.0;
            let drop = parked.soc_end - next.soc_start;
            if gap_hours <= self.config.drain_min_gap_hours || drop <= 0.0 {
                return None;
            }

            let rate = drop / gap_hours * 24.0;
            if rate <= self.config.drain_info_rate {
                return None;
            }
            let severity = if rate > self.config.drain_warning_rate {
                Severity::Warning
            } else {
                Severity::Info
            };
            debug!(gap_hours, drop, rate, "Phantom drain detected");

            Some(
                Anomaly::new(
                    format!("drain-{}", parked.end_timestamp),
                    AnomalyType::Drain,
                    severity,
                    "Phantom drain",
                    format!(
                        "Battery lost {:.1}% over {:.0} h parked ({:.1}% per day)",
                        drop, gap_hours, rate
                    ),
                )
                .with_value(round_to(rate, 2))
                .with_timestamp(next.start_timestamp),
            )
        })
    }

    /// Charger power for a session: energy over the parking gap that ended
    /// with it, then the overnight heuristic, then the charger's rating.
    fn session_power_kw(
        &self,
        charge: &Charge,
        settings: &Settings,
        trips: &[Trip],
        offset: &FixedOffset,
    ) -> Option<f64> {
        let from_gap = charge.logged_at(offset).and_then(|logged| {
            let logged = logged.timestamp();
            let arrived = trips
                .iter()
                .map(|t| t.end_timestamp)
                .filter(|end| *end < logged)
                .max()?;
            let hours = (logged - arrived) as f64 / 3600.0;
            (hours > 0.0 && hours <= self.config.max_power_gap_hours)
                .then(|| charge.kwh_charged / hours)
        });
        let overnight = NaiveTime::from_hms_opt(8, 0, 0);

        from_gap
            .or_else(|| {
                (Some(charge.time) == overnight)
                    .then(|| charge.kwh_charged / self.config.overnight_session_hours)
            })
            .or_else(|| {
                settings
                    .charger_type(&charge.charger_type_id)
                    .map(|c| c.power_kw)
                    .filter(|p| *p > 0.0)
            })
    }

    /// Most recent of the last few sessions whose wall-to-battery ratio is
    /// below what the charger type explains.
    pub fn check_charging_efficiency(
        &self,
        settings: &Settings,
        charges: &[Charge],
        trips: &[Trip],
    ) -> Option<Anomaly> {
        let usable = settings.usable_capacity_kwh();
        if usable <= 0.0 {
            return None;
        }
        let offset = settings.offset();

        let mut recent: Vec<&Charge> = charges.iter().collect();
        recent.sort_by_key(|c| std::cmp::Reverse(c.local_datetime()));

        recent
            .into_iter()
            .take(self.config.charging_recent_sessions)
            .find_map(|charge| {
                if charge.kwh_charged <= 0.0 || charge.percent_added() <= 0.0 {
                    return None;
                }
                let added_kwh = charge.percent_added() / 100.0 * usable;
                let ratio = added_kwh / charge.kwh_charged;
                if !(self.config.plausible_ratio_min..=self.config.plausible_ratio_max)
                    .contains(&ratio)
                {
                    return None;
                }

                let power = self.session_power_kw(charge, settings, trips, &offset);
                let slow = power.is_some_and(|p| p < self.config.slow_charger_kw);
                let valley = minute_of_day(charge.time) <= VALLEY_END_MINS;
                let threshold = if slow || valley {
                    self.config.slow_efficiency_threshold
                } else {
                    self.config.normal_efficiency_threshold
                };
                if ratio >= threshold {
                    return None;
                }

                let severity = if ratio < threshold - self.config.efficiency_warning_margin {
                    Severity::Warning
                } else {
                    Severity::Info
                };
                debug!(ratio, threshold, ?power, slow, valley, "Charging loss detected");

                let anomaly = Anomaly::new(
                    format!("charging-{}-{}", charge.date, charge.time.format("%H%M")),
                    AnomalyType::Charging,
                    severity,
                    "Charging inefficiency",
                    format!(
                        "Only {:.0}% of the {:.1} kWh metered reached the battery (expected at least {:.0}%)",
                        ratio * 100.0,
                        charge.kwh_charged,
                        threshold * 100.0
                    ),
                )
                .with_value(round_to(ratio * 100.0, 1));

                Some(match charge.logged_at(&offset) {
                    Some(at) => anomaly.with_timestamp(at.timestamp()),
                    None => anomaly,
                })
            })
    }

    /// Several recent trips well above the historical consumption.
    pub fn check_efficiency_drift(&self, data: &ProcessedData, trips: &[Trip]) -> Option<Anomaly> {
        let average = data.summary.avg_efficiency;
        if trips.len() < self.config.tire_recent_trips || average <= 0.0 {
            return None;
        }

        let mut recent: Vec<&Trip> = trips.iter().collect();
        recent.sort_by_key(|t| std::cmp::Reverse(t.start_timestamp));
        let recent = &recent[..self.config.tire_recent_trips];

        let limit = average * self.config.tire_efficiency_ratio;
        let high = recent
            .iter()
            .filter(|t| t.efficiency().is_some_and(|e| e > limit))
            .count();
        if high < self.config.tire_min_flagged {
            return None;
        }

        let latest = recent.first()?;
        Some(
            Anomaly::new(
                format!("efficiency-{}", latest.start_timestamp),
                AnomalyType::Efficiency,
                Severity::Warning,
                "Check tire pressure",
                format!(
                    "{} of the last {} trips used more than {:.1} kWh/100km against a {:.1} average",
                    high,
                    recent.len(),
                    limit,
                    average
                ),
            )
            .with_value(high as f64)
            .with_timestamp(latest.start_timestamp),
        )
    }
}

/// Run the default rule set.
pub fn check_system_health(
    data: &ProcessedData,
    settings: &Settings,
    charges: &[Charge],
    trips: &[Trip],
) -> Vec<Anomaly> {
    HealthMonitor::default().check(data, settings, charges, trips)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChargerType;
    use crate::stats::process_trips;
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use rstest::rstest;

    const HOUR: i64 = 3600;

    fn trip(start: i64, soc_start: f64, soc_end: f64, km: f64, kwh: f64) -> Trip {
        let date = DateTime::from_timestamp(start, 0).unwrap().date_naive();
        Trip {
            start_timestamp: start,
            end_timestamp: start + HOUR,
            distance_km: km,
            electricity_kwh: kwh,
            duration_secs: HOUR as f64,
            soc_start,
            soc_end,
            date,
            month: date.format("%Y-%m").to_string(),
        }
    }

    fn base() -> i64 {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap().timestamp()
    }

    /// Two trips separated by `gap_hours` with `drop` % lost while parked
    fn parked(gap_hours: i64, drop: f64) -> Vec<Trip> {
        let first = trip(base(), 90.0, 80.0, 40.0, 6.0);
        let second = trip(first.end_timestamp + gap_hours * HOUR, 80.0 - drop, 70.0, 40.0, 6.0);
        vec![first, second]
    }

    fn charge(date: NaiveDate, time: (u32, u32), kwh: f64, added: f64) -> Charge {
        Charge {
            date,
            time: NaiveTime::from_hms_opt(time.0, time.1, 0).unwrap(),
            odometer_km: 0.0,
            kwh_charged: kwh,
            total_cost: kwh * 0.2,
            charger_type_id: "wallbox".to_string(),
            price_per_kwh: 0.2,
            initial_percentage: 20.0,
            final_percentage: 20.0 + added,
            is_soc_estimated: None,
            timestamp: None,
        }
    }

    #[rstest]
    #[case(100.0, None)]
    #[case(85.0, None)]
    #[case(80.0, Some(Severity::Warning))]
    #[case(70.0, Some(Severity::Critical))]
    fn test_battery_rule(#[case] soh: f64, #[case] expected: Option<Severity>) {
        let settings = Settings {
            soh_percent: soh,
            ..Settings::default()
        };
        let anomaly = HealthMonitor::default().check_battery(&settings);
        assert_eq!(anomaly.map(|a| a.severity), expected);
    }

    #[test]
    fn test_fast_drain_is_a_single_warning() {
        let trips = parked(48, 10.0);
        let anomalies = check_system_health(
            &process_trips(&trips),
            &Settings::default(),
            &[],
            &trips,
        );
        let drains: Vec<_> = anomalies
            .iter()
            .filter(|a| a.kind == AnomalyType::Drain)
            .collect();
        assert_eq!(drains.len(), 1);
        assert_eq!(drains[0].severity, Severity::Warning);
        assert_eq!(drains[0].value, Some(5.0));
    }

    #[test]
    fn test_moderate_drain_is_info() {
        let anomaly = HealthMonitor::default()
            .check_phantom_drain(&parked(48, 5.0))
            .unwrap();
        assert_eq!(anomaly.severity, Severity::Info);
        assert_eq!(anomaly.value, Some(2.5));
    }

    #[rstest]
    // Short stop
    #[case(10, 10.0)]
    // 1%/day
    #[case(48, 2.0)]
    // SoC rose (charged while parked)
    #[case(48, -20.0)]
    fn test_drain_ignored(#[case] gap_hours: i64, #[case] drop: f64) {
        assert!(HealthMonitor::default()
            .check_phantom_drain(&parked(gap_hours, drop))
            .is_none());
    }

    #[test]
    fn test_drain_reports_most_recent_gap() {
        let mut trips = parked(48, 10.0);
        let last = trips[1].clone();
        trips.push(trip(last.end_timestamp + 24 * HOUR, last.soc_end - 3.0, 60.0, 40.0, 6.0));

        let anomaly = HealthMonitor::default().check_phantom_drain(&trips).unwrap();
        assert_eq!(anomaly.id, format!("drain-{}", last.end_timestamp));
        assert_eq!(anomaly.severity, Severity::Info);
    }

    #[test]
    fn test_lossy_daytime_session_is_flagged() {
        let settings = Settings {
            charger_types: vec![ChargerType {
                id: "wallbox".to_string(),
                name: "Wallbox".to_string(),
                efficiency: 0.9,
                power_kw: 11.0,
            }],
            ..Settings::default()
        };
        let day = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        // 50% of 60.48 kWh = 30.24 kWh reached the battery out of 45 metered -> 67%
        let charges = vec![charge(day, (15, 0), 45.0, 50.0)];
        let anomaly = HealthMonitor::default()
            .check_charging_efficiency(&settings, &charges, &[])
            .unwrap();
        assert_eq!(anomaly.kind, AnomalyType::Charging);
        assert_eq!(anomaly.severity, Severity::Warning);
        assert_eq!(anomaly.value, Some(67.2));
    }

    #[test]
    fn test_overnight_slow_session_gets_lower_threshold() {
        let day = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        // 30.24 kWh stored from 40 metered = 75.6%, fine for an 8 h night session
        let charges = vec![charge(day, (8, 0), 40.0, 50.0)];
        assert!(HealthMonitor::default()
            .check_charging_efficiency(&Settings::default(), &charges, &[])
            .is_none());
    }

    /// 30.24 kWh stored from 40 metered (75.6%) at 15:00, after arriving
    /// home at `arrived`. Slow power from the parking gap lowers the bar to
    /// 70%; a fast gap or no usable gap keeps it at 80%.
    #[rstest]
    #[case((2024, 5, 10, 4), None)]
    #[case((2024, 5, 10, 12), Some(Severity::Info))]
    #[case((2024, 5, 6, 4), Some(Severity::Info))]
    fn test_parking_gap_sets_charger_power(
        #[case] arrived: (i32, u32, u32, u32),
        #[case] expected: Option<Severity>,
    ) {
        let (y, m, d, h) = arrived;
        let arrival = Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap().timestamp();
        let trips = vec![trip(arrival - HOUR, 90.0, 40.0, 60.0, 9.0)];
        let day = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let charges = vec![charge(day, (15, 0), 40.0, 50.0)];

        let anomaly = HealthMonitor::default().check_charging_efficiency(
            &Settings::default(),
            &charges,
            &trips,
        );
        assert_eq!(anomaly.map(|a| a.severity), expected);
    }

    #[test]
    fn test_implausible_ratio_is_ignored() {
        let day = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        // 2% of capacity from 30 kWh: corrupt SoC reading
        let charges = vec![charge(day, (15, 0), 30.0, 1.0)];
        assert!(HealthMonitor::default()
            .check_charging_efficiency(&Settings::default(), &charges, &[])
            .is_none());
    }

    #[test]
    fn test_recent_trips_above_average_flag_tires() {
        let mut trips: Vec<Trip> = (0..20)
            .map(|i| trip(base() + i * 24 * HOUR, 90.0, 80.0, 50.0, 7.5))
            .collect();
        for (i, t) in trips.iter_mut().rev().take(3).enumerate() {
            t.electricity_kwh = 12.0 + i as f64;
        }
        let data = process_trips(&trips);
        let anomaly = HealthMonitor::default()
            .check_efficiency_drift(&data, &trips)
            .unwrap();
        assert_eq!(anomaly.kind, AnomalyType::Efficiency);
        assert_eq!(anomaly.value, Some(3.0));

        let steady: Vec<Trip> = (0..6)
            .map(|i| trip(base() + i * 24 * HOUR, 90.0, 80.0, 50.0, 7.5))
            .collect();
        assert!(HealthMonitor::default()
            .check_efficiency_drift(&process_trips(&steady), &steady)
            .is_none());
    }
}
