use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median};
use std::collections::HashMap;

use crate::domain::Trip;

/// Parking stays longer than this are treated as trips away, not routine (h)
pub const MAX_PARKING_GAP_HOURS: f64 = 72.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeparturePrediction {
    /// Predicted departure, epoch milliseconds
    pub departure_time_millis: i64,
    pub duration_hours: f64,
}

/// Answers "if the car is parked at this moment, how long will it stay?".
///
/// Implementations must be side-effect free; the scheduler calls them many
/// times per run, possibly concurrently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DepartureOracle: Send + Sync {
    async fn predict_departure(&self, parked_at_millis: i64)
        -> Result<Option<DeparturePrediction>>;
}

/// Parking stay between two consecutive trips
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParkingGap {
    pub parked_at: DateTime<FixedOffset>,
    pub duration_hours: f64,
}

/// Stays between consecutive trips, in local time, skipping overlaps and
/// stays beyond [`MAX_PARKING_GAP_HOURS`].
pub fn parking_gaps(trips: &[Trip], offset: &FixedOffset) -> Vec<ParkingGap> {
    let mut ordered: Vec<&Trip> = trips.iter().collect();
    ordered.sort_by_key(|t| t.start_timestamp);

    ordered
        .windows(2)
        .filter_map(|pair| {
            let gap_secs = pair[1].start_timestamp - pair[0].end_timestamp;
            let hours = gap_secs as f64 / 3600.0;
            if gap_secs <= 0 || hours > MAX_PARKING_GAP_HOURS {
                return None;
            }
            Some(ParkingGap {
                parked_at: pair[0].local_end(offset)?,
                duration_hours: hours,
            })
        })
        .collect()
}

/// Baseline oracle built from the trip history: the median stay observed
/// for the same weekday and hour, then for the same weekday.
#[derive(Debug, Clone)]
pub struct HistoricalDepartureForecaster {
    offset: FixedOffset,
    by_hour: HashMap<(u32, u32), Vec<f64>>,
    by_day: HashMap<u32, Vec<f64>>,
}

impl HistoricalDepartureForecaster {
    pub fn from_trips(trips: &[Trip], offset: FixedOffset) -> Self {
        let mut by_hour: HashMap<(u32, u32), Vec<f64>> = HashMap::new();
        let mut by_day: HashMap<u32, Vec<f64>> = HashMap::new();
        for gap in parking_gaps(trips, &offset) {
            let day = gap.parked_at.weekday().num_days_from_monday();
            by_hour
                .entry((day, gap.parked_at.hour()))
                .or_default()
                .push(gap.duration_hours);
            by_day.entry(day).or_default().push(gap.duration_hours);
        }
        Self {
            offset,
            by_hour,
            by_day,
        }
    }

    pub fn observations(&self) -> usize {
        self.by_day.values().map(Vec::len).sum()
    }

    fn median_stay(&self, at: &DateTime<FixedOffset>) -> Option<f64> {
        let day = at.weekday().num_days_from_monday();
        let samples = self
            .by_hour
            .get(&(day, at.hour()))
            .or_else(|| self.by_day.get(&day))?;
        (!samples.is_empty()).then(|| Data::new(samples.clone()).median())
    }
}

#[async_trait]
impl DepartureOracle for HistoricalDepartureForecaster {
    async fn predict_departure(
        &self,
        parked_at_millis: i64,
    ) -> Result<Option<DeparturePrediction>> {
        let Some(parked_at) = DateTime::from_timestamp_millis(parked_at_millis) else {
            return Ok(None);
        };
        let local = parked_at.with_timezone(&self.offset);
        Ok(self.median_stay(&local).map(|hours| DeparturePrediction {
            departure_time_millis: parked_at_millis + (hours * 3_600_000.0) as i64,
            duration_hours: hours,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn trip_at(day: u32, start_h: u32, end_h: u32) -> Trip {
        let start = Utc.with_ymd_and_hms(2024, 4, day, start_h, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 4, day, end_h, 0, 0).unwrap();
        Trip {
            start_timestamp: start.timestamp(),
            end_timestamp: end.timestamp(),
            distance_km: 20.0,
            electricity_kwh: 3.0,
            duration_secs: (end - start).num_seconds() as f64,
            soc_start: 80.0,
            soc_end: 75.0,
            date: NaiveDate::from_ymd_opt(2024, 4, day).unwrap(),
            month: "2024-04".to_string(),
        }
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_parking_gaps_skip_long_absences() {
        let trips = vec![trip_at(1, 8, 9), trip_at(1, 17, 18), trip_at(10, 8, 9)];
        let gaps = parking_gaps(&trips, &utc());
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].duration_hours, 8.0);
        assert_eq!(gaps[0].parked_at.hour(), 9);
    }

    #[tokio::test]
    async fn test_predicts_median_stay_for_hour_bucket() {
        // Mondays 1st, 8th and 15th April 2024: park 09:00, leave 17:00/18:00/19:00
        let trips = vec![
            trip_at(1, 8, 9),
            trip_at(1, 17, 18),
            trip_at(8, 8, 9),
            trip_at(8, 18, 19),
            trip_at(15, 8, 9),
            trip_at(15, 19, 20),
        ];
        let oracle = HistoricalDepartureForecaster::from_trips(&trips, utc());
        assert_eq!(oracle.observations(), 3);

        let monday_nine = Utc.with_ymd_and_hms(2024, 4, 22, 9, 0, 0).unwrap();
        let prediction = oracle
            .predict_departure(monday_nine.timestamp_millis())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(prediction.duration_hours, 9.0);
        assert_eq!(
            prediction.departure_time_millis,
            monday_nine.timestamp_millis() + 9 * 3_600_000
        );

        // Same weekday, other hour: weekday-wide median
        let monday_noon = Utc.with_ymd_and_hms(2024, 4, 22, 12, 0, 0).unwrap();
        let fallback = oracle
            .predict_departure(monday_noon.timestamp_millis())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fallback.duration_hours, 9.0);

        // No Tuesday history
        let tuesday = Utc.with_ymd_and_hms(2024, 4, 23, 9, 0, 0).unwrap();
        assert!(oracle
            .predict_departure(tuesday.timestamp_millis())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_mock_oracle() {
        let mut oracle = MockDepartureOracle::new();
        oracle.expect_predict_departure().returning(|at| {
            Ok(Some(DeparturePrediction {
                departure_time_millis: at + 3_600_000,
                duration_hours: 1.0,
            }))
        });
        let p = oracle.predict_departure(0).await.unwrap().unwrap();
        assert_eq!(p.duration_hours, 1.0);
    }
}
