use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::validation::{parse_date, require, require_positive, ValidationError};

/// One driving event, immutable once imported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    /// Departure, epoch seconds
    pub start_timestamp: i64,
    /// Arrival, epoch seconds
    pub end_timestamp: i64,
    pub distance_km: f64,
    pub electricity_kwh: f64,
    pub duration_secs: f64,
    pub soc_start: f64,
    pub soc_end: f64,
    pub date: NaiveDate,
    /// `YYYY-MM`
    pub month: String,
}

impl Trip {
    pub fn duration_hours(&self) -> f64 {
        self.duration_secs / 3600.0
    }

    /// Distance, energy and duration all strictly positive.
    pub fn is_measurable(&self) -> bool {
        self.distance_km > 0.0 && self.electricity_kwh > 0.0 && self.duration_secs > 0.0
    }

    pub fn average_speed_kmh(&self) -> Option<f64> {
        (self.duration_secs > 0.0).then(|| self.distance_km / self.duration_hours())
    }

    /// kWh/100km
    pub fn efficiency(&self) -> Option<f64> {
        (self.distance_km > 0.0).then(|| self.electricity_kwh * 100.0 / self.distance_km)
    }

    pub fn local_start(&self, offset: &FixedOffset) -> Option<DateTime<FixedOffset>> {
        DateTime::from_timestamp(self.start_timestamp, 0).map(|dt| dt.with_timezone(offset))
    }

    pub fn local_end(&self, offset: &FixedOffset) -> Option<DateTime<FixedOffset>> {
        DateTime::from_timestamp(self.end_timestamp, 0).map(|dt| dt.with_timezone(offset))
    }
}

/// Trip row as it arrives from an import, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RawTrip {
    pub start_timestamp: Option<i64>,
    pub end_timestamp: Option<i64>,
    pub distance_km: Option<f64>,
    pub electricity_kwh: Option<f64>,
    pub duration_secs: Option<f64>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub soc_start: Option<f64>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub soc_end: Option<f64>,
    pub date: Option<String>,
    pub month: Option<String>,
}

impl TryFrom<RawTrip> for Trip {
    type Error = ValidationError;

    fn try_from(raw: RawTrip) -> Result<Self, Self::Error> {
        raw.validate()?;

        let start_timestamp = require(raw.start_timestamp, "startTimestamp")?;
        let end_timestamp = require(raw.end_timestamp, "endTimestamp")?;
        if end_timestamp < start_timestamp {
            return Err(ValidationError::InvertedTimestamps {
                start: start_timestamp,
                end: end_timestamp,
            });
        }

        let duration_secs = match raw.duration_secs {
            Some(d) => require_positive(Some(d), "durationSecs")?,
            None => require_positive(
                Some((end_timestamp - start_timestamp) as f64),
                "durationSecs",
            )?,
        };

        let date = match raw.date.as_deref() {
            Some(d) => parse_date(d)?,
            None => DateTime::from_timestamp(start_timestamp, 0)
                .map(|dt| dt.date_naive())
                .ok_or_else(|| ValidationError::InvalidDate(start_timestamp.to_string()))?,
        };
        let month = raw
            .month
            .unwrap_or_else(|| date.format("%Y-%m").to_string());

        Ok(Trip {
            start_timestamp,
            end_timestamp,
            distance_km: require_positive(raw.distance_km, "distanceKm")?,
            electricity_kwh: require_positive(raw.electricity_kwh, "electricityKwh")?,
            duration_secs,
            soc_start: require(raw.soc_start, "socStart")?,
            soc_end: require(raw.soc_end, "socEnd")?,
            date,
            month,
        })
    }
}
