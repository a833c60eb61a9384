use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::validation::{parse_date, parse_time, require, ValidationError};

/// Named charger profile, referenced from [`Charge::charger_type_id`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChargerType {
    pub id: String,
    pub name: String,
    /// Wall-to-battery efficiency multiplier (0-1)
    #[validate(range(min = 0.0, max = 1.0))]
    pub efficiency: f64,
    /// Rated power (kW)
    #[validate(range(min = 0.0))]
    pub power_kw: f64,
}

/// One charging session, immutable once imported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Charge {
    pub date: NaiveDate,
    /// Local wall-clock time the session was logged
    pub time: NaiveTime,
    pub odometer_km: f64,
    /// Energy metered at the wall (kWh)
    pub kwh_charged: f64,
    pub total_cost: f64,
    pub charger_type_id: String,
    pub price_per_kwh: f64,
    pub initial_percentage: f64,
    pub final_percentage: f64,
    #[serde(default)]
    pub is_soc_estimated: Option<bool>,
    /// Epoch seconds, when the importer captured one
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl Charge {
    /// Percentage points of SoC added by the session.
    pub fn percent_added(&self) -> f64 {
        self.final_percentage - self.initial_percentage
    }

    pub fn local_datetime(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }

    /// Moment the session was logged, in the given local offset.
    ///
    /// Prefers the explicit timestamp and falls back to date + time.
    pub fn logged_at(&self, offset: &FixedOffset) -> Option<DateTime<FixedOffset>> {
        match self.timestamp {
            Some(ts) => DateTime::from_timestamp(ts, 0).map(|dt| dt.with_timezone(offset)),
            None => offset.from_local_datetime(&self.local_datetime()).single(),
        }
    }
}

/// Charge row as it arrives from an import, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RawCharge {
    pub date: Option<String>,
    pub time: Option<String>,
    #[validate(range(min = 0.0))]
    pub odometer_km: Option<f64>,
    #[validate(range(min = 0.0))]
    pub kwh_charged: Option<f64>,
    #[validate(range(min = 0.0))]
    pub total_cost: Option<f64>,
    pub charger_type_id: Option<String>,
    #[validate(range(min = 0.0))]
    pub price_per_kwh: Option<f64>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub initial_percentage: Option<f64>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub final_percentage: Option<f64>,
    pub is_soc_estimated: Option<bool>,
    pub timestamp: Option<i64>,
}

impl TryFrom<RawCharge> for Charge {
    type Error = ValidationError;

    fn try_from(raw: RawCharge) -> Result<Self, Self::Error> {
        raw.validate()?;

        let date = parse_date(&require(raw.date, "date")?)?;
        let time = match raw.time.as_deref() {
            Some(t) => parse_time(t)?,
            None => NaiveTime::MIN,
        };
        let kwh_charged = require(raw.kwh_charged, "kwhCharged")?;
        let total_cost = raw.total_cost.unwrap_or(0.0);
        let price_per_kwh = raw.price_per_kwh.unwrap_or_else(|| {
            if kwh_charged > 0.0 {
                total_cost / kwh_charged
            } else {
                0.0
            }
        });

        Ok(Charge {
            date,
            time,
            odometer_km: raw.odometer_km.unwrap_or(0.0),
            kwh_charged,
            total_cost,
            charger_type_id: raw.charger_type_id.unwrap_or_default(),
            price_per_kwh,
            initial_percentage: require(raw.initial_percentage, "initialPercentage")?,
            final_percentage: require(raw.final_percentage, "finalPercentage")?,
            is_soc_estimated: raw.is_soc_estimated,
            timestamp: raw.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawCharge {
        RawCharge {
            date: Some("2024-05-02".to_string()),
            time: Some("08:00".to_string()),
            odometer_km: Some(12_500.0),
            kwh_charged: Some(30.0),
            total_cost: Some(4.5),
            charger_type_id: Some("home".to_string()),
            price_per_kwh: None,
            initial_percentage: Some(20.0),
            final_percentage: Some(70.0),
            is_soc_estimated: None,
            timestamp: None,
        }
    }

    #[test]
    fn test_raw_charge_validates() {
        let charge = Charge::try_from(raw()).unwrap();
        assert_eq!(charge.percent_added(), 50.0);
        assert!((charge.price_per_kwh - 0.15).abs() < 1e-9);
        assert_eq!(charge.time, NaiveTime::from_hms_opt(8, 0, 0).unwrap());

        let utc = FixedOffset::east_opt(0).unwrap();
        let logged = charge.logged_at(&utc).unwrap();
        assert_eq!(logged.date_naive(), charge.date);
    }

    #[test]
    fn test_raw_charge_rejects_out_of_range_percentage() {
        let mut bad = raw();
        bad.final_percentage = Some(104.0);
        assert!(matches!(
            Charge::try_from(bad),
            Err(ValidationError::OutOfRange(_))
        ));

        let mut missing = raw();
        missing.date = None;
        assert!(matches!(
            Charge::try_from(missing),
            Err(ValidationError::MissingField("date"))
        ));
    }
}
