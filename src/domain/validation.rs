use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;

/// Errors raised while turning imported rows into validated records
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    #[error("Field {field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: f64 },
    #[error("Invalid date: {0}")]
    InvalidDate(String),
    #[error("Invalid time: {0}")]
    InvalidTime(String),
    #[error("Trip ends before it starts ({start} > {end})")]
    InvertedTimestamps { start: i64, end: i64 },
    #[error("Out of range: {0}")]
    OutOfRange(#[from] validator::ValidationErrors),
}

pub(crate) fn require<T>(value: Option<T>, field: &'static str) -> Result<T, ValidationError> {
    value.ok_or(ValidationError::MissingField(field))
}

pub(crate) fn require_positive(value: Option<f64>, field: &'static str) -> Result<f64, ValidationError> {
    let value = require(value, field)?;
    if !value.is_finite() || value <= 0.0 {
        return Err(ValidationError::NonPositive { field, value });
    }
    Ok(value)
}

/// Accepts `YYYY-MM-DD` and `DD/MM/YYYY`.
pub(crate) fn parse_date(value: &str) -> Result<NaiveDate, ValidationError> {
    let trimmed = value.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%d/%m/%Y"))
        .map_err(|_| ValidationError::InvalidDate(value.to_string()))
}

/// Accepts `HH:MM` and `HH:MM:SS`.
pub(crate) fn parse_time(value: &str) -> Result<NaiveTime, ValidationError> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|_| ValidationError::InvalidTime(value.to_string()))
}
