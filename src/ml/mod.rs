//! Machine Learning Module
//!
//! Small regression models behind the vehicle insights:
//! - Range/efficiency prediction from speed and distance
//! - Battery state-of-health prediction from charging sessions
//!
//! # Architecture
//! - `training`: mini-batch gradient descent (SGD/Adam) with MSE loss
//! - `models`: linear regression weights and inference
//! - `range`, `soh`: the two predictors, each returning an immutable model
//!   value that the caller threads into later predictions

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use thiserror::Error;

use crate::domain::{Settings, Trip};

pub mod models;
pub mod range;
pub mod soh;
pub mod training;

pub use models::*;
pub use range::{RangeModel, RangeModelConfig, RangeScenario, RangeTraining, ScenarioKind};
pub use soh::{SohChart, SohModel, SohModelConfig, SohReport, SohTraining};
pub use training::*;

/// Floor added to the standard deviation before dividing
pub const VARIANCE_EPSILON: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("Cannot train on empty dataset")]
    EmptyDataset,
    #[error("Feature count mismatch: expected {expected}, got {actual}")]
    FeatureMismatch { expected: usize, actual: usize },
    #[error("Feature and target count mismatch: {features} features, {targets} targets")]
    TargetMismatch { features: usize, targets: usize },
    #[error("Training task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// ML Model Type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ModelType {
    LinearRegression,
}

/// ML Model Metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_id: String,
    pub model_type: ModelType,
    pub trained_at: chrono::DateTime<chrono::Utc>,
    pub training_samples: usize,
    pub validation_metrics: ValidationMetrics,
    pub feature_names: Vec<String>,
}

/// Validation Metrics
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationMetrics {
    pub mae: f64,  // Mean Absolute Error
    pub rmse: f64, // Root Mean Square Error
    pub r2: f64,   // R-squared
}

/// Outcome of a fit, shaped so an external cache can store it by identity.
///
/// `loss: 0, samples: 0` means the model was left untrained.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TrainingReport {
    pub loss: f64,
    pub samples: usize,
}

impl TrainingReport {
    pub fn untrained() -> Self {
        Self::default()
    }
}

/// Z-score normalization moments captured at training time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Standardizer {
    pub means: Vec<f64>,
    pub variances: Vec<f64>,
}

impl Standardizer {
    /// Per-column mean and population variance.
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self, TrainingError> {
        let width = rows.first().map(Vec::len).ok_or(TrainingError::EmptyDataset)?;
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            return Err(TrainingError::FeatureMismatch {
                expected: width,
                actual: bad.len(),
            });
        }

        let mut means = Vec::with_capacity(width);
        let mut variances = Vec::with_capacity(width);
        for col in 0..width {
            let column: Vec<f64> = rows.iter().map(|r| r[col]).collect();
            means.push(column.iter().mean());
            variances.push(column.iter().population_variance());
        }
        Ok(Self { means, variances })
    }

    pub fn width(&self) -> usize {
        self.means.len()
    }

    pub fn transform(&self, row: &[f64]) -> Result<Vec<f64>, TrainingError> {
        if row.len() != self.width() {
            return Err(TrainingError::FeatureMismatch {
                expected: self.width(),
                actual: row.len(),
            });
        }
        Ok(row
            .iter()
            .zip(self.means.iter().zip(self.variances.iter()))
            .map(|(x, (mean, var))| (x - mean) / (var.max(0.0).sqrt() + VARIANCE_EPSILON))
            .collect())
    }

    pub fn transform_all(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, TrainingError> {
        rows.iter().map(|r| self.transform(r)).collect()
    }
}

/// Cache key for trained models: changes whenever the trip history length,
/// its first date or the battery parameters change.
pub fn training_fingerprint(trips: &[Trip], settings: &Settings) -> String {
    let first_date = trips
        .iter()
        .map(|t| t.date)
        .min()
        .map(|d| d.to_string())
        .unwrap_or_default();
    let key = format!(
        "{}|{}|{:.3}|{:.2}",
        trips.len(),
        first_date,
        settings.battery_capacity_kwh,
        settings.soh_percent
    );
    format!("{:x}", md5::compute(key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standardizer_moments() {
        let rows = vec![vec![1.0, 10.0], vec![3.0, 10.0]];
        let scaler = Standardizer::fit(&rows).unwrap();
        assert_eq!(scaler.means, vec![2.0, 10.0]);
        assert_eq!(scaler.variances, vec![1.0, 0.0]);

        let z = scaler.transform(&[3.0, 10.0]).unwrap();
        assert!((z[0] - 1.0 / (1.0 + VARIANCE_EPSILON)).abs() < 1e-12);
        // Zero variance column is floor-clamped rather than dividing by zero
        assert_eq!(z[1], 0.0);
    }

    #[test]
    fn test_standardizer_rejects_shape_mismatch() {
        let scaler = Standardizer::fit(&[vec![1.0, 2.0]]).unwrap();
        assert!(matches!(
            scaler.transform(&[1.0]),
            Err(TrainingError::FeatureMismatch { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            Standardizer::fit(&[]),
            Err(TrainingError::EmptyDataset)
        ));
    }

    #[test]
    fn test_fingerprint_tracks_battery_params() {
        let settings = Settings::default();
        let a = training_fingerprint(&[], &settings);
        let b = training_fingerprint(
            &[],
            &Settings {
                soh_percent: 91.0,
                ..Settings::default()
            },
        );
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert_eq!(a, training_fingerprint(&[], &settings));
    }
}
