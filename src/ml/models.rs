//! ML Model Definitions

use super::{ModelMetadata, ModelType, TrainingError, ValidationMetrics};
use serde::{Deserialize, Serialize};

/// Dense single-output linear layer: `y = w · x + b`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRegressionModel {
    pub metadata: ModelMetadata,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl LinearRegressionModel {
    pub fn new(coefficients: Vec<f64>, intercept: f64, metadata: ModelMetadata) -> Self {
        Self {
            metadata,
            coefficients,
            intercept,
        }
    }

    /// Model with hand-set weights (tests, cached restores)
    pub fn from_weights(coefficients: Vec<f64>, intercept: f64, feature_names: Vec<String>) -> Self {
        let metadata = ModelMetadata {
            model_id: "linear_manual".to_string(),
            model_type: ModelType::LinearRegression,
            trained_at: chrono::Utc::now(),
            training_samples: 0,
            validation_metrics: ValidationMetrics::default(),
            feature_names,
        };
        Self::new(coefficients, intercept, metadata)
    }

    /// Number of input features the weights were fitted for.
    pub fn input_dim(&self) -> usize {
        self.coefficients.len()
    }

    pub fn predict(&self, features: &[f64]) -> Result<f64, TrainingError> {
        if features.len() != self.coefficients.len() {
            return Err(TrainingError::FeatureMismatch {
                expected: self.coefficients.len(),
                actual: features.len(),
            });
        }

        Ok(features
            .iter()
            .zip(self.coefficients.iter())
            .map(|(f, c)| f * c)
            .sum::<f64>()
            + self.intercept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_regression_predict() {
        let model = LinearRegressionModel::from_weights(
            vec![2.0, 3.0, 1.0],
            5.0,
            vec!["f1".to_string(), "f2".to_string(), "f3".to_string()],
        );

        // 2*1 + 3*2 + 1*3 + 5 = 16
        assert_eq!(model.predict(&[1.0, 2.0, 3.0]).unwrap(), 16.0);
        assert_eq!(model.input_dim(), 3);
    }

    #[test]
    fn test_linear_regression_rejects_wrong_width() {
        let model = LinearRegressionModel::from_weights(vec![1.0], 0.0, vec!["x".to_string()]);
        assert!(matches!(
            model.predict(&[1.0, 2.0]),
            Err(TrainingError::FeatureMismatch { expected: 1, actual: 2 })
        ));
    }
}
