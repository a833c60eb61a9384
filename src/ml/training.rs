//! ML Model Training Pipeline
//!
//! Mini-batch gradient descent on mean-squared error for a single dense
//! linear layer. Every fit starts from fresh weights; there is no
//! incremental training.

use super::{models::LinearRegressionModel, ModelMetadata, ModelType, TrainingError, ValidationMetrics};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-7;

/// Training Dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingDataset {
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
}

impl TrainingDataset {
    pub fn new(features: Vec<Vec<f64>>, targets: Vec<f64>) -> Result<Self, TrainingError> {
        if features.len() != targets.len() {
            return Err(TrainingError::TargetMismatch {
                features: features.len(),
                targets: targets.len(),
            });
        }
        Ok(Self { features, targets })
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn width(&self) -> usize {
        self.features.first().map(Vec::len).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Sgd,
    Adam,
}

/// Training Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub optimizer: OptimizerKind,
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    /// Seed for the per-epoch shuffle, so identical inputs give identical weights
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerKind::Adam,
            learning_rate: 0.1,
            epochs: 100,
            batch_size: 32,
            seed: 42,
        }
    }
}

/// Trained weights plus the final full-dataset MSE
#[derive(Debug, Clone)]
pub struct FitOutcome {
    pub model: LinearRegressionModel,
    pub loss: f64,
}

enum Optimizer {
    Sgd {
        learning_rate: f64,
    },
    Adam {
        learning_rate: f64,
        m: Vec<f64>,
        v: Vec<f64>,
        t: i32,
    },
}

impl Optimizer {
    fn new(kind: OptimizerKind, learning_rate: f64, n_params: usize) -> Self {
        match kind {
            OptimizerKind::Sgd => Self::Sgd { learning_rate },
            OptimizerKind::Adam => Self::Adam {
                learning_rate,
                m: vec![0.0; n_params],
                v: vec![0.0; n_params],
                t: 0,
            },
        }
    }

    fn step(&mut self, params: &mut [f64], grads: &[f64]) {
        match self {
            Self::Sgd { learning_rate } => {
                for (p, g) in params.iter_mut().zip(grads) {
                    *p -= *learning_rate * g;
                }
            }
            Self::Adam {
                learning_rate,
                m,
                v,
                t,
            } => {
                *t += 1;
                let bias1 = 1.0 - ADAM_BETA1.powi(*t);
                let bias2 = 1.0 - ADAM_BETA2.powi(*t);
                for i in 0..params.len() {
                    m[i] = ADAM_BETA1 * m[i] + (1.0 - ADAM_BETA1) * grads[i];
                    v[i] = ADAM_BETA2 * v[i] + (1.0 - ADAM_BETA2) * grads[i] * grads[i];
                    let m_hat = m[i] / bias1;
                    let v_hat = v[i] / bias2;
                    params[i] -= *learning_rate * m_hat / (v_hat.sqrt() + ADAM_EPSILON);
                }
            }
        }
    }
}

/// Weights are `[w_0 .. w_n-1, bias]`
fn forward(params: &[f64], x: &[f64]) -> f64 {
    let bias = params[params.len() - 1];
    x.iter().zip(params.iter()).map(|(xi, wi)| xi * wi).sum::<f64>() + bias
}

/// Model Trainer
pub struct ModelTrainer {
    config: TrainingConfig,
}

impl ModelTrainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Calculate validation metrics
    pub fn calculate_metrics(
        &self,
        predictions: &[f64],
        targets: &[f64],
    ) -> Result<ValidationMetrics, TrainingError> {
        if predictions.len() != targets.len() {
            return Err(TrainingError::TargetMismatch {
                features: predictions.len(),
                targets: targets.len(),
            });
        }
        if predictions.is_empty() {
            return Err(TrainingError::EmptyDataset);
        }

        let n = predictions.len() as f64;

        let mae: f64 = predictions
            .iter()
            .zip(targets.iter())
            .map(|(p, t)| (p - t).abs())
            .sum::<f64>()
            / n;

        let mse: f64 = predictions
            .iter()
            .zip(targets.iter())
            .map(|(p, t)| (p - t).powi(2))
            .sum::<f64>()
            / n;

        let mean_target: f64 = targets.iter().sum::<f64>() / n;
        let ss_tot: f64 = targets.iter().map(|t| (t - mean_target).powi(2)).sum();
        let ss_res: f64 = predictions
            .iter()
            .zip(targets.iter())
            .map(|(p, t)| (t - p).powi(2))
            .sum();

        let r2 = if ss_tot.abs() < 1e-10 {
            0.0
        } else {
            1.0 - (ss_res / ss_tot)
        };

        Ok(ValidationMetrics {
            mae,
            rmse: mse.sqrt(),
            r2,
        })
    }

    /// Fit a linear regression with mini-batch gradient descent on MSE.
    ///
    /// The bias starts at the target mean so that labels far from zero do not
    /// spend the epoch budget walking the intercept into place.
    pub fn fit_linear(
        &self,
        dataset: &TrainingDataset,
        feature_names: Vec<String>,
    ) -> Result<FitOutcome, TrainingError> {
        if dataset.is_empty() {
            return Err(TrainingError::EmptyDataset);
        }

        let width = dataset.width();
        if let Some(bad) = dataset.features.iter().find(|f| f.len() != width) {
            return Err(TrainingError::FeatureMismatch {
                expected: width,
                actual: bad.len(),
            });
        }

        let n = dataset.len();
        let mut params = vec![0.0; width + 1];
        params[width] = dataset.targets.iter().sum::<f64>() / n as f64;

        let mut optimizer = Optimizer::new(
            self.config.optimizer,
            self.config.learning_rate,
            params.len(),
        );
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut order: Vec<usize> = (0..n).collect();
        let batch_size = self.config.batch_size.max(1);
        let mut grads = vec![0.0; width + 1];

        for _epoch in 0..self.config.epochs {
            order.shuffle(&mut rng);
            for batch in order.chunks(batch_size) {
                grads.iter_mut().for_each(|g| *g = 0.0);
                for &i in batch {
                    let x = &dataset.features[i];
                    let err = forward(&params, x) - dataset.targets[i];
                    for (g, xi) in grads.iter_mut().zip(x.iter()) {
                        *g += 2.0 * err * xi;
                    }
                    grads[width] += 2.0 * err;
                }
                let scale = 1.0 / batch.len() as f64;
                grads.iter_mut().for_each(|g| *g *= scale);
                optimizer.step(&mut params, &grads);
            }
        }

        let predictions: Vec<f64> = dataset
            .features
            .iter()
            .map(|x| forward(&params, x))
            .collect();
        let loss = predictions
            .iter()
            .zip(dataset.targets.iter())
            .map(|(p, t)| (p - t).powi(2))
            .sum::<f64>()
            / n as f64;
        let metrics = self.calculate_metrics(&predictions, &dataset.targets)?;

        let intercept = params[width];
        params.truncate(width);

        let metadata = ModelMetadata {
            model_id: format!("linear_regression_{}", uuid::Uuid::new_v4()),
            model_type: ModelType::LinearRegression,
            trained_at: chrono::Utc::now(),
            training_samples: n,
            validation_metrics: metrics,
            feature_names,
        };

        Ok(FitOutcome {
            model: LinearRegressionModel::new(params, intercept, metadata),
            loss,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_dataset() -> TrainingDataset {
        // y = 2x + 1
        TrainingDataset::new(
            vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0]],
            vec![3.0, 5.0, 7.0, 9.0],
        )
        .unwrap()
    }

    #[test]
    fn test_dataset_shape_checks() {
        assert!(matches!(
            TrainingDataset::new(vec![vec![1.0]], vec![1.0, 2.0]),
            Err(TrainingError::TargetMismatch { features: 1, targets: 2 })
        ));
        assert_eq!(line_dataset().width(), 1);
    }

    #[test]
    fn test_calculate_metrics() {
        let trainer = ModelTrainer::new(TrainingConfig::default());

        let predictions = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let targets = vec![1.1, 2.1, 2.9, 4.2, 4.8];

        let metrics = trainer.calculate_metrics(&predictions, &targets).unwrap();

        assert!(metrics.mae < 0.3);
        assert!(metrics.rmse < 0.4);
        assert!(metrics.r2 > 0.9);
    }

    #[test]
    fn test_adam_fits_line() {
        let trainer = ModelTrainer::new(TrainingConfig {
            epochs: 2000,
            ..TrainingConfig::default()
        });
        let outcome = trainer
            .fit_linear(&line_dataset(), vec!["x".to_string()])
            .unwrap();

        assert!((outcome.model.coefficients[0] - 2.0).abs() < 0.25);
        assert!((outcome.model.intercept - 1.0).abs() < 0.6);
        assert!(outcome.loss < 0.1);
        assert!(outcome.model.metadata.validation_metrics.r2 > 0.95);
    }

    #[test]
    fn test_sgd_fits_line() {
        let trainer = ModelTrainer::new(TrainingConfig {
            optimizer: OptimizerKind::Sgd,
            learning_rate: 0.02,
            epochs: 3000,
            batch_size: 4,
            seed: 7,
        });
        let outcome = trainer
            .fit_linear(&line_dataset(), vec!["x".to_string()])
            .unwrap();

        assert!((outcome.model.coefficients[0] - 2.0).abs() < 0.1);
        assert!((outcome.model.intercept - 1.0).abs() < 0.3);
    }

    #[test]
    fn test_constant_targets_stay_put() {
        let dataset =
            TrainingDataset::new(vec![vec![0.0], vec![1.0], vec![2.0]], vec![60.0; 3]).unwrap();
        let outcome = ModelTrainer::new(TrainingConfig::default())
            .fit_linear(&dataset, vec!["x".to_string()])
            .unwrap();

        assert_eq!(outcome.model.coefficients[0], 0.0);
        assert_eq!(outcome.model.intercept, 60.0);
        assert_eq!(outcome.loss, 0.0);
    }

    #[test]
    fn test_identical_inputs_identical_weights() {
        let trainer = ModelTrainer::new(TrainingConfig::default());
        let a = trainer.fit_linear(&line_dataset(), vec!["x".to_string()]).unwrap();
        let b = trainer.fit_linear(&line_dataset(), vec!["x".to_string()]).unwrap();
        assert_eq!(a.model.coefficients, b.model.coefficients);
        assert_eq!(a.model.intercept, b.model.intercept);
    }

    #[test]
    fn test_empty_dataset_rejected() {
        let dataset = TrainingDataset::new(vec![], vec![]).unwrap();
        assert!(matches!(
            ModelTrainer::new(TrainingConfig::default()).fit_linear(&dataset, vec![]),
            Err(TrainingError::EmptyDataset)
        ));
    }
}
