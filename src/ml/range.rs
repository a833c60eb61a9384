//! Range & efficiency predictor
//!
//! Linear regression from `[speed², distance]` to consumption (kWh/100km),
//! pinned to physical behaviour by heavily replicated synthetic anchors.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoEnumIterator};
use tracing::{debug, info, warn};

use super::training::{ModelTrainer, OptimizerKind, TrainingConfig, TrainingDataset};
use super::{LinearRegressionModel, Standardizer, TrainingError, TrainingReport};
use crate::domain::Trip;

/// Feature names, in input order
pub const RANGE_FEATURES: [&str; 2] = ["speed_squared", "distance_km"];

/// Moving-traffic speed band; below it the trip was mostly idling (km/h)
pub const MIN_TRAINING_SPEED_KMH: f64 = 15.0;
pub const MAX_TRAINING_SPEED_KMH: f64 = 160.0;
/// Plausible consumption band for telemetry rows (kWh/100km)
pub const MIN_TRAINING_EFFICIENCY: f64 = 5.0;
pub const MAX_TRAINING_EFFICIENCY: f64 = 40.0;

/// Copies of each anchor injected into the training set
pub const ANCHOR_REPLICAS: usize = 500;
pub const MIN_RANGE_SAMPLES: usize = 5;

/// Output clamp (kWh/100km)
pub const MIN_PREDICTED_EFFICIENCY: f64 = 10.0;
pub const MAX_PREDICTED_EFFICIENCY: f64 = 40.0;
/// Returned whenever there is no usable model (kWh/100km)
pub const FALLBACK_EFFICIENCY: f64 = 16.0;

/// Synthetic sample encoding known consumption at a driving profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsAnchor {
    pub speed_kmh: f64,
    pub distance_km: f64,
    pub efficiency: f64,
}

/// City, mixed and highway consumption measured on the reference vehicle
pub const PHYSICS_ANCHORS: [PhysicsAnchor; 3] = [
    PhysicsAnchor {
        speed_kmh: 30.0,
        distance_km: 15.0,
        efficiency: 14.5,
    },
    PhysicsAnchor {
        speed_kmh: 80.0,
        distance_km: 35.0,
        efficiency: 17.5,
    },
    PhysicsAnchor {
        speed_kmh: 100.0,
        distance_km: 100.0,
        efficiency: 23.5,
    },
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeModelConfig {
    pub min_speed_kmh: f64,
    pub max_speed_kmh: f64,
    pub min_efficiency: f64,
    pub max_efficiency: f64,
    pub anchors: Vec<PhysicsAnchor>,
    pub anchor_replicas: usize,
    pub min_samples: usize,
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub seed: u64,
}

impl Default for RangeModelConfig {
    fn default() -> Self {
        Self {
            min_speed_kmh: MIN_TRAINING_SPEED_KMH,
            max_speed_kmh: MAX_TRAINING_SPEED_KMH,
            min_efficiency: MIN_TRAINING_EFFICIENCY,
            max_efficiency: MAX_TRAINING_EFFICIENCY,
            anchors: PHYSICS_ANCHORS.to_vec(),
            anchor_replicas: ANCHOR_REPLICAS,
            min_samples: MIN_RANGE_SAMPLES,
            learning_rate: 0.1,
            epochs: 500,
            batch_size: 64,
            seed: 42,
        }
    }
}

impl RangeModelConfig {
    fn training(&self) -> TrainingConfig {
        TrainingConfig {
            optimizer: OptimizerKind::Adam,
            learning_rate: self.learning_rate,
            epochs: self.epochs,
            batch_size: self.batch_size,
            seed: self.seed,
        }
    }
}

/// Canonical driving profiles used for the range readout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumIter)]
pub enum ScenarioKind {
    City,
    Mixed,
    Highway,
}

impl ScenarioKind {
    pub fn speed_kmh(&self) -> f64 {
        match self {
            Self::City => 30.0,
            Self::Mixed => 70.0,
            Self::Highway => 100.0,
        }
    }

    pub fn distance_km(&self) -> f64 {
        match self {
            Self::City => 15.0,
            Self::Mixed => 35.0,
            Self::Highway => 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeScenario {
    pub name: ScenarioKind,
    pub speed_kmh: f64,
    pub distance_km: f64,
    /// kWh/100km
    pub efficiency: f64,
    pub range_km: f64,
}

/// Fitted weights with the moments their inputs were normalized with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedRange {
    pub regression: LinearRegressionModel,
    pub scaler: Standardizer,
}

/// Immutable range model value. Produced by [`train`], threaded by the
/// caller into [`RangeModel::predict`] and [`RangeModel::scenarios`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RangeModel {
    pub trained: Option<TrainedRange>,
}

impl RangeModel {
    pub fn untrained() -> Self {
        Self::default()
    }

    pub fn is_trained(&self) -> bool {
        self.trained.is_some()
    }

    fn has_expected_shape(trained: &TrainedRange) -> bool {
        trained.regression.input_dim() == RANGE_FEATURES.len()
            && trained.scaler.width() == RANGE_FEATURES.len()
    }

    /// Drop weights that do not accept the two range features, e.g. a
    /// cached model restored from an older layout.
    pub fn sanitized(self) -> Self {
        match &self.trained {
            Some(trained) if !Self::has_expected_shape(trained) => {
                warn!(
                    input_dim = trained.regression.input_dim(),
                    "Stale range model shape, resetting to untrained"
                );
                Self::untrained()
            }
            _ => self,
        }
    }

    /// Predicted consumption (kWh/100km), clamped to the plausible band.
    pub fn predict(&self, speed_kmh: f64, distance_km: f64) -> f64 {
        let Some(trained) = &self.trained else {
            return FALLBACK_EFFICIENCY;
        };
        if !Self::has_expected_shape(trained) {
            warn!("Range model shape mismatch, using fallback efficiency");
            return FALLBACK_EFFICIENCY;
        }

        let raw = trained
            .scaler
            .transform(&[speed_kmh * speed_kmh, distance_km])
            .and_then(|x| trained.regression.predict(&x));

        match raw {
            Ok(value) if value.is_finite() => {
                value.clamp(MIN_PREDICTED_EFFICIENCY, MAX_PREDICTED_EFFICIENCY)
            }
            Ok(_) => FALLBACK_EFFICIENCY,
            Err(e) => {
                warn!(error = %e, "Range inference failed, using fallback efficiency");
                FALLBACK_EFFICIENCY
            }
        }
    }

    /// City, mixed and highway range for a battery of `battery_capacity_kwh`
    /// at `soh_percent` health.
    pub fn scenarios(&self, battery_capacity_kwh: f64, soh_percent: f64) -> Vec<RangeScenario> {
        let usable = battery_capacity_kwh * soh_percent / 100.0;
        ScenarioKind::iter()
            .map(|kind| {
                let efficiency = self.predict(kind.speed_kmh(), kind.distance_km());
                RangeScenario {
                    name: kind,
                    speed_kmh: kind.speed_kmh(),
                    distance_km: kind.distance_km(),
                    efficiency,
                    range_km: range_km(usable, efficiency),
                }
            })
            .collect()
    }
}

/// Distance covered by `usable_kwh` at `efficiency` kWh/100km; zero when
/// either input is not a positive finite number.
pub fn range_km(usable_kwh: f64, efficiency: f64) -> f64 {
    if usable_kwh > 0.0 && efficiency > 0.0 && usable_kwh.is_finite() && efficiency.is_finite() {
        usable_kwh / efficiency * 100.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone)]
pub struct RangeTraining {
    pub model: RangeModel,
    pub report: TrainingReport,
}

impl RangeTraining {
    fn untrained() -> Self {
        Self {
            model: RangeModel::untrained(),
            report: TrainingReport::untrained(),
        }
    }
}

/// `[speed², distance]` rows and efficiency labels for the trips that look
/// like moving traffic.
fn trip_samples(trips: &[Trip], config: &RangeModelConfig) -> (Vec<Vec<f64>>, Vec<f64>) {
    trips
        .iter()
        .filter(|t| t.is_measurable())
        .filter_map(|t| Some((t.average_speed_kmh()?, t.efficiency()?, t.distance_km)))
        .filter(|(speed, eff, _)| {
            (config.min_speed_kmh..=config.max_speed_kmh).contains(speed)
                && (config.min_efficiency..=config.max_efficiency).contains(eff)
        })
        .map(|(speed, eff, distance)| (vec![speed * speed, distance], eff))
        .unzip()
}

/// Fit a fresh range model on a trip history.
///
/// Never fails: too few samples or a degenerate fit yield an untrained model
/// and `{loss: 0, samples: 0}`.
pub fn train(trips: &[Trip], config: &RangeModelConfig) -> RangeTraining {
    let (mut features, mut targets) = trip_samples(trips, config);
    let real_samples = features.len();

    for anchor in &config.anchors {
        for _ in 0..config.anchor_replicas {
            features.push(vec![anchor.speed_kmh * anchor.speed_kmh, anchor.distance_km]);
            targets.push(anchor.efficiency);
        }
    }

    if features.len() < config.min_samples {
        debug!(
            samples = features.len(),
            required = config.min_samples,
            "Not enough samples to train range model"
        );
        return RangeTraining::untrained();
    }

    match fit(features, targets, config) {
        Ok((trained, loss)) => {
            let samples = trained.regression.metadata.training_samples;
            info!(samples, real_samples, loss, "Range model trained");
            RangeTraining {
                model: RangeModel {
                    trained: Some(trained),
                },
                report: TrainingReport { loss, samples },
            }
        }
        Err(e) => {
            warn!(error = %e, "Range model training failed");
            RangeTraining::untrained()
        }
    }
}

fn fit(
    features: Vec<Vec<f64>>,
    targets: Vec<f64>,
    config: &RangeModelConfig,
) -> Result<(TrainedRange, f64), TrainingError> {
    let scaler = Standardizer::fit(&features)?;
    let dataset = TrainingDataset::new(scaler.transform_all(&features)?, targets)?;
    let names = RANGE_FEATURES.iter().map(|s| s.to_string()).collect();
    let outcome = ModelTrainer::new(config.training()).fit_linear(&dataset, names)?;

    let mut regression = outcome.model;
    // Drag only ever adds consumption as speed rises
    if regression.coefficients[0] < 0.0 {
        debug!(
            coefficient = regression.coefficients[0],
            "Clamping negative speed coefficient"
        );
        regression.coefficients[0] = 0.0;
    }

    Ok((TrainedRange { regression, scaler }, outcome.loss))
}

/// [`train`] on a blocking worker so the caller stays responsive.
pub async fn train_async(
    trips: Vec<Trip>,
    config: RangeModelConfig,
) -> Result<RangeTraining, TrainingError> {
    Ok(tokio::task::spawn_blocking(move || train(&trips, &config)).await?)
}
