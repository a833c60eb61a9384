//! Battery state-of-health predictor
//!
//! Each deep charging session implies a battery capacity
//! (`kWh delivered / fraction of SoC gained`). The SoH estimate blends a
//! robust weighted median of those capacities with a time-trend regression.

use chrono::{NaiveDate, NaiveDateTime};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::training::{ModelTrainer, OptimizerKind, TrainingConfig, TrainingDataset};
use super::{LinearRegressionModel, Standardizer, TrainingError};
use crate::domain::Charge;
use crate::stats::round_to;

/// Reported whenever there is not enough evidence for an estimate (%)
pub const DEFAULT_SOH_PERCENT: f64 = 100.0;

/// Minimum SoC gain for a session to count as deep (percentage points)
pub const MIN_SOH_PERCENT_ADDED: f64 = 5.0;
/// Stricter gain used for chart points (percentage points)
pub const MIN_CHART_PERCENT_ADDED: f64 = 10.0;
/// Smallest SoC gain fraction accepted as a denominator
pub const MIN_PERCENT_ADDED_FRACTION: f64 = 0.01;
/// Physical sanity band for implied capacity, as a ratio of nominal
pub const MIN_CAPACITY_RATIO: f64 = 0.5;
pub const MAX_CAPACITY_RATIO: f64 = 1.5;
pub const MIN_SOH_SAMPLES: usize = 3;

/// Regression/median disagreement above which the regression is assumed to
/// be chasing seasonal noise
pub const MAX_TREND_DEVIATION: f64 = 0.05;
pub const NOISY_TREND_MEDIAN_WEIGHT: f64 = 0.9;
pub const STABLE_TREND_MEDIAN_WEIGHT: f64 = 0.7;

pub const SOH_FEATURES: [&str; 1] = ["days_since_first_charge"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SohModelConfig {
    pub min_percent_added: f64,
    pub chart_min_percent_added: f64,
    pub min_capacity_ratio: f64,
    pub max_capacity_ratio: f64,
    pub min_samples: usize,
    pub max_trend_deviation: f64,
    pub noisy_trend_median_weight: f64,
    pub stable_trend_median_weight: f64,
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub seed: u64,
}

impl Default for SohModelConfig {
    fn default() -> Self {
        Self {
            min_percent_added: MIN_SOH_PERCENT_ADDED,
            chart_min_percent_added: MIN_CHART_PERCENT_ADDED,
            min_capacity_ratio: MIN_CAPACITY_RATIO,
            max_capacity_ratio: MAX_CAPACITY_RATIO,
            min_samples: MIN_SOH_SAMPLES,
            max_trend_deviation: MAX_TREND_DEVIATION,
            noisy_trend_median_weight: NOISY_TREND_MEDIAN_WEIGHT,
            stable_trend_median_weight: STABLE_TREND_MEDIAN_WEIGHT,
            learning_rate: 0.1,
            epochs: 300,
            batch_size: 32,
            seed: 42,
        }
    }
}

impl SohModelConfig {
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

/// Capacity implied by one charging session
#[derive(Debug, Clone, PartialEq)]
struct CapacitySample {
    at: NaiveDateTime,
    date: NaiveDate,
    implied_capacity_kwh: f64,
    /// Fraction of the battery the session filled (0-1)
    fraction: f64,
}

fn days_between(origin: NaiveDateTime, at: NaiveDateTime) -> f64 {
    (at - origin).num_seconds() as f64 / 86_400.0
}

/// Chronological capacity samples from sessions adding at least
/// `min_percent_added` points and passing the physical sanity band.
fn capacity_samples(
    charges: &[Charge],
    nominal_capacity_kwh: f64,
    min_percent_added: f64,
    config: &SohModelConfig,
) -> Vec<CapacitySample> {
    let min_capacity = nominal_capacity_kwh * config.min_capacity_ratio;
    let max_capacity = nominal_capacity_kwh * config.max_capacity_ratio;

    let mut samples: Vec<CapacitySample> = charges
        .iter()
        .filter(|c| c.kwh_charged > 0.0 && c.percent_added() >= min_percent_added)
        .filter_map(|c| {
            let fraction = c.percent_added() / 100.0;
            if fraction < MIN_PERCENT_ADDED_FRACTION {
                return None;
            }
            let implied = c.kwh_charged / fraction;
            (min_capacity..=max_capacity)
                .contains(&implied)
                .then(|| CapacitySample {
                    at: c.local_datetime(),
                    date: c.date,
                    implied_capacity_kwh: implied,
                    fraction,
                })
        })
        .collect();
    samples.sort_by_key(|s| s.at);
    samples
}

/// Weighted median: the smallest value at which the cumulative weight
/// reaches half of the total.
pub fn weighted_median(values: &[(f64, f64)]) -> Option<f64> {
    let mut sorted: Vec<(f64, f64)> = values
        .iter()
        .copied()
        .filter(|(v, w)| v.is_finite() && w.is_finite() && *w > 0.0)
        .collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by_key(|(v, _)| OrderedFloat(*v));

    let half = sorted.iter().map(|(_, w)| w).sum::<f64>() / 2.0;
    let mut cumulative = 0.0;
    for (value, weight) in &sorted {
        cumulative += weight;
        if cumulative >= half {
            return Some(*value);
        }
    }
    sorted.last().map(|(v, _)| *v)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedSoh {
    pub regression: LinearRegressionModel,
    pub scaler: Standardizer,
    /// Session the day offsets count from
    pub origin: NaiveDateTime,
}

/// Immutable capacity-trend model value returned by [`train_soh`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SohModel {
    pub trained: Option<TrainedSoh>,
}

impl SohModel {
    pub fn untrained() -> Self {
        Self::default()
    }

    pub fn is_trained(&self) -> bool {
        self.trained.is_some()
    }

    /// Trend capacity (kWh) at a moment, `None` when untrained.
    pub fn capacity_at(&self, at: NaiveDateTime) -> Option<f64> {
        let trained = self.trained.as_ref()?;
        let offset = days_between(trained.origin, at);
        let result = trained
            .scaler
            .transform(&[offset])
            .and_then(|x| trained.regression.predict(&x));
        match result {
            Ok(capacity) if capacity.is_finite() => Some(capacity),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "SoH inference failed");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SohReport {
    pub loss: f64,
    pub samples: usize,
    #[serde(rename = "predictedSoH")]
    pub predicted_soh: f64,
}

impl SohReport {
    pub fn neutral() -> Self {
        Self {
            loss: 0.0,
            samples: 0,
            predicted_soh: DEFAULT_SOH_PERCENT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SohTraining {
    pub model: SohModel,
    pub report: SohReport,
}

impl SohTraining {
    fn neutral() -> Self {
        Self {
            model: SohModel::untrained(),
            report: SohReport::neutral(),
        }
    }
}

/// Estimate battery SoH (%) from charging sessions.
///
/// Never fails: an invalid nominal capacity or too few usable sessions yield
/// `predictedSoH: 100`.
pub fn train_soh(
    charges: &[Charge],
    nominal_capacity_kwh: f64,
    config: &SohModelConfig,
) -> SohTraining {
    if !(nominal_capacity_kwh > 0.0 && nominal_capacity_kwh.is_finite()) {
        warn!(nominal_capacity_kwh, "Invalid nominal capacity, SoH unknown");
        return SohTraining::neutral();
    }

    let deep = charges
        .iter()
        .filter(|c| c.kwh_charged > 0.0 && c.percent_added() >= config.min_percent_added)
        .count();
    if deep < config.min_samples {
        debug!(deep, required = config.min_samples, "Not enough deep charges for SoH");
        return SohTraining::neutral();
    }

    let samples = capacity_samples(
        charges,
        nominal_capacity_kwh,
        config.min_percent_added,
        config,
    );
    if samples.len() < config.min_samples {
        debug!(
            deep,
            plausible = samples.len(),
            "Not enough plausible charges for SoH"
        );
        return SohTraining::neutral();
    }

    let weighted: Vec<(f64, f64)> = samples
        .iter()
        .map(|s| (s.implied_capacity_kwh, s.fraction))
        .collect();
    let Some(median) = weighted_median(&weighted) else {
        return SohTraining::neutral();
    };

    let (model, loss, trend) = match fit(&samples, config) {
        Ok((trained, loss)) => {
            let model = SohModel {
                trained: Some(trained),
            };
            let trend = samples.last().and_then(|s| model.capacity_at(s.at));
            (model, loss, trend)
        }
        Err(e) => {
            warn!(error = %e, "SoH trend fit failed, using median only");
            (SohModel::untrained(), 0.0, None)
        }
    };

    let capacity = match trend {
        Some(trend) => {
            let deviation = (trend - median).abs() / median;
            let median_weight = if deviation > config.max_trend_deviation {
                config.noisy_trend_median_weight
            } else {
                config.stable_trend_median_weight
            };
            debug!(median, trend, deviation, median_weight, "Blending SoH estimate");
            median_weight * median + (1.0 - median_weight) * trend
        }
        None => median,
    };

    let predicted_soh = round_to(capacity / nominal_capacity_kwh * 100.0, 2);
    info!(samples = samples.len(), predicted_soh, loss, "SoH model trained");

    SohTraining {
        model,
        report: SohReport {
            loss,
            samples: samples.len(),
            predicted_soh,
        },
    }
}

fn fit(
    samples: &[CapacitySample],
    config: &SohModelConfig,
) -> Result<(TrainedSoh, f64), TrainingError> {
    let origin = samples.first().map(|s| s.at).ok_or(TrainingError::EmptyDataset)?;
    let features: Vec<Vec<f64>> = samples
        .iter()
        .map(|s| vec![days_between(origin, s.at)])
        .collect();
    let targets = samples.iter().map(|s| s.implied_capacity_kwh).collect();

    let scaler = Standardizer::fit(&features)?;
    let dataset = TrainingDataset::new(scaler.transform_all(&features)?, targets)?;
    let names = SOH_FEATURES.iter().map(|s| s.to_string()).collect();
    let outcome = ModelTrainer::new(config.training()).fit_linear(&dataset, names)?;

    Ok((
        TrainedSoh {
            regression: outcome.model,
            scaler,
            origin,
        },
        outcome.loss,
    ))
}

/// [`train_soh`] on a blocking worker.
pub async fn train_soh_async(
    charges: Vec<Charge>,
    nominal_capacity_kwh: f64,
    config: SohModelConfig,
) -> Result<SohTraining, TrainingError> {
    Ok(
        tokio::task::spawn_blocking(move || train_soh(&charges, nominal_capacity_kwh, &config))
            .await?,
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SohPoint {
    pub date: NaiveDate,
    pub day_offset: f64,
    pub soh_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SohChart {
    pub points: Vec<SohPoint>,
    pub trend: Vec<SohPoint>,
}

/// Per-session SoH for charting plus the model trend at the same offsets.
/// Empty when the model is untrained.
pub fn soh_data_points(
    model: &SohModel,
    charges: &[Charge],
    nominal_capacity_kwh: f64,
    config: &SohModelConfig,
) -> SohChart {
    let Some(trained) = &model.trained else {
        return SohChart::default();
    };
    if !(nominal_capacity_kwh > 0.0 && nominal_capacity_kwh.is_finite()) {
        return SohChart::default();
    }

    let samples = capacity_samples(
        charges,
        nominal_capacity_kwh,
        config.chart_min_percent_added,
        config,
    );

    let mut chart = SohChart::default();
    for sample in &samples {
        let day_offset = round_to(days_between(trained.origin, sample.at), 2);
        chart.points.push(SohPoint {
            date: sample.date,
            day_offset,
            soh_percent: round_to(sample.implied_capacity_kwh / nominal_capacity_kwh * 100.0, 2),
        });
        if let Some(capacity) = model.capacity_at(sample.at) {
            chart.trend.push(SohPoint {
                date: sample.date,
                day_offset,
                soh_percent: round_to(capacity / nominal_capacity_kwh * 100.0, 2),
            });
        }
    }
    chart
}
