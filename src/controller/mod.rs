//! # Insight Controller
//!
//! Runs the whole analytics pipeline over one dataset: statistics, model
//! training (on blocking workers, concurrently), range scenarios, SoH chart,
//! weekly charging plan, charging advice and health checks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use validator::Validate;

use crate::config::Config;
use crate::domain::{
    Anomaly, Charge, ChargerType, RawCharge, RawTrip, Settings, Trip, ValidationError,
};
use crate::forecast::{DepartureOracle, HistoricalDepartureForecaster};
use crate::health::HealthMonitor;
use crate::ml::{
    self, range::train_async, soh::soh_data_points, soh::train_soh_async, RangeScenario,
    SohChart, SohReport, TrainingError, TrainingReport,
};
use crate::optimizer::{
    calculate_comfort_zone, calculate_cost_savings, calculate_seasonal_factor,
    charging_recommendation, find_smart_charging_windows, ChargingRecommendation, ComfortZone,
    CostSavings, SeasonalFactor, SmartChargingPlan,
};
use crate::stats::{process_trips, ProcessedData};

#[derive(Debug, Error)]
pub enum InsightError {
    #[error("Invalid settings: {0}")]
    Settings(#[from] validator::ValidationErrors),
    #[error("Invalid charger type '{id}': {source}")]
    ChargerType {
        id: String,
        #[source]
        source: validator::ValidationErrors,
    },
    #[error(transparent)]
    Training(#[from] TrainingError),
}

/// Dataset as read from an export, rows not yet validated
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDataset {
    #[serde(default)]
    pub settings: Option<Settings>,
    #[serde(default)]
    pub charger_types: Vec<ChargerType>,
    #[serde(default)]
    pub trips: Vec<RawTrip>,
    #[serde(default)]
    pub charges: Vec<RawCharge>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionSummary {
    pub trips_accepted: usize,
    pub trips_rejected: usize,
    pub charges_accepted: usize,
    pub charges_rejected: usize,
}

/// Validated input to a run
#[derive(Debug, Clone)]
pub struct Dataset {
    pub settings: Settings,
    pub trips: Vec<Trip>,
    pub charges: Vec<Charge>,
    pub ingestion: IngestionSummary,
}

impl Dataset {
    pub fn new(settings: Settings, trips: Vec<Trip>, charges: Vec<Charge>) -> Self {
        let ingestion = IngestionSummary {
            trips_accepted: trips.len(),
            charges_accepted: charges.len(),
            ..IngestionSummary::default()
        };
        Self {
            settings,
            trips,
            charges,
            ingestion,
        }
    }
}

/// Convert rows, logging and dropping the ones that fail validation.
fn accept_rows<R, T>(rows: Vec<R>, kind: &'static str) -> (Vec<T>, usize)
where
    T: TryFrom<R, Error = ValidationError>,
{
    let mut accepted = Vec::with_capacity(rows.len());
    let mut rejected = 0;
    for (index, row) in rows.into_iter().enumerate() {
        match T::try_from(row) {
            Ok(value) => accepted.push(value),
            Err(e) => {
                warn!(kind, index, error = %e, "Skipping invalid row");
                rejected += 1;
            }
        }
    }
    (accepted, rejected)
}

impl TryFrom<RawDataset> for Dataset {
    type Error = InsightError;

    fn try_from(raw: RawDataset) -> Result<Self, Self::Error> {
        let mut settings = raw.settings.unwrap_or_default();
        settings.validate()?;
        for charger in raw.charger_types {
            charger.validate().map_err(|source| InsightError::ChargerType {
                id: charger.id.clone(),
                source,
            })?;
            settings.charger_types.retain(|c| c.id != charger.id);
            settings.charger_types.push(charger);
        }

        let (trips, trips_rejected) = accept_rows::<RawTrip, Trip>(raw.trips, "trip");
        let (charges, charges_rejected) = accept_rows::<RawCharge, Charge>(raw.charges, "charge");

        Ok(Self {
            ingestion: IngestionSummary {
                trips_accepted: trips.len(),
                trips_rejected,
                charges_accepted: charges.len(),
                charges_rejected,
            },
            settings,
            trips,
            charges,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeInsight {
    pub training: TrainingReport,
    pub scenarios: Vec<RangeScenario>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SohInsight {
    pub report: SohReport,
    pub chart: SohChart,
}

/// Everything one run produces
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightReport {
    pub generated_at: DateTime<Utc>,
    /// Key under which an external cache may store the trained models
    pub fingerprint: String,
    pub ingestion: IngestionSummary,
    pub statistics: ProcessedData,
    pub range: RangeInsight,
    pub soh: SohInsight,
    pub charging_plan: SmartChargingPlan,
    pub cost_savings: CostSavings,
    pub recommendation: ChargingRecommendation,
    pub comfort_zone: Option<ComfortZone>,
    pub seasonal_factor: Option<SeasonalFactor>,
    pub anomalies: Vec<Anomaly>,
}

pub struct InsightController {
    cfg: Config,
    health: HealthMonitor,
}

impl InsightController {
    pub fn new(cfg: Config) -> Self {
        let health = HealthMonitor::new(cfg.health.clone());
        Self { cfg, health }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Run with the historical parking forecaster as departure oracle.
    pub async fn run_with_history(
        &self,
        dataset: Dataset,
        now: DateTime<Utc>,
    ) -> Result<InsightReport, InsightError> {
        let oracle =
            HistoricalDepartureForecaster::from_trips(&dataset.trips, dataset.settings.offset());
        self.run(dataset, Some(&oracle), now).await
    }

    pub async fn run(
        &self,
        dataset: Dataset,
        oracle: Option<&dyn DepartureOracle>,
        now: DateTime<Utc>,
    ) -> Result<InsightReport, InsightError> {
        let Dataset {
            settings,
            trips,
            charges,
            ingestion,
        } = dataset;
        info!(
            trips = trips.len(),
            charges = charges.len(),
            "Starting insight run"
        );

        let statistics = process_trips(&trips);
        let fingerprint = ml::training_fingerprint(&trips, &settings);

        let (range, soh) = tokio::join!(
            train_async(trips.clone(), self.cfg.range.clone()),
            train_soh_async(
                charges.clone(),
                settings.battery_capacity_kwh,
                self.cfg.soh.clone()
            ),
        );
        let (range, soh) = (range?, soh?);

        let scenarios = range
            .model
            .scenarios(settings.battery_capacity_kwh, settings.soh_percent);
        let chart = soh_data_points(
            &soh.model,
            &charges,
            settings.battery_capacity_kwh,
            &self.cfg.soh,
        );

        let charging_plan =
            find_smart_charging_windows(&trips, &settings, oracle, now, &self.cfg.scheduler)
                .await;
        let cost_savings = calculate_cost_savings(&charges, &settings);
        let today = now.with_timezone(&settings.offset()).date_naive();
        let recommendation = charging_recommendation(
            charging_plan.weekly_kwh,
            &settings,
            &charges,
            &cost_savings,
            today,
        );
        let comfort_zone = calculate_comfort_zone(&trips);
        let seasonal_factor = calculate_seasonal_factor(&statistics.monthly);
        let anomalies = self.health.check(&statistics, &settings, &charges, &trips);

        info!(
            %fingerprint,
            range_samples = range.report.samples,
            predicted_soh = soh.report.predicted_soh,
            windows = charging_plan.windows.len(),
            anomalies = anomalies.len(),
            "Insight run complete"
        );

        Ok(InsightReport {
            generated_at: now,
            fingerprint,
            ingestion,
            statistics,
            range: RangeInsight {
                training: range.report,
                scenarios,
            },
            soh: SohInsight {
                report: soh.report,
                chart,
            },
            charging_plan,
            cost_savings,
            recommendation,
            comfort_zone,
            seasonal_factor,
            anomalies,
        })
    }
}
