use anyhow::{Context, Result};
use chrono::Utc;
use ev_insight::config::Config;
use ev_insight::controller::{Dataset, InsightController, RawDataset};
use ev_insight::telemetry::init_tracing;
use std::path::PathBuf;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cfg = Config::load()?;

    let path: PathBuf = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| cfg.data.path.clone())
        .context("no dataset given: pass a JSON file or set EVI__DATA__PATH")?;

    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let raw: RawDataset =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    let dataset = Dataset::try_from(raw)?;
    info!(path = %path.display(), ingestion = ?dataset.ingestion, "dataset loaded");

    let report = InsightController::new(cfg)
        .run_with_history(dataset, Utc::now())
        .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
