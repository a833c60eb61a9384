use anyhow::Result;
use figment::{providers::{Env, Format, Toml}, Figment};
use serde::Deserialize;
use std::path::PathBuf;

use crate::health::HealthConfig;
use crate::ml::{RangeModelConfig, SohModelConfig};
use crate::optimizer::SchedulerConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub range: RangeModelConfig,
    pub soh: SohModelConfig,
    pub scheduler: SchedulerConfig,
    pub health: HealthConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataConfig {
    /// JSON export with settings, trips and charges
    pub path: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file("config/default.toml"))
                .merge(Env::prefixed("EVI__").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        Ok(figment.extract()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_sections_use_defaults() {
        let cfg = Config::from_figment(Figment::new()).unwrap();
        assert_eq!(cfg.range.epochs, 500);
        assert_eq!(cfg.soh.epochs, 300);
        assert_eq!(cfg.health.soh_warning_percent, 85.0);
        assert!(cfg.data.path.is_none());
    }

    #[test]
    fn test_toml_overrides_single_knob() {
        let cfg = Config::from_figment(Figment::new().merge(Toml::string(
            r#"
            [scheduler]
            weekend_score_weight = 3.0

            [data]
            path = "history.json"
            "#,
        )))
        .unwrap();
        assert_eq!(cfg.scheduler.weekend_score_weight, 3.0);
        assert_eq!(cfg.scheduler.weekday_score_weight, 0.5);
        assert_eq!(cfg.data.path, Some(PathBuf::from("history.json")));
    }
}
