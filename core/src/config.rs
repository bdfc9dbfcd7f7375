/// Configuration for the task queue core. Layers a TOML file, then
/// environment variables (`DESCARTES_QUEUE_*`), then caller-supplied
/// overrides (e.g. CLI flags), mirroring the layered-override/fail-fast
/// `validate()` convention used elsewhere in this codebase's config loader.
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, ConfigResult};
use crate::scorer::ScoringWeights;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VacuumMode {
    Never,
    Conditional,
    Always,
}

impl Default for VacuumMode {
    fn default() -> Self {
        VacuumMode::Conditional
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: String,
    pub vacuum_mode: VacuumMode,
    pub scoring_weights: ScoringWeights,
    pub deadline_horizon_seconds: i64,
    pub retry_max: u32,
    pub retry_initial_backoff_ms: u64,
    pub retry_backoff_multiplier: f64,
    pub request_timeout_seconds: u64,
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "queue.db".to_string(),
            vacuum_mode: VacuumMode::default(),
            scoring_weights: ScoringWeights::default(),
            deadline_horizon_seconds: 86_400,
            retry_max: 2,
            retry_initial_backoff_ms: 50,
            retry_backoff_multiplier: 4.0,
            request_timeout_seconds: 30,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Loads `path` if given (or `$DESCARTES_QUEUE_CONFIG` if not), falling
    /// back to defaults when no file is present, then applies a handful of
    /// environment overrides, then validates.
    pub fn load(path: Option<&Path>) -> ConfigResult<Config> {
        let resolved_path = path
            .map(|p| p.to_path_buf())
            .or_else(|| std::env::var("DESCARTES_QUEUE_CONFIG").ok().map(Into::into));

        let mut config = match resolved_path {
            Some(p) if p.exists() => {
                let contents = std::fs::read_to_string(&p).map_err(|source| ConfigError::Read {
                    path: p.display().to_string(),
                    source,
                })?;
                toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: p.display().to_string(),
                    source,
                })?
            }
            _ => Config::default(),
        };

        if let Ok(db_path) = std::env::var("DESCARTES_QUEUE_DB_PATH") {
            config.db_path = db_path;
        }
        if let Ok(level) = std::env::var("DESCARTES_QUEUE_LOG_LEVEL") {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !self.scoring_weights.is_valid() {
            return Err(ConfigError::Invalid(format!(
                "scoring_weights must sum to 1.0 (got {})",
                self.scoring_weights.sum()
            )));
        }
        if self.deadline_horizon_seconds <= 0 {
            return Err(ConfigError::Invalid(
                "deadline_horizon_seconds must be positive".to_string(),
            ));
        }
        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_seconds must be positive".to_string(),
            ));
        }
        if self.retry_backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry_backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        Ok(())
    }

    /// `conditional` vacuuming triggers once at least this many tasks have
    /// been pruned, and auto-downgrades to `never` above the high-water mark
    /// to avoid a long exclusive lock on a very large prune.
    pub fn should_vacuum(&self, pruned_count: u64) -> bool {
        match self.vacuum_mode {
            VacuumMode::Never => false,
            VacuumMode::Always => true,
            VacuumMode::Conditional => (100..10_000).contains(&pruned_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn bad_scoring_weights_fail_validation() {
        let mut config = Config::default();
        config.scoring_weights.w_base = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn conditional_vacuum_downgrades_above_high_water_mark() {
        let config = Config::default();
        assert!(!config.should_vacuum(50));
        assert!(config.should_vacuum(500));
        assert!(!config.should_vacuum(20_000));
    }

    #[test]
    fn parses_from_toml() {
        let toml_str = r#"
            db_path = "/tmp/custom.db"
            deadline_horizon_seconds = 3600
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.db_path, "/tmp/custom.db");
        assert_eq!(config.deadline_horizon_seconds, 3600);
        // scoring_weights uses its Default since absent from the TOML.
        assert!(config.scoring_weights.is_valid());
    }
}
