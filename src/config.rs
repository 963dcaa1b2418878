use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{EtlError, Result};

/// Upstream API settings: endpoint, pagination bounds and the retry schedule.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    /// Dataset holding the station catalog.
    pub stations_dataset: String,
    pub timeout_seconds: u64,
    pub page_size: usize,
    /// Upper bound on pages fetched per station, against a buggy upstream
    /// serving an unbounded stream.
    pub max_pages: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://data.toulouse-metropole.fr/api/explore/v2.1/catalog/datasets"
                .to_string(),
            stations_dataset: "stations-meteo-en-place".to_string(),
            timeout_seconds: 30,
            page_size: 100,
            max_pages: 50,
            max_attempts: 4,
            backoff_base_ms: 250,
            backoff_cap_ms: 10_000,
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Validation bounds applied by the transformer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub temperature_min_c: f64,
    pub temperature_max_c: f64,
    pub pressure_min_pa: f64,
    pub pressure_max_pa: f64,
    /// Readings older than this are considered implausible.
    pub min_epoch: String,
    /// Tolerated clock skew for timestamps in the future, in seconds.
    pub clock_skew_seconds: i64,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            temperature_min_c: -60.0,
            temperature_max_c: 60.0,
            pressure_min_pa: 80_000.0,
            pressure_max_pa: 110_000.0,
            min_epoch: "2000-01-01T00:00:00Z".to_string(),
            clock_skew_seconds: 600,
        }
    }
}

/// Loader settings: target database and batch sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub db_path: String,
    pub batch_size: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            db_path: "database/weather.db".to_string(),
            batch_size: 50,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub upstream: UpstreamConfig,
    pub transform: TransformConfig,
    pub loader: LoaderConfig,
}

impl Config {
    /// Loads configuration from a TOML file, or falls back to defaults when
    /// the file does not exist.
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!("Failed to read config file '{}': {}", path, e))
        })?;
        let config: Config = toml::from_str(&content)?;
        if config.loader.batch_size == 0 {
            return Err(EtlError::Config("loader.batch_size must be > 0".to_string()));
        }
        if config.upstream.max_attempts == 0 {
            return Err(EtlError::Config("upstream.max_attempts must be > 0".to_string()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert!(config.upstream.max_attempts > 0);
        assert!(config.loader.batch_size > 0);
        assert!(config.transform.temperature_min_c < config.transform.temperature_max_c);
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let config: Config = toml::from_str(
            r#"
            [upstream]
            max_attempts = 2

            [loader]
            batch_size = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.upstream.max_attempts, 2);
        assert_eq!(config.loader.batch_size, 10);
        // Untouched sections keep their defaults
        assert_eq!(config.upstream.page_size, 100);
        assert_eq!(config.loader.db_path, "database/weather.db");
    }
}
