// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/envwatch

//! Configuration module

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::MonitorError;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level
    pub log_level: String,

    /// Simulator configuration
    pub simulator: SimulatorConfig,

    /// Model configuration
    pub model: ModelConfig,

    /// Forecast configuration
    pub forecast: ForecastConfig,

    /// External weather source
    pub weather: WeatherConfig,

    /// Database configuration
    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            simulator: SimulatorConfig::default(),
            model: ModelConfig::default(),
            forecast: ForecastConfig::default(),
            weather: WeatherConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Config {
    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let config = Self::from_toml(&std::fs::read_to_string(path)?)
            .with_context(|| format!("invalid configuration in {:?}", path))?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Validate, then write the configuration, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load the file at `path`, writing the defaults there when it is missing
    pub fn load_or_create(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content)
                .with_context(|| format!("invalid configuration in {:?}", path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save(path)?;
                Ok(config)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Check every section's ranges
    pub fn validate(&self) -> std::result::Result<(), MonitorError> {
        self.simulator.validate()?;
        self.model.validate()?;
        self.forecast.validate()?;
        self.weather.validate()
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("envwatch"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

/// Longest accepted spacing between simulated readings
pub const MAX_INTERVAL_SECS: i64 = 86_400;

/// Longest accepted weather cache window
pub const MAX_CACHE_WINDOW_MINUTES: u64 = 1_440;

fn invalid(message: String) -> MonitorError {
    MonitorError::InvalidParameter(message)
}

/// Check that an anomaly probability lies in [0, 1]
pub fn validate_anomaly_probability(p: f64) -> std::result::Result<(), MonitorError> {
    if (0.0..=1.0).contains(&p) {
        Ok(())
    } else {
        Err(invalid(format!("anomaly_probability must be in [0, 1], got {}", p)))
    }
}

/// Check that a contamination lies in (0, 0.5]
pub fn validate_contamination(c: f64) -> std::result::Result<(), MonitorError> {
    if c > 0.0 && c <= 0.5 {
        Ok(())
    } else {
        Err(invalid(format!("contamination must be in (0, 0.5], got {}", c)))
    }
}

/// Synthetic source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Random walk seed
    pub seed: u64,

    /// Readings generated when a session starts
    pub initial_count: usize,

    /// Probability of a spike per reading
    pub anomaly_probability: f64,

    /// Seconds between simulated timestamps
    pub interval_secs: i64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            initial_count: 50,
            anomaly_probability: 0.05,
            interval_secs: 60,
        }
    }
}

impl SimulatorConfig {
    fn validate(&self) -> std::result::Result<(), MonitorError> {
        validate_anomaly_probability(self.anomaly_probability)?;
        if !(1..=MAX_INTERVAL_SECS).contains(&self.interval_secs) {
            return Err(invalid(format!(
                "interval_secs must be in [1, {}], got {}",
                MAX_INTERVAL_SECS, self.interval_secs
            )));
        }
        Ok(())
    }
}

/// Analytics model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Expected fraction of anomalous readings
    pub contamination: f64,

    /// Reserved; no code path reads it
    pub lookback_window: usize,

    /// Seed for the isolation forest, independent of the reading source
    pub forest_seed: u64,

    /// Trees in the isolation forest
    pub n_estimators: usize,

    /// Subsample size per tree
    pub max_samples: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            contamination: 0.1,
            lookback_window: 20,
            forest_seed: 42,
            n_estimators: 100,
            max_samples: 256,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> std::result::Result<(), MonitorError> {
        validate_contamination(self.contamination)?;
        if self.lookback_window == 0 {
            return Err(invalid("lookback_window must be at least 1".to_string()));
        }
        if self.lookback_window != ModelConfig::default().lookback_window {
            warn!("lookback_window={} is accepted but unused", self.lookback_window);
        }
        if self.n_estimators == 0 {
            return Err(invalid("n_estimators must be at least 1".to_string()));
        }
        if self.max_samples < 2 {
            return Err(invalid(format!(
                "max_samples must be at least 2, got {}",
                self.max_samples
            )));
        }
        Ok(())
    }
}

/// Forecast configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Readings to forecast past the series
    pub steps_ahead: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self { steps_ahead: 5 }
    }
}

impl ForecastConfig {
    fn validate(&self) -> std::result::Result<(), MonitorError> {
        if self.steps_ahead == 0 {
            return Err(invalid("steps_ahead must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// External weather service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    /// Use the weather service instead of the simulator
    pub enabled: bool,

    /// OpenWeatherMap API key
    pub api_key: String,

    /// City queried
    pub city: String,

    /// API root
    pub base_url: String,

    /// Minutes a real fetch is reused before calling the service again
    pub cache_window_minutes: u64,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Delay between fetches inside a batch
    pub request_pacing_ms: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            city: "London".to_string(),
            base_url: "https://api.openweathermap.org/data/2.5".to_string(),
            cache_window_minutes: 10,
            timeout_secs: 5,
            request_pacing_ms: 500,
        }
    }
}

impl WeatherConfig {
    fn validate(&self) -> std::result::Result<(), MonitorError> {
        if self.enabled && self.api_key.is_empty() {
            return Err(invalid("weather source enabled without an api_key".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(invalid("timeout_secs must be positive".to_string()));
        }
        if self.cache_window_minutes > MAX_CACHE_WINDOW_MINUTES {
            return Err(invalid(format!(
                "cache_window_minutes must be at most {}, got {}",
                MAX_CACHE_WINDOW_MINUTES, self.cache_window_minutes
            )));
        }
        Ok(())
    }

    pub fn cache_window(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache_window_minutes.saturating_mul(60))
    }

    pub fn pacing(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_pacing_ms)
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Enable database storage
    pub enabled: bool,

    /// Database path
    pub path: PathBuf,

    /// Retention period in days
    pub retention_days: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("./data/sensor_data.db"),
            retention_days: 30,
        }
    }
}
