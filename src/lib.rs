// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/envwatch

//! envwatch - Environmental Sensor Monitoring
//!
//! Temperature, humidity and pressure monitoring with:
//! - Reproducible sensor simulation with injected spikes
//! - OpenWeatherMap-backed readings with a cache window
//! - Isolation forest anomaly detection on standardized features
//! - Per-metric linear trend forecasting and trend classification
//! - Optional SQLite persistence
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │                      Session                       │
//! ├────────────────────────────────────────────────────┤
//! │  ┌───────────────┐    ┌─────────────────────────┐  │
//! │  │ ReadingSource │ →  │     MonitoringModel     │  │
//! │  │  simulator /  │    │  scaler + forest +      │  │
//! │  │  weather      │    │  per-metric trends      │  │
//! │  └───────────────┘    └─────────────────────────┘  │
//! │          ↓                         ↓               │
//! │  ┌──────────────────────────────────────────────┐  │
//! │  │              Database (optional)             │  │
//! │  └──────────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────┘
//! ```

pub mod analysis;
pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod sensors;

// Re-exports for convenience
pub use analysis::{MonitoringModel, PredictionSet, Trend};
pub use config::Config;
pub use core::{InitReport, Session, SessionState};
pub use db::{Database, ReadingStore};
pub use error::{MonitorError, Result};
pub use sensors::{Metric, Reading, ReadingSource, SensorSimulator, Series, WeatherSource};

/// envwatch version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// envwatch name
pub const NAME: &str = "envwatch";
