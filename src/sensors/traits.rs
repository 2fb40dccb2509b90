// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/envwatch

//! Reading types and the reading source trait

use std::fmt;
use std::ops::Deref;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

/// Measured quantities carried by every reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Temperature, // °C
    Humidity,    // %
    Pressure,    // hPa
}

impl Metric {
    /// All metrics in feature-column order
    pub const ALL: [Metric; 3] = [Metric::Temperature, Metric::Humidity, Metric::Pressure];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Humidity => "humidity",
            Metric::Pressure => "pressure",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::Temperature => "°C",
            Metric::Humidity => "%",
            Metric::Pressure => "hPa",
        }
    }

    /// Valid range for simulated readings and for forecasts
    pub fn bounds(&self) -> Bounds {
        match self {
            Metric::Temperature => Bounds::new(-10.0, 50.0),
            Metric::Humidity => Bounds::new(0.0, 100.0),
            Metric::Pressure => Bounds::new(950.0, 1050.0),
        }
    }

    /// Wider range accepted from the external weather service
    pub fn extended_bounds(&self) -> Bounds {
        match self {
            Metric::Temperature => Bounds::new(-50.0, 60.0),
            Metric::Humidity => Bounds::new(0.0, 100.0),
            Metric::Pressure => Bounds::new(850.0, 1085.0),
        }
    }

    /// Parse a metric from its lowercase name
    pub fn from_name(name: &str) -> Option<Metric> {
        Metric::ALL.into_iter().find(|m| m.name() == name)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Closed interval used for clamping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Round to two decimal digits
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// A single environmental measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
}

impl Reading {
    pub fn new(timestamp: DateTime<Utc>, temperature: f64, humidity: f64, pressure: f64) -> Self {
        Self {
            timestamp,
            temperature,
            humidity,
            pressure,
        }
    }

    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Temperature => self.temperature,
            Metric::Humidity => self.humidity,
            Metric::Pressure => self.pressure,
        }
    }

    /// Values in feature-column order
    pub fn features(&self) -> [f64; 3] {
        [self.temperature, self.humidity, self.pressure]
    }

    /// True when every value lies inside `Metric::bounds`
    pub fn in_bounds(&self) -> bool {
        Metric::ALL.iter().all(|m| m.bounds().contains(self.value(*m)))
    }
}

/// Ordered, append-only sequence of readings for one session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Series {
    readings: Vec<Reading>,
}

impl Series {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            readings: Vec::with_capacity(capacity),
        }
    }

    /// Append a reading. Out-of-order timestamps are logged, not rejected;
    /// uniqueness is the persistence layer's job.
    pub fn push(&mut self, reading: Reading) {
        if let Some(last) = self.readings.last() {
            if reading.timestamp <= last.timestamp {
                warn!(
                    "Reading at {} does not follow {}",
                    reading.timestamp, last.timestamp
                );
            }
        }
        self.readings.push(reading);
    }

    pub fn as_slice(&self) -> &[Reading] {
        &self.readings
    }

    /// Column of values for one metric
    pub fn values(&self, metric: Metric) -> Vec<f64> {
        self.readings.iter().map(|r| r.value(metric)).collect()
    }

    /// Last `n` readings (or all of them when fewer)
    pub fn tail(&self, n: usize) -> &[Reading] {
        let start = self.readings.len().saturating_sub(n);
        &self.readings[start..]
    }

    pub fn into_inner(self) -> Vec<Reading> {
        self.readings
    }
}

impl Deref for Series {
    type Target = [Reading];

    fn deref(&self) -> &[Reading] {
        &self.readings
    }
}

impl From<Vec<Reading>> for Series {
    fn from(readings: Vec<Reading>) -> Self {
        Self { readings }
    }
}

impl FromIterator<Reading> for Series {
    fn from_iter<I: IntoIterator<Item = Reading>>(iter: I) -> Self {
        Self {
            readings: iter.into_iter().collect(),
        }
    }
}

/// Result of a batch request: the readings produced plus the failed attempts
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub series: Series,
    pub failed: usize,
}

/// Anything that can produce readings on demand
#[async_trait]
pub trait ReadingSource: Send {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Produce one reading. `anomaly_probability` is in [0, 1]; sources that
    /// do not inject anomalies ignore it.
    async fn next_reading(&mut self, anomaly_probability: f64) -> Result<Reading>;

    /// Restore the initial state and reseed the source's randomness
    fn reset(&mut self, seed: u64);

    /// Produce `count` readings. Individual failures are counted and skipped.
    async fn generate_batch(&mut self, count: usize, anomaly_probability: f64) -> BatchOutcome {
        let mut outcome = BatchOutcome {
            series: Series::with_capacity(count),
            failed: 0,
        };

        for _ in 0..count {
            match self.next_reading(anomaly_probability).await {
                Ok(reading) => outcome.series.push(reading),
                Err(e) => {
                    warn!("{}: reading skipped: {}", self.name(), e);
                    outcome.failed += 1;
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reading_at(secs: i64, temperature: f64) -> Reading {
        Reading::new(Utc.timestamp_opt(secs, 0).unwrap(), temperature, 50.0, 1013.0)
    }

    #[test]
    fn test_metric_names_round_trip() {
        for metric in Metric::ALL {
            assert_eq!(Metric::from_name(metric.name()), Some(metric));
        }
        assert_eq!(Metric::from_name("wind"), None);
    }

    #[test]
    fn test_bounds_clamp() {
        let b = Metric::Humidity.bounds();
        assert_eq!(b.clamp(130.0), 100.0);
        assert_eq!(b.clamp(-3.0), 0.0);
        assert_eq!(b.clamp(42.5), 42.5);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(20.456), 20.46);
        assert_eq!(round2(-3.333), -3.33);
        assert_eq!(round2(1013.0), 1013.0);
    }

    #[test]
    fn test_series_tail_and_values() {
        let series: Series = (0..15).map(|i| reading_at(i, i as f64)).collect();
        assert_eq!(series.tail(10).len(), 10);
        assert_eq!(series.tail(10)[0].temperature, 5.0);
        assert_eq!(series.tail(100).len(), 15);
        assert_eq!(series.values(Metric::Temperature)[14], 14.0);
    }

    #[test]
    fn test_series_serializes_as_array() {
        let series: Series = vec![reading_at(0, 21.0)].into();
        let json = serde_json::to_value(&series).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["temperature"], 21.0);
    }
}
