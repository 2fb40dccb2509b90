// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/envwatch

//! Sensor simulator - random walk with injected spikes

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use super::{round2, Metric, Reading, ReadingSource};
use crate::error::Result;

/// Initial walk state
const INITIAL_TEMPERATURE: f64 = 20.0;
const INITIAL_HUMIDITY: f64 = 50.0;
const INITIAL_PRESSURE: f64 = 1013.0;

/// Per-step standard deviations
const TEMPERATURE_STEP: f64 = 0.5;
const HUMIDITY_STEP: f64 = 2.0;
const PRESSURE_STEP: f64 = 0.3;

/// Produces a reproducible temperature/humidity/pressure random walk.
///
/// Each reading perturbs every metric by an independent Gaussian step. With
/// the requested probability a spike is added to temperature (+5..15 °C) or
/// humidity (+20..40 %), and only then is the state clamped to
/// [`Metric::bounds`]. The clamp is the only cap on spike size.
///
/// Timestamps run from `origin` in fixed `interval` steps so that a batch is
/// fully determined by the seed.
pub struct SensorSimulator<R = ChaCha8Rng> {
    rng: R,
    origin: DateTime<Utc>,
    interval: Duration,
    sequence: u64,

    // Simulation state
    temperature: f64,
    humidity: f64,
    pressure: f64,
}

/// Default timestamp origin for simulated series
pub fn default_origin() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Timestamp of the `k`-th reading on a clock, `None` past chrono's range
pub fn clock_timestamp(origin: DateTime<Utc>, interval: Duration, k: u64) -> Option<DateTime<Utc>> {
    let millis = interval.num_milliseconds().checked_mul(i64::try_from(k).ok()?)?;
    origin.checked_add_signed(Duration::try_milliseconds(millis)?)
}

/// Origin that makes the last of `count` readings land on `end`
pub fn origin_ending_at(end: DateTime<Utc>, count: usize, interval: Duration) -> Option<DateTime<Utc>> {
    let steps = i64::try_from(count.saturating_sub(1)).ok()?;
    let millis = interval.num_milliseconds().checked_mul(steps)?;
    end.checked_sub_signed(Duration::try_milliseconds(millis)?)
}

impl SensorSimulator<ChaCha8Rng> {
    pub fn new(seed: u64) -> Self {
        Self::with_rng(ChaCha8Rng::seed_from_u64(seed))
    }
}

impl<R: Rng> SensorSimulator<R> {
    /// Build a simulator around an explicit generator
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng,
            origin: default_origin(),
            interval: Duration::seconds(60),
            sequence: 0,
            temperature: INITIAL_TEMPERATURE,
            humidity: INITIAL_HUMIDITY,
            pressure: INITIAL_PRESSURE,
        }
    }

    /// Set the timestamp origin and spacing
    pub fn with_clock(mut self, origin: DateTime<Utc>, interval: Duration) -> Self {
        self.origin = origin;
        self.interval = interval;
        self
    }

    /// Current (unrounded) walk state
    pub fn state(&self) -> (f64, f64, f64) {
        (self.temperature, self.humidity, self.pressure)
    }

    /// Advance the walk by one step and emit the reading
    pub fn step(&mut self, anomaly_probability: f64) -> Reading {
        let mut temperature = self.temperature + self.gaussian(TEMPERATURE_STEP);
        let mut humidity = self.humidity + self.gaussian(HUMIDITY_STEP);
        let pressure = self.pressure + self.gaussian(PRESSURE_STEP);

        if self.rng.gen::<f64>() < anomaly_probability {
            if self.rng.gen::<f64>() < 0.5 {
                temperature += self.rng.gen_range(5.0..15.0);
            } else {
                humidity += self.rng.gen_range(20.0..40.0);
            }
        }

        // Clamp after the spike
        self.temperature = Metric::Temperature.bounds().clamp(temperature);
        self.humidity = Metric::Humidity.bounds().clamp(humidity);
        self.pressure = Metric::Pressure.bounds().clamp(pressure);

        let timestamp = clock_timestamp(self.origin, self.interval, self.sequence)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.sequence += 1;

        Reading::new(
            timestamp,
            round2(self.temperature),
            round2(self.humidity),
            round2(self.pressure),
        )
    }

    fn gaussian(&mut self, std_dev: f64) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        z * std_dev
    }
}

#[async_trait]
impl<R: Rng + SeedableRng + Send> ReadingSource for SensorSimulator<R> {
    fn name(&self) -> &str {
        "simulator"
    }

    async fn next_reading(&mut self, anomaly_probability: f64) -> Result<Reading> {
        Ok(self.step(anomaly_probability))
    }

    fn reset(&mut self, seed: u64) {
        self.rng = R::seed_from_u64(seed);
        self.sequence = 0;
        self.temperature = INITIAL_TEMPERATURE;
        self.humidity = INITIAL_HUMIDITY;
        self.pressure = INITIAL_PRESSURE;
    }
}
