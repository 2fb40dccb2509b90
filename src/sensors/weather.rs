// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/envwatch

//! External weather service as a reading source
//!
//! Real fetches are expensive and rate limited, so [`WeatherSource`] keeps the
//! last fetched reading for a cache window and, inside that window, derives
//! new readings from it with a small Gaussian jitter clamped to
//! [`Metric::extended_bounds`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{round2, BatchOutcome, Metric, Reading, ReadingSource, Series};
use crate::config::WeatherConfig;
use crate::error::{MonitorError, Result};

/// Jitter applied to cached readings
const TEMPERATURE_JITTER: f64 = 0.1;
const HUMIDITY_JITTER: f64 = 0.5;
const PRESSURE_JITTER: f64 = 0.1;

/// Remote service forecasts at most this many 3-hour steps
pub const MAX_FORECAST_STEPS: usize = 40;

/// Seam between the caching logic and the transport
#[async_trait]
pub trait WeatherClient: Send + Sync {
    /// Fetch the current observation
    async fn fetch_current(&self) -> Result<Reading>;
}

#[derive(Debug, Deserialize)]
struct MainFields {
    temp: f64,
    humidity: f64,
    pressure: f64,
}

#[derive(Debug, Deserialize)]
struct CurrentResponse {
    main: MainFields,
    dt: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    list: Vec<CurrentResponse>,
}

impl CurrentResponse {
    fn into_reading(self, fallback: DateTime<Utc>) -> Reading {
        let timestamp = self
            .dt
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or(fallback);

        Reading::new(
            timestamp,
            round2(Metric::Temperature.extended_bounds().clamp(self.main.temp)),
            round2(Metric::Humidity.extended_bounds().clamp(self.main.humidity)),
            round2(Metric::Pressure.extended_bounds().clamp(self.main.pressure)),
        )
    }
}

/// Adapt a current-weather payload to a [`Reading`]
pub fn parse_current(body: &str) -> Result<Reading> {
    let response: CurrentResponse = serde_json::from_str(body)
        .map_err(|e| MonitorError::DataSourceUnavailable(format!("invalid response format: {}", e)))?;
    Ok(response.into_reading(Utc::now()))
}

/// Adapt a forecast payload to a list of readings
pub fn parse_forecast(body: &str, steps: usize) -> Result<Vec<Reading>> {
    let response: ForecastResponse = serde_json::from_str(body)
        .map_err(|e| MonitorError::DataSourceUnavailable(format!("invalid forecast format: {}", e)))?;
    let now = Utc::now();
    Ok(response
        .list
        .into_iter()
        .take(steps)
        .map(|item| item.into_reading(now))
        .collect())
}

/// OpenWeatherMap HTTP client
pub struct OpenWeatherClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    city: String,
}

impl OpenWeatherClient {
    pub fn new(config: &WeatherConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MonitorError::DataSourceUnavailable(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            city: config.city.clone(),
        })
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    async fn get(&self, endpoint: &str, extra: &[(&str, String)]) -> Result<String> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut query = vec![
            ("q", self.city.clone()),
            ("appid", self.api_key.clone()),
            ("units", "metric".to_string()),
        ];
        query.extend(extra.iter().map(|(k, v)| (*k, v.clone())));

        let response = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| MonitorError::DataSourceUnavailable(format!("request failed: {}", e)))?;

        response
            .text()
            .await
            .map_err(|e| MonitorError::DataSourceUnavailable(format!("read failed: {}", e)))
    }

    /// Fetch up to `min(steps, 40)` forecast steps
    pub async fn fetch_forecast(&self, steps: usize) -> Result<Vec<Reading>> {
        let steps = steps.min(MAX_FORECAST_STEPS);
        let body = self.get("forecast", &[("cnt", steps.to_string())]).await?;
        parse_forecast(&body, steps)
    }
}

#[async_trait]
impl WeatherClient for OpenWeatherClient {
    async fn fetch_current(&self) -> Result<Reading> {
        let body = self.get("weather", &[]).await?;
        parse_current(&body)
    }
}

struct CachedReading {
    reading: Reading,
    fetched_at: Instant,
}

/// Reading source backed by a [`WeatherClient`] with a cache window
pub struct WeatherSource<C = OpenWeatherClient> {
    client: C,
    cache_window: Duration,
    pacing: Duration,
    rng: ChaCha8Rng,
    cached: Option<CachedReading>,
    last_timestamp: Option<DateTime<Utc>>,
    fetches: u64,
}

impl<C: WeatherClient> WeatherSource<C> {
    pub fn new(client: C, cache_window: Duration, seed: u64) -> Self {
        Self {
            client,
            cache_window,
            pacing: Duration::ZERO,
            rng: ChaCha8Rng::seed_from_u64(seed),
            cached: None,
            last_timestamp: None,
            fetches: 0,
        }
    }

    /// Delay between consecutive readings inside a batch
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Number of remote fetches performed
    pub fn fetch_count(&self) -> u64 {
        self.fetches
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    fn cache_fresh(&self) -> Option<Reading> {
        self.cached
            .as_ref()
            .filter(|c| c.fetched_at.elapsed() < self.cache_window)
            .map(|c| c.reading)
    }

    fn jitter(&mut self, base: &Reading) -> Reading {
        let mut next = |value: f64, std_dev: f64, metric: Metric| {
            let z: f64 = self.rng.sample(StandardNormal);
            round2(metric.extended_bounds().clamp(value + z * std_dev))
        };

        let temperature = next(base.temperature, TEMPERATURE_JITTER, Metric::Temperature);
        let humidity = next(base.humidity, HUMIDITY_JITTER, Metric::Humidity);
        let pressure = next(base.pressure, PRESSURE_JITTER, Metric::Pressure);

        Reading::new(Utc::now(), temperature, humidity, pressure)
    }

    /// Keep timestamps strictly increasing within this source
    fn stamp(&mut self, mut reading: Reading) -> Reading {
        if let Some(last) = self.last_timestamp {
            if reading.timestamp <= last {
                reading.timestamp = last + chrono::Duration::milliseconds(1);
            }
        }
        self.last_timestamp = Some(reading.timestamp);
        reading
    }
}

#[async_trait]
impl<C: WeatherClient> ReadingSource for WeatherSource<C> {
    fn name(&self) -> &str {
        "weather"
    }

    async fn next_reading(&mut self, _anomaly_probability: f64) -> Result<Reading> {
        if let Some(base) = self.cache_fresh() {
            debug!("Deriving reading from cached observation at {}", base.timestamp);
            let reading = self.jitter(&base);
            return Ok(self.stamp(reading));
        }

        let reading = match self.client.fetch_current().await {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Weather fetch failed: {}", e);
                return Err(e);
            }
        };

        self.fetches += 1;
        self.cached = Some(CachedReading {
            reading,
            fetched_at: Instant::now(),
        });
        info!(
            "Fetched weather: {:.2}°C, {:.2}%, {:.2} hPa",
            reading.temperature, reading.humidity, reading.pressure
        );
        Ok(self.stamp(reading))
    }

    fn reset(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self.cached = None;
        self.last_timestamp = None;
    }

    async fn generate_batch(&mut self, count: usize, anomaly_probability: f64) -> BatchOutcome {
        let mut outcome = BatchOutcome {
            series: Series::with_capacity(count),
            failed: 0,
        };

        for i in 0..count {
            match self.next_reading(anomaly_probability).await {
                Ok(reading) => outcome.series.push(reading),
                Err(_) => outcome.failed += 1,
            }

            if i + 1 < count && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
        }

        if outcome.failed > 0 {
            warn!("Weather batch: {} of {} readings failed", outcome.failed, count);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    const CURRENT_BODY: &str = r#"{
        "coord": {"lon": -0.13, "lat": 51.51},
        "weather": [{"main": "Clouds"}],
        "main": {"temp": 14.237, "humidity": 81, "pressure": 1012},
        "dt": 1700000000,
        "sys": {"country": "GB"},
        "name": "London"
    }"#;

    struct StubClient {
        responses: Mutex<VecDeque<Result<Reading>>>,
    }

    impl StubClient {
        fn new(responses: Vec<Result<Reading>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait]
    impl WeatherClient for StubClient {
        async fn fetch_current(&self) -> Result<Reading> {
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(MonitorError::DataSourceUnavailable("exhausted".into())))
        }
    }

    fn observed() -> Reading {
        parse_current(CURRENT_BODY).unwrap()
    }

    #[test]
    fn test_parse_current() {
        let r = observed();
        assert_eq!(r.temperature, 14.24);
        assert_eq!(r.humidity, 81.0);
        assert_eq!(r.pressure, 1012.0);
        assert_eq!(r.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_parse_missing_fields_is_unavailable() {
        let err = parse_current(r#"{"weather": [], "name": "London"}"#).unwrap_err();
        assert!(matches!(err, MonitorError::DataSourceUnavailable(_)));
        assert!(parse_current("not json").is_err());
    }

    #[test]
    fn test_parse_forecast_truncates() {
        let body = r#"{"list": [
            {"main": {"temp": 10.0, "humidity": 70, "pressure": 1000}, "dt": 1700000000},
            {"main": {"temp": 11.0, "humidity": 71, "pressure": 1001}, "dt": 1700010800},
            {"main": {"temp": 12.0, "humidity": 72, "pressure": 1002}, "dt": 1700021600}
        ]}"#;
        let readings = parse_forecast(body, 2).unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[1].temperature, 11.0);
    }

    #[test]
    fn test_parse_clamps_to_extended_range() {
        let body = r#"{"main": {"temp": 75.0, "humidity": 120, "pressure": 700}}"#;
        let r = parse_current(body).unwrap();
        assert_eq!(r.temperature, 60.0);
        assert_eq!(r.humidity, 100.0);
        assert_eq!(r.pressure, 850.0);
    }

    #[tokio::test]
    async fn test_cache_window_derives_from_last_fetch() {
        let client = StubClient::new(vec![Ok(observed())]);
        let mut source = WeatherSource::new(client, Duration::from_secs(600), 42);

        let first = source.next_reading(0.0).await.unwrap();
        assert_eq!(first, observed());

        for _ in 0..20 {
            let r = source.next_reading(0.0).await.unwrap();
            assert!((r.temperature - first.temperature).abs() < 1.0);
            assert!((r.pressure - first.pressure).abs() < 1.0);
            assert!(r.timestamp > first.timestamp);
        }
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_cached_jitter_stays_in_extended_bounds() {
        let saturated = Reading::new(Utc::now(), 60.0, 100.0, 1085.0);
        let client = StubClient::new(vec![Ok(saturated)]);
        let mut source = WeatherSource::new(client, Duration::from_secs(600), 3);

        source.next_reading(0.0).await.unwrap();
        let mut below_max = false;
        for _ in 0..200 {
            let r = source.next_reading(0.0).await.unwrap();
            assert!(r.temperature <= 60.0);
            assert!(r.humidity <= 100.0);
            assert!(r.pressure <= 1085.0);
            below_max |= r.humidity < 100.0;
        }
        assert_eq!(source.fetch_count(), 1);
        assert!(below_max);
    }

    #[tokio::test]
    async fn test_expired_cache_fetches_again() {
        let client = StubClient::new(vec![Ok(observed()), Ok(observed())]);
        let mut source = WeatherSource::new(client, Duration::ZERO, 42);

        source.next_reading(0.0).await.unwrap();
        source.next_reading(0.0).await.unwrap();
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_recoverable() {
        let client = StubClient::new(vec![
            Err(MonitorError::DataSourceUnavailable("timeout".into())),
            Ok(observed()),
        ]);
        let mut source = WeatherSource::new(client, Duration::ZERO, 1);

        let err = source.next_reading(0.0).await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(source.next_reading(0.0).await.is_ok());
    }

    #[tokio::test]
    async fn test_batch_counts_failures() {
        let client = StubClient::new(vec![
            Ok(observed()),
            Err(MonitorError::DataSourceUnavailable("503".into())),
            Ok(observed()),
        ]);
        let mut source = WeatherSource::new(client, Duration::ZERO, 1);

        let outcome = source.generate_batch(4, 0.0).await;
        assert_eq!(outcome.series.len(), 2);
        assert_eq!(outcome.failed, 2);
    }

    #[tokio::test]
    async fn test_reset_drops_cache() {
        let client = StubClient::new(vec![Ok(observed()), Ok(observed())]);
        let mut source = WeatherSource::new(client, Duration::from_secs(600), 1);

        source.next_reading(0.0).await.unwrap();
        source.reset(2);
        source.next_reading(0.0).await.unwrap();
        assert_eq!(source.fetch_count(), 2);
    }
}
