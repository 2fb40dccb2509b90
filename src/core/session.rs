// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/envwatch

//! Monitoring session - owns the series and the model for one run

use tracing::{debug, info, warn};

use super::SessionState;
use crate::analysis::{MonitoringModel, PredictionSet, Trend, MIN_TRAINING_READINGS};
use crate::config::{validate_anomaly_probability, validate_contamination, ModelConfig};
use crate::error::{MonitorError, Result};
use crate::sensors::{Metric, Reading, ReadingSource, Series};

/// Summary of a session (re)initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitReport {
    pub readings: usize,
    pub failed: usize,
}

/// One interactive monitoring session.
///
/// The session owns its series and model exclusively. Appending readings does
/// not retrain, so the model goes stale until [`Session::retrain`] or the next
/// [`Session::initialize`]; [`Session::is_stale`] reports it.
pub struct Session {
    source: Box<dyn ReadingSource>,
    model_config: ModelConfig,
    series: Option<Series>,
    model: Option<MonitoringModel>,
    stale: bool,
    failed_readings: usize,
}

impl Session {
    pub fn new(source: Box<dyn ReadingSource>, model_config: ModelConfig) -> Self {
        Self {
            source,
            model_config,
            series: None,
            model: None,
            stale: false,
            failed_readings: 0,
        }
    }

    /// Discard the current series and model, generate a fresh batch and fit
    /// a new model on it.
    ///
    /// Invalid parameters are rejected before the source is touched and leave
    /// the previous state as it was. If the reseeded source then yields too
    /// few readings to train on, the session is cleared, since the old series
    /// can no longer be continued by the source.
    pub async fn initialize(
        &mut self,
        seed: u64,
        initial_count: usize,
        anomaly_probability: f64,
        contamination: f64,
    ) -> Result<InitReport> {
        validate_anomaly_probability(anomaly_probability)?;
        validate_contamination(contamination)?;

        let config = ModelConfig {
            contamination,
            ..self.model_config.clone()
        };
        let mut model = MonitoringModel::new(config.clone())?;
        if initial_count < MIN_TRAINING_READINGS {
            return Err(MonitorError::InsufficientData {
                required: MIN_TRAINING_READINGS,
                actual: initial_count,
            });
        }

        // Past this point the source no longer continues the held series
        self.source.reset(seed);
        let outcome = self
            .source
            .generate_batch(initial_count, anomaly_probability)
            .await;
        if outcome.failed > 0 {
            warn!(
                "{} of {} initial readings could not be produced",
                outcome.failed, initial_count
            );
        }

        if let Err(e) = model.train(&outcome.series) {
            warn!("Initialization failed after the source was reseeded; session cleared");
            self.reset();
            return Err(e);
        }

        let report = InitReport {
            readings: outcome.series.len(),
            failed: outcome.failed,
        };
        self.model_config = config;
        self.series = Some(outcome.series);
        self.model = Some(model);
        self.stale = false;
        self.failed_readings = outcome.failed;

        info!(
            "Session initialized from {} with {} readings (seed={})",
            self.source.name(),
            report.readings,
            seed
        );
        Ok(report)
    }

    /// Append one reading without retraining
    pub async fn add_reading(&mut self, anomaly_probability: f64) -> Result<Reading> {
        validate_anomaly_probability(anomaly_probability)?;
        if self.series.is_none() {
            return Err(MonitorError::NotInitialized);
        }

        let reading = match self.source.next_reading(anomaly_probability).await {
            Ok(reading) => reading,
            Err(e) => {
                self.failed_readings += 1;
                return Err(e);
            }
        };

        let series = self.series.as_mut().ok_or(MonitorError::NotInitialized)?;
        series.push(reading);
        self.stale = true;
        debug!("Reading appended; series now has {} readings", series.len());
        Ok(reading)
    }

    /// Refit the model on the current series
    pub fn retrain(&mut self) -> Result<()> {
        let series = self.series.as_ref().ok_or(MonitorError::NotInitialized)?;
        let mut model = MonitoringModel::new(self.model_config.clone())?;
        model.train(series)?;
        self.model = Some(model);
        self.stale = false;
        Ok(())
    }

    /// Drop series and model
    pub fn reset(&mut self) {
        self.series = None;
        self.model = None;
        self.stale = false;
        self.failed_readings = 0;
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn series(&self) -> Option<&Series> {
        self.series.as_ref()
    }

    pub fn model(&self) -> Option<&MonitoringModel> {
        self.model.as_ref()
    }

    /// Whether readings were appended since the model was fitted
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    fn parts(&self) -> Result<(&Series, &MonitoringModel)> {
        match (&self.series, &self.model) {
            (Some(series), Some(model)) => Ok((series, model)),
            _ => Err(MonitorError::NotInitialized),
        }
    }

    /// Anomaly flags for the whole held series
    pub fn detect_anomalies(&self) -> Result<Vec<bool>> {
        let (series, model) = self.parts()?;
        Ok(model.detect_anomalies(series))
    }

    /// Forecast past the trained series; retrain first if stale
    pub fn predict_next(&self, steps_ahead: usize) -> Result<Option<PredictionSet>> {
        let (series, model) = self.parts()?;
        Ok(model.predict_next(series, steps_ahead))
    }

    pub fn trend(&self, metric: Metric) -> Result<Trend> {
        let (series, model) = self.parts()?;
        Ok(model.get_trend(series, metric))
    }

    pub fn state(&self) -> SessionState {
        SessionState {
            readings: self.series.as_ref().map_or(0, |s| s.len()),
            is_fitted: self.model.as_ref().is_some_and(|m| m.is_fitted()),
            is_stale: self.stale,
            failed_readings: self.failed_readings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::{BatchOutcome, SensorSimulator};
    use async_trait::async_trait;

    fn simulated_session() -> Session {
        Session::new(Box::new(SensorSimulator::new(0)), ModelConfig::default())
    }

    /// Fails every `period`-th call
    struct FlakySource {
        inner: SensorSimulator,
        calls: usize,
        period: usize,
    }

    #[async_trait]
    impl ReadingSource for FlakySource {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn next_reading(&mut self, p: f64) -> Result<Reading> {
            self.calls += 1;
            if self.calls % self.period == 0 {
                return Err(MonitorError::DataSourceUnavailable("timeout".into()));
            }
            Ok(self.inner.step(p))
        }

        fn reset(&mut self, seed: u64) {
            self.inner.reset(seed);
            self.calls = 0;
        }
    }

    #[tokio::test]
    async fn test_end_to_end_forecast() {
        let mut session = simulated_session();
        let report = session.initialize(42, 50, 0.05, 0.1).await.unwrap();
        assert_eq!(report, InitReport { readings: 50, failed: 0 });

        for _ in 0..5 {
            session.add_reading(0.05).await.unwrap();
        }
        assert_eq!(session.series().unwrap().len(), 55);
        assert!(session.is_stale());

        let forecast = session.predict_next(5).unwrap().unwrap();
        assert_eq!(forecast.len(), 3);
        for metric in Metric::ALL {
            let values = forecast.get(metric).unwrap();
            assert_eq!(values.len(), 5);
            for v in values {
                assert!(metric.bounds().contains(*v));
                assert!(((v * 100.0).round() - v * 100.0).abs() < 1e-6);
            }
        }
    }

    #[tokio::test]
    async fn test_initialize_is_reproducible() {
        let mut a = simulated_session();
        let mut b = simulated_session();
        a.initialize(42, 30, 0.05, 0.1).await.unwrap();
        b.initialize(42, 30, 0.05, 0.1).await.unwrap();

        assert_eq!(a.series(), b.series());
        assert_eq!(a.detect_anomalies().unwrap(), b.detect_anomalies().unwrap());
        assert_eq!(a.predict_next(5).unwrap(), b.predict_next(5).unwrap());
    }

    #[tokio::test]
    async fn test_reinitialize_replaces_state() {
        let mut session = simulated_session();
        session.initialize(1, 20, 0.05, 0.1).await.unwrap();
        session.add_reading(0.05).await.unwrap();

        session.initialize(2, 30, 0.05, 0.2).await.unwrap();
        assert_eq!(session.series().unwrap().len(), 30);
        assert!(!session.is_stale());
        assert_eq!(session.model().unwrap().config().contamination, 0.2);
    }

    #[tokio::test]
    async fn test_add_reading_before_initialize() {
        let mut session = simulated_session();
        assert!(matches!(
            session.add_reading(0.05).await,
            Err(MonitorError::NotInitialized)
        ));
        assert!(matches!(session.predict_next(5), Err(MonitorError::NotInitialized)));
        assert!(matches!(session.retrain(), Err(MonitorError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_failed_initialize_keeps_previous_session() {
        let mut session = simulated_session();
        session.initialize(42, 20, 0.05, 0.1).await.unwrap();
        let before = session.series().cloned();

        let err = session.initialize(7, 1, 0.05, 0.1).await.unwrap_err();
        assert!(matches!(err, MonitorError::InsufficientData { actual: 1, .. }));
        assert_eq!(session.series().cloned(), before);
        assert!(session.state().is_fitted);

        assert!(session.initialize(7, 20, 0.05, 0.9).await.is_err());
        assert!(session.initialize(7, 20, 1.5, 0.1).await.is_err());
        assert_eq!(session.series().cloned(), before);

        // The source still continues the kept series
        let last = session.series().unwrap().last().unwrap().timestamp;
        let appended = session.add_reading(0.05).await.unwrap();
        assert!(appended.timestamp > last);
    }

    #[tokio::test]
    async fn test_source_failure_after_reseed_clears_session() {
        let source = FlakySource {
            inner: SensorSimulator::new(0),
            calls: 0,
            period: 1,
        };
        let mut session = Session::new(Box::new(source), ModelConfig::default());

        let err = session.initialize(42, 10, 0.05, 0.1).await.unwrap_err();
        assert!(matches!(err, MonitorError::InsufficientData { actual: 0, .. }));
        assert_eq!(session.state(), SessionState::default());
        assert!(matches!(
            session.add_reading(0.05).await,
            Err(MonitorError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_forest_seed_independent_of_source_seed() {
        let config = |forest_seed| ModelConfig {
            forest_seed,
            ..ModelConfig::default()
        };
        let mut a = Session::new(Box::new(SensorSimulator::new(0)), config(1));
        let mut b = Session::new(Box::new(SensorSimulator::new(0)), config(2));
        a.initialize(42, 60, 0.05, 0.1).await.unwrap();
        b.initialize(42, 60, 0.05, 0.1).await.unwrap();

        assert_eq!(a.series(), b.series());
        assert_ne!(a.model().unwrap().threshold(), b.model().unwrap().threshold());
    }

    #[tokio::test]
    async fn test_retrain_clears_stale_and_moves_forecast_origin() {
        let mut session = simulated_session();
        session.initialize(42, 20, 0.0, 0.1).await.unwrap();
        session.add_reading(0.0).await.unwrap();
        assert_eq!(session.model().unwrap().trained_len(), Some(20));

        session.retrain().unwrap();
        assert!(!session.is_stale());
        assert_eq!(session.model().unwrap().trained_len(), Some(21));
    }

    #[tokio::test]
    async fn test_batch_failures_are_counted() {
        let source = FlakySource {
            inner: SensorSimulator::new(0),
            calls: 0,
            period: 4,
        };
        let mut session = Session::new(Box::new(source), ModelConfig::default());

        let report = session.initialize(42, 40, 0.05, 0.1).await.unwrap();
        assert_eq!(report, InitReport { readings: 30, failed: 10 });
        assert_eq!(session.state().failed_readings, 10);

        // Calls 41..43 succeed, 44 fails
        for _ in 0..3 {
            session.add_reading(0.05).await.unwrap();
        }
        let err = session.add_reading(0.05).await.unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(session.series().unwrap().len(), 33);
        assert_eq!(session.state().failed_readings, 11);
    }

    #[tokio::test]
    async fn test_state_snapshot_and_reset() {
        let mut session = simulated_session();
        assert_eq!(session.state(), SessionState::default());

        session.initialize(42, 25, 0.05, 0.1).await.unwrap();
        session.add_reading(0.05).await.unwrap();
        let state = session.state();
        assert_eq!(state.readings, 26);
        assert!(state.is_fitted && state.is_stale);
        assert_eq!(session.detect_anomalies().unwrap().len(), 26);

        session.reset();
        assert_eq!(session.state(), SessionState::default());
    }

    #[tokio::test]
    async fn test_trend_through_session() {
        let mut session = simulated_session();
        session.initialize(42, 30, 0.0, 0.1).await.unwrap();
        for metric in Metric::ALL {
            let trend = session.trend(metric).unwrap();
            let expected = crate::analysis::classify_trend(&session.series().unwrap().values(metric));
            assert_eq!(trend, expected);
        }
    }

    #[test]
    fn test_batch_outcome_default_is_empty() {
        let outcome = BatchOutcome::default();
        assert!(outcome.series.is_empty());
        assert_eq!(outcome.failed, 0);
    }
}
