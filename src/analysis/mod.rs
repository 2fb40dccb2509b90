//! Analysis module - baseline fitting, anomaly detection, forecasting

mod anomaly;
mod regression;
mod scaling;

pub use anomaly::{average_path_length, ForestParams, IsolationForest};
pub use regression::{classify_trend, LinearTrend, Trend, TREND_SLOPE_THRESHOLD, TREND_WINDOW};
pub use scaling::StandardScaler;

use std::collections::BTreeMap;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ModelConfig;
use crate::error::{MonitorError, Result};
use crate::sensors::{round2, Metric, Reading};

/// Minimum readings needed to train
pub const MIN_TRAINING_READINGS: usize = 2;

/// Forecast values per metric, `steps_ahead` long
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredictionSet {
    values: BTreeMap<Metric, Vec<f64>>,
}

impl PredictionSet {
    pub fn get(&self, metric: Metric) -> Option<&[f64]> {
        self.values.get(&metric).map(Vec::as_slice)
    }

    /// Number of metrics forecast
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Forecast horizon
    pub fn steps(&self) -> usize {
        self.values.values().next().map_or(0, Vec::len)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, &[f64])> {
        self.values.iter().map(|(m, v)| (*m, v.as_slice()))
    }

    pub fn into_inner(self) -> BTreeMap<Metric, Vec<f64>> {
        self.values
    }
}

/// Row-per-reading matrix with columns in [`Metric::ALL`] order
pub fn feature_matrix(readings: &[Reading]) -> DMatrix<f64> {
    DMatrix::from_fn(readings.len(), Metric::ALL.len(), |r, c| {
        readings[r].value(Metric::ALL[c])
    })
}

/// Everything learned by one `train` call
struct FittedState {
    scaler: StandardScaler,
    forest: IsolationForest,
    trends: BTreeMap<Metric, LinearTrend>,
    trained_len: usize,
}

/// Learns a baseline from a series, then flags anomalies and forecasts.
///
/// Training replaces the fitted state wholesale; until the first successful
/// `train` every inference call returns its neutral default.
pub struct MonitoringModel {
    config: ModelConfig,
    fitted: Option<FittedState>,
}

impl MonitoringModel {
    pub fn new(config: ModelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            fitted: None,
        })
    }

    /// Default configuration with a custom contamination
    pub fn with_contamination(contamination: f64) -> Result<Self> {
        Self::new(ModelConfig {
            contamination,
            ..ModelConfig::default()
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Length of the series the model was last trained on
    pub fn trained_len(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.trained_len)
    }

    /// Frozen anomaly-score threshold
    pub fn threshold(&self) -> Option<f64> {
        self.fitted.as_ref().map(|f| f.forest.threshold())
    }

    /// Fitted per-metric trend line
    pub fn trend_line(&self, metric: Metric) -> Option<LinearTrend> {
        self.fitted.as_ref().and_then(|f| f.trends.get(&metric).copied())
    }

    /// Fit scaler, isolation forest and per-metric trend lines
    pub fn train(&mut self, readings: &[Reading]) -> Result<()> {
        if readings.len() < MIN_TRAINING_READINGS {
            return Err(MonitorError::InsufficientData {
                required: MIN_TRAINING_READINGS,
                actual: readings.len(),
            });
        }

        let features = feature_matrix(readings);
        let scaler = StandardScaler::fit(&features);
        let scaled = scaler.transform(&features);

        let params = ForestParams {
            n_estimators: self.config.n_estimators,
            max_samples: self.config.max_samples,
            contamination: self.config.contamination,
            seed: self.config.forest_seed,
        };

        let (forest, trends) = rayon::join(
            || IsolationForest::fit(&scaled, &params),
            || {
                Metric::ALL
                    .iter()
                    .map(|&m| {
                        let ys: Vec<f64> = readings.iter().map(|r| r.value(m)).collect();
                        (m, LinearTrend::fit_indexed(&ys))
                    })
                    .collect::<BTreeMap<_, _>>()
            },
        );
        let forest = forest?;

        for (metric, line) in &trends {
            debug!("{} trend: slope={:.4}, intercept={:.4}", metric, line.slope, line.intercept);
        }
        info!(
            "Model trained on {} readings (contamination={}, threshold={:.4})",
            readings.len(),
            self.config.contamination,
            forest.threshold()
        );

        self.fitted = Some(FittedState {
            scaler,
            forest,
            trends,
            trained_len: readings.len(),
        });
        Ok(())
    }

    /// Raw isolation scores, standardized with the training transform
    pub fn anomaly_scores(&self, readings: &[Reading]) -> Option<Vec<f64>> {
        let fitted = self.fitted.as_ref()?;
        let scaled = fitted.scaler.transform(&feature_matrix(readings));
        Some(fitted.forest.score_matrix(&scaled))
    }

    /// One flag per reading, in input order; all false when untrained
    pub fn detect_anomalies(&self, readings: &[Reading]) -> Vec<bool> {
        let Some(fitted) = self.fitted.as_ref() else {
            return vec![false; readings.len()];
        };

        let threshold = fitted.forest.threshold();
        let flags: Vec<bool> = self
            .anomaly_scores(readings)
            .unwrap_or_default()
            .into_iter()
            .map(|score| score > threshold)
            .collect();

        debug!(
            "{} of {} readings flagged",
            flags.iter().filter(|&&f| f).count(),
            flags.len()
        );
        flags
    }

    /// Extrapolate each metric's trend line `steps_ahead` readings past the
    /// training series. Indices are counted from the trained length, so a
    /// caller that appended readings since must retrain first for the
    /// forecast to start at the right place.
    pub fn predict_next(&self, readings: &[Reading], steps_ahead: usize) -> Option<PredictionSet> {
        let fitted = self.fitted.as_ref()?;
        if readings.len() < MIN_TRAINING_READINGS || steps_ahead == 0 {
            return None;
        }

        let n = fitted.trained_len;
        let end = n.checked_add(steps_ahead)?;
        if readings.len() != n {
            warn!(
                "Forecasting from a model trained on {} readings for a series of {}",
                n,
                readings.len()
            );
        }

        let values = fitted
            .trends
            .iter()
            .map(|(&metric, line)| {
                let bounds = metric.bounds();
                let forecast: Vec<f64> = (n..end)
                    .map(|i| round2(bounds.clamp(line.predict(i as f64))))
                    .collect();
                (metric, forecast)
            })
            .collect();

        Some(PredictionSet { values })
    }

    /// Trend of the last readings of one metric; needs no training
    pub fn get_trend(&self, readings: &[Reading], metric: Metric) -> Trend {
        let values: Vec<f64> = readings.iter().map(|r| r.value(metric)).collect();
        classify_trend(&values)
    }
}

impl Default for MonitoringModel {
    fn default() -> Self {
        Self {
            config: ModelConfig::default(),
            fitted: None,
        }
    }
}
