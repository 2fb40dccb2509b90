// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/envwatch

//! envwatch - environmental sensor monitoring
//!
//! Runs one monitoring session headlessly: generates or fetches an initial
//! series, fits the model, appends extra readings and prints a JSON report
//! with anomaly flags, trends and forecasts.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use chrono::Utc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use envwatch::analysis::{PredictionSet, Trend};
use envwatch::core::{Session, SessionState};
use envwatch::db::{Database, ReadingStore};
use envwatch::sensors::{
    origin_ending_at, Metric, OpenWeatherClient, Reading, ReadingSource, SensorSimulator, WeatherSource,
};
use envwatch::{Config, VERSION};

/// envwatch - environmental sensor monitoring
#[derive(Parser, Debug)]
#[command(name = "envwatch")]
#[command(version = VERSION)]
#[command(about = "Anomaly detection and short-term forecasting for environmental readings")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    /// Seed for the reading source
    #[arg(long)]
    seed: Option<u64>,

    /// Readings generated at initialization
    #[arg(short = 'n', long)]
    readings: Option<usize>,

    /// Readings appended after initialization
    #[arg(long, default_value = "0")]
    extra: usize,

    /// Forecast horizon
    #[arg(long)]
    steps: Option<usize>,

    /// Spike probability per reading
    #[arg(long)]
    anomaly_probability: Option<f64>,

    /// Expected anomaly fraction
    #[arg(long)]
    contamination: Option<f64>,

    /// Refit the model after appending extra readings
    #[arg(long)]
    retrain: bool,

    /// Read from OpenWeatherMap instead of the simulator
    #[arg(long)]
    weather: bool,

    /// City for the weather source
    #[arg(long)]
    city: Option<String>,

    /// Persist results to this SQLite file
    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct AnomalyEntry {
    timestamp: chrono::DateTime<Utc>,
    score: f64,
}

#[derive(Debug, Serialize)]
struct Report {
    version: &'static str,
    source: String,
    state: SessionState,
    threshold: Option<f64>,
    anomaly_count: usize,
    anomalies: Vec<AnomalyEntry>,
    trends: BTreeMap<Metric, Trend>,
    predictions: Option<PredictionSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    external_forecast: Option<Vec<Reading>>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)
        .with_context(|| format!("loading configuration from {:?}", config_path))?;
    apply_overrides(&mut config, &args);

    // Initialize logging
    if args.trace || args.debug {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(if args.trace { Level::TRACE } else { Level::DEBUG })
            .with_target(false)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.log_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("envwatch v{}", VERSION);
    config.validate()?;

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(run(&config, &args))?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(seed) = args.seed {
        config.simulator.seed = seed;
    }
    if let Some(n) = args.readings {
        config.simulator.initial_count = n;
    }
    if let Some(steps) = args.steps {
        config.forecast.steps_ahead = steps;
    }
    if let Some(p) = args.anomaly_probability {
        config.simulator.anomaly_probability = p;
    }
    if let Some(c) = args.contamination {
        config.model.contamination = c;
    }
    if args.weather {
        config.weather.enabled = true;
    }
    if let Some(city) = &args.city {
        config.weather.city = city.clone();
    }
    if let Ok(key) = std::env::var("OPENWEATHER_API_KEY") {
        config.weather.api_key = key;
    }
    if let Some(path) = &args.db {
        config.database.enabled = true;
        config.database.path = path.clone();
    }
}

fn build_source(config: &Config, extra: usize) -> Result<Box<dyn ReadingSource>> {
    let seed = config.simulator.seed;
    if config.weather.enabled {
        let client = OpenWeatherClient::new(&config.weather)?;
        info!("Using weather source for {}", client.city());
        let source = WeatherSource::new(client, config.weather.cache_window(), seed)
            .with_pacing(config.weather.pacing());
        Ok(Box::new(source))
    } else {
        let interval = chrono::Duration::try_seconds(config.simulator.interval_secs)
            .context("simulator interval out of range")?;
        // Place the run so its last reading lands now; retention then keeps it
        let count = config.simulator.initial_count.saturating_add(extra);
        let origin = origin_ending_at(Utc::now(), count, interval)
            .context("simulated run does not fit the clock range")?;
        Ok(Box::new(SensorSimulator::new(seed).with_clock(origin, interval)))
    }
}

async fn run(config: &Config, args: &Args) -> Result<Report> {
    let sim = &config.simulator;
    let mut session = Session::new(build_source(config, args.extra)?, config.model.clone());

    let init = session
        .initialize(sim.seed, sim.initial_count, sim.anomaly_probability, config.model.contamination)
        .await?;
    info!("Initialized with {} readings ({} failed)", init.readings, init.failed);

    for _ in 0..args.extra {
        match session.add_reading(sim.anomaly_probability).await {
            Ok(_) => {}
            Err(e) if e.is_recoverable() => warn!("Skipping reading: {}", e),
            Err(e) => return Err(e.into()),
        }
    }
    if args.retrain && session.is_stale() {
        session.retrain()?;
    }

    let flags = session.detect_anomalies()?;
    let predictions = session.predict_next(config.forecast.steps_ahead)?;
    let mut trends = BTreeMap::new();
    for metric in Metric::ALL {
        trends.insert(metric, session.trend(metric)?);
    }

    let series = session.series().map(|s| s.as_slice()).unwrap_or(&[]);
    let model = session.model();
    let scores = model
        .and_then(|m| m.anomaly_scores(series))
        .unwrap_or_default();
    let anomalies: Vec<AnomalyEntry> = series
        .iter()
        .zip(&flags)
        .zip(&scores)
        .filter(|((_, flagged), _)| **flagged)
        .map(|((reading, _), score)| AnomalyEntry {
            timestamp: reading.timestamp,
            score: *score,
        })
        .collect();

    let external_forecast = if config.weather.enabled {
        let client = OpenWeatherClient::new(&config.weather)?;
        match client.fetch_forecast(config.forecast.steps_ahead).await {
            Ok(readings) => Some(readings),
            Err(e) => {
                warn!("External forecast unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    if config.database.enabled {
        persist(config, series, &anomalies, predictions.as_ref())?;
    }

    Ok(Report {
        version: VERSION,
        source: session.source_name().to_string(),
        state: session.state(),
        threshold: model.and_then(|m| m.threshold()),
        anomaly_count: anomalies.len(),
        anomalies,
        trends,
        predictions,
        external_forecast,
    })
}

fn persist(
    config: &Config,
    series: &[Reading],
    anomalies: &[AnomalyEntry],
    predictions: Option<&PredictionSet>,
) -> Result<()> {
    let db = Database::open(&config.database)?;
    db.cleanup(config.database.retention_days)?;

    let batch = db.save_readings_batch(series)?;
    info!("Stored {} readings ({} already present)", batch.saved, batch.skipped);

    for anomaly in anomalies {
        if let Some(id) = db.reading_id(&anomaly.timestamp)? {
            db.save_anomaly(id, &anomaly.timestamp, "isolation_forest", anomaly.score)?;
        }
    }

    if let (Some(predictions), Some(last)) = (predictions, series.last()) {
        db.save_predictions(&last.timestamp, predictions)?;
    }

    Ok(())
}
