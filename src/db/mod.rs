// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/envwatch

//! Database module for persistent storage

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::analysis::PredictionSet;
use crate::config::DatabaseConfig;
use crate::error::{MonitorError, Result};
use crate::sensors::{Reading, Series};

/// Storage calls the monitoring core relies on
pub trait ReadingStore {
    /// Insert one reading; a repeated timestamp is rejected
    fn save_reading(&self, reading: &Reading) -> Result<i64>;

    /// Insert many readings, skipping duplicates
    fn save_readings_batch(&self, readings: &[Reading]) -> Result<BatchReport>;

    /// Most recent reading, if any
    fn latest_reading(&self) -> Result<Option<Reading>>;

    /// Up to `limit` newest readings in ascending timestamp order
    fn recent_readings(&self, limit: usize) -> Result<Series>;
}

/// Per-record outcome of a batch insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub saved: usize,
    pub skipped: usize,
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    // Fixed precision keeps lexical order equal to time order
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

fn row_to_reading(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reading> {
    let raw: String = row.get(0)?;
    Ok(Reading::new(parse_timestamp(&raw)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

/// Database manager
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        // Create parent directories
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MonitorError::InvalidParameter(format!("database path: {}", e)))?;
        }

        let conn = Connection::open(&config.path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        "#,
        )?;

        let db = Self::from_connection(conn)?;
        info!("Database opened at {:?}", config.path);
        Ok(db)
    }

    /// In-memory database, mostly for tests and dry runs
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.create_tables()?;
        Ok(db)
    }

    /// Create database tables
    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL UNIQUE,
                temperature REAL NOT NULL,
                humidity REAL NOT NULL,
                pressure REAL NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS anomalies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                reading_id INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                anomaly_type TEXT,
                severity REAL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (reading_id) REFERENCES readings(id)
            );

            CREATE INDEX IF NOT EXISTS idx_anomalies_timestamp ON anomalies(timestamp);

            CREATE TABLE IF NOT EXISTS predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                metric TEXT NOT NULL,
                step INTEGER NOT NULL,
                prediction_value REAL NOT NULL,
                steps_ahead INTEGER NOT NULL,
                model_type TEXT DEFAULT 'linear',
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
        "#,
        )?;

        Ok(())
    }

    /// Id of the stored reading with this timestamp
    pub fn reading_id(&self, timestamp: &DateTime<Utc>) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let id = conn
            .query_row(
                "SELECT id FROM readings WHERE timestamp = ?1",
                params![format_timestamp(timestamp)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Record an anomaly against a stored reading
    pub fn save_anomaly(&self, reading_id: i64, timestamp: &DateTime<Utc>, anomaly_type: &str, severity: f64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO anomalies (reading_id, timestamp, anomaly_type, severity) VALUES (?1, ?2, ?3, ?4)",
            params![reading_id, format_timestamp(timestamp), anomaly_type, severity],
        )?;
        Ok(())
    }

    /// Store a forecast issued at `issued_at`; returns rows written
    pub fn save_predictions(&self, issued_at: &DateTime<Utc>, predictions: &PredictionSet) -> Result<usize> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        let steps = predictions.steps() as i64;
        let mut count = 0;

        for (metric, values) in predictions.iter() {
            for (step, value) in values.iter().enumerate() {
                tx.execute(
                    "INSERT INTO predictions (timestamp, metric, step, prediction_value, steps_ahead) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![format_timestamp(issued_at), metric.name(), step as i64 + 1, value, steps],
                )?;
                count += 1;
            }
        }

        tx.commit()?;
        Ok(count)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DatabaseStats> {
        let conn = self.conn.lock();

        let reading_count: i64 = conn.query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?;
        let anomaly_count: i64 = conn.query_row("SELECT COUNT(*) FROM anomalies", [], |row| row.get(0))?;
        let prediction_count: i64 = conn.query_row("SELECT COUNT(*) FROM predictions", [], |row| row.get(0))?;

        let ranges = if reading_count > 0 {
            Some(conn.query_row(
                "SELECT MIN(temperature), MAX(temperature), AVG(temperature),
                        MIN(humidity), MAX(humidity), AVG(humidity)
                 FROM readings",
                [],
                |row| {
                    Ok(MetricRanges {
                        temperature: (row.get(0)?, row.get(1)?),
                        temperature_avg: row.get(2)?,
                        humidity: (row.get(3)?, row.get(4)?),
                        humidity_avg: row.get(5)?,
                    })
                },
            )?)
        } else {
            None
        };

        Ok(DatabaseStats {
            reading_count: reading_count as usize,
            anomaly_count: anomaly_count as usize,
            prediction_count: prediction_count as usize,
            ranges,
        })
    }

    /// Cleanup data older than `retention_days`
    pub fn cleanup(&self, retention_days: u32) -> Result<usize> {
        let conn = self.conn.lock();
        let cutoff = format_timestamp(&(Utc::now() - chrono::Duration::days(retention_days as i64)));

        let deleted_anomalies = conn.execute("DELETE FROM anomalies WHERE timestamp < ?1", params![cutoff])?;
        let deleted_predictions = conn.execute("DELETE FROM predictions WHERE timestamp < ?1", params![cutoff])?;
        let deleted_readings = conn.execute("DELETE FROM readings WHERE timestamp < ?1", params![cutoff])?;

        info!(
            "Cleaned up {} readings, {} anomalies and {} predictions older than {} days",
            deleted_readings, deleted_anomalies, deleted_predictions, retention_days
        );

        Ok(deleted_readings + deleted_anomalies + deleted_predictions)
    }
}

impl ReadingStore for Database {
    fn save_reading(&self, reading: &Reading) -> Result<i64> {
        let conn = self.conn.lock();
        let timestamp = format_timestamp(&reading.timestamp);

        match conn.execute(
            "INSERT INTO readings (timestamp, temperature, humidity, pressure) VALUES (?1, ?2, ?3, ?4)",
            params![timestamp, reading.temperature, reading.humidity, reading.pressure],
        ) {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(e) if is_unique_violation(&e) => Err(MonitorError::DuplicateTimestamp(timestamp)),
            Err(e) => Err(e.into()),
        }
    }

    fn save_readings_batch(&self, readings: &[Reading]) -> Result<BatchReport> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        let mut report = BatchReport::default();

        for reading in readings {
            let timestamp = format_timestamp(&reading.timestamp);
            match tx.execute(
                "INSERT INTO readings (timestamp, temperature, humidity, pressure) VALUES (?1, ?2, ?3, ?4)",
                params![timestamp, reading.temperature, reading.humidity, reading.pressure],
            ) {
                Ok(_) => report.saved += 1,
                Err(e) if is_unique_violation(&e) => {
                    debug!("Skipping duplicate reading at {}", timestamp);
                    report.skipped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        tx.commit()?;
        if report.skipped > 0 {
            warn!("Batch insert: {} saved, {} duplicates skipped", report.saved, report.skipped);
        }
        Ok(report)
    }

    fn latest_reading(&self) -> Result<Option<Reading>> {
        let conn = self.conn.lock();
        let reading = conn
            .query_row(
                "SELECT timestamp, temperature, humidity, pressure FROM readings ORDER BY timestamp DESC LIMIT 1",
                [],
                row_to_reading,
            )
            .optional()?;
        Ok(reading)
    }

    fn recent_readings(&self, limit: usize) -> Result<Series> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT timestamp, temperature, humidity, pressure FROM readings ORDER BY timestamp DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], row_to_reading)?;
        let mut readings = Vec::new();
        for row in rows {
            readings.push(row?);
        }
        readings.reverse();

        Ok(Series::from(readings))
    }
}

/// Min/max/avg summary of stored readings
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRanges {
    pub temperature: (f64, f64),
    pub temperature_avg: f64,
    pub humidity: (f64, f64),
    pub humidity_avg: f64,
}

#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub reading_count: usize,
    pub anomaly_count: usize,
    pub prediction_count: usize,
    pub ranges: Option<MetricRanges>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::MonitoringModel;
    use chrono::{Duration, TimeZone};

    fn reading(minute: i64, temperature: f64) -> Reading {
        let origin = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        Reading::new(origin + Duration::minutes(minute), temperature, 55.0, 1012.5)
    }

    #[test]
    fn test_duplicate_timestamp_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.save_reading(&reading(0, 20.0)).unwrap();

        let err = db.save_reading(&reading(0, 25.0)).unwrap_err();
        assert!(matches!(err, MonitorError::DuplicateTimestamp(_)));
        assert_eq!(db.latest_reading().unwrap().unwrap().temperature, 20.0);
    }

    #[test]
    fn test_batch_skips_duplicates_and_counts_them() {
        let db = Database::open_in_memory().unwrap();
        db.save_reading(&reading(1, 20.0)).unwrap();

        let batch = vec![reading(0, 19.0), reading(1, 21.0), reading(2, 22.0), reading(2, 23.0)];
        let report = db.save_readings_batch(&batch).unwrap();
        assert_eq!(report, BatchReport { saved: 2, skipped: 2 });
        assert_eq!(db.stats().unwrap().reading_count, 3);
    }

    #[test]
    fn test_recent_readings_ascending() {
        let db = Database::open_in_memory().unwrap();
        for m in [3, 0, 2, 1, 4] {
            db.save_reading(&reading(m, m as f64)).unwrap();
        }

        let series = db.recent_readings(3).unwrap();
        let temps = series.values(crate::sensors::Metric::Temperature);
        assert_eq!(temps, vec![2.0, 3.0, 4.0]);
        assert_eq!(series[0].timestamp, reading(2, 0.0).timestamp);
    }

    #[test]
    fn test_latest_on_empty_database() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.latest_reading().unwrap().is_none());
        assert!(db.stats().unwrap().ranges.is_none());
    }

    #[test]
    fn test_anomalies_and_predictions_recorded() {
        let db = Database::open_in_memory().unwrap();
        let readings: Vec<Reading> = (0..10).map(|m| reading(m, 20.0 + m as f64)).collect();
        db.save_readings_batch(&readings).unwrap();

        let id = db.reading_id(&readings[4].timestamp).unwrap().unwrap();
        db.save_anomaly(id, &readings[4].timestamp, "isolation", 0.8).unwrap();

        let mut model = MonitoringModel::default();
        model.train(&readings).unwrap();
        let forecast = model.predict_next(&readings, 3).unwrap();
        let written = db.save_predictions(&readings[9].timestamp, &forecast).unwrap();
        assert_eq!(written, 9);

        let stats = db.stats().unwrap();
        assert_eq!(stats.anomaly_count, 1);
        assert_eq!(stats.prediction_count, 9);
        let ranges = stats.ranges.unwrap();
        assert_eq!(ranges.temperature, (20.0, 29.0));
    }

    #[test]
    fn test_cleanup_removes_old_rows() {
        let db = Database::open_in_memory().unwrap();
        db.save_reading(&reading(0, 20.0)).unwrap();
        db.save_reading(&Reading::new(Utc::now(), 21.0, 50.0, 1010.0)).unwrap();

        let deleted = db.cleanup(30).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(db.stats().unwrap().reading_count, 1);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_simulated_run_ending_now() {
        use crate::sensors::{origin_ending_at, ReadingSource, SensorSimulator};

        let interval = Duration::seconds(60);
        let origin = origin_ending_at(Utc::now(), 50, interval).unwrap();
        let batch = SensorSimulator::new(42)
            .with_clock(origin, interval)
            .generate_batch(50, 0.05)
            .await;

        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.save_readings_batch(&batch.series).unwrap().saved, 50);
        assert_eq!(db.cleanup(30).unwrap(), 0);
        assert_eq!(db.stats().unwrap().reading_count, 50);
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            enabled: true,
            path: dir.path().join("data").join("readings.db"),
            retention_days: 30,
        };

        {
            let db = Database::open(&config).unwrap();
            db.save_reading(&reading(0, 18.5)).unwrap();
        }
        let db = Database::open(&config).unwrap();
        assert_eq!(db.latest_reading().unwrap().unwrap().temperature, 18.5);
    }
}
