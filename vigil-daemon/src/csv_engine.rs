// Vigil Daemon - CSV data engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Engine reading windows from CSV datasets.
//!
//! A query statement names a CSV file under the data directory. The first
//! column must be `timestamp_ms`; every other column is one series and
//! becomes one window starting at the first row's timestamp. Blank cells are
//! skipped.
//!
//! Anomalous windows are appended to a JSON-lines log.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;
use vigil::{Engine, EngineError, Query, Window};

/// One line of the anomaly log.
#[derive(Serialize)]
struct AnomalyRecord<'a> {
    detected_at: DateTime<Utc>,
    #[serde(flatten)]
    window: &'a Window,
}

/// Engine over a directory of CSV files.
#[derive(Debug)]
pub struct CsvEngine {
    data_dir: PathBuf,
    anomaly_log: PathBuf,
    log_lock: Mutex<()>,
}

impl CsvEngine {
    pub fn new(data_dir: impl Into<PathBuf>, anomaly_log: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            anomaly_log: anomaly_log.into(),
            log_lock: Mutex::new(()),
        }
    }

    /// Parse a dataset into one window per series column.
    pub fn parse_csv(path: &Path) -> Result<Vec<Window>, CsvError> {
        if !path.exists() {
            return Err(CsvError::FileNotFound(path.display().to_string()));
        }
        let mut reader = csv::Reader::from_path(path)?;

        let headers = reader.headers()?.clone();
        let header_strs: Vec<&str> = headers.iter().collect();
        if header_strs.is_empty() || header_strs[0] != "timestamp_ms" {
            return Err(CsvError::InvalidFormat(
                "First column must be 'timestamp_ms'".to_string(),
            ));
        }
        let series: Vec<&str> = header_strs[1..].to_vec();

        let mut first_timestamp: Option<i64> = None;
        let mut data: Vec<Vec<f64>> = vec![Vec::new(); series.len()];

        for (line, result) in reader.records().enumerate() {
            let record = result?;
            let values: Vec<&str> = record.iter().collect();
            if values.is_empty() {
                continue;
            }

            let timestamp_ms: i64 = values[0].trim().parse().map_err(|_| {
                CsvError::InvalidFormat(format!("Invalid timestamp on row {}", line + 1))
            })?;
            first_timestamp.get_or_insert(timestamp_ms);

            for (i, samples) in data.iter_mut().enumerate() {
                let Some(cell) = values.get(i + 1).map(|s| s.trim()) else {
                    continue;
                };
                if cell.is_empty() {
                    continue;
                }
                let value: f64 = cell.parse().map_err(|_| {
                    CsvError::InvalidFormat(format!(
                        "Invalid value '{}' for '{}' on row {}",
                        cell,
                        series[i],
                        line + 1
                    ))
                })?;
                samples.push(value);
            }
        }

        let Some(first_timestamp) = first_timestamp else {
            return Err(CsvError::EmptyDataset);
        };
        let start = Utc
            .timestamp_millis_opt(first_timestamp)
            .single()
            .ok_or_else(|| {
                CsvError::InvalidFormat(format!("Timestamp out of range: {}", first_timestamp))
            })?;

        Ok(series
            .into_iter()
            .zip(data)
            .filter(|(_, samples)| !samples.is_empty())
            .map(|(name, samples)| Window::new(name, start, samples))
            .collect())
    }

    async fn append_anomaly(&self, window: &Window) -> Result<(), CsvError> {
        let mut line = serde_json::to_vec(&AnomalyRecord {
            detected_at: Utc::now(),
            window,
        })?;
        line.push(b'\n');

        let _guard = self.log_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.anomaly_log)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Engine for CsvEngine {
    async fn get_windows(&self, query: &Query) -> Result<Vec<Window>, EngineError> {
        let path = self.data_dir.join(&query.statement);
        debug!("Reading {}", path.display());

        let windows = tokio::task::spawn_blocking(move || CsvEngine::parse_csv(&path))
            .await
            .map_err(|e| EngineError::Query {
                query: query.name.clone(),
                reason: e.to_string(),
            })?;
        windows.map_err(|e| EngineError::Query {
            query: query.name.clone(),
            reason: e.to_string(),
        })
    }

    async fn record_anomalous(&self, window: Window) -> Result<(), EngineError> {
        self.append_anomaly(&window)
            .await
            .map_err(|e| EngineError::Record {
                window: window.to_string(),
                reason: e.to_string(),
            })
    }
}

#[derive(Debug, Error)]
pub enum CsvError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Empty dataset")]
    EmptyDataset,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
