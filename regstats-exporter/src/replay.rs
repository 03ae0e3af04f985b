// regstats Exporter - Dataset replay engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Dataset replay engine simulating register blocks from CSV datasets.
//!
//! Every CSV column after `timestamp_ms` becomes one 64-bit register in an
//! in-memory register window. Replaying a row writes its values to the
//! registers; the domain's sampling thread picks them up like it would from
//! real hardware. Columns ending in `_total` are exposed as counters, all
//! others as gauges stored in fixed point.

use crate::metrics::ExporterMetrics;
use regstats::{
    BlockDriver, BlockSpec, MemoryRegion, MetricSpec, MetricType, RegisterField, ZoneSpec,
};
use serde::Serialize;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

/// Size of one replay register in bytes.
const REGISTER_SIZE: usize = 8;

/// Fixed-point scale of gauge registers.
const GAUGE_SCALE: u64 = 1000;

/// Configuration for dataset replay.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Path to CSV dataset file.
    pub csv_path: String,
    /// Replay speed multiplier (1.0 = real-time, 10.0 = 10x faster).
    pub speed: f64,
    /// Whether to loop the dataset.
    pub loop_replay: bool,
    /// Row interval in milliseconds when the dataset has a single row.
    pub default_sample_interval_ms: u64,
    /// Zone name of the replayed registers.
    pub zone: String,
    /// Block name of the replayed registers.
    pub block: String,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            csv_path: String::new(),
            speed: 1.0,
            loop_replay: true,
            default_sample_interval_ms: 1000,
            zone: "replay".to_string(),
            block: "dataset".to_string(),
        }
    }
}

/// State of the replay engine.
#[derive(Debug)]
pub struct ReplayState {
    /// Current position in the dataset (row index).
    pub position: AtomicUsize,
    /// Total rows in the dataset.
    pub total_samples: AtomicUsize,
    /// Whether replay is running.
    pub running: AtomicBool,
}

impl Default for ReplayState {
    fn default() -> Self {
        Self {
            position: AtomicUsize::new(0),
            total_samples: AtomicUsize::new(0),
            running: AtomicBool::new(false),
        }
    }
}

/// One CSV column mapped to a register.
#[derive(Debug, Clone)]
struct Column {
    name: String,
    metric_type: MetricType,
}

/// Dataset row for replay.
#[derive(Debug, Clone)]
struct DataRow {
    timestamp_ms: u64,
    values: Vec<Option<f64>>,
}

/// Converts fixed-point gauge registers back to floats.
///
/// The metric's data word carries the fixed-point scale.
struct FixedPoint;

impl BlockDriver for FixedPoint {
    fn convert_metric(&mut self, metric: &MetricSpec, raw: u64, _scratch: &[u8]) -> f64 {
        raw as i64 as f64 / metric.data.max(1) as f64
    }
}

/// Replay engine writing dataset rows into a register window.
pub struct ReplayEngine {
    config: ReplayConfig,
    state: Arc<ReplayState>,
    region: MemoryRegion,
    columns: Vec<Column>,
    rows: Vec<DataRow>,
    /// Counter register offsets added on every loop, keeping them monotonic
    counter_base: Vec<u64>,
    metrics: Option<ExporterMetrics>,
}

impl ReplayEngine {
    /// Create a new replay engine from a CSV file.
    pub fn from_csv(config: ReplayConfig) -> Result<Self, ReplayError> {
        let path = Path::new(&config.csv_path);
        if !path.exists() {
            return Err(ReplayError::FileNotFound(config.csv_path.clone()));
        }

        let (columns, rows) = Self::parse_csv(path)?;
        if rows.is_empty() {
            return Err(ReplayError::EmptyDataset);
        }

        let state = Arc::new(ReplayState::default());
        state.total_samples.store(rows.len(), Ordering::SeqCst);

        info!(
            "Loaded dataset: {} columns, {} rows",
            columns.len(),
            rows.len()
        );

        Ok(Self {
            config,
            state,
            region: MemoryRegion::new(columns.len() * REGISTER_SIZE),
            counter_base: vec![0; columns.len()],
            columns,
            rows,
            metrics: None,
        })
    }

    /// Report replay progress through `metrics`.
    pub fn with_metrics(mut self, metrics: ExporterMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Parse a CSV file into register columns and data rows.
    fn parse_csv(path: &Path) -> Result<(Vec<Column>, Vec<DataRow>), ReplayError> {
        let mut reader = csv::Reader::from_reader(File::open(path)?);

        let headers = reader.headers()?.clone();
        let header_strs: Vec<&str> = headers.iter().collect();

        if header_strs.is_empty() || header_strs[0] != "timestamp_ms" {
            return Err(ReplayError::InvalidFormat(
                "First column must be 'timestamp_ms'".to_string(),
            ));
        }

        let columns: Vec<Column> = header_strs[1..]
            .iter()
            .map(|h| Column {
                name: metric_name(h),
                metric_type: if h.ends_with("_total") {
                    MetricType::Counter
                } else {
                    MetricType::Gauge
                },
            })
            .collect();

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            let values: Vec<&str> = record.iter().collect();

            if values.is_empty() {
                continue;
            }

            let timestamp_ms: u64 = values[0]
                .parse()
                .map_err(|_| ReplayError::InvalidFormat("Invalid timestamp".to_string()))?;

            let row_values = (0..columns.len())
                .map(|i| {
                    values
                        .get(i + 1)
                        .map(|s| s.trim())
                        .filter(|s| !s.is_empty())
                        .and_then(|s| s.parse().ok())
                })
                .collect();

            rows.push(DataRow {
                timestamp_ms,
                values: row_values,
            });
        }

        Ok((columns, rows))
    }

    /// Zone exposing one metric per dataset column.
    pub fn zone_spec(&self) -> ZoneSpec {
        let metrics = self.columns.iter().enumerate().map(|(i, column)| {
            let field = RegisterField::new(i * REGISTER_SIZE, REGISTER_SIZE);
            let spec = MetricSpec::new(column.name.clone(), column.metric_type, field);
            match column.metric_type {
                MetricType::Gauge => spec.with_data(GAUGE_SCALE),
                _ => spec.with_data(1),
            }
        });

        ZoneSpec::new(self.config.zone.clone()).with_block(
            BlockSpec::new(self.config.block.clone())
                .with_io(Arc::new(self.region.clone()))
                .with_metrics(metrics)
                .with_driver(FixedPoint),
        )
    }

    /// Get the replay state.
    pub fn state(&self) -> Arc<ReplayState> {
        Arc::clone(&self.state)
    }

    /// Start the replay loop (runs until stopped).
    pub async fn run(mut self) {
        self.state.running.store(true, Ordering::SeqCst);
        info!(
            "Starting replay: speed={}, loop={}",
            self.config.speed, self.config.loop_replay
        );

        loop {
            if !self.state.running.load(Ordering::SeqCst) {
                break;
            }

            let position = self.state.position.load(Ordering::SeqCst);

            if position >= self.rows.len() {
                if self.config.loop_replay {
                    info!("Dataset complete, looping...");
                    self.rewind();
                    continue;
                } else {
                    info!("Dataset complete, stopping");
                    self.state.running.store(false, Ordering::SeqCst);
                    break;
                }
            }

            self.apply_row(position);
            self.state.position.fetch_add(1, Ordering::SeqCst);
            if let Some(metrics) = &self.metrics {
                metrics.update_replay(position + 1, self.rows.len(), self.config.speed);
            }

            let base_interval_ms = if position + 1 < self.rows.len() {
                self.rows[position + 1]
                    .timestamp_ms
                    .saturating_sub(self.rows[position].timestamp_ms)
            } else {
                self.config.default_sample_interval_ms
            };

            let sleep_ms = (base_interval_ms as f64 / self.config.speed) as u64;
            if sleep_ms > 0 {
                sleep(Duration::from_millis(sleep_ms)).await;
            }
        }
    }

    /// Write one row to the registers. Missing values leave registers as they are.
    fn apply_row(&self, position: usize) {
        let row = &self.rows[position];
        debug!(
            "Writing row {} at timestamp {}",
            position, row.timestamp_ms
        );

        for (i, (column, value)) in self.columns.iter().zip(&row.values).enumerate() {
            let Some(value) = value else {
                continue;
            };
            let word = match column.metric_type {
                MetricType::Gauge => (value * GAUGE_SCALE as f64).round() as i64 as u64,
                _ => self.counter_base[i].wrapping_add(value.max(0.0) as u64),
            };
            self.region.write_u64(i * REGISTER_SIZE, word);
        }

        if let Some(metrics) = &self.metrics {
            metrics.samples_total.inc();
        }
    }

    /// Restart from the first row, carrying counters over the loop.
    fn rewind(&mut self) {
        for (i, column) in self.columns.iter().enumerate() {
            if column.metric_type != MetricType::Counter {
                continue;
            }
            let last = self
                .rows
                .iter()
                .rev()
                .find_map(|row| row.values[i])
                .unwrap_or(0.0);
            self.counter_base[i] = self.counter_base[i].wrapping_add(last.max(0.0) as u64);
        }
        self.state.position.store(0, Ordering::SeqCst);
    }

    /// Get dataset info.
    pub fn dataset_info(&self) -> DatasetInfo {
        let duration_ms = match (self.rows.first(), self.rows.last()) {
            (Some(first), Some(last)) => last.timestamp_ms.saturating_sub(first.timestamp_ms),
            _ => 0,
        };

        DatasetInfo {
            column_count: self.columns.len(),
            sample_count: self.rows.len(),
            duration_ms,
            columns: self.columns.iter().map(|c| c.name.clone()).collect(),
        }
    }
}

/// Turn a CSV header into a valid metric name.
fn metric_name(header: &str) -> String {
    let mut name: String = header
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

/// Dataset information.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetInfo {
    pub column_count: usize,
    pub sample_count: usize,
    pub duration_ms: u64,
    pub columns: Vec<String>,
}

/// Replay errors.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Empty dataset")]
    EmptyDataset,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
