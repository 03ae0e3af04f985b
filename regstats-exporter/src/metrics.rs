// regstats Exporter - Exporter self-metrics
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus metrics describing the exporter itself.
//!
//! Register metrics are published by the domain's block collectors; this
//! module only adds exporter and replay bookkeeping to the same registry and
//! encodes the registry for scrapes.

use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

/// Exporter bookkeeping metrics.
#[derive(Clone)]
pub struct ExporterMetrics {
    /// Total `/metrics` scrapes served.
    pub scrapes_total: IntCounter,
    /// Total dataset rows written to registers.
    pub samples_total: IntCounter,
    /// Current replay position (row index).
    pub replay_position: IntGauge,
    /// Rows in the replay dataset.
    pub replay_total_samples: IntGauge,
    /// Replay speed multiplier.
    pub replay_speed: Gauge,
}

impl ExporterMetrics {
    /// Create the metrics and register them with `registry`.
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let metrics = Self {
            scrapes_total: IntCounter::with_opts(Opts::new(
                "regstats_exporter_scrapes_total",
                "Total metrics scrapes served",
            ))?,
            samples_total: IntCounter::with_opts(Opts::new(
                "regstats_exporter_samples_total",
                "Total dataset rows written to registers",
            ))?,
            replay_position: IntGauge::with_opts(Opts::new(
                "regstats_exporter_replay_position",
                "Current replay position (row index)",
            ))?,
            replay_total_samples: IntGauge::with_opts(Opts::new(
                "regstats_exporter_replay_total_samples",
                "Total rows in the replay dataset",
            ))?,
            replay_speed: Gauge::with_opts(Opts::new(
                "regstats_exporter_replay_speed",
                "Replay speed multiplier",
            ))?,
        };

        registry.register(Box::new(metrics.scrapes_total.clone()))?;
        registry.register(Box::new(metrics.samples_total.clone()))?;
        registry.register(Box::new(metrics.replay_position.clone()))?;
        registry.register(Box::new(metrics.replay_total_samples.clone()))?;
        registry.register(Box::new(metrics.replay_speed.clone()))?;
        Ok(metrics)
    }

    /// Update replay position metrics.
    pub fn update_replay(&self, position: usize, total: usize, speed: f64) {
        self.replay_position.set(position as i64);
        self.replay_total_samples.set(total as i64);
        self.replay_speed.set(speed);
    }
}

/// Encode every metric in `registry` to Prometheus text format.
pub fn encode_metrics(registry: &Registry) -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
