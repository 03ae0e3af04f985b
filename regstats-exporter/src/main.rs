// regstats Exporter - Prometheus exporter for register metrics
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # regstats Exporter
//!
//! Serves a regstats domain over HTTP, with dataset replay support.
//!
//! ## Usage
//!
//! ```bash
//! # Replay a CSV dataset as register blocks
//! regstats-exporter --csv dataset.csv --speed 10.0
//!
//! # Run on custom port, sampling every 250 ms
//! regstats-exporter --csv dataset.csv --port 9090 --interval-ms 250
//!
//! # Play the dataset once
//! regstats-exporter --csv dataset.csv --no-loop
//! ```

mod metrics;

#[cfg(feature = "replay")]
mod replay;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use clap::{ArgAction, Parser};
use metrics::{encode_metrics, ExporterMetrics};
use prometheus::Registry;
use regstats::report::{self, ReportOptions};
use regstats::{Domain, DomainConfig, MetricFilter, MetricType};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "replay")]
use replay::{DatasetInfo, ReplayConfig, ReplayEngine, ReplayState};

/// regstats Prometheus Exporter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "9100")]
    port: u16,

    /// CSV file to replay
    #[arg(short, long)]
    csv: Option<String>,

    /// Replay speed multiplier (1.0 = real-time)
    #[arg(short, long, default_value = "1.0")]
    speed: f64,

    /// Stop the replay at the end of the dataset instead of looping
    #[arg(long = "no-loop", action = ArgAction::SetFalse)]
    loop_replay: bool,

    /// Domain name exported as the `domain` label
    #[arg(long, default_value = "regstats")]
    domain: String,

    /// Register sampling interval in milliseconds
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Skip the clear pass when sampling starts
    #[arg(long)]
    no_clear_on_start: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Application state shared across handlers.
struct AppState {
    domain: Arc<Domain>,
    registry: Registry,
    metrics: ExporterMetrics,
    #[cfg(feature = "replay")]
    replay_state: Option<Arc<ReplayState>>,
    #[cfg(feature = "replay")]
    dataset_info: Option<DatasetInfo>,
    start_time: std::time::Instant,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing; records from the `log` facade are forwarded too
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("regstats Exporter v{}", env!("CARGO_PKG_VERSION"));

    let registry = Registry::new();
    let metrics = ExporterMetrics::register(&registry)?;

    let config = DomainConfig::new(args.domain.clone())
        .with_interval(Duration::from_millis(args.interval_ms))
        .with_clear_on_start(!args.no_clear_on_start);
    let domain = Arc::new(Domain::new(config, registry.clone()));

    // Initialize replay engine if CSV provided
    #[cfg(feature = "replay")]
    let (replay_state, dataset_info) = if let Some(csv_path) = args.csv.clone() {
        let config = ReplayConfig {
            csv_path,
            speed: args.speed,
            loop_replay: args.loop_replay,
            ..Default::default()
        };

        match ReplayEngine::from_csv(config) {
            Ok(engine) => {
                let engine = engine.with_metrics(metrics.clone());
                let state = engine.state();
                let info = engine.dataset_info();
                domain.alloc_zone(engine.zone_spec())?;

                info!(
                    "Dataset loaded: {} columns, {} rows",
                    info.column_count, info.sample_count
                );

                // Start replay in background
                tokio::spawn(engine.run());

                (Some(state), Some(info))
            }
            Err(e) => {
                tracing::error!("Failed to load dataset: {}", e);
                (None, None)
            }
        }
    } else {
        info!("No dataset specified, serving an empty domain");
        (None, None)
    };

    #[cfg(not(feature = "replay"))]
    if args.csv.is_some() {
        tracing::warn!("Replay feature not enabled, ignoring --csv argument");
    }

    domain.start();

    let state = Arc::new(AppState {
        domain: Arc::clone(&domain),
        registry,
        metrics,
        #[cfg(feature = "replay")]
        replay_state: replay_state.clone(),
        #[cfg(feature = "replay")]
        dataset_info,
        start_time: std::time::Instant::now(),
    });

    // Build router
    let app = Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/status", get(status_handler))
        .route("/stats", get(stats_handler))
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("Starting server on http://{}", addr);
    info!("Metrics endpoint: http://{}/metrics", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    #[cfg(feature = "replay")]
    if let Some(replay_state) = replay_state {
        replay_state.running.store(false, Ordering::SeqCst);
    }
    tokio::task::spawn_blocking(move || domain.stop()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Root handler - shows a simple HTML page.
async fn root_handler() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>regstats Exporter</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 800px; margin: 50px auto; padding: 20px; }
        h1 { color: #2c3e50; }
        a { color: #3498db; text-decoration: none; }
        .endpoints { background: #f8f9fa; padding: 20px; border-radius: 8px; margin: 20px 0; }
        .endpoint { margin: 10px 0; }
        code { background: #e9ecef; padding: 2px 6px; border-radius: 4px; }
    </style>
</head>
<body>
    <h1>regstats Exporter</h1>
    <p>Hardware register counters, gauges and flags in Prometheus format.</p>

    <div class="endpoints">
        <h2>Endpoints</h2>
        <div class="endpoint"><a href="/metrics">/metrics</a> - Prometheus metrics</div>
        <div class="endpoint"><a href="/health">/health</a> - Health check</div>
        <div class="endpoint"><a href="/ready">/ready</a> - Readiness check</div>
        <div class="endpoint"><a href="/status">/status</a> - Status information (JSON)</div>
        <div class="endpoint"><a href="/stats">/stats</a> - Text report
            (<code>?non_zero=true&amp;types=counter,flag&amp;long=true</code>)</div>
    </div>

    <p>Every series carries <code>domain</code>, <code>zone</code> and <code>block</code> labels.</p>
</body>
</html>"#,
    )
}

/// Metrics handler - returns Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.metrics.scrapes_total.inc();
    match encode_metrics(&state.registry) {
        Ok(body) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; charset=utf-8")],
            body,
        ),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("Content-Type", "text/plain; charset=utf-8")],
                e.to_string(),
            )
        }
    }
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check handler: ready while the domain is sampling.
async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // domain calls wait for the sampling pass in progress
    let domain = Arc::clone(&state.domain);
    match tokio::task::spawn_blocking(move || domain.is_running()).await {
        Ok(true) => (StatusCode::OK, "Ready"),
        Ok(false) => (StatusCode::SERVICE_UNAVAILABLE, "Not ready"),
        Err(e) => {
            tracing::error!("Readiness check failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Not ready")
        }
    }
}

/// Status information response.
#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_secs: u64,
    domain: DomainStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    replay: Option<ReplayStatus>,
}

/// Domain status information.
#[derive(Serialize)]
struct DomainStatus {
    name: String,
    running: bool,
    interval_ms: u64,
    zones: usize,
    values: usize,
}

impl DomainStatus {
    fn of(domain: &Domain) -> Self {
        Self {
            name: domain.name().to_string(),
            running: domain.is_running(),
            interval_ms: domain.interval().as_millis() as u64,
            zones: domain.zones().len(),
            values: domain.number_of_values(),
        }
    }
}

/// Replay status information.
#[derive(Serialize)]
struct ReplayStatus {
    running: bool,
    position: usize,
    total_samples: usize,
    progress_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    dataset: Option<DatasetInfoStatus>,
}

#[cfg(feature = "replay")]
type DatasetInfoStatus = DatasetInfo;
#[cfg(not(feature = "replay"))]
type DatasetInfoStatus = ();

/// Status handler - returns JSON status information.
async fn status_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, StatusCode> {
    let domain = Arc::clone(&state.domain);
    let domain = tokio::task::spawn_blocking(move || DomainStatus::of(&domain))
        .await
        .map_err(|e| {
            tracing::error!("Failed to read domain status: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    #[cfg(feature = "replay")]
    let replay = state.replay_state.as_ref().map(|replay_state| {
        let position = replay_state.position.load(Ordering::SeqCst);
        let total = replay_state.total_samples.load(Ordering::SeqCst);
        let progress = if total > 0 {
            (position as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        ReplayStatus {
            running: replay_state.running.load(Ordering::SeqCst),
            position,
            total_samples: total,
            progress_percent: progress,
            dataset: state.dataset_info.clone(),
        }
    });

    #[cfg(not(feature = "replay"))]
    let replay: Option<ReplayStatus> = None;

    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        domain,
        replay,
    }))
}

/// Query parameters of the text report.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatsQuery {
    /// Hide metrics and elements whose value is zero
    non_zero: bool,
    /// Comma separated metric types to keep (counter, gauge, flag)
    types: Option<String>,
    /// Always print zone.block.metric names
    long: bool,
    /// Print exported labels under each value
    labels: bool,
    /// Append each block's last update time
    last_update: bool,
    /// Name elements by their `alias` label when present
    aliases: bool,
}

impl StatsQuery {
    fn filter(&self) -> Result<MetricFilter, String> {
        let mut filter = MetricFilter::all();
        filter.non_zero = self.non_zero;
        if let Some(types) = &self.types {
            for name in types.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let metric_type = MetricType::ALL
                    .into_iter()
                    .find(|t| t.as_str() == name)
                    .ok_or_else(|| format!("unknown metric type: {}", name))?;
                filter.types.push(metric_type);
            }
        }
        Ok(filter)
    }

    fn options(&self) -> ReportOptions {
        ReportOptions {
            long_names: self.long,
            labels: self.labels,
            last_update: self.last_update,
            aliases: self.aliases,
        }
    }
}

/// Stats handler - returns the plain-text report.
async fn stats_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> impl IntoResponse {
    let filter = match query.filter() {
        Ok(filter) => filter,
        Err(e) => return (StatusCode::BAD_REQUEST, e),
    };
    let options = query.options();
    let domain = Arc::clone(&state.domain);
    match tokio::task::spawn_blocking(move || report::render(&domain, &filter, &options)).await {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!("Failed to render report: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
