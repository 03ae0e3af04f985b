//! # regstats - hierarchical register metrics
//!
//! Samples hardware counter and status registers on a schedule, turns raw
//! register words into counters, gauges and flags, and publishes them to a
//! Prometheus registry.
//!
//! ## Hierarchy
//!
//! ```text
//! Domain (sampling thread, registry)
//!  └─ Zone (attach/detach unit, enable/disable)
//!      └─ Block (register window, driver hooks)
//!          └─ Metric (type, flags, labels)
//!              └─ Element (one value; N for array metrics)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use regstats::{
//!     BlockSpec, Domain, DomainConfig, MemoryRegion, MetricSpec, MetricValue, RegisterField,
//!     ZoneSpec,
//! };
//!
//! let region = MemoryRegion::new(8);
//! let zone = ZoneSpec::new("cmac0").with_block(
//!     BlockSpec::new("rx")
//!         .with_io(Arc::new(region.clone()))
//!         .with_metric(MetricSpec::counter("rx_packets", RegisterField::new(0, 4))),
//! );
//!
//! let domain = Domain::new(DomainConfig::new("card0"), prometheus::Registry::new());
//! domain.alloc_zone(zone).unwrap();
//!
//! region.write_u32(0, 100);
//! domain.update_metrics();
//!
//! let mut values = [MetricValue::default(); 1];
//! assert_eq!(domain.get_values(&mut values), 1);
//! assert_eq!(values[0].raw, 100);
//! ```
//!
//! ## Modules
//!
//! - [`decode`]: Register windows and field decoding
//! - [`metric`]: Metric specs, elements and numeric semantics
//! - [`label`]: Label specs and resolution
//! - [`block`]: Blocks, driver hooks and the read pipeline
//! - [`zone`]: Zones and attach/detach
//! - [`domain`]: Domains and the sampling thread
//! - [`exporter`]: Prometheus collectors
//! - [`filter`]: Metric selection
//! - [`report`]: Plain-text report

// Modules
pub mod block;
pub mod config;
pub mod decode;
pub mod domain;
pub mod error;
pub mod exporter;
pub mod filter;
pub mod label;
pub mod metric;
pub mod report;
pub mod zone;

// Re-exports for convenient access
pub use block::{Block, BlockDriver, BlockSpec};
pub use config::{DomainConfig, DEFAULT_INTERVAL_MS};
pub use decode::{decode, MemoryRegion, MmioRegion, RegisterField, RegisterIo};
pub use domain::{Domain, ZoneRef};
pub use error::{Result, StatsError};
pub use exporter::BlockCollector;
pub use filter::MetricFilter;
pub use label::{IndexLabel, Label, LabelScope, LabelSet, LabelSource, LabelSpec, LabelValue};
pub use metric::{
    Element, Metric, MetricFlags, MetricSpec, MetricType, MetricValue, MetricVisit,
};
pub use report::ReportOptions;
pub use zone::{Zone, ZoneHandle, ZoneSpec};

#[doc(hidden)]
pub use log as __log;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
