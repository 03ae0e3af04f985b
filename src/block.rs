//! Blocks and the register read pipeline
//!
//! A block is a group of metrics behind one register window and one driver.
//! Driver hooks run in the order `attach`, then any number of sampling passes
//! bracketed by `latch`/`release`, then `detach`.
//!
//! ## Sampling pass
//!
//! ```text
//! latch(scratch)
//! for each metric:
//!     read N raw values      (driver read hook, or direct decode)
//!     update each element    (counter / gauge / flag semantics)
//!     convert each element   (driver convert hook, or numeric cast)
//!     publish to exporter
//! release(scratch)
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use prometheus::Registry;

use crate::decode::{decode, RegisterIo};
use crate::error::Result;
use crate::exporter::BlockCollector;
use crate::label::LabelScope;
use crate::metric::{Metric, MetricSpec, MetricValue};

/// Driver hooks of a block.
///
/// Every hook has a default: no-op lifecycle hooks, direct register decode
/// for reads and a numeric cast for conversion. Hooks are treated as
/// infallible and run with the domain lock held, so a slow hook delays every
/// other operation on the domain.
pub trait BlockDriver: Send {
    /// Take ownership of the block's registers
    fn attach(&mut self, _block: &str) {}

    /// Release the block's registers
    fn detach(&mut self, _block: &str) {}

    /// Begin a sampling pass. `scratch` is zeroed before every pass.
    fn latch(&mut self, _scratch: &mut [u8]) {}

    /// End a sampling pass
    fn release(&mut self, _scratch: &mut [u8]) {}

    /// Read the raw values of one metric into `values` (one per element).
    ///
    /// Return `false` to fall back to direct register decoding.
    fn read_metric(
        &mut self,
        _metric: &MetricSpec,
        _values: &mut [u64],
        _scratch: &mut [u8],
    ) -> bool {
        false
    }

    /// Convert an accumulated raw value to its exported float
    fn convert_metric(&mut self, _metric: &MetricSpec, raw: u64, _scratch: &[u8]) -> f64 {
        raw as f64
    }
}

/// Declarative description of a block
pub struct BlockSpec {
    pub name: String,
    /// Register window for direct reads
    pub io: Option<Arc<dyn RegisterIo>>,
    pub metrics: Vec<MetricSpec>,
    /// Size of the scratch buffer handed to driver hooks
    pub latch_buffer_size: usize,
    pub driver: Option<Box<dyn BlockDriver>>,
}

impl BlockSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            io: None,
            metrics: Vec::new(),
            latch_buffer_size: 0,
            driver: None,
        }
    }

    pub fn with_io(mut self, io: Arc<dyn RegisterIo>) -> Self {
        self.io = Some(io);
        self
    }

    pub fn with_metric(mut self, metric: MetricSpec) -> Self {
        self.metrics.push(metric);
        self
    }

    pub fn with_metrics(mut self, metrics: impl IntoIterator<Item = MetricSpec>) -> Self {
        self.metrics.extend(metrics);
        self
    }

    pub fn with_driver(mut self, driver: impl BlockDriver + 'static) -> Self {
        self.driver = Some(Box::new(driver));
        self
    }

    pub fn with_latch_buffer(mut self, size: usize) -> Self {
        self.latch_buffer_size = size;
        self
    }
}

impl fmt::Debug for BlockSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockSpec")
            .field("name", &self.name)
            .field("io", &self.io.as_ref().map(|io| io.len()))
            .field("metrics", &self.metrics.len())
            .field("latch_buffer_size", &self.latch_buffer_size)
            .field("driver", &self.driver.is_some())
            .finish()
    }
}

struct DirectIo;

impl BlockDriver for DirectIo {}

/// A block of metrics with its driver
pub struct Block {
    name: String,
    io: Option<Arc<dyn RegisterIo>>,
    metrics: Vec<Metric>,
    driver: Box<dyn BlockDriver>,
    scratch: Vec<u8>,
    /// Raw read buffer, sized for the largest metric
    raw: Vec<u64>,
    last_update: Option<SystemTime>,
    collector: Option<BlockCollector>,
}

impl Block {
    /// Allocate a block and its metrics.
    ///
    /// # Panics
    ///
    /// Panics when a metric spec is invalid (see [`Metric::alloc`]).
    pub fn alloc(spec: BlockSpec) -> Self {
        let BlockSpec {
            name,
            io,
            metrics,
            latch_buffer_size,
            driver,
        } = spec;

        let metrics: Vec<Metric> = metrics
            .into_iter()
            .map(|m| Metric::alloc(m, &name))
            .collect();
        let max_elements = metrics.iter().map(Metric::len).max().unwrap_or(0);

        Self {
            name,
            io,
            metrics,
            driver: driver.unwrap_or_else(|| Box::new(DirectIo)),
            scratch: vec![0; latch_buffer_size],
            raw: vec![0; max_elements],
            last_update: None,
            collector: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Number of values (elements) across all metrics
    pub fn number_of_values(&self) -> usize {
        self.metrics.iter().map(Metric::len).sum()
    }

    /// Time of the last completed sampling pass
    pub fn last_update(&self) -> Option<SystemTime> {
        self.last_update
    }

    pub fn is_attached(&self) -> bool {
        self.collector.is_some()
    }

    /// Resolve labels and build the block's collector.
    ///
    /// Nothing is registered yet; on error the block is left detached.
    pub(crate) fn prepare(&mut self, domain: &str, zone: &str) -> Result<()> {
        for metric in &mut self.metrics {
            let metric_name = metric.name().to_string();
            let scope = LabelScope {
                domain,
                zone,
                block: &self.name,
                metric: &metric_name,
            };
            metric.resolve_labels(&scope);
        }

        let scope = LabelScope {
            domain,
            zone,
            block: &self.name,
            metric: "",
        };
        match BlockCollector::build(&scope, &mut self.metrics) {
            Ok(collector) => {
                self.collector = Some(collector);
                Ok(())
            }
            Err(e) => {
                self.release_labels();
                Err(e)
            }
        }
    }

    pub(crate) fn register(&self, registry: &Registry) -> Result<()> {
        match &self.collector {
            Some(collector) => collector.register(registry),
            None => Ok(()),
        }
    }

    /// Remove a registered collector without touching the driver
    pub(crate) fn unregister(&self, registry: &Registry) {
        if let Some(collector) = &self.collector {
            if let Err(e) = collector.unregister(registry) {
                crate::fatal!("failed to unregister block {}: {}", self.name, e);
            }
        }
    }

    /// Undo [`prepare`](Self::prepare) without touching the registry or driver
    pub(crate) fn unprepare(&mut self) {
        self.collector = None;
        self.release_labels();
    }

    /// Hand the block to its driver. The collector must be registered.
    pub(crate) fn attach(&mut self) {
        log::debug!("attaching block {}", self.name);
        self.driver.attach(&self.name);
    }

    /// Release the driver, unregister the collector and drop labels
    pub(crate) fn detach(&mut self, registry: &Registry) {
        log::debug!("detaching block {}", self.name);
        self.driver.detach(&self.name);
        self.unregister(registry);
        self.unprepare();
    }

    fn release_labels(&mut self) {
        for metric in &mut self.metrics {
            metric.release_labels();
        }
    }

    /// Run one sampling pass, or a clear pass when `clear` is set.
    ///
    /// # Panics
    ///
    /// Panics on an unsupported register size, or when a metric has to be
    /// decoded directly and the block has no register window.
    pub(crate) fn update(&mut self, clear: bool) {
        let Self {
            name,
            io,
            metrics,
            driver,
            scratch,
            raw,
            ..
        } = self;

        log::trace!("{} pass over block {}", if clear { "clear" } else { "sampling" }, name);
        scratch.fill(0);
        driver.latch(scratch);

        for metric in metrics.iter_mut() {
            let n = metric.len();
            let values = &mut raw[..n];
            values.fill(0);

            let (spec, elements) = metric.split_mut();
            let mask = if driver.read_metric(spec, values, scratch) {
                spec.field.width_mask()
            } else {
                read_direct(name, io.as_deref(), spec, values);
                spec.field.value_mask()
            };

            for (element, current) in elements.iter_mut().zip(values.iter()) {
                element.update_masked(spec, *current, mask, clear);
                element.converted = driver.convert_metric(spec, element.value, scratch);
                if let Some(gauge) = &element.gauge {
                    gauge.set(element.converted);
                }
            }
        }

        driver.release(scratch);
        self.last_update = Some(SystemTime::now());
    }

    /// Copy element values into `out`, returning how many were written
    pub(crate) fn get_values(&self, out: &mut [MetricValue]) -> usize {
        let mut n = 0;
        for element in self.metrics.iter().flat_map(|m| m.elements()) {
            if n == out.len() {
                break;
            }
            out[n] = element.value();
            n += 1;
        }
        n
    }
}

fn read_direct(block: &str, io: Option<&dyn RegisterIo>, spec: &MetricSpec, values: &mut [u64]) {
    let Some(io) = io else {
        crate::fatal!(
            "metric {} in block {} has no driver read and the block has no register window",
            spec.name,
            block
        );
    };

    let field = &spec.field;
    let mut buf = [0u8; 8];
    for (index, value) in values.iter_mut().enumerate() {
        let bytes = match buf.get_mut(..field.size) {
            Some(bytes) => bytes,
            None => crate::fatal!(
                "invalid size {} bytes for metric {} in block {} at offset 0x{:x}",
                field.size,
                spec.name,
                block,
                field.offset
            ),
        };
        io.read(field.element_offset(index), bytes);
        *value = decode(bytes, field.size, field.shift, field.width, field.invert)
            .unwrap_or_else(|e| {
                crate::fatal!(
                    "decode failed for metric {} in block {} at offset 0x{:x}: {}",
                    spec.name,
                    block,
                    field.offset,
                    e
                )
            });
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("name", &self.name)
            .field("metrics", &self.metrics)
            .field("last_update", &self.last_update)
            .field("collector", &self.collector)
            .finish()
    }
}
