//! Zones: named groups of blocks that attach to a domain as one unit
//!
//! A zone is built detached from a [`ZoneSpec`], then handed to
//! [`Domain::attach_zone`](crate::Domain::attach_zone), which keeps it until it
//! is detached again. Attaching is all-or-nothing: when any block fails to
//! build or register its collector, the blocks already done are rolled back
//! and no driver hook runs.

use std::fmt;

use prometheus::Registry;

use crate::block::{Block, BlockSpec};
use crate::error::Result;
use crate::metric::{MetricValue, MetricVisit};

/// Declarative description of a zone
#[derive(Debug)]
pub struct ZoneSpec {
    pub name: String,
    pub blocks: Vec<BlockSpec>,
}

impl ZoneSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
        }
    }

    pub fn with_block(mut self, block: BlockSpec) -> Self {
        self.blocks.push(block);
        self
    }
}

/// Identifies a zone attached to a domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ZoneHandle {
    pub(crate) domain: u64,
    pub(crate) zone: u64,
}

impl fmt::Display for ZoneHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zone#{}@domain#{}", self.zone, self.domain)
    }
}

/// A zone and its blocks
pub struct Zone {
    name: String,
    enabled: bool,
    blocks: Vec<Block>,
    nvalues: usize,
    /// Set while attached
    handle: Option<ZoneHandle>,
}

impl Zone {
    /// Allocate a detached zone.
    ///
    /// # Panics
    ///
    /// Panics when a metric spec is invalid.
    pub fn alloc(spec: ZoneSpec) -> Self {
        let blocks: Vec<Block> = spec.blocks.into_iter().map(Block::alloc).collect();
        let nvalues = blocks.iter().map(Block::number_of_values).sum();

        Self {
            name: spec.name,
            enabled: true,
            blocks,
            nvalues,
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Number of values across all blocks
    pub fn number_of_values(&self) -> usize {
        self.nvalues
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Handle while attached
    pub fn handle(&self) -> Option<ZoneHandle> {
        self.handle
    }

    pub fn is_attached(&self) -> bool {
        self.handle.is_some()
    }

    /// Copy values into `out` in block and metric order, returning the count
    pub fn get_values(&self, out: &mut [MetricValue]) -> usize {
        let mut n = 0;
        for block in &self.blocks {
            n += block.get_values(&mut out[n..]);
            if n == out.len() {
                break;
            }
        }
        n
    }

    /// Build and register every block's collector, then attach the drivers
    pub(crate) fn attach(
        &mut self,
        domain: &str,
        registry: &Registry,
        handle: ZoneHandle,
    ) -> Result<()> {
        for i in 0..self.blocks.len() {
            if let Err(e) = self.blocks[i].prepare(domain, &self.name) {
                self.rollback(i, 0, registry);
                return Err(e);
            }
        }
        for i in 0..self.blocks.len() {
            if let Err(e) = self.blocks[i].register(registry) {
                self.rollback(self.blocks.len(), i, registry);
                return Err(e);
            }
        }

        for block in &mut self.blocks {
            block.attach();
        }
        self.handle = Some(handle);
        log::info!(
            "attached zone {} to domain {} ({} values)",
            self.name,
            domain,
            self.nvalues
        );
        Ok(())
    }

    /// Undo the first `prepared` prepares and the first `registered` registrations
    fn rollback(&mut self, prepared: usize, registered: usize, registry: &Registry) {
        log::warn!("rolling back attach of zone {}", self.name);
        for block in &self.blocks[..registered] {
            block.unregister(registry);
        }
        for block in &mut self.blocks[..prepared] {
            block.unprepare();
        }
    }

    pub(crate) fn detach(&mut self, registry: &Registry) {
        for block in &mut self.blocks {
            block.detach(registry);
        }
        self.handle = None;
        log::info!("detached zone {}", self.name);
    }

    /// Run a sampling or clear pass over every block. Disabled zones are skipped.
    pub(crate) fn update(&mut self, clear: bool) {
        if !self.enabled {
            return;
        }
        for block in &mut self.blocks {
            block.update(clear);
        }
    }

    /// Enable sampling, returning whether the state changed
    pub(crate) fn enable(&mut self) -> bool {
        !std::mem::replace(&mut self.enabled, true)
    }

    /// Disable sampling, returning whether the state changed
    pub(crate) fn disable(&mut self) -> bool {
        std::mem::replace(&mut self.enabled, false)
    }

    /// Visit every metric in block and metric order until `f` fails
    pub(crate) fn for_each_metric<E, F>(
        &self,
        domain: &str,
        f: &mut F,
    ) -> std::result::Result<(), E>
    where
        F: FnMut(&MetricVisit<'_>) -> std::result::Result<(), E>,
    {
        for block in &self.blocks {
            for metric in block.metrics() {
                f(&MetricVisit {
                    domain,
                    zone: &self.name,
                    block: block.name(),
                    metric,
                    last_update: block.last_update(),
                })?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Zone")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("blocks", &self.blocks)
            .field("handle", &self.handle)
            .finish()
    }
}
