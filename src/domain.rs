//! Domains: the root of the hierarchy and owner of the sampling thread
//!
//! A [`Domain`] owns its attached zones, the exporter registry they publish
//! to and a background thread that runs a sampling pass over every enabled
//! zone once per interval. One mutex guards the whole tree; every public
//! operation, and every sampling pass, runs with it held.
//!
//! ## Thread loop
//!
//! ```text
//! loop {
//!     lock
//!     if !running { break }
//!     sample enabled zones
//!     unlock
//!     sleep(interval)
//! }
//! ```
//!
//! Stopping clears `running` under the lock and joins the thread, so the
//! thread exits within roughly one interval. A fatal error during a pass
//! aborts the process instead of leaving the tree lock poisoned.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use prometheus::Registry;

use crate::config::DomainConfig;
use crate::error::Result;
use crate::metric::{MetricValue, MetricVisit};
use crate::zone::{Zone, ZoneHandle, ZoneSpec};

static NEXT_DOMAIN_ID: AtomicU64 = AtomicU64::new(1);

struct Tree {
    zones: Vec<Zone>,
    nvalues: usize,
    running: bool,
    next_zone: u64,
}

impl Tree {
    fn position(&self, handle: ZoneHandle) -> Option<usize> {
        self.zones.iter().position(|z| z.handle() == Some(handle))
    }

    fn update(&mut self, clear: bool) {
        for zone in &mut self.zones {
            zone.update(clear);
        }
    }

    fn get_values(&self, out: &mut [MetricValue]) -> usize {
        let mut n = 0;
        for zone in &self.zones {
            if n == out.len() {
                break;
            }
            n += zone.get_values(&mut out[n..]);
        }
        n
    }
}

struct Inner {
    id: u64,
    name: String,
    interval: Duration,
    clear_on_start: bool,
    registry: Registry,
    tree: Mutex<Tree>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Tree> {
        self.tree
            .lock()
            .unwrap_or_else(|_| crate::fatal!("domain {} lock poisoned", self.name))
    }

    /// Lock and find the zone behind `handle`, which must belong here
    fn lock_zone(&self, handle: ZoneHandle) -> (MutexGuard<'_, Tree>, usize) {
        if handle.domain != self.id {
            crate::fatal!("{} does not belong to domain {}", handle, self.name);
        }
        let tree = self.lock();
        match tree.position(handle) {
            Some(pos) => (tree, pos),
            None => {
                drop(tree);
                crate::fatal!("{} is not attached to domain {}", handle, self.name)
            }
        }
    }

    /// One pass of the sampling loop; `false` once the domain is stopped
    fn pass(&self) -> bool {
        let mut tree = self.lock();
        if !tree.running {
            return false;
        }
        tree.update(false);
        true
    }

    /// Sampling loop. A fatal error inside a pass aborts the process.
    fn run(&self) {
        log::debug!("sampling thread of domain {} started", self.name);
        loop {
            match panic::catch_unwind(AssertUnwindSafe(|| self.pass())) {
                Ok(true) => thread::sleep(self.interval),
                Ok(false) => break,
                Err(_) => {
                    log::error!("sampling pass of domain {} failed, aborting", self.name);
                    process::abort();
                }
            }
        }
        log::debug!("sampling thread of domain {} stopped", self.name);
    }
}

/// Root of a metrics hierarchy
pub struct Domain {
    inner: Arc<Inner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Domain {
    /// Create a stopped domain publishing to `registry`
    pub fn new(config: DomainConfig, registry: Registry) -> Self {
        let interval = config.interval();
        log::info!(
            "created domain {} (interval {:?}, clear on start: {})",
            config.name,
            interval,
            config.clear_on_start
        );
        Self {
            inner: Arc::new(Inner {
                id: NEXT_DOMAIN_ID.fetch_add(1, Ordering::Relaxed),
                name: config.name,
                interval,
                clear_on_start: config.clear_on_start,
                registry,
                tree: Mutex::new(Tree {
                    zones: Vec::new(),
                    nvalues: 0,
                    running: false,
                    next_zone: 1,
                }),
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Registry the domain's collectors are registered with
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    fn thread_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.thread
            .lock()
            .unwrap_or_else(|_| crate::fatal!("domain {} thread slot poisoned", self.inner.name))
    }

    /// Start background sampling. Does nothing when already running.
    ///
    /// With reset-on-start configured, a clear pass runs first.
    pub fn start(&self) {
        let mut slot = self.thread_slot();
        {
            let mut tree = self.inner.lock();
            if tree.running {
                return;
            }
            tree.running = true;
            if self.inner.clear_on_start {
                tree.update(true);
            }
        }

        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name(format!("regstats-{}", self.inner.name))
            .spawn(move || inner.run())
            .unwrap_or_else(|e| {
                crate::fatal!("failed to spawn sampling thread for {}: {}", self.inner.name, e)
            });
        *slot = Some(handle);
        log::info!("started domain {}", self.inner.name);
    }

    /// Stop background sampling and wait for the thread to exit.
    /// Does nothing when not running.
    pub fn stop(&self) {
        let mut slot = self.thread_slot();
        {
            let mut tree = self.inner.lock();
            if !tree.running {
                return;
            }
            tree.running = false;
        }

        if let Some(handle) = slot.take() {
            if handle.join().is_err() {
                crate::fatal!("sampling thread of domain {} panicked", self.inner.name);
            }
        }
        log::info!("stopped domain {}", self.inner.name);
    }

    /// Attach a detached zone.
    ///
    /// On error nothing stays registered and the zone is dropped.
    pub fn attach_zone(&self, mut zone: Zone) -> Result<ZoneHandle> {
        let mut tree = self.inner.lock();
        let handle = ZoneHandle {
            domain: self.inner.id,
            zone: tree.next_zone,
        };
        zone.attach(&self.inner.name, &self.inner.registry, handle)?;

        tree.next_zone += 1;
        tree.nvalues += zone.number_of_values();
        tree.zones.push(zone);
        Ok(handle)
    }

    /// Allocate a zone from `spec` and attach it
    pub fn alloc_zone(&self, spec: ZoneSpec) -> Result<ZoneHandle> {
        self.attach_zone(Zone::alloc(spec))
    }

    /// Detach a zone and hand it back.
    ///
    /// # Panics
    ///
    /// Panics when `handle` is not attached to this domain.
    pub fn detach_zone(&self, handle: ZoneHandle) -> Zone {
        let (mut tree, pos) = self.inner.lock_zone(handle);
        let mut zone = tree.zones.remove(pos);
        tree.nvalues -= zone.number_of_values();
        zone.detach(&self.inner.registry);
        zone
    }

    /// Detach a zone and drop it
    pub fn free_zone(&self, handle: ZoneHandle) {
        drop(self.detach_zone(handle));
    }

    /// Handles of attached zones, in attach order
    pub fn zones(&self) -> Vec<ZoneHandle> {
        self.inner
            .lock()
            .zones
            .iter()
            .filter_map(Zone::handle)
            .collect()
    }

    /// Handle of the first attached zone named `name`
    pub fn find_zone(&self, name: &str) -> Option<ZoneHandle> {
        self.inner
            .lock()
            .zones
            .iter()
            .find(|z| z.name() == name)
            .and_then(Zone::handle)
    }

    /// Operations on one attached zone
    pub fn zone(&self, handle: ZoneHandle) -> ZoneRef<'_> {
        ZoneRef {
            domain: self,
            handle,
        }
    }

    /// Number of values across all attached zones
    pub fn number_of_values(&self) -> usize {
        self.inner.lock().nvalues
    }

    /// Copy values into `out` in zone, block and metric order.
    ///
    /// Returns the number written; output stops silently when `out` is full.
    pub fn get_values(&self, out: &mut [MetricValue]) -> usize {
        self.inner.lock().get_values(out)
    }

    /// Owned copy of up to `max` values, taken under one lock
    pub fn snapshot_values(&self, max: usize) -> Vec<MetricValue> {
        let tree = self.inner.lock();
        let mut out = vec![MetricValue::default(); max.min(tree.nvalues)];
        let n = tree.get_values(&mut out);
        out.truncate(n);
        out
    }

    /// Run one sampling pass now
    pub fn update_metrics(&self) {
        self.inner.lock().update(false);
    }

    /// Run one clear pass now
    pub fn clear_metrics(&self) {
        self.inner.lock().update(true);
    }

    /// Visit every metric in zone, block and metric order.
    ///
    /// The domain stays locked for the whole traversal, so `f` must not call
    /// back into the domain. The first error stops the walk and is returned.
    pub fn for_each_metric<E, F>(&self, mut f: F) -> std::result::Result<(), E>
    where
        F: FnMut(&MetricVisit<'_>) -> std::result::Result<(), E>,
    {
        let tree = self.inner.lock();
        for zone in &tree.zones {
            zone.for_each_metric(&self.inner.name, &mut f)?;
        }
        Ok(())
    }
}

impl Drop for Domain {
    fn drop(&mut self) {
        if thread::panicking() {
            // let the sampler wind down on its own
            let mut tree = self.inner.tree.lock().unwrap_or_else(PoisonError::into_inner);
            tree.running = false;
            return;
        }

        self.stop();
        let mut tree = self.inner.lock();
        let zones = std::mem::take(&mut tree.zones);
        tree.nvalues = 0;
        for mut zone in zones {
            zone.detach(&self.inner.registry);
        }
        log::info!("destroyed domain {}", self.inner.name);
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("interval", &self.inner.interval)
            .finish()
    }
}

/// Borrowed view of one attached zone
#[derive(Debug, Clone, Copy)]
pub struct ZoneRef<'a> {
    domain: &'a Domain,
    handle: ZoneHandle,
}

impl ZoneRef<'_> {
    fn with_zone<T>(&self, f: impl FnOnce(&mut Zone) -> T) -> T {
        let (mut tree, pos) = self.domain.inner.lock_zone(self.handle);
        f(&mut tree.zones[pos])
    }

    pub fn handle(&self) -> ZoneHandle {
        self.handle
    }

    pub fn name(&self) -> String {
        self.with_zone(|z| z.name().to_string())
    }

    pub fn is_enabled(&self) -> bool {
        self.with_zone(|z| z.is_enabled())
    }

    /// Resume periodic sampling of the zone.
    ///
    /// With reset-on-start configured, re-enabling runs a clear pass.
    pub fn enable(&self) {
        let clear = self.domain.inner.clear_on_start;
        self.with_zone(|z| {
            if z.enable() && clear {
                z.update(true);
            }
        });
    }

    /// Exclude the zone from sampling and clear passes
    pub fn disable(&self) {
        self.with_zone(|z| {
            z.disable();
        });
    }

    pub fn number_of_values(&self) -> usize {
        self.with_zone(|z| z.number_of_values())
    }

    /// Copy the zone's values into `out`, returning the count
    pub fn get_values(&self, out: &mut [MetricValue]) -> usize {
        self.with_zone(|z| z.get_values(out))
    }

    pub fn update_metrics(&self) {
        self.with_zone(|z| z.update(false));
    }

    pub fn clear_metrics(&self) {
        self.with_zone(|z| z.update(true));
    }

    /// Visit the zone's metrics in block and metric order
    pub fn for_each_metric<E, F>(&self, mut f: F) -> std::result::Result<(), E>
    where
        F: FnMut(&MetricVisit<'_>) -> std::result::Result<(), E>,
    {
        let name = &self.domain.inner.name;
        self.with_zone(|z| z.for_each_metric(name, &mut f))
    }
}
