use std::{
    collections::BTreeMap,
    fmt, io,
    sync::{Arc, Weak},
};

use parking_lot::RwLock;
use tracing::{debug, error};

use crate::{
    config::Configuration,
    export::{CacheMetrics, ExposeError, Metadata, Variable},
    helper::MicrosClock,
    sampler::{Collector, Sampler},
    BuildError, Builder,
};

struct Exposed {
    metadata: Metadata,
    variable: Weak<dyn Variable>,
}

struct Inner {
    config: Configuration,
    clock: MicrosClock,
    collector: Collector,
    registry: RwLock<BTreeMap<String, Exposed>>,
}

/// Owns the sampler collector and the registry of exposed variables.
///
/// Metrics work without a runtime; one is needed to window them, to keep their trend history, and
/// to expose them by name.  Handles are cheap to clone and share the same collector.  The
/// collector thread stops once every handle is dropped.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

impl Runtime {
    /// Creates a [`Builder`] for a runtime.
    pub fn builder() -> Builder {
        Builder::default()
    }

    pub(crate) fn from_config(config: Configuration) -> Result<Runtime, BuildError> {
        let clock = MicrosClock::new(config.clock.clone());
        let collector = Collector::new(config.sampling_interval, config.thread_name.clone());
        collector.ensure_running().map_err(|e| {
            error!(error = %e, "failed to spawn sampler collector");
            BuildError::Collector(e)
        })?;

        Ok(Runtime {
            inner: Arc::new(Inner {
                config,
                clock,
                collector,
                registry: RwLock::new(BTreeMap::new()),
            }),
        })
    }

    pub(crate) fn clock(&self) -> MicrosClock {
        self.inner.clock.clone()
    }

    /// Registers `sampler` to be sampled once per sampling interval until it is dropped.
    pub fn schedule(&self, sampler: Weak<dyn Sampler>) {
        self.inner.collector.schedule(sampler);
    }

    /// Makes sure the collector thread is running in the current process.
    ///
    /// The collector thread does not survive `fork`.  Reading a window or an exposed variable
    /// respawns it in the child, and so does calling this.
    pub fn ensure_collector(&self) -> io::Result<()> {
        self.inner.collector.ensure_running()
    }

    pub(crate) fn downgrade(&self) -> WeakRuntime {
        WeakRuntime(Arc::downgrade(&self.inner))
    }

    /// Gets the window size used by latency recorders created without one.
    pub fn default_window_size(&self) -> usize {
        self.inner.config.default_window_size
    }

    /// Gets the configurable percentiles latency recorders report.
    pub fn latency_percentiles(&self) -> [u32; 3] {
        self.inner.config.latency_percentiles
    }

    /// Whether exposed variables keep a trend history.
    pub fn series_enabled(&self) -> bool {
        self.inner.config.series
    }

    /// Exposes `variable` under the name in `metadata`.
    ///
    /// Only a weak reference is kept: once `variable` is dropped, it disappears from the runtime
    /// and its name can be exposed again.
    pub fn expose<V: Variable>(
        &self,
        metadata: Metadata,
        variable: &Arc<V>,
    ) -> Result<(), ExposeError> {
        let name = metadata.name().to_owned();
        if name.is_empty() {
            return Err(ExposeError::EmptyName);
        }

        {
            let mut registry = self.inner.registry.write();
            if registry.get(&name).is_some_and(|e| e.variable.strong_count() > 0) {
                return Err(ExposeError::AlreadyExposed { name });
            }

            let strong: Arc<dyn Variable> = variable.clone();
            let exposed = Exposed { metadata, variable: Arc::downgrade(&strong) };
            registry.insert(name.clone(), exposed);
        }
        debug!(name = %name, "exposed variable");

        if self.series_enabled() {
            variable.enable_series(self);
        }
        Ok(())
    }

    /// Hides the variable exposed as `name`, returning whether it was exposed.
    pub fn hide(&self, name: &str) -> bool {
        let hidden = self
            .inner
            .registry
            .write()
            .remove(name)
            .is_some_and(|e| e.variable.strong_count() > 0);
        if hidden {
            debug!(name, "hid variable");
        }
        hidden
    }

    fn live(&self) -> Vec<(Metadata, Arc<dyn Variable>)> {
        self.inner.collector.recover();

        let mut registry = self.inner.registry.write();
        registry.retain(|_, e| e.variable.strong_count() > 0);
        registry
            .values()
            .filter_map(|e| e.variable.upgrade().map(|v| (e.metadata.clone(), v)))
            .collect()
    }

    /// Gets the names of every exposed variable, in order.
    pub fn list_exposed(&self) -> Vec<String> {
        self.live().into_iter().map(|(metadata, _)| metadata.name().to_owned()).collect()
    }

    /// Writes the value of the variable exposed as `name`.
    ///
    /// Returns `Ok(false)` without writing anything if no such variable is exposed.
    pub fn describe_exposed(
        &self,
        name: &str,
        w: &mut dyn fmt::Write,
        quote_string: bool,
    ) -> Result<bool, fmt::Error> {
        let variable = self.inner.registry.read().get(name).and_then(|e| e.variable.upgrade());
        match variable {
            Some(variable) => variable.describe(w, quote_string).map(|()| true),
            None => Ok(false),
        }
    }

    /// Snapshots every exposed variable.
    pub fn collect_metrics(&self) -> Vec<CacheMetrics> {
        self.live()
            .into_iter()
            .map(|(metadata, variable)| {
                let mut metrics = CacheMetrics::new(&metadata);
                variable.collect_metrics(&mut metrics);
                metrics
            })
            .collect()
    }

    /// Runs a collection round on the calling thread.
    #[cfg(test)]
    pub(crate) fn run_collection_round(&self) -> usize {
        self.inner.collector.sweep()
    }
}

/// A runtime handle that does not keep the collector alive.
#[derive(Clone)]
pub(crate) struct WeakRuntime(Weak<Inner>);

impl WeakRuntime {
    /// Respawns the collector thread after a fork, if the runtime is still around.
    pub fn recover_collector(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.collector.recover();
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("exposed", &self.inner.registry.read().len())
            .finish()
    }
}
