use std::{fmt, sync::Arc};

use super::{reducer::ReducerSource, Adder};
use crate::{
    export::{CacheMetrics, MetricValue, SeriesError, SeriesOptions, Variable},
    ops::{AddTo, Arithmetic, MinusFrom},
    sampler::ReducerSampler,
    window::Windowed,
    Runtime,
};

/// A monotonically increasing count, written to from any number of threads.
#[derive(Default)]
pub struct Counter {
    inner: Adder<u64>,
}

impl Counter {
    /// Creates a new counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value` to the counter.
    pub fn record(&self, value: u64) {
        self.inner.record(value);
    }

    /// Increments the counter by one.
    pub fn increment(&self) {
        self.inner.record(1);
    }

    /// Gets the current count.
    pub fn get_value(&self) -> u64 {
        self.inner.get_value()
    }

    /// Resets the count to zero, returning the prior count.
    pub fn reset(&self) -> u64 {
        self.inner.reset()
    }
}

impl Windowed for Counter {
    type Source = ReducerSource<u64, AddTo, MinusFrom>;

    fn sampler(&self, runtime: &Runtime) -> Arc<ReducerSampler<Self::Source>> {
        self.inner.sampler(runtime)
    }
}

impl Variable for Counter {
    fn describe(&self, w: &mut dyn fmt::Write, quote_string: bool) -> fmt::Result {
        self.inner.describe(w, quote_string)
    }

    fn describe_series(
        &self,
        w: &mut dyn fmt::Write,
        options: &SeriesOptions,
    ) -> Result<(), SeriesError> {
        self.inner.describe_series(w, options)
    }

    fn collect_metrics(&self, metrics: &mut CacheMetrics) {
        metrics.set_value(MetricValue::Counter(self.get_value().as_f64()));
    }

    fn enable_series(&self, runtime: &Runtime) {
        self.inner.enable_series(runtime);
    }
}
