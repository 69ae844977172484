use std::{fmt, sync::Arc};

use super::{reducer::ReducerSource, Adder};
use crate::{
    export::{CacheMetrics, MetricValue, SeriesError, SeriesOptions, Variable},
    ops::{AddTo, MinusFrom},
    sampler::ReducerSampler,
    window::Windowed,
    Runtime,
};

/// A value that can go up and down, written to from any number of threads.
///
/// Increments and decrements from different threads never contend.  [`set`](Gauge::set) is a
/// reset followed by an add, so a concurrent increment from another thread may land on either
/// side of it.
#[derive(Default)]
pub struct Gauge {
    inner: Adder<f64>,
}

impl Gauge {
    /// Creates a new gauge at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the gauge by `value`.
    pub fn increment(&self, value: f64) {
        self.inner.record(value);
    }

    /// Decrements the gauge by `value`.
    pub fn decrement(&self, value: f64) {
        self.inner.record(-value);
    }

    /// Sets the gauge to `value`.
    pub fn set(&self, value: f64) {
        self.inner.reset();
        self.inner.record(value);
    }

    /// Gets the current value.
    pub fn get_value(&self) -> f64 {
        self.inner.get_value()
    }
}

impl Windowed for Gauge {
    type Source = ReducerSource<f64, AddTo, MinusFrom>;

    fn sampler(&self, runtime: &Runtime) -> Arc<ReducerSampler<Self::Source>> {
        self.inner.sampler(runtime)
    }
}

impl Variable for Gauge {
    fn describe(&self, w: &mut dyn fmt::Write, _quote_string: bool) -> fmt::Result {
        write!(w, "{}", self.get_value())
    }

    fn describe_series(
        &self,
        w: &mut dyn fmt::Write,
        options: &SeriesOptions,
    ) -> Result<(), SeriesError> {
        self.inner.describe_series(w, options)
    }

    fn collect_metrics(&self, metrics: &mut CacheMetrics) {
        metrics.set_value(MetricValue::Gauge(self.get_value()));
    }

    fn enable_series(&self, runtime: &Runtime) {
        self.inner.enable_series(runtime);
    }
}
