//! Approximate quantiles over bounded memory.
//!
//! Values are bucketed by bit width into 32 intervals, each keeping a bounded random subset of
//! the values fed to it.  A quantile is found by walking interval counts to the interval holding
//! the requested rank, then reading the matching order statistic of that interval's samples.
//!
//! Each thread fills small [`ThreadLocalPercentileSamples`], flushing an interval into the
//! combiner's [`GlobalPercentileSamples`] whenever it fills up.
use std::{fmt, sync::Arc};

use once_cell::sync::OnceCell;
use tracing::{error, warn};

mod interval;
pub use self::interval::{round_of_expectation, PercentileInterval};

mod samples;
pub use self::samples::{
    interval_index, GlobalPercentileSamples, PercentileSamples, ThreadLocalPercentileSamples,
    NUM_INTERVALS,
};

use crate::{
    combiner::{AgentCombiner, Combine, Element, MutexElement},
    export::{CacheMetrics, MetricValue, Variable},
    sampler::{ReducerSampler, SampleSource, Sampler},
    window::Windowed,
    Runtime,
};

impl<const N: usize> Element for PercentileSamples<N> {
    type Container = MutexElement<Self>;
}

/// Merges thread-local samples into global samples.
#[derive(Clone, Copy, Debug, Default)]
pub struct PercentileOp;

impl Combine for PercentileOp {
    type Result = GlobalPercentileSamples;
    type Element = ThreadLocalPercentileSamples;

    fn result_identity(&self) -> GlobalPercentileSamples {
        GlobalPercentileSamples::new()
    }

    fn element_identity(&self) -> ThreadLocalPercentileSamples {
        ThreadLocalPercentileSamples::new()
    }

    fn fold(&self, result: &mut GlobalPercentileSamples, element: ThreadLocalPercentileSamples) {
        result.merge(&element);
    }
}

/// The combined samples of a [`Percentile`], shared with its sampler.
pub struct PercentileSource {
    combiner: AgentCombiner<PercentileOp>,
}

impl SampleSource for PercentileSource {
    type Value = GlobalPercentileSamples;
    const INVERTIBLE: bool = false;

    fn get_value(&self) -> GlobalPercentileSamples {
        self.combiner.combine_agents()
    }

    fn reset(&self) -> GlobalPercentileSamples {
        self.combiner.reset_all_agents()
    }

    fn identity(&self) -> GlobalPercentileSamples {
        GlobalPercentileSamples::new()
    }

    fn reduce(&self, acc: &mut GlobalPercentileSamples, value: &GlobalPercentileSamples) {
        acc.merge(value);
    }

    fn invert(&self, _acc: &mut GlobalPercentileSamples, _value: &GlobalPercentileSamples) {
        debug_assert!(false, "percentile samples cannot be subtracted");
    }
}

/// Records latencies for approximate quantile queries.
pub struct Percentile {
    source: Arc<PercentileSource>,
    sampler: OnceCell<Arc<ReducerSampler<PercentileSource>>>,
}

impl Default for Percentile {
    fn default() -> Self {
        Self::new()
    }
}

impl Percentile {
    /// Creates an empty percentile.
    pub fn new() -> Self {
        Self {
            source: Arc::new(PercentileSource { combiner: AgentCombiner::new(PercentileOp) }),
            sampler: OnceCell::new(),
        }
    }

    /// Records `latency`.
    ///
    /// Negative latencies are dropped with a warning.  Latencies above `u32::MAX` are clamped.
    pub fn record(&self, latency: i64) {
        if latency < 0 {
            warn!(latency, "dropping negative latency");
            return;
        }
        let value = u32::try_from(latency).unwrap_or(u32::MAX);

        let combiner = &self.source.combiner;
        let Some(agent) = combiner.get_or_create_tls_agent() else {
            return;
        };

        let added = agent.modify(|local| {
            if local.is_interval_full(value) {
                return false;
            }
            local.add32(value);
            true
        });
        if added {
            return;
        }

        // Flush the full interval into the global samples and start it over.
        let index = interval_index(value);
        combiner.merge_global(&agent, |global, local| {
            if let Some(interval) = local.interval(index) {
                global.merge_interval(index, interval);
            }
            local.clear_interval(index);
            local.add32(value);
        });
    }

    /// Gets every sample recorded so far.
    pub fn get_value(&self) -> GlobalPercentileSamples {
        self.source.get_value()
    }

    /// Clears every sample, returning the prior ones.
    ///
    /// Once a window is attached the sampler drains the samples every round, so this logs an
    /// error and returns empty samples instead.
    pub fn reset(&self) -> GlobalPercentileSamples {
        if self.sampler.get().is_some() {
            error!("reset() is not allowed on a windowed percentile");
            return GlobalPercentileSamples::new();
        }
        self.source.reset()
    }
}

impl Windowed for Percentile {
    type Source = PercentileSource;

    fn sampler(&self, runtime: &Runtime) -> Arc<ReducerSampler<PercentileSource>> {
        let sampler = self.sampler.get_or_init(|| {
            let sampler = Arc::new(ReducerSampler::new(Arc::clone(&self.source), runtime.clock()));
            let weak = Arc::downgrade(&sampler);
            let weak: std::sync::Weak<dyn Sampler> = weak;
            runtime.schedule(weak);
            sampler
        });
        Arc::clone(sampler)
    }
}

impl Variable for Percentile {
    fn describe(&self, w: &mut dyn fmt::Write, _quote_string: bool) -> fmt::Result {
        let mut samples = self.get_value();
        write!(
            w,
            "p50={} p90={} p99={}",
            samples.get_number(0.5),
            samples.get_number(0.9),
            samples.get_number(0.99)
        )
    }

    fn collect_metrics(&self, metrics: &mut CacheMetrics) {
        let samples = self.get_value();
        let mut cumulative = 0;
        let buckets = samples
            .interval_counts()
            .map(|(upper, count)| {
                cumulative += count;
                (f64::from(upper), cumulative)
            })
            .collect();
        metrics.set_value(MetricValue::Histogram { buckets, count: samples.added_count() });
    }
}

#[cfg(test)]
mod tests {
    use super::Percentile;
    use crate::export::{CacheMetrics, Metadata, MetricValue, Variable};
    use std::{sync::Arc, thread};

    #[test]
    fn test_uniform_quantiles_through_agents() {
        let percentile = Percentile::new();
        for i in 0..10_000i64 {
            percentile.record((i * 7919) % 1000);
        }

        let mut samples = percentile.get_value();
        assert_eq!(samples.added_count(), 10_000);

        let p50 = samples.get_number(0.5);
        let p99 = samples.get_number(0.99);
        assert!((470..=530).contains(&p50), "p50 = {}", p50);
        assert!((960..=1000).contains(&p99), "p99 = {}", p99);
    }

    #[test]
    fn test_negative_latency_is_dropped() {
        let percentile = Percentile::new();
        percentile.record(-5);
        percentile.record(5);
        assert_eq!(percentile.get_value().added_count(), 1);
    }

    #[test]
    fn test_threads_commit_samples_on_exit() {
        let percentile = Arc::new(Percentile::new());
        let handles = (0..4)
            .map(|t| {
                let percentile = Arc::clone(&percentile);
                thread::spawn(move || {
                    for i in 0..250 {
                        percentile.record(t * 1000 + i);
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut samples = percentile.get_value();
        assert_eq!(samples.added_count(), 1000);
        assert!(samples.get_number(1.0) >= 3000);
        assert!(samples.get_number(0.1) < 1000);
    }

    #[test]
    fn test_collects_histogram() {
        let percentile = Percentile::new();
        for latency in [1, 2, 5, 6, 100] {
            percentile.record(latency);
        }

        let mut metrics = CacheMetrics::new(&Metadata::new("latency"));
        percentile.collect_metrics(&mut metrics);
        assert_eq!(
            metrics.value,
            MetricValue::Histogram { buckets: vec![(2.0, 2), (7.0, 4), (127.0, 5)], count: 5 }
        );
    }
}
