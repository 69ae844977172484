use std::fmt;

use super::{
    recorder::{AddStat, MinusStat, Stat},
    reducer::ReducerSource,
    IntRecorder, Maxer,
};
use crate::{
    export::{CacheMetrics, MetricValue, Variable},
    ops::{MaxTo, VoidOp},
    percentile::{GlobalPercentileSamples, Percentile, PercentileSource},
    window::{per_second, Window, WindowError},
    Runtime, MAX_WINDOW_SIZE,
};

/// Ratios reported by [`LatencyRecorder::latency_cdf`].
const CDF_RATIOS: [f64; 20] = [
    0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 0.91, 0.92, 0.93, 0.94, 0.95, 0.96, 0.97, 0.98,
    0.99, 0.999, 0.9999,
];

/// Records latencies and reports their average, maximum, rate and quantiles over a window.
///
/// Windowed values are computed from the samples taken by the runtime's collector, so they read
/// as zero until two collection rounds have passed.
pub struct LatencyRecorder {
    latency: IntRecorder,
    max_latency: Maxer<i64>,
    percentile: Percentile,
    latency_window: Window<ReducerSource<Stat, AddStat, MinusStat>>,
    max_latency_window: Window<ReducerSource<i64, MaxTo, VoidOp>>,
    percentile_window: Window<PercentileSource>,
    percentiles: Vec<f64>,
}

impl LatencyRecorder {
    /// Creates a recorder windowed over the runtime's default window size.
    pub fn new(runtime: &Runtime) -> Self {
        Self::build(runtime, runtime.default_window_size())
    }

    /// Creates a recorder windowed over `window_size` collection rounds.
    pub fn with_window_size(runtime: &Runtime, window_size: usize) -> Result<Self, WindowError> {
        if window_size == 0 || window_size > MAX_WINDOW_SIZE {
            return Err(WindowError::InvalidWindowSize { window_size, max: MAX_WINDOW_SIZE });
        }
        Ok(Self::build(runtime, window_size))
    }

    fn build(runtime: &Runtime, window_size: usize) -> Self {
        let latency = IntRecorder::new();
        let max_latency = Maxer::new();
        let percentile = Percentile::new();

        let latency_window = Window::clamped(runtime, &latency, window_size);
        let max_latency_window = Window::clamped(runtime, &max_latency, window_size);
        let percentile_window = Window::clamped(runtime, &percentile, window_size);

        let mut percentiles = runtime
            .latency_percentiles()
            .iter()
            .map(|p| f64::from(*p) / 100.0)
            .collect::<Vec<_>>();
        percentiles.extend([0.999, 0.9999]);

        Self {
            latency,
            max_latency,
            percentile,
            latency_window,
            max_latency_window,
            percentile_window,
            percentiles,
        }
    }

    /// Records `latency`.
    ///
    /// Negative latencies count towards the average and maximum but not the quantiles.
    pub fn record(&self, latency: i64) {
        self.latency.record(latency);
        self.max_latency.record(latency);
        self.percentile.record(latency);
    }

    /// Gets the window size.
    pub fn window_size(&self) -> usize {
        self.latency_window.window_size()
    }

    /// Gets the average latency over the window.
    pub fn latency(&self) -> i64 {
        self.latency_window.get_value().average()
    }

    /// Gets the largest latency over the window, or 0 if nothing was recorded.
    pub fn max_latency(&self) -> i64 {
        match self.max_latency_window.get_value() {
            i64::MIN => 0,
            max => max,
        }
    }

    /// Gets the number of latencies ever recorded.
    pub fn count(&self) -> i64 {
        self.latency.get_value().num
    }

    /// Gets the number of latencies recorded per second over the window.
    #[allow(clippy::cast_precision_loss)]
    pub fn qps(&self) -> f64 {
        self.latency_window
            .get_span()
            .map_or(0.0, |span| per_second(span.data.num as f64, span.time_us))
    }

    fn window_samples(&self) -> GlobalPercentileSamples {
        let samples = self.percentile_window.get_samples();
        let mut combined = GlobalPercentileSamples::new();
        combined.combine_of(samples.iter());
        combined
    }

    /// Gets the latency at `ratio` (0.0 to 1.0) over the window.
    pub fn latency_percentile(&self, ratio: f64) -> u32 {
        self.window_samples().get_number(ratio)
    }

    /// Gets `(ratio, latency)` for each configured percentile, then for 99.9% and 99.99%.
    pub fn latency_percentiles(&self) -> Vec<(f64, u32)> {
        let mut samples = self.window_samples();
        self.percentiles.iter().map(|ratio| (*ratio, samples.get_number(*ratio))).collect()
    }

    /// Gets `(ratio, latency)` pairs tracing the distribution of latencies over the window.
    pub fn latency_cdf(&self) -> Vec<(f64, u32)> {
        let mut samples = self.window_samples();
        CDF_RATIOS.iter().map(|ratio| (*ratio, samples.get_number(*ratio))).collect()
    }
}

impl Variable for LatencyRecorder {
    fn describe(&self, w: &mut dyn fmt::Write, _quote_string: bool) -> fmt::Result {
        write!(w, "{}", self.latency())
    }

    fn collect_metrics(&self, metrics: &mut CacheMetrics) {
        let total = self.latency.get_value();
        let quantiles = self
            .latency_percentiles()
            .into_iter()
            .map(|(ratio, latency)| (ratio, f64::from(latency)))
            .collect();

        #[allow(clippy::cast_precision_loss)]
        let sum = total.sum as f64;
        metrics.set_value(MetricValue::Summary {
            quantiles,
            sum,
            count: u64::try_from(total.num).unwrap_or(0),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::LatencyRecorder;
    use crate::{
        export::{CacheMetrics, Metadata, MetricKind, MetricValue, Variable},
        Builder, Runtime,
    };
    use std::{sync::Arc, time::Duration};

    fn mocked_runtime() -> (Runtime, Arc<quanta::Mock>) {
        let (clock, mock) = quanta::Clock::mock();
        let runtime = Builder::new()
            .sampling_interval(Duration::from_secs(3600))
            .default_window_size(2)
            .clock(clock)
            .build()
            .unwrap();
        (runtime, mock)
    }

    #[test]
    fn test_reads_zero_without_history() {
        let (runtime, _) = mocked_runtime();
        let recorder = LatencyRecorder::new(&runtime);
        recorder.record(100);

        assert_eq!(recorder.window_size(), 2);
        assert_eq!(recorder.count(), 1);
        assert_eq!(recorder.latency(), 0);
        assert_eq!(recorder.max_latency(), 0);
        assert_eq!(recorder.qps(), 0.0);
        assert_eq!(recorder.latency_percentile(0.5), 0);
    }

    #[test]
    fn test_windowed_statistics() {
        let (runtime, mock) = mocked_runtime();
        let recorder = LatencyRecorder::new(&runtime);

        // Round one, then two rounds inside the window.
        recorder.record(5_000);
        mock.increment(Duration::from_secs(1));
        runtime.run_collection_round();

        for latency in 1..=100 {
            recorder.record(latency);
        }
        mock.increment(Duration::from_secs(1));
        runtime.run_collection_round();

        for latency in 101..=200 {
            recorder.record(latency);
        }
        mock.increment(Duration::from_secs(1));
        runtime.run_collection_round();

        assert_eq!(recorder.count(), 201);
        assert_eq!(recorder.latency(), 100);
        assert_eq!(recorder.max_latency(), 200);
        assert_eq!(recorder.qps(), 100.0);
        assert_eq!(recorder.latency_percentile(1.0), 200);

        let p50 = recorder.latency_percentile(0.5);
        assert!((90..=110).contains(&p50), "p50 = {}", p50);

        let percentiles = recorder.latency_percentiles();
        let ratios = percentiles.iter().map(|(ratio, _)| *ratio).collect::<Vec<_>>();
        assert_eq!(ratios, vec![0.8, 0.9, 0.99, 0.999, 0.9999]);
        assert!(percentiles.windows(2).all(|w| w[0].1 <= w[1].1));

        let cdf = recorder.latency_cdf();
        assert_eq!(cdf.len(), 20);
        assert!(cdf.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_collects_summary() {
        let (runtime, _) = mocked_runtime();
        let recorder = LatencyRecorder::new(&runtime);
        recorder.record(10);
        recorder.record(30);

        let mut metrics = CacheMetrics::new(&Metadata::new("rpc_latency_us"));
        recorder.collect_metrics(&mut metrics);
        assert_eq!(metrics.kind, MetricKind::Summary);
        match metrics.value {
            MetricValue::Summary { quantiles, sum, count } => {
                assert_eq!(quantiles.len(), 5);
                assert_eq!(sum, 40.0);
                assert_eq!(count, 2);
            }
            other => panic!("unexpected value: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_invalid_window() {
        let (runtime, _) = mocked_runtime();
        assert!(LatencyRecorder::with_window_size(&runtime, 0).is_err());
        assert!(LatencyRecorder::with_window_size(&runtime, 5).is_ok());
    }
}
