use std::{fmt, sync::Arc};

use super::{reducer::ReducerSource, Reducer};
use crate::{
    combiner::{Element, MutexElement},
    export::{CacheMetrics, MetricValue, SeriesError, SeriesOptions, Variable},
    ops::{Arithmetic, InverseOperator, Operator},
    sampler::ReducerSampler,
    window::Windowed,
    Runtime,
};

/// A sum of values along with how many values it holds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Stat {
    /// Sum of the recorded values.
    pub sum: i64,
    /// Number of recorded values.
    pub num: i64,
}

impl Stat {
    /// Creates a stat holding a single value.
    pub fn new(value: i64) -> Self {
        Self { sum: value, num: 1 }
    }

    /// Gets the average, rounded towards zero.  Returns 0 when empty.
    pub fn average(&self) -> i64 {
        if self.num == 0 {
            return 0;
        }
        self.sum / self.num
    }

    /// Gets the average.  Returns 0.0 when empty.
    #[allow(clippy::cast_precision_loss)]
    pub fn average_f64(&self) -> f64 {
        if self.num == 0 {
            return 0.0;
        }
        self.sum as f64 / self.num as f64
    }
}

impl Element for Stat {
    type Container = MutexElement<Self>;
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.average())
    }
}

// Lets a recorder keep a trend history of its average.
impl Arithmetic for Stat {
    const ZERO: Self = Self { sum: 0, num: 0 };
    const LOWEST: Self = Self { sum: i64::MIN, num: 1 };
    const HIGHEST: Self = Self { sum: i64::MAX, num: 1 };

    fn add(self, rhs: Self) -> Self {
        Self { sum: self.sum.wrapping_add(rhs.sum), num: self.num.wrapping_add(rhs.num) }
    }

    fn sub(self, rhs: Self) -> Self {
        Self { sum: self.sum.wrapping_sub(rhs.sum), num: self.num.wrapping_sub(rhs.num) }
    }

    /// Rolled-up stats already average over every value they hold.
    fn divide(self, _n: u64) -> Self {
        self
    }

    fn as_f64(self) -> f64 {
        self.average_f64()
    }
}

/// Adds stats together.
#[derive(Clone, Copy, Debug, Default)]
pub struct AddStat;

impl Operator<Stat> for AddStat {
    const DIVIDE_ON_ADDITION: bool = true;

    fn identity(&self) -> Stat {
        Stat::default()
    }

    #[inline]
    fn apply(&self, acc: &mut Stat, value: &Stat) {
        acc.sum = acc.sum.wrapping_add(value.sum);
        acc.num = acc.num.wrapping_add(value.num);
    }
}

/// Subtracts stats; the inverse of [`AddStat`].
#[derive(Clone, Copy, Debug, Default)]
pub struct MinusStat;

impl InverseOperator<Stat> for MinusStat {
    #[inline]
    fn apply_inverse(&self, acc: &mut Stat, value: &Stat) {
        acc.sum = acc.sum.wrapping_sub(value.sum);
        acc.num = acc.num.wrapping_sub(value.num);
    }
}

/// Records integers and reports their average.
#[derive(Default)]
pub struct IntRecorder {
    inner: Reducer<Stat, AddStat, MinusStat>,
}

impl IntRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `value`.
    #[inline]
    pub fn record(&self, value: i64) {
        self.inner.record(Stat::new(value));
    }

    /// Gets the sum and count of every recorded value.
    pub fn get_value(&self) -> Stat {
        self.inner.get_value()
    }

    /// Gets the average of every recorded value.
    pub fn average(&self) -> i64 {
        self.get_value().average()
    }

    /// Resets the recorder, returning the prior sum and count.
    pub fn reset(&self) -> Stat {
        self.inner.reset()
    }
}

impl Windowed for IntRecorder {
    type Source = ReducerSource<Stat, AddStat, MinusStat>;

    fn sampler(&self, runtime: &Runtime) -> Arc<ReducerSampler<Self::Source>> {
        self.inner.sampler(runtime)
    }
}

impl Variable for IntRecorder {
    fn describe(&self, w: &mut dyn fmt::Write, _quote_string: bool) -> fmt::Result {
        write!(w, "{}", self.average())
    }

    fn describe_series(
        &self,
        w: &mut dyn fmt::Write,
        options: &SeriesOptions,
    ) -> Result<(), SeriesError> {
        self.inner.describe_series(w, options)
    }

    fn collect_metrics(&self, metrics: &mut CacheMetrics) {
        metrics.set_value(MetricValue::Gauge(self.get_value().average_f64()));
    }

    fn enable_series(&self, runtime: &Runtime) {
        self.inner.enable_series(runtime);
    }
}

#[cfg(test)]
mod tests {
    use super::{IntRecorder, Stat};
    use crate::{sampler::Sampler, window::Window, window::Windowed, Builder};
    use std::time::Duration;

    #[test]
    fn test_average() {
        let recorder = IntRecorder::new();
        assert_eq!(recorder.average(), 0);

        for value in [10, 20, 33] {
            recorder.record(value);
        }
        assert_eq!(recorder.get_value(), Stat { sum: 63, num: 3 });
        assert_eq!(recorder.average(), 21);
        assert_eq!(recorder.get_value().average_f64(), 21.0);
    }

    #[test]
    fn test_windowed_average() {
        let (clock, mock) = quanta::Clock::mock();
        let runtime = Builder::new()
            .sampling_interval(Duration::from_secs(3600))
            .clock(clock)
            .build()
            .unwrap();

        let recorder = IntRecorder::new();
        let window = Window::new(&runtime, &recorder, 1).unwrap();
        let sampler = recorder.sampler(&runtime);

        recorder.record(1_000);
        mock.increment(Duration::from_secs(1));
        sampler.take_sample();

        recorder.record(10);
        recorder.record(30);
        mock.increment(Duration::from_secs(1));
        sampler.take_sample();

        // Only the last second counts towards the window.
        assert_eq!(window.get_value(), Stat { sum: 40, num: 2 });
        assert_eq!(window.get_value().average(), 20);
        assert_eq!(recorder.average(), 346);
    }
}
