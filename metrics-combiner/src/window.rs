//! Values over the last few collection rounds.
use std::sync::Arc;

use thiserror::Error;

use crate::{
    ops::Arithmetic,
    runtime::WeakRuntime,
    sampler::{ReducerSampler, Sample, SampleSource, MAX_WINDOW_SIZE},
    Runtime,
};

/// Errors when creating a window.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    /// The window size is zero or too large.
    #[error("window size must be between 1 and {max}, got {window_size}")]
    InvalidWindowSize {
        /// Requested window size.
        window_size: usize,
        /// Largest supported window size.
        max: usize,
    },
}

/// A metric whose value can be sampled into windows.
pub trait Windowed {
    /// What the sampler reads from the metric.
    type Source: SampleSource;

    /// Gets the metric's sampler, creating it and scheduling it on `runtime` on first use.
    ///
    /// Every window over the same metric shares this sampler.
    fn sampler(&self, runtime: &Runtime) -> Arc<ReducerSampler<Self::Source>>;
}

/// The value of a metric over the last `window_size` collection rounds.
///
/// With the default one-second sampling interval, that is the value over the last `window_size`
/// seconds.
pub struct Window<S: SampleSource> {
    sampler: Arc<ReducerSampler<S>>,
    window_size: usize,
    runtime: WeakRuntime,
}

impl<S: SampleSource> Window<S> {
    /// Creates a window over `metric`.
    pub fn new<M>(runtime: &Runtime, metric: &M, window_size: usize) -> Result<Self, WindowError>
    where
        M: Windowed<Source = S>,
    {
        let sampler = metric.sampler(runtime);
        sampler.set_window_size(window_size)?;
        Ok(Self { sampler, window_size, runtime: runtime.downgrade() })
    }

    /// Creates a window over `metric`, clamping `window_size` into the supported range.
    pub(crate) fn clamped<M>(runtime: &Runtime, metric: &M, window_size: usize) -> Self
    where
        M: Windowed<Source = S>,
    {
        let window_size = window_size.clamp(1, MAX_WINDOW_SIZE);
        let sampler = metric.sampler(runtime);
        sampler.grow_window(window_size);
        Self { sampler, window_size, runtime: runtime.downgrade() }
    }

    /// Gets the window size.
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Gets the value over the window.
    ///
    /// Reads as the identity value until at least two samples were taken.
    pub fn get_value(&self) -> S::Value {
        self.get_span().map_or_else(|| self.sampler.source().identity(), |sample| sample.data)
    }

    /// Gets the value over the window along with the time it covers.
    pub fn get_span(&self) -> Option<Sample<S::Value>> {
        self.runtime.recover_collector();
        self.sampler.get_value(self.window_size)
    }

    /// Gets the individual samples inside the window, newest first.
    pub fn get_samples(&self) -> Vec<S::Value> {
        self.runtime.recover_collector();
        self.sampler.get_samples(self.window_size)
    }
}

/// The rate per second of a metric over the last `window_size` collection rounds.
pub struct PerSecond<S: SampleSource> {
    window: Window<S>,
}

impl<S> PerSecond<S>
where
    S: SampleSource,
    S::Value: Arithmetic,
{
    /// Creates a per-second rate over `metric`.
    pub fn new<M>(runtime: &Runtime, metric: &M, window_size: usize) -> Result<Self, WindowError>
    where
        M: Windowed<Source = S>,
    {
        Window::new(runtime, metric, window_size).map(|window| Self { window })
    }

    /// Gets the rate per second.  Reads as 0 until at least two samples were taken.
    pub fn get_value(&self) -> f64 {
        self.window.get_span().map_or(0.0, |span| per_second(span.data.as_f64(), span.time_us))
    }

    /// Gets the window size.
    pub fn window_size(&self) -> usize {
        self.window.window_size()
    }
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn per_second(value: f64, time_us: u64) -> f64 {
    if time_us == 0 {
        return 0.0;
    }
    value * 1_000_000.0 / time_us as f64
}

#[cfg(test)]
mod tests {
    use super::{per_second, PerSecond, Window, WindowError};
    use crate::{data::Adder, sampler::Sampler, window::Windowed, Builder};
    use std::time::Duration;

    #[test]
    fn test_per_second() {
        assert_eq!(per_second(50.0, 0), 0.0);
        assert_eq!(per_second(50.0, 2_000_000), 25.0);
        assert_eq!(per_second(3.0, 500_000), 6.0);
    }

    #[test]
    fn test_window_over_adder() {
        let (clock, mock) = quanta::Clock::mock();
        let runtime = Builder::new()
            .sampling_interval(Duration::from_secs(3600))
            .clock(clock)
            .build()
            .unwrap();

        let adder = Adder::<u64>::new();
        let window = Window::new(&runtime, &adder, 2).unwrap();
        let rate = PerSecond::new(&runtime, &adder, 2).unwrap();
        assert_eq!(window.get_value(), 0);
        assert_eq!(rate.get_value(), 0.0);

        let sampler = adder.sampler(&runtime);
        for round in 0..4u64 {
            adder.record(round * 100);
            mock.increment(Duration::from_secs(1));
            sampler.take_sample();
        }

        // Cumulative: 0, 100, 300, 600.
        assert_eq!(window.get_value(), 500);
        assert_eq!(rate.get_value(), 250.0);

        let span = window.get_span().unwrap();
        assert_eq!(span.time_us, 2_000_000);
        assert_eq!(window.get_samples(), vec![600, 300]);
    }

    #[test]
    fn test_window_outlives_runtime() {
        let runtime = Builder::new().sampling_interval(Duration::from_secs(3600)).build().unwrap();
        let adder = Adder::<u64>::new();
        let window = Window::new(&runtime, &adder, 2).unwrap();

        let sampler = adder.sampler(&runtime);
        drop(runtime);

        adder.record(7);
        sampler.take_sample();
        adder.record(5);
        sampler.take_sample();
        assert_eq!(window.get_value(), 5);
    }

    #[test]
    fn test_invalid_window() {
        let runtime = Builder::new().build().unwrap();
        let adder = Adder::<i32>::new();
        assert!(matches!(
            Window::new(&runtime, &adder, 0),
            Err(WindowError::InvalidWindowSize { window_size: 0, .. })
        ));
    }
}
