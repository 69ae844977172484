use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use super::{Sample, SampleSource, Sampler};
use crate::{helper::MicrosClock, queue::BoundedQueue, window::WindowError};

/// Largest supported window, in samples.
pub const MAX_WINDOW_SIZE: usize = 3600;

struct History<T> {
    window_size: usize,
    queue: BoundedQueue<Sample<T>>,
}

/// Keeps the most recent samples of a [`SampleSource`], one per collection round.
pub struct ReducerSampler<S: SampleSource> {
    source: Arc<S>,
    clock: MicrosClock,
    history: Mutex<History<S::Value>>,
}

impl<S: SampleSource> ReducerSampler<S> {
    pub(crate) fn new(source: Arc<S>, clock: MicrosClock) -> Self {
        Self {
            source,
            clock,
            history: Mutex::new(History { window_size: 1, queue: BoundedQueue::new(2) }),
        }
    }

    /// Gets the sampled source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Gets the largest window requested so far.
    pub fn window_size(&self) -> usize {
        self.history.lock().window_size
    }

    /// Makes sure enough history is kept to answer queries over `window_size` samples.
    ///
    /// The window only ever grows: requesting a smaller window than the current one is a no-op.
    pub fn set_window_size(&self, window_size: usize) -> Result<(), WindowError> {
        if window_size == 0 || window_size > MAX_WINDOW_SIZE {
            error!(window_size, max = MAX_WINDOW_SIZE, "invalid window size");
            return Err(WindowError::InvalidWindowSize { window_size, max: MAX_WINDOW_SIZE });
        }

        self.grow_window(window_size);
        Ok(())
    }

    pub(crate) fn grow_window(&self, window_size: usize) {
        let window_size = window_size.clamp(1, MAX_WINDOW_SIZE);
        let mut history = self.history.lock();
        if window_size > history.window_size {
            history.window_size = window_size;
        }
    }

    /// Gets the value over the last `window_size` samples.
    ///
    /// `time_us` of the result is the time elapsed between the oldest and newest sample used.
    /// Returns `None` until at least two samples were taken.
    pub fn get_value(&self, window_size: usize) -> Option<Sample<S::Value>> {
        if window_size == 0 {
            error!("window size must be positive");
            return None;
        }

        let history = self.history.lock();
        let queue = &history.queue;
        if queue.len() <= 1 {
            return None;
        }

        let oldest_idx = window_size.min(queue.len() - 1);
        let latest = queue.bottom(0)?;
        let oldest = queue.bottom(oldest_idx)?;

        let mut data = latest.data.clone();
        if S::INVERTIBLE {
            self.source.invert(&mut data, &oldest.data);
        } else {
            for sample in (1..oldest_idx).filter_map(|i| queue.bottom(i)) {
                self.source.reduce(&mut data, &sample.data);
            }
        }

        Some(Sample { data, time_us: latest.time_us.saturating_sub(oldest.time_us) })
    }

    /// Gets the samples covering the last `window_size` samples, newest first.
    ///
    /// For drained sources, each sample holds what was recorded during one round.
    pub fn get_samples(&self, window_size: usize) -> Vec<S::Value> {
        if window_size == 0 {
            return Vec::new();
        }

        let history = self.history.lock();
        let queue = &history.queue;
        if queue.len() <= 1 {
            return Vec::new();
        }

        let oldest_idx = window_size.min(queue.len() - 1);
        (0..oldest_idx).filter_map(|i| queue.bottom(i)).map(|s| s.data.clone()).collect()
    }
}

impl<S: SampleSource> Sampler for ReducerSampler<S> {
    fn take_sample(&self) {
        let data = if S::INVERTIBLE { self.source.get_value() } else { self.source.reset() };
        let time_us = self.clock.now_micros();

        let mut history = self.history.lock();
        let capacity = history.window_size + 1;
        history.queue.grow(capacity);
        history.queue.elim_push(Sample { data, time_us });
    }
}

#[cfg(test)]
mod tests {
    use super::{ReducerSampler, MAX_WINDOW_SIZE};
    use crate::{
        helper::MicrosClock,
        sampler::{SampleSource, Sampler},
        window::WindowError,
    };
    use parking_lot::Mutex;
    use quanta::Clock;
    use std::{sync::Arc, time::Duration};

    /// A plain running sum, optionally sampled without its inverse.
    struct Total<const INVERTIBLE: bool>(Mutex<i64>);

    impl<const INVERTIBLE: bool> Total<INVERTIBLE> {
        fn add(&self, v: i64) {
            *self.0.lock() += v;
        }
    }

    impl<const INV: bool> SampleSource for Total<INV> {
        type Value = i64;
        const INVERTIBLE: bool = INV;

        fn get_value(&self) -> i64 {
            *self.0.lock()
        }

        fn reset(&self) -> i64 {
            std::mem::take(&mut *self.0.lock())
        }

        fn identity(&self) -> i64 {
            0
        }

        fn reduce(&self, acc: &mut i64, value: &i64) {
            *acc += *value;
        }

        fn invert(&self, acc: &mut i64, value: &i64) {
            *acc -= *value;
        }
    }

    fn sampler<const INV: bool>() -> (ReducerSampler<Total<INV>>, Arc<quanta::Mock>) {
        let (clock, mock) = Clock::mock();
        let source = Arc::new(Total::<INV>(Mutex::new(0)));
        (ReducerSampler::new(source, MicrosClock::new(clock)), mock)
    }

    #[test]
    fn test_window_size_is_monotonic() {
        let (sampler, _) = sampler::<true>();
        assert_eq!(sampler.window_size(), 1);

        sampler.set_window_size(10).unwrap();
        sampler.set_window_size(5).unwrap();
        assert_eq!(sampler.window_size(), 10);

        assert_eq!(
            sampler.set_window_size(0),
            Err(WindowError::InvalidWindowSize { window_size: 0, max: MAX_WINDOW_SIZE })
        );
        assert!(sampler.set_window_size(MAX_WINDOW_SIZE + 1).is_err());
        assert_eq!(sampler.window_size(), 10);
    }

    #[test]
    fn test_needs_two_samples() {
        let (sampler, _) = sampler::<true>();
        assert!(sampler.get_value(1).is_none());

        sampler.take_sample();
        assert!(sampler.get_value(1).is_none());
        assert!(sampler.get_samples(1).is_empty());
    }

    #[test]
    fn test_invertible_window_differences() {
        let (sampler, mock) = sampler::<true>();
        sampler.set_window_size(3).unwrap();

        for round in 1..=5 {
            sampler.source().add(round * 10);
            mock.increment(Duration::from_secs(1));
            sampler.take_sample();
        }

        // Cumulative samples: 10, 30, 60, 100, 150.
        let span = sampler.get_value(1).unwrap();
        assert_eq!(span.data, 50);
        assert_eq!(span.time_us, 1_000_000);

        let span = sampler.get_value(3).unwrap();
        assert_eq!(span.data, 120);
        assert_eq!(span.time_us, 3_000_000);

        // Larger than the history kept: clamps to the oldest sample.
        let span = sampler.get_value(100).unwrap();
        assert_eq!(span.data, 120);
        assert_eq!(span.time_us, 3_000_000);
    }

    #[test]
    fn test_non_invertible_window_resums() {
        let (sampler, mock) = sampler::<false>();
        sampler.set_window_size(3).unwrap();

        for round in 1..=5 {
            sampler.source().add(round);
            mock.increment(Duration::from_secs(1));
            sampler.take_sample();
        }

        // Each sample drained one round: 1, 2, 3, 4, 5.
        assert_eq!(sampler.source().get_value(), 0);
        assert_eq!(sampler.get_value(1).unwrap().data, 5);
        assert_eq!(sampler.get_value(2).unwrap().data, 9);
        assert_eq!(sampler.get_value(3).unwrap().data, 12);
        assert_eq!(sampler.get_samples(3), vec![5, 4, 3]);
    }
}
