use super::interval::{round_of_expectation, PercentileInterval};

/// Number of intervals, one per bit width of a `u32`.
pub const NUM_INTERVALS: usize = 32;

/// Gets the interval holding `x`.
///
/// Interval 0 holds 0, 1 and 2, and interval 1 holds only 3.  Every interval `i > 1` holds values
/// in `[2^i, 2^(i+1))`, so intervals are ordered by value and cumulative interval counts map
/// directly to ranks.
#[inline]
pub fn interval_index(x: u32) -> usize {
    if x <= 2 {
        0
    } else {
        31 - x.leading_zeros() as usize
    }
}

/// Reservoir samples spread across 32 value intervals.
///
/// Each interval is allocated on first use and retains at most `N` samples.
#[derive(Clone, Debug)]
pub struct PercentileSamples<const N: usize> {
    num_added: u64,
    intervals: [Option<Box<PercentileInterval<N>>>; NUM_INTERVALS],
}

/// Samples kept by a combiner's global value.
pub type GlobalPercentileSamples = PercentileSamples<254>;

/// Samples kept by each thread before being flushed into the global value.
pub type ThreadLocalPercentileSamples = PercentileSamples<30>;

impl<const N: usize> Default for PercentileSamples<N> {
    fn default() -> Self {
        Self { num_added: 0, intervals: std::array::from_fn(|_| None) }
    }
}

impl<const N: usize> PercentileSamples<N> {
    /// Creates an empty set of samples.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `x` to the interval it belongs to.
    ///
    /// Returns `false` if the interval was full, in which case `x` was counted but may have been
    /// discarded.
    pub fn add32(&mut self, x: u32) -> bool {
        self.num_added += 1;
        self.get_interval_at(interval_index(x)).add32(x)
    }

    /// Adds `x`, rejecting negative values and clamping anything above `u32::MAX`.
    pub fn add64(&mut self, x: i64) -> bool {
        if x < 0 {
            return false;
        }
        self.add32(u32::try_from(x).unwrap_or(u32::MAX))
    }

    /// Gets the interval at `index`, allocating it if needed.
    pub fn get_interval_at(&mut self, index: usize) -> &mut PercentileInterval<N> {
        self.intervals[index].get_or_insert_with(Default::default)
    }

    /// Gets the interval at `index`, if it has been allocated.
    pub fn interval(&self, index: usize) -> Option<&PercentileInterval<N>> {
        self.intervals.get(index).and_then(|i| i.as_deref())
    }

    /// Whether the interval `x` belongs to is full.
    pub fn is_interval_full(&self, x: u32) -> bool {
        self.interval(interval_index(x)).is_some_and(PercentileInterval::is_full)
    }

    /// Merges `rhs` into the interval at `index`.
    pub fn merge_interval<const M: usize>(&mut self, index: usize, rhs: &PercentileInterval<M>) {
        self.num_added += rhs.added_count();
        self.get_interval_at(index).merge(rhs);
    }

    /// Empties the interval at `index`.
    pub fn clear_interval(&mut self, index: usize) {
        if let Some(interval) = self.intervals[index].as_deref_mut() {
            self.num_added -= interval.added_count();
            interval.clear();
        }
    }

    /// Merges every interval of `rhs` into this one.
    pub fn merge<const M: usize>(&mut self, rhs: &PercentileSamples<M>) {
        for (index, interval) in rhs.intervals.iter().enumerate() {
            if let Some(interval) = interval.as_deref() {
                if interval.added_count() > 0 {
                    self.get_interval_at(index).merge(interval);
                }
            }
        }
        self.num_added += rhs.num_added;
    }

    /// Replaces the contents with a combination of `samples`.
    ///
    /// Each interval keeps samples from every input in proportion to the number of values that
    /// input was fed in that interval.
    pub fn combine_of<'a, const M: usize, I>(&mut self, samples: I)
    where
        I: IntoIterator<Item = &'a PercentileSamples<M>>,
        I::IntoIter: Clone,
    {
        self.clear();

        let samples = samples.into_iter();
        self.num_added = samples.clone().map(|s| s.num_added).sum();

        for index in 0..NUM_INTERVALS {
            let total: u64 = samples
                .clone()
                .filter_map(|s| s.interval(index))
                .map(PercentileInterval::added_count)
                .sum();
            if total == 0 {
                continue;
            }

            for interval in samples.clone().filter_map(|s| s.interval(index)) {
                if interval.is_empty() {
                    continue;
                }

                let take = if total <= N as u64 {
                    interval.sample_count()
                } else {
                    let expected = round_of_expectation(interval.added_count() * N as u64, total);
                    usize::try_from(expected).unwrap_or(usize::MAX).min(interval.sample_count())
                };
                self.get_interval_at(index).merge_with_expectation(interval, take);
            }
        }
    }

    /// Gets the value at `ratio` (0.0 to 1.0) of every value added.
    ///
    /// Returns 0 when nothing was added.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn get_number(&mut self, ratio: f64) -> u32 {
        let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
        let mut n = (ratio * self.num_added as f64).ceil() as u64;
        if n > self.num_added {
            n = self.num_added;
        } else if n == 0 {
            return 0;
        }

        for interval in self.intervals.iter_mut().flatten() {
            let added = interval.added_count();
            if n <= added {
                let sample_n = n * interval.sample_count() as u64 / added;
                let sample_index = sample_n.saturating_sub(1);
                return interval.get_sample_at(usize::try_from(sample_index).unwrap_or(usize::MAX));
            }
            n -= added;
        }
        0
    }

    /// Removes every sample.
    pub fn clear(&mut self) {
        for interval in self.intervals.iter_mut().flatten() {
            interval.clear();
        }
        self.num_added = 0;
    }

    /// Number of values ever added.
    pub fn added_count(&self) -> u64 {
        self.num_added
    }

    /// Iterates over `(upper_bound, added_count)` for each non-empty interval, in value order.
    ///
    /// `upper_bound` is the largest value the interval can hold.
    pub fn interval_counts(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        self.intervals.iter().enumerate().filter_map(|(index, interval)| {
            let interval = interval.as_deref()?;
            if interval.added_count() == 0 {
                return None;
            }
            let upper = if index == 0 { 2 } else { u32::MAX >> (31 - index) };
            Some((upper, interval.added_count()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{interval_index, GlobalPercentileSamples, PercentileSamples};

    #[test]
    fn test_interval_index() {
        assert_eq!(interval_index(0), 0);
        assert_eq!(interval_index(2), 0);
        assert_eq!(interval_index(3), 1);
        assert_eq!(interval_index(1), 0);
        assert_eq!(interval_index(4), 2);
        assert_eq!(interval_index(1023), 9);
        assert_eq!(interval_index(1024), 10);
        assert_eq!(interval_index(u32::MAX), 31);
    }

    #[test]
    fn test_get_number_small() {
        let mut samples = PercentileSamples::<16>::new();
        assert_eq!(samples.get_number(0.5), 0);

        for x in 1..=10 {
            samples.add32(x);
        }
        assert_eq!(samples.added_count(), 10);
        assert_eq!(samples.get_number(0.0), 0);
        assert_eq!(samples.get_number(0.1), 1);
        assert_eq!(samples.get_number(0.5), 5);
        assert_eq!(samples.get_number(1.0), 10);
        assert_eq!(samples.get_number(2.0), 10);
    }

    #[test]
    fn test_uniform_quantiles() {
        let mut samples = GlobalPercentileSamples::new();
        for i in 0..10_000u32 {
            samples.add32((i * 7919) % 1000);
        }

        let p50 = samples.get_number(0.5);
        let p99 = samples.get_number(0.99);
        assert!((470..=530).contains(&p50), "p50 = {}", p50);
        assert!((960..=1000).contains(&p99), "p99 = {}", p99);
    }

    #[test]
    fn test_merge_and_clear_interval() {
        let mut local = PercentileSamples::<4>::new();
        let mut global = PercentileSamples::<8>::new();
        for x in [3, 100, 101, 102] {
            local.add32(x);
        }

        let index = super::interval_index(100);
        let flushed = local.interval(index).cloned();
        if let Some(interval) = flushed {
            global.merge_interval(index, &interval);
        }
        local.clear_interval(index);

        assert_eq!(local.added_count(), 1);
        assert_eq!(global.added_count(), 3);

        global.merge(&local);
        assert_eq!(global.added_count(), 4);
        assert_eq!(global.get_number(0.25), 3);
    }

    #[test]
    fn test_combine_of_weights_inputs() {
        let mut busy = PercentileSamples::<32>::new();
        let mut quiet = PercentileSamples::<32>::new();
        for _ in 0..900 {
            busy.add32(100);
        }
        for _ in 0..100 {
            quiet.add32(120);
        }

        let mut combined = PercentileSamples::<32>::new();
        combined.combine_of([&busy, &quiet]);
        assert_eq!(combined.added_count(), 1000);

        let interval = combined.interval(super::interval_index(100)).unwrap();
        assert_eq!(interval.added_count(), 1000);
        let from_quiet = interval.samples().iter().filter(|x| **x == 120).count();
        assert!(from_quiet <= 5, "from_quiet = {}", from_quiet);
        assert!(combined.get_number(0.5) == 100);
    }

    #[test]
    fn test_interval_counts() {
        let mut samples = PercentileSamples::<8>::new();
        samples.add32(1);
        samples.add32(5);
        samples.add32(6);

        let counts = samples.interval_counts().collect::<Vec<_>>();
        assert_eq!(counts, vec![(2, 1), (7, 2)]);
    }
}
