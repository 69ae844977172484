use crate::helper::fast_rand_less_than;

/// Stochastically rounds `a / b`, so that the expected result is exactly `a / b`.
///
/// Returns 0 when `b` is 0.
pub fn round_of_expectation(a: u64, b: u64) -> u64 {
    if b == 0 {
        return 0;
    }
    a / b + u64::from(fast_rand_less_than(b) < a % b)
}

/// A bounded, uniformly random subset of the values added to it.
///
/// Holds at most `N` samples no matter how many values were added.  Once full, each new value
/// replaces a random sample with probability `N / added`, which keeps every value ever added
/// equally likely to be retained.
#[derive(Clone, Debug)]
pub struct PercentileInterval<const N: usize> {
    samples: Vec<u32>,
    num_added: u64,
    sorted: bool,
}

impl<const N: usize> Default for PercentileInterval<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> PercentileInterval<N> {
    /// Maximum number of retained samples.
    pub const CAPACITY: usize = N;

    /// Creates an empty interval.
    pub fn new() -> Self {
        debug_assert!(N > 0 && N <= 65536, "interval capacity must be in 1..=65536");
        Self { samples: Vec::new(), num_added: 0, sorted: true }
    }

    /// Adds `x`, returning `true` if it was stored without displacing another sample.
    ///
    /// When the interval is already full, `x` is still counted, and replaces a random sample with
    /// probability `N / added`.
    pub fn add32(&mut self, x: u32) -> bool {
        self.num_added += 1;
        if self.samples.len() < N {
            if self.samples.capacity() == 0 {
                self.samples.reserve_exact(N);
            }
            self.samples.push(x);
            self.sorted = false;
            return true;
        }

        let slot = fast_rand_less_than(self.num_added);
        if let Some(sample) = self.samples.get_mut(slot as usize) {
            *sample = x;
            self.sorted = false;
        }
        false
    }

    /// Adds `x`, rejecting negative values and clamping anything above `u32::MAX`.
    pub fn add64(&mut self, x: i64) -> bool {
        if x < 0 {
            return false;
        }
        self.add32(u32::try_from(x).unwrap_or(u32::MAX))
    }

    /// Merges `rhs` into this interval.
    ///
    /// When the combined count exceeds the capacity, each side keeps a number of samples
    /// proportional to how many values it was fed, picked at random, so that every value from
    /// either side remains equally likely to be retained.
    pub fn merge<const M: usize>(&mut self, rhs: &PercentileInterval<M>) {
        if rhs.num_added == 0 {
            return;
        }

        let total_added = self.num_added + rhs.num_added;
        if total_added <= N as u64 {
            // Below capacity, so both sides still hold every value they were fed.
            self.samples.extend_from_slice(&rhs.samples);
            self.num_added = total_added;
            self.sorted = false;
            return;
        }

        let keep = round_of_expectation(self.num_added * N as u64, total_added);
        let keep = usize::try_from(keep).unwrap_or(usize::MAX).min(self.samples.len());

        // Drop random samples from this side until `keep` remain.
        for i in (keep..self.samples.len()).rev() {
            let victim = fast_rand_less_than(i as u64 + 1) as usize;
            self.samples.swap(victim, i);
        }
        self.samples.truncate(keep);

        let take = (N - keep).min(rhs.samples.len());
        self.take_random(&rhs.samples, take);

        self.num_added = total_added;
        self.sorted = false;
    }

    /// Takes `n` random samples from `rhs`, counting every value `rhs` was fed.
    ///
    /// Samples beyond the capacity replace random samples of this interval.
    pub fn merge_with_expectation<const M: usize>(&mut self, rhs: &PercentileInterval<M>, n: usize) {
        let n = n.min(rhs.samples.len());
        self.num_added += rhs.num_added;
        if n == 0 {
            return;
        }

        if n == rhs.samples.len() && self.samples.len() + n <= N {
            self.samples.extend_from_slice(&rhs.samples);
        } else {
            self.take_random(&rhs.samples, n);
        }
        self.sorted = false;
    }

    fn take_random(&mut self, from: &[u32], n: usize) {
        let mut pool = from.to_vec();
        for i in 0..n {
            let remaining = pool.len() - i;
            let pick = fast_rand_less_than(remaining as u64) as usize;
            let value = pool[pick];
            pool.swap(pick, remaining - 1);

            if self.samples.len() < N {
                self.samples.push(value);
            } else {
                let slot = fast_rand_less_than(self.samples.len() as u64) as usize;
                self.samples[slot] = value;
            }
        }
    }

    /// Gets the `index`-th smallest retained sample, clamping `index` to the last sample.
    ///
    /// Returns 0 for an empty interval.
    pub fn get_sample_at(&mut self, index: usize) -> u32 {
        if self.samples.is_empty() {
            return 0;
        }

        if !self.sorted {
            self.samples.sort_unstable();
            self.sorted = true;
        }
        self.samples[index.min(self.samples.len() - 1)]
    }

    /// Removes every sample.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.num_added = 0;
        self.sorted = true;
    }

    /// Number of values ever added.
    pub fn added_count(&self) -> u64 {
        self.num_added
    }

    /// Number of samples retained.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Whether the interval holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether the interval is at capacity.
    pub fn is_full(&self) -> bool {
        self.samples.len() >= N
    }

    /// The retained samples, in no particular order.
    pub fn samples(&self) -> &[u32] {
        &self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::{round_of_expectation, PercentileInterval};
    use proptest::{collection::vec as arb_vec, prelude::*};

    #[test]
    fn test_round_of_expectation() {
        assert_eq!(round_of_expectation(10, 5), 2);
        assert_eq!(round_of_expectation(0, 5), 0);
        assert_eq!(round_of_expectation(3, 0), 0);

        let mut total = 0;
        for _ in 0..10_000 {
            let rounded = round_of_expectation(7, 2);
            assert!(rounded == 3 || rounded == 4);
            total += rounded;
        }
        // Expectation is 3.5 per call.
        assert!((33_000..=37_000).contains(&total), "total = {}", total);
    }

    #[test]
    fn test_add_until_full() {
        let mut interval = PercentileInterval::<4>::new();
        assert!(interval.add32(3));
        assert!(interval.add32(1));
        assert!(interval.add32(2));
        assert!(interval.add32(5));
        assert!(interval.is_full());

        assert!(!interval.add32(4));
        assert_eq!(interval.added_count(), 5);
        assert_eq!(interval.sample_count(), 4);
    }

    #[test]
    fn test_add64_rejects_negative() {
        let mut interval = PercentileInterval::<4>::new();
        assert!(!interval.add64(-1));
        assert_eq!(interval.added_count(), 0);

        assert!(interval.add64(i64::MAX));
        assert_eq!(interval.get_sample_at(0), u32::MAX);
    }

    #[test]
    fn test_get_sample_at_sorts_and_clamps() {
        let mut interval = PercentileInterval::<8>::new();
        assert_eq!(interval.get_sample_at(3), 0);

        for x in [9, 2, 7, 4] {
            interval.add32(x);
        }
        assert_eq!(interval.get_sample_at(0), 2);
        assert_eq!(interval.get_sample_at(2), 7);
        assert_eq!(interval.get_sample_at(100), 9);

        interval.add32(1);
        assert_eq!(interval.get_sample_at(0), 1);
    }

    #[test]
    fn test_merge_below_capacity_keeps_everything() {
        let mut lhs = PercentileInterval::<8>::new();
        let mut rhs = PercentileInterval::<4>::new();
        lhs.add32(1);
        lhs.add32(2);
        rhs.add32(3);
        rhs.add32(4);

        lhs.merge(&rhs);
        assert_eq!(lhs.added_count(), 4);
        assert_eq!(lhs.sample_count(), 4);
        assert_eq!(lhs.get_sample_at(3), 4);
    }

    #[test]
    fn test_merge_keeps_proportions() {
        // One side was fed three times as many values as the other, so on average it should keep
        // three times as many samples.
        let mut from_lhs = 0;
        for _ in 0..1_000 {
            let mut lhs = PercentileInterval::<100>::new();
            let mut rhs = PercentileInterval::<100>::new();
            for _ in 0..300 {
                lhs.add32(1);
            }
            for _ in 0..100 {
                rhs.add32(2);
            }

            lhs.merge(&rhs);
            assert_eq!(lhs.added_count(), 400);
            assert_eq!(lhs.sample_count(), 100);
            from_lhs += lhs.samples().iter().filter(|x| **x == 1).count();
        }

        let ratio = from_lhs as f64 / 100_000.0;
        assert!((ratio - 0.75).abs() < 0.01, "ratio = {}", ratio);
    }

    #[test]
    fn test_merge_with_expectation() {
        let mut lhs = PercentileInterval::<8>::new();
        let mut rhs = PercentileInterval::<8>::new();
        for x in 0..8 {
            rhs.add32(x);
        }

        lhs.merge_with_expectation(&rhs, 3);
        assert_eq!(lhs.added_count(), 8);
        assert_eq!(lhs.sample_count(), 3);
        assert!(lhs.samples().iter().all(|x| *x < 8));

        let mut all = PercentileInterval::<8>::new();
        all.merge_with_expectation(&rhs, 8);
        assert_eq!(all.sample_count(), 8);
    }

    proptest! {
        #[test]
        fn test_retention_bound_and_order(values in arb_vec(any::<u32>(), 17..512)) {
            let mut interval = PercentileInterval::<16>::new();
            for value in &values {
                interval.add32(*value);
            }

            prop_assert_eq!(interval.sample_count(), 16);
            prop_assert_eq!(interval.added_count(), values.len() as u64);

            let mut previous = 0;
            for index in 0..32 {
                let sample = interval.get_sample_at(index);
                prop_assert!(sample >= previous);
                prop_assert!(values.contains(&sample));
                previous = sample;
            }
        }
    }
}
