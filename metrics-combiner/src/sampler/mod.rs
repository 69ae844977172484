//! Periodic sampling of metric values.
//!
//! A [`Sampler`] is anything wanting a call to [`take_sample`](Sampler::take_sample) once per
//! collection round.  The [`Collector`](collector::Collector) drives every sampler registered with
//! a [`Runtime`](crate::Runtime) from a single background thread.
//!
//! Samplers are owned by the metric they sample.  The collector only holds a weak reference,
//! upgraded for the duration of each call, so dropping a metric never races an in-flight sample:
//! whichever side releases the last strong reference frees the sampler, and the collector prunes
//! the dead entry on its next round.

mod collector;
pub(crate) use self::collector::Collector;
pub use self::collector::{CombineSampler, SamplerList};

mod reducer;
pub use self::reducer::{ReducerSampler, MAX_WINDOW_SIZE};

mod series;
pub use self::series::{Series, SeriesSampler};

/// Something sampled once per collection round.
pub trait Sampler: Send + Sync + 'static {
    /// Takes a sample.
    fn take_sample(&self);
}

/// A value with the time it was sampled at.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample<T> {
    /// Sampled value.
    pub data: T,
    /// Timestamp, in microseconds.  For a span between two samples, the elapsed time.
    pub time_us: u64,
}

/// A metric value that a [`ReducerSampler`] can keep a history of.
pub trait SampleSource: Send + Sync + 'static {
    /// Type of the sampled value.
    type Value: Clone + Send + 'static;

    /// Whether [`invert`](SampleSource::invert) is available.
    ///
    /// Invertible sources are sampled cumulatively and windows are computed as the difference
    /// between two samples.  Other sources are drained on every sample, and windows re-reduce
    /// every sample they cover.
    const INVERTIBLE: bool;

    /// Gets the current value without modifying it.
    fn get_value(&self) -> Self::Value;

    /// Resets the value to identity, returning the prior value.
    fn reset(&self) -> Self::Value;

    /// The identity value.
    fn identity(&self) -> Self::Value;

    /// Applies `acc = acc op value`.
    fn reduce(&self, acc: &mut Self::Value, value: &Self::Value);

    /// Applies `acc = acc inv value`.  Only called when [`INVERTIBLE`](SampleSource::INVERTIBLE).
    fn invert(&self, acc: &mut Self::Value, value: &Self::Value);
}
