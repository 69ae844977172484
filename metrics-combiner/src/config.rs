use crate::Builder;
use quanta::Clock;
use std::time::Duration;

/// Holds the configuration of a [`Runtime`](crate::Runtime).
#[derive(Clone, Debug)]
pub(crate) struct Configuration {
    pub sampling_interval: Duration,
    pub series: bool,
    pub default_window_size: usize,
    pub latency_percentiles: [u32; 3],
    pub clock: Clock,
    pub thread_name: String,
}

impl Configuration {
    pub fn from_builder(builder: &Builder) -> Self {
        Self {
            sampling_interval: builder.sampling_interval,
            series: builder.series,
            default_window_size: builder.default_window_size,
            latency_percentiles: builder.latency_percentiles,
            clock: builder.clock.clone(),
            thread_name: builder.thread_name.clone(),
        }
    }
}
