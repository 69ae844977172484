use std::{io, time::Duration};

use quanta::Clock;
use thiserror::Error;

use crate::{config::Configuration, sampler::MAX_WINDOW_SIZE, Runtime};

/// Errors during runtime creation.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to spawn the collector thread.
    ///
    /// Windowed metrics are computed from samples taken once per sampling interval by a single
    /// background thread, the "collector".  Without it, windows never see any history.
    #[error("failed to spawn sampler collector thread: {0}")]
    Collector(#[from] io::Error),

    /// The default window size is zero or larger than the longest supported window.
    #[error("default window size must be between 1 and {max}, got {window_size}", max = MAX_WINDOW_SIZE)]
    InvalidWindowSize {
        /// Requested window size.
        window_size: usize,
    },

    /// A latency percentile is not strictly between 0 and 100.
    #[error("latency percentiles must be between 1 and 99, got {ratio}")]
    InvalidPercentile {
        /// Requested percentile.
        ratio: u32,
    },

    /// The sampling interval is zero.
    #[error("sampling interval must be greater than zero")]
    InvalidInterval,
}

/// Builder for [`Runtime`].
#[derive(Clone)]
pub struct Builder {
    pub(crate) sampling_interval: Duration,
    pub(crate) series: bool,
    pub(crate) default_window_size: usize,
    pub(crate) latency_percentiles: [u32; 3],
    pub(crate) clock: Clock,
    pub(crate) thread_name: String,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            sampling_interval: Duration::from_secs(1),
            series: false,
            default_window_size: 10,
            latency_percentiles: [80, 90, 99],
            clock: Clock::new(),
            thread_name: "metrics-sampler".to_owned(),
        }
    }
}

impl Builder {
    /// Creates a new [`Builder`] with default values.
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets the sampling interval.
    ///
    /// Defaults to 1 second.
    ///
    /// Every window and series sampler is sampled once per interval, so a window of size `n`
    /// covers `n` intervals.  Window sizes and series resolutions are expressed in seconds under
    /// the assumption that this is left at its default.
    pub fn sampling_interval(mut self, interval: Duration) -> Self {
        self.sampling_interval = interval;
        self
    }

    /// Sets whether variables keep a trend history once exposed.
    ///
    /// Defaults to `false`.
    pub fn series(mut self, enabled: bool) -> Self {
        self.series = enabled;
        self
    }

    /// Sets the window size used by [`LatencyRecorder::new`](crate::data::LatencyRecorder::new).
    ///
    /// Defaults to 10.
    pub fn default_window_size(mut self, window_size: usize) -> Self {
        self.default_window_size = window_size;
        self
    }

    /// Sets the three percentiles reported by latency recorders besides 99.9 and 99.99.
    ///
    /// Defaults to 80, 90 and 99.
    pub fn latency_percentiles(mut self, percentiles: [u32; 3]) -> Self {
        self.latency_percentiles = percentiles;
        self
    }

    /// Sets the clock used to timestamp samples.
    ///
    /// Defaults to a real clock.  Tests can pass a mocked clock to control time.
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the name of the collector thread.
    ///
    /// Defaults to `metrics-sampler`.
    pub fn thread_name<N: Into<String>>(mut self, name: N) -> Self {
        self.thread_name = name.into();
        self
    }

    fn validate(&self) -> Result<(), BuildError> {
        if self.sampling_interval.is_zero() {
            return Err(BuildError::InvalidInterval);
        }
        if self.default_window_size == 0 || self.default_window_size > MAX_WINDOW_SIZE {
            return Err(BuildError::InvalidWindowSize { window_size: self.default_window_size });
        }
        if let Some(ratio) = self.latency_percentiles.iter().find(|p| !(1..=99).contains(*p)) {
            return Err(BuildError::InvalidPercentile { ratio: *ratio });
        }
        Ok(())
    }

    /// Creates a [`Runtime`] based on this configuration.
    pub fn build(self) -> Result<Runtime, BuildError> {
        self.validate()?;
        let config = Configuration::from_builder(&self);
        Runtime::from_config(config)
    }
}
