//! Snapshots of metric values for exporters.
use std::{collections::BTreeMap, fmt};

use thiserror::Error;

use crate::Runtime;

/// Name, help text and tags of an exposed metric.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    name: String,
    help: Option<String>,
    tags: BTreeMap<String, String>,
}

impl Metadata {
    /// Creates metadata for a metric called `name`.
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self { name: name.into(), help: None, tags: BTreeMap::new() }
    }

    /// Sets the help text.
    pub fn with_help<H: Into<String>>(mut self, help: H) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Adds a tag.
    pub fn with_tag<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Gets the name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the help text.
    pub fn help(&self) -> Option<&str> {
        self.help.as_deref()
    }

    /// Gets the tags.
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }
}

/// Type of an exported metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// A monotonically increasing value.
    Counter,
    /// A value that can go up and down.
    Gauge,
    /// Quantiles along with a running sum and count.
    Summary,
    /// Cumulative bucket counts.
    Histogram,
}

/// Value of an exported metric.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    /// Counter value.
    Counter(f64),
    /// Gauge value.
    Gauge(f64),
    /// Summary value.
    Summary {
        /// `(quantile, value)` pairs, quantiles between 0.0 and 1.0.
        quantiles: Vec<(f64, f64)>,
        /// Sum of every observed value.
        sum: f64,
        /// Number of observed values.
        count: u64,
    },
    /// Histogram value.
    Histogram {
        /// `(upper_bound, cumulative_count)` pairs, in increasing order of upper bound.
        buckets: Vec<(f64, u64)>,
        /// Number of observed values.
        count: u64,
    },
}

impl MetricValue {
    /// Gets the kind of metric this value belongs to.
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Counter(_) => MetricKind::Counter,
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Summary { .. } => MetricKind::Summary,
            MetricValue::Histogram { .. } => MetricKind::Histogram,
        }
    }
}

/// A snapshot of one exposed metric, ready to be formatted by an exporter.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheMetrics {
    /// Metric type.
    pub kind: MetricKind,
    /// Metric name.
    pub name: String,
    /// Help text.
    pub help: Option<String>,
    /// Tags.
    pub tags: BTreeMap<String, String>,
    /// Value.
    pub value: MetricValue,
}

impl CacheMetrics {
    /// Creates an empty snapshot for a metric described by `metadata`.
    pub fn new(metadata: &Metadata) -> Self {
        Self {
            kind: MetricKind::Gauge,
            name: metadata.name.clone(),
            help: metadata.help.clone(),
            tags: metadata.tags.clone(),
            value: MetricValue::Gauge(0.0),
        }
    }

    /// Sets the value, along with the kind it implies.
    pub fn set_value(&mut self, value: MetricValue) {
        self.kind = value.kind();
        self.value = value;
    }
}

/// Options for [`Variable::describe_series`].
#[derive(Clone, Debug)]
pub struct SeriesOptions {
    /// Whether to emit every point of the series, including ones not written yet.
    pub fixed_length: bool,
}

impl Default for SeriesOptions {
    fn default() -> Self {
        Self { fixed_length: true }
    }
}

/// Errors when describing the history of a variable.
#[derive(Debug, Error)]
pub enum SeriesError {
    /// The variable does not keep a series.
    #[error("no series is kept for this variable")]
    NotAvailable,

    /// Writing the series failed.
    #[error("failed to write series: {0}")]
    Format(#[from] fmt::Error),
}

/// Errors when exposing a variable.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExposeError {
    /// The name was empty.
    #[error("variable name must not be empty")]
    EmptyName,

    /// Another live variable is already exposed under this name.
    #[error("a variable named `{name}` is already exposed")]
    AlreadyExposed {
        /// The conflicting name.
        name: String,
    },
}

/// A metric that can be exposed on a [`Runtime`].
pub trait Variable: Send + Sync + 'static {
    /// Writes the current value in a human readable form.
    ///
    /// `quote_string` asks for string values to be quoted.  Numeric values ignore it.
    fn describe(&self, w: &mut dyn fmt::Write, quote_string: bool) -> fmt::Result;

    /// Writes the trend history of the value.
    fn describe_series(
        &self,
        _w: &mut dyn fmt::Write,
        _options: &SeriesOptions,
    ) -> Result<(), SeriesError> {
        Err(SeriesError::NotAvailable)
    }

    /// Snapshots the current value into `metrics`.
    fn collect_metrics(&self, metrics: &mut CacheMetrics);

    /// Starts keeping a trend history, if the variable supports one.
    fn enable_series(&self, _runtime: &Runtime) {}
}
