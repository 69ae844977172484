//! Thread-local combiner metrics.
//!
//! `metrics-combiner` provides metrics that stay cheap to write from many threads at once.  Every
//! metric is backed by a combiner: each thread writing to it gets its own agent, an element
//! private to that thread, and reads fold every agent's element together.  Writers never contend
//! with each other, only with the occasional reader.
//!
//! # Metrics
//!
//! Reducers fold values with an operator: [`Adder`](data::Adder) sums, [`Maxer`](data::Maxer)
//! and [`Miner`](data::Miner) keep the extremes.  [`Counter`](data::Counter),
//! [`Gauge`](data::Gauge) and [`IntRecorder`](data::IntRecorder) build on them, and
//! [`Percentile`](percentile::Percentile) answers approximate quantile queries over bounded
//! memory.  [`LatencyRecorder`](data::LatencyRecorder) combines an average, a maximum and a
//! percentile over a window.
//!
//! ```rust
//! use metrics_combiner::data::{Adder, Maxer};
//! let bytes = Adder::<u64>::new();
//! bytes.record(512);
//! let _ = &bytes << 256 << 256;
//! assert_eq!(bytes.get_value(), 1024);
//!
//! let largest = Maxer::<i64>::new();
//! largest.record(3);
//! largest.record(11);
//! assert_eq!(largest.get_value(), 11);
//! ```
//!
//! # Windows
//!
//! A [`Runtime`] owns a background thread, the collector, that samples every windowed metric once
//! per sampling interval.  A [`Window`](window::Window) reads a metric's value over the last few
//! samples and a [`PerSecond`](window::PerSecond) divides it by the time they cover.  Reducers
//! with an inverse operator, like [`Adder`](data::Adder), compute windows in constant time;
//! others reduce every sample inside the window.
//!
//! ```rust
//! use metrics_combiner::{data::Adder, window::PerSecond, Runtime};
//! let runtime = Runtime::builder().build().expect("failed to create runtime");
//!
//! let requests = Adder::<u64>::new();
//! let qps = PerSecond::new(&runtime, &requests, 10).expect("invalid window size");
//! requests.record(1);
//!
//! // Reads as zero until the collector has taken two samples.
//! assert_eq!(qps.get_value(), 0.0);
//! ```
//!
//! # Exposing
//!
//! Metrics implementing [`Variable`](export::Variable) can be exposed on a [`Runtime`] by name,
//! then described or snapshotted into [`CacheMetrics`](export::CacheMetrics) for an exporter.  The
//! runtime only keeps weak references: a dropped metric disappears on its own.
//!
//! ```rust
//! use metrics_combiner::{data::Counter, export::Metadata, Runtime};
//! use std::sync::Arc;
//! let runtime = Runtime::builder().build().expect("failed to create runtime");
//!
//! let errors = Arc::new(Counter::new());
//! runtime.expose(Metadata::new("errors").with_tag("service", "billing"), &errors).unwrap();
//! errors.increment();
//!
//! let metrics = runtime.collect_metrics();
//! assert_eq!(metrics[0].name, "errors");
//! ```
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
mod config;
mod helper;
mod runtime;

pub mod combiner;
pub mod data;
pub mod export;
pub mod ops;
pub mod percentile;
pub mod queue;
pub mod sampler;
pub mod window;

pub use self::{
    builder::{BuildError, Builder},
    runtime::Runtime,
    sampler::MAX_WINDOW_SIZE,
};
