//! Metric types.
mod reducer;
pub use reducer::{Adder, Maxer, Miner, ReduceOp, Reducer, ReducerSource};

mod counter;
pub use counter::Counter;

mod gauge;
pub use gauge::Gauge;

mod recorder;
pub use recorder::{AddStat, IntRecorder, MinusStat, Stat};

mod latency;
pub use latency::LatencyRecorder;
