//! Network statistics
//!
//! [`StatsCollector`] holds the counters of one session; [`RttEstimator`]
//! turns acknowledgements into a latency estimate.

pub mod metrics;
pub mod rtt;

pub use metrics::{NetworkStats, StatsCollector};
pub use rtt::RttEstimator;
