//! Sampling engines that run alongside the detectors: per-segment RTT
//! estimates and fixed-interval throughput buckets.

pub mod rtt;
pub mod tput;

pub use rtt::RttSampler;
pub use tput::TputSampler;
