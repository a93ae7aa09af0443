//! Network Analyzer Module
//!
//! Provides network diagnostics including:
//! - Connectivity check (public address lookup)
//! - Latency probe and latency series (jitter, loss)
//! - Parallel download/upload throughput test using Cloudflare's speed test endpoints

pub mod probe;
pub mod throughput;
pub mod types;

pub use probe::{ProbeClient, ProbeEndpoints};
pub use throughput::{
    FinalEstimate, StabilityConfig, ThroughputConfig, ThroughputEstimator, ThroughputRun,
    compute_mbps, partition_bytes,
};
pub use types::*;
