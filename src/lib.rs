//! MESI / MOESI cache-coherence simulator: seeded multicore workloads, snooping bus,
//! hit/miss, bus traffic and power metrics.

pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod interconnect;
pub mod memory;
pub mod metrics;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod simulator;
pub mod store;
pub mod workload;

pub use config::SystemConfig;
pub use error::{Error, Result};
pub use metrics::{Metric, MetricKind, MetricsReport};
pub use protocol::Protocol;
pub use session::{InitializeRequest, RunReport, Session};
pub use workload::Seed;
