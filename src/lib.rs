//! iodrive - distributed storage I/O load generator
//!
//! iodrive drives files and block devices with weighted access patterns and
//! measures what comes back: per-job counters, latency histograms and a
//! live activity strip.
//!
//! # Architecture
//!
//! - **Access patterns**: `percent:op:blocksize` tuples carve the target into
//!   sections with their own operation kind and block size
//! - **Jobs**: a generator feeding `iodepth` synchronous workers per target
//! - **Barrier scheduling**: jobs run in ordered groups; each group finishes
//!   before the next starts
//! - **Distributed mode**: jobs naming an agent run on that host and stream
//!   stats back to the controller
//! - **Stats engine**: one owner thread for all counters, with an interval
//!   record file

pub mod access;
pub mod config;
pub mod distributed;
pub mod error;
pub mod job;
pub mod output;
pub mod pattern;
pub mod scheduler;
pub mod stats;
pub mod util;

// Re-export commonly used types
pub use access::AccessPattern;
pub use config::Config;
pub use error::{ConfigError, InitError, PatternError, ProtocolError};
pub use job::{Job, JobReport, JobRunner, JobSpec};
pub use scheduler::{BarrierOrder, Scheduler};

/// Result type used throughout iodrive
pub type Result<T> = anyhow::Result<T>;
