//! Statistics collection
//!
//! Per-job and global I/O counters plus latency histograms. All mutation of
//! shared counters happens inside the [`engine::StatsEngine`] owner thread;
//! the types here are plain values that get merged, snapshotted and shipped
//! over the agent protocol.
//!
//! # Example
//!
//! ```
//! use iodrive::stats::WorkerStat;
//! use std::time::Duration;
//!
//! let mut a = WorkerStat::default();
//! a.record_read(4096, Duration::from_micros(100));
//!
//! let mut b = WorkerStat::default();
//! b.record_write(8192, Duration::from_micros(150));
//!
//! a.merge(&b).unwrap();
//! assert_eq!(a.total_ops(), 2);
//! assert_eq!(a.total_bytes(), 12288);
//! ```

pub mod activity;
pub mod engine;
pub mod histogram;
pub mod record;

use crate::error::HistogramError;
use crate::util::time::{calculate_iops, calculate_throughput};
use histogram::{DistroGraph, HistogramMode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Counters for one direction (read or write)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpStat {
    pub ops: u64,
    pub bytes: u64,
    pub errors: u64,
    /// Minimum latency in nanoseconds (`u64::MAX` until the first op)
    pub lat_min_ns: u64,
    pub lat_max_ns: u64,
    /// Sum of latencies, for the average
    pub lat_sum_ns: u64,
}

impl OpStat {
    pub fn new() -> Self {
        Self {
            ops: 0,
            bytes: 0,
            errors: 0,
            lat_min_ns: u64::MAX,
            lat_max_ns: 0,
            lat_sum_ns: 0,
        }
    }

    #[inline]
    pub fn record(&mut self, bytes: u64, latency: Duration) {
        let ns = latency.as_nanos().min(u64::MAX as u128) as u64;
        self.ops += 1;
        self.bytes += bytes;
        self.lat_sum_ns = self.lat_sum_ns.saturating_add(ns);
        self.lat_min_ns = self.lat_min_ns.min(ns);
        self.lat_max_ns = self.lat_max_ns.max(ns);
    }

    /// Combine counters; one line per field, each with its own rule
    pub fn merge(&mut self, other: &OpStat) {
        self.ops += other.ops;
        self.bytes += other.bytes;
        self.errors += other.errors;
        self.lat_min_ns = self.lat_min_ns.min(other.lat_min_ns);
        self.lat_max_ns = self.lat_max_ns.max(other.lat_max_ns);
        self.lat_sum_ns = self.lat_sum_ns.saturating_add(other.lat_sum_ns);
    }

    /// Average latency, `None` until an op has completed
    pub fn avg_latency(&self) -> Option<Duration> {
        (self.ops > 0).then(|| Duration::from_nanos(self.lat_sum_ns / self.ops))
    }

    pub fn min_latency(&self) -> Option<Duration> {
        (self.ops > 0).then(|| Duration::from_nanos(self.lat_min_ns))
    }

    pub fn max_latency(&self) -> Option<Duration> {
        (self.ops > 0).then(|| Duration::from_nanos(self.lat_max_ns))
    }
}

impl Default for OpStat {
    fn default() -> Self {
        Self::new()
    }
}

/// Read and write counters plus a latency histogram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStat {
    pub read: OpStat,
    pub write: OpStat,
    /// Wall time covered by these counters
    pub elapsed_ns: u64,
    pub histogram: DistroGraph,
}

impl WorkerStat {
    pub fn new(mode: HistogramMode) -> Self {
        Self {
            read: OpStat::new(),
            write: OpStat::new(),
            elapsed_ns: 0,
            histogram: DistroGraph::new(mode),
        }
    }

    #[inline]
    pub fn record_read(&mut self, bytes: u64, latency: Duration) {
        self.read.record(bytes, latency);
        self.histogram.aggregate(latency);
    }

    #[inline]
    pub fn record_write(&mut self, bytes: u64, latency: Duration) {
        self.write.record(bytes, latency);
        self.histogram.aggregate(latency);
    }

    /// Associative, commutative combination
    ///
    /// Counters and bytes sum, extrema take min/max, elapsed takes the
    /// longer span (merged stats describe concurrent work), histograms sum
    /// bucket-wise.
    pub fn merge(&mut self, other: &WorkerStat) -> Result<(), HistogramError> {
        self.histogram.merge(&other.histogram)?;
        self.read.merge(&other.read);
        self.write.merge(&other.write);
        self.elapsed_ns = self.elapsed_ns.max(other.elapsed_ns);
        Ok(())
    }

    /// Zero every field, keeping the histogram layout
    pub fn clear(&mut self) {
        self.read = OpStat::new();
        self.write = OpStat::new();
        self.elapsed_ns = 0;
        self.histogram.reset();
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns)
    }

    pub fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed_ns = elapsed.as_nanos().min(u64::MAX as u128) as u64;
    }

    pub fn total_ops(&self) -> u64 {
        self.read.ops + self.write.ops
    }

    pub fn total_bytes(&self) -> u64 {
        self.read.bytes + self.write.bytes
    }

    pub fn total_errors(&self) -> u64 {
        self.read.errors + self.write.errors
    }

    pub fn iops(&self) -> f64 {
        calculate_iops(self.total_ops(), self.elapsed())
    }

    pub fn throughput(&self) -> f64 {
        calculate_throughput(self.total_bytes(), self.elapsed())
    }

    /// Average latency across both directions
    pub fn avg_latency(&self) -> Option<Duration> {
        let ops = self.total_ops();
        (ops > 0).then(|| {
            Duration::from_nanos(
                self.read.lat_sum_ns.saturating_add(self.write.lat_sum_ns) / ops,
            )
        })
    }
}

impl Default for WorkerStat {
    fn default() -> Self {
        Self::new(HistogramMode::Log2)
    }
}
