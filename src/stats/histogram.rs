//! Latency distribution graph
//!
//! Fixed-size bucket array over microsecond latencies. Two layouts:
//!
//! - **Log2** (default): bucket `floor(log2(t_us))`, sub-microsecond samples
//!   land in bucket 0, anything past the last bucket is clipped to it.
//! - **Linear**: buckets of `interval` microseconds starting at `min`;
//!   samples below `min` go to bucket 0, samples at or above `max` to the
//!   last bucket.
//!
//! Buckets only grow. Merge is a bucket-wise sum, so per-worker or per-agent
//! graphs combine in any order.
//!
//! # Example
//!
//! ```
//! use iodrive::stats::histogram::DistroGraph;
//! use std::time::Duration;
//!
//! let mut a = DistroGraph::log2();
//! let mut b = DistroGraph::log2();
//! a.aggregate(Duration::from_micros(100));
//! b.aggregate(Duration::from_micros(3));
//! a.merge(&b).unwrap();
//! assert_eq!(a.total(), 2);
//! ```

use crate::error::HistogramError;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;

/// Number of log2 buckets (covers up to ~35 minutes)
pub const LOG2_BUCKETS: usize = 32;

/// Upper bound on linear bucket count
pub const MAX_LINEAR_BUCKETS: u64 = 4096;

/// Bucket layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum HistogramMode {
    #[serde(rename = "log", alias = "log2")]
    Log2,
    Linear {
        /// Lower bound in microseconds
        min: u64,
        /// Upper bound in microseconds
        max: u64,
        /// Bucket width in microseconds
        interval: u64,
    },
}

impl Default for HistogramMode {
    fn default() -> Self {
        HistogramMode::Log2
    }
}

impl HistogramMode {
    /// Number of buckets this layout uses
    pub fn bucket_count(&self) -> usize {
        match *self {
            HistogramMode::Log2 => LOG2_BUCKETS,
            HistogramMode::Linear { min, max, interval } => {
                let span = max.saturating_sub(min);
                (span.div_ceil(interval.max(1))).clamp(1, MAX_LINEAR_BUCKETS) as usize
            }
        }
    }

    /// Check a linear layout is usable
    pub fn validate(&self) -> Result<(), String> {
        if let HistogramMode::Linear { min, max, interval } = *self {
            if interval == 0 {
                return Err("linear interval must be > 0".to_string());
            }
            if max <= min {
                return Err(format!("linear max ({}) must exceed min ({})", max, min));
            }
            if (max - min).div_ceil(interval) > MAX_LINEAR_BUCKETS {
                return Err(format!(
                    "linear layout needs more than {} buckets",
                    MAX_LINEAR_BUCKETS
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistroGraph {
    mode: HistogramMode,
    buckets: Vec<u64>,
}

impl DistroGraph {
    pub fn new(mode: HistogramMode) -> Self {
        Self {
            mode,
            buckets: vec![0; mode.bucket_count()],
        }
    }

    pub fn log2() -> Self {
        Self::new(HistogramMode::Log2)
    }

    pub fn linear(min: u64, max: u64, interval: u64) -> Self {
        Self::new(HistogramMode::Linear { min, max, interval })
    }

    pub fn mode(&self) -> HistogramMode {
        self.mode
    }

    /// Bucket index for a duration
    #[inline]
    pub fn bucket_index(&self, t: Duration) -> usize {
        let micros = t.as_micros().min(u64::MAX as u128) as u64;
        let last = self.buckets.len() - 1;
        match self.mode {
            HistogramMode::Log2 => {
                if micros == 0 {
                    0
                } else {
                    ((63 - micros.leading_zeros()) as usize).min(last)
                }
            }
            HistogramMode::Linear { min, interval, .. } => {
                if micros < min {
                    0
                } else {
                    (((micros - min) / interval.max(1)) as usize).min(last)
                }
            }
        }
    }

    /// Record one sample
    #[inline]
    pub fn aggregate(&mut self, t: Duration) {
        let idx = self.bucket_index(t);
        self.buckets[idx] += 1;
    }

    /// Bucket-wise sum of `other` into `self`
    pub fn merge(&mut self, other: &DistroGraph) -> Result<(), HistogramError> {
        if self.mode != other.mode || self.buckets.len() != other.buckets.len() {
            return Err(HistogramError::LayoutMismatch);
        }
        for (mine, theirs) in self.buckets.iter_mut().zip(&other.buckets) {
            *mine += theirs;
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.buckets.iter_mut().for_each(|b| *b = 0);
    }

    pub fn total(&self) -> u64 {
        self.buckets.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }

    /// Microsecond range `[lo, hi)` covered by bucket `idx`
    pub fn bucket_bounds(&self, idx: usize) -> (u64, u64) {
        match self.mode {
            HistogramMode::Log2 => {
                if idx == 0 {
                    (0, 2)
                } else {
                    (1u64 << idx, 1u64 << (idx + 1).min(63))
                }
            }
            HistogramMode::Linear { min, interval, .. } => {
                let lo = min + idx as u64 * interval;
                (lo, lo + interval)
            }
        }
    }

    /// Upper bound of the bucket holding the given percentile (0-100)
    pub fn percentile(&self, percentile: f64) -> Duration {
        let total = self.total();
        if total == 0 {
            return Duration::ZERO;
        }
        let target = ((percentile / 100.0) * total as f64).ceil().max(1.0) as u64;
        let mut cumulative = 0u64;
        for (idx, &count) in self.buckets.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                return Duration::from_micros(self.bucket_bounds(idx).1);
            }
        }
        Duration::from_micros(self.bucket_bounds(self.buckets.len() - 1).1)
    }

    /// Text bar chart, one line per populated bucket range, scaled to `width`
    pub fn render(&self, width: usize) -> String {
        let mut out = String::new();
        let (first, last) = match (
            self.buckets.iter().position(|&c| c > 0),
            self.buckets.iter().rposition(|&c| c > 0),
        ) {
            (Some(f), Some(l)) => (f, l),
            _ => return out,
        };

        let labels: Vec<String> = (first..=last)
            .map(|i| {
                let (lo, hi) = self.bucket_bounds(i);
                format!("{}-{}us", lo, hi)
            })
            .collect();
        let counts: Vec<String> = self.buckets[first..=last]
            .iter()
            .map(|c| c.to_string())
            .collect();
        let label_w = labels.iter().map(String::len).max().unwrap_or(0);
        let count_w = counts.iter().map(String::len).max().unwrap_or(0);

        // "label | bar count"
        let bar_w = width.saturating_sub(label_w + count_w + 4).max(1);
        let peak = self.buckets[first..=last].iter().copied().max().unwrap_or(1).max(1);

        for (i, idx) in (first..=last).enumerate() {
            let count = self.buckets[idx];
            let len = ((count as u128 * bar_w as u128) / peak as u128) as usize;
            let len = if count > 0 { len.max(1) } else { 0 };
            let _ = writeln!(
                out,
                "{:>lw$} |{:<bw$} {:>cw$}",
                labels[i],
                "#".repeat(len),
                counts[i],
                lw = label_w,
                bw = bar_w,
                cw = count_w,
            );
        }
        out
    }
}

impl Default for DistroGraph {
    fn default() -> Self {
        Self::log2()
    }
}
