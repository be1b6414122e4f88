//! JSON output formatting
//!
//! One document per run with an entry per barrier group: each job's final
//! report and counters plus the group aggregate with its non-empty histogram
//! buckets.

use crate::job::JobReport;
use crate::scheduler::GroupResult;
use crate::stats::histogram::{DistroGraph, HistogramMode};
use crate::stats::{OpStat, WorkerStat};
use crate::util::time::{format_duration, format_throughput};
use crate::Result;
use anyhow::Context;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

/// Duration with both microseconds and human-readable format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonDuration {
    pub micros: u64,
    pub human: String,
}

impl JsonDuration {
    pub fn from_duration(d: Duration) -> Self {
        Self {
            micros: d.as_micros().min(u64::MAX as u128) as u64,
            human: format_duration(d),
        }
    }
}

/// Throughput with bytes/sec and human-readable format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonThroughput {
    pub bytes_per_sec: u64,
    pub human: String,
}

impl JsonThroughput {
    pub fn new(bytes_per_sec: f64) -> Self {
        Self {
            bytes_per_sec: bytes_per_sec as u64,
            human: format_throughput(bytes_per_sec),
        }
    }
}

/// Latency summary; every field is absent when no op completed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonLatency {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<JsonDuration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<JsonDuration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<JsonDuration>,
}

impl JsonLatency {
    fn from_op(op: &OpStat) -> Self {
        Self {
            min: op.min_latency().map(JsonDuration::from_duration),
            mean: op.avg_latency().map(JsonDuration::from_duration),
            max: op.max_latency().map(JsonDuration::from_duration),
        }
    }
}

/// A populated histogram bucket, bounds in microseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonBucket {
    pub lo_us: u64,
    pub hi_us: u64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonHistogram {
    pub layout: HistogramMode,
    pub p50: JsonDuration,
    pub p90: JsonDuration,
    pub p99: JsonDuration,
    pub buckets: Vec<JsonBucket>,
}

impl JsonHistogram {
    pub fn from_graph(graph: &DistroGraph) -> Self {
        let buckets = graph
            .buckets()
            .iter()
            .enumerate()
            .filter(|(_, &count)| count > 0)
            .map(|(idx, &count)| {
                let (lo_us, hi_us) = graph.bucket_bounds(idx);
                JsonBucket { lo_us, hi_us, count }
            })
            .collect();
        Self {
            layout: graph.mode(),
            p50: JsonDuration::from_duration(graph.percentile(50.0)),
            p90: JsonDuration::from_duration(graph.percentile(90.0)),
            p99: JsonDuration::from_duration(graph.percentile(99.0)),
            buckets,
        }
    }
}

/// Counters for a job or a group aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonStats {
    pub elapsed: JsonDuration,
    pub read_ops: u64,
    pub write_ops: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_errors: u64,
    pub write_errors: u64,
    pub iops: u64,
    pub throughput: JsonThroughput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_mean: Option<JsonDuration>,
    pub read_latency: JsonLatency,
    pub write_latency: JsonLatency,
    pub histogram: JsonHistogram,
}

impl JsonStats {
    pub fn from_stat(stat: &WorkerStat) -> Self {
        Self {
            elapsed: JsonDuration::from_duration(stat.elapsed()),
            read_ops: stat.read.ops,
            write_ops: stat.write.ops,
            read_bytes: stat.read.bytes,
            write_bytes: stat.write.bytes,
            read_errors: stat.read.errors,
            write_errors: stat.write.errors,
            iops: stat.iops() as u64,
            throughput: JsonThroughput::new(stat.throughput()),
            latency_mean: stat.avg_latency().map(JsonDuration::from_duration),
            read_latency: JsonLatency::from_op(&stat.read),
            write_latency: JsonLatency::from_op(&stat.write),
            histogram: JsonHistogram::from_graph(&stat.histogram),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonJob {
    pub report: JobReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<JsonStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonGroup {
    pub index: usize,
    pub start_time: String,
    pub duration: JsonDuration,
    /// Jobs dropped at init
    pub failed: Vec<String>,
    pub jobs: Vec<JsonJob>,
    pub aggregate: JsonStats,
}

impl JsonGroup {
    pub fn from_result(result: &GroupResult) -> Self {
        let jobs = result
            .reports
            .iter()
            .map(|report| JsonJob {
                report: report.clone(),
                stats: result.snapshot.job(&report.name).map(JsonStats::from_stat),
            })
            .collect();
        Self {
            index: result.index,
            start_time: result.started_at.to_rfc3339(),
            duration: JsonDuration::from_duration(result.duration),
            failed: result.failed.clone(),
            jobs,
            aggregate: JsonStats::from_stat(&result.snapshot.global),
        }
    }
}

/// Complete run output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRunReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    pub groups: Vec<JsonGroup>,
}

impl JsonRunReport {
    pub fn new(started: DateTime<Local>) -> Self {
        Self {
            hostname: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok()),
            start_time: started.to_rfc3339(),
            end_time: None,
            groups: Vec::new(),
        }
    }

    pub fn from_results(started: DateTime<Local>, results: &[GroupResult]) -> Self {
        let mut report = Self::new(started);
        report.groups = results.iter().map(JsonGroup::from_result).collect();
        report.end_time = Some(Local::now().to_rfc3339());
        report
    }
}

/// Write the run report to `output_path`
pub fn write_json_output(output_path: &Path, report: &JsonRunReport, pretty: bool) -> Result<()> {
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create JSON output {}", output_path.display()))?;
    let writer = BufWriter::new(file);

    if pretty {
        serde_json::to_writer_pretty(writer, report)?;
    } else {
        serde_json::to_writer(writer, report)?;
    }

    Ok(())
}
