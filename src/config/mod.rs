//! Configuration
//!
//! A run is described by one TOML document:
//!
//! ```toml
//! order = "prep,barrier,reader,writer"
//!
//! [global]
//! size = "1g"
//! runtime = "30s"
//! iodepth = 4
//! histogram = { mode = "log" }
//! record_file = "run.csv"
//!
//! [jobs.prep]
//! target = "/mnt/test/a.dat"
//! access = "100:write:1m"
//!
//! [jobs.reader]
//! target = "/mnt/test/a.dat"
//! access = "100:randread:4k"
//!
//! [jobs.writer]
//! target = "/mnt/test/b.dat"
//! access = "50:randrw|70:4k,50:none:4k"
//! remote = "node2:9999"
//! ```
//!
//! `[global] record_interval` sets how often the record file gets a line.
//! A job section may only override it for a `remote` job, where it sets how
//! often the agent pushes stats.
//!
//! Every job field may appear in `[global]` as a default. The document is
//! deserialized into [`ConfigFile`] and then resolved by
//! [`validator::resolve`] into an immutable [`Config`].

pub mod cli;
pub mod toml;
pub mod units;
pub mod validator;

use crate::job::JobSpec;
use crate::pattern::FillPattern;
use crate::scheduler::{BarrierOrder, SchedulerConfig};
use crate::stats::engine::{StatsConfig, DEFAULT_DISPLAY_WIDTH, DEFAULT_RECORD_INTERVAL};
use crate::stats::histogram::HistogramMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use units::{DurationValue, SizeValue};

/// Job fields as written; unset fields fall back to `[global]`, then to
/// [`JobSpec::new`] defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSection {
    pub target: Option<PathBuf>,
    pub size: Option<SizeValue>,
    pub iodepth: Option<usize>,
    pub runtime: Option<DurationValue>,
    pub fill: Option<FillPattern>,
    pub access: Option<String>,
    /// fsync after every N ops per worker
    pub fsync: Option<u64>,
    pub start_delay: Option<DurationValue>,
    pub record_interval: Option<DurationValue>,
    pub verbose: Option<bool>,
    pub remote: Option<String>,
    pub bail_on_error: Option<bool>,
    pub seed: Option<u64>,
    pub fill_workers: Option<usize>,
}

impl JobSection {
    /// Fields set here win; the rest come from `defaults`
    pub fn or(&self, defaults: &JobSection) -> JobSection {
        JobSection {
            target: self.target.clone().or_else(|| defaults.target.clone()),
            size: self.size.clone().or_else(|| defaults.size.clone()),
            iodepth: self.iodepth.or(defaults.iodepth),
            runtime: self.runtime.clone().or_else(|| defaults.runtime.clone()),
            fill: self.fill.or(defaults.fill),
            access: self.access.clone().or_else(|| defaults.access.clone()),
            fsync: self.fsync.or(defaults.fsync),
            start_delay: self.start_delay.clone().or_else(|| defaults.start_delay.clone()),
            record_interval: self
                .record_interval
                .clone()
                .or_else(|| defaults.record_interval.clone()),
            verbose: self.verbose.or(defaults.verbose),
            remote: self.remote.clone().or_else(|| defaults.remote.clone()),
            bail_on_error: self.bail_on_error.or(defaults.bail_on_error),
            seed: self.seed.or(defaults.seed),
            fill_workers: self.fill_workers.or(defaults.fill_workers),
        }
    }
}

/// `[global]`: job defaults plus run-wide settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSection {
    #[serde(flatten)]
    pub job: JobSection,
    /// Interval CSV output
    pub record_file: Option<PathBuf>,
    /// Final JSON report
    pub json_output: Option<PathBuf>,
    pub histogram: Option<HistogramMode>,
    /// Bar-chart width
    pub stats_width: Option<usize>,
    /// Print Display while groups run
    pub display_interval: Option<DurationValue>,
}

/// The document as deserialized
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub global: GlobalSection,
    pub jobs: BTreeMap<String, JobSection>,
    /// Comma-separated job names with `barrier` between groups
    pub order: Option<String>,
}

/// Validated run description
#[derive(Debug, Clone)]
pub struct Config {
    /// Resolved jobs, in name order
    pub jobs: Vec<JobSpec>,
    pub order: BarrierOrder,
    pub record_file: Option<PathBuf>,
    pub record_interval: Duration,
    pub json_output: Option<PathBuf>,
    pub histogram: HistogramMode,
    pub stats_width: usize,
    pub display_interval: Option<Duration>,
}

impl Config {
    pub fn job(&self, name: &str) -> Option<&JobSpec> {
        self.jobs.iter().find(|j| j.name == name)
    }

    pub fn stats_config(&self) -> StatsConfig {
        StatsConfig {
            histogram: self.histogram,
            record_file: self.record_file.clone(),
            record_interval: self.record_interval,
            display_width: self.stats_width,
        }
    }

    pub fn scheduler_config(&self, quiet: bool) -> SchedulerConfig {
        SchedulerConfig {
            display_interval: self.display_interval,
            display_width: self.stats_width,
            quiet,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jobs: Vec::new(),
            order: BarrierOrder::default(),
            record_file: None,
            record_interval: DEFAULT_RECORD_INTERVAL,
            json_output: None,
            histogram: HistogramMode::Log2,
            stats_width: DEFAULT_DISPLAY_WIDTH,
            display_interval: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_section_overlay() {
        let global = JobSection {
            iodepth: Some(8),
            access: Some("100:randread:4k".to_string()),
            verbose: Some(true),
            ..Default::default()
        };
        let job = JobSection {
            target: Some(PathBuf::from("/tmp/a")),
            iodepth: Some(2),
            ..Default::default()
        };

        let merged = job.or(&global);
        assert_eq!(merged.target, Some(PathBuf::from("/tmp/a")));
        assert_eq!(merged.iodepth, Some(2));
        assert_eq!(merged.access.as_deref(), Some("100:randread:4k"));
        assert_eq!(merged.verbose, Some(true));
        assert_eq!(merged.remote, None);
    }

    #[test]
    fn test_global_flattens_job_fields() {
        let doc = r#"
            order = "a"

            [global]
            iodepth = 4
            size = "1m"
            stats_width = 60
            histogram = { mode = "linear", min = 0, max = 1000, interval = 10 }

            [jobs.a]
            target = "/tmp/a"
        "#;
        let file: ConfigFile = ::toml::from_str(doc).unwrap();
        assert_eq!(file.global.job.iodepth, Some(4));
        assert_eq!(file.global.job.size, Some(SizeValue::Text("1m".to_string())));
        assert_eq!(file.global.stats_width, Some(60));
        assert_eq!(
            file.global.histogram,
            Some(HistogramMode::Linear {
                min: 0,
                max: 1000,
                interval: 10
            })
        );
        assert_eq!(file.order.as_deref(), Some("a"));
        assert!(file.jobs.contains_key("a"));
    }
}
