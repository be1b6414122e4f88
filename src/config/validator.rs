//! Configuration validation
//!
//! Turns a parsed [`ConfigFile`] into a [`Config`]: job sections are layered
//! over `[global]`, converted to [`JobSpec`]s and checked, and the order
//! string is matched against the defined jobs. The first problem found is
//! returned as a [`ConfigError`] naming the job and field.

use super::units::{DurationValue, SizeValue};
use super::{Config, ConfigFile, JobSection};
use crate::access::AccessPattern;
use crate::error::ConfigError;
use crate::job::JobSpec;
use crate::scheduler::{BarrierOrder, BARRIER_TOKEN};
use crate::stats::engine::{DEFAULT_DISPLAY_WIDTH, DEFAULT_RECORD_INTERVAL};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Narrowest bar chart that still shows bucket labels
pub const MIN_STATS_WIDTH: usize = 20;

/// Resolve and validate the whole document
pub fn resolve(file: &ConfigFile) -> Result<Config, ConfigError> {
    if file.jobs.is_empty() {
        return Err(ConfigError::Order("no jobs defined".to_string()));
    }

    let mut jobs = Vec::with_capacity(file.jobs.len());
    for (name, section) in &file.jobs {
        let spec = resolve_job(name, &section.or(&file.global.job))?;
        validate_job(&spec)?;
        // the record file ticks once for the whole run
        if section.record_interval.is_some() && !spec.is_remote() {
            return Err(invalid(
                name,
                "record_interval",
                "only remote jobs take their own interval; set it in [global]",
            ));
        }
        jobs.push(spec);
    }

    let order = match file.order.as_deref() {
        Some(order) => BarrierOrder::parse(order)?,
        None => BarrierOrder::single_group(jobs.iter().map(|j| j.name.clone())),
    };
    validate_order(&order, &jobs)?;

    let global = &file.global;
    let histogram = global.histogram.unwrap_or_default();
    histogram.validate().map_err(ConfigError::Histogram)?;

    let stats_width = global.stats_width.unwrap_or(DEFAULT_DISPLAY_WIDTH);
    if stats_width < MIN_STATS_WIDTH {
        return Err(invalid(
            "global",
            "stats_width",
            format!("must be at least {}", MIN_STATS_WIDTH),
        ));
    }

    let record_interval = duration("global", "record_interval", global.job.record_interval.as_ref())?
        .unwrap_or(DEFAULT_RECORD_INTERVAL);
    if record_interval.is_zero() {
        return Err(invalid("global", "record_interval", "must be non-zero"));
    }

    let display_interval = duration("global", "display_interval", global.display_interval.as_ref())?
        .filter(|d| !d.is_zero());

    Ok(Config {
        jobs,
        order,
        record_file: global.record_file.clone(),
        record_interval,
        json_output: global.json_output.clone(),
        histogram,
        stats_width,
        display_interval,
    })
}

/// Build a spec from a merged section; only conversions happen here
pub fn resolve_job(name: &str, section: &JobSection) -> Result<JobSpec, ConfigError> {
    let target = section
        .target
        .clone()
        .ok_or_else(|| invalid(name, "target", "required"))?;

    let mut spec = JobSpec::new(name, target);
    if let Some(size) = size(name, "size", section.size.as_ref())? {
        spec.size = size;
    }
    if let Some(iodepth) = section.iodepth {
        spec.iodepth = iodepth;
    }
    if let Some(runtime) = duration(name, "runtime", section.runtime.as_ref())? {
        spec.runtime = runtime;
    }
    if let Some(fill) = section.fill {
        spec.fill = fill;
    }
    if let Some(access) = &section.access {
        spec.access = access.clone();
    }
    if let Some(fsync) = section.fsync {
        spec.fsync_every = fsync;
    }
    if let Some(delay) = duration(name, "start_delay", section.start_delay.as_ref())? {
        spec.start_delay = delay;
    }
    if let Some(interval) = duration(name, "record_interval", section.record_interval.as_ref())? {
        spec.record_interval = interval;
    }
    if let Some(verbose) = section.verbose {
        spec.verbose = verbose;
    }
    spec.remote = section.remote.clone();
    if let Some(bail) = section.bail_on_error {
        spec.bail_on_error = bail;
    }
    spec.seed = section.seed;
    if let Some(workers) = section.fill_workers {
        spec.fill_workers = workers;
    }
    Ok(spec)
}

/// Check one resolved job
pub fn validate_job(spec: &JobSpec) -> Result<(), ConfigError> {
    let name = spec.name.as_str();
    validate_name(name)?;

    if spec.iodepth == 0 {
        return Err(invalid(name, "iodepth", "must be at least 1"));
    }
    if spec.fill_workers == 0 {
        return Err(invalid(name, "fill_workers", "must be at least 1"));
    }
    if spec.record_interval.is_zero() {
        return Err(invalid(name, "record_interval", "must be non-zero"));
    }
    if let Some(remote) = &spec.remote {
        if remote.trim().is_empty() {
            return Err(invalid(name, "remote", "empty agent address"));
        }
    }

    let pattern = AccessPattern::parse(&spec.access).map_err(|source| ConfigError::Pattern {
        job: name.to_string(),
        source,
    })?;

    // the agent checks its own filesystem at init
    let size = if spec.size == 0 && !spec.is_remote() {
        existing_size(name, &spec.target)?
    } else {
        spec.size
    };

    if size > 0 {
        let mut pattern = pattern;
        pattern.resolve(size).map_err(|source| ConfigError::Pattern {
            job: name.to_string(),
            source,
        })?;
    }
    Ok(())
}

/// Every order name is defined, and every defined job is ordered
pub fn validate_order(order: &BarrierOrder, jobs: &[JobSpec]) -> Result<(), ConfigError> {
    let defined: HashSet<&str> = jobs.iter().map(|j| j.name.as_str()).collect();
    let ordered: HashSet<&str> = order.names().collect();

    if let Some(unknown) = order.names().find(|n| !defined.contains(n)) {
        return Err(ConfigError::Order(format!("unknown job '{}'", unknown)));
    }
    if let Some(missing) = jobs.iter().find(|j| !ordered.contains(j.name.as_str())) {
        return Err(ConfigError::Order(format!("job '{}' is not listed", missing.name)));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), ConfigError> {
    if name.trim().is_empty() {
        return Err(invalid(name, "name", "empty job name"));
    }
    if name.eq_ignore_ascii_case(BARRIER_TOKEN) {
        return Err(invalid(name, "name", "reserved word"));
    }
    if name.contains(',') {
        return Err(invalid(name, "name", "must not contain ','"));
    }
    Ok(())
}

/// Size of a pre-existing target used with `size = 0`
///
/// Anything other than a regular file (block devices) reports length 0 and
/// is sized at init instead.
fn existing_size(job: &str, path: &Path) -> Result<u64, ConfigError> {
    let meta = std::fs::metadata(path).map_err(|e| {
        invalid(
            job,
            "size",
            format!("0 requires an existing target, {}: {}", path.display(), e),
        )
    })?;
    if !meta.is_file() {
        return Ok(0);
    }
    if meta.len() == 0 {
        return Err(invalid(
            job,
            "size",
            format!("0 requires a non-empty target, {} is empty", path.display()),
        ));
    }
    Ok(meta.len())
}

fn size(job: &str, field: &'static str, value: Option<&SizeValue>) -> Result<Option<u64>, ConfigError> {
    value
        .map(|v| v.bytes().map_err(|e| invalid(job, field, e.to_string())))
        .transpose()
}

fn duration(
    job: &str,
    field: &'static str,
    value: Option<&DurationValue>,
) -> Result<Option<Duration>, ConfigError> {
    value
        .map(|v| v.duration().map_err(|e| invalid(job, field, e.to_string())))
        .transpose()
}

fn invalid(job: &str, field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidField {
        job: job.to_string(),
        field,
        reason: reason.into(),
    }
}
