//! Job execution engine
//!
//! A [`Job`] owns one target and drives it with the workload described by its
//! [`JobSpec`]. Lifecycle:
//!
//! ```text
//! init   open/create target, size it, fill if undersized, resolve sections
//! start  generator + iodepth workers until the runtime timer or a stop
//! fini   close the handle, remove the target if this job created it
//! ```
//!
//! The scheduler drives jobs through the [`JobRunner`] trait so local jobs and
//! remote-agent proxies share one lifecycle.
//!
//! # Example
//!
//! ```no_run
//! use iodrive::job::{Job, JobRunner, JobSpec};
//! use iodrive::stats::engine::{StatsConfig, StatsEngine};
//! use iodrive::util::log::LogContext;
//! use std::time::Duration;
//!
//! let engine = StatsEngine::start(StatsConfig::default(), LogContext::new("stats", false)).unwrap();
//! let mut spec = JobSpec::new("scratch", "/tmp/iodrive.dat");
//! spec.size = 64 * 1024 * 1024;
//! spec.access = "100:randrw|70:4k".to_string();
//! spec.runtime = Duration::from_secs(5);
//!
//! let mut job = Job::new(spec, engine.handle());
//! job.init().unwrap();
//! let report = job.start().unwrap();
//! job.fini().unwrap();
//! println!("{} ops", report.ops());
//! ```

pub mod target;
pub mod worker;

use crate::access::AccessPattern;
use crate::error::InitError;
use crate::pattern::{FillPattern, Lcg};
use crate::stats::engine::StatsHandle;
use crate::util::log::LogContext;
use anyhow::{anyhow, Context, Result};
use crossbeam::channel::{self, after, select};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use target::Target;
use worker::{run_generator, run_worker, WorkerContext, WorkerReport};

/// Queue slots per worker between the generator and the workers
pub const QUEUE_SLOTS_PER_WORKER: usize = 4;

/// Fully resolved, immutable description of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub target: PathBuf,
    /// Working extent in bytes; 0 uses the existing target size
    pub size: u64,
    pub iodepth: usize,
    /// Run time; zero runs until stopped
    pub runtime: Duration,
    pub fill: FillPattern,
    /// Access-pattern descriptor
    pub access: String,
    /// fsync after every N ops per worker; 0 never
    pub fsync_every: u64,
    pub start_delay: Duration,
    pub record_interval: Duration,
    pub verbose: bool,
    /// `host:port` of the agent running this job; `None` runs locally
    pub remote: Option<String>,
    pub bail_on_error: bool,
    /// Seed for content and offset generation; `None` derives one from the name
    /// and leaves offset selection non-deterministic
    pub seed: Option<u64>,
    /// Threads used by the fill phase
    pub fill_workers: usize,
}

impl JobSpec {
    /// Spec with defaults for everything but name and target
    pub fn new(name: &str, target: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            target: target.into(),
            size: 0,
            iodepth: 1,
            runtime: Duration::from_secs(10),
            fill: FillPattern::Zero,
            access: "100:randread:4k".to_string(),
            fsync_every: 0,
            start_delay: Duration::ZERO,
            record_interval: crate::stats::engine::DEFAULT_RECORD_INTERVAL,
            verbose: false,
            remote: None,
            bail_on_error: false,
            seed: None,
            fill_workers: target::default_fill_workers(),
        }
    }

    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }

    fn base_seed(&self) -> u64 {
        self.seed.unwrap_or_else(|| {
            let mut h = DefaultHasher::new();
            self.name.hash(&mut h);
            h.finish()
        })
    }
}

/// How a job's run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    /// Runtime elapsed or stopped on request
    Completed,
    /// A worker gave up under the bail-on-error policy
    Aborted,
}

/// Final counts for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub name: String,
    pub outcome: JobOutcome,
    pub workers: usize,
    pub elapsed_ns: u64,
    pub read_ops: u64,
    pub write_ops: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_errors: u64,
    pub write_errors: u64,
}

impl JobReport {
    pub fn from_workers(name: &str, workers: &[WorkerReport], elapsed: Duration) -> Self {
        let mut total = WorkerReport::default();
        for w in workers {
            total.merge(w);
        }
        Self {
            name: name.to_string(),
            outcome: if total.bailed {
                JobOutcome::Aborted
            } else {
                JobOutcome::Completed
            },
            workers: workers.len(),
            elapsed_ns: elapsed.as_nanos().min(u64::MAX as u128) as u64,
            read_ops: total.read_ops,
            write_ops: total.write_ops,
            read_bytes: total.read_bytes,
            write_bytes: total.write_bytes,
            read_errors: total.read_errors,
            write_errors: total.write_errors,
        }
    }

    pub fn ops(&self) -> u64 {
        self.read_ops + self.write_ops
    }

    pub fn errors(&self) -> u64 {
        self.read_errors + self.write_errors
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns)
    }
}

/// Request early termination of a running job
pub trait StopSignal: Send + Sync {
    fn stop(&self);
}

/// Shared keep-running flag
#[derive(Debug, Clone, Default)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn shared(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

impl StopSignal for RunFlag {
    fn stop(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Lifecycle the scheduler drives, for local and remote jobs alike
pub trait JobRunner: Send {
    fn name(&self) -> &str;

    /// Prepare the target; failure drops the job from its group
    fn init(&mut self) -> Result<(), InitError>;

    /// Run to completion and report; blocks
    fn start(&mut self) -> Result<JobReport>;

    /// Handle that ends a running `start` early
    fn stopper(&self) -> Arc<dyn StopSignal>;

    /// Release the target
    fn fini(&mut self) -> Result<()>;
}

/// Local job
pub struct Job {
    spec: JobSpec,
    job: Arc<str>,
    log: LogContext,
    stats: StatsHandle,
    slot: Option<usize>,
    target: Option<Target>,
    pattern: Option<AccessPattern>,
    /// Buffer-fill generator
    fill_gen: Lcg,
    /// Offset-selection seeding
    block_gen: Lcg,
    running: RunFlag,
    /// Set by an explicit stop so a later start does not run
    stopped: Arc<AtomicBool>,
}

impl Job {
    pub fn new(spec: JobSpec, stats: StatsHandle) -> Self {
        let seed = spec.base_seed();
        Self {
            job: Arc::from(spec.name.as_str()),
            log: LogContext::new(&spec.name, spec.verbose),
            stats,
            slot: None,
            target: None,
            pattern: None,
            fill_gen: Lcg::new(seed),
            block_gen: Lcg::new(seed.rotate_left(32) ^ 0x5DEE_CE66),
            running: RunFlag::new(),
            stopped: Arc::new(AtomicBool::new(false)),
            spec,
        }
    }

    /// Show this job in the activity strip at `slot`
    pub fn with_activity_slot(mut self, slot: usize) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    /// Working extent, known after `init`
    pub fn size(&self) -> Option<u64> {
        self.target.as_ref().map(Target::size)
    }

    /// Whether `init` ran a fill phase
    pub fn filled(&self) -> bool {
        self.target.as_ref().map(Target::filled).unwrap_or(false)
    }

    pub fn pattern(&self) -> Option<&AccessPattern> {
        self.pattern.as_ref()
    }

    /// One pre-filled write buffer per section
    fn write_buffers(&mut self, pattern: &AccessPattern) -> Vec<Vec<u8>> {
        pattern
            .sections()
            .iter()
            .map(|s| self.spec.fill.block(s.block_size as usize, &mut self.fill_gen))
            .collect()
    }

    /// Wait out the start delay unless stopped first
    fn delay(&self) {
        let deadline = Instant::now() + self.spec.start_delay;
        while !self.stopped.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(worker::POLL_INTERVAL));
        }
    }
}

impl JobRunner for Job {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn init(&mut self) -> Result<(), InitError> {
        let mut target = Target::open(&self.spec.target, self.spec.size)?;

        if target.needs_fill() {
            let seed = self.fill_gen.value(u32::MAX as u64);
            if let Err(e) = target.fill(self.spec.fill, seed, self.spec.fill_workers, &self.log) {
                let _ = target.close();
                return Err(e);
            }
        }

        let mut pattern = match AccessPattern::parse_resolved(&self.spec.access, target.size()) {
            Ok(p) => p,
            Err(e) => {
                let _ = target.close();
                return Err(e.into());
            }
        };
        if self.spec.seed.is_some() {
            pattern = pattern.with_seed(self.block_gen.value(u32::MAX as u64));
        }

        if let Some(slot) = self.slot {
            self.stats.set_histogram_slot(&self.spec.name, slot, target.size());
        }

        self.log.detail(format_args!(
            "initialized {} ({} bytes, {} sections{})",
            target.path().display(),
            target.size(),
            pattern.sections().len(),
            if target.filled() { ", filled" } else { "" }
        ));

        self.target = Some(target);
        self.pattern = Some(pattern);
        Ok(())
    }

    fn start(&mut self) -> Result<JobReport> {
        let file = self
            .target
            .as_ref()
            .map(|t| Arc::clone(t.file()))
            .ok_or_else(|| anyhow!("job '{}' started before init", self.spec.name))?;
        let pattern = self
            .pattern
            .take()
            .ok_or_else(|| anyhow!("job '{}' has no access pattern", self.spec.name))?;

        self.delay();
        if self.stopped.load(Ordering::Relaxed) {
            self.pattern = Some(pattern);
            return Ok(JobReport::from_workers(&self.spec.name, &[], Duration::ZERO));
        }

        let iodepth = self.spec.iodepth.max(1);
        let buffers = Arc::new(self.write_buffers(&pattern));
        let (queue_tx, queue_rx) = channel::bounded(iodepth * QUEUE_SLOTS_PER_WORKER);
        let (done_tx, done_rx) = channel::bounded::<WorkerReport>(iodepth);

        self.running.set();
        if self.stopped.load(Ordering::Relaxed) {
            self.running.stop();
        }
        let started = Instant::now();

        let generator = {
            let running = self.running.shared();
            let log = self.log.child("gen");
            std::thread::Builder::new()
                .name(format!("{}-gen", self.spec.name))
                .spawn(move || run_generator(pattern, queue_tx, running, log))
                .context("Failed to spawn generator thread")?
        };

        let mut workers = Vec::with_capacity(iodepth);
        for id in 0..iodepth {
            let ctx = WorkerContext {
                id,
                job: Arc::clone(&self.job),
                file: Arc::clone(&file),
                buffers: Arc::clone(&buffers),
                queue: queue_rx.clone(),
                running: self.running.shared(),
                stats: self.stats.clone(),
                slot: self.slot,
                fsync_every: self.spec.fsync_every,
                bail_on_error: self.spec.bail_on_error,
                log: self.log.clone(),
            };
            let done = done_tx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("{}-io{}", self.spec.name, id))
                .spawn(move || {
                    let _ = done.send(run_worker(ctx));
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    self.running.stop();
                    return Err(e).context("Failed to spawn I/O worker");
                }
            }
        }
        drop(queue_rx);
        drop(done_tx);

        // single-shot runtime timer
        let (timer_cancel_tx, timer_cancel_rx) = channel::bounded::<()>(0);
        let timer = if self.spec.runtime > Duration::ZERO {
            let runtime = self.spec.runtime;
            let running = self.running.clone();
            Some(std::thread::spawn(move || {
                select! {
                    recv(after(runtime)) -> _ => running.stop(),
                    recv(timer_cancel_rx) -> _ => {}
                }
            }))
        } else {
            None
        };

        let mut reports = Vec::with_capacity(iodepth);
        while reports.len() < iodepth {
            match done_rx.recv() {
                Ok(report) => reports.push(report),
                Err(_) => break,
            }
        }
        let elapsed = started.elapsed();

        self.running.stop();
        drop(timer_cancel_tx);
        if let Some(timer) = timer {
            let _ = timer.join();
        }
        for handle in workers {
            if handle.join().is_err() {
                tracing::error!(job = %self.job, "I/O worker panicked");
            }
        }
        let pattern = generator
            .join()
            .map_err(|_| anyhow!("generator thread panicked"))?;
        self.pattern = Some(pattern);

        if reports.len() < iodepth {
            tracing::warn!(
                job = %self.job,
                "only {} of {} workers reported",
                reports.len(),
                iodepth
            );
        }

        let report = JobReport::from_workers(&self.spec.name, &reports, elapsed);
        self.log.detail(format_args!(
            "finished: {} ops, {} errors in {:.2}s",
            report.ops(),
            report.errors(),
            elapsed.as_secs_f64()
        ));
        Ok(report)
    }

    fn stopper(&self) -> Arc<dyn StopSignal> {
        Arc::new(JobStop {
            running: self.running.clone(),
            stopped: Arc::clone(&self.stopped),
        })
    }

    fn fini(&mut self) -> Result<()> {
        self.pattern = None;
        if let Some(target) = self.target.take() {
            let path = target.path().to_path_buf();
            let created = target.created();
            target
                .close()
                .with_context(|| format!("Failed to close {}", path.display()))?;
            if created {
                self.log
                    .detail(format_args!("removed {}", path.display()));
            }
        }
        Ok(())
    }
}

/// Stop for a local job: also cancels a pending start delay
struct JobStop {
    running: RunFlag,
    stopped: Arc<AtomicBool>,
}

impl StopSignal for JobStop {
    fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        self.running.stop();
    }
}
