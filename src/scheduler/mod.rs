//! Barrier scheduler
//!
//! Runs an ordered list of job groups. Jobs inside a group run
//! concurrently; a group finishes every phase before the next one starts:
//!
//! ```text
//! admit -> init (all) -> clear stats -> start (all) -> flush + snapshot -> fini (all)
//! ```
//!
//! Init failures remove the job from its group and the progress table
//! without touching its siblings. A group in which no job produced a report
//! is a hard stop: the remaining groups are not run.
//!
//! # Example
//!
//! ```no_run
//! use iodrive::job::{Job, JobRunner, JobSpec};
//! use iodrive::scheduler::{BarrierOrder, Scheduler};
//! use iodrive::stats::engine::{StatsConfig, StatsEngine};
//! use iodrive::util::log::LogContext;
//!
//! let engine = StatsEngine::start(StatsConfig::default(), LogContext::new("stats", false)).unwrap();
//! let stats = engine.handle();
//! let order = BarrierOrder::parse("fill,barrier,read1,read2").unwrap();
//!
//! let factory_stats = stats.clone();
//! let mut scheduler = Scheduler::new(order, stats, move |name: &str| {
//!     let spec = JobSpec::new(name, format!("/tmp/{}.dat", name));
//!     Ok(Box::new(Job::new(spec, factory_stats.clone())) as Box<dyn JobRunner>)
//! });
//! let summary = scheduler.run().unwrap();
//! println!("{} groups", summary.groups.len());
//! ```

pub mod progress;

use crate::error::ConfigError;
use crate::job::{JobOutcome, JobReport, JobRunner, StopSignal};
use crate::output::text::print_group_results;
use crate::stats::engine::{StatsHandle, StatsSnapshot, DEFAULT_DISPLAY_WIDTH};
use anyhow::Result;
use chrono::{DateTime, Local};
use crossbeam::channel::{self, never, select, tick, Receiver};
use progress::{JobState, Progress};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Order token separating groups
pub const BARRIER_TOKEN: &str = "barrier";

/// Ordered job-name groups
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BarrierOrder {
    groups: Vec<Vec<String>>,
}

impl BarrierOrder {
    /// Parse `"a,b,barrier,c"`
    ///
    /// Names are trimmed; empty entries and empty groups (leading, trailing
    /// or repeated barriers) are ignored. A name listed twice is an error.
    pub fn parse(order: &str) -> Result<Self, ConfigError> {
        let mut groups = Vec::new();
        let mut current = Vec::new();
        let mut seen = HashSet::new();

        for name in order.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if name.eq_ignore_ascii_case(BARRIER_TOKEN) {
                if !current.is_empty() {
                    groups.push(std::mem::take(&mut current));
                }
                continue;
            }
            if !seen.insert(name.to_string()) {
                return Err(ConfigError::Order(format!("job '{}' listed more than once", name)));
            }
            current.push(name.to_string());
        }
        if !current.is_empty() {
            groups.push(current);
        }
        if groups.is_empty() {
            return Err(ConfigError::Order("no jobs listed".to_string()));
        }
        Ok(Self { groups })
    }

    /// Every job in one group
    pub fn single_group<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let group: Vec<String> = names.into_iter().map(Into::into).collect();
        Self {
            groups: if group.is_empty() { Vec::new() } else { vec![group] },
        }
    }

    pub fn groups(&self) -> &[Vec<String>] {
        &self.groups
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().flatten().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Outcome of one barrier group
#[derive(Debug, Clone)]
pub struct GroupResult {
    pub index: usize,
    /// Names as listed in the order
    pub jobs: Vec<String>,
    /// When the start phase began
    pub started_at: DateTime<Local>,
    /// Start phase wall time
    pub duration: Duration,
    /// Reports of jobs that ran, in listing order
    pub reports: Vec<JobReport>,
    /// Jobs dropped at admission or init
    pub failed: Vec<String>,
    pub snapshot: StatsSnapshot,
}

impl GroupResult {
    pub fn succeeded(&self) -> usize {
        self.reports.len()
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub groups: Vec<GroupResult>,
    /// Group with zero successes that ended the run
    pub hard_stop: Option<usize>,
    /// Run ended by an explicit stop
    pub interrupted: bool,
    /// Jobs dropped at admission or init up to and including the first
    /// group that produced a report
    pub init_failures: usize,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.hard_stop.is_none() && !self.groups.is_empty()
    }

    /// A job failed to come up before anything had run
    pub fn failed_before_first_run(&self) -> bool {
        self.init_failures > 0
    }
}

/// Stops every running job and prevents further groups from starting
#[derive(Clone, Default)]
pub struct StopAll {
    stopped: Arc<AtomicBool>,
    running: Arc<Mutex<Vec<Arc<dyn StopSignal>>>>,
}

impl StopAll {
    pub fn stop_all(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Ok(running) = self.running.lock() {
            for stopper in running.iter() {
                stopper.stop();
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn register(&self, stoppers: Vec<Arc<dyn StopSignal>>) {
        if let Ok(mut running) = self.running.lock() {
            *running = stoppers;
        }
        // a stop that raced registration still reaches the new group
        if self.is_stopped() {
            self.stop_all();
        }
    }

    fn clear(&self) {
        if let Ok(mut running) = self.running.lock() {
            running.clear();
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Print Display and the progress table this often while a group runs
    pub display_interval: Option<Duration>,
    pub display_width: usize,
    /// Suppress stdout progress and results
    pub quiet: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            display_interval: None,
            display_width: DEFAULT_DISPLAY_WIDTH,
            quiet: false,
        }
    }
}

/// A job admitted into the current group
struct Slot {
    name: String,
    runner: Box<dyn JobRunner>,
}

pub struct Scheduler<F> {
    order: BarrierOrder,
    stats: StatsHandle,
    factory: F,
    config: SchedulerConfig,
    progress: Progress,
    stop: StopAll,
}

impl<F> Scheduler<F>
where
    F: Fn(&str) -> Result<Box<dyn JobRunner>>,
{
    /// `factory` builds the runner for a job name when its group is admitted
    pub fn new(order: BarrierOrder, stats: StatsHandle, factory: F) -> Self {
        Self {
            order,
            stats,
            factory,
            config: SchedulerConfig::default(),
            progress: Progress::new(),
            stop: StopAll::default(),
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn stop_handle(&self) -> StopAll {
        self.stop.clone()
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Run every group in order
    pub fn run(&mut self) -> Result<RunSummary> {
        let mut summary = RunSummary {
            groups: Vec::new(),
            hard_stop: None,
            interrupted: false,
            init_failures: 0,
        };
        let mut any_ran = false;

        let groups = self.order.groups().to_vec();
        for (index, names) in groups.iter().enumerate() {
            if self.stop.is_stopped() {
                summary.interrupted = true;
                info!("stop requested, skipping {} remaining group(s)", groups.len() - index);
                break;
            }

            let result = self.run_group(index, names)?;
            let succeeded = result.succeeded();
            if !any_ran {
                summary.init_failures += result.failed.len();
                any_ran = succeeded > 0;
            }
            if !self.config.quiet {
                print_group_results(index, &result.reports, &result.snapshot, self.config.display_width);
            }
            summary.groups.push(result);

            if succeeded == 0 {
                error!(group = index + 1, "no job in group produced results, aborting run");
                summary.hard_stop = Some(index);
                break;
            }
        }

        summary.interrupted |= self.stop.is_stopped();
        Ok(summary)
    }

    fn run_group(&mut self, index: usize, names: &[String]) -> Result<GroupResult> {
        info!(group = index + 1, jobs = names.len(), "starting group");
        let mut failed = Vec::new();

        // admit
        let mut slots = Vec::with_capacity(names.len());
        for name in names {
            self.progress.admit(name, index);
            match (self.factory)(name) {
                Ok(runner) => slots.push(Slot {
                    name: name.clone(),
                    runner,
                }),
                Err(e) => {
                    warn!(job = %name, "admission failed: {:#}", e);
                    self.progress.fail(name);
                    failed.push(name.clone());
                }
            }
        }
        self.show_progress();

        // init
        for slot in &slots {
            self.progress.advance(&slot.name, JobState::Preparing);
        }
        let inits = self.run_phase(&mut slots, |job| job.init(), false);
        let mut ready = Vec::with_capacity(slots.len());
        for (slot, result) in slots.into_iter().zip(inits) {
            match result {
                Some(Ok(())) => {
                    self.progress.advance(&slot.name, JobState::Ready);
                    ready.push(slot);
                }
                Some(Err(e)) => {
                    warn!(job = %slot.name, "init failed: {}", e);
                    self.progress.fail(&slot.name);
                    failed.push(slot.name);
                }
                None => {
                    warn!(job = %slot.name, "init panicked");
                    self.progress.fail(&slot.name);
                    failed.push(slot.name);
                }
            }
        }
        let mut slots = ready;
        self.show_progress();

        // start
        self.stats.clear();
        self.stop
            .register(slots.iter().map(|s| s.runner.stopper()).collect());
        for slot in &slots {
            self.progress.advance(&slot.name, JobState::Running);
        }
        let started_at = Local::now();
        let started = Instant::now();
        let starts = self.run_phase(&mut slots, |job| job.start(), true);
        let duration = started.elapsed();
        self.stop.clear();

        let mut reports = Vec::with_capacity(slots.len());
        for (slot, result) in slots.iter().zip(starts) {
            match result {
                Some(Ok(report)) => {
                    let state = match report.outcome {
                        JobOutcome::Completed => JobState::Completed,
                        JobOutcome::Aborted => JobState::Aborted,
                    };
                    self.progress.advance(&slot.name, state);
                    self.progress.set_ops(&slot.name, report.ops());
                    reports.push(report);
                }
                Some(Err(e)) => {
                    warn!(job = %slot.name, "run failed: {:#}", e);
                    self.progress.advance(&slot.name, JobState::Aborted);
                }
                None => {
                    warn!(job = %slot.name, "run panicked");
                    self.progress.advance(&slot.name, JobState::Aborted);
                }
            }
        }

        self.stats.flush()?;
        let snapshot = self.stats.snapshot()?;
        for (name, stat) in &snapshot.jobs {
            if self.progress.get(name).map(|e| e.ops == 0).unwrap_or(false) {
                self.progress.set_ops(name, stat.total_ops());
            }
        }

        // fini
        let finis = self.run_phase(&mut slots, |job| job.fini(), false);
        for (slot, result) in slots.iter().zip(finis) {
            if let Some(Err(e)) = result {
                warn!(job = %slot.name, "fini failed: {:#}", e);
            }
            self.progress.advance(&slot.name, JobState::Finalized);
        }
        self.show_progress();

        Ok(GroupResult {
            index,
            jobs: names.to_vec(),
            started_at,
            duration,
            reports,
            failed,
            snapshot,
        })
    }

    /// Run `op` on every slot concurrently, one thread per job
    ///
    /// Blocks on a completion channel until every job reported; results come
    /// back in slot order, `None` for a job whose thread panicked.
    fn run_phase<T, Op>(&mut self, slots: &mut [Slot], op: Op, live: bool) -> Vec<Option<T>>
    where
        T: Send,
        Op: Fn(&mut dyn JobRunner) -> T + Sync,
    {
        let mut results: Vec<Option<T>> = (0..slots.len()).map(|_| None).collect();
        if slots.is_empty() {
            return results;
        }

        let (done_tx, done_rx) = channel::bounded(slots.len());
        let ticker: Receiver<Instant> = match (live, self.config.display_interval) {
            (true, Some(every)) if !self.config.quiet => tick(every),
            _ => never(),
        };
        let stats = &self.stats;
        let progress = &self.progress;

        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(slots.len());
            for (i, slot) in slots.iter_mut().enumerate() {
                let done = done_tx.clone();
                let op = &op;
                let runner = slot.runner.as_mut();
                let spawned = std::thread::Builder::new()
                    .name(format!("job-{}", slot.name))
                    .spawn_scoped(scope, move || {
                        let out = op(runner);
                        let _ = done.send((i, out));
                    });
                match spawned {
                    Ok(h) => handles.push(h),
                    Err(e) => error!(job = %slot.name, "failed to spawn job thread: {}", e),
                }
            }
            drop(done_tx);

            loop {
                select! {
                    recv(done_rx) -> msg => match msg {
                        Ok((i, out)) => results[i] = Some(out),
                        Err(_) => break,
                    },
                    recv(ticker) -> _ => {
                        if let Ok(text) = stats.display() {
                            println!("{}", text);
                        }
                        print!("{}", progress.render());
                    }
                }
            }

            for h in handles {
                let _ = h.join();
            }
        });
        results
    }

    fn show_progress(&self) {
        if !self.config.quiet && !self.progress.is_empty() {
            print!("{}", self.progress.render());
        }
    }
}
