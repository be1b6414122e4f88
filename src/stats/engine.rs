//! Statistics engine
//!
//! A single owner thread applies every stats record. Job workers, the
//! scheduler and remote-job proxies hold cloned [`StatsHandle`]s and only
//! ever send messages; counters, histograms, the activity strip and the
//! record file are touched by the owner alone, so nothing here takes a lock.
//!
//! Records from one sender are applied in the order sent. [`StatsHandle::flush`]
//! returns only after every record the caller sent before it has been applied.
//!
//! # Example
//!
//! ```
//! use iodrive::stats::engine::{StatsConfig, StatsEngine};
//! use iodrive::util::log::LogContext;
//! use std::time::Duration;
//!
//! let engine = StatsEngine::start(StatsConfig::default(), LogContext::new("stats", false)).unwrap();
//! let stats = engine.handle();
//! let job = std::sync::Arc::from("job1");
//! stats.read(&job, Duration::from_micros(80), 4096, 0, None);
//! stats.flush().unwrap();
//!
//! let snap = engine.stop().unwrap();
//! assert_eq!(snap.global.read.ops, 1);
//! ```

use super::activity::ActivityMap;
use super::histogram::HistogramMode;
use super::record::RecordWriter;
use super::WorkerStat;
use crate::access::IoDirection;
use crate::output::text::render_display;
use crate::util::log::LogContext;
use anyhow::{anyhow, Context, Result};
use chrono::Local;
use crossbeam::channel::{self, never, select, tick, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::warn;

/// Inbound queue depth; workers block once the owner falls this far behind
pub const STATS_QUEUE_DEPTH: usize = 64 * 1024;

/// Default record interval
pub const DEFAULT_RECORD_INTERVAL: Duration = Duration::from_secs(1);

/// Default bar-chart width when the terminal size is unknown
pub const DEFAULT_DISPLAY_WIDTH: usize = 80;

#[derive(Debug, Clone)]
pub struct StatsConfig {
    pub histogram: HistogramMode,
    /// Interval CSV output, if any
    pub record_file: Option<PathBuf>,
    pub record_interval: Duration,
    /// Width for the Display bar chart
    pub display_width: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            histogram: HistogramMode::Log2,
            record_file: None,
            record_interval: DEFAULT_RECORD_INTERVAL,
            display_width: DEFAULT_DISPLAY_WIDTH,
        }
    }
}

/// One completed op
#[derive(Debug, Clone)]
pub struct OpRecord {
    pub job: Arc<str>,
    pub duration: Duration,
    pub bytes: u64,
    pub offset: u64,
    /// Activity-strip slot registered for the job
    pub slot: Option<usize>,
}

/// Messages understood by the owner
#[derive(Debug)]
pub enum StatsRecord {
    Read(OpRecord),
    Write(OpRecord),
    /// A failed op (counted, not timed)
    Error { job: Arc<str>, direction: IoDirection },
    /// Reset all counters; written to the record file as a barrier marker
    Clear,
    /// Render the Display report
    Display(Sender<String>),
    /// Bind an activity-strip slot to a job's address space
    SetHistogramSlot {
        job: Arc<str>,
        slot: usize,
        total_size: u64,
    },
    /// Cumulative counters pushed by an agent; replaces that job's entry
    RemoteSnapshot { job: Arc<str>, stat: WorkerStat },
    Snapshot(Sender<StatsSnapshot>),
    Flush(Sender<()>),
    Stop(Sender<StatsSnapshot>),
}

/// Point-in-time copy of everything the owner tracks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Merge of every job since the last clear
    pub global: WorkerStat,
    pub jobs: BTreeMap<String, WorkerStat>,
    /// Rendered activity strip
    pub activity: String,
}

impl StatsSnapshot {
    pub fn job(&self, name: &str) -> Option<&WorkerStat> {
        self.jobs.get(name)
    }
}

/// Cloneable sender side
#[derive(Debug, Clone)]
pub struct StatsHandle {
    tx: Sender<StatsRecord>,
}

impl StatsHandle {
    /// Send a record; a stopped engine drops it
    #[inline]
    pub fn send(&self, record: StatsRecord) {
        let _ = self.tx.send(record);
    }

    #[inline]
    pub fn read(&self, job: &Arc<str>, duration: Duration, bytes: u64, offset: u64, slot: Option<usize>) {
        self.send(StatsRecord::Read(OpRecord {
            job: Arc::clone(job),
            duration,
            bytes,
            offset,
            slot,
        }));
    }

    #[inline]
    pub fn write(&self, job: &Arc<str>, duration: Duration, bytes: u64, offset: u64, slot: Option<usize>) {
        self.send(StatsRecord::Write(OpRecord {
            job: Arc::clone(job),
            duration,
            bytes,
            offset,
            slot,
        }));
    }

    pub fn error(&self, job: &Arc<str>, direction: IoDirection) {
        self.send(StatsRecord::Error {
            job: Arc::clone(job),
            direction,
        });
    }

    pub fn clear(&self) {
        self.send(StatsRecord::Clear);
    }

    pub fn set_histogram_slot(&self, job: &str, slot: usize, total_size: u64) {
        self.send(StatsRecord::SetHistogramSlot {
            job: Arc::from(job),
            slot,
            total_size,
        });
    }

    pub fn remote_snapshot(&self, job: &str, stat: WorkerStat) {
        self.send(StatsRecord::RemoteSnapshot {
            job: Arc::from(job),
            stat,
        });
    }

    /// Block until every earlier record from this handle has been applied
    pub fn flush(&self) -> Result<()> {
        self.request(StatsRecord::Flush)
    }

    pub fn snapshot(&self) -> Result<StatsSnapshot> {
        self.request(StatsRecord::Snapshot)
    }

    pub fn display(&self) -> Result<String> {
        self.request(StatsRecord::Display)
    }

    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> StatsRecord) -> Result<T> {
        let (reply_tx, reply_rx) = channel::bounded(1);
        self.tx
            .send(make(reply_tx))
            .map_err(|_| anyhow!("stats engine is not running"))?;
        reply_rx
            .recv()
            .map_err(|_| anyhow!("stats engine exited before replying"))
    }
}

/// Owner thread plus its inbound handle
pub struct StatsEngine {
    handle: StatsHandle,
    thread: Option<JoinHandle<()>>,
}

impl StatsEngine {
    /// Spawn the owner thread
    ///
    /// Opens the record file up front so a bad path fails before any job runs.
    pub fn start(config: StatsConfig, log: LogContext) -> Result<Self> {
        config
            .histogram
            .validate()
            .map_err(|e| anyhow!("invalid histogram layout: {}", e))?;

        let record = match &config.record_file {
            Some(path) => Some(
                RecordWriter::create(path)
                    .with_context(|| format!("Failed to create record file {}", path.display()))?,
            ),
            None => None,
        };

        let (tx, rx) = channel::bounded(STATS_QUEUE_DEPTH);
        let mut owner = Owner {
            mode: config.histogram,
            jobs: BTreeMap::new(),
            since: Instant::now(),
            activity: ActivityMap::new(),
            record,
            width: config.display_width,
            log,
        };
        let interval = config.record_interval;

        let thread = std::thread::Builder::new()
            .name("stats".to_string())
            .spawn(move || owner.run(rx, interval))
            .context("Failed to spawn stats thread")?;

        Ok(Self {
            handle: StatsHandle { tx },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> StatsHandle {
        self.handle.clone()
    }

    /// Stop the owner and return the final snapshot
    pub fn stop(mut self) -> Result<StatsSnapshot> {
        let snapshot = self.handle.request(StatsRecord::Stop)?;
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| anyhow!("stats thread panicked"))?;
        }
        Ok(snapshot)
    }
}

impl Drop for StatsEngine {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let (tx, _rx) = channel::bounded(1);
            self.handle.send(StatsRecord::Stop(tx));
            let _ = thread.join();
        }
    }
}

struct Owner {
    mode: HistogramMode,
    jobs: BTreeMap<Arc<str>, WorkerStat>,
    since: Instant,
    activity: ActivityMap,
    record: Option<RecordWriter<BufWriter<File>>>,
    width: usize,
    log: LogContext,
}

impl Owner {
    fn run(&mut self, rx: Receiver<StatsRecord>, interval: Duration) {
        let ticker = if self.record.is_some() {
            tick(interval)
        } else {
            never()
        };

        loop {
            select! {
                recv(rx) -> msg => match msg {
                    Ok(record) => {
                        if !self.apply(record) {
                            break;
                        }
                    }
                    // every handle dropped
                    Err(_) => break,
                },
                recv(ticker) -> _ => self.write_interval(),
            }
        }
        self.log.detail(format_args!("stats owner exiting"));
    }

    /// Apply one record; false once a stop has been handled
    fn apply(&mut self, record: StatsRecord) -> bool {
        match record {
            StatsRecord::Read(op) => {
                self.job_mut(&op.job).record_read(op.bytes, op.duration);
                if let Some(slot) = op.slot {
                    self.activity.mark(slot, op.offset, IoDirection::Read, op.duration);
                }
            }
            StatsRecord::Write(op) => {
                self.job_mut(&op.job).record_write(op.bytes, op.duration);
                if let Some(slot) = op.slot {
                    self.activity.mark(slot, op.offset, IoDirection::Write, op.duration);
                }
            }
            StatsRecord::Error { job, direction } => {
                let stat = self.job_mut(&job);
                match direction {
                    IoDirection::Write => stat.write.errors += 1,
                    _ => stat.read.errors += 1,
                }
            }
            StatsRecord::Clear => {
                self.jobs.clear();
                self.activity.clear();
                self.since = Instant::now();
                if let Some(record) = self.record.as_mut() {
                    if let Err(e) = record.barrier() {
                        warn!("record file write failed, disabling: {}", e);
                        self.record = None;
                    }
                }
            }
            StatsRecord::Display(reply) => {
                let text = render_display(&self.snapshot(), self.width);
                let _ = reply.send(text);
            }
            StatsRecord::SetHistogramSlot { job, slot, total_size } => {
                self.activity.register(slot, &job, total_size);
            }
            StatsRecord::RemoteSnapshot { job, stat } => {
                if stat.histogram.mode() != self.mode {
                    warn!(job = %job, "remote histogram layout differs, ignoring its buckets");
                    let mut fixed = stat;
                    fixed.histogram = super::histogram::DistroGraph::new(self.mode);
                    self.jobs.insert(job, fixed);
                } else {
                    self.jobs.insert(job, stat);
                }
            }
            StatsRecord::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            StatsRecord::Flush(reply) => {
                self.flush_record();
                let _ = reply.send(());
            }
            StatsRecord::Stop(reply) => {
                self.write_interval();
                self.flush_record();
                let _ = reply.send(self.snapshot());
                return false;
            }
        }
        true
    }

    fn job_mut(&mut self, job: &Arc<str>) -> &mut WorkerStat {
        let mode = self.mode;
        self.jobs
            .entry(Arc::clone(job))
            .or_insert_with(|| WorkerStat::new(mode))
    }

    fn snapshot(&self) -> StatsSnapshot {
        let elapsed = self.since.elapsed();
        let mut global = WorkerStat::new(self.mode);
        let mut jobs = BTreeMap::new();

        for (name, stat) in &self.jobs {
            let mut stat = stat.clone();
            // local counters cover the time since the last clear
            if stat.elapsed_ns == 0 {
                stat.set_elapsed(elapsed);
            }
            // layouts were normalized on insert
            let _ = global.merge(&stat);
            jobs.insert(name.to_string(), stat);
        }
        global.set_elapsed(elapsed);

        StatsSnapshot {
            global,
            jobs,
            activity: self.activity.render(),
        }
    }

    fn write_interval(&mut self) {
        let Some(record) = self.record.as_mut() else {
            return;
        };
        let elapsed = self.since.elapsed();
        let mut global = WorkerStat::new(self.mode);
        for stat in self.jobs.values() {
            let _ = global.merge(stat);
        }
        global.set_elapsed(elapsed);

        if let Err(e) = record.interval(Local::now().time(), &global) {
            warn!("record file write failed, disabling: {}", e);
            self.record = None;
        }
    }

    fn flush_record(&mut self) {
        if let Some(record) = self.record.as_mut() {
            if let Err(e) = record.flush() {
                warn!("record file flush failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::histogram::DistroGraph;

    fn engine() -> StatsEngine {
        StatsEngine::start(StatsConfig::default(), LogContext::new("stats", false)).unwrap()
    }

    #[test]
    fn test_read_counters() {
        let engine = engine();
        let stats = engine.handle();
        let job: Arc<str> = Arc::from("reader");

        let n = 1000u64;
        let size = 4096u64;
        let d = Duration::from_micros(250);
        for i in 0..n {
            stats.read(&job, d, size, i * size, None);
        }
        stats.flush().unwrap();

        let snap = stats.snapshot().unwrap();
        let s = snap.job("reader").unwrap();
        assert_eq!(s.read.ops, n);
        assert_eq!(s.read.bytes, n * size);
        assert_eq!(s.read.avg_latency(), Some(d));
        assert_eq!(s.write.ops, 0);
        assert_eq!(snap.global.read.ops, n);

        engine.stop().unwrap();
    }

    #[test]
    fn test_flush_orders_concurrent_senders() {
        let engine = engine();
        let job: Arc<str> = Arc::from("w");

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let stats = engine.handle();
                let job = Arc::clone(&job);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        stats.write(&job, Duration::from_micros(5), 512, 0, None);
                    }
                    stats.flush().unwrap();
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let snap = engine.stop().unwrap();
        assert_eq!(snap.global.write.ops, 2000);
        assert_eq!(snap.global.histogram.total(), 2000);
    }

    #[test]
    fn test_clear_resets() {
        let engine = engine();
        let stats = engine.handle();
        let job: Arc<str> = Arc::from("j");
        stats.read(&job, Duration::from_micros(1), 512, 0, None);
        stats.error(&job, IoDirection::Write);
        stats.clear();
        stats.read(&job, Duration::from_micros(1), 1024, 0, None);

        let snap = stats.snapshot().unwrap();
        assert_eq!(snap.global.read.ops, 1);
        assert_eq!(snap.global.read.bytes, 1024);
        assert_eq!(snap.global.total_errors(), 0);
        engine.stop().unwrap();
    }

    #[test]
    fn test_error_counts() {
        let engine = engine();
        let stats = engine.handle();
        let job: Arc<str> = Arc::from("e");
        stats.error(&job, IoDirection::Read);
        stats.error(&job, IoDirection::Write);
        stats.error(&job, IoDirection::Write);

        let snap = engine.stop().unwrap();
        assert_eq!(snap.global.read.errors, 1);
        assert_eq!(snap.global.write.errors, 2);
    }

    #[test]
    fn test_activity_slot() {
        let engine = engine();
        let stats = engine.handle();
        let job: Arc<str> = Arc::from("act");
        stats.set_histogram_slot("act", 0, 64 * 512);
        stats.write(&job, Duration::from_micros(10), 512, 0, Some(0));
        stats.read(&job, Duration::from_millis(200), 512, 512, Some(0));

        let snap = engine.stop().unwrap();
        assert!(snap.activity.starts_with("act [w0"));
    }

    #[test]
    fn test_remote_snapshot_replaces() {
        let engine = engine();
        let stats = engine.handle();

        let mut remote = WorkerStat::default();
        remote.record_read(4096, Duration::from_micros(10));
        remote.set_elapsed(Duration::from_secs(1));
        stats.remote_snapshot("far", remote.clone());

        remote.record_read(4096, Duration::from_micros(10));
        stats.remote_snapshot("far", remote);

        let snap = engine.stop().unwrap();
        assert_eq!(snap.job("far").unwrap().read.ops, 2);
        assert_eq!(snap.job("far").unwrap().elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn test_remote_layout_mismatch_keeps_counters() {
        let engine = engine();
        let stats = engine.handle();
        let mut remote = WorkerStat::new(HistogramMode::Linear { min: 0, max: 100, interval: 10 });
        remote.record_write(512, Duration::from_micros(10));
        stats.remote_snapshot("odd", remote);

        let snap = engine.stop().unwrap();
        let s = snap.job("odd").unwrap();
        assert_eq!(s.write.ops, 1);
        assert_eq!(s.histogram, DistroGraph::log2());
    }

    #[test]
    fn test_display_renders() {
        let engine = engine();
        let stats = engine.handle();
        let job: Arc<str> = Arc::from("d");
        stats.read(&job, Duration::from_micros(100), 4096, 0, None);
        let text = stats.display().unwrap();
        assert!(text.contains("IOPS"));
        engine.stop().unwrap();
    }

    #[test]
    fn test_record_file_barrier() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.csv");
        let engine = StatsEngine::start(
            StatsConfig {
                record_file: Some(path.clone()),
                record_interval: Duration::from_secs(3600),
                ..StatsConfig::default()
            },
            LogContext::new("stats", false),
        )
        .unwrap();
        let stats = engine.handle();
        stats.clear();
        engine.stop().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], crate::stats::record::BARRIER_MARKER);
        // final interval written on stop
        assert!(lines[1].ends_with(", 0, 0, 0"));
    }

    #[test]
    fn test_handle_after_stop() {
        let engine = engine();
        let stats = engine.handle();
        engine.stop().unwrap();
        assert!(stats.flush().is_err());
    }
}
