//! Generator and I/O worker loops
//!
//! One generator thread turns the job's access pattern into requests on a
//! bounded queue. `iodepth` worker threads drain the queue, perform the I/O
//! and emit one stats record per op. Both sides watch the shared running
//! flag between iterations; in-flight I/O always completes.
//!
//! When the generator exits it drops the queue sender. Workers treat the
//! disconnected queue as the terminal sentinel, report their partial counts
//! and exit.

use crate::access::{AccessPattern, AccessRequest, IoDirection};
use crate::stats::engine::StatsHandle;
use crate::util::log::LogContext;
use crossbeam::channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// How long a blocked queue operation waits before re-checking the flag
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Per-worker counts, merged into the job report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub read_ops: u64,
    pub write_ops: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_errors: u64,
    pub write_errors: u64,
    pub fsyncs: u64,
    /// Worker stopped on an error under the bail-on-error policy
    pub bailed: bool,
}

impl WorkerReport {
    pub fn merge(&mut self, other: &WorkerReport) {
        self.read_ops += other.read_ops;
        self.write_ops += other.write_ops;
        self.read_bytes += other.read_bytes;
        self.write_bytes += other.write_bytes;
        self.read_errors += other.read_errors;
        self.write_errors += other.write_errors;
        self.fsyncs += other.fsyncs;
        self.bailed |= other.bailed;
    }

    pub fn ops(&self) -> u64 {
        self.read_ops + self.write_ops
    }

    pub fn errors(&self) -> u64 {
        self.read_errors + self.write_errors
    }
}

/// Generate requests until the flag clears or every worker is gone
///
/// Returns the pattern so the job keeps its cursors.
pub fn run_generator(
    mut pattern: AccessPattern,
    queue: Sender<AccessRequest>,
    running: Arc<AtomicBool>,
    log: LogContext,
) -> AccessPattern {
    let mut generated = 0u64;

    'outer: while running.load(Ordering::Relaxed) {
        let mut request = match pattern.next_request() {
            Ok(r) => r,
            Err(e) => {
                warn!(job = log.job(), "request generation failed: {}", e);
                break;
            }
        };

        loop {
            match queue.send_timeout(request, POLL_INTERVAL) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(r)) => {
                    if !running.load(Ordering::Relaxed) {
                        break 'outer;
                    }
                    request = r;
                }
                Err(SendTimeoutError::Disconnected(_)) => break 'outer,
            }
        }
        generated += 1;
    }

    log.detail(format_args!("generator exiting after {} requests", generated));
    pattern
}

/// Everything one worker needs
pub struct WorkerContext {
    pub id: usize,
    pub job: Arc<str>,
    pub file: Arc<File>,
    /// Write buffers, one per section
    pub buffers: Arc<Vec<Vec<u8>>>,
    pub queue: Receiver<AccessRequest>,
    pub running: Arc<AtomicBool>,
    pub stats: StatsHandle,
    pub slot: Option<usize>,
    pub fsync_every: u64,
    pub bail_on_error: bool,
    pub log: LogContext,
}

/// Drain the queue until stopped, disconnected, or bailed
pub fn run_worker(ctx: WorkerContext) -> WorkerReport {
    let mut report = WorkerReport::default();
    let mut scratch: Vec<u8> = Vec::new();
    let mut since_fsync = 0u64;
    let mut first_error = true;

    while ctx.running.load(Ordering::Relaxed) {
        let req = match ctx.queue.recv_timeout(POLL_INTERVAL) {
            Ok(req) => req,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let len = req.block_size as usize;
        let started = Instant::now();
        let result = match req.direction {
            IoDirection::Idle => continue,
            IoDirection::Read => {
                if scratch.len() < len {
                    scratch.resize(len, 0);
                }
                ctx.file.read_at(&mut scratch[..len], req.offset)
            }
            IoDirection::Write => {
                let buf = &ctx.buffers[req.section];
                ctx.file.write_all_at(&buf[..len], req.offset).map(|_| len)
            }
        };
        let elapsed = started.elapsed();

        match result {
            Ok(n) => {
                let n = n as u64;
                match req.direction {
                    IoDirection::Read => {
                        report.read_ops += 1;
                        report.read_bytes += n;
                        ctx.stats.read(&ctx.job, elapsed, n, req.offset, ctx.slot);
                    }
                    _ => {
                        report.write_ops += 1;
                        report.write_bytes += n;
                        ctx.stats.write(&ctx.job, elapsed, n, req.offset, ctx.slot);
                    }
                }
            }
            Err(e) => {
                match req.direction {
                    IoDirection::Read => report.read_errors += 1,
                    _ => report.write_errors += 1,
                }
                ctx.stats.error(&ctx.job, req.direction);

                if ctx.bail_on_error {
                    warn!(job = %ctx.job, worker = ctx.id, "I/O error at offset {}, stopping worker: {}", req.offset, e);
                    report.bailed = true;
                    // the whole job is aborted, not just this worker
                    ctx.running.store(false, Ordering::Relaxed);
                    break;
                }
                if first_error {
                    warn!(job = %ctx.job, worker = ctx.id, "I/O error at offset {}, continuing: {}", req.offset, e);
                    first_error = false;
                } else {
                    ctx.log.detail(format_args!("worker {}: I/O error at {}: {}", ctx.id, req.offset, e));
                }
            }
        }

        if ctx.fsync_every > 0 {
            since_fsync += 1;
            if since_fsync >= ctx.fsync_every {
                since_fsync = 0;
                match ctx.file.sync_data() {
                    Ok(()) => report.fsyncs += 1,
                    Err(e) => warn!(job = %ctx.job, worker = ctx.id, "fsync failed: {}", e),
                }
            }
        }
    }

    ctx.log.detail(format_args!(
        "worker {} exiting: {} reads, {} writes, {} errors",
        ctx.id,
        report.read_ops,
        report.write_ops,
        report.errors()
    ));
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::engine::{StatsConfig, StatsEngine};
    use crossbeam::channel;

    fn ctx_for(
        file: Arc<File>,
        queue: Receiver<AccessRequest>,
        running: Arc<AtomicBool>,
        stats: StatsHandle,
        fsync_every: u64,
        bail: bool,
    ) -> WorkerContext {
        WorkerContext {
            id: 0,
            job: Arc::from("w"),
            file,
            buffers: Arc::new(vec![vec![0xABu8; 4096]]),
            queue,
            running,
            stats,
            slot: None,
            fsync_every,
            bail_on_error: bail,
            log: LogContext::new("w", false),
        }
    }

    fn req(offset: u64, direction: IoDirection) -> AccessRequest {
        AccessRequest {
            offset,
            direction,
            block_size: 4096,
            section: 0,
        }
    }

    #[test]
    fn test_worker_drains_until_disconnect() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let file = Arc::new(tmp.reopen().unwrap());
        file.set_len(64 * 1024).unwrap();

        let engine = StatsEngine::start(StatsConfig::default(), LogContext::new("s", false)).unwrap();
        let (tx, rx) = channel::bounded(16);
        let running = Arc::new(AtomicBool::new(true));

        for i in 0..8 {
            tx.send(req(i * 4096, IoDirection::Write)).unwrap();
        }
        tx.send(req(0, IoDirection::Idle)).unwrap();
        for i in 0..4 {
            tx.send(req(i * 4096, IoDirection::Read)).unwrap();
        }
        drop(tx);

        let report = run_worker(ctx_for(file, rx, running, engine.handle(), 3, false));
        assert_eq!(report.write_ops, 8);
        assert_eq!(report.read_ops, 4);
        assert_eq!(report.read_bytes, 4 * 4096);
        assert_eq!(report.fsyncs, 4);
        assert!(!report.bailed);

        let data = std::fs::read(tmp.path()).unwrap();
        assert!(data[..8 * 4096].iter().all(|&b| b == 0xAB));

        let snap = engine.stop().unwrap();
        assert_eq!(snap.global.write.ops, 8);
        assert_eq!(snap.global.read.ops, 4);
    }

    #[test]
    fn test_worker_stops_on_flag() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let file = Arc::new(tmp.reopen().unwrap());
        let engine = StatsEngine::start(StatsConfig::default(), LogContext::new("s", false)).unwrap();
        let (_tx, rx) = channel::bounded::<AccessRequest>(1);
        let running = Arc::new(AtomicBool::new(true));

        let flag = Arc::clone(&running);
        let stats = engine.handle();
        let handle = std::thread::spawn(move || run_worker(ctx_for(file, rx, flag, stats, 0, false)));

        std::thread::sleep(Duration::from_millis(50));
        running.store(false, Ordering::Relaxed);
        let report = handle.join().unwrap();
        assert_eq!(report.ops(), 0);
        engine.stop().unwrap();
    }

    #[test]
    fn test_bail_on_error() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        // read-only handle makes every write fail
        let file = Arc::new(File::open(tmp.path()).unwrap());
        let engine = StatsEngine::start(StatsConfig::default(), LogContext::new("s", false)).unwrap();

        let (tx, rx) = channel::bounded(8);
        for i in 0..4 {
            tx.send(req(i * 4096, IoDirection::Write)).unwrap();
        }
        drop(tx);
        let running = Arc::new(AtomicBool::new(true));
        let report = run_worker(ctx_for(Arc::clone(&file), rx, running, engine.handle(), 0, true));
        assert!(report.bailed);
        assert_eq!(report.write_errors, 1);

        let (tx, rx) = channel::bounded(8);
        for i in 0..4 {
            tx.send(req(i * 4096, IoDirection::Write)).unwrap();
        }
        drop(tx);
        let running = Arc::new(AtomicBool::new(true));
        let report = run_worker(ctx_for(file, rx, running, engine.handle(), 0, false));
        assert!(!report.bailed);
        assert_eq!(report.write_errors, 4);

        let snap = engine.stop().unwrap();
        assert_eq!(snap.global.write.errors, 5);
    }

    #[test]
    fn test_generator_exits_when_workers_gone() {
        let pattern = AccessPattern::parse_resolved("100:randread:4k", 1 << 20).unwrap();
        let (tx, rx) = channel::bounded(4);
        let running = Arc::new(AtomicBool::new(true));

        let flag = Arc::clone(&running);
        let handle = std::thread::spawn(move || {
            run_generator(pattern, tx, flag, LogContext::new("g", false))
        });
        for _ in 0..10 {
            rx.recv().unwrap();
        }
        drop(rx);
        let pattern = handle.join().unwrap();
        assert_eq!(pattern.sections().len(), 1);
        assert!(running.load(Ordering::Relaxed));
    }

    #[test]
    fn test_generator_exits_on_flag() {
        let pattern = AccessPattern::parse_resolved("100:read:4k", 1 << 20).unwrap();
        let (tx, _rx) = channel::bounded(2);
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = std::thread::spawn(move || {
            run_generator(pattern, tx, flag, LogContext::new("g", false))
        });
        std::thread::sleep(Duration::from_millis(30));
        running.store(false, Ordering::Relaxed);
        let pattern = handle.join().unwrap();
        // two requests queued, a third generated and dropped while blocked
        assert_eq!(pattern.sections()[0].last_blk, 3 * 4096);
    }

    #[test]
    fn test_report_merge() {
        let mut a = WorkerReport {
            read_ops: 2,
            read_bytes: 8192,
            ..Default::default()
        };
        let b = WorkerReport {
            write_ops: 1,
            write_errors: 3,
            bailed: true,
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.ops(), 3);
        assert_eq!(a.errors(), 3);
        assert!(a.bailed);
    }
}
