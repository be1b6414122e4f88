//! Local job against a pre-existing target, with a record file

use iodrive::job::{Job, JobOutcome, JobRunner, JobSpec};
use iodrive::stats::engine::{StatsConfig, StatsEngine};
use iodrive::stats::record::BARRIER_MARKER;
use iodrive::util::log::LogContext;
use std::time::Duration;

const MIB: usize = 1024 * 1024;

#[test]
fn test_zero_size_uses_existing_target_without_fill() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("existing.dat");
    let record = dir.path().join("record.csv");
    std::fs::write(&path, vec![0xABu8; 10 * MIB]).unwrap();

    let engine = StatsEngine::start(
        StatsConfig {
            record_file: Some(record.clone()),
            record_interval: Duration::from_millis(50),
            ..StatsConfig::default()
        },
        LogContext::new("stats", false),
    )
    .unwrap();
    let stats = engine.handle();

    let mut spec = JobSpec::new("reuse", &path);
    spec.size = 0;
    spec.iodepth = 2;
    spec.access = "100:randread:4k".to_string();
    spec.runtime = Duration::from_millis(300);

    let mut job = Job::new(spec, stats.clone());
    job.init().unwrap();
    assert_eq!(job.size(), Some(10 * MIB as u64));
    assert!(!job.filled());

    stats.clear();
    let report = job.start().unwrap();
    assert_eq!(report.outcome, JobOutcome::Completed);
    assert!(report.read_ops > 0);
    assert_eq!(report.write_ops, 0);

    stats.flush().unwrap();
    let snap = stats.snapshot().unwrap();
    assert_eq!(snap.job("reuse").unwrap().read.ops, report.read_ops);
    assert_eq!(snap.global.read.bytes, report.read_ops * 4096);

    job.fini().unwrap();
    engine.stop().unwrap();

    // target kept and untouched
    let contents = std::fs::read(&path).unwrap();
    assert_eq!(contents.len(), 10 * MIB);
    assert!(contents.iter().all(|b| *b == 0xAB));

    let lines = std::fs::read_to_string(&record).unwrap();
    assert!(lines.lines().any(|l| l == BARRIER_MARKER));
    assert!(lines.lines().filter(|l| !l.starts_with('#')).count() >= 2);
}
