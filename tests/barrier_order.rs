//! Barrier groups run strictly in order, jobs inside a group concurrently

use iodrive::error::InitError;
use iodrive::job::{JobReport, JobRunner, RunFlag, StopSignal};
use iodrive::scheduler::{BarrierOrder, Scheduler, SchedulerConfig};
use iodrive::stats::engine::{StatsConfig, StatsEngine};
use iodrive::util::log::LogContext;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    Start,
    StartDone,
    Fini,
}

type Events = Arc<Mutex<Vec<(String, Phase, Instant)>>>;

/// Records a timestamp for every lifecycle call
struct Traced {
    name: String,
    events: Events,
    work: Duration,
    flag: RunFlag,
}

impl Traced {
    fn log(&self, phase: Phase) {
        self.events
            .lock()
            .unwrap()
            .push((self.name.clone(), phase, Instant::now()));
    }
}

impl JobRunner for Traced {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self) -> Result<(), InitError> {
        self.log(Phase::Init);
        std::thread::sleep(Duration::from_millis(10));
        Ok(())
    }

    fn start(&mut self) -> iodrive::Result<JobReport> {
        self.log(Phase::Start);
        std::thread::sleep(self.work);
        self.log(Phase::StartDone);
        Ok(JobReport::from_workers(&self.name, &[], self.work))
    }

    fn stopper(&self) -> Arc<dyn StopSignal> {
        Arc::new(self.flag.clone())
    }

    fn fini(&mut self) -> iodrive::Result<()> {
        self.log(Phase::Fini);
        Ok(())
    }
}

fn times(events: &[(String, Phase, Instant)], jobs: &[&str], phase: Phase) -> Vec<Instant> {
    events
        .iter()
        .filter(|(n, p, _)| *p == phase && jobs.contains(&n.as_str()))
        .map(|(_, _, t)| *t)
        .collect()
}

#[test]
fn test_groups_are_serialized_by_barriers() {
    let engine = StatsEngine::start(StatsConfig::default(), LogContext::new("stats", false)).unwrap();
    let events: Events = Arc::default();

    let factory_events = Arc::clone(&events);
    let factory = move |name: &str| -> iodrive::Result<Box<dyn JobRunner>> {
        Ok(Box::new(Traced {
            name: name.to_string(),
            events: Arc::clone(&factory_events),
            work: Duration::from_millis(if name == "slow" { 250 } else { 50 }),
            flag: RunFlag::new(),
        }))
    };

    let order = BarrierOrder::parse("slow,fast,barrier,after1,after2,barrier,last").unwrap();
    let mut scheduler = Scheduler::new(order, engine.handle(), factory).with_config(SchedulerConfig {
        quiet: true,
        ..SchedulerConfig::default()
    });
    let summary = scheduler.run().unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.groups.len(), 3);

    let events = events.lock().unwrap().clone();
    assert_eq!(events.len(), 5 * 4);

    let groups: [&[&str]; 3] = [&["slow", "fast"], &["after1", "after2"], &["last"]];
    for pair in groups.windows(2) {
        let (earlier, later) = (pair[0], pair[1]);
        let last_fini = times(&events, earlier, Phase::Fini).into_iter().max().unwrap();
        let first_init = times(&events, later, Phase::Init).into_iter().min().unwrap();
        assert!(last_fini <= first_init, "{:?} overlapped {:?}", earlier, later);
    }

    for group in groups {
        // every init finishes before any start; every run ends before any fini
        let last_init = times(&events, group, Phase::Init).into_iter().max().unwrap();
        let first_start = times(&events, group, Phase::Start).into_iter().min().unwrap();
        assert!(last_init <= first_start);

        let last_done = times(&events, group, Phase::StartDone).into_iter().max().unwrap();
        let first_fini = times(&events, group, Phase::Fini).into_iter().min().unwrap();
        assert!(last_done <= first_fini);
    }

    // the fast job does not wait for the slow one to start
    let slow_start = times(&events, &["slow"], Phase::Start)[0];
    let fast_start = times(&events, &["fast"], Phase::Start)[0];
    let gap = if slow_start > fast_start {
        slow_start - fast_start
    } else {
        fast_start - slow_start
    };
    assert!(gap < Duration::from_millis(200));

    engine.stop().unwrap();
}

#[test]
fn test_stop_skips_remaining_groups() {
    let engine = StatsEngine::start(StatsConfig::default(), LogContext::new("stats", false)).unwrap();
    let events: Events = Arc::default();

    let factory_events = Arc::clone(&events);
    let factory = move |name: &str| -> iodrive::Result<Box<dyn JobRunner>> {
        Ok(Box::new(Traced {
            name: name.to_string(),
            events: Arc::clone(&factory_events),
            work: Duration::from_millis(10),
            flag: RunFlag::new(),
        }))
    };

    let order = BarrierOrder::parse("a,barrier,b").unwrap();
    let mut scheduler = Scheduler::new(order, engine.handle(), factory).with_config(SchedulerConfig {
        quiet: true,
        ..SchedulerConfig::default()
    });
    scheduler.stop_handle().stop_all();
    let summary = scheduler.run().unwrap();

    assert!(summary.interrupted);
    assert!(summary.groups.is_empty());
    assert!(events.lock().unwrap().is_empty());
    engine.stop().unwrap();
}
