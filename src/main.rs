//! iodrive CLI entry point

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use iodrive::config::cli::{Cli, Command};
use iodrive::config::{toml::load_config, Config};
use iodrive::distributed::{AgentService, RemoteJobProxy};
use iodrive::job::{Job, JobRunner};
use iodrive::output::json::{write_json_output, JsonRunReport};
use iodrive::scheduler::Scheduler;
use iodrive::stats::engine::StatsEngine;
use iodrive::util::log::{init_tracing, LogContext};
use iodrive::util::time::format_duration;
use std::path::PathBuf;
use tracing::{info, warn};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Run { config, json, quiet } => run(config, json, quiet),
        Command::Agent { listen } => run_agent(listen),
        Command::Check { config } => check(config),
    }
}

/// Run every barrier group of a config file
fn run(path: PathBuf, json: Option<PathBuf>, quiet: bool) -> Result<()> {
    let config = load_config(&path)?;
    let json_output = json.or_else(|| config.json_output.clone());

    if !quiet {
        println!("iodrive v{}", env!("CARGO_PKG_VERSION"));
        println!();
        print_configuration(&config);
        println!();
    }

    // remote proxies block scheduler threads on this runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    let engine = StatsEngine::start(config.stats_config(), LogContext::new("stats", false))
        .context("Failed to start stats engine")?;
    let stats = engine.handle();

    let factory = {
        let jobs = config.jobs.clone();
        let histogram = config.histogram;
        let stats = stats.clone();
        let handle = runtime.handle().clone();
        move |name: &str| -> Result<Box<dyn JobRunner>> {
            let (slot, spec) = jobs
                .iter()
                .enumerate()
                .find(|(_, j)| j.name == name)
                .with_context(|| format!("job '{}' is not defined", name))?;
            let spec = spec.clone();
            if spec.is_remote() {
                let proxy = RemoteJobProxy::new(spec, histogram, stats.clone(), handle.clone())?;
                Ok(Box::new(proxy))
            } else {
                Ok(Box::new(Job::new(spec, stats.clone()).with_activity_slot(slot)))
            }
        }
    };

    let mut scheduler = Scheduler::new(config.order.clone(), stats, factory)
        .with_config(config.scheduler_config(quiet));

    let stop = scheduler.stop_handle();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping jobs");
            stop.stop_all();
        }
    });

    let started = Local::now();
    let summary = scheduler.run();
    let final_stats = engine.stop();
    let summary = summary?;
    final_stats.context("Stats engine failed")?;

    if let Some(path) = &json_output {
        let report = JsonRunReport::from_results(started, &summary.groups);
        write_json_output(path, &report, true)?;
        if !quiet {
            println!("JSON report written to {}", path.display());
        }
    }

    runtime.shutdown_background();

    if let Some(group) = summary.hard_stop {
        bail!("group {} produced no results, remaining groups skipped", group + 1);
    }
    if summary.failed_before_first_run() {
        bail!("{} job(s) failed to initialize before the first run", summary.init_failures);
    }
    if summary.interrupted {
        info!("run interrupted after {} group(s)", summary.groups.len());
    }
    Ok(())
}

/// Serve remote jobs until killed
fn run_agent(listen: String) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?;

    println!("iodrive v{} agent", env!("CARGO_PKG_VERSION"));
    runtime.block_on(AgentService::new(listen).run())
}

/// Validate only
fn check(path: PathBuf) -> Result<()> {
    let config = load_config(&path)?;
    print_configuration(&config);
    println!();
    println!("Configuration valid");
    Ok(())
}

fn print_configuration(config: &Config) {
    println!("Configuration:");
    for (index, group) in config.order.groups().iter().enumerate() {
        println!("  Group {}:", index + 1);
        for name in group {
            let Some(job) = config.job(name) else {
                continue;
            };
            let size = if job.size == 0 {
                "existing".to_string()
            } else {
                iodrive::util::time::format_bytes(job.size)
            };
            let runtime = if job.runtime.is_zero() {
                "until stopped".to_string()
            } else {
                format_duration(job.runtime)
            };
            let location = job.remote.as_deref().unwrap_or("local");
            println!(
                "    {:<16} {} ({}) iodepth={} runtime={} access={} [{}]",
                job.name,
                job.target.display(),
                size,
                job.iodepth,
                runtime,
                job.access,
                location
            );
        }
    }
    if let Some(path) = &config.record_file {
        println!("  Record file: {} every {}", path.display(), format_duration(config.record_interval));
    }
}
