//! Logging context
//!
//! Components that need per-job diagnostics (jobs, worker loops, the stats
//! engine) receive a [`LogContext`] instead of consulting process-wide
//! flags. A verbose job logs its detail at `info`, everything else at
//! `debug`, so `-v` on the command line surfaces only the jobs that asked.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, Level};

#[derive(Debug, Clone)]
pub struct LogContext {
    job: Arc<str>,
    verbose: bool,
}

impl LogContext {
    pub fn new(job: &str, verbose: bool) -> Self {
        Self {
            job: Arc::from(job),
            verbose,
        }
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Level used for this context's detail messages
    pub fn detail_level(&self) -> Level {
        if self.verbose {
            Level::INFO
        } else {
            Level::DEBUG
        }
    }

    /// Emit a detail message tagged with the job name
    pub fn detail(&self, args: fmt::Arguments<'_>) {
        if self.verbose {
            info!(job = %self.job, "{}", args);
        } else {
            debug!(job = %self.job, "{}", args);
        }
    }

    /// Derive a context for a sub-component of the same job
    pub fn child(&self, component: &str) -> Self {
        Self {
            job: Arc::from(format!("{}/{}", self.job, component)),
            verbose: self.verbose,
        }
    }
}

/// Install the global subscriber
///
/// Verbosity maps from the `-v` count: 0 = warn, 1 = info, 2 = debug,
/// 3+ = trace. `RUST_LOG` overrides when set.
pub fn init_tracing(verbosity: u8) {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("iodrive={}", level)));

    // A second init (tests, embedding) keeps the first subscriber
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
