//! Remote job proxy
//!
//! Stands in for a local [`Job`](crate::job::Job) when a job names an
//! agent. The scheduler drives it through the same [`JobRunner`] lifecycle;
//! each call becomes a round trip on the job's connection. Pushed snapshots
//! are fed to the local stats engine so remote jobs show up in the same
//! Display and record file as local ones.
//!
//! The proxy blocks scheduler threads on a multi-threaded tokio runtime via
//! [`Handle::block_on`]; a current-thread runtime would never drive the
//! connection.

use crate::distributed::protocol::*;
use crate::error::{InitError, ProtocolError};
use crate::job::{JobOutcome, JobReport, JobRunner, JobSpec, StopSignal};
use crate::stats::engine::StatsHandle;
use crate::stats::histogram::HistogramMode;
use crate::stats::WorkerStat;
use crate::util::log::LogContext;
use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tracing::warn;

/// Connect attempt limit
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type SharedWriter = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

struct Connection {
    reader: OwnedReadHalf,
    writer: SharedWriter,
}

pub struct RemoteJobProxy {
    spec: JobSpec,
    agent: String,
    histogram: HistogramMode,
    runtime: Handle,
    stats: StatsHandle,
    log: LogContext,
    conn: Option<Connection>,
    stop: Arc<RemoteStop>,
    /// Agent reported the job finished
    finished: bool,
}

impl RemoteJobProxy {
    /// Proxy for `spec` on the agent named in `spec.remote`
    pub fn new(spec: JobSpec, histogram: HistogramMode, stats: StatsHandle, runtime: Handle) -> Result<Self> {
        let agent = spec
            .remote
            .clone()
            .ok_or_else(|| anyhow!("job '{}' has no agent address", spec.name))?;
        let agent = with_default_port(&agent);
        Ok(Self {
            log: LogContext::new(&spec.name, spec.verbose),
            stop: Arc::new(RemoteStop {
                requested: AtomicBool::new(false),
                writer: Mutex::new(None),
                runtime: runtime.clone(),
            }),
            spec,
            agent,
            histogram,
            runtime,
            stats,
            conn: None,
            finished: false,
        })
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    async fn connect(&self) -> Result<Connection, InitError> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.agent))
            .await
            .map_err(|_| InitError::Remote(format!("connect to {} timed out", self.agent)))?
            .map_err(ProtocolError::from)?;
        stream.set_nodelay(true).ok();
        let (reader, writer) = stream.into_split();
        Ok(Connection {
            reader,
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
        })
    }

    /// Read messages until `Finished`, feeding every snapshot to the engine
    async fn collect(
        reader: &mut OwnedReadHalf,
        name: &str,
        stats: &StatsHandle,
    ) -> Result<Option<WorkerStat>, ProtocolError> {
        let mut last = None;
        loop {
            match read_message(reader).await? {
                Message::Op(OpCode::IntermediateStats) | Message::Op(OpCode::FinishedStats) => {
                    match read_message(reader).await? {
                        Message::StatSnapshot { stats: stat, .. } => {
                            stats.remote_snapshot(name, stat.clone());
                            last = Some(stat);
                        }
                        other => return Err(other.unexpected("StatSnapshot")),
                    }
                }
                Message::Op(OpCode::Finished) => return Ok(last),
                // answer to our Stop
                Message::Response(r) => {
                    if !r.is_okay() {
                        warn!(job = %name, "agent: {}", r.info);
                    }
                }
                other => return Err(other.unexpected("stats or Finished")),
            }
        }
    }

    fn report(&self, stat: Option<WorkerStat>) -> JobReport {
        let stat = stat.unwrap_or_else(|| WorkerStat::new(self.histogram));
        let aborted = self.spec.bail_on_error && stat.total_errors() > 0;
        JobReport {
            name: self.spec.name.clone(),
            outcome: if aborted {
                JobOutcome::Aborted
            } else {
                JobOutcome::Completed
            },
            workers: self.spec.iodepth,
            elapsed_ns: stat.elapsed_ns,
            read_ops: stat.read.ops,
            write_ops: stat.write.ops,
            read_bytes: stat.read.bytes,
            write_bytes: stat.write.bytes,
            read_errors: stat.read.errors,
            write_errors: stat.write.errors,
        }
    }
}

impl JobRunner for RemoteJobProxy {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn init(&mut self) -> Result<(), InitError> {
        let params = JobParams::from_spec(&self.spec, self.histogram);
        let runtime = self.runtime.clone();
        let mut conn = runtime.block_on(self.connect())?;

        let response = runtime.block_on(async {
            let mut writer = conn.writer.lock().await;
            write_message(&mut *writer, &Message::Params(params)).await?;
            drop(writer);
            match read_message(&mut conn.reader).await? {
                Message::Response(r) => Ok(r),
                other => Err(other.unexpected("Response")),
            }
        })?;

        if !response.is_okay() {
            return Err(InitError::Remote(response.info));
        }
        self.log.detail(format_args!("agent {}: {}", self.agent, response.info));

        if let Ok(mut slot) = self.stop.writer.lock() {
            *slot = Some(Arc::clone(&conn.writer));
        }
        self.conn = Some(conn);
        Ok(())
    }

    fn start(&mut self) -> Result<JobReport> {
        let name = self.spec.name.clone();
        let stats = self.stats.clone();
        let stop_requested = self.stop.requested.load(Ordering::SeqCst);
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| anyhow!("job '{}' started before init", name))?;

        if stop_requested {
            return Ok(self.report(None));
        }

        let writer = Arc::clone(&conn.writer);
        let reader = &mut conn.reader;
        let last = self.runtime.block_on(async {
            write_message(&mut *writer.lock().await, &Message::Op(OpCode::Start)).await?;
            match read_message(reader).await? {
                Message::Response(r) if r.is_okay() => {}
                Message::Response(r) => {
                    return Err(ProtocolError::Unexpected {
                        expected: "Response(Okay)",
                        got: r.info,
                    })
                }
                other => return Err(other.unexpected("Response")),
            }
            Self::collect(reader, &name, &stats).await
        })?;

        self.finished = true;
        let report = self.report(last);
        self.log.detail(format_args!(
            "remote run finished: {} ops, {} errors",
            report.ops(),
            report.errors()
        ));
        Ok(report)
    }

    fn stopper(&self) -> Arc<dyn StopSignal> {
        Arc::clone(&self.stop) as Arc<dyn StopSignal>
    }

    fn fini(&mut self) -> Result<()> {
        if let Ok(mut slot) = self.stop.writer.lock() {
            slot.take();
        }
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        if self.finished {
            return Ok(());
        }

        // never started: release the agent's target
        self.runtime.block_on(async {
            write_message(&mut *conn.writer.lock().await, &Message::Op(OpCode::Stop)).await?;
            match read_message(&mut conn.reader).await {
                Ok(_) | Err(ProtocolError::Closed) => Ok(()),
                Err(e) => Err(e),
            }
        })?;
        Ok(())
    }
}

/// Sends `Op{Stop}` on the job's connection
struct RemoteStop {
    requested: AtomicBool,
    writer: Mutex<Option<SharedWriter>>,
    runtime: Handle,
}

impl StopSignal for RemoteStop {
    fn stop(&self) {
        if self.requested.swap(true, Ordering::SeqCst) {
            return;
        }
        let writer = match self.writer.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        if let Some(writer) = writer {
            self.runtime.spawn(async move {
                let mut w = writer.lock().await;
                if let Err(e) = write_message(&mut *w, &Message::Op(OpCode::Stop)).await {
                    warn!("cannot send stop to agent: {}", e);
                }
            });
        }
    }
}

/// Append the default agent port when the address has none
pub fn with_default_port(addr: &str) -> String {
    if addr.parse::<std::net::SocketAddr>().is_ok() {
        return addr.to_string();
    }
    match addr.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() && !addr.ends_with(']') => addr.to_string(),
        _ => format!("{}:{}", addr, DEFAULT_AGENT_PORT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_default_port() {
        assert_eq!(with_default_port("host"), "host:9999");
        assert_eq!(with_default_port("host:7000"), "host:7000");
        assert_eq!(with_default_port("10.0.0.1:80"), "10.0.0.1:80");
        assert_eq!(with_default_port("[::1]:80"), "[::1]:80");
        assert_eq!(with_default_port("[::1]"), "[::1]:9999");
    }

    #[test]
    fn test_requires_agent_address() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let engine = crate::stats::engine::StatsEngine::start(
            Default::default(),
            LogContext::new("stats", false),
        )
        .unwrap();
        let spec = JobSpec::new("local", "/tmp/x");
        assert!(RemoteJobProxy::new(spec, HistogramMode::Log2, engine.handle(), rt.handle().clone()).is_err());
        engine.stop().unwrap();
    }

    #[test]
    fn test_unreachable_agent_fails_init() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let engine = crate::stats::engine::StatsEngine::start(
            Default::default(),
            LogContext::new("stats", false),
        )
        .unwrap();
        // bind then drop to get a port nobody listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut spec = JobSpec::new("remote", "/tmp/x");
        spec.remote = Some(format!("127.0.0.1:{}", port));

        let mut proxy =
            RemoteJobProxy::new(spec, HistogramMode::Log2, engine.handle(), rt.handle().clone()).unwrap();
        assert!(matches!(proxy.init(), Err(InitError::Protocol(_))));
        engine.stop().unwrap();
    }
}
