//! Agent service
//!
//! Runs on each remote host. Every accepted connection hosts exactly one
//! job: the agent builds it from `Params`, initializes it, waits for
//! `Op{Start}`, then runs it on a blocking thread while pushing cumulative
//! stats every record interval. When the job ends the final stats and
//! `Op{Finished}` are sent, the target is released and the connection closes.

use crate::distributed::protocol::*;
use crate::error::ProtocolError;
use crate::job::{Job, JobReport, JobRunner};
use crate::stats::engine::{StatsConfig, StatsEngine, StatsHandle};
use crate::stats::histogram::HistogramMode;
use crate::stats::WorkerStat;
use crate::util::log::LogContext;
use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Agent service
pub struct AgentService {
    listen: String,
    /// Hostname reported to controllers
    agent_id: String,
}

impl AgentService {
    pub fn new(listen: impl Into<String>) -> Self {
        Self {
            listen: listen.into(),
            agent_id: get_agent_id(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Bind and serve until the process exits
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.listen)
            .await
            .with_context(|| format!("Failed to bind agent on {}", self.listen))?;
        println!("Agent {} listening on {}", self.agent_id, listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    ///
    /// Each connection is handled on its own task, so several jobs can run
    /// on one agent at once.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener
                .accept()
                .await
                .context("Failed to accept connection")?;
            info!(%peer, "controller connected");

            let agent_id = self.agent_id.clone();
            tokio::spawn(async move {
                match handle_connection(stream, agent_id).await {
                    Ok(()) => info!(%peer, "connection finished"),
                    Err(e) => warn!(%peer, "connection failed: {:#}", e),
                }
            });
        }
    }
}

/// Serve one job over one connection
pub async fn handle_connection(stream: TcpStream, agent_id: String) -> Result<()> {
    stream.set_nodelay(true).ok();
    let (mut read_half, mut write_half) = stream.into_split();

    let params = match read_message(&mut read_half).await? {
        Message::Params(p) => p,
        other => return Err(other.unexpected("Params").into()),
    };
    if params.version != PROTOCOL_VERSION {
        let err = ProtocolError::Version {
            local: PROTOCOL_VERSION,
            remote: params.version,
        };
        let reply = Message::Response(Response::error(err.to_string()));
        write_message(&mut write_half, &reply).await?;
        return Err(err.into());
    }

    let spec = params.to_spec();
    let name = spec.name.clone();
    let record_interval = spec.record_interval.max(Duration::from_millis(10));
    let mode = params.histogram;
    let engine = StatsEngine::start(
        StatsConfig {
            histogram: mode,
            ..Default::default()
        },
        LogContext::new(&name, spec.verbose),
    )?;
    info!(job = %name, target = %spec.target.display(), "received job");

    // init may fill the target; keep it off the reactor
    let job = Job::new(spec, engine.handle());
    let (job, init) = tokio::task::spawn_blocking(move || {
        let mut job = job;
        let r = job.init();
        (job, r)
    })
    .await
    .map_err(|e| anyhow!("init task failed: {}", e))?;

    if let Err(e) = init {
        warn!(job = %name, "init failed: {}", e);
        write_message(&mut write_half, &Message::Response(Response::error(e.to_string()))).await?;
        engine.stop()?;
        return Ok(());
    }
    let ready = format!("{} ready on {}", name, agent_id);
    write_message(&mut write_half, &Message::Response(Response::okay(ready))).await?;

    // Start or Stop
    match read_message(&mut read_half).await {
        Ok(Message::Op(OpCode::Start)) => {}
        Ok(Message::Op(OpCode::Stop)) => {
            write_message(&mut write_half, &Message::Response(Response::okay("stopped"))).await?;
            return finish_without_run(job, engine).await;
        }
        Ok(other) => {
            let _ = finish_without_run(job, engine).await;
            return Err(other.unexpected("Op(Start)").into());
        }
        Err(ProtocolError::Closed) => {
            debug!(job = %name, "controller closed before start");
            return finish_without_run(job, engine).await;
        }
        Err(e) => {
            let _ = finish_without_run(job, engine).await;
            return Err(e.into());
        }
    }
    write_message(&mut write_half, &Message::Response(Response::okay("started"))).await?;

    // from here on the controller may send Stop at any time
    let (msg_tx, mut msg_rx) = mpsc::channel::<Result<Message, ProtocolError>>(8);
    let reader = tokio::spawn(async move {
        loop {
            let msg = read_message(&mut read_half).await;
            let end = msg.is_err();
            if msg_tx.send(msg).await.is_err() || end {
                break;
            }
        }
    });

    let stats = engine.handle();
    stats.clear();
    let stopper = job.stopper();
    let mut run = tokio::task::spawn_blocking(move || {
        let mut job = job;
        let r = job.start();
        (job, r)
    });

    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + record_interval, record_interval);
    let mut connected = true;
    let mut reading = true;

    let (mut job, result) = loop {
        tokio::select! {
            joined = &mut run => {
                break joined.map_err(|e| anyhow!("job thread failed: {}", e))?;
            }
            msg = msg_rx.recv(), if reading => match msg {
                Some(Ok(Message::Op(OpCode::Stop))) => {
                    info!(job = %name, "stop requested");
                    stopper.stop();
                    let reply = Message::Response(Response::okay("stopping"));
                    if write_message(&mut write_half, &reply).await.is_err() {
                        connected = false;
                    }
                }
                Some(Ok(other)) => {
                    warn!(job = %name, "ignoring unexpected {}", other.kind());
                }
                Some(Err(ProtocolError::Closed)) | None => {
                    warn!(job = %name, "controller disconnected, stopping job");
                    stopper.stop();
                    reading = false;
                    connected = false;
                }
                Some(Err(e)) => {
                    warn!(job = %name, "bad message from controller: {}", e);
                    stopper.stop();
                    reading = false;
                }
            },
            _ = ticker.tick(), if connected => {
                let stat = match job_stat(&stats, &name, mode, None).await {
                    Ok(stat) => stat,
                    Err(e) => {
                        warn!(job = %name, "cannot snapshot stats: {:#}", e);
                        continue;
                    }
                };
                let sent = push_stats(&mut write_half, OpCode::IntermediateStats, &name, stat).await;
                if let Err(e) = sent {
                    warn!(job = %name, "cannot push stats: {}, stopping job", e);
                    stopper.stop();
                    connected = false;
                }
            }
        }
    };
    reader.abort();

    let report = match result {
        Ok(report) => Some(report),
        Err(e) => {
            warn!(job = %name, "run failed: {:#}", e);
            None
        }
    };

    let pushed = if connected {
        match job_stat(&stats, &name, mode, report.as_ref()).await {
            Ok(stat) => async {
                push_stats(&mut write_half, OpCode::FinishedStats, &name, stat).await?;
                write_message(&mut write_half, &Message::Op(OpCode::Finished)).await
            }
            .await
            .map_err(anyhow::Error::from),
            Err(e) => Err(e),
        }
    } else {
        Ok(())
    };

    tokio::task::spawn_blocking(move || job.fini())
        .await
        .map_err(|e| anyhow!("fini task failed: {}", e))??;
    engine.stop()?;
    pushed
}

async fn finish_without_run(job: Job, engine: StatsEngine) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        let mut job = job;
        job.fini()
    })
    .await
    .map_err(|e| anyhow!("fini task failed: {}", e))??;
    engine.stop()?;
    Ok(())
}

/// Cumulative counters for the job, elapsed from the report when finished
async fn job_stat(
    stats: &StatsHandle,
    name: &str,
    mode: HistogramMode,
    report: Option<&JobReport>,
) -> Result<WorkerStat> {
    let handle = stats.clone();
    let snap = tokio::task::spawn_blocking(move || handle.snapshot())
        .await
        .map_err(|e| anyhow!("snapshot task failed: {}", e))??;

    let mut stat = snap
        .job(name)
        .cloned()
        .unwrap_or_else(|| WorkerStat::new(mode));
    if let Some(report) = report {
        stat.set_elapsed(report.elapsed());
    } else if stat.elapsed_ns == 0 {
        stat.elapsed_ns = snap.global.elapsed_ns;
    }
    Ok(stat)
}

async fn push_stats(
    writer: &mut OwnedWriteHalf,
    op: OpCode,
    name: &str,
    stats: WorkerStat,
) -> Result<(), ProtocolError> {
    write_message(writer, &Message::Op(op)).await?;
    let snapshot = Message::StatSnapshot {
        job_name: name.to_string(),
        stats,
    };
    write_message(writer, &snapshot).await
}

/// Hostname, or "unknown"
fn get_agent_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobSpec;

    async fn start_agent() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(AgentService::new("127.0.0.1:0").serve(listener));
        addr
    }

    fn params(path: &std::path::Path) -> JobParams {
        let mut spec = JobSpec::new("agent-job", path);
        spec.size = 1024 * 1024;
        spec.access = "100:randread:4k".to_string();
        spec.runtime = Duration::from_millis(300);
        spec.record_interval = Duration::from_millis(100);
        JobParams::from_spec(&spec, HistogramMode::Log2)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_version_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start_agent().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let mut p = params(&dir.path().join("v.dat"));
        p.version = PROTOCOL_VERSION + 1;
        write_message(&mut stream, &Message::Params(p)).await.unwrap();

        match read_message(&mut stream).await.unwrap() {
            Message::Response(r) => assert!(!r.is_okay()),
            other => panic!("unexpected {}", other.kind()),
        }
        assert!(matches!(read_message(&mut stream).await, Err(ProtocolError::Closed)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_init_failure_reported() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start_agent().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let mut p = params(&dir.path().join("missing.dat"));
        p.size = 0;
        write_message(&mut stream, &Message::Params(p)).await.unwrap();

        match read_message(&mut stream).await.unwrap() {
            Message::Response(r) => {
                assert!(!r.is_okay());
                assert!(r.info.contains("size"));
            }
            other => panic!("unexpected {}", other.kind()),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_before_start_releases_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("early.dat");
        let addr = start_agent().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        write_message(&mut stream, &Message::Params(params(&path))).await.unwrap();
        match read_message(&mut stream).await.unwrap() {
            Message::Response(r) => assert!(r.is_okay()),
            other => panic!("unexpected {}", other.kind()),
        }
        assert!(path.exists());

        write_message(&mut stream, &Message::Op(OpCode::Stop)).await.unwrap();
        match read_message(&mut stream).await.unwrap() {
            Message::Response(r) => assert!(r.is_okay()),
            other => panic!("unexpected {}", other.kind()),
        }
        assert!(matches!(read_message(&mut stream).await, Err(ProtocolError::Closed)));
        assert!(!path.exists());
    }
}
