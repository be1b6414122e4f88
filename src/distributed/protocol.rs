//! Agent wire protocol
//!
//! One TCP connection carries one remote job. The controller drives the
//! request/response part; stats flow back unsolicited once the job runs.
//!
//! # Message Flow
//!
//! ```text
//! Controller                          Agent
//!     |                                 |
//!     |-------- Params ---------------->|   open, size, fill, resolve
//!     |<------- Response{Okay|Error} ---|
//!     |                                 |
//!     |-------- Op{Start} ------------->|
//!     |<------- Response{Okay} ---------|
//!     |                                 |
//!     |<------- Op{IntermediateStats} --|   every record interval
//!     |<------- StatSnapshot -----------|
//!     |              ...                |
//!     |<------- Op{FinishedStats} ------|
//!     |<------- StatSnapshot -----------|
//!     |<------- Op{Finished} -----------|   agent runs fini, closes
//! ```
//!
//! `Op{Stop}` may be sent at any time after `Params`; the agent clears the
//! job's running flag and answers with one final `Response`.
//!
//! # Message Framing
//!
//! Each message is prefixed with a 4-byte length field (little-endian u32):
//!
//! ```text
//! [4 bytes: message length][N bytes: MessagePack-serialized message]
//! ```

use crate::error::ProtocolError;
use crate::job::JobSpec;
use crate::pattern::FillPattern;
use crate::stats::histogram::HistogramMode;
use crate::stats::WorkerStat;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version
///
/// Increment this when making breaking changes to the protocol.
/// Controller and agents must have matching protocol versions.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest accepted frame body
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

pub const DEFAULT_AGENT_PORT: u16 = 9999;

/// Everything an agent needs to build the job locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    pub version: u32,
    pub job_name: String,
    /// Path on the agent host
    pub target_path: String,
    pub iodepth: u32,
    pub size: u64,
    pub runtime_ms: u64,
    pub access_pattern: String,
    pub verbose: bool,
    pub fill: FillPattern,
    pub fsync_every: u64,
    pub start_delay_ms: u64,
    pub bail_on_error: bool,
    pub record_interval_ms: u64,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Bucket layout of the controller, so pushed histograms merge
    #[serde(default)]
    pub histogram: HistogramMode,
}

impl JobParams {
    pub fn from_spec(spec: &JobSpec, histogram: HistogramMode) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            job_name: spec.name.clone(),
            target_path: spec.target.to_string_lossy().into_owned(),
            iodepth: spec.iodepth.min(u32::MAX as usize) as u32,
            size: spec.size,
            runtime_ms: duration_ms(spec.runtime),
            access_pattern: spec.access.clone(),
            verbose: spec.verbose,
            fill: spec.fill,
            fsync_every: spec.fsync_every,
            start_delay_ms: duration_ms(spec.start_delay),
            bail_on_error: spec.bail_on_error,
            record_interval_ms: duration_ms(spec.record_interval),
            seed: spec.seed,
            histogram,
        }
    }

    /// Local spec on the agent side; never remote
    pub fn to_spec(&self) -> JobSpec {
        let mut spec = JobSpec::new(&self.job_name, PathBuf::from(&self.target_path));
        spec.size = self.size;
        spec.iodepth = (self.iodepth as usize).max(1);
        spec.runtime = Duration::from_millis(self.runtime_ms);
        spec.access = self.access_pattern.clone();
        spec.verbose = self.verbose;
        spec.fill = self.fill;
        spec.fsync_every = self.fsync_every;
        spec.start_delay = Duration::from_millis(self.start_delay_ms);
        spec.bail_on_error = self.bail_on_error;
        if self.record_interval_ms > 0 {
            spec.record_interval = Duration::from_millis(self.record_interval_ms);
        }
        spec.seed = self.seed;
        spec.remote = None;
        spec
    }
}

fn duration_ms(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Okay,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    pub info: String,
}

impl Response {
    pub fn okay(info: impl Into<String>) -> Self {
        Self {
            status: Status::Okay,
            info: info.into(),
        }
    }

    pub fn error(info: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            info: info.into(),
        }
    }

    pub fn is_okay(&self) -> bool {
        self.status == Status::Okay
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpCode {
    Start,
    Stop,
    IntermediateStats,
    FinishedStats,
    Finished,
}

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Params(JobParams),
    Response(Response),
    Op(OpCode),
    /// Cumulative counters since the job started
    StatSnapshot { job_name: String, stats: WorkerStat },
}

impl Message {
    /// Short name for diagnostics
    pub fn kind(&self) -> String {
        match self {
            Message::Params(_) => "Params".to_string(),
            Message::Response(r) => format!("Response({:?})", r.status),
            Message::Op(op) => format!("Op({:?})", op),
            Message::StatSnapshot { .. } => "StatSnapshot".to_string(),
        }
    }

    /// Error for a message that arrived where `expected` was due
    pub fn unexpected(&self, expected: &'static str) -> ProtocolError {
        ProtocolError::Unexpected {
            expected,
            got: self.kind(),
        }
    }
}

/// Serialize a message to bytes with a length prefix
pub fn serialize_message(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let body = rmp_serde::to_vec_named(msg)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(body.len()));
    }

    let mut framed = Vec::with_capacity(4 + body.len());
    framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
    framed.extend_from_slice(&body);
    Ok(framed)
}

/// Deserialize one message from the front of `buf`
///
/// Returns the message and the number of bytes consumed, including the
/// length prefix.
pub fn deserialize_message(buf: &[u8]) -> Result<(Message, usize), ProtocolError> {
    if buf.len() < 4 {
        return Err(incomplete());
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    if buf.len() < 4 + len {
        return Err(incomplete());
    }
    let msg = rmp_serde::from_slice(&buf[4..4 + len])?;
    Ok((msg, 4 + len))
}

fn incomplete() -> ProtocolError {
    ProtocolError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "incomplete frame"))
}

/// Read one framed message
///
/// A clean end of stream before the length prefix is [`ProtocolError::Closed`].
pub async fn read_message<R>(reader: &mut R) -> Result<Message, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(ProtocolError::Closed),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(rmp_serde::from_slice(&body)?)
}

/// Write one framed message and flush
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let framed = serialize_message(msg)?;
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_message_framing() {
        let bytes = serialize_message(&Message::Op(OpCode::Stop)).unwrap();
        assert!(bytes.len() >= 4);
        let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(bytes.len(), 4 + len);

        let (msg, consumed) = deserialize_message(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(msg, Message::Op(OpCode::Stop));
    }

    #[test]
    fn test_incomplete_frame() {
        let bytes = serialize_message(&Message::Response(Response::okay("ready"))).unwrap();
        assert!(matches!(
            deserialize_message(&bytes[..bytes.len() - 1]),
            Err(ProtocolError::Io(_))
        ));
        assert!(matches!(deserialize_message(&bytes[..2]), Err(ProtocolError::Io(_))));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let mut bytes = 3u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0xc1, 0xc1, 0xc1]);
        assert!(matches!(deserialize_message(&bytes), Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let bytes = ((MAX_FRAME_SIZE + 1) as u32).to_le_bytes();
        assert!(matches!(
            deserialize_message(&bytes),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_params_carry_spec() {
        let mut spec = JobSpec::new("remote1", "/data/t.dat");
        spec.size = 1 << 30;
        spec.iodepth = 8;
        spec.runtime = Duration::from_secs(30);
        spec.access = "100:randrw|70:4k".to_string();
        spec.fill = FillPattern::Lcg;
        spec.fsync_every = 16;
        spec.remote = Some("host:9999".to_string());

        let params = JobParams::from_spec(&spec, HistogramMode::Log2);
        assert_eq!(params.version, PROTOCOL_VERSION);
        assert_eq!(params.runtime_ms, 30_000);

        let back = params.to_spec();
        assert_eq!(back.remote, None);
        assert_eq!(back.size, spec.size);
        assert_eq!(back.iodepth, 8);
        assert_eq!(back.access, spec.access);
        assert_eq!(back.fill, FillPattern::Lcg);
        assert_eq!(back.fsync_every, 16);
    }

    #[test]
    fn test_stat_snapshot_carries_histogram() {
        let mut stats = WorkerStat::default();
        stats.record_write(4096, Duration::from_micros(700));
        let msg = Message::StatSnapshot {
            job_name: "j".to_string(),
            stats: stats.clone(),
        };
        let (back, _) = deserialize_message(&serialize_message(&msg).unwrap()).unwrap();
        match back {
            Message::StatSnapshot { job_name, stats: s } => {
                assert_eq!(job_name, "j");
                assert_eq!(s, stats);
                assert_eq!(s.histogram.total(), 1);
            }
            other => panic!("wrong message: {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_async_read_write() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_message(&mut a, &Message::Op(OpCode::Start)).await.unwrap();
        write_message(&mut a, &Message::Response(Response::error("nope"))).await.unwrap();
        drop(a);

        assert_eq!(read_message(&mut b).await.unwrap(), Message::Op(OpCode::Start));
        match read_message(&mut b).await.unwrap() {
            Message::Response(r) => assert!(!r.is_okay()),
            other => panic!("wrong message: {}", other.kind()),
        }
        assert!(matches!(read_message(&mut b).await, Err(ProtocolError::Closed)));
    }
}
