//! Error taxonomy
//!
//! Typed errors for the places where a caller must branch on what went wrong:
//! configuration is fatal to startup, init failures drop one job from its
//! group, protocol failures close one agent connection. Everything else is
//! `anyhow` glue with context, the same as the rest of the crate.

use std::path::PathBuf;
use thiserror::Error;

/// Malformed or out-of-range configuration. Aborts startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("job '{job}': {field}: {reason}")]
    InvalidField {
        job: String,
        field: &'static str,
        reason: String,
    },

    #[error("job '{job}': access pattern: {source}")]
    Pattern {
        job: String,
        #[source]
        source: PatternError,
    },

    #[error("order: {0}")]
    Order(String),

    #[error("invalid size '{0}' (expected digits with optional k/m/g/t suffix)")]
    Size(String),

    #[error("invalid duration '{0}' (expected digits with optional ms/s/m/h suffix)")]
    Duration(String),

    #[error("histogram: {0}")]
    Histogram(String),
}

/// Access-pattern descriptor errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("tuple '{0}' must have exactly 3 colon-separated fields (percent:op:blocksize)")]
    FieldCount(String),

    #[error("invalid percent '{0}' (expected integer 1-100)")]
    Percent(String),

    #[error("unknown operation '{0}'")]
    UnknownOp(String),

    #[error("invalid read percent '{0}' (expected integer 0-100)")]
    ReadPercent(String),

    #[error("invalid block size '{0}'")]
    BlockSize(String),

    #[error("block size {0} must be a non-zero multiple of 512")]
    BlockAlignment(u64),

    #[error("percentages sum to {0}, which exceeds 100")]
    PercentOverflow(u32),

    #[error("empty access pattern")]
    Empty,

    #[error("section {index} spans {len} bytes, smaller than its {block_size}-byte block")]
    SectionTooSmall { index: usize, len: u64, block_size: u64 },

    #[error("pattern has not been resolved against a target size")]
    Unresolved,
}

/// Failures while opening, sizing or filling a job's target.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("cannot open target {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot determine size of {0} and no size was configured")]
    UnknownSize(PathBuf),

    #[error("fill of {path} failed: {source}")]
    Fill {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("agent rejected job: {0}")]
    Remote(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Agent connection failures. Fatal to the connection, never retried here.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decode: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    #[error("peer closed connection")]
    Closed,

    #[error("unexpected message: expected {expected}, got {got}")]
    Unexpected { expected: &'static str, got: String },

    #[error("protocol version mismatch: local {local}, remote {remote}")]
    Version { local: u32, remote: u32 },
}

/// Histogram merge of incompatible bucket layouts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistogramError {
    #[error("cannot merge histograms with different bucket layouts")]
    LayoutMismatch,
}
