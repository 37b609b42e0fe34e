//! Error kinds for the capture pipeline.
//!
//! Only `Terminal` errors are ever propagated as a `Result::Err` out of a
//! running engine — they halt that target's engine and are surfaced to the
//! `Supervisor`, which continues other targets. Transient conditions (a poll
//! returned no data), data-quality conditions (a well-identified protocol
//! failed to dissect), and bounded-loss conditions (ring-full / channel-full
//! drops) are never returned as errors; they are absorbed into counters or
//! routed to the generic scan path, matching §7 "Propagation".

use std::path::PathBuf;
use thiserror::Error;

/// Terminal errors: the only error kind that actually halts a `CaptureEngine`.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("target process {0} not found")]
    TargetNotFound(String),

    #[error("target process {pid} vanished during attach")]
    TargetVanished { pid: i32 },

    #[error("permission denied attaching to pid {pid}: {source}")]
    PermissionDenied { pid: i32, source: std::io::Error },

    #[error("strace not found on PATH; pass --enable-strace only when installed")]
    TraceToolMissing,

    #[error("trace source for pid {pid} exceeded its byte cap ({cap} bytes)")]
    TraceByteCapReached { pid: i32, cap: u64 },

    #[error("trace source for pid {pid} exceeded its rate cap")]
    TraceRateCapReached { pid: i32 },

    #[error("failed to open output log at {path}: {source}")]
    OutputOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no target matched {0:?}")]
    NoMatchingTarget(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type ProbeResult<T> = Result<T, ProbeError>;
