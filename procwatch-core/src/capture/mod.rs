//! CaptureSource variants: a uniform attach/drain/detach/stats surface
//! over two very different byte-origin strategies. `CaptureEngine` talks
//! only to this trait; mode selection lives in `engine.rs`, not here.

mod direct_fd;
mod syscall_trace;

pub use direct_fd::DirectFdSource;
pub use syscall_trace::SyscallTraceSource;

use crate::error::ProbeResult;
use crate::model::{StreamKind, Target};

/// One drained chunk of bytes, already classified by stream.
#[derive(Debug, Clone)]
pub struct DrainedChunk {
    pub stream: StreamKind,
    pub bytes: Vec<u8>,
}

/// Per-source accounting exposed to the engine for mode-selection and
/// stop-record reasons. Distinct from `CaptureStats` (which is per-Ring);
/// this is "is the source itself still healthy".
#[derive(Debug, Clone, Default)]
pub struct SourceStats {
    pub drains_with_no_data: u64,
    pub all_streams_are_pty: bool,
    pub stopped_reason: Option<String>,
}

/// Uniform surface over DirectFD and SyscallTrace.
pub trait CaptureSource: Send {
    fn attach(&mut self, target: &Target) -> ProbeResult<()>;

    /// Non-blocking: returns whatever bytes are newly available across all
    /// streams. Never blocks waiting for more. An empty return is not an
    /// error — it's the normal "nothing happened this poll" case.
    fn drain(&mut self) -> ProbeResult<Vec<DrainedChunk>>;

    fn detach(&mut self);

    fn stats(&self) -> SourceStats;

    /// Whether this source has decided to stop itself (trace byte/rate cap,
    /// or all streams closed). The engine checks this each poll instead of
    /// treating it as a terminal error — §7: "does not propagate to the
    /// Supervisor as a crash".
    fn is_stopped(&self) -> bool {
        self.stats().stopped_reason.is_some()
    }
}
