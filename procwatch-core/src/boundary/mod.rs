//! BoundaryDetector family: pure functions that, given a byte slice, find
//! the end of one complete protocol-aligned message.

mod binary_frame;
mod http;
mod line;
mod rpc;
mod structured;

pub use binary_frame::BinaryFrameDetector;
pub use http::HttpDetector;
pub use line::LineDetector;
pub use rpc::RpcDetector;
pub use structured::StructuredDetector;

use crate::model::Protocol;

/// Result of one `detect` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryStatus {
    /// A complete message was found; size is `message_size` bytes starting
    /// at the detector's input offset.
    Found { message_size: usize },
    /// Not enough data yet to decide.
    NeedMore,
    /// The byte stream cannot be parsed as this protocol.
    Invalid,
}

/// A protocol-specific message-boundary detector.
///
/// Implementations are zero-state structs (no base-class state is shared,
/// per the Design Notes' "interface polymorphism over inheritance"
/// guidance); each is registered into an ordered list by the auto-detect
/// wrapper below.
pub trait BoundaryDetector: Send + Sync {
    /// The protocol tag this detector recognizes.
    fn protocol(&self) -> Protocol;

    /// Detects one message at the start of `bytes`. Implementations must
    /// never panic and must return `NeedMore` rather than guess on a short
    /// prefix of an otherwise-valid message.
    fn detect(&self, bytes: &[u8]) -> BoundaryStatus;

    /// Smallest number of bytes that could possibly form a complete
    /// message for this protocol.
    fn min_message_size(&self) -> usize {
        1
    }

    /// Largest message size this detector will accept before declaring the
    /// stream `Invalid` rather than `NeedMore`.
    fn max_message_size(&self) -> usize {
        4 * 1024 * 1024
    }
}

/// Tries each detector in decreasing order of specificity and returns the
/// first `Found`. Falls back to `NeedMore` if none match yet, since the
/// line detector never itself returns `Invalid`.
pub struct AutoDetect {
    detectors: Vec<Box<dyn BoundaryDetector>>,
}

impl Default for AutoDetect {
    fn default() -> Self {
        Self::new()
    }
}

impl AutoDetect {
    pub fn new() -> Self {
        Self {
            detectors: vec![
                Box::new(HttpDetector),
                Box::new(RpcDetector::default()),
                Box::new(BinaryFrameDetector::default()),
                Box::new(StructuredDetector),
                Box::new(LineDetector::default()),
            ],
        }
    }

    /// Returns `(protocol, message_size)` for the first detector to find a
    /// complete message, or `None` if every detector needs more data.
    pub fn detect(&self, bytes: &[u8]) -> Option<(Protocol, usize)> {
        for d in &self.detectors {
            if let BoundaryStatus::Found { message_size } = d.detect(bytes) {
                return Some((d.protocol(), message_size));
            }
        }
        None
    }
}
