//! Core data model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// A process designator: unique identifier plus captured command line and
/// attach timestamp. Created at discovery, destroyed when the Supervisor
/// stops the associated engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Target {
    pub pid: i32,
    pub command_line: String,
    pub attached_at: chrono::DateTime<chrono::Utc>,
}

impl Target {
    pub fn new(pid: i32, command_line: impl Into<String>) -> Self {
        Self {
            pid,
            command_line: command_line.into(),
            attached_at: chrono::Utc::now(),
        }
    }
}

/// Logical classification of a byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Input,
    Output,
    Diagnostic,
    Unknown,
}

impl StreamKind {
    /// Maps a raw file descriptor index to its logical stream kind.
    pub fn from_fd(fd: i32) -> Self {
        match fd {
            0 => StreamKind::Input,
            1 => StreamKind::Output,
            2 => StreamKind::Diagnostic,
            _ => StreamKind::Unknown,
        }
    }
}

/// Protocol tag assigned by a `BoundaryDetector`/`Dissector`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Http,
    LengthPrefixedRpc,
    BinaryFramed,
    Structured,
    Sql,
    PlainText,
}

/// A complete framed message extracted from a `Ring`. Opaque bytes plus the
/// metadata the extraction loop had on hand; consumed by the dissection
/// pipeline and dropped once downstream consumers have acknowledged it
/// (channel-drop semantics — there is no explicit destructor).
#[derive(Debug, Clone)]
pub struct Event {
    pub bytes: Vec<u8>,
    pub protocol: Protocol,
    pub frame_type: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub stream_offset: u64,
    pub stream: StreamKind,
}

/// The semantic type carried by one dissected field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Bytes(Vec<u8>),
    Map(BTreeMap<String, FieldValue>),
    List(Vec<FieldValue>),
}

/// A dissected `Event`: protocol tag, flattened field map, and a reference
/// back to the original bytes for scanners that want raw access.
#[derive(Debug, Clone)]
pub struct Frame {
    pub protocol: Protocol,
    pub frame_type: String,
    pub fields: BTreeMap<String, FieldValue>,
    pub raw: Vec<u8>,
    pub stream: StreamKind,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub session_id: Option<String>,
}

impl Frame {
    pub fn field_str(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(FieldValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Error produced when a dissector cannot parse an identified-as-matching
/// message. Never a panic; the Event is still routed to the generic
/// credential scan path.
#[derive(Debug, thiserror::Error)]
#[error("dissection failed for {protocol:?}: {reason}")]
pub struct DissectionError {
    pub protocol: Protocol,
    pub reason: String,
}

/// Severity shared by `Credential` and `Vulnerability` findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A secret/credential pattern class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialClass {
    DatabasePassword,
    ApiKey,
    Jwt,
    PrivateKey,
    PaymentCard,
    BearerToken,
    SshPublicKey,
    GenericSecret,
}

/// One credential finding from `CredentialScanner::hunt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub class: CredentialClass,
    #[serde(skip_serializing)]
    pub value: String,
    pub redacted: String,
    pub confidence: f32,
    pub severity: Severity,
}

/// Vulnerability type, grouped by the dissector family that can emit it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnerabilityKind {
    pub vuln_type: String,
    pub subtype: String,
}

/// One finding from a `VulnDetector`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub severity: Severity,
    pub kind: VulnerabilityKind,
    pub evidence: String,
    pub stream: StreamKind,
    pub excerpt: String,
    pub confidence: f32,
    pub target: Target,
}

impl Vulnerability {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }
}

/// An ordered list of frames sharing a session correlation id, used only by
/// cross-frame vulnerability checks.
#[derive(Debug, Default)]
pub struct Session {
    pub correlation_id: String,
    pub frames: Vec<Frame>,
}

/// Per-target capture statistics. Monotonic; read by external consumers
/// (terminal view, log writer) via `snapshot()`.
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub bytes_observed: [AtomicU64; 4],
    pub bytes_dropped: [AtomicU64; 4],
    pub frames_emitted: AtomicU64,
    pub vulnerabilities_found: AtomicU64,
    pub last_activity_millis: AtomicU64,
}

fn stream_index(stream: StreamKind) -> usize {
    match stream {
        StreamKind::Input => 0,
        StreamKind::Output => 1,
        StreamKind::Diagnostic => 2,
        StreamKind::Unknown => 3,
    }
}

impl CaptureStats {
    pub fn record_observed(&self, stream: StreamKind, n: u64) {
        self.bytes_observed[stream_index(stream)].fetch_add(n, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_dropped(&self, stream: StreamKind, n: u64) {
        self.bytes_dropped[stream_index(stream)].fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_frame(&self) {
        self.frames_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_vulnerability(&self) {
        self.vulnerabilities_found.fetch_add(1, Ordering::Relaxed);
    }

    fn touch(&self) {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        self.last_activity_millis.store(now, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            bytes_observed: StreamCounts::from_array(&self.bytes_observed),
            bytes_dropped: StreamCounts::from_array(&self.bytes_dropped),
            frames_emitted: self.frames_emitted.load(Ordering::Relaxed),
            vulnerabilities_found: self.vulnerabilities_found.load(Ordering::Relaxed),
            last_activity_millis: self.last_activity_millis.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamCounts {
    pub input: u64,
    pub output: u64,
    pub diagnostic: u64,
    pub unknown: u64,
}

impl StreamCounts {
    fn from_array(a: &[AtomicU64; 4]) -> Self {
        Self {
            input: a[0].load(Ordering::Relaxed),
            output: a[1].load(Ordering::Relaxed),
            diagnostic: a[2].load(Ordering::Relaxed),
            unknown: a[3].load(Ordering::Relaxed),
        }
    }
}

/// A serializable point-in-time snapshot of `CaptureStats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureStatsSnapshot {
    pub bytes_observed: StreamCounts,
    pub bytes_dropped: StreamCounts,
    pub frames_emitted: u64,
    pub vulnerabilities_found: u64,
    pub last_activity_millis: u64,
}
