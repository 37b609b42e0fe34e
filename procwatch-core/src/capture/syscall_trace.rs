//! SyscallTrace capture source: observes read/write/recv/send via an
//! external `strace` process when DirectFD capture is insufficient (e.g.
//! the target's streams are bound to a pseudo-terminal).
//!
//! Follows the pattern of shelling out to a well-known tool located via
//! `which` and parsing its line-oriented stdout in a dedicated reader
//! thread (mirrors the `runtime` module's perf-buffer reader loop
//! structure: one thread blocked on a blocking read, forwarding parsed
//! records through a channel to the non-blocking consumer side).

use super::{CaptureSource, DrainedChunk, SourceStats};
use crate::error::{ProbeError, ProbeResult};
use crate::model::{StreamKind, Target};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::{Duration, Instant};

/// Bytes captured per call are bounded by strace's `-s` string-size limit.
const TRACE_STRING_WIDTH: usize = 4096;
/// Total bytes this source will capture before stopping itself.
const DEFAULT_BYTE_CAP: u64 = 16 * 1024 * 1024;
/// Maximum trace lines accepted within `RATE_WINDOW` before stopping.
const DEFAULT_RATE_CAP: u32 = 20_000;
const RATE_WINDOW: Duration = Duration::from_secs(1);

static TRACE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?:\[pid\s+\d+\]\s+)?(read|write|recv|send|recvfrom|sendto)\((\d+),\s*"((?:[^"\\]|\\.)*)".*\)\s*=\s*(-?\d+)"#)
        .unwrap()
});

pub struct TraceRecord {
    pub stream: StreamKind,
    pub bytes: Vec<u8>,
}

pub struct SyscallTraceSource {
    pid: i32,
    child: Option<Child>,
    rx: Option<Receiver<TraceRecord>>,
    total_bytes: u64,
    recent_lines: Vec<Instant>,
    stats: SourceStats,
}

impl SyscallTraceSource {
    pub fn new() -> Self {
        Self {
            pid: 0,
            child: None,
            rx: None,
            total_bytes: 0,
            recent_lines: Vec::new(),
            stats: SourceStats::default(),
        }
    }

    fn record_rate(&mut self) -> bool {
        let now = Instant::now();
        self.recent_lines.retain(|t| now.duration_since(*t) < RATE_WINDOW);
        self.recent_lines.push(now);
        self.recent_lines.len() as u32 > DEFAULT_RATE_CAP
    }
}

impl Default for SyscallTraceSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for SyscallTraceSource {
    fn attach(&mut self, target: &Target) -> ProbeResult<()> {
        let strace_path = which::which("strace").map_err(|_| ProbeError::TraceToolMissing)?;

        let mut child = Command::new(strace_path)
            .args([
                "-f",
                "-e",
                "trace=read,write,recv,send,recvfrom,sendto",
                "-s",
                &TRACE_STRING_WIDTH.to_string(),
                "-xx",
                "-p",
                &target.pid.to_string(),
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProbeError::PermissionDenied {
                pid: target.pid,
                source: e,
            })?;

        let stderr = child.stderr.take().ok_or_else(|| {
            ProbeError::Config("strace child produced no stderr pipe".to_string())
        })?;

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.lines().map_while(Result::ok) {
                if let Some((stream, bytes)) = parse_trace_line(&line) {
                    if tx.send(TraceRecord { stream, bytes }).is_err() {
                        break;
                    }
                }
            }
        });

        self.pid = target.pid;
        self.child = Some(child);
        self.rx = Some(rx);
        Ok(())
    }

    fn drain(&mut self) -> ProbeResult<Vec<DrainedChunk>> {
        let Some(rx) = self.rx.as_ref() else {
            return Ok(Vec::new());
        };

        let mut chunks = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(record) => {
                    if self.record_rate() {
                        self.stats.stopped_reason =
                            Some("trace rate cap reached".to_string());
                        return Err(ProbeError::TraceRateCapReached { pid: self.pid });
                    }
                    self.total_bytes += record.bytes.len() as u64;
                    if self.total_bytes > DEFAULT_BYTE_CAP {
                        self.stats.stopped_reason = Some("trace byte cap reached".to_string());
                        return Err(ProbeError::TraceByteCapReached {
                            pid: self.pid,
                            cap: DEFAULT_BYTE_CAP,
                        });
                    }
                    chunks.push(DrainedChunk {
                        stream: record.stream,
                        bytes: record.bytes,
                    });
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.stats.stopped_reason = Some("trace process exited".to_string());
                    break;
                }
            }
        }
        Ok(chunks)
    }

    fn detach(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.rx = None;
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}

fn parse_trace_line(line: &str) -> Option<(StreamKind, Vec<u8>)> {
    let caps = TRACE_LINE.captures(line)?;
    let syscall = &caps[1];
    let fd: i32 = caps[2].parse().ok()?;
    let decoded = decode_trace_escapes(&caps[3]);

    let stream = match syscall {
        "read" | "recv" | "recvfrom" => StreamKind::from_fd(fd),
        "write" | "send" | "sendto" => StreamKind::from_fd(fd),
        _ => StreamKind::Unknown,
    };
    Some((stream, decoded))
}

/// Decodes the C-style escape sequences `strace` emits in its quoted
/// string arguments: `\n`, `\r`, `\t`, `\\`, `\"`, `\xNN` hex, and `\NNN`
/// octal.
pub fn decode_trace_escapes(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 >= bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        match bytes[i + 1] {
            b'n' => {
                out.push(b'\n');
                i += 2;
            }
            b'r' => {
                out.push(b'\r');
                i += 2;
            }
            b't' => {
                out.push(b'\t');
                i += 2;
            }
            b'\\' => {
                out.push(b'\\');
                i += 2;
            }
            b'"' => {
                out.push(b'"');
                i += 2;
            }
            b'x' if i + 4 <= bytes.len() => {
                if let Some(hex) = text.get(i + 2..i + 4) {
                    if let Ok(byte) = u8::from_str_radix(hex, 16) {
                        out.push(byte);
                        i += 4;
                        continue;
                    }
                }
                out.push(bytes[i]);
                i += 1;
            }
            d if d.is_ascii_digit() => {
                let end = (i + 2..bytes.len().min(i + 4))
                    .take_while(|&j| bytes[j].is_ascii_digit())
                    .last()
                    .map(|j| j + 1)
                    .unwrap_or(i + 2);
                if let Some(oct) = text.get(i + 1..end) {
                    if let Ok(byte) = u8::from_str_radix(oct, 8) {
                        out.push(byte);
                        i = end;
                        continue;
                    }
                }
                out.push(bytes[i]);
                i += 1;
            }
            _ => {
                out.push(bytes[i]);
                i += 1;
            }
        }
    }
    out
}

/// Inverse of `decode_trace_escapes` for the escape classes it handles,
/// used only by the round-trip test.
pub fn encode_trace_escapes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            0x20..=0x7e => out.push(b as char),
            other => out.push_str(&format!("\\x{other:02x}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_newline_and_quote_escapes() {
        let decoded = decode_trace_escapes(r#"hello\nworld\"quoted\""#);
        assert_eq!(decoded, b"hello\nworld\"quoted\"");
    }

    #[test]
    fn decodes_hex_escape() {
        let decoded = decode_trace_escapes(r"\x41\x42");
        assert_eq!(decoded, b"AB");
    }

    #[test]
    fn decodes_octal_escape() {
        let decoded = decode_trace_escapes(r"\101\102");
        assert_eq!(decoded, b"AB");
    }

    #[test]
    fn encode_then_decode_is_identity() {
        let original: &[u8] = b"line one\r\nline \"two\"\twith tab and a \\backslash";
        let encoded = encode_trace_escapes(original);
        let decoded = decode_trace_escapes(&encoded);
        assert_eq!(decoded, original);
    }

    #[test]
    fn parses_a_read_trace_line() {
        let line = r#"read(0, "GET / HTTP/1.1\r\n", 1024) = 16"#;
        let (stream, bytes) = parse_trace_line(line).expect("should parse");
        assert_eq!(stream, StreamKind::Input);
        assert_eq!(bytes, b"GET / HTTP/1.1\r\n");
    }
}
