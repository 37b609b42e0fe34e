//! DirectFD capture source: reads the three well-known descriptor paths
//! under `/proc/<pid>/fd/*` non-blockingly.
//!
//! Follows `enforcement::safety`'s pattern of checking a live pid via the
//! process table before acting on it, generalized here from "is this pid
//! safe to signal" to "is this pid still attached".

use super::{CaptureSource, DrainedChunk, SourceStats};
use crate::error::{ProbeError, ProbeResult};
use crate::model::{StreamKind, Target};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::os::unix::fs::OpenOptionsExt;

const STREAM_FDS: [(i32, StreamKind); 3] = [
    (0, StreamKind::Input),
    (1, StreamKind::Output),
    (2, StreamKind::Diagnostic),
];

struct StreamHandle {
    kind: StreamKind,
    file: Option<File>,
    closed: bool,
}

pub struct DirectFdSource {
    pid: i32,
    streams: Vec<StreamHandle>,
    stats: SourceStats,
    consecutive_empty_drains: u32,
}

impl DirectFdSource {
    pub fn new() -> Self {
        Self {
            pid: 0,
            streams: Vec::new(),
            stats: SourceStats::default(),
            consecutive_empty_drains: 0,
        }
    }

    fn open_stream(pid: i32, fd: i32) -> std::io::Result<File> {
        std::fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(format!("/proc/{pid}/fd/{fd}"))
    }

    /// True once every still-open stream resolves to a pseudo-terminal
    /// device — the signal that DirectFD alone can't see session-level
    /// framing and a trace-based source should take over.
    fn all_open_streams_are_pty(&self) -> bool {
        let open: Vec<&StreamHandle> = self.streams.iter().filter(|s| !s.closed).collect();
        if open.is_empty() {
            return false;
        }
        open.iter().all(|s| {
            std::fs::read_link(format!("/proc/{}/fd/{}", self.pid, fd_index(s.kind)))
                .map(|target| target.to_string_lossy().starts_with("/dev/pts/"))
                .unwrap_or(false)
        })
    }
}

fn fd_index(kind: StreamKind) -> i32 {
    match kind {
        StreamKind::Input => 0,
        StreamKind::Output => 1,
        StreamKind::Diagnostic => 2,
        StreamKind::Unknown => -1,
    }
}

impl Default for DirectFdSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for DirectFdSource {
    fn attach(&mut self, target: &Target) -> ProbeResult<()> {
        if procfs::process::Process::new(target.pid).is_err() {
            return Err(ProbeError::TargetNotFound(target.pid.to_string()));
        }
        self.pid = target.pid;
        self.streams.clear();
        for (fd, kind) in STREAM_FDS {
            match Self::open_stream(target.pid, fd) {
                Ok(file) => self.streams.push(StreamHandle {
                    kind,
                    file: Some(file),
                    closed: false,
                }),
                Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                    return Err(ProbeError::PermissionDenied {
                        pid: target.pid,
                        source: e,
                    });
                }
                Err(_) => {
                    // fd not present (already closed by the target) — track
                    // it as closed rather than failing the whole attach.
                    self.streams.push(StreamHandle {
                        kind,
                        file: None,
                        closed: true,
                    });
                }
            }
        }
        Ok(())
    }

    fn drain(&mut self) -> ProbeResult<Vec<DrainedChunk>> {
        if procfs::process::Process::new(self.pid).is_err() {
            return Err(ProbeError::TargetVanished { pid: self.pid });
        }

        let mut chunks = Vec::new();
        let mut buf = [0u8; 16 * 1024];
        for handle in self.streams.iter_mut() {
            let Some(file) = handle.file.as_mut() else {
                continue;
            };
            loop {
                match file.read(&mut buf) {
                    Ok(0) => {
                        handle.closed = true;
                        break;
                    }
                    Ok(n) => {
                        chunks.push(DrainedChunk {
                            stream: handle.kind,
                            bytes: buf[..n].to_vec(),
                        });
                        if n < buf.len() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(_) => {
                        handle.closed = true;
                        break;
                    }
                }
            }
        }

        if chunks.is_empty() {
            self.consecutive_empty_drains += 1;
        } else {
            self.consecutive_empty_drains = 0;
        }
        self.stats.drains_with_no_data = self.consecutive_empty_drains as u64;
        self.stats.all_streams_are_pty = self.all_open_streams_are_pty();
        if self.streams.iter().all(|s| s.closed) {
            self.stats.stopped_reason = Some("all streams closed".to_string());
        }

        Ok(chunks)
    }

    fn detach(&mut self) {
        self.streams.clear();
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_rejects_nonexistent_pid() {
        let mut source = DirectFdSource::new();
        let target = Target::new(i32::MAX - 1, "nonexistent".to_string());
        let result = source.attach(&target);
        assert!(result.is_err());
    }

    #[test]
    fn fd_index_roundtrips_known_stream_kinds() {
        assert_eq!(fd_index(StreamKind::Input), 0);
        assert_eq!(fd_index(StreamKind::Output), 1);
        assert_eq!(fd_index(StreamKind::Diagnostic), 2);
    }
}
