//! CaptureEngine and the emitted `Record` schema.
//!
//! Binds one `Target` to a `CaptureSource`, one `Ring` per stream kind, the
//! dissector registry, and the credential scanner, and drives bytes from
//! the source through extraction, dissection, and scanning into a bounded
//! output channel of `Record`s. Emission style follows `JsonlHandler` /
//! `context::ContextStore::broadcaster`'s broadcast-channel pattern: the
//! engine never holds a lock while sending, and a full channel simply
//! drops the send — the output channel's send is the only place a task
//! may lose work, and that loss is counted in the stats snapshot.

use crate::capture::{CaptureSource, SyscallTraceSource};
use crate::config::ProbeOptions;
use crate::dissect::Registry;
use crate::error::{ProbeError, ProbeResult};
use crate::extractor::{self, ExtractorConfig};
use crate::model::{
    CaptureStats, CaptureStatsSnapshot, Event, StreamKind, Target, Vulnerability,
};
use crate::ring::Ring;
use crate::scanner::CredentialScanner;
use crate::boundary::AutoDetect;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// One emitted structured-log record. Serialized one-per-line by
/// the `procwatch-cli` log writer; the terminal view consumes the same
/// values directly.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Start {
        timestamp: DateTime<Utc>,
        target: Target,
        config: ProbeOptions,
    },
    Activity {
        timestamp: DateTime<Utc>,
        target: Target,
        stream: StreamKind,
        preview: String,
        byte_count: usize,
    },
    Vulnerability {
        timestamp: DateTime<Utc>,
        target: Target,
        vulnerability: Vulnerability,
    },
    Error {
        timestamp: DateTime<Utc>,
        target: Target,
        message: String,
    },
    Stop {
        timestamp: DateTime<Utc>,
        target: Target,
        stats: CaptureStatsSnapshot,
        reason: String,
    },
}

/// Preview sanitization: printable ASCII passes through, the
/// three common whitespace controls become two-character escapes,
/// everything else becomes `.`; truncates with an ellipsis past `max_len`
/// input bytes.
pub fn sanitize_preview(bytes: &[u8], max_len: usize) -> String {
    let truncated = bytes.len() > max_len;
    let slice = &bytes[..bytes.len().min(max_len)];
    let mut out = String::with_capacity(slice.len());
    for &b in slice {
        match b {
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push('.'),
        }
    }
    if truncated {
        out.push_str("...");
    }
    out
}

const ACTIVITY_PREVIEW_LEN: usize = 200;

/// DirectFD is judged insufficient as soon as either independent signal
/// fires — whichever comes first. Fixed at 3
/// consecutive zero-byte drains within a 200ms observation window, or every
/// still-open stream resolving to a `/dev/pts/*` target.
const ZERO_DRAIN_TRIGGER_COUNT: u64 = 3;
const ZERO_DRAIN_WINDOW_MS: u64 = 200;

pub struct CaptureEngine {
    target: Target,
    options: ProbeOptions,
    rings: HashMap<StreamKind, Arc<Ring>>,
    stats: Arc<CaptureStats>,
    dissectors: Arc<Registry>,
    scanner: Arc<CredentialScanner>,
    filters: Vec<Regex>,
    output_tx: mpsc::Sender<Record>,
}

const STREAM_KINDS: [StreamKind; 4] = [
    StreamKind::Input,
    StreamKind::Output,
    StreamKind::Diagnostic,
    StreamKind::Unknown,
];

impl CaptureEngine {
    pub fn new(
        target: Target,
        options: ProbeOptions,
        output_tx: mpsc::Sender<Record>,
    ) -> ProbeResult<Self> {
        let stats = Arc::new(CaptureStats::default());
        let capacity = options.ring_capacity();
        let mut rings = HashMap::new();
        for kind in STREAM_KINDS {
            rings.insert(kind, Arc::new(Ring::new(capacity, kind, Arc::clone(&stats))));
        }

        let filters = options
            .filter
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    ProbeError::Config(format!("invalid filter regex {pattern:?}: {e}"))
                })
            })
            .collect::<ProbeResult<Vec<_>>>()?;

        Ok(Self {
            target,
            options,
            rings,
            stats,
            dissectors: Arc::new(Registry::new()),
            scanner: Arc::new(CredentialScanner::new()),
            filters,
            output_tx,
        })
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    fn passes_filter(&self, bytes: &[u8]) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        let text = String::from_utf8_lossy(bytes);
        self.filters.iter().any(|r| r.is_match(&text))
    }

    /// Drives the full pipeline until cancelled, the duration deadline
    /// passes, or the source reports a terminal condition. Returns the
    /// final stats snapshot (also published in the `Stop` record).
    pub async fn run(
        mut self,
        mut source: Box<dyn CaptureSource + Send>,
        mut cancel: watch::Receiver<bool>,
    ) -> CaptureStatsSnapshot {
        if let Err(e) = source.attach(&self.target) {
            let _ = self.output_tx.try_send(Record::Error {
                timestamp: Utc::now(),
                target: self.target.clone(),
                message: e.to_string(),
            });
            let _ = self.output_tx.try_send(Record::Stop {
                timestamp: Utc::now(),
                target: self.target.clone(),
                stats: self.stats.snapshot(),
                reason: e.to_string(),
            });
            return self.stats.snapshot();
        }

        let _ = self.output_tx.try_send(Record::Start {
            timestamp: Utc::now(),
            target: self.target.clone(),
            config: self.options.clone(),
        });

        let (event_tx, mut event_rx) = mpsc::channel::<Event>(1024);
        let detector = Arc::new(AutoDetect::new());
        let mut extractor_handles = Vec::new();
        for ring in self.rings.values() {
            let handle = tokio::spawn(extractor::run(
                Arc::clone(ring),
                Arc::clone(&detector),
                event_tx.clone(),
                ExtractorConfig::default(),
                cancel.clone(),
            ));
            extractor_handles.push(handle);
        }
        drop(event_tx);

        let rings_for_producer = self.rings.clone();
        let poll_interval = self.options.poll_interval;
        let enable_strace = self.options.enable_strace;
        let target_for_producer = self.target.clone();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let producer_stop = Arc::clone(&stop_flag);
        let producer = tokio::task::spawn_blocking(move || {
            producer_loop(
                source,
                target_for_producer,
                rings_for_producer,
                poll_interval,
                enable_strace,
                producer_stop,
            )
        });
        tokio::pin!(producer);

        let deadline = self.options.duration.map(|d| tokio::time::Instant::now() + d);
        let mut stop_reason = "cancelled".to_string();
        let mut producer_done = false;

        'outer: loop {
            if *cancel.borrow() {
                stop_reason = "cancelled".to_string();
                break;
            }

            let deadline_sleep = async {
                match deadline {
                    Some(d) => tokio::time::sleep_until(d).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                maybe_event = event_rx.recv() => {
                    match maybe_event {
                        Some(event) => self.handle_event(event),
                        None => {
                            if producer_done {
                                stop_reason = "streams drained".to_string();
                                break 'outer;
                            }
                        }
                    }
                }
                res = &mut producer, if !producer_done => {
                    producer_done = true;
                    match res {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            stop_reason = e.to_string();
                            let _ = self.output_tx.try_send(Record::Error {
                                timestamp: Utc::now(),
                                target: self.target.clone(),
                                message: e.to_string(),
                            });
                            break 'outer;
                        }
                        Err(_join_err) => {
                            stop_reason = "capture source task panicked".to_string();
                            break 'outer;
                        }
                    }
                }
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        stop_reason = "cancelled".to_string();
                        break 'outer;
                    }
                }
                _ = deadline_sleep => {
                    stop_reason = "duration reached".to_string();
                    break 'outer;
                }
            }
        }

        stop_flag.store(true, Ordering::Relaxed);
        for ring in self.rings.values() {
            ring.close();
        }
        for handle in extractor_handles {
            let _ = handle.await;
        }
        if !producer_done {
            let _ = producer.await;
        }

        let stats_snapshot = self.stats.snapshot();
        let _ = self.output_tx.try_send(Record::Stop {
            timestamp: Utc::now(),
            target: self.target.clone(),
            stats: stats_snapshot.clone(),
            reason: stop_reason,
        });
        stats_snapshot
    }

    fn handle_event(&self, event: Event) {
        self.stats.record_frame();

        let text = String::from_utf8_lossy(&event.bytes).into_owned();
        let credentials = self.scanner.hunt(&text);
        let (_, vulns) = self.dissectors.process(&event, &credentials, &self.target);

        let passes = self.passes_filter(&event.bytes);

        if passes {
            if self.options.show_activity {
                let preview = sanitize_preview(&event.bytes, ACTIVITY_PREVIEW_LEN);
                let _ = self.output_tx.try_send(Record::Activity {
                    timestamp: event.timestamp,
                    target: self.target.clone(),
                    stream: event.stream,
                    preview,
                    byte_count: event.bytes.len(),
                });
            }
            for v in vulns {
                self.stats.record_vulnerability();
                let _ = self.output_tx.try_send(Record::Vulnerability {
                    timestamp: v.timestamp,
                    target: self.target.clone(),
                    vulnerability: v,
                });
            }
        } else {
            // Filtered out of emission, but accounting still reflects
            // truth.
            for _ in &vulns {
                self.stats.record_vulnerability();
            }
        }
    }
}

/// Drives one target's source until stopped, switching DirectFD to
/// SyscallTrace mid-run when the operator opted in and the pty-fallback
/// condition holds. The switch is keyed only off the
/// `CaptureSource::stats()` surface so it works for any source
/// implementation the caller hands in, not just `DirectFdSource`.
fn producer_loop(
    mut source: Box<dyn CaptureSource + Send>,
    target: Target,
    rings: HashMap<StreamKind, Arc<Ring>>,
    poll_interval: Duration,
    enable_strace: bool,
    stop: Arc<AtomicBool>,
) -> ProbeResult<()> {
    let mut switched_to_trace = false;
    let result = loop {
        if stop.load(Ordering::Relaxed) {
            break Ok(());
        }
        match source.drain() {
            Ok(chunks) => {
                for chunk in chunks {
                    if let Some(ring) = rings.get(&chunk.stream) {
                        ring.write(&chunk.bytes);
                    }
                }
                if source.is_stopped() {
                    break Ok(());
                }

                if !switched_to_trace && enable_strace {
                    let stats = source.stats();
                    let elapsed_ms = stats.drains_with_no_data * poll_interval.as_millis() as u64;
                    let zero_drain_trigger = stats.drains_with_no_data >= ZERO_DRAIN_TRIGGER_COUNT
                        && elapsed_ms <= ZERO_DRAIN_WINDOW_MS;
                    if zero_drain_trigger || stats.all_streams_are_pty {
                        switched_to_trace = true;
                        let mut trace = SyscallTraceSource::new();
                        if trace.attach(&target).is_ok() {
                            source.detach();
                            source = Box::new(trace);
                        }
                        // else: strace unavailable at this moment, stay on
                        // DirectFD and don't retry the switch again.
                    }
                }
            }
            Err(e) => break Err(e),
        }
        std::thread::sleep(poll_interval);
    };
    source.detach();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_preview_escapes_and_dots() {
        let preview = sanitize_preview(b"hi\tthere\x01\n", 100);
        assert_eq!(preview, "hi\\tthere.\\n");
    }

    #[test]
    fn sanitize_preview_truncates_with_ellipsis() {
        let preview = sanitize_preview(b"abcdefgh", 4);
        assert_eq!(preview, "abcd...");
    }

    #[tokio::test]
    async fn engine_emits_start_and_stop_even_when_attach_fails() {
        use crate::capture::{CaptureSource, DrainedChunk, SourceStats};
        use crate::model::Target;

        struct AlwaysFails;
        impl CaptureSource for AlwaysFails {
            fn attach(&mut self, target: &Target) -> ProbeResult<()> {
                Err(ProbeError::TargetNotFound(target.pid.to_string()))
            }
            fn drain(&mut self) -> ProbeResult<Vec<DrainedChunk>> {
                Ok(Vec::new())
            }
            fn detach(&mut self) {}
            fn stats(&self) -> SourceStats {
                SourceStats::default()
            }
        }

        let (tx, mut rx) = mpsc::channel(16);
        let target = Target::new(999999, "nope".to_string());
        let options = ProbeOptions::new("nope");
        let engine = CaptureEngine::new(target, options, tx).unwrap();
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        engine.run(Box::new(AlwaysFails), cancel_rx).await;

        let mut saw_error = false;
        let mut saw_stop = false;
        while let Ok(record) = rx.try_recv() {
            match record {
                Record::Error { .. } => saw_error = true,
                Record::Stop { .. } => saw_stop = true,
                _ => {}
            }
        }
        assert!(saw_error);
        assert!(saw_stop);
    }
}
