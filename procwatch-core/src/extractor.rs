//! The dedicated per-Ring extractor task.
//!
//! Runs on a self-adjusting tick: starts at 1ms, doubles up to 50ms when a
//! tick finds nothing new, and resets to 1ms the moment bytes show up
//! again.

use crate::boundary::AutoDetect;
use crate::model::Event;
use crate::ring::Ring;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const MIN_TICK: Duration = Duration::from_millis(1);
const MAX_TICK: Duration = Duration::from_millis(50);

pub struct ExtractorConfig {
    pub max_event_size: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            max_event_size: 1024 * 1024,
        }
    }
}

/// Drives one Ring's extraction loop until `cancel` fires and the ring
/// drains, or the ring is closed and empty.
pub async fn run(
    ring: Arc<Ring>,
    detector: Arc<AutoDetect>,
    event_tx: mpsc::Sender<Event>,
    config: ExtractorConfig,
    mut cancel: watch::Receiver<bool>,
) {
    let mut tick = MIN_TICK;
    loop {
        if *cancel.borrow() && ring.is_closed() && ring.unread_len() == 0 {
            return;
        }

        let base_offset = ring.read_offset();
        let window = ring.peek_unread();
        let mut parsed = 0usize;
        let mut found_any = false;

        loop {
            let remaining = &window[parsed..];
            if remaining.is_empty() {
                break;
            }
            match detector.detect(remaining) {
                Some((protocol, size)) => {
                    let bytes = remaining[..size].to_vec();
                    let event = Event {
                        bytes,
                        protocol,
                        frame_type: String::new(),
                        timestamp: chrono::Utc::now(),
                        stream_offset: base_offset + parsed as u64,
                        stream: ring.stream(),
                    };
                    if event_tx.try_send(event).is_err() {
                        ring.record_channel_drop(size as u64);
                    }
                    parsed += size;
                    found_any = true;
                }
                None => {
                    if remaining.len() > config.max_event_size {
                        ring.record_channel_drop(remaining.len() as u64);
                        parsed = window.len();
                        found_any = true;
                    }
                    break;
                }
            }
        }

        if parsed > 0 {
            ring.advance_read(parsed);
        }

        if found_any {
            tick = MIN_TICK;
        } else {
            tick = (tick * 2).min(MAX_TICK);
        }

        tokio::select! {
            _ = tokio::time::sleep(tick) => {}
            _ = cancel.changed() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CaptureStats, StreamKind};

    #[tokio::test(flavor = "multi_thread")]
    async fn extracts_line_delimited_events_in_order() {
        let ring = Arc::new(Ring::new(
            4096,
            StreamKind::Output,
            Arc::new(CaptureStats::default()),
        ));
        let (tx, mut rx) = mpsc::channel(16);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let ring_clone = Arc::clone(&ring);
        let handle = tokio::spawn(run(
            ring_clone,
            Arc::new(AutoDetect::new()),
            tx,
            ExtractorConfig::default(),
            cancel_rx,
        ));

        ring.write(b"line one\nline two\n");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.bytes, b"line one\n");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.bytes, b"line two\n");
        assert!(second.stream_offset > first.stream_offset);

        cancel_tx.send(true).unwrap();
        ring.close();
        let _ = handle.await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn four_events_delivered_with_slow_consumer() {
        let ring = Arc::new(Ring::new(
            4096,
            StreamKind::Output,
            Arc::new(CaptureStats::default()),
        ));
        let (tx, mut rx) = mpsc::channel(16);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let ring_clone = Arc::clone(&ring);
        let handle = tokio::spawn(run(
            ring_clone,
            Arc::new(AutoDetect::new()),
            tx,
            ExtractorConfig::default(),
            cancel_rx,
        ));

        for i in 0..4u8 {
            let mut payload = vec![b'a' + i; 2000];
            payload.push(b'\n');
            ring.write(&payload);
        }

        for _ in 0..4 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.bytes.len(), 2001);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let snap = ring.stats();
        assert_eq!(snap.bytes_dropped.output, 0);

        cancel_tx.send(true).unwrap();
        ring.close();
        let _ = handle.await;
    }
}

