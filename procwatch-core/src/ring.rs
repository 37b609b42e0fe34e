//! Lock-free per-stream byte buffer with event-boundary extraction.
//!
//! # Reservation protocol
//!
//! Producers never block. `write` claims a contiguous byte span with a
//! compare-and-swap on a `reserved` cursor, copies into that span, then
//! commits by advancing a separate `committed` cursor from the producer's
//! own starting offset — spin-waiting if an earlier reservation hasn't
//! committed yet. Readers only ever see bytes below `committed`, so no
//! reader observes a partially-copied span, independent of how many
//! producers are racing.
//!
//! This is the userspace analogue of the ticket-based commit protocol in
//! `runtime::sequencer` (kernel producers reserve tickets, the consumer
//! reads slots in strict ticket order), generalized here to also run the
//! ticket/reservation side in userspace since our producers are tokio tasks
//! reading a file descriptor or parsing trace output, not an eBPF ring
//! buffer. The cache-line separation of producer- and consumer-owned
//! atomics follows the same false-sharing concern documented in the
//! standalone `ringmpsc` SPSC ring (separate hot atomics for the
//! producer-facing and consumer-facing cursors).

use crate::model::{CaptureStats, StreamKind};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[repr(align(64))]
struct CacheAligned<T>(T);

/// Fixed-capacity lock-free byte ring. Capacity must be a power of two.
pub struct Ring {
    reserved: CacheAligned<AtomicU64>,
    committed: CacheAligned<AtomicU64>,
    read: CacheAligned<AtomicU64>,
    capacity: usize,
    mask: u64,
    buf: UnsafeCell<Box<[u8]>>,
    closed: AtomicBool,
    backpressure: AtomicBool,
    stream: StreamKind,
    stats: Arc<CaptureStats>,
}

// Safety: all access to `buf` is mediated by the reservation/commit/read
// cursors above, which guarantee disjoint producer spans and a
// committed-before-visible ordering for the single reader.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    pub fn new(capacity: usize, stream: StreamKind, stats: Arc<CaptureStats>) -> Self {
        assert!(capacity.is_power_of_two(), "Ring capacity must be power of two");
        Self {
            reserved: CacheAligned(AtomicU64::new(0)),
            committed: CacheAligned(AtomicU64::new(0)),
            read: CacheAligned(AtomicU64::new(0)),
            capacity,
            mask: (capacity - 1) as u64,
            buf: UnsafeCell::new(vec![0u8; capacity].into_boxed_slice()),
            closed: AtomicBool::new(false),
            backpressure: AtomicBool::new(false),
            stream,
            stats,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_backpressured(&self) -> bool {
        self.backpressure.load(Ordering::Relaxed)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reserves space, copies `bytes`, and commits. Never blocks: returns
    /// the number of bytes actually accepted (0..=bytes.len()); the
    /// remainder is accounted as dropped. A closed ring rejects all writes.
    pub fn write(&self, bytes: &[u8]) -> usize {
        if bytes.is_empty() {
            return 0;
        }
        if self.is_closed() {
            self.stats.record_dropped(self.stream, bytes.len() as u64);
            return 0;
        }

        let len = bytes.len() as u64;
        let start;
        let take;
        loop {
            let read_snapshot = self.read.0.load(Ordering::Acquire);
            let reserved_snapshot = self.reserved.0.load(Ordering::Relaxed);
            let in_flight = reserved_snapshot.saturating_sub(read_snapshot);
            let available = (self.capacity as u64).saturating_sub(in_flight);
            if available == 0 {
                self.stats.record_dropped(self.stream, len);
                return 0;
            }
            let claim = available.min(len);
            let new_reserved = reserved_snapshot + claim;
            if self
                .reserved
                .0
                .compare_exchange_weak(
                    reserved_snapshot,
                    new_reserved,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                start = reserved_snapshot;
                take = claim as usize;
                break;
            }
        }

        self.copy_in(start, &bytes[..take]);

        // Commit in reservation order: wait for earlier producers to
        // publish before we advance the visible cursor past their span.
        while self.committed.0.load(Ordering::Acquire) != start {
            std::hint::spin_loop();
        }
        self.committed.0.store(start + take as u64, Ordering::Release);

        let used = (start + take as u64).saturating_sub(self.read.0.load(Ordering::Acquire));
        self.backpressure.store(
            used * 10 >= self.capacity as u64 * 9,
            Ordering::Relaxed,
        );

        self.stats.record_observed(self.stream, take as u64);
        if take < bytes.len() {
            self.stats
                .record_dropped(self.stream, (bytes.len() - take) as u64);
        }
        take
    }

    fn copy_in(&self, start: u64, bytes: &[u8]) {
        let buf = unsafe { &mut *self.buf.get() };
        let cap = self.capacity as u64;
        let offset = (start & self.mask) as usize;
        let first = (cap - offset as u64).min(bytes.len() as u64) as usize;
        buf[offset..offset + first].copy_from_slice(&bytes[..first]);
        if first < bytes.len() {
            buf[..bytes.len() - first].copy_from_slice(&bytes[first..]);
        }
    }

    fn copy_out(&self, start: u64, len: usize) -> Vec<u8> {
        let buf = unsafe { &*self.buf.get() };
        let cap = self.capacity as u64;
        let offset = (start & self.mask) as usize;
        let first = (cap - offset as u64).min(len as u64) as usize;
        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(&buf[offset..offset + first]);
        if first < len {
            out.extend_from_slice(&buf[..len - first]);
        }
        out
    }

    /// Drains all unread committed bytes (fallback path that doesn't care
    /// about event alignment). Advances the read cursor past everything
    /// returned.
    pub fn read_all(&self) -> Vec<u8> {
        let committed = self.committed.0.load(Ordering::Acquire);
        let read = self.read.0.load(Ordering::Acquire);
        let len = committed.saturating_sub(read) as usize;
        if len == 0 {
            return Vec::new();
        }
        let out = self.copy_out(read, len);
        self.read.0.store(committed, Ordering::Release);
        out
    }

    /// Non-destructive view of the unread committed region, for the
    /// extractor's boundary scan. Does not advance the read cursor.
    pub fn peek_unread(&self) -> Vec<u8> {
        let committed = self.committed.0.load(Ordering::Acquire);
        let read = self.read.0.load(Ordering::Acquire);
        let len = committed.saturating_sub(read) as usize;
        if len == 0 {
            return Vec::new();
        }
        self.copy_out(read, len)
    }

    pub fn unread_len(&self) -> usize {
        let committed = self.committed.0.load(Ordering::Acquire);
        let read = self.read.0.load(Ordering::Acquire);
        committed.saturating_sub(read) as usize
    }

    /// The absolute stream offset of the first unread byte.
    pub fn read_offset(&self) -> u64 {
        self.read.0.load(Ordering::Acquire)
    }

    /// Advances the read cursor by `n` bytes (the extractor's job after it
    /// has consumed complete events, or dropped an oversized one).
    pub fn advance_read(&self, n: usize) {
        self.read.0.fetch_add(n as u64, Ordering::AcqRel);
    }

    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    /// Read-only snapshot of this ring's accounting counters.
    pub fn stats(&self) -> crate::model::CaptureStatsSnapshot {
        self.stats.snapshot()
    }

    /// Accounts bytes lost downstream of the ring itself — a full event
    /// channel, or an event dropped for exceeding the extractor's maximum
    /// size before a boundary was ever found. Does not touch the ring's
    /// own cursors.
    pub fn record_channel_drop(&self, n: u64) {
        self.stats.record_dropped(self.stream, n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(cap: usize) -> Ring {
        Ring::new(cap, StreamKind::Output, Arc::new(CaptureStats::default()))
    }

    #[test]
    fn single_producer_overflow_drops_remainder() {
        let r = ring(16);
        let data = vec![b'a'; 17];
        let accepted = r.write(&data);
        assert_eq!(accepted, 16);
        let snap = r.stats.snapshot();
        assert_eq!(snap.bytes_observed.output, 16);
        assert_eq!(snap.bytes_dropped.output, 1);
    }

    #[test]
    fn accepted_plus_dropped_equals_offered() {
        let r = ring(8);
        let offered = 20u64;
        r.write(&vec![1u8; 20]);
        let snap = r.stats.snapshot();
        assert_eq!(snap.bytes_observed.output + snap.bytes_dropped.output, offered);
    }

    #[test]
    fn wraparound_round_trips() {
        let r = ring(8);
        assert_eq!(r.write(b"abcd"), 4);
        assert_eq!(r.read_all(), b"abcd");
        assert_eq!(r.write(b"efghij"), 6);
        assert_eq!(r.read_all(), b"efghij");
    }

    #[test]
    fn concurrent_producers_sum_to_capacity_are_contiguous() {
        use std::thread;
        let r = Arc::new(ring(4096));
        let mut handles = Vec::new();
        for i in 0..8u8 {
            let r = Arc::clone(&r);
            handles.push(thread::spawn(move || {
                let payload = vec![i; 512];
                r.write(&payload)
            }));
        }
        let mut total_accepted = 0usize;
        for h in handles {
            total_accepted += h.join().unwrap();
        }
        assert_eq!(total_accepted, 4096);
        let snap = r.stats.snapshot();
        assert_eq!(snap.bytes_observed.output, 4096);
        assert_eq!(snap.bytes_dropped.output, 0);

        let all = r.read_all();
        assert_eq!(all.len(), 4096);
        // Each producer's 512-byte payload must appear as one contiguous
        // run of its own value somewhere in the buffer.
        let mut i = 0;
        while i < all.len() {
            let v = all[i];
            let run_end = all[i..].iter().take_while(|&&b| b == v).count() + i;
            assert_eq!(run_end - i, 512, "producer payload was not contiguous");
            i = run_end;
        }
    }

    #[test]
    fn closed_ring_rejects_writes() {
        let r = ring(16);
        r.close();
        assert_eq!(r.write(b"xyz"), 0);
        assert_eq!(r.stats.snapshot().bytes_dropped.output, 3);
    }

    #[test]
    fn backpressure_flag_trips_past_high_water() {
        let r = ring(16);
        r.write(&vec![0u8; 15]);
        assert!(r.is_backpressured());
    }
}
