//! Per-session network statistics
//!
//! Counters are written by the session worker (bytes, retries, latency) and
//! by callers on the enqueue path (drops, rejections, queue depth), and read
//! by anyone at any time. Reads never wait for fresh data.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::protocol::WriteReport;

/// Point-in-time statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    /// Bytes written to the transport after the handshake, chunk headers included
    pub bytes_sent: u64,
    /// Smoothed round-trip estimate in milliseconds
    pub latency_ms: u64,
    /// Estimated loss in [0, 100]
    pub loss_percent: u32,
    /// Media frames written (sequence headers excluded)
    pub frames_sent: u64,
    /// Frames that could not be sent (video before SPS/PPS)
    pub frames_dropped: u64,
    /// Messages waiting in the send queue
    pub queue_depth: usize,
}

/// Shared counters behind [`NetworkStats`]
#[derive(Debug, Default)]
pub struct StatsCollector {
    bytes_sent: AtomicU64,
    messages_sent: AtomicU64,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    frames_rejected: AtomicU64,
    write_retries: AtomicU64,
    latency_ms: AtomicU64,
    queue_depth: AtomicUsize,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one completed transport write
    pub fn record_write(&self, report: WriteReport, frame: bool) {
        self.bytes_sent.fetch_add(report.bytes as u64, Ordering::Relaxed);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.write_retries
            .fetch_add(report.retries as u64, Ordering::Relaxed);
        if frame {
            self.frames_sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A frame was discarded before reaching the queue
    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// A frame was refused because the queue was full
    pub fn record_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_latency(&self, rtt: Duration) {
        self.latency_ms
            .store(rtt.as_millis().min(u64::MAX as u128) as u64, Ordering::Relaxed);
    }

    pub fn queue_push(&self, n: usize) {
        self.queue_depth.fetch_add(n, Ordering::Relaxed);
    }

    pub fn queue_pop(&self, n: usize) {
        let _ = self
            .queue_depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |depth| {
                Some(depth.saturating_sub(n))
            });
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Loss estimate: retried writes, dropped and rejected frames against
    /// everything attempted
    fn loss_percent(&self) -> u32 {
        let events = self.write_retries.load(Ordering::Relaxed)
            + self.frames_dropped.load(Ordering::Relaxed)
            + self.frames_rejected.load(Ordering::Relaxed);
        let attempted = self.messages_sent.load(Ordering::Relaxed) + events;
        if attempted == 0 {
            return 0;
        }
        (events.saturating_mul(100) / attempted).min(100) as u32
    }

    pub fn snapshot(&self) -> NetworkStats {
        NetworkStats {
            bytes_sent: self.bytes_sent(),
            latency_ms: self.latency_ms.load(Ordering::Relaxed),
            loss_percent: self.loss_percent(),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(bytes: usize, retries: u32) -> WriteReport {
        WriteReport { bytes, retries }
    }

    #[test]
    fn test_empty_snapshot() {
        let stats = StatsCollector::new();
        assert_eq!(stats.snapshot(), NetworkStats::default());
    }

    #[test]
    fn test_bytes_are_cumulative() {
        let stats = StatsCollector::new();
        stats.record_write(write(100, 0), true);
        let first = stats.snapshot().bytes_sent;
        stats.record_write(write(50, 0), false);
        let second = stats.snapshot().bytes_sent;

        assert_eq!(first, 100);
        assert_eq!(second, 150);
        assert_eq!(stats.snapshot().frames_sent, 1);
    }

    #[test]
    fn test_loss_estimate() {
        let stats = StatsCollector::new();
        for _ in 0..8 {
            stats.record_write(write(10, 0), true);
        }
        stats.record_write(write(10, 1), true);
        stats.record_rejected();
        // 2 events out of 9 writes + 2 events
        assert_eq!(stats.snapshot().loss_percent, 18);
    }

    #[test]
    fn test_loss_is_clamped() {
        let stats = StatsCollector::new();
        stats.record_dropped();
        stats.record_dropped();
        assert_eq!(stats.snapshot().loss_percent, 100);
        assert_eq!(stats.snapshot().frames_dropped, 2);
    }

    #[test]
    fn test_queue_depth_never_underflows() {
        let stats = StatsCollector::new();
        stats.queue_push(3);
        stats.queue_pop(2);
        assert_eq!(stats.snapshot().queue_depth, 1);
        stats.queue_pop(5);
        assert_eq!(stats.snapshot().queue_depth, 0);
    }

    #[test]
    fn test_latency() {
        let stats = StatsCollector::new();
        stats.set_latency(Duration::from_micros(42_900));
        assert_eq!(stats.snapshot().latency_ms, 42);
    }
}
