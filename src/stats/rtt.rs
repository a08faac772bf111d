//! Round-trip estimation from RTMP acknowledgements
//!
//! The peer acknowledges every window of received bytes with the total it
//! has seen so far. Remembering when each byte offset was written gives one
//! RTT sample per acknowledgement; samples are smoothed with the usual 1/8
//! gain.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Write offsets remembered while waiting for acknowledgements
const MAX_PENDING: usize = 1024;

#[derive(Debug, Default)]
pub struct RttEstimator {
    /// (cumulative bytes written, time written), oldest first
    pending: VecDeque<(u64, Instant)>,
    /// Highest acknowledged offset, with the 32-bit sequence unwrapped
    acked: u64,
    smoothed: Option<Duration>,
}

impl RttEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a known round trip (the handshake)
    pub fn seed(&mut self, rtt: Duration) {
        self.smoothed = Some(rtt);
    }

    pub fn smoothed(&self) -> Option<Duration> {
        self.smoothed
    }

    /// Remember that the transport has now accepted `total` bytes
    pub fn on_write(&mut self, total: u64, at: Instant) {
        if self.pending.len() == MAX_PENDING {
            self.pending.pop_front();
        }
        self.pending.push_back((total, at));
    }

    /// Feed an Acknowledgement sequence number, returning the new estimate
    pub fn on_ack(&mut self, sequence: u32, now: Instant) -> Option<Duration> {
        let acked = self.unwrap_sequence(sequence);
        self.acked = acked;

        let mut covered = None;
        while let Some(&(offset, at)) = self.pending.front() {
            if offset > acked {
                break;
            }
            covered = Some(at);
            self.pending.pop_front();
        }

        let sample = now.saturating_duration_since(covered?);
        let smoothed = match self.smoothed {
            Some(srtt) if sample >= srtt => srtt + (sample - srtt) / 8,
            Some(srtt) => srtt - (srtt - sample) / 8,
            None => sample,
        };
        self.smoothed = Some(smoothed);
        Some(smoothed)
    }

    /// Map a 32-bit sequence onto the 64-bit byte count it most likely means
    fn unwrap_sequence(&self, sequence: u32) -> u64 {
        let candidate = (self.acked & !0xFFFF_FFFF) | sequence as u64;
        if candidate < self.acked && self.acked - candidate > 0x8000_0000 {
            candidate + (1 << 32)
        } else {
            candidate
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_sets_estimate() {
        let start = Instant::now();
        let mut rtt = RttEstimator::new();
        rtt.on_write(1000, start);
        rtt.on_write(2000, start + Duration::from_millis(10));

        let estimate = rtt.on_ack(1500, start + Duration::from_millis(40)).unwrap();
        assert_eq!(estimate, Duration::from_millis(40));
    }

    #[test]
    fn test_smoothing() {
        let start = Instant::now();
        let mut rtt = RttEstimator::new();
        rtt.seed(Duration::from_millis(80));

        rtt.on_write(500, start);
        let estimate = rtt.on_ack(500, start + Duration::from_millis(160)).unwrap();
        assert_eq!(estimate, Duration::from_millis(90));

        rtt.on_write(1000, start + Duration::from_millis(200));
        let estimate = rtt.on_ack(1000, start + Duration::from_millis(210)).unwrap();
        assert_eq!(estimate, Duration::from_micros(80_000));
    }

    #[test]
    fn test_ack_without_covered_write() {
        let start = Instant::now();
        let mut rtt = RttEstimator::new();
        rtt.on_write(5000, start);
        assert!(rtt.on_ack(100, start).is_none());
        assert!(rtt.smoothed().is_none());
    }

    #[test]
    fn test_sequence_wraparound() {
        let start = Instant::now();
        let mut rtt = RttEstimator::new();
        rtt.on_write(0xFFFF_FF00, start);
        rtt.on_ack(0xFFFF_FF00, start + Duration::from_millis(5)).unwrap();

        rtt.on_write((1 << 32) + 0x100, start + Duration::from_millis(10));
        let estimate = rtt.on_ack(0x100, start + Duration::from_millis(15));
        assert!(estimate.is_some());
        assert_eq!(rtt.acked, (1 << 32) + 0x100);
    }

    #[test]
    fn test_pending_is_bounded() {
        let start = Instant::now();
        let mut rtt = RttEstimator::new();
        for i in 0..(MAX_PENDING as u64 + 10) {
            rtt.on_write(i * 100, start);
        }
        assert_eq!(rtt.pending.len(), MAX_PENDING);
    }
}
