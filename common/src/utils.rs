//! Common Utilities
//!
//! Bit-packing helpers shared by the bit pipeline and wire-format codecs,
//! plus the moving-average deadline tracker used by the realtime coordinator.

use bytes::{BufMut, Bytes, BytesMut};
use std::time::{Duration, Instant};
use tracing::warn;

/// Pack bits into bytes (MSB first).
pub fn pack_bits(bits: &[bool]) -> Bytes {
    let mut bytes = BytesMut::with_capacity((bits.len() + 7) / 8);

    for chunk in bits.chunks(8) {
        let mut byte = 0u8;
        for (i, &bit) in chunk.iter().enumerate() {
            if bit {
                byte |= 1 << (7 - i);
            }
        }
        bytes.put_u8(byte);
    }

    bytes.freeze()
}

/// Unpack bytes into bits (MSB first).
pub fn unpack_bits(bytes: &[u8]) -> Vec<bool> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);

    for &byte in bytes {
        for i in 0..8 {
            bits.push((byte & (1 << (7 - i))) != 0);
        }
    }

    bits
}

/// A small moving-average latency tracker for a single recurring deadline,
/// e.g. "one TX symbol pair" or "one UL slot decode". Not part of any
/// hot-path computation itself: `start`/`stop` bracket the timed region,
/// `check` compares the last sample against a threshold and logs a warning
/// on overrun, `report` returns the current moving average.
#[derive(Debug, Clone)]
pub struct Latency {
    label: &'static str,
    started: Option<Instant>,
    last: Duration,
    /// Exponential moving average, in the same units as `last`.
    average: Duration,
    samples: u64,
    misses: u64,
}

impl Latency {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            started: None,
            last: Duration::ZERO,
            average: Duration::ZERO,
            samples: 0,
            misses: 0,
        }
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Stop the timed region and fold the sample into the moving average.
    pub fn stop(&mut self) {
        let Some(t0) = self.started.take() else {
            return;
        };
        self.last = t0.elapsed();
        self.samples += 1;
        // Exponential moving average with a fixed smoothing factor; cheap,
        // bounded memory, no windowed buffer to manage.
        const ALPHA: f64 = 0.1;
        let avg_secs = self.average.as_secs_f64() * (1.0 - ALPHA) + self.last.as_secs_f64() * ALPHA;
        self.average = Duration::from_secs_f64(avg_secs.max(0.0));
    }

    /// Compare the last sample against `threshold`, logging a warning (not
    /// an error — deadline misses are never fatal, per §7) if exceeded.
    pub fn check(&mut self, threshold: Duration) -> bool {
        if self.last > threshold {
            self.misses += 1;
            warn!(
                label = self.label,
                elapsed_us = self.last.as_micros() as u64,
                threshold_us = threshold.as_micros() as u64,
                misses = self.misses,
                "deadline_missed"
            );
            false
        } else {
            true
        }
    }

    pub fn report(&self) -> LatencyReport {
        LatencyReport {
            label: self.label,
            average: self.average,
            last: self.last,
            samples: self.samples,
            misses: self.misses,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LatencyReport {
    pub label: &'static str,
    pub average: Duration,
    pub last: Duration,
    pub samples: u64,
    pub misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_packing() {
        let bits = vec![true, false, true, false, true, false, true, false];
        let packed = pack_bits(&bits);
        assert_eq!(packed[0], 0xAA); // 10101010

        let unpacked = unpack_bits(&packed);
        assert_eq!(unpacked[..8], bits);
    }

    #[test]
    fn round_trip_arbitrary_length() {
        let bits: Vec<bool> = (0..37).map(|i| i % 3 == 0).collect();
        let packed = pack_bits(&bits);
        let unpacked = unpack_bits(&packed);
        assert_eq!(unpacked[..bits.len()], bits[..]);
    }

    #[test]
    fn latency_tracks_average_and_misses() {
        let mut lat = Latency::new("test");
        lat.start();
        lat.stop();
        assert!(lat.check(Duration::from_secs(1)));
        assert_eq!(lat.report().samples, 1);
    }
}
