//! Per-file packet loss accounting.
//!
//! Only the first and last `(packet_index, sequence)` pairs are kept. The estimate assumes
//! the 32-bit sequence counter does not wrap within a file and that packets arrive in order;
//! duplicates and reordering are not detected.

use std::fmt;

use tracing::warn;

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct LossReport {
    /// Spectra actually written, packets times spectra per packet
    pub expected_count: u64,
    /// Spectra spanned by the first and last sequence numbers, inclusive
    pub observed_delta: i64,
    pub missing_fraction: f64,
}

impl fmt::Display for LossReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} spectra, {:.5}% missing",
            self.expected_count,
            self.observed_delta,
            self.missing_fraction * 100.0
        )
    }
}

#[derive(Clone, Debug)]
pub struct LossTracker {
    spectra_per_packet: u64,
    first: Option<(u64, u32)>,
    last: Option<(u64, u32)>,
}

impl LossTracker {
    pub fn new(spectra_per_packet: u64) -> Self {
        Self {
            spectra_per_packet,
            first: None,
            last: None,
        }
    }

    pub fn observe(&mut self, packet_index: u64, sequence: u32) {
        if self.first.is_none() {
            self.first = Some((packet_index, sequence));
        }
        self.last = Some((packet_index, sequence));
    }

    pub fn first(&self) -> Option<(u64, u32)> {
        self.first
    }

    pub fn last(&self) -> Option<(u64, u32)> {
        self.last
    }

    /// Close out the file. `packets` is how many packets were written to it.
    pub fn report(&self, packets: u64) -> LossReport {
        let expected_count = packets * self.spectra_per_packet;
        let (first, last) = match (self.first, self.last) {
            (Some((_, first)), Some((_, last))) if packets > 0 => (first, last),
            _ => {
                return LossReport {
                    expected_count,
                    observed_delta: 0,
                    missing_fraction: 1.0,
                }
            }
        };
        let observed_delta = last as i64 - first as i64 + self.spectra_per_packet as i64;
        let missing_fraction = if observed_delta > 0 {
            1.0 - expected_count as f64 / observed_delta as f64
        } else {
            warn!(first, last, "Sequence number went backwards, counter wrap or reordering");
            1.0
        };
        LossReport {
            expected_count,
            observed_delta,
            missing_fraction,
        }
    }
}
