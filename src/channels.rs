//! Channel plans and the packet layout they imply

use std::fmt;

use tracing::warn;

use crate::{error::PlanError, SEQUENCE_BYTES};

/// Most spectra the firmware will pack into one packet
pub const MAX_SPECTRA_PER_PACKET: u64 = 30;
/// Default payload ceiling that keeps packets under a standard MTU
pub const DEFAULT_MAX_BYTES_PER_PACKET: u64 = 1380;

/// Bits per real/imaginary component of a sample
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BitDepth {
    One,
    Two,
    Four,
}

impl BitDepth {
    pub fn bits(self) -> u64 {
        match self {
            BitDepth::One => 1,
            BitDepth::Two => 2,
            BitDepth::Four => 4,
        }
    }
}

impl TryFrom<u64> for BitDepth {
    type Error = PlanError;

    fn try_from(bits: u64) -> Result<Self, Self::Error> {
        match bits {
            1 => Ok(BitDepth::One),
            2 => Ok(BitDepth::Two),
            4 => Ok(BitDepth::Four),
            _ => Err(PlanError::InvalidBitDepth(bits)),
        }
    }
}

impl fmt::Display for BitDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// Ordered channel indices, one entry per payload byte of a spectrum.
///
/// At 4 bits a channel occupies two bytes (one per polarization) so it is listed twice,
/// at 2 bits both polarizations share a byte, and at 1 bit a byte carries two adjacent
/// channels so only every other channel is listed.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChannelPlan(Vec<u16>);

impl ChannelPlan {
    pub fn new(channels: Vec<u16>) -> Result<Self, PlanError> {
        if channels.is_empty() {
            return Err(PlanError::NoChannels);
        }
        Ok(Self(channels))
    }

    /// Parse space separated `start:stop` ranges (stop exclusive), e.g. `"190:210 220:230"`
    pub fn from_ranges(ranges: &str, bit_depth: BitDepth) -> Result<Self, PlanError> {
        let mut channels = Vec::new();
        for range in ranges.split_whitespace() {
            let (start, stop) = range
                .split_once(':')
                .ok_or_else(|| PlanError::InvalidRange(range.to_owned()))?;
            let start: u16 = start
                .trim()
                .parse()
                .map_err(|_| PlanError::InvalidRange(range.to_owned()))?;
            let stop: u16 = stop
                .trim()
                .parse()
                .map_err(|_| PlanError::InvalidRange(range.to_owned()))?;
            if stop <= start {
                return Err(PlanError::EmptyRange { start, stop });
            }
            match bit_depth {
                BitDepth::One => channels.extend((start..stop).step_by(2)),
                BitDepth::Two => channels.extend(start..stop),
                BitDepth::Four => channels.extend((start..stop).flat_map(|c| [c, c])),
            }
        }
        Self::new(channels)
    }

    pub fn channels(&self) -> &[u16] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Fit as many spectra as possible under `max_bytes`, capped at [`MAX_SPECTRA_PER_PACKET`]
pub fn spectra_per_packet(plan: &ChannelPlan, max_bytes: u64) -> u64 {
    let nspec = max_bytes / plan.len() as u64;
    if nspec < 1 {
        warn!(
            bytes_per_spectrum = plan.len(),
            max_bytes, "A single spectrum exceeds the packet ceiling, packets may be fragmented"
        );
        1
    } else {
        nspec.min(MAX_SPECTRA_PER_PACKET)
    }
}

/// Everything needed to size and interpret a packet. Immutable for a session.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PacketLayout {
    pub plan: ChannelPlan,
    pub spectra_per_packet: u64,
    pub bit_depth: BitDepth,
}

impl PacketLayout {
    pub fn new(
        plan: ChannelPlan,
        spectra_per_packet: u64,
        bit_depth: BitDepth,
    ) -> Result<Self, PlanError> {
        if spectra_per_packet == 0 {
            return Err(PlanError::NoSpectra);
        }
        Ok(Self {
            plan,
            spectra_per_packet,
            bit_depth,
        })
    }

    /// Build the layout the firmware will use for `ranges` under a payload ceiling
    pub fn from_ranges(ranges: &str, bit_depth: BitDepth, max_bytes: u64) -> Result<Self, PlanError> {
        let plan = ChannelPlan::from_ranges(ranges, bit_depth)?;
        let nspec = spectra_per_packet(&plan, max_bytes);
        Self::new(plan, nspec, bit_depth)
    }

    pub fn bytes_per_spectrum(&self) -> usize {
        self.plan.len()
    }

    pub fn payload_bytes(&self) -> usize {
        self.spectra_per_packet as usize * self.bytes_per_spectrum()
    }

    /// Sequence number plus packed spectra
    pub fn bytes_per_packet(&self) -> usize {
        SEQUENCE_BYTES + self.payload_bytes()
    }
}
