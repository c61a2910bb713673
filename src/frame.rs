//! Packet framing and diagnostic sample decoding.
//!
//! The capture path never decodes samples, it only needs [`decode_sequence`] and a length
//! check. Sample unpacking exists for quick-look diagnostics and file inspection.

use crate::{
    channels::{BitDepth, PacketLayout},
    complex::ComplexByte,
    error::PacketError,
    SEQUENCE_BYTES,
};

/// Read the big-endian spectrum counter at the front of a packet
pub fn decode_sequence(bytes: &[u8]) -> Result<u32, PacketError> {
    match bytes.get(..SEQUENCE_BYTES) {
        Some(&[a, b, c, d]) => Ok(u32::from_be_bytes([a, b, c, d])),
        _ => Err(PacketError::MalformedFrame { len: bytes.len() }),
    }
}

/// One polarization of a packet, `[spectra, channels]` with the spectrum index outer
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Spectra {
    pub nspec: usize,
    pub nchan: usize,
    pub samples: Vec<ComplexByte>,
}

impl Spectra {
    fn with_shape(nspec: usize, nchan: usize) -> Self {
        Self {
            nspec,
            nchan,
            samples: Vec::with_capacity(nspec * nchan),
        }
    }

    pub fn spectrum(&self, idx: usize) -> &[ComplexByte] {
        &self.samples[idx * self.nchan..(idx + 1) * self.nchan]
    }

    pub fn get(&self, spec: usize, chan: usize) -> ComplexByte {
        self.samples[spec * self.nchan + chan]
    }

    /// Accumulate |x|^2 per channel over every spectrum
    pub fn accumulate_power(&self, acc: &mut [u64]) {
        assert_eq!(acc.len(), self.nchan);
        for row in self.samples.chunks_exact(self.nchan) {
            for (a, s) in acc.iter_mut().zip(row) {
                *a += s.norm_sq() as u64;
            }
        }
    }
}

/// Unpack 4-bit samples into two polarizations.
///
/// Within a spectrum bytes alternate pol0, pol1, so a spectrum of `n` channels is `2n` bytes.
pub fn decode_samples_4bit(
    payload: &[u8],
    spectra_per_packet: usize,
) -> Result<(Spectra, Spectra), PacketError> {
    let spectrum_stride = 2 * spectra_per_packet.max(1);
    if spectra_per_packet == 0 || payload.is_empty() || payload.len() % spectrum_stride != 0 {
        // Round down to the nearest size we could have decoded
        let expected = (payload.len() / spectrum_stride).max(1) * spectrum_stride;
        return Err(PacketError::TruncatedPacket {
            expected,
            actual: payload.len(),
        });
    }
    let nchan = payload.len() / spectrum_stride;
    let mut pol0 = Spectra::with_shape(spectra_per_packet, nchan);
    let mut pol1 = Spectra::with_shape(spectra_per_packet, nchan);
    for pair in payload.chunks_exact(2) {
        pol0.samples.push(ComplexByte::from_nibbles(pair[0]));
        pol1.samples.push(ComplexByte::from_nibbles(pair[1]));
    }
    Ok((pol0, pol1))
}

/// Pack a single 4-bit sample back into its wire byte
pub fn pack_4bit(sample: ComplexByte) -> u8 {
    sample.to_nibbles()
}

/// A validated packet, borrowing the capture buffer
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Frame<'a> {
    pub sequence: u32,
    pub payload: &'a [u8],
}

/// Length validation and decoding bound to one session's packet layout
#[derive(Clone, Debug)]
pub struct FrameDecoder {
    bytes_per_packet: usize,
    spectra_per_packet: usize,
    bit_depth: BitDepth,
}

impl FrameDecoder {
    pub fn new(layout: &PacketLayout) -> Self {
        Self {
            bytes_per_packet: layout.bytes_per_packet(),
            spectra_per_packet: layout.spectra_per_packet as usize,
            bit_depth: layout.bit_depth,
        }
    }

    pub fn bytes_per_packet(&self) -> usize {
        self.bytes_per_packet
    }

    /// Check a raw packet and split off its sequence number
    pub fn split<'a>(&self, packet: &'a [u8]) -> Result<Frame<'a>, PacketError> {
        let sequence = decode_sequence(packet)?;
        if packet.len() != self.bytes_per_packet {
            return Err(PacketError::TruncatedPacket {
                expected: self.bytes_per_packet,
                actual: packet.len(),
            });
        }
        Ok(Frame {
            sequence,
            payload: &packet[SEQUENCE_BYTES..],
        })
    }

    pub fn decode_samples(&self, frame: &Frame) -> Result<(Spectra, Spectra), PacketError> {
        match self.bit_depth {
            BitDepth::Four => decode_samples_4bit(frame.payload, self.spectra_per_packet),
            other => Err(PacketError::UnsupportedBitDepth(other)),
        }
    }
}
