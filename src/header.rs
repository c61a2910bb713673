//! The fixed preamble at the start of every baseband file.
//!
//! Everything is a big-endian 8-byte word so a reader can find the payload from the first
//! word alone. `header_bytes` counts the words after itself, so packets start at
//! `8 + header_bytes`:
//!
//! | offset        | field                                 |
//! |---------------|---------------------------------------|
//! | 0             | header_bytes (80 + 8 * channel_count) |
//! | 8             | bytes_per_packet                      |
//! | 16            | channel_count                         |
//! | 24            | spectra_per_packet                    |
//! | 32            | bit_depth                             |
//! | 40            | time_valid (0/1)                      |
//! | 48            | channel plan, u64 each                |
//! | 48 + 8n       | format flag (0 = epoch seconds)       |
//! | 56 + 8n       | epoch seconds                         |
//! | 64 + 8n       | latitude (f64)                        |
//! | 72 + 8n       | longitude (f64)                       |
//! | 80 + 8n       | elevation (f64)                       |
//! | 88 + 8n       | first packet                          |

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use crate::{
    channels::{BitDepth, ChannelPlan, PacketLayout},
    reference::{Position, TimeSource},
};

/// Fixed words after the length word, not counting the channel plan
pub const FIXED_HEADER_WORDS: u64 = 10;
/// The leading `header_bytes` word itself
pub const LENGTH_WORD_BYTES: u64 = 8;
/// Marks the timestamp word as plain epoch seconds
pub const FORMAT_EPOCH_SECONDS: u64 = 0;

#[derive(Clone, PartialEq, Debug)]
pub struct FileHeader {
    pub bytes_per_packet: u64,
    pub spectra_per_packet: u64,
    pub bit_depth: u64,
    pub time_valid: bool,
    pub channels: Vec<u64>,
    pub format_flag: u64,
    pub epoch_seconds: u64,
    pub position: Position,
}

impl FileHeader {
    /// Value of the leading word: the header length after that word
    pub fn header_bytes(&self) -> u64 {
        8 * (FIXED_HEADER_WORDS + self.channels.len() as u64)
    }

    /// Byte offset of the first packet in the file
    pub fn payload_offset(&self) -> u64 {
        LENGTH_WORD_BYTES + self.header_bytes()
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<BigEndian>(self.header_bytes())?;
        w.write_u64::<BigEndian>(self.bytes_per_packet)?;
        w.write_u64::<BigEndian>(self.channels.len() as u64)?;
        w.write_u64::<BigEndian>(self.spectra_per_packet)?;
        w.write_u64::<BigEndian>(self.bit_depth)?;
        w.write_u64::<BigEndian>(self.time_valid as u64)?;
        for &chan in &self.channels {
            w.write_u64::<BigEndian>(chan)?;
        }
        w.write_u64::<BigEndian>(self.format_flag)?;
        w.write_u64::<BigEndian>(self.epoch_seconds)?;
        w.write_f64::<BigEndian>(self.position.latitude)?;
        w.write_f64::<BigEndian>(self.position.longitude)?;
        w.write_f64::<BigEndian>(self.position.elevation)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let header_bytes = r.read_u64::<BigEndian>()?;
        let bytes_per_packet = r.read_u64::<BigEndian>()?;
        let channel_count = r.read_u64::<BigEndian>()?;
        if header_bytes != 8 * (FIXED_HEADER_WORDS + channel_count) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("header claims {header_bytes} bytes but lists {channel_count} channels"),
            ));
        }
        let spectra_per_packet = r.read_u64::<BigEndian>()?;
        let bit_depth = r.read_u64::<BigEndian>()?;
        let time_valid = r.read_u64::<BigEndian>()? != 0;
        let channels = (0..channel_count)
            .map(|_| r.read_u64::<BigEndian>())
            .collect::<io::Result<Vec<_>>>()?;
        let format_flag = r.read_u64::<BigEndian>()?;
        let epoch_seconds = r.read_u64::<BigEndian>()?;
        let position = Position {
            latitude: r.read_f64::<BigEndian>()?,
            longitude: r.read_f64::<BigEndian>()?,
            elevation: r.read_f64::<BigEndian>()?,
        };
        Ok(Self {
            bytes_per_packet,
            spectra_per_packet,
            bit_depth,
            time_valid,
            channels,
            format_flag,
            epoch_seconds,
            position,
        })
    }

    /// Recover the packet layout this file was written with
    pub fn layout(&self) -> Option<PacketLayout> {
        let channels = self
            .channels
            .iter()
            .map(|&c| u16::try_from(c).ok())
            .collect::<Option<Vec<_>>>()?;
        let plan = ChannelPlan::new(channels).ok()?;
        let bit_depth = BitDepth::try_from(self.bit_depth).ok()?;
        PacketLayout::new(plan, self.spectra_per_packet, bit_depth).ok()
    }
}

/// Stamps and writes headers, one per file
pub struct FileHeaderWriter {
    time_source: TimeSource,
}

impl FileHeaderWriter {
    pub fn new(time_source: TimeSource) -> Self {
        Self { time_source }
    }

    pub fn write<W: Write>(&mut self, file: &mut W, layout: &PacketLayout) -> io::Result<FileHeader> {
        write(
            file,
            &layout.plan,
            layout.spectra_per_packet,
            layout.bytes_per_packet() as u64,
            layout.bit_depth,
            &mut self.time_source,
        )
    }
}

/// Query the time source once and write a complete header
pub fn write<W: Write>(
    file: &mut W,
    channel_plan: &ChannelPlan,
    spectra_per_packet: u64,
    bytes_per_packet: u64,
    bit_depth: BitDepth,
    time_source: &mut TimeSource,
) -> io::Result<FileHeader> {
    let stamp = time_source.stamp();
    let header = FileHeader {
        bytes_per_packet,
        spectra_per_packet,
        bit_depth: bit_depth.bits(),
        time_valid: stamp.time_valid,
        channels: channel_plan.channels().iter().map(|&c| c as u64).collect(),
        format_flag: FORMAT_EPOCH_SECONDS,
        epoch_seconds: stamp.epoch_seconds,
        position: stamp.position,
    };
    header.write_to(file)?;
    debug!(
        header_bytes = header.header_bytes(),
        epoch = header.epoch_seconds,
        time_valid = header.time_valid,
        "Wrote file header"
    );
    Ok(header)
}
