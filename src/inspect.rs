//! Quick-look diagnostics for a finished baseband file

use std::io::{self, BufReader, ErrorKind, Read};

use crate::{
    error::PacketError,
    frame::FrameDecoder,
    header::FileHeader,
    loss::{LossReport, LossTracker},
};

#[derive(Clone, Debug)]
pub struct Inspection {
    pub header: FileHeader,
    pub packets: u64,
    /// Bytes after the last whole packet, left by an interrupted capture
    pub trailing_bytes: usize,
    pub loss: LossReport,
    /// Mean |x|^2 per channel for each polarization, 4-bit files only
    pub power: Option<(Vec<f64>, Vec<f64>)>,
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg.into())
}

/// Read a whole capture file, re-deriving its loss and per-channel power
pub fn inspect<R: Read>(reader: R) -> io::Result<Inspection> {
    let mut reader = BufReader::new(reader);
    let header = FileHeader::read_from(&mut reader)?;
    let layout = header
        .layout()
        .ok_or_else(|| invalid("header does not describe a valid packet layout"))?;
    let decoder = FrameDecoder::new(&layout);
    let mut tracker = LossTracker::new(layout.spectra_per_packet);
    let mut power: Option<(Vec<u64>, Vec<u64>)> = None;
    let mut decodable = true;
    let mut packets = 0u64;
    let mut buf = vec![0u8; decoder.bytes_per_packet()];

    let trailing_bytes = loop {
        let filled = read_up_to(&mut reader, &mut buf)?;
        if filled < buf.len() {
            break filled;
        }
        let frame = decoder.split(&buf).map_err(|e| invalid(e.to_string()))?;
        tracker.observe(packets, frame.sequence);
        packets += 1;
        if decodable {
            match decoder.decode_samples(&frame) {
                Ok((pol0, pol1)) => {
                    let (acc0, acc1) =
                        power.get_or_insert_with(|| (vec![0; pol0.nchan], vec![0; pol1.nchan]));
                    pol0.accumulate_power(acc0);
                    pol1.accumulate_power(acc1);
                }
                Err(PacketError::UnsupportedBitDepth(_)) => decodable = false,
                Err(e) => return Err(invalid(e.to_string())),
            }
        }
    };

    let spectra = (packets * layout.spectra_per_packet).max(1) as f64;
    let power = power.map(|(acc0, acc1)| {
        let mean = |acc: Vec<u64>| -> Vec<f64> {
            acc.into_iter().map(|v| v as f64 / spectra).collect()
        };
        (mean(acc0), mean(acc1))
    });
    Ok(Inspection {
        header,
        packets,
        trailing_bytes,
        loss: tracker.report(packets),
        power,
    })
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
