//! Where packets come from.
//!
//! The capture loop only needs a timeout-bounded `next_packet`. Two sources are provided:
//! a libpcap live capture with a BPF filter on the address/port triple (the way the
//! digitizer is normally recorded), and a plain bound UDP socket.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr, UdpSocket},
    time::Duration,
};

use tracing::info;

use crate::error::{CaptureError, CaptureResult};

/// Ethernet header length, assumes no VLAN tag
pub const UDP_HEADER_START: usize = 14 + 20;
pub const UDP_HEADER_BYTES: usize = 8;
/// Start of the UDP payload in a frame with a minimal IPv4 header
pub const UDP_PAYLOAD_START: usize = UDP_HEADER_START + UDP_HEADER_BYTES;

/// Kernel capture buffer, enough to ride out a long stall in the writer
pub const DEFAULT_CAPTURE_BUFFER: usize = 20 * 1024 * 1024;
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(1000);
const SNAPLEN: i32 = 65535;
const MAX_DATAGRAM: usize = 65535;

/// Result of one receive attempt
#[derive(Debug, PartialEq, Eq)]
pub enum Received<'a> {
    Packet(&'a [u8]),
    Timeout,
}

pub trait PacketSource {
    /// Block for at most the source's timeout. Errors are fatal for the session.
    fn next_packet(&mut self) -> CaptureResult<Received<'_>>;
}

/// Which packets to listen for
#[derive(Clone, Debug)]
pub struct Subscription {
    pub device: String,
    pub dest_host: Ipv4Addr,
    pub dest_port: u16,
    pub src_host: Option<Ipv4Addr>,
    pub timeout: Duration,
    pub buffer_size: usize,
}

impl Subscription {
    pub fn filter_expression(&self) -> String {
        let mut expr = format!(
            "udp and dst port {} and dst host {}",
            self.dest_port, self.dest_host
        );
        if let Some(src) = self.src_host {
            expr.push_str(&format!(" and src host {src}"));
        }
        expr
    }
}

/// Slice the UDP payload out of an Ethernet/IPv4/UDP frame, trusting the UDP length field
/// over the frame length so link-layer padding is dropped.
pub fn udp_payload(frame: &[u8]) -> &[u8] {
    let payload = frame.get(UDP_PAYLOAD_START..).unwrap_or(&[]);
    match frame.get(UDP_HEADER_START + 4..UDP_HEADER_START + 6) {
        Some(&[hi, lo]) => {
            let len = (u16::from_be_bytes([hi, lo]) as usize).saturating_sub(UDP_HEADER_BYTES);
            &payload[..len.min(payload.len())]
        }
        _ => payload,
    }
}

pub struct PcapSource {
    cap: pcap::Capture<pcap::Active>,
}

impl PcapSource {
    pub fn open(sub: &Subscription) -> CaptureResult<Self> {
        let mut cap = pcap::Capture::from_device(sub.device.as_str())
            .map_err(CaptureError::source_fatal)?
            .promisc(true)
            .snaplen(SNAPLEN)
            .timeout(sub.timeout.as_millis() as i32)
            .buffer_size(sub.buffer_size as i32)
            .open()
            .map_err(CaptureError::source_fatal)?;
        let filter = sub.filter_expression();
        cap.filter(&filter, true)
            .map_err(CaptureError::source_fatal)?;
        info!(device = %sub.device, %filter, "Opened packet capture");
        Ok(Self { cap })
    }
}

impl PacketSource for PcapSource {
    fn next_packet(&mut self) -> CaptureResult<Received<'_>> {
        match self.cap.next() {
            Ok(packet) => Ok(Received::Packet(udp_payload(packet.data))),
            Err(pcap::Error::TimeoutExpired) => Ok(Received::Timeout),
            Err(e) => Err(CaptureError::source_fatal(e)),
        }
    }
}

/// Receive straight from a bound socket. The kernel only filters on the destination.
pub struct UdpSocketSource {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl UdpSocketSource {
    pub fn bind(addr: SocketAddr, timeout: Duration) -> CaptureResult<Self> {
        let socket = UdpSocket::bind(addr).map_err(CaptureError::source_fatal)?;
        socket
            .set_read_timeout(Some(timeout))
            .map_err(CaptureError::source_fatal)?;
        info!(%addr, "Bound UDP socket");
        Ok(Self {
            socket,
            buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl PacketSource for UdpSocketSource {
    fn next_packet(&mut self) -> CaptureResult<Received<'_>> {
        match self.socket.recv(&mut self.buf) {
            Ok(n) => Ok(Received::Packet(&self.buf[..n])),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(Received::Timeout)
            }
            Err(e) => Err(CaptureError::source_fatal(e)),
        }
    }
}
