#![allow(dead_code)]

use std::{
    collections::VecDeque,
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use baseband_slurper::{
    capture::LossSink,
    channels::{BitDepth, ChannelPlan, PacketLayout},
    error::{CaptureError, CaptureResult},
    loss::LossReport,
    reference::{Position, ReferenceClock, ReferenceReading},
    source::{PacketSource, Received},
};

pub enum Event {
    Packet(Vec<u8>),
    Timeout,
    Fatal,
}

/// Replays a fixed list of events, then requests shutdown
pub struct ScriptedSource {
    events: VecDeque<Event>,
    current: Vec<u8>,
    shutdown: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub fn new(events: Vec<Event>, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            events: events.into(),
            current: Vec::new(),
            shutdown,
        }
    }
}

impl PacketSource for ScriptedSource {
    fn next_packet(&mut self) -> CaptureResult<Received<'_>> {
        match self.events.pop_front() {
            Some(Event::Packet(p)) => {
                self.current = p;
                Ok(Received::Packet(&self.current))
            }
            Some(Event::Timeout) => Ok(Received::Timeout),
            Some(Event::Fatal) => Err(CaptureError::source_fatal("device went away")),
            None => {
                self.shutdown.store(true, Ordering::Relaxed);
                Ok(Received::Timeout)
            }
        }
    }
}

#[derive(Default)]
pub struct CapturingSink {
    pub reports: Mutex<Vec<(PathBuf, LossReport)>>,
}

impl CapturingSink {
    pub fn reports(&self) -> Vec<(PathBuf, LossReport)> {
        self.reports.lock().unwrap().clone()
    }
}

impl LossSink for CapturingSink {
    fn report(&self, path: &Path, report: &LossReport) {
        self.reports
            .lock()
            .unwrap()
            .push((path.to_path_buf(), *report));
    }
}

pub struct FixedReference(pub ReferenceReading);

impl ReferenceClock for FixedReference {
    fn read(&mut self) -> ReferenceReading {
        self.0
    }
}

pub const OBSERVATORY: Position = Position {
    latitude: 79.417,
    longitude: -90.767,
    elevation: 176.0,
};

/// 6 channels at 4 bits (12 bytes per spectrum), 8 spectra: 100 byte packets
pub fn hundred_byte_layout() -> PacketLayout {
    let plan = ChannelPlan::from_ranges("0:6", BitDepth::Four).unwrap();
    let layout = PacketLayout::new(plan, 8, BitDepth::Four).unwrap();
    assert_eq!(layout.bytes_per_packet(), 100);
    layout
}

pub fn packet(seq: u32, len: usize) -> Vec<u8> {
    let mut p = seq.to_be_bytes().to_vec();
    p.extend((0..len - 4).map(|i| (i as u8).wrapping_add(seq as u8)));
    p
}

pub fn packets(seqs: impl IntoIterator<Item = u32>, len: usize) -> Vec<Event> {
    seqs.into_iter()
        .map(|s| Event::Packet(packet(s, len)))
        .collect()
}

/// Log sink for a scoped `tracing` subscriber
#[derive(Clone, Default)]
pub struct SharedLog(Arc<Mutex<Vec<u8>>>);

impl SharedLog {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for SharedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with warnings and above captured into a `SharedLog`
pub fn with_captured_warnings<T>(f: impl FnOnce() -> T) -> (T, String) {
    let log = SharedLog::default();
    let writer = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    (out, log.contents())
}
