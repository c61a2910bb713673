//! This module contains all the capture logic

// The capture loop does one thing, as fast as possible: pull packets from the source and
// append them verbatim to the current file. No sample decoding happens here. The only
// per-packet work is a length check and remembering the sequence number.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tracing::{debug, error, info, info_span, warn};

use crate::{
    channels::PacketLayout,
    error::{CaptureError, CaptureResult, PacketError},
    frame::FrameDecoder,
    header::{FileHeader, FileHeaderWriter},
    loss::{LossReport, LossTracker},
    reference::system_epoch_seconds,
    source::{PacketSource, Received},
};

/// Big enough to amortize syscalls at line rate
pub const DEFAULT_WRITE_BUFFER: usize = 20 * 1024 * 1024;
/// Leading epoch digits used for the directory name, 5 digits is a new directory every ~27 hours
pub const DEFAULT_DIR_PREFIX_DIGITS: usize = 5;

/// When to close a file and start the next one
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FileBudget {
    pub packets: u64,
    pub duration: Option<Duration>,
}

impl FileBudget {
    pub fn packets(packets: u64) -> Self {
        Self {
            packets: packets.max(1),
            duration: None,
        }
    }

    /// Size files by volume, e.g. half a gigabyte per file
    pub fn from_bytes(bytes: u64, bytes_per_packet: u64) -> Self {
        Self::packets(bytes / bytes_per_packet.max(1))
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub layout: PacketLayout,
    pub output_root: PathBuf,
    pub budget: FileBudget,
    pub dir_prefix_digits: usize,
    pub write_buffer: usize,
    /// End the session cleanly after this many files
    pub file_limit: Option<u64>,
}

impl SessionConfig {
    pub fn new(layout: PacketLayout, output_root: impl Into<PathBuf>, budget: FileBudget) -> Self {
        Self {
            layout,
            output_root: output_root.into(),
            budget,
            dir_prefix_digits: DEFAULT_DIR_PREFIX_DIGITS,
            write_buffer: DEFAULT_WRITE_BUFFER,
            file_limit: None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SessionState {
    Idle,
    HeaderWritten,
    Receiving,
    Rotating,
    Closed,
}

/// How a session finished without error
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SessionEnd {
    Shutdown,
    FileLimit,
}

/// Receives one loss report per finished file
pub trait LossSink: Send + Sync {
    fn report(&self, path: &Path, report: &LossReport);
}

/// Log loss reports as structured events
pub struct TracingSink;

impl LossSink for TracingSink {
    fn report(&self, path: &Path, report: &LossReport) {
        info!(
            path = %path.display(),
            expected = report.expected_count,
            spanned = report.observed_delta,
            "Wrote file. Missing percentage of packets is {:.5}",
            report.missing_fraction * 100.0
        );
    }
}

/// Outcome of one trip through the receive loop
#[derive(Debug, PartialEq, Eq)]
enum Step {
    Captured,
    Skipped(PacketError),
    Idle,
}

enum Fill {
    BudgetReached,
    Shutdown,
}

struct OpenFile {
    path: PathBuf,
    writer: BufWriter<File>,
    header: FileHeader,
    packets: u64,
    bytes: u64,
    tracker: LossTracker,
    opened: Instant,
}

/// Create `<root>/<epoch prefix>/<epoch>.raw`, adding a `_n` suffix rather than overwriting.
///
/// Only the prefix directory is created, a missing root (e.g. an unmounted drive) is an error.
pub fn create_capture_file(root: &Path, prefix_digits: usize) -> CaptureResult<(PathBuf, File)> {
    if !root.is_dir() {
        return Err(CaptureError::storage(
            root,
            io::Error::new(io::ErrorKind::NotFound, "output root is not a directory"),
        ));
    }
    let epoch = system_epoch_seconds().to_string();
    let dir = root.join(&epoch[..prefix_digits.clamp(1, epoch.len())]);
    match fs::create_dir(&dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => {}
        Err(e) => return Err(CaptureError::storage(&dir, e)),
    }
    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            format!("{epoch}.raw")
        } else {
            format!("{epoch}_{attempt}.raw")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(CaptureError::storage(&path, e)),
        }
    }
}

/// One packet source, one open file at a time
pub struct CaptureSession<S> {
    source: S,
    config: SessionConfig,
    decoder: FrameDecoder,
    headers: FileHeaderWriter,
    sink: Arc<dyn LossSink>,
    shutdown: Arc<AtomicBool>,
    state: SessionState,
    files_closed: u64,
}

impl<S: PacketSource> CaptureSession<S> {
    pub fn new(
        source: S,
        config: SessionConfig,
        headers: FileHeaderWriter,
        sink: Arc<dyn LossSink>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let decoder = FrameDecoder::new(&config.layout);
        Self {
            source,
            config,
            decoder,
            headers,
            sink,
            shutdown,
            state: SessionState::Idle,
            files_closed: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn files_closed(&self) -> u64 {
        self.files_closed
    }

    /// Hand back the header writer so the next session can reuse its time source
    pub fn into_headers(self) -> FileHeaderWriter {
        self.headers
    }

    /// Capture until shutdown, the file limit, or an error
    pub fn run(&mut self) -> CaptureResult<SessionEnd> {
        let span = info_span!("session");
        let _enter = span.enter();
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                self.state = SessionState::Closed;
                return Ok(SessionEnd::Shutdown);
            }
            let mut file = match self.open_file() {
                Ok(file) => file,
                Err(e) => {
                    self.state = SessionState::Closed;
                    return Err(e);
                }
            };
            match self.fill(&mut file) {
                Ok(Fill::BudgetReached) => {
                    self.state = SessionState::Rotating;
                    if let Err(e) = self.close_file(file, true) {
                        self.state = SessionState::Closed;
                        return Err(e);
                    }
                    if Some(self.files_closed) == self.config.file_limit {
                        info!(files = self.files_closed, "File limit reached");
                        self.state = SessionState::Closed;
                        return Ok(SessionEnd::FileLimit);
                    }
                }
                Ok(Fill::Shutdown) => {
                    info!("Stop requested, finalizing current file");
                    let with_report = file.packets > 0;
                    let closed = self.close_file(file, with_report);
                    self.state = SessionState::Closed;
                    return closed.map(|()| SessionEnd::Shutdown);
                }
                Err(e) => {
                    self.abandon(file);
                    self.state = SessionState::Closed;
                    return Err(e);
                }
            }
        }
    }

    fn open_file(&mut self) -> CaptureResult<OpenFile> {
        let (path, file) =
            create_capture_file(&self.config.output_root, self.config.dir_prefix_digits)?;
        let mut writer = BufWriter::with_capacity(self.config.write_buffer, file);
        let header = self
            .headers
            .write(&mut writer, &self.config.layout)
            .map_err(|e| CaptureError::storage(&path, e))?;
        self.state = SessionState::HeaderWritten;
        info!(path = %path.display(), time_valid = header.time_valid, "Opened baseband file");
        Ok(OpenFile {
            path,
            writer,
            header,
            packets: 0,
            bytes: 0,
            tracker: LossTracker::new(self.config.layout.spectra_per_packet),
            opened: Instant::now(),
        })
    }

    fn fill(&mut self, file: &mut OpenFile) -> CaptureResult<Fill> {
        self.state = SessionState::Receiving;
        let budget = self.config.budget;
        while file.packets < budget.packets {
            if self.shutdown.load(Ordering::Relaxed) {
                return Ok(Fill::Shutdown);
            }
            if let Some(limit) = budget.duration {
                if file.opened.elapsed() >= limit {
                    debug!(packets = file.packets, "File duration reached");
                    break;
                }
            }
            match self.receive_one(file)? {
                Step::Captured | Step::Idle => {}
                Step::Skipped(e) => {
                    warn!(error = %e, path = %file.path.display(), "Skipping bad packet")
                }
            }
        }
        Ok(Fill::BudgetReached)
    }

    /// Pull one packet and append it if it is well formed
    fn receive_one(&mut self, file: &mut OpenFile) -> CaptureResult<Step> {
        let packet = match self.source.next_packet()? {
            Received::Packet(p) => p,
            Received::Timeout => return Ok(Step::Idle),
        };
        let frame = match self.decoder.split(packet) {
            Ok(frame) => frame,
            Err(e) => return Ok(Step::Skipped(e)),
        };
        file.writer
            .write_all(packet)
            .map_err(|e| CaptureError::storage(&file.path, e))?;
        file.tracker.observe(file.packets, frame.sequence);
        file.packets += 1;
        file.bytes += packet.len() as u64;
        Ok(Step::Captured)
    }

    fn close_file(&mut self, mut file: OpenFile, with_report: bool) -> CaptureResult<()> {
        file.writer
            .flush()
            .map_err(|e| CaptureError::storage(&file.path, e))?;
        debug!(
            path = %file.path.display(),
            packets = file.packets,
            bytes = file.header.payload_offset() + file.bytes,
            "Closed baseband file"
        );
        if with_report {
            let report = file.tracker.report(file.packets);
            self.sink.report(&file.path, &report);
        }
        self.files_closed += 1;
        Ok(())
    }

    /// Keep whatever made it to disk, without a loss report
    fn abandon(&mut self, mut file: OpenFile) {
        if let Err(e) = file.writer.flush() {
            error!(error = %e, path = %file.path.display(), "Failed to flush partial file");
        }
        warn!(
            path = %file.path.display(),
            packets = file.packets,
            "Leaving partial file without a loss report"
        );
    }
}
