mod common;

use std::{
    fs,
    io::{Cursor, Read, Seek, SeekFrom},
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use baseband_slurper::{
    capture::{CaptureSession, FileBudget, SessionConfig, SessionEnd, SessionState},
    error::CaptureError,
    header::{FileHeader, FileHeaderWriter},
    reference::{system_epoch_seconds, ReferenceReading, TimeSource},
};
use common::*;

// Length word plus 80 + 8n header bytes for the 12-entry plan
const HEADER_BYTES: u64 = 8 + 80 + 8 * 12;

struct Harness {
    root: tempfile::TempDir,
    sink: Arc<CapturingSink>,
    shutdown: Arc<AtomicBool>,
}

impl Harness {
    fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
            sink: Arc::new(CapturingSink::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    fn config(&self, budget: FileBudget, file_limit: Option<u64>) -> SessionConfig {
        let mut config = SessionConfig::new(hundred_byte_layout(), self.root.path(), budget);
        config.write_buffer = 4096;
        config.file_limit = file_limit;
        config
    }

    fn session(
        &self,
        events: Vec<Event>,
        config: SessionConfig,
        time: TimeSource,
    ) -> CaptureSession<ScriptedSource> {
        CaptureSession::new(
            ScriptedSource::new(events, self.shutdown.clone()),
            config,
            FileHeaderWriter::new(time),
            self.sink.clone(),
            self.shutdown.clone(),
        )
    }
}

fn gps() -> TimeSource {
    TimeSource::reference(FixedReference(ReferenceReading {
        epoch_seconds: Some(1_700_000_000),
        position: Some(OBSERVATORY),
    }))
}

#[test]
fn test_ten_packets_no_gaps() {
    let h = Harness::new();
    let mut session = h.session(
        packets((0..10).map(|i| i * 8), 100),
        h.config(FileBudget::packets(10), Some(1)),
        gps(),
    );
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.run().unwrap(), SessionEnd::FileLimit);
    assert_eq!(session.state(), SessionState::Closed);

    let reports = h.sink.reports();
    assert_eq!(reports.len(), 1);
    let (path, report) = &reports[0];
    assert!(report.missing_fraction.abs() < 1e-12);
    assert_eq!(report.expected_count, 80);

    let bytes = fs::read(path).unwrap();
    assert_eq!(bytes.len() as u64, HEADER_BYTES + 1000);
    let header = FileHeader::read_from(&mut Cursor::new(&bytes)).unwrap();
    assert_eq!(header.payload_offset(), HEADER_BYTES);
    assert!(header.time_valid);
    assert_eq!(header.epoch_seconds, 1_700_000_000);
    assert_eq!(header.position, OBSERVATORY);
    assert_eq!(header.spectra_per_packet, 8);
    assert_eq!(header.bit_depth, 4);
    assert_eq!(header.channels, vec![0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5]);

    // Packets are stored verbatim, sequence prefix included
    let payload = &bytes[HEADER_BYTES as usize..];
    for (i, chunk) in payload.chunks_exact(100).enumerate() {
        assert_eq!(chunk, packet(i as u32 * 8, 100).as_slice());
    }
}

#[test]
fn test_dropped_packet_shows_as_loss() {
    let h = Harness::new();
    let seqs = (0..10).filter(|&i| i != 5).map(|i| i * 8);
    let mut session = h.session(
        packets(seqs, 100),
        h.config(FileBudget::packets(10), None),
        gps(),
    );
    // Source runs dry before the budget, so the file is finalized on shutdown
    assert_eq!(session.run().unwrap(), SessionEnd::Shutdown);

    let reports = h.sink.reports();
    assert_eq!(reports.len(), 1);
    let (path, report) = &reports[0];
    assert_eq!(report.observed_delta, 80);
    assert!((report.missing_fraction - (1.0 - 72.0 / 80.0)).abs() < 1e-12);
    assert_eq!(fs::metadata(path).unwrap().len(), HEADER_BYTES + 900);
}

#[test]
fn test_malformed_packets_are_skipped() {
    let h = Harness::new();
    let mut events = packets((0..5).map(|i| i * 8), 100);
    events.push(Event::Packet(vec![0, 0, 0]));
    events.push(Event::Timeout);
    events.push(Event::Packet(packet(40, 50)));
    events.extend(packets((5..10).map(|i| i * 8), 100));
    events.extend(packets([80, 88], 100));
    let mut session = h.session(events, h.config(FileBudget::packets(10), Some(1)), gps());
    assert_eq!(session.run().unwrap(), SessionEnd::FileLimit);

    let reports = h.sink.reports();
    assert_eq!(reports.len(), 1);
    let (path, report) = &reports[0];
    assert!(report.missing_fraction.abs() < 1e-12);
    // Exactly ten good packets, nothing from the bad ones
    assert_eq!(fs::metadata(path).unwrap().len(), HEADER_BYTES + 1000);
}

#[test]
fn test_rotation_by_packet_budget() {
    let h = Harness::new();
    let mut session = h.session(
        packets((0..25).map(|i| i * 8), 100),
        h.config(FileBudget::packets(10), Some(2)),
        gps(),
    );
    assert_eq!(session.run().unwrap(), SessionEnd::FileLimit);
    assert_eq!(session.files_closed(), 2);

    let reports = h.sink.reports();
    assert_eq!(reports.len(), 2);
    assert_ne!(reports[0].0, reports[1].0);
    for (i, (path, report)) in reports.iter().enumerate() {
        assert_eq!(report.missing_fraction, 0.0);
        let bytes = fs::read(path).unwrap();
        assert_eq!(bytes.len() as u64, HEADER_BYTES + 1000);
        let first = &bytes[HEADER_BYTES as usize..HEADER_BYTES as usize + 4];
        assert_eq!(first, &(i as u32 * 80).to_be_bytes());
        // Directory is named after the leading epoch digits
        let dir = path.parent().unwrap();
        assert_eq!(dir.parent().unwrap(), h.root.path());
        assert_eq!(dir.file_name().unwrap().len(), 5);
    }
}

#[test]
fn test_rotation_by_duration() {
    let h = Harness::new();
    let mut events = packets([0, 8], 100);
    events.extend((0..20).map(|_| Event::Timeout));
    let budget = FileBudget::packets(1000).with_duration(Duration::ZERO);
    let mut session = h.session(events, h.config(budget, Some(1)), gps());
    assert_eq!(session.run().unwrap(), SessionEnd::FileLimit);
    // Zero duration closes the file before anything is received
    let reports = h.sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].1.missing_fraction, 1.0);
    assert_eq!(fs::metadata(&reports[0].0).unwrap().len(), HEADER_BYTES);
}

#[test]
fn test_missing_time_fix_falls_back_to_system_clock() {
    let h = Harness::new();
    let before = system_epoch_seconds();
    let no_fix = TimeSource::reference(FixedReference(ReferenceReading::absent()));
    let mut session = h.session(
        packets([0], 100),
        h.config(FileBudget::packets(1), Some(1)),
        no_fix,
    );
    session.run().unwrap();
    let (path, _) = &h.sink.reports()[0];
    let header = FileHeader::read_from(&mut fs::File::open(path).unwrap()).unwrap();
    assert!(!header.time_valid);
    assert_ne!(header.epoch_seconds, 0);
    assert!(header.epoch_seconds >= before);
    assert!(header.epoch_seconds <= system_epoch_seconds());
    assert_eq!(header.position.latitude, 0.0);
    assert_eq!(header.position.longitude, 0.0);
    assert_eq!(header.position.elevation, 0.0);
}

#[test]
fn test_fatal_source_error_keeps_partial_file() {
    let h = Harness::new();
    let mut events = packets([0, 8, 16], 100);
    events.push(Event::Fatal);
    let mut session = h.session(events, h.config(FileBudget::packets(10), None), gps());
    let err = session.run().unwrap_err();
    assert!(matches!(err, CaptureError::CaptureSourceFatal(_)));
    assert!(err.is_restartable());
    assert_eq!(session.state(), SessionState::Closed);
    assert!(h.sink.reports().is_empty());

    // The three packets made it to disk
    let dir = fs::read_dir(h.root.path()).unwrap().next().unwrap().unwrap();
    let file = fs::read_dir(dir.path()).unwrap().next().unwrap().unwrap();
    assert_eq!(file.metadata().unwrap().len(), HEADER_BYTES + 300);
}

#[test]
fn test_shutdown_before_start_writes_nothing() {
    let h = Harness::new();
    h.shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    let mut session = h.session(
        packets([0], 100),
        h.config(FileBudget::packets(1), None),
        gps(),
    );
    assert_eq!(session.run().unwrap(), SessionEnd::Shutdown);
    assert_eq!(fs::read_dir(h.root.path()).unwrap().count(), 0);
}

#[test]
fn test_unwritable_output_is_storage_error() {
    let h = Harness::new();
    let blocker = h.root.path().join("file");
    fs::write(&blocker, b"").unwrap();
    let mut config = h.config(FileBudget::packets(1), None);
    config.output_root = blocker;
    let mut session = h.session(packets([0], 100), config, gps());
    let err = session.run().unwrap_err();
    assert!(matches!(err, CaptureError::StorageUnavailable { .. }));
    assert!(!err.is_restartable());
    assert_eq!(session.state(), SessionState::Closed);
}

#[test]
fn test_missing_output_root_is_storage_error() {
    let h = Harness::new();
    let mut config = h.config(FileBudget::packets(1), None);
    config.output_root = h.root.path().join("media/BASEBAND/baseband");
    let mut session = h.session(packets([0], 100), config, gps());
    let err = session.run().unwrap_err();
    assert!(matches!(err, CaptureError::StorageUnavailable { .. }));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(!h.root.path().join("media").exists());
}

#[test]
fn test_reader_finds_payload_from_leading_word() {
    let h = Harness::new();
    let mut session = h.session(
        packets([4096, 4104, 4112], 100),
        h.config(FileBudget::packets(3), Some(1)),
        gps(),
    );
    session.run().unwrap();
    let (path, _) = &h.sink.reports()[0];

    let mut file = fs::File::open(path).unwrap();
    let header = FileHeader::read_from(&mut file).unwrap();
    let mut leading = [0u8; 8];
    file.seek(SeekFrom::Start(0)).unwrap();
    file.read_exact(&mut leading).unwrap();
    assert_eq!(u64::from_be_bytes(leading), header.header_bytes());

    file.seek(SeekFrom::Start(header.payload_offset())).unwrap();
    let mut sequence = [0u8; 4];
    file.read_exact(&mut sequence).unwrap();
    assert_eq!(u32::from_be_bytes(sequence), 4096);
    assert_eq!(
        fs::metadata(path).unwrap().len(),
        header.payload_offset() + 300
    );
}

#[test]
fn test_skipped_packets_are_logged() {
    let h = Harness::new();
    let mut events = packets([0], 100);
    events.push(Event::Packet(vec![0, 0, 0]));
    let mut session = h.session(events, h.config(FileBudget::packets(10), None), gps());
    let (end, log) = with_captured_warnings(|| session.run());
    assert_eq!(end.unwrap(), SessionEnd::Shutdown);
    assert!(log.contains("Skipping bad packet"));
    assert!(log.contains("malformed frame: 3 bytes"));
}
