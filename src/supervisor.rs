//! Keeps capture running across device resets.
//!
//! A fatal source error ends a [`CaptureSession`], but losing the network device is an
//! expected event on the instrument, so the supervisor opens a fresh source and starts a new
//! session after a short backoff. Storage failures are not retried.

use std::{
    mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use tracing::{error, info, warn};

use crate::{
    capture::{CaptureSession, LossSink, SessionConfig, SessionEnd},
    error::{CaptureError, CaptureResult},
    header::FileHeaderWriter,
    reference::TimeSource,
    source::PacketSource,
};

pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

pub struct SessionSupervisor {
    config: SessionConfig,
    headers: FileHeaderWriter,
    sink: Arc<dyn LossSink>,
    shutdown: Arc<AtomicBool>,
    backoff: Duration,
    restarts: u64,
    files: u64,
}

impl SessionSupervisor {
    pub fn new(
        config: SessionConfig,
        headers: FileHeaderWriter,
        sink: Arc<dyn LossSink>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            headers,
            sink,
            shutdown,
            backoff: DEFAULT_BACKOFF,
            restarts: 0,
            files: 0,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    /// Files finished across every session so far
    pub fn files(&self) -> u64 {
        self.files
    }

    /// Run sessions until shutdown or the file limit. `open_source` is called once per
    /// session so every session gets a fresh subscription.
    pub fn run<S, F>(&mut self, mut open_source: F) -> CaptureResult<()>
    where
        S: PacketSource,
        F: FnMut() -> CaptureResult<S>,
    {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!(restarts = self.restarts, files = self.files, "Supervisor stopping");
                return Ok(());
            }
            let source = match open_source() {
                Ok(source) => source,
                Err(e) if e.is_restartable() => {
                    self.restart(&e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let mut config = self.config.clone();
            if let Some(limit) = self.config.file_limit {
                config.file_limit = Some(limit.saturating_sub(self.files).max(1));
            }
            // The time source outlives sessions, it is handed back when each one ends
            let headers = mem::replace(
                &mut self.headers,
                FileHeaderWriter::new(TimeSource::SystemClock),
            );
            let mut session = CaptureSession::new(
                source,
                config,
                headers,
                self.sink.clone(),
                self.shutdown.clone(),
            );
            let result = session.run();
            self.files += session.files_closed();
            self.headers = session.into_headers();

            match result {
                Ok(SessionEnd::Shutdown) | Ok(SessionEnd::FileLimit) => {
                    info!(restarts = self.restarts, files = self.files, "Capture finished");
                    return Ok(());
                }
                Err(e) if e.is_restartable() => self.restart(&e),
                Err(e) => {
                    error!(error = %e, detail = ?e, "Storage failure, not restarting");
                    return Err(e);
                }
            }
        }
    }

    fn restart(&mut self, e: &CaptureError) {
        self.restarts += 1;
        error!(
            error = %e,
            detail = ?e,
            restart = self.restarts,
            backoff = ?self.backoff,
            "Capture session failed, starting a new one"
        );
        let deadline = Instant::now() + self.backoff;
        while !self.shutdown.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep((deadline - now).min(SHUTDOWN_POLL));
        }
        warn!("Stop requested during restart backoff");
    }
}
