//! Absolute time and position for file headers.
//!
//! The physical GPS reference is an external collaborator behind [`ReferenceClock`]. It may
//! have no fix, and it may hang, so [`BoundedReference`] puts a deadline on every query.

use std::{thread, time::Duration};

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, warn};

use crate::error::TimeReferenceUnavailable;

#[derive(Clone, Copy, Default, PartialEq, Debug)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Meters
    pub elevation: f64,
}

/// One answer from a reference device. Either half may be missing.
#[derive(Clone, Copy, Default, PartialEq, Debug)]
pub struct ReferenceReading {
    pub epoch_seconds: Option<u64>,
    pub position: Option<Position>,
}

impl ReferenceReading {
    pub fn absent() -> Self {
        Self::default()
    }
}

pub trait ReferenceClock: Send {
    fn read(&mut self) -> ReferenceReading;
}

/// The time and position that end up in a header
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct HeaderStamp {
    pub epoch_seconds: u64,
    pub position: Position,
    /// True only when the time came from the reference
    pub time_valid: bool,
}

pub fn system_epoch_seconds() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// Where header timestamps come from
pub enum TimeSource {
    Reference(Box<dyn ReferenceClock>),
    SystemClock,
}

impl TimeSource {
    pub fn reference<R: ReferenceClock + 'static>(clock: R) -> Self {
        Self::Reference(Box::new(clock))
    }

    /// Query the reference, or explain why there is no usable time
    pub fn reference_fix(
        &mut self,
    ) -> Result<(u64, Option<Position>), (TimeReferenceUnavailable, Option<Position>)> {
        match self {
            TimeSource::SystemClock => Err((
                TimeReferenceUnavailable("no reference configured".to_owned()),
                None,
            )),
            TimeSource::Reference(clock) => {
                let reading = clock.read();
                match reading.epoch_seconds {
                    Some(epoch) => Ok((epoch, reading.position)),
                    None => Err((
                        TimeReferenceUnavailable("reference reported no time fix".to_owned()),
                        reading.position,
                    )),
                }
            }
        }
    }

    /// Always produces a stamp. Without a reference fix the system clock is used and
    /// `time_valid` is cleared.
    pub fn stamp(&mut self) -> HeaderStamp {
        match self.reference_fix() {
            Ok((epoch_seconds, position)) => {
                if position.is_none() {
                    warn!("Time reference has no position fix, writing 0,0,0");
                }
                HeaderStamp {
                    epoch_seconds,
                    position: position.unwrap_or_default(),
                    time_valid: true,
                }
            }
            Err((why, position)) => {
                if matches!(self, TimeSource::Reference(_)) {
                    warn!(%why, "File timestamp coming from the system clock, this is unreliable");
                } else {
                    debug!("File timestamp coming from the system clock");
                }
                HeaderStamp {
                    epoch_seconds: system_epoch_seconds(),
                    position: position.unwrap_or_default(),
                    time_valid: false,
                }
            }
        }
    }
}

/// Runs a reference on its own thread so a dead device can't stall file rotation
pub struct BoundedReference {
    requests: Sender<()>,
    replies: Receiver<ReferenceReading>,
    timeout: Duration,
}

impl BoundedReference {
    pub fn spawn<R: ReferenceClock + 'static>(
        mut clock: R,
        timeout: Duration,
    ) -> std::io::Result<Self> {
        let (requests, request_rx) = bounded::<()>(1);
        let (reply_tx, replies) = bounded(1);
        thread::Builder::new()
            .name("time-reference".to_owned())
            .spawn(move || {
                for () in request_rx {
                    if reply_tx.send(clock.read()).is_err() {
                        break;
                    }
                }
            })?;
        Ok(Self {
            requests,
            replies,
            timeout,
        })
    }
}

impl ReferenceClock for BoundedReference {
    fn read(&mut self) -> ReferenceReading {
        // A late answer to a query we already gave up on is stale
        while self.replies.try_recv().is_ok() {}
        match self.requests.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => {
                warn!("Time reference still busy with an earlier query");
                return ReferenceReading::absent();
            }
            Err(TrySendError::Disconnected(())) => {
                warn!("Time reference thread is gone");
                return ReferenceReading::absent();
            }
        }
        match self.replies.recv_timeout(self.timeout) {
            Ok(reading) => reading,
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout = ?self.timeout, "Time reference did not answer in time");
                ReferenceReading::absent()
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Time reference thread is gone");
                ReferenceReading::absent()
            }
        }
    }
}
