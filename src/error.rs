//! Error taxonomy for the capture pipeline

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::channels::BitDepth;

pub type CaptureResult<T> = std::result::Result<T, CaptureError>;

/// Problems with a single packet. These never leave the receive loop.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("malformed frame: {len} bytes is too short for a sequence number")]
    MalformedFrame { len: usize },
    #[error("truncated packet: expected {expected} bytes, got {actual}")]
    TruncatedPacket { expected: usize, actual: usize },
    #[error("{0}-bit sample decoding is not implemented")]
    UnsupportedBitDepth(BitDepth),
}

/// Errors that end a capture session
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The packet source went away (device reset, interface down, socket closed)
    #[error("capture source failed: {0}")]
    CaptureSourceFatal(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Nowhere to write, or a write failed. Never retried.
    #[error("storage unavailable at {path:?}: {source}")]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CaptureError {
    pub fn source_fatal<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::CaptureSourceFatal(err.into())
    }

    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::StorageUnavailable {
            path: path.into(),
            source,
        }
    }

    /// Whether a supervisor should build a fresh session after this error
    pub fn is_restartable(&self) -> bool {
        matches!(self, Self::CaptureSourceFatal(_))
    }
}

/// The time/position reference had no fix to give
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("time reference unavailable: {0}")]
pub struct TimeReferenceUnavailable(pub String);

/// Bad channel plan or packet layout, caught before capture starts
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("invalid channel range {0:?}, expected start:stop")]
    InvalidRange(String),
    #[error("channel range {start}:{stop} is empty")]
    EmptyRange { start: u16, stop: u16 },
    #[error("channel plan selects no channels")]
    NoChannels,
    #[error("unsupported bit depth {0}, expected 1, 2 or 4")]
    InvalidBitDepth(u64),
    #[error("spectra per packet must be at least 1")]
    NoSpectra,
}
