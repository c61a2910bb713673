//! Loss-aware capture of channelized baseband packets from a digitizer to disk

pub mod args;
pub mod capture;
pub mod channels;
pub mod complex;
pub mod error;
pub mod frame;
pub mod header;
pub mod inspect;
pub mod loss;
pub mod reference;
pub mod source;
pub mod supervisor;

/// Every packet starts with a big-endian u32 spectrum counter
pub const SEQUENCE_BYTES: usize = 4;
