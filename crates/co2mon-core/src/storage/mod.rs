//! Bounded reading log
//!
//! Readings are persisted as text lines (`<timestamp>,<concentration>\n`) in a
//! single file. [`LogStore`] owns that file through a [`LogBackend`], keeps it
//! at most `max_entries` records long, and serializes every access with one
//! async mutex so the acquisition and query tasks never observe each other's
//! partial work.

pub mod log_store;
pub mod memory;
pub mod record;
pub mod sd_card;

extern crate alloc;
use alloc::vec::Vec;

use thiserror_no_std::Error;

pub use log_store::*;
pub use memory::MemoryBackend;
pub use record::*;
pub use sd_card::SdCardBackend;

/// Raw byte access to the persisted log.
///
/// Implementations are blocking; [`LogStore`] guarantees that at most one
/// method runs at a time.
pub trait LogBackend {
    type Error: core::fmt::Debug;

    /// Create an empty log if none exists. Calling this on every boot must be
    /// harmless.
    fn ensure_exists(&mut self) -> Result<(), Self::Error>;

    /// Append `bytes` to the end of the log. When this returns `Ok` the data
    /// must survive a power loss.
    fn append(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Replace `buf` with the full contents of the log.
    fn read_all(&mut self, buf: &mut Vec<u8>) -> Result<(), Self::Error>;

    /// Replace the full contents of the log with `bytes`, durably.
    fn replace(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;
}

#[derive(Error, Debug)]
pub enum StoreError<E: core::fmt::Debug> {
    #[error("storage backend failed: {0:?}")]
    Backend(E),
}
