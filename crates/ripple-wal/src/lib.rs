//! ripple-wal: the durability contract consumed by the engine.
//!
//! The engine only ever sees the [`WalSink`] trait. A shard hands the
//! raw command bytes plus its monotonic sequence number to `append`
//! immediately before making the mutation visible; the bootstrap calls
//! `replay` before any client is accepted and `shutdown` on the way
//! out. Three backends ship in this crate:
//!
//! - [`NullWal`] — accepts everything, remembers nothing.
//! - [`SegmentedWal`] — rotating append-only segments with CRC32-framed
//!   records and a periodic-flush durability model.
//! - [`SqliteWal`] — an embedded SQLite table, durable on append.
//!
//! Error severity is part of the contract: a [`WalError::Fatal`] append
//! must abort the mutation, while [`WalError::Degraded`] leaves the
//! admit/abort decision to engine policy.

mod null;
mod segment;
mod sqlite;

use std::time::SystemTime;

use bytes::Bytes;
use thiserror::Error;

pub use null::NullWal;
pub use segment::SegmentedWal;
pub use sqlite::SqliteWal;

/// Errors surfaced by WAL backends, split by severity.
#[derive(Debug, Error)]
pub enum WalError {
    /// The record could not be made durable. The caller must abort the
    /// mutation it was about to apply.
    #[error("wal failure: {0}")]
    Fatal(String),

    /// The log is still accepting records but durability is impaired
    /// (for example, segment rotation failed and writes continue into
    /// an oversized segment). Engine policy decides whether to admit.
    #[error("wal degraded: {0}")]
    Degraded(String),
}

/// One logged mutation, yielded back during replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// The shard that appended the record.
    pub shard_id: u16,
    /// The shard's sequence number at append time. Strictly increasing
    /// within a shard.
    pub seq: u64,
    /// The raw command bytes, exactly as appended.
    pub command: Bytes,
}

/// The append-only durability sink the engine writes through.
///
/// Implementations are shared across shard tasks behind an `Arc`, so
/// every method takes `&self` and serializes internally.
pub trait WalSink: Send + Sync {
    /// Opens (or creates) the log. Idempotent; called once by the
    /// bootstrap before any shard starts.
    fn init(&self, now: SystemTime) -> Result<(), WalError>;

    /// Appends one command record. Durable on return unless the
    /// backend documents an asynchronous flush model.
    fn append(&self, shard_id: u16, seq: u64, command: &[u8]) -> Result<(), WalError>;

    /// Pushes buffered records toward stable storage. Driven by the
    /// background flusher for asynchronous backends; a no-op elsewhere.
    fn flush(&self) -> Result<(), WalError> {
        Ok(())
    }

    /// Iterates every record in append order, which preserves each
    /// shard's original `seq` order. The visitor may abort replay by
    /// returning an error.
    fn replay(
        &self,
        visitor: &mut dyn FnMut(WalRecord) -> Result<(), WalError>,
    ) -> Result<(), WalError>;

    /// Flushes and closes the log.
    fn shutdown(&self) -> Result<(), WalError>;
}
