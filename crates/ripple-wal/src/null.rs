//! The no-op WAL, used when durability is disabled.

use std::time::SystemTime;

use crate::{WalError, WalRecord, WalSink};

/// Accepts every append and replays nothing.
#[derive(Debug, Default)]
pub struct NullWal;

impl NullWal {
    pub fn new() -> Self {
        NullWal
    }
}

impl WalSink for NullWal {
    fn init(&self, _now: SystemTime) -> Result<(), WalError> {
        Ok(())
    }

    fn append(&self, _shard_id: u16, _seq: u64, _command: &[u8]) -> Result<(), WalError> {
        Ok(())
    }

    fn replay(
        &self,
        _visitor: &mut dyn FnMut(WalRecord) -> Result<(), WalError>,
    ) -> Result<(), WalError> {
        Ok(())
    }

    fn shutdown(&self) -> Result<(), WalError> {
        Ok(())
    }
}
