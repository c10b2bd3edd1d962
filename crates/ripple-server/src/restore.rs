//! WAL restore: streams logged records back through the shards.
//!
//! Runs in the bootstrap before any client is accepted. The blocking
//! WAL iterator feeds a bounded channel from a blocking task; each
//! record is parsed and re-dispatched to the owning shard through the
//! normal routing path with the replay flag set, so shards don't
//! re-append what they're replaying. Stable routing guarantees every
//! record lands on the shard that originally owned it.

use std::sync::Arc;

use tokio::sync::mpsc;

use ripple_core::{Command, ShardManager};
use ripple_protocol::{command_parts, parse_frame};
use ripple_wal::{WalError, WalRecord, WalSink};

/// Replays the whole log, in original per-shard seq order. Returns the
/// number of commands re-dispatched.
pub async fn replay_wal(wal: Arc<dyn WalSink>, shards: &ShardManager) -> Result<u64, WalError> {
    let (tx, mut rx) = mpsc::channel::<WalRecord>(1024);
    let reader = tokio::task::spawn_blocking(move || {
        wal.replay(&mut |record| {
            tx.blocking_send(record)
                .map_err(|_| WalError::Fatal("replay consumer dropped".into()))
        })
    });

    let mut count = 0u64;
    while let Some(record) = rx.recv().await {
        let command = decode_record(&record)?;
        // the record names its owner; with a stable hash and the same
        // shard count this agrees with key routing, and it is the only
        // correct answer for keyless broadcast commands
        if usize::from(record.shard_id) >= shards.shard_count() {
            return Err(WalError::Fatal(format!(
                "record for shard {} but only {} shards configured",
                record.shard_id,
                shards.shard_count()
            )));
        }
        shards
            .dispatch_to(record.shard_id, command)
            .await
            .map_err(|e| WalError::Fatal(format!("replay dispatch failed: {e}")))?;
        count += 1;
    }

    reader
        .await
        .map_err(|e| WalError::Fatal(format!("replay reader panicked: {e}")))??;
    Ok(count)
}

fn decode_record(record: &WalRecord) -> Result<Command, WalError> {
    let bad = |detail: String| WalError::Fatal(format!("corrupt WAL record: {detail}"));
    let (frame, _) = parse_frame(&record.command)
        .map_err(|e| bad(e.to_string()))?
        .ok_or_else(|| bad("incomplete frame".into()))?;
    let parts = command_parts(frame).map_err(|e| bad(e.to_string()))?;
    let name = String::from_utf8_lossy(&parts[0]).to_ascii_uppercase();
    let mut command = Command::new(name, parts[1..].to_vec());
    command.from_replay = true;
    Ok(command)
}
