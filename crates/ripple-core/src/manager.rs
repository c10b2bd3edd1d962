//! ShardManager: constructs the shards, owns their inboxes, and routes
//! commands by stable key hash.
//!
//! Routing uses FNV-1a over the raw key bytes. The hash is a fixed
//! algorithm with fixed constants, so `route(key)` is identical across
//! process restarts with the same shard count — WAL replay depends on
//! every record landing back on the shard that originally owned it.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use ripple_wal::WalSink;

use crate::command::{Command, Response};
use crate::error::CommandError;
use crate::event::ChangeEvent;
use crate::registry::CommandTable;
use crate::shard::{Fragment, ReplySink, Shard, ShardMessage};
use crate::store::{Store, StoreConfig, DEFAULT_EVICTION_SAMPLE};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over the key bytes. Deterministic across restarts; that
/// property is load-bearing for WAL replay.
pub fn stable_hash(key: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &byte in key {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Engine-level configuration, fixed for the process lifetime.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of shards. The keyspace partition count never changes
    /// while the process lives.
    pub shards: usize,
    /// Per-shard live-key bound; `None` disables eviction.
    pub keys_limit: Option<usize>,
    /// Candidates sampled per eviction.
    pub eviction_sample: usize,
    /// Shard inbox capacity. A full inbox backpressures the sending
    /// worker rather than dropping commands.
    pub inbox_capacity: usize,
    /// Capacity of each aggregate change-event stream.
    pub event_buffer: usize,
    /// Keys removed per expirer tick, per shard.
    pub expiry_batch: usize,
    /// Abort writes on `Degraded` WAL errors instead of admitting.
    pub strict_degraded: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shards: 1,
            keys_limit: None,
            eviction_sample: DEFAULT_EVICTION_SAMPLE,
            inbox_capacity: 1024,
            event_buffer: 4096,
            expiry_batch: 20,
            strict_degraded: false,
        }
    }
}

/// The two process-wide change-event streams, present when watch is
/// enabled. Query-style watches consume one, command-pattern watches
/// the other.
pub struct WatchStreams {
    pub query_events: mpsc::Receiver<ChangeEvent>,
    pub cmd_events: mpsc::Receiver<ChangeEvent>,
}

/// Join handles for the running shard tasks. Held by the bootstrap and
/// awaited during shutdown, after the cancellation signal flips.
pub struct ShardSet {
    handles: Vec<JoinHandle<()>>,
}

impl ShardSet {
    /// Waits for every shard to finish draining.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Owns the send side of every shard inbox.
pub struct ShardManager {
    senders: Vec<mpsc::Sender<ShardMessage>>,
}

impl ShardManager {
    /// Builds and spawns `config.shards` shard tasks.
    ///
    /// Returns the manager (shared by workers and the watch fabric),
    /// the join set for shutdown, and the aggregate change-event
    /// streams when `enable_watch` is set.
    pub fn spawn(
        config: &EngineConfig,
        table: Arc<CommandTable>,
        wal: Arc<dyn WalSink>,
        shutdown: watch::Receiver<bool>,
        enable_watch: bool,
    ) -> (Arc<Self>, ShardSet, Option<WatchStreams>) {
        assert!(config.shards > 0, "shard count must be at least 1");

        let (query_tx, cmd_tx, streams) = if enable_watch {
            let (query_tx, query_rx) = mpsc::channel(config.event_buffer);
            let (cmd_tx, cmd_rx) = mpsc::channel(config.event_buffer);
            (
                Some(query_tx),
                Some(cmd_tx),
                Some(WatchStreams {
                    query_events: query_rx,
                    cmd_events: cmd_rx,
                }),
            )
        } else {
            (None, None, None)
        };

        let mut senders = Vec::with_capacity(config.shards);
        let mut handles = Vec::with_capacity(config.shards);
        for id in 0..config.shards {
            let (tx, rx) = mpsc::channel(config.inbox_capacity);
            senders.push(tx);

            let store = Store::new(StoreConfig {
                shard_id: id as u16,
                keys_limit: config.keys_limit,
                eviction_sample: config.eviction_sample,
            });
            let shard = Shard::new(
                id as u16,
                store,
                Arc::clone(&table),
                Arc::clone(&wal),
                query_tx.clone(),
                cmd_tx.clone(),
                config.strict_degraded,
                config.expiry_batch,
            );
            handles.push(tokio::spawn(shard.run(rx, shutdown.clone())));
        }

        info!(shards = config.shards, "shard manager started");
        (
            Arc::new(Self { senders }),
            ShardSet { handles },
            streams,
        )
    }

    pub fn shard_count(&self) -> usize {
        self.senders.len()
    }

    /// Pure routing function: which shard owns `key`.
    pub fn route(&self, key: &[u8]) -> u16 {
        (stable_hash(key) % self.senders.len() as u64) as u16
    }

    /// Enqueues a message on a shard inbox, blocking when the inbox is
    /// full. Fails with `SHUTTING_DOWN` once the shard has terminated.
    pub async fn send(&self, shard_id: u16, msg: ShardMessage) -> Result<(), CommandError> {
        self.senders[shard_id as usize]
            .send(msg)
            .await
            .map_err(|_| CommandError::shutting_down())
    }

    /// Single-fragment round trip: routes by the command's first
    /// argument, dispatches, and awaits the response. Used by WAL
    /// replay, watch recomputation, and watch snapshots.
    pub async fn dispatch(&self, command: Command) -> Result<Response, CommandError> {
        let shard_id = command
            .args
            .first()
            .map(|key| self.route(key))
            .unwrap_or(0);
        self.dispatch_to(shard_id, command).await
    }

    /// Single-fragment round trip against an explicit shard.
    pub async fn dispatch_to(
        &self,
        shard_id: u16,
        command: Command,
    ) -> Result<Response, CommandError> {
        let (tx, mut rx) = mpsc::channel::<Fragment>(1);
        self.send(
            shard_id,
            ShardMessage {
                command,
                reply: ReplySink::new(tx, 0),
            },
        )
        .await?;
        match rx.recv().await {
            Some(fragment) => Ok(fragment.response),
            None => Err(CommandError::shutting_down()),
        }
    }
}

impl std::fmt::Debug for ShardManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardManager")
            .field("shards", &self.senders.len())
            .finish()
    }
}
