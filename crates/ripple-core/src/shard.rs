//! Shard: single-threaded owner of one keyspace partition.
//!
//! Each shard runs as one tokio task that exclusively owns its
//! [`Store`]. All mutation against the partition is serialized through
//! the shard's bounded inbox — no locks anywhere on the hot path, and
//! command execution itself never suspends.
//!
//! The loop selects over three inputs: inbox messages, the expirer
//! tick, and process shutdown. After each wake it drains whatever else
//! is already queued with `try_recv`, amortizing scheduler overhead
//! across pipelined bursts.
//!
//! WAL ordering: a mutating command consumes the next sequence number
//! and is appended to the WAL *before* it executes, so the log sees
//! every shard's mutations in exactly the order the store applied
//! them. A `Fatal` append aborts the command with `DURABILITY_FAILED`
//! and the store is untouched; a `Degraded` append is logged and the
//! write admitted (inverted by the strict-degraded policy).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use ripple_wal::{WalError, WalSink};

use crate::command::{Command, Response};
use crate::error::CommandError;
use crate::event::ChangeEvent;
use crate::registry::CommandTable;
use crate::store::Store;

/// How often the shard scans the front of its expiry index.
pub(crate) const EXPIRY_TICK: Duration = Duration::from_millis(100);

/// One fragment response, tagged with its position in the originating
/// command's fragment set.
#[derive(Debug)]
pub struct Fragment {
    pub index: usize,
    pub response: Response,
}

/// Where a shard sends the response for one fragment: the worker's
/// local response inbox plus this fragment's index.
#[derive(Debug, Clone)]
pub struct ReplySink {
    tx: mpsc::Sender<Fragment>,
    index: usize,
}

impl ReplySink {
    pub fn new(tx: mpsc::Sender<Fragment>, index: usize) -> Self {
        Self { tx, index }
    }

    /// Delivers the response. A dropped receiver (worker gone or
    /// command timed out) is not an error from the shard's view.
    pub async fn send(self, response: Response) {
        let _ = self
            .tx
            .send(Fragment {
                index: self.index,
                response,
            })
            .await;
    }
}

/// What travels through a shard inbox.
#[derive(Debug)]
pub struct ShardMessage {
    pub command: Command,
    pub reply: ReplySink,
}

/// The single owner of one store partition.
pub(crate) struct Shard {
    id: u16,
    store: Store,
    table: Arc<CommandTable>,
    wal: Arc<dyn WalSink>,
    /// Strictly increasing across this shard's mutations; stamped on
    /// WAL appends and change events.
    seq: u64,
    query_events: Option<mpsc::Sender<ChangeEvent>>,
    cmd_events: Option<mpsc::Sender<ChangeEvent>>,
    strict_degraded: bool,
    expiry_batch: usize,
}

impl Shard {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u16,
        store: Store,
        table: Arc<CommandTable>,
        wal: Arc<dyn WalSink>,
        query_events: Option<mpsc::Sender<ChangeEvent>>,
        cmd_events: Option<mpsc::Sender<ChangeEvent>>,
        strict_degraded: bool,
        expiry_batch: usize,
    ) -> Self {
        Self {
            id,
            store,
            table,
            wal,
            seq: 0,
            query_events,
            cmd_events,
            strict_degraded,
            expiry_batch,
        }
    }

    /// The shard main loop. Runs until shutdown is signalled or every
    /// sender is gone, then drains the inbox rejecting stragglers.
    pub(crate) async fn run(
        mut self,
        mut inbox: mpsc::Receiver<ShardMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut tick = tokio::time::interval(EXPIRY_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                msg = inbox.recv() => {
                    match msg {
                        Some(msg) => {
                            self.process(msg).await;
                            // drain queued messages before re-entering
                            // select!, so pipelined bursts pay the
                            // scheduler cost once
                            while let Ok(msg) = inbox.try_recv() {
                                self.process(msg).await;
                            }
                        }
                        None => break,
                    }
                }
                _ = tick.tick() => {
                    self.expire_cycle();
                }
                _ = shutdown.changed() => break,
            }
        }

        // reject whatever is still queued; senders see a closed channel
        inbox.close();
        while let Some(msg) = inbox.recv().await {
            msg.reply
                .send(Response::Error(CommandError::shutting_down()))
                .await;
        }
        debug!(shard_id = self.id, final_seq = self.seq, "shard stopped");
    }

    async fn process(&mut self, msg: ShardMessage) {
        let ShardMessage { command, reply } = msg;

        let Some(spec) = self.table.lookup(&command.name) else {
            reply
                .send(Response::Error(CommandError::unknown_command(&command.name)))
                .await;
            return;
        };

        let mut seq_reserved = false;
        if spec.kind.mutates() {
            // the sequence slot is consumed whether or not the command
            // ends up changing state, so the WAL never repeats a seq
            self.seq += 1;
            seq_reserved = true;

            if !command.from_replay {
                let raw = command.encode();
                match self.wal.append(self.id, self.seq, &raw) {
                    Ok(()) => {}
                    Err(WalError::Fatal(e)) => {
                        error!(shard_id = self.id, seq = self.seq, error = %e, "wal append failed, aborting command");
                        reply
                            .send(Response::Error(CommandError::durability_failed()))
                            .await;
                        return;
                    }
                    Err(WalError::Degraded(e)) => {
                        if self.strict_degraded {
                            warn!(shard_id = self.id, seq = self.seq, error = %e, "wal degraded under strict policy, aborting command");
                            reply
                                .send(Response::Error(CommandError::durability_failed()))
                                .await;
                            return;
                        }
                        warn!(shard_id = self.id, seq = self.seq, error = %e, "wal degraded, admitting write");
                    }
                }
            }
        }

        let response = match spec.execute {
            Some(execute) => execute(&mut self.store, &command),
            None => Response::Error(CommandError::internal(format!(
                "{} is not executable on a shard",
                command.name
            ))),
        };

        self.emit_changes(seq_reserved);
        reply.send(response).await;
    }

    /// Runs one expirer cycle: drop due keys from the front of the
    /// expiry index and publish the resulting events.
    fn expire_cycle(&mut self) {
        if self.store.expire_due(self.expiry_batch) > 0 {
            self.emit_changes(false);
        }
    }

    /// Stamps recorded store changes with sequence numbers and fans
    /// them into the aggregate watch streams.
    ///
    /// When `seq_reserved` is set, the current sequence number was
    /// already consumed by the WAL append for this command, and the
    /// first change rides on it; later changes (an eviction preceding
    /// an admission, for instance) each take a fresh number.
    ///
    /// Events go out with `try_send`: the watch fabric dispatches
    /// recomputation reads back into shard inboxes, so a shard that
    /// blocked on a full event stream could wedge against a fabric
    /// that blocked on this shard. Dropping under pressure keeps the
    /// shard live; watch delivery is already lossy by policy.
    fn emit_changes(&mut self, seq_reserved: bool) {
        let changes = self.store.drain_changes();
        if changes.is_empty() {
            return;
        }
        if self.query_events.is_none() && self.cmd_events.is_none() {
            // watch disabled: sequence numbers still advance
            let extra = changes.len() - usize::from(seq_reserved);
            self.seq += extra as u64;
            return;
        }
        for (i, change) in changes.into_iter().enumerate() {
            if i > 0 || !seq_reserved {
                self.seq += 1;
            }
            let event = ChangeEvent::from_change(self.id, self.seq, change);
            if let Some(tx) = &self.query_events {
                if tx.try_send(event.clone()).is_err() {
                    warn!(shard_id = self.id, seq = self.seq, "query watch stream full, event dropped");
                }
            }
            if let Some(tx) = &self.cmd_events {
                if tx.try_send(event).is_err() {
                    warn!(shard_id = self.id, seq = self.seq, "command watch stream full, event dropped");
                }
            }
        }
    }
}
