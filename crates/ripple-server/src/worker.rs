//! The per-connection worker.
//!
//! One worker owns one client connection and drives it through a
//! strictly sequential cycle: read a frame, parse it into a command,
//! dispatch fragments to the owning shards, collect and reassemble the
//! replies, write the response. Watch notifications are delivered
//! laterally — the loop selects between the socket and the worker's
//! notification inbox, so pushes only interleave between responses,
//! never inside one.
//!
//! Multi-key commands fragment across shards: the worker creates a
//! local response inbox of known cardinality, tags each fragment with
//! its index, and reassembles the replies in argument order whatever
//! order the shards answered in. The per-command timeout is enforced
//! here; dropping the response inbox cancels whatever fragments are
//! still pending.
//!
//! The worker is generic over the stream so the whole state machine
//! runs identically over TCP and over in-process duplex pipes in
//! tests.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use ripple_core::{
    CombinePolicy, Command, CommandError, CommandKind, CommandSpec, CommandTable, DispatchMode,
    Fragment, ReplySink, Response, ShardManager, ShardMessage,
};
use ripple_protocol::{command_parts, parse_frame, Frame};

use crate::config::Config;
use crate::watch::{fingerprint, FingerprintKind, WatchCommand};
use crate::wire::{notification_frame, response_frame};
use crate::worker_manager::{WorkerManager, WorkerRegistration};

/// Initial read/write buffer capacity.
const BUF_CAPACITY: usize = 4096;

/// Hard cap on the read buffer: a client streaming an incomplete frame
/// can't grow memory without bound.
const MAX_BUF_SIZE: usize = 64 * 1024 * 1024;

/// Idle disconnect threshold. The timer restarts on any activity,
/// including delivered notifications.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Everything a worker needs, shared across all connections.
#[derive(Clone)]
pub struct WorkerContext {
    pub config: Arc<Config>,
    pub table: Arc<CommandTable>,
    pub shards: Arc<ShardManager>,
    pub workers: Arc<WorkerManager>,
    pub watch_tx: Option<mpsc::Sender<WatchCommand>>,
}

/// Drives one client connection to completion, then cleans up the
/// worker's registration and watch subscriptions.
pub async fn run<S>(
    mut stream: S,
    registration: WorkerRegistration,
    ctx: WorkerContext,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let worker_id = registration.id;
    let result = drive(&mut stream, &registration, &ctx, &mut shutdown).await;

    ctx.workers.deregister(worker_id);
    if let Some(tx) = &ctx.watch_tx {
        let _ = tx.send(WatchCommand::Disconnect { worker_id }).await;
    }
    debug!(worker_id, "connection closed");
    result
}

async fn drive<S>(
    stream: &mut S,
    registration: &WorkerRegistration,
    ctx: &WorkerContext,
    shutdown: &mut watch::Receiver<bool>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = Session {
        ctx: ctx.clone(),
        worker_id: registration.id,
        authed: ctx.config.require_pass.is_none(),
        request_seq: 0,
        closing: false,
    };

    let mut buf = BytesMut::with_capacity(BUF_CAPACITY);
    let mut out = BytesMut::with_capacity(BUF_CAPACITY);

    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),

            notification = registration.inbox.recv() => {
                out.clear();
                match notification {
                    Some(n) => {
                        notification_frame(n).serialize(&mut out);
                        stream.write_all(&out).await?;
                    }
                    None => {
                        // inbox closed under the disconnect policy
                        Frame::Error(CommandError::subscriber_overflow().message)
                            .serialize(&mut out);
                        let _ = stream.write_all(&out).await;
                        return Ok(());
                    }
                }
            }

            read = tokio::time::timeout(IDLE_TIMEOUT, stream.read_buf(&mut buf)) => {
                match read {
                    Err(_) => return Ok(()), // idle, close silently
                    Ok(Ok(0)) => return Ok(()),
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => return Err(e),
                }
                if buf.len() > MAX_BUF_SIZE {
                    out.clear();
                    Frame::Error("ERR max request buffer exceeded".into()).serialize(&mut out);
                    let _ = stream.write_all(&out).await;
                    return Ok(());
                }

                // drain every complete frame (pipelining), batching the
                // responses into one write
                out.clear();
                loop {
                    match parse_frame(&buf) {
                        Ok(Some((frame, consumed))) => {
                            buf.advance(consumed);
                            let response = session.handle_frame(frame).await;
                            response.serialize(&mut out);
                            if session.closing {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            Frame::Error(CommandError::parse(e).message).serialize(&mut out);
                            stream.write_all(&out).await?;
                            return Ok(());
                        }
                    }
                }
                if !out.is_empty() {
                    stream.write_all(&out).await?;
                }
                if session.closing {
                    return Ok(());
                }
            }
        }
    }
}

/// Per-connection state threaded through the request cycle.
struct Session {
    ctx: WorkerContext,
    worker_id: u64,
    authed: bool,
    request_seq: u64,
    /// Set when an unrecoverable error ends the connection after the
    /// current response is flushed.
    closing: bool,
}

impl Session {
    /// Full request cycle for one frame: parse, resolve, dispatch,
    /// collect, and shape the response frame.
    async fn handle_frame(&mut self, frame: Frame) -> Frame {
        let response = match command_parts(frame) {
            Ok(parts) => self.handle_parts(parts).await,
            Err(e) => Response::Error(CommandError::parse(e)),
        };
        if let Response::Error(e) = &response {
            if !e.kind.is_recoverable() {
                self.closing = true;
            }
        }
        response_frame(response)
    }

    async fn handle_parts(&mut self, parts: Vec<Bytes>) -> Response {
        let name = String::from_utf8_lossy(&parts[0]).to_ascii_uppercase();
        let args = parts[1..].to_vec();

        self.request_seq += 1;
        let mut command = Command::new(name, args);
        command.worker_id = self.worker_id;
        command.request_id = self.request_seq;

        let table = Arc::clone(&self.ctx.table);
        let Some(spec) = table.lookup(&command.name) else {
            return CommandError::unknown_command(&command.name).into();
        };
        if let Err(e) = spec.check_arity(&command) {
            return e.into();
        }

        if !self.authed && command.name != "AUTH" {
            return CommandError::auth_required().into();
        }

        match spec.dispatch {
            DispatchMode::Inline => self.inline(command).await,
            DispatchMode::SingleKey => self.dispatch_single(command).await,
            DispatchMode::MultiKey => self.dispatch_multi(spec, command).await,
            DispatchMode::Broadcast => self.dispatch_broadcast(spec, command).await,
        }
    }

    // -- inline commands --------------------------------------------------

    async fn inline(&mut self, command: Command) -> Response {
        match command.name.as_str() {
            "PING" => match command.args.first() {
                None => Response::Simple("PONG"),
                Some(msg) => Response::Bulk(msg.clone()),
            },
            "ECHO" => Response::Bulk(command.args[0].clone()),
            "AUTH" => self.auth(&command),
            "WATCH" => self.watch_subscribe(command).await,
            "UNWATCH" => self.watch_unsubscribe(command).await,
            other => CommandError::internal(format!("unroutable inline command {other}")).into(),
        }
    }

    fn auth(&mut self, command: &Command) -> Response {
        match &self.ctx.config.require_pass {
            None => CommandError::auth_not_enabled().into(),
            Some(expected) if command.args[0] == expected.as_bytes() => {
                self.authed = true;
                Response::ok()
            }
            Some(_) => CommandError::invalid_password().into(),
        }
    }

    // -- watch commands ---------------------------------------------------

    /// WATCH <cmd> <args…>: registers a subscription keyed by the
    /// template's fingerprint and answers with the initial snapshot.
    async fn watch_subscribe(&mut self, command: Command) -> Response {
        let Some(watch_tx) = self.ctx.watch_tx.clone() else {
            return CommandError::internal("watch is not enabled on this deployment").into();
        };
        let (template, kind) = match self.watch_template(&command) {
            Ok(pair) => pair,
            Err(e) => return e.into(),
        };
        let fp = fingerprint(&template);

        if watch_tx
            .send(WatchCommand::Subscribe {
                worker_id: self.worker_id,
                fingerprint: fp,
                kind: kind.clone(),
                template: template.clone(),
            })
            .await
            .is_err()
        {
            return CommandError::shutting_down().into();
        }

        let snapshot = match kind {
            FingerprintKind::Query => match self.round_trip(template).await {
                Ok(result) => result,
                Err(e) => return e.into(),
            },
            FingerprintKind::CommandPattern { .. } => Response::ok(),
        };
        Response::Array(vec![
            Response::Bulk(Bytes::from(fp.to_string())),
            snapshot,
        ])
    }

    /// UNWATCH <cmd> <args…>: removes the subscription with the same
    /// fingerprint the matching WATCH computed.
    async fn watch_unsubscribe(&mut self, command: Command) -> Response {
        let Some(watch_tx) = self.ctx.watch_tx.clone() else {
            return CommandError::internal("watch is not enabled on this deployment").into();
        };
        let (template, _) = match self.watch_template(&command) {
            Ok(pair) => pair,
            Err(e) => return e.into(),
        };
        let fp = fingerprint(&template);
        if watch_tx
            .send(WatchCommand::Unsubscribe {
                worker_id: self.worker_id,
                fingerprint: fp,
            })
            .await
            .is_err()
        {
            return CommandError::shutting_down().into();
        }
        Response::ok()
    }

    /// Builds the subscription template from WATCH/UNWATCH arguments
    /// and classifies it: read-only inner commands become query
    /// watches, mutating inner commands become key-pattern watches.
    fn watch_template(
        &self,
        command: &Command,
    ) -> Result<(Command, FingerprintKind), CommandError> {
        let inner_name = String::from_utf8_lossy(&command.args[0]).to_ascii_uppercase();
        let inner_args = command.args[1..].to_vec();
        let Some(inner_spec) = self.ctx.table.lookup(&inner_name) else {
            return Err(CommandError::unknown_command(&inner_name));
        };

        let mut template = Command::new(inner_name, inner_args);
        template.worker_id = self.worker_id;

        match inner_spec.kind {
            CommandKind::ReadOnly => {
                inner_spec.check_arity(&template)?;
                Ok((template, FingerprintKind::Query))
            }
            kind if kind.mutates() => {
                let [pattern] = template.args.as_slice() else {
                    return Err(CommandError::wrong_args("WATCH"));
                };
                let kind = FingerprintKind::CommandPattern {
                    pattern: pattern.clone(),
                };
                Ok((template, kind))
            }
            _ => Err(CommandError::new(
                ripple_core::ErrorKind::Args,
                format!("ERR cannot watch '{}'", template.name),
            )),
        }
    }

    // -- shard dispatch ---------------------------------------------------

    /// One fragment, routed by the first argument.
    async fn dispatch_single(&self, command: Command) -> Response {
        match self.round_trip(command).await {
            Ok(response) => response,
            Err(e) => e.into(),
        }
    }

    async fn round_trip(&self, command: Command) -> Result<Response, CommandError> {
        let shard_id = command
            .args
            .first()
            .map(|key| self.ctx.shards.route(key))
            .unwrap_or(0);
        let (tx, mut rx) = mpsc::channel::<Fragment>(1);
        self.ctx
            .shards
            .send(
                shard_id,
                ShardMessage {
                    command,
                    reply: ReplySink::new(tx, 0),
                },
            )
            .await?;
        let mut responses = self.collect(&mut rx, 1).await?;
        Ok(responses.pop().unwrap_or(Response::Null))
    }

    /// Fragments a multi-key command, one fragment per key, and
    /// reassembles in argument order under the spec's policy.
    async fn dispatch_multi(&self, spec: &CommandSpec, command: Command) -> Response {
        let Some(fragment_fn) = spec.fragment else {
            return CommandError::internal(format!("{} has no fragmenter", spec.name)).into();
        };
        let fragments = match fragment_fn(&command) {
            Ok(fragments) => fragments,
            Err(e) => return e.into(),
        };
        let count = fragments.len();
        if count == 0 {
            return assemble(spec, Vec::new());
        }

        let (tx, mut rx) = mpsc::channel::<Fragment>(count);
        for (index, fragment) in fragments.into_iter().enumerate() {
            let shard_id = fragment
                .args
                .first()
                .map(|key| self.ctx.shards.route(key))
                .unwrap_or(0);
            if let Err(e) = self
                .ctx
                .shards
                .send(
                    shard_id,
                    ShardMessage {
                        command: fragment,
                        reply: ReplySink::new(tx.clone(), index),
                    },
                )
                .await
            {
                return e.into();
            }
        }
        drop(tx);

        match self.collect(&mut rx, count).await {
            Ok(responses) => combine(spec, responses),
            Err(e) => e.into(),
        }
    }

    /// One fragment per shard, for key-independent admin commands.
    async fn dispatch_broadcast(&self, spec: &CommandSpec, command: Command) -> Response {
        let count = self.ctx.shards.shard_count();
        let (tx, mut rx) = mpsc::channel::<Fragment>(count);
        for shard_id in 0..count {
            if let Err(e) = self
                .ctx
                .shards
                .send(
                    shard_id as u16,
                    ShardMessage {
                        command: command.clone(),
                        reply: ReplySink::new(tx.clone(), shard_id),
                    },
                )
                .await
            {
                return e.into();
            }
        }
        drop(tx);

        match self.collect(&mut rx, count).await {
            Ok(responses) => combine(spec, responses),
            Err(e) => e.into(),
        }
    }

    /// Collects `count` fragment replies, slotting each by its index.
    /// The per-command timeout starts here; on expiry the receiver is
    /// dropped, which cancels whatever fragments are still pending.
    async fn collect(
        &self,
        rx: &mut mpsc::Receiver<Fragment>,
        count: usize,
    ) -> Result<Vec<Response>, CommandError> {
        let mut slots: Vec<Option<Response>> = (0..count).map(|_| None).collect();

        let fill = async {
            let mut got = 0;
            while got < count {
                match rx.recv().await {
                    Some(fragment) => {
                        if fragment.index < count && slots[fragment.index].is_none() {
                            slots[fragment.index] = Some(fragment.response);
                            got += 1;
                        }
                    }
                    None => break,
                }
            }
        };
        if tokio::time::timeout(self.ctx.config.command_timeout, fill)
            .await
            .is_err()
        {
            return Err(CommandError::internal("command timed out"));
        }

        slots
            .into_iter()
            .map(|slot| slot.ok_or_else(CommandError::shutting_down))
            .collect()
    }
}

/// Applies the combining policy, then the spec's assembler.
fn combine(spec: &CommandSpec, responses: Vec<Response>) -> Response {
    match spec.combine {
        CombinePolicy::AllOrError => {
            if let Some(err) = responses.iter().find(|r| r.is_error()) {
                return err.clone();
            }
        }
        CombinePolicy::FirstMatch => {
            return responses
                .into_iter()
                .find(|r| !matches!(r, Response::Null) && !r.is_error())
                .unwrap_or(Response::Null);
        }
        CombinePolicy::PartialOk => {}
    }
    assemble(spec, responses)
}

fn assemble(spec: &CommandSpec, responses: Vec<Response>) -> Response {
    match spec.assemble {
        Some(assemble_fn) => assemble_fn(responses),
        None => responses.into_iter().next().unwrap_or(Response::Null),
    }
}
