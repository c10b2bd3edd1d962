//! Parsed commands and engine responses.

use bytes::Bytes;
use ripple_protocol::encode_command;

use crate::error::CommandError;

/// A parsed request, as it travels from a worker to a shard.
///
/// Fragments of a multi-key command are themselves `Command`s: the
/// worker synthesizes one per target key, inheriting the originating
/// worker id and request sequence number.
#[derive(Debug, Clone)]
pub struct Command {
    /// Canonical (uppercase) command name.
    pub name: String,
    /// Arguments, excluding the name.
    pub args: Vec<Bytes>,
    /// The worker this command originated from.
    pub worker_id: u64,
    /// Per-worker request sequence number, used to pair fragments with
    /// their originating request.
    pub request_id: u64,
    /// Set during WAL replay so shards don't re-append the command.
    pub from_replay: bool,
}

impl Command {
    pub fn new(name: impl Into<String>, args: Vec<Bytes>) -> Self {
        Self {
            name: name.into(),
            args,
            worker_id: 0,
            request_id: 0,
            from_replay: false,
        }
    }

    /// Builds a fragment carrying this command's origin.
    pub fn fragment_of(&self, name: &'static str, args: Vec<Bytes>) -> Self {
        Self {
            name: name.to_owned(),
            args,
            worker_id: self.worker_id,
            request_id: self.request_id,
            from_replay: self.from_replay,
        }
    }

    /// The canonical wire encoding (array of bulk strings). This is
    /// what the shard hands to the WAL, and what replay parses back.
    pub fn encode(&self) -> Bytes {
        let mut parts = Vec::with_capacity(1 + self.args.len());
        parts.push(Bytes::copy_from_slice(self.name.as_bytes()));
        parts.extend(self.args.iter().cloned());
        encode_command(&parts)
    }
}

/// The engine's answer to a command. Mirrors the wire response tree;
/// the server layer converts it into a protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Simple(&'static str),
    Bulk(Bytes),
    Int(i64),
    Null,
    Array(Vec<Response>),
    Error(CommandError),
}

impl Response {
    pub fn ok() -> Response {
        Response::Simple("OK")
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }
}

impl From<CommandError> for Response {
    fn from(e: CommandError) -> Self {
        Response::Error(e)
    }
}
