//! The command registry.
//!
//! Every command is described once, at startup, by a [`CommandSpec`]:
//! name, arity bounds, classification, combining policy, and the
//! function pointers that fragment, execute, and reassemble it.
//! Dispatch anywhere in the system is a table lookup — workers consult
//! the spec to route and assemble, shards consult it to execute.

use ahash::AHashMap;

use crate::command::{Command, Response};
use crate::commands;
use crate::error::CommandError;
use crate::store::Store;

/// Classification of a command, driving WAL appends, fragmentation,
/// and the watch fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Touches one key (or none) without mutating.
    ReadOnly,
    /// Mutates one key on one shard.
    Mutating,
    /// Touches several keys, fragmented across shards by the worker.
    MultiKey { mutating: bool },
    /// Registers a watch subscription.
    WatchSubscribe,
    /// Removes a watch subscription.
    WatchUnsubscribe,
    /// Server-level command (connection-local or whole-engine).
    Admin { mutating: bool },
}

impl CommandKind {
    /// Whether a shard must WAL-append this command before executing.
    pub fn mutates(self) -> bool {
        matches!(
            self,
            CommandKind::Mutating
                | CommandKind::MultiKey { mutating: true }
                | CommandKind::Admin { mutating: true }
        )
    }
}

/// How a worker turns a command into shard fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Answered by the worker itself; never reaches a shard.
    Inline,
    /// One fragment, routed by the first argument.
    SingleKey,
    /// Fragmented per key by the spec's `fragment` function.
    MultiKey,
    /// One fragment per shard, key-independent.
    Broadcast,
}

/// How fragment responses combine into the client-visible response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombinePolicy {
    /// First fragment error wins; the whole command fails.
    AllOrError,
    /// Fragment errors are embedded positionally by the assembler.
    PartialOk,
    /// The first non-null, non-error fragment response wins.
    FirstMatch,
}

pub type ExecuteFn = fn(&mut Store, &Command) -> Response;
pub type FragmentFn = fn(&Command) -> Result<Vec<Command>, CommandError>;
pub type AssembleFn = fn(Vec<Response>) -> Response;

/// One installed command descriptor.
pub struct CommandSpec {
    pub name: &'static str,
    pub min_args: usize,
    /// `None` = variadic.
    pub max_args: Option<usize>,
    pub kind: CommandKind,
    pub dispatch: DispatchMode,
    pub combine: CombinePolicy,
    /// Shard-side executor. `None` for commands the worker answers
    /// itself (inline and watch commands).
    pub execute: Option<ExecuteFn>,
    /// Splits a multi-key command into single-key fragments.
    pub fragment: Option<FragmentFn>,
    /// Reassembles fragment responses (in fragment order). Defaults to
    /// taking the first response.
    pub assemble: Option<AssembleFn>,
}

impl CommandSpec {
    /// Validates the argument count against the declared arity.
    pub fn check_arity(&self, cmd: &Command) -> Result<(), CommandError> {
        let n = cmd.args.len();
        if n < self.min_args || self.max_args.is_some_and(|max| n > max) {
            return Err(CommandError::wrong_args(self.name));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("dispatch", &self.dispatch)
            .finish_non_exhaustive()
    }
}

/// The installed-once command table.
#[derive(Debug)]
pub struct CommandTable {
    specs: AHashMap<&'static str, CommandSpec>,
}

impl CommandTable {
    /// Builds the standard table with every supported command.
    pub fn standard() -> Self {
        let mut table = Self {
            specs: AHashMap::new(),
        };
        for spec in commands::all() {
            table.install(spec);
        }
        table
    }

    fn install(&mut self, spec: CommandSpec) {
        debug_assert!(
            !self.specs.contains_key(spec.name),
            "duplicate command {}",
            spec.name
        );
        self.specs.insert(spec.name, spec);
    }

    /// Looks up a spec by canonical (uppercase) name.
    pub fn lookup(&self, name: &str) -> Option<&CommandSpec> {
        self.specs.get(name)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
