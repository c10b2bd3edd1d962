//! Server-level and watch commands.
//!
//! PING, ECHO, and AUTH never leave the worker; WATCH/UNWATCH are
//! intercepted by the worker and forwarded to the watch fabric.
//! DBSIZE and FLUSHDB fan out to every shard.

use crate::command::{Command, Response};
use crate::registry::{
    CombinePolicy, CommandKind, CommandSpec, DispatchMode,
};
use crate::store::Store;

use super::{assemble_ok, assemble_sum};

pub fn specs() -> Vec<CommandSpec> {
    vec![
        inline("PING", 0, Some(1)),
        inline("ECHO", 1, Some(1)),
        inline("AUTH", 1, Some(1)),
        CommandSpec {
            name: "DBSIZE",
            min_args: 0,
            max_args: Some(0),
            kind: CommandKind::Admin { mutating: false },
            dispatch: DispatchMode::Broadcast,
            combine: CombinePolicy::PartialOk,
            execute: Some(exec_dbsize),
            fragment: None,
            assemble: Some(assemble_sum),
        },
        CommandSpec {
            name: "FLUSHDB",
            min_args: 0,
            max_args: Some(0),
            kind: CommandKind::Admin { mutating: true },
            dispatch: DispatchMode::Broadcast,
            combine: CombinePolicy::AllOrError,
            execute: Some(exec_flushdb),
            fragment: None,
            assemble: Some(assemble_ok),
        },
        CommandSpec {
            name: "WATCH",
            min_args: 1,
            max_args: None,
            kind: CommandKind::WatchSubscribe,
            dispatch: DispatchMode::Inline,
            combine: CombinePolicy::AllOrError,
            execute: None,
            fragment: None,
            assemble: None,
        },
        CommandSpec {
            name: "UNWATCH",
            min_args: 1,
            max_args: None,
            kind: CommandKind::WatchUnsubscribe,
            dispatch: DispatchMode::Inline,
            combine: CombinePolicy::AllOrError,
            execute: None,
            fragment: None,
            assemble: None,
        },
    ]
}

fn inline(name: &'static str, min_args: usize, max_args: Option<usize>) -> CommandSpec {
    CommandSpec {
        name,
        min_args,
        max_args,
        kind: CommandKind::Admin { mutating: false },
        dispatch: DispatchMode::Inline,
        combine: CombinePolicy::AllOrError,
        execute: None,
        fragment: None,
        assemble: None,
    }
}

fn exec_dbsize(store: &mut Store, _cmd: &Command) -> Response {
    Response::Int(store.len() as i64)
}

fn exec_flushdb(store: &mut Store, _cmd: &Command) -> Response {
    store.flush();
    Response::ok()
}
