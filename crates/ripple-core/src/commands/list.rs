//! List commands.

use crate::command::{Command, Response};
use crate::error::CommandError;
use crate::registry::CommandSpec;
use crate::store::Store;

use super::{int_arg, read_single, write_single};

pub fn specs() -> Vec<CommandSpec> {
    vec![
        write_single("LPUSH", 2, None, exec_lpush),
        write_single("RPUSH", 2, None, exec_rpush),
        write_single("LPOP", 1, Some(1), exec_lpop),
        write_single("RPOP", 1, Some(1), exec_rpop),
        read_single("LLEN", 1, Some(1), exec_llen),
        read_single("LRANGE", 3, Some(3), exec_lrange),
    ]
}

fn push(store: &mut Store, cmd: &Command, front: bool) -> Response {
    let values = cmd.args[1..].to_vec();
    match store.push(&cmd.args[0], values, front) {
        Ok(len) => Response::Int(len as i64),
        Err(e) => CommandError::from(e).into(),
    }
}

fn pop(store: &mut Store, cmd: &Command, front: bool) -> Response {
    match store.pop(&cmd.args[0], front) {
        Ok(Some(data)) => Response::Bulk(data),
        Ok(None) => Response::Null,
        Err(e) => CommandError::from(e).into(),
    }
}

fn exec_lpush(store: &mut Store, cmd: &Command) -> Response {
    push(store, cmd, true)
}

fn exec_rpush(store: &mut Store, cmd: &Command) -> Response {
    push(store, cmd, false)
}

fn exec_lpop(store: &mut Store, cmd: &Command) -> Response {
    pop(store, cmd, true)
}

fn exec_rpop(store: &mut Store, cmd: &Command) -> Response {
    pop(store, cmd, false)
}

fn exec_llen(store: &mut Store, cmd: &Command) -> Response {
    match store.llen(&cmd.args[0]) {
        Ok(len) => Response::Int(len as i64),
        Err(e) => CommandError::from(e).into(),
    }
}

fn exec_lrange(store: &mut Store, cmd: &Command) -> Response {
    let (start, stop) = match (int_arg(&cmd.args[1]), int_arg(&cmd.args[2])) {
        (Ok(s), Ok(e)) => (s, e),
        _ => return CommandError::not_an_integer().into(),
    };
    match store.lrange(&cmd.args[0], start, stop) {
        Ok(items) => Response::Array(items.into_iter().map(Response::Bulk).collect()),
        Err(e) => CommandError::from(e).into(),
    }
}
