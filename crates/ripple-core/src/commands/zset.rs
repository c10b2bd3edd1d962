//! Sorted-set commands.

use bytes::Bytes;

use crate::command::{Command, Response};
use crate::error::CommandError;
use crate::registry::CommandSpec;
use crate::store::Store;

use super::{float_arg, int_arg, keyword, read_single, write_single};

pub fn specs() -> Vec<CommandSpec> {
    vec![
        write_single("ZADD", 3, None, exec_zadd),
        write_single("ZREM", 2, None, exec_zrem),
        read_single("ZSCORE", 2, Some(2), exec_zscore),
        read_single("ZCARD", 1, Some(1), exec_zcard),
        read_single("ZRANGE", 3, Some(4), exec_zrange),
    ]
}

fn exec_zadd(store: &mut Store, cmd: &Command) -> Response {
    let pairs = &cmd.args[1..];
    if pairs.len() % 2 != 0 {
        return CommandError::syntax().into();
    }
    let mut members = Vec::with_capacity(pairs.len() / 2);
    for pair in pairs.chunks_exact(2) {
        match float_arg(&pair[0]) {
            Ok(score) => members.push((score, pair[1].clone())),
            Err(e) => return e.into(),
        }
    }
    match store.zadd(&cmd.args[0], members) {
        Ok(added) => Response::Int(added as i64),
        Err(e) => CommandError::from(e).into(),
    }
}

fn exec_zrem(store: &mut Store, cmd: &Command) -> Response {
    match store.zrem(&cmd.args[0], &cmd.args[1..]) {
        Ok(removed) => Response::Int(removed as i64),
        Err(e) => CommandError::from(e).into(),
    }
}

fn exec_zscore(store: &mut Store, cmd: &Command) -> Response {
    match store.zscore(&cmd.args[0], &cmd.args[1]) {
        Ok(Some(score)) => Response::Bulk(format_score(score)),
        Ok(None) => Response::Null,
        Err(e) => CommandError::from(e).into(),
    }
}

fn exec_zcard(store: &mut Store, cmd: &Command) -> Response {
    match store.zcard(&cmd.args[0]) {
        Ok(len) => Response::Int(len as i64),
        Err(e) => CommandError::from(e).into(),
    }
}

fn exec_zrange(store: &mut Store, cmd: &Command) -> Response {
    let (start, stop) = match (int_arg(&cmd.args[1]), int_arg(&cmd.args[2])) {
        (Ok(s), Ok(e)) => (s, e),
        _ => return CommandError::not_an_integer().into(),
    };
    let with_scores = match cmd.args.get(3) {
        None => false,
        Some(opt) if keyword(opt) == "WITHSCORES" => true,
        Some(_) => return CommandError::syntax().into(),
    };
    match store.zrange(&cmd.args[0], start, stop) {
        Ok(entries) => {
            let mut items = Vec::with_capacity(entries.len() * if with_scores { 2 } else { 1 });
            for (member, score) in entries {
                items.push(Response::Bulk(member));
                if with_scores {
                    items.push(Response::Bulk(format_score(score)));
                }
            }
            Response::Array(items)
        }
        Err(e) => CommandError::from(e).into(),
    }
}

fn format_score(score: f64) -> Bytes {
    Bytes::from(format!("{score}"))
}
