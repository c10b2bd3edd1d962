//! Hash commands.

use crate::command::{Command, Response};
use crate::error::CommandError;
use crate::registry::CommandSpec;
use crate::store::Store;

use super::{read_single, write_single};

pub fn specs() -> Vec<CommandSpec> {
    vec![
        write_single("HSET", 3, None, exec_hset),
        read_single("HGET", 2, Some(2), exec_hget),
        write_single("HDEL", 2, None, exec_hdel),
        read_single("HGETALL", 1, Some(1), exec_hgetall),
        read_single("HLEN", 1, Some(1), exec_hlen),
    ]
}

fn exec_hset(store: &mut Store, cmd: &Command) -> Response {
    let fields = &cmd.args[1..];
    if fields.len() % 2 != 0 {
        return CommandError::wrong_args("HSET").into();
    }
    let pairs = fields
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    match store.hset(&cmd.args[0], pairs) {
        Ok(created) => Response::Int(created as i64),
        Err(e) => CommandError::from(e).into(),
    }
}

fn exec_hget(store: &mut Store, cmd: &Command) -> Response {
    match store.hget(&cmd.args[0], &cmd.args[1]) {
        Ok(Some(value)) => Response::Bulk(value),
        Ok(None) => Response::Null,
        Err(e) => CommandError::from(e).into(),
    }
}

fn exec_hdel(store: &mut Store, cmd: &Command) -> Response {
    match store.hdel(&cmd.args[0], &cmd.args[1..]) {
        Ok(removed) => Response::Int(removed as i64),
        Err(e) => CommandError::from(e).into(),
    }
}

fn exec_hgetall(store: &mut Store, cmd: &Command) -> Response {
    match store.hgetall(&cmd.args[0]) {
        Ok(pairs) => {
            let mut items = Vec::with_capacity(pairs.len() * 2);
            for (field, value) in pairs {
                items.push(Response::Bulk(field));
                items.push(Response::Bulk(value));
            }
            Response::Array(items)
        }
        Err(e) => CommandError::from(e).into(),
    }
}

fn exec_hlen(store: &mut Store, cmd: &Command) -> Response {
    match store.hlen(&cmd.args[0]) {
        Ok(len) => Response::Int(len as i64),
        Err(e) => CommandError::from(e).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;
    use bytes::Bytes;

    fn cmd(name: &str, args: &[&str]) -> Command {
        Command::new(
            name,
            args.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())).collect(),
        )
    }

    #[test]
    fn hset_counts_new_fields_only() {
        let mut s = Store::new(StoreConfig::default());
        assert_eq!(
            exec_hset(&mut s, &cmd("HSET", &["h", "f", "1", "g", "2"])),
            Response::Int(2)
        );
        assert_eq!(
            exec_hset(&mut s, &cmd("HSET", &["h", "f", "9"])),
            Response::Int(0)
        );
        assert_eq!(
            exec_hget(&mut s, &cmd("HGET", &["h", "f"])),
            Response::Bulk(Bytes::from("9"))
        );
    }

    #[test]
    fn hset_rejects_unpaired_fields() {
        let mut s = Store::new(StoreConfig::default());
        assert!(exec_hset(&mut s, &cmd("HSET", &["h", "f", "1", "g"])).is_error());
    }

    #[test]
    fn hgetall_flattens_pairs() {
        let mut s = Store::new(StoreConfig::default());
        exec_hset(&mut s, &cmd("HSET", &["h", "f", "1"]));
        match exec_hgetall(&mut s, &cmd("HGETALL", &["h"])) {
            Response::Array(items) => assert_eq!(items.len(), 2),
            other => panic!("expected array, got {other:?}"),
        }
    }
}
