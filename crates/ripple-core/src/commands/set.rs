//! Unordered-set commands.

use crate::command::{Command, Response};
use crate::error::CommandError;
use crate::registry::CommandSpec;
use crate::store::Store;

use super::{read_single, write_single};

pub fn specs() -> Vec<CommandSpec> {
    vec![
        write_single("SADD", 2, None, exec_sadd),
        write_single("SREM", 2, None, exec_srem),
        read_single("SMEMBERS", 1, Some(1), exec_smembers),
        read_single("SISMEMBER", 2, Some(2), exec_sismember),
        read_single("SCARD", 1, Some(1), exec_scard),
    ]
}

fn exec_sadd(store: &mut Store, cmd: &Command) -> Response {
    match store.sadd(&cmd.args[0], cmd.args[1..].to_vec()) {
        Ok(added) => Response::Int(added as i64),
        Err(e) => CommandError::from(e).into(),
    }
}

fn exec_srem(store: &mut Store, cmd: &Command) -> Response {
    match store.srem(&cmd.args[0], &cmd.args[1..]) {
        Ok(removed) => Response::Int(removed as i64),
        Err(e) => CommandError::from(e).into(),
    }
}

fn exec_smembers(store: &mut Store, cmd: &Command) -> Response {
    match store.smembers(&cmd.args[0]) {
        Ok(members) => Response::Array(members.into_iter().map(Response::Bulk).collect()),
        Err(e) => CommandError::from(e).into(),
    }
}

fn exec_sismember(store: &mut Store, cmd: &Command) -> Response {
    match store.sismember(&cmd.args[0], &cmd.args[1]) {
        Ok(found) => Response::Int(i64::from(found)),
        Err(e) => CommandError::from(e).into(),
    }
}

fn exec_scard(store: &mut Store, cmd: &Command) -> Response {
    match store.scard(&cmd.args[0]) {
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
    fn sadd_deduplicates() {
        let mut s = Store::new(StoreConfig::default());
        assert_eq!(
            exec_sadd(&mut s, &cmd("SADD", &["s", "a", "a", "b"])),
            Response::Int(2)
        );
        assert_eq!(
            exec_sismember(&mut s, &cmd("SISMEMBER", &["s", "a"])),
            Response::Int(1)
        );
        assert_eq!(exec_scard(&mut s, &cmd("SCARD", &["s"])), Response::Int(2));
    }

    #[test]
    fn wrong_type_propagates() {
        let mut s = Store::new(StoreConfig::default());
        s.set(Bytes::from("k"), Bytes::from("v"), None, false, false);
        assert!(exec_sadd(&mut s, &cmd("SADD", &["k", "m"])).is_error());
    }
}
