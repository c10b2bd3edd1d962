//! String-family commands: SET, GET, GETDEL, APPEND, STRLEN, the
//! INCR/DECR group, and the MGET/MSET fan-outs.

use std::time::Duration;

use crate::command::{Command, Response};
use crate::error::CommandError;
use crate::registry::{
    CombinePolicy, CommandKind, CommandSpec, DispatchMode,
};
use crate::store::{SetOutcome, Store};

use super::{
    assemble_ok, assemble_values, int_arg, keyword, read_single, u64_arg, write_single,
};

pub fn specs() -> Vec<CommandSpec> {
    vec![
        write_single("SET", 2, Some(6), exec_set),
        read_single("GET", 1, Some(1), exec_get),
        write_single("GETDEL", 1, Some(1), exec_getdel),
        write_single("APPEND", 2, Some(2), exec_append),
        read_single("STRLEN", 1, Some(1), exec_strlen),
        write_single("INCR", 1, Some(1), exec_incr),
        write_single("DECR", 1, Some(1), exec_decr),
        write_single("INCRBY", 2, Some(2), exec_incrby),
        write_single("DECRBY", 2, Some(2), exec_decrby),
        CommandSpec {
            name: "MGET",
            min_args: 1,
            max_args: None,
            kind: CommandKind::MultiKey { mutating: false },
            dispatch: DispatchMode::MultiKey,
            combine: CombinePolicy::PartialOk,
            execute: None,
            fragment: Some(fragment_mget),
            assemble: Some(assemble_values),
        },
        CommandSpec {
            name: "MSET",
            min_args: 2,
            max_args: None,
            kind: CommandKind::MultiKey { mutating: true },
            dispatch: DispatchMode::MultiKey,
            combine: CombinePolicy::AllOrError,
            execute: None,
            fragment: Some(fragment_mset),
            assemble: Some(assemble_ok),
        },
    ]
}

fn exec_set(store: &mut Store, cmd: &Command) -> Response {
    let key = cmd.args[0].clone();
    let value = cmd.args[1].clone();

    let mut ttl: Option<Duration> = None;
    let mut nx = false;
    let mut xx = false;
    let mut rest = cmd.args[2..].iter();
    while let Some(opt) = rest.next() {
        match keyword(opt).as_str() {
            "EX" => match rest.next().map(u64_arg) {
                Some(Ok(secs)) => ttl = Some(Duration::from_secs(secs)),
                _ => return CommandError::syntax().into(),
            },
            "PX" => match rest.next().map(u64_arg) {
                Some(Ok(ms)) => ttl = Some(Duration::from_millis(ms)),
                _ => return CommandError::syntax().into(),
            },
            "NX" => nx = true,
            "XX" => xx = true,
            _ => return CommandError::syntax().into(),
        }
    }
    if nx && xx {
        return CommandError::syntax().into();
    }

    match store.set(key, value, ttl, nx, xx) {
        SetOutcome::Stored => Response::ok(),
        SetOutcome::ConditionFailed => Response::Null,
    }
}

fn exec_get(store: &mut Store, cmd: &Command) -> Response {
    match store.get(&cmd.args[0]) {
        Ok(Some(data)) => Response::Bulk(data),
        Ok(None) => Response::Null,
        Err(e) => CommandError::from(e).into(),
    }
}

fn exec_getdel(store: &mut Store, cmd: &Command) -> Response {
    match store.get_del(&cmd.args[0]) {
        Ok(Some(data)) => Response::Bulk(data),
        Ok(None) => Response::Null,
        Err(e) => CommandError::from(e).into(),
    }
}

fn exec_append(store: &mut Store, cmd: &Command) -> Response {
    match store.append(&cmd.args[0], &cmd.args[1]) {
        Ok(len) => Response::Int(len as i64),
        Err(e) => CommandError::from(e).into(),
    }
}

fn exec_strlen(store: &mut Store, cmd: &Command) -> Response {
    match store.strlen(&cmd.args[0]) {
        Ok(len) => Response::Int(len as i64),
        Err(e) => CommandError::from(e).into(),
    }
}

fn incr_result(result: Result<i64, crate::store::StoreError>) -> Response {
    match result {
        Ok(val) => Response::Int(val),
        Err(e) => CommandError::from(e).into(),
    }
}

fn exec_incr(store: &mut Store, cmd: &Command) -> Response {
    incr_result(store.incr_by(&cmd.args[0], 1))
}

fn exec_decr(store: &mut Store, cmd: &Command) -> Response {
    incr_result(store.incr_by(&cmd.args[0], -1))
}

fn exec_incrby(store: &mut Store, cmd: &Command) -> Response {
    match int_arg(&cmd.args[1]) {
        Ok(delta) => incr_result(store.incr_by(&cmd.args[0], delta)),
        Err(e) => e.into(),
    }
}

fn exec_decrby(store: &mut Store, cmd: &Command) -> Response {
    let delta = match int_arg(&cmd.args[1]) {
        Ok(delta) => delta,
        Err(e) => return e.into(),
    };
    match delta.checked_neg() {
        Some(neg) => incr_result(store.incr_by(&cmd.args[0], neg)),
        None => CommandError::overflow().into(),
    }
}

fn fragment_mget(cmd: &Command) -> Result<Vec<Command>, CommandError> {
    Ok(cmd
        .args
        .iter()
        .map(|key| cmd.fragment_of("GET", vec![key.clone()]))
        .collect())
}

fn fragment_mset(cmd: &Command) -> Result<Vec<Command>, CommandError> {
    if cmd.args.len() % 2 != 0 {
        return Err(CommandError::wrong_args("MSET"));
    }
    Ok(cmd
        .args
        .chunks_exact(2)
        .map(|pair| cmd.fragment_of("SET", vec![pair[0].clone(), pair[1].clone()]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;
    use bytes::Bytes;

    fn store() -> Store {
        Store::new(StoreConfig::default())
    }

    fn cmd(name: &str, args: &[&str]) -> Command {
        Command::new(
            name,
            args.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())).collect(),
        )
    }

    #[test]
    fn set_then_get() {
        let mut s = store();
        assert_eq!(exec_set(&mut s, &cmd("SET", &["k", "v"])), Response::ok());
        assert_eq!(
            exec_get(&mut s, &cmd("GET", &["k"])),
            Response::Bulk(Bytes::from("v"))
        );
    }

    #[test]
    fn set_nx_returns_null_when_blocked() {
        let mut s = store();
        exec_set(&mut s, &cmd("SET", &["k", "v"]));
        assert_eq!(
            exec_set(&mut s, &cmd("SET", &["k", "w", "NX"])),
            Response::Null
        );
    }

    #[test]
    fn set_with_ttl_option() {
        let mut s = store();
        assert_eq!(
            exec_set(&mut s, &cmd("SET", &["k", "v", "EX", "100"])),
            Response::ok()
        );
        assert!(matches!(
            s.ttl(b"k"),
            crate::store::TtlState::Remaining(_)
        ));
    }

    #[test]
    fn set_rejects_bad_options() {
        let mut s = store();
        assert!(exec_set(&mut s, &cmd("SET", &["k", "v", "EX", "nope"])).is_error());
        assert!(exec_set(&mut s, &cmd("SET", &["k", "v", "NX", "XX"])).is_error());
        assert!(exec_set(&mut s, &cmd("SET", &["k", "v", "BOGUS"])).is_error());
    }

    #[test]
    fn getdel_removes() {
        let mut s = store();
        exec_set(&mut s, &cmd("SET", &["k", "v"]));
        assert_eq!(
            exec_getdel(&mut s, &cmd("GETDEL", &["k"])),
            Response::Bulk(Bytes::from("v"))
        );
        assert_eq!(exec_get(&mut s, &cmd("GET", &["k"])), Response::Null);
    }

    #[test]
    fn incr_family() {
        let mut s = store();
        assert_eq!(exec_incr(&mut s, &cmd("INCR", &["n"])), Response::Int(1));
        assert_eq!(
            exec_incrby(&mut s, &cmd("INCRBY", &["n", "9"])),
            Response::Int(10)
        );
        assert_eq!(
            exec_decrby(&mut s, &cmd("DECRBY", &["n", "3"])),
            Response::Int(7)
        );
        assert!(exec_incrby(&mut s, &cmd("INCRBY", &["n", "abc"])).is_error());
    }

    #[test]
    fn mget_fragments_one_per_key() {
        let parent = cmd("MGET", &["a", "b", "c"]);
        let frags = fragment_mget(&parent).unwrap();
        assert_eq!(frags.len(), 3);
        assert!(frags.iter().all(|f| f.name == "GET" && f.args.len() == 1));
    }

    #[test]
    fn mset_fragments_pairs_and_rejects_odd() {
        let parent = cmd("MSET", &["a", "1", "b", "2"]);
        let frags = fragment_mset(&parent).unwrap();
        assert_eq!(frags.len(), 2);
        assert_eq!(frags[0].args, vec![Bytes::from("a"), Bytes::from("1")]);

        assert!(fragment_mset(&cmd("MSET", &["a", "1", "b"])).is_err());
    }
}
