//! Key-lifecycle commands: DEL, EXISTS, the expiry group, and TYPE.

use crate::command::{Command, Response};
use crate::error::CommandError;
use crate::registry::{
    CombinePolicy, CommandKind, CommandSpec, DispatchMode,
};
use crate::store::{Store, TtlState};

use super::{assemble_sum, read_single, u64_arg, write_single};

pub fn specs() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            name: "DEL",
            min_args: 1,
            max_args: None,
            kind: CommandKind::MultiKey { mutating: true },
            dispatch: DispatchMode::MultiKey,
            combine: CombinePolicy::PartialOk,
            execute: Some(exec_del),
            fragment: Some(fragment_per_key),
            assemble: Some(assemble_sum),
        },
        CommandSpec {
            name: "EXISTS",
            min_args: 1,
            max_args: None,
            kind: CommandKind::MultiKey { mutating: false },
            dispatch: DispatchMode::MultiKey,
            combine: CombinePolicy::PartialOk,
            execute: Some(exec_exists),
            fragment: Some(fragment_per_key),
            assemble: Some(assemble_sum),
        },
        write_single("EXPIRE", 2, Some(2), exec_expire),
        write_single("PEXPIRE", 2, Some(2), exec_pexpire),
        read_single("TTL", 1, Some(1), exec_ttl),
        read_single("PTTL", 1, Some(1), exec_pttl),
        write_single("PERSIST", 1, Some(1), exec_persist),
        read_single("TYPE", 1, Some(1), exec_type),
    ]
}

/// DEL and EXISTS fragment identically: one single-key copy of
/// themselves per argument.
fn fragment_per_key(cmd: &Command) -> Result<Vec<Command>, CommandError> {
    let name: &'static str = match cmd.name.as_str() {
        "DEL" => "DEL",
        "EXISTS" => "EXISTS",
        other => return Err(CommandError::internal(format!("unexpected fragmenter for {other}"))),
    };
    Ok(cmd
        .args
        .iter()
        .map(|key| cmd.fragment_of(name, vec![key.clone()]))
        .collect())
}

fn exec_del(store: &mut Store, cmd: &Command) -> Response {
    Response::Int(i64::from(store.del(&cmd.args[0])))
}

fn exec_exists(store: &mut Store, cmd: &Command) -> Response {
    Response::Int(i64::from(store.exists(&cmd.args[0])))
}

fn exec_expire(store: &mut Store, cmd: &Command) -> Response {
    match u64_arg(&cmd.args[1]) {
        Ok(secs) => Response::Int(i64::from(
            store.expire_in(&cmd.args[0], secs.saturating_mul(1000)),
        )),
        Err(e) => e.into(),
    }
}

fn exec_pexpire(store: &mut Store, cmd: &Command) -> Response {
    match u64_arg(&cmd.args[1]) {
        Ok(ms) => Response::Int(i64::from(store.expire_in(&cmd.args[0], ms))),
        Err(e) => e.into(),
    }
}

fn exec_ttl(store: &mut Store, cmd: &Command) -> Response {
    match store.ttl(&cmd.args[0]) {
        TtlState::Remaining(ms) => Response::Int((ms / 1000) as i64),
        TtlState::NoExpiry => Response::Int(-1),
        TtlState::Missing => Response::Int(-2),
    }
}

fn exec_pttl(store: &mut Store, cmd: &Command) -> Response {
    match store.ttl(&cmd.args[0]) {
        TtlState::Remaining(ms) => Response::Int(ms as i64),
        TtlState::NoExpiry => Response::Int(-1),
        TtlState::Missing => Response::Int(-2),
    }
}

fn exec_persist(store: &mut Store, cmd: &Command) -> Response {
    Response::Int(i64::from(store.persist(&cmd.args[0])))
}

fn exec_type(store: &mut Store, cmd: &Command) -> Response {
    Response::Simple(store.type_name(&cmd.args[0]))
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
    fn del_counts_and_second_del_is_zero() {
        let mut s = Store::new(StoreConfig::default());
        s.set(Bytes::from("k"), Bytes::from("v"), None, false, false);
        assert_eq!(exec_del(&mut s, &cmd("DEL", &["k"])), Response::Int(1));
        assert_eq!(exec_del(&mut s, &cmd("DEL", &["k"])), Response::Int(0));
    }

    #[test]
    fn ttl_states_map_to_wire_integers() {
        let mut s = Store::new(StoreConfig::default());
        s.set(Bytes::from("k"), Bytes::from("v"), None, false, false);
        assert_eq!(exec_ttl(&mut s, &cmd("TTL", &["k"])), Response::Int(-1));
        assert_eq!(exec_ttl(&mut s, &cmd("TTL", &["nope"])), Response::Int(-2));

        exec_expire(&mut s, &cmd("EXPIRE", &["k", "100"]));
        match exec_ttl(&mut s, &cmd("TTL", &["k"])) {
            Response::Int(secs) => assert!((90..=100).contains(&secs)),
            other => panic!("expected integer ttl, got {other:?}"),
        }
    }

    #[test]
    fn type_reports_none_for_missing() {
        let mut s = Store::new(StoreConfig::default());
        assert_eq!(exec_type(&mut s, &cmd("TYPE", &["k"])), Response::Simple("none"));
        s.set(Bytes::from("k"), Bytes::from("v"), None, false, false);
        assert_eq!(exec_type(&mut s, &cmd("TYPE", &["k"])), Response::Simple("string"));
    }

    #[test]
    fn per_key_fragments_keep_command_name() {
        let frags = fragment_per_key(&cmd("DEL", &["a", "b"])).unwrap();
        assert_eq!(frags.len(), 2);
        assert!(frags.iter().all(|f| f.name == "DEL"));
    }
}
