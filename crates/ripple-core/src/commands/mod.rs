//! Command executors, grouped by family.
//!
//! Each module contributes descriptors to [`all`], which the registry
//! installs at startup. Executors run on the owning shard with
//! exclusive access to its store; fragment and assemble functions run
//! on the worker.

mod hash;
mod keys;
mod list;
mod server;
mod set;
mod string;
mod zset;

use bytes::Bytes;

use crate::command::Response;
use crate::error::CommandError;
use crate::registry::{
    CombinePolicy, CommandKind, CommandSpec, DispatchMode, ExecuteFn,
};

/// Every descriptor in the standard command set.
pub fn all() -> Vec<CommandSpec> {
    let mut specs = Vec::new();
    specs.extend(string::specs());
    specs.extend(keys::specs());
    specs.extend(list::specs());
    specs.extend(set::specs());
    specs.extend(hash::specs());
    specs.extend(zset::specs());
    specs.extend(server::specs());
    specs
}

// -- descriptor shorthands ----------------------------------------------

pub(crate) fn read_single(
    name: &'static str,
    min_args: usize,
    max_args: Option<usize>,
    execute: ExecuteFn,
) -> CommandSpec {
    CommandSpec {
        name,
        min_args,
        max_args,
        kind: CommandKind::ReadOnly,
        dispatch: DispatchMode::SingleKey,
        combine: CombinePolicy::AllOrError,
        execute: Some(execute),
        fragment: None,
        assemble: None,
    }
}

pub(crate) fn write_single(
    name: &'static str,
    min_args: usize,
    max_args: Option<usize>,
    execute: ExecuteFn,
) -> CommandSpec {
    CommandSpec {
        name,
        min_args,
        max_args,
        kind: CommandKind::Mutating,
        dispatch: DispatchMode::SingleKey,
        combine: CombinePolicy::AllOrError,
        execute: Some(execute),
        fragment: None,
        assemble: None,
    }
}

// -- shared argument parsing --------------------------------------------

pub(crate) fn int_arg(arg: &Bytes) -> Result<i64, CommandError> {
    crate::store::parse_i64(arg).ok_or_else(CommandError::not_an_integer)
}

pub(crate) fn u64_arg(arg: &Bytes) -> Result<u64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(CommandError::not_an_integer)
}

pub(crate) fn float_arg(arg: &Bytes) -> Result<f64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(CommandError::not_a_float)
}

/// Uppercases an argument for option-keyword comparison.
pub(crate) fn keyword(arg: &Bytes) -> String {
    String::from_utf8_lossy(arg).to_ascii_uppercase()
}

// -- shared assemblers ---------------------------------------------------

/// Sums integer fragment responses; non-integers contribute zero.
pub(crate) fn assemble_sum(responses: Vec<Response>) -> Response {
    let total = responses
        .iter()
        .map(|r| match r {
            Response::Int(n) => *n,
            _ => 0,
        })
        .sum();
    Response::Int(total)
}

/// Positional assembly for value-returning multi-key reads: fragment
/// errors surface as nulls in their argument position.
pub(crate) fn assemble_values(responses: Vec<Response>) -> Response {
    Response::Array(
        responses
            .into_iter()
            .map(|r| match r {
                Response::Error(_) => Response::Null,
                other => other,
            })
            .collect(),
    )
}

/// Collapses an all-succeeded write fan-out into a single OK.
pub(crate) fn assemble_ok(_responses: Vec<Response>) -> Response {
    Response::ok()
}
