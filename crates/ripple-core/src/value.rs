//! Stored value representations.
//!
//! Every value is a tagged variant; the tag travels on change events so
//! the watch fabric can invalidate by type transition without reading
//! shard state.

use std::collections::{BTreeSet, VecDeque};

use ahash::{AHashMap, AHashSet};
use bytes::Bytes;
use ordered_float::OrderedFloat;

/// A value stored under a key.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Binary-safe string payload.
    Str(Bytes),
    /// Signed 64-bit integer, kept numeric for arithmetic commands.
    Int(i64),
    /// Ordered list with O(1) push/pop at both ends.
    List(VecDeque<Bytes>),
    /// Unordered set of unique members.
    Set(AHashSet<Bytes>),
    /// Field → value mapping.
    Hash(AHashMap<Bytes, Bytes>),
    /// Members keyed by a finite float score, ordered by (score, member).
    ZSet(ScoreIndex),
    /// Opaque type-extension payload identified by a tag string.
    Ext { tag: String, data: Bytes },
}

/// The type tag of a stored value. Carried on change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Str,
    Int,
    List,
    Set,
    Hash,
    ZSet,
    Ext,
}

impl Value {
    pub fn tag(&self) -> TypeTag {
        match self {
            Value::Str(_) => TypeTag::Str,
            Value::Int(_) => TypeTag::Int,
            Value::List(_) => TypeTag::List,
            Value::Set(_) => TypeTag::Set,
            Value::Hash(_) => TypeTag::Hash,
            Value::ZSet(_) => TypeTag::ZSet,
            Value::Ext { .. } => TypeTag::Ext,
        }
    }

    /// The name reported by the TYPE command. Integers report as
    /// "string" so clients see the familiar type set.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) | Value::Int(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Hash(_) => "hash",
            Value::ZSet(_) => "zset",
            Value::Ext { .. } => "ext",
        }
    }
}

/// Renders an i64 as its ASCII decimal bytes.
pub fn int_bytes(val: i64) -> Bytes {
    let mut buf = itoa::Buffer::new();
    Bytes::copy_from_slice(buf.format(val).as_bytes())
}

/// Sorted scoring index: members keyed by a finite float score.
///
/// Two structures kept in lockstep: a hash map for O(1) score lookup
/// and an ordered set for rank/range queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreIndex {
    by_member: AHashMap<Bytes, f64>,
    ordered: BTreeSet<(OrderedFloat<f64>, Bytes)>,
}

impl ScoreIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_member.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_member.is_empty()
    }

    /// Inserts or updates a member. Returns `true` when the member was
    /// newly added.
    pub fn insert(&mut self, member: Bytes, score: f64) -> bool {
        match self.by_member.insert(member.clone(), score) {
            Some(old) => {
                self.ordered.remove(&(OrderedFloat(old), member.clone()));
                self.ordered.insert((OrderedFloat(score), member));
                false
            }
            None => {
                self.ordered.insert((OrderedFloat(score), member));
                true
            }
        }
    }

    /// Removes a member, returning its score.
    pub fn remove(&mut self, member: &[u8]) -> Option<f64> {
        let (member, score) = self.by_member.remove_entry(member)?;
        self.ordered.remove(&(OrderedFloat(score), member));
        Some(score)
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.by_member.get(member).copied()
    }

    /// Members in `[start, stop]` rank order (inclusive, pre-normalized
    /// indices), with scores.
    pub fn range(&self, start: usize, stop: usize) -> Vec<(Bytes, f64)> {
        self.ordered
            .iter()
            .skip(start)
            .take(stop.saturating_sub(start) + 1)
            .map(|(score, member)| (member.clone(), score.0))
            .collect()
    }
}

/// Resolves possibly-negative range indices against a collection of
/// `len` elements, clamping to valid bounds. A result with
/// `start > stop` means the range is empty.
pub fn normalize_range(start: i64, stop: i64, len: usize) -> (i64, i64) {
    let len = len as i64;
    if len == 0 {
        return (0, -1);
    }
    let s = if start < 0 { (len + start).max(0) } else { start };
    let e = if stop < 0 {
        (len + stop).max(-1)
    } else {
        stop.min(len - 1)
    };
    (s, e)
}
