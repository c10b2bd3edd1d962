//! Change events: the record a shard emits when a mutation commits.

use bytes::Bytes;

use crate::value::TypeTag;

/// What happened to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
    Expire,
    Evict,
}

impl ChangeKind {
    pub fn label(self) -> &'static str {
        match self {
            ChangeKind::Create => "create",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
            ChangeKind::Expire => "expire",
            ChangeKind::Evict => "evict",
        }
    }
}

/// A single key mutation recorded by the store, before the shard has
/// stamped it with a sequence number.
#[derive(Debug, Clone)]
pub struct KeyChange {
    pub key: Bytes,
    pub before: Option<TypeTag>,
    pub after: Option<TypeTag>,
    pub kind: ChangeKind,
}

/// A committed mutation, stamped with the owning shard and its
/// strictly increasing per-shard sequence number. Fanned into the
/// watch streams and consumed by the watch fabric.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub shard_id: u16,
    pub seq: u64,
    pub key: Bytes,
    pub before: Option<TypeTag>,
    pub after: Option<TypeTag>,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn from_change(shard_id: u16, seq: u64, change: KeyChange) -> Self {
        Self {
            shard_id,
            seq,
            key: change.key,
            before: change.before,
            after: change.after,
            kind: change.kind,
        }
    }
}
