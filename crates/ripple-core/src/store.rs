//! The per-shard store.
//!
//! A `Store` owns a flat `AHashMap<Bytes, Entry>` plus an expiry
//! side-index ordered by soonest deadline. It is owned exclusively by
//! its shard task — no locking anywhere. Expired keys are removed
//! lazily on access and in batches by the shard's periodic expirer.
//!
//! Every mutation is recorded as a [`KeyChange`]; the shard drains the
//! change list after each command, stamps sequence numbers, and fans
//! the events into the watch streams. The store itself never sees a
//! sequence number.
//!
//! Admission is bounded by `keys_limit`: when inserting a new key would
//! exceed the bound, a victim is chosen by sampled approximate-LRU
//! (oldest last-access among a small random sample) and evicted before
//! the insert proceeds.

use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use ahash::{AHashMap, AHashSet};
use bytes::{BufMut, Bytes, BytesMut};
use rand::seq::IteratorRandom;
use smallvec::SmallVec;

use crate::error::CommandError;
use crate::event::{ChangeKind, KeyChange};
use crate::time;
use crate::value::{int_bytes, ScoreIndex, TypeTag, Value};

/// Default eviction sample size. Five random candidates gives a good
/// approximation of true LRU at constant cost per eviction.
pub const DEFAULT_EVICTION_SAMPLE: usize = 5;

/// Errors surfaced by typed store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// The key holds a different type than the operation expects.
    WrongType,
    /// The stored value or an argument is not a valid integer.
    NotAnInteger,
    /// Integer arithmetic would overflow.
    Overflow,
    /// A score argument is not a finite float.
    NotAFloat,
}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::WrongType => CommandError::wrong_type(),
            StoreError::NotAnInteger => CommandError::not_an_integer(),
            StoreError::Overflow => CommandError::overflow(),
            StoreError::NotAFloat => CommandError::not_a_float(),
        }
    }
}

/// Outcome of a conditional SET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Stored,
    /// The NX/XX condition was not met; nothing changed.
    ConditionFailed,
}

/// Result of a TTL query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlState {
    /// Key exists with an expiry; remaining time in milliseconds.
    Remaining(u64),
    /// Key exists without an expiry.
    NoExpiry,
    /// Key does not exist.
    Missing,
}

/// Per-store configuration, fixed at shard construction.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub shard_id: u16,
    /// Upper bound on live keys. `None` disables eviction.
    pub keys_limit: Option<usize>,
    /// Candidates sampled per eviction.
    pub eviction_sample: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shard_id: 0,
            keys_limit: None,
            eviction_sample: DEFAULT_EVICTION_SAMPLE,
        }
    }
}

/// Counters reported through the admin surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub key_count: usize,
    pub keys_with_expiry: usize,
    pub expired_total: u64,
    pub evicted_total: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    /// Absolute monotonic expiry in ms; 0 = none.
    expires_at_ms: u64,
    /// For approximate-LRU eviction.
    last_access_ms: u64,
    modified_at_ms: u64,
}

impl Entry {
    fn new(value: Value, expires_at_ms: u64) -> Self {
        let now = time::now_ms();
        Self {
            value,
            expires_at_ms,
            last_access_ms: now,
            modified_at_ms: now,
        }
    }

    fn touch(&mut self) {
        self.last_access_ms = time::now_ms();
    }

    fn mark_modified(&mut self) {
        let now = time::now_ms();
        self.last_access_ms = now;
        self.modified_at_ms = now;
    }
}

/// The single-shard keyspace primitive.
pub struct Store {
    entries: AHashMap<Bytes, Entry>,
    /// Keys ordered by soonest expiry; drained from the front by the
    /// periodic expirer.
    expiry_index: BTreeSet<(u64, Bytes)>,
    changes: SmallVec<[KeyChange; 2]>,
    config: StoreConfig,
    expired_total: u64,
    evicted_total: u64,
}

impl Store {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            entries: AHashMap::new(),
            expiry_index: BTreeSet::new(),
            changes: SmallVec::new(),
            config,
            expired_total: 0,
            evicted_total: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            key_count: self.entries.len(),
            keys_with_expiry: self.expiry_index.len(),
            expired_total: self.expired_total,
            evicted_total: self.evicted_total,
        }
    }

    /// Takes the mutations recorded since the last drain. Called by the
    /// shard after every command and expirer cycle.
    pub fn drain_changes(&mut self) -> SmallVec<[KeyChange; 2]> {
        std::mem::take(&mut self.changes)
    }

    fn note(
        &mut self,
        key: Bytes,
        before: Option<TypeTag>,
        after: Option<TypeTag>,
        kind: ChangeKind,
    ) {
        self.changes.push(KeyChange {
            key,
            before,
            after,
            kind,
        });
    }

    /// Removes a key, maintaining the expiry index and recording the
    /// change. Returns the removed entry.
    fn remove_key(&mut self, key: &[u8], kind: ChangeKind) -> Option<Entry> {
        let (key, entry) = self.entries.remove_entry(key)?;
        if entry.expires_at_ms != time::NO_EXPIRY {
            self.expiry_index.remove(&(entry.expires_at_ms, key.clone()));
        }
        match kind {
            ChangeKind::Expire => self.expired_total += 1,
            ChangeKind::Evict => self.evicted_total += 1,
            _ => {}
        }
        self.note(key, Some(entry.value.tag()), None, kind);
        Some(entry)
    }

    /// Lazily drops the key if its expiry has passed.
    fn expire_if_due(&mut self, key: &[u8]) {
        let due = matches!(
            self.entries.get(key),
            Some(e) if time::is_expired(e.expires_at_ms)
        );
        if due {
            self.remove_key(key, ChangeKind::Expire);
        }
    }

    /// Makes room for a new key when the store is at its bound.
    /// Existing keys are overwrites and never trigger eviction.
    fn make_room_for(&mut self, key: &[u8]) {
        let Some(limit) = self.config.keys_limit else {
            return;
        };
        if self.entries.contains_key(key) {
            return;
        }
        while self.entries.len() >= limit.max(1) {
            if !self.evict_one() {
                break;
            }
        }
    }

    /// Evicts the least-recently-accessed key among a random sample.
    fn evict_one(&mut self) -> bool {
        let sample = self.config.eviction_sample.max(1);
        let candidates: Vec<(Bytes, u64)> = self
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.last_access_ms))
            .choose_multiple(&mut rand::thread_rng(), sample);
        let victim = candidates.into_iter().min_by(|a, b| a.1.cmp(&b.1));
        match victim {
            Some((key, _)) => self.remove_key(&key, ChangeKind::Evict).is_some(),
            None => false,
        }
    }

    /// Inserts or replaces `key`, maintaining both indexes and
    /// recording a create/update change.
    fn write_value(&mut self, key: Bytes, value: Value, expires_at_ms: u64) {
        self.make_room_for(&key);
        let prev = self
            .entries
            .get(&key[..])
            .map(|e| (e.value.tag(), e.expires_at_ms));
        if let Some((_, old_exp)) = prev {
            if old_exp != time::NO_EXPIRY {
                self.expiry_index.remove(&(old_exp, key.clone()));
            }
        }
        if expires_at_ms != time::NO_EXPIRY {
            self.expiry_index.insert((expires_at_ms, key.clone()));
        }
        let after = Some(value.tag());
        self.entries.insert(key.clone(), Entry::new(value, expires_at_ms));
        match prev {
            Some((tag, _)) => self.note(key, Some(tag), after, ChangeKind::Update),
            None => self.note(key, None, after, ChangeKind::Create),
        }
    }

    // -- string family ----------------------------------------------------

    pub fn set(
        &mut self,
        key: Bytes,
        value: Bytes,
        ttl: Option<Duration>,
        nx: bool,
        xx: bool,
    ) -> SetOutcome {
        self.expire_if_due(&key);
        let exists = self.entries.contains_key(&key[..]);
        if (nx && exists) || (xx && !exists) {
            return SetOutcome::ConditionFailed;
        }
        self.write_value(key, Value::Str(value), time::expiry_from(ttl));
        SetOutcome::Stored
    }

    /// Returns the string rendering of the value: raw bytes for `Str`,
    /// decimal for `Int`. `WrongType` for collections.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        self.expire_if_due(key);
        match self.entries.get_mut(key) {
            None => Ok(None),
            Some(entry) => {
                entry.touch();
                match &entry.value {
                    Value::Str(data) => Ok(Some(data.clone())),
                    Value::Int(n) => Ok(Some(int_bytes(*n))),
                    _ => Err(StoreError::WrongType),
                }
            }
        }
    }

    pub fn get_del(&mut self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        let value = self.get(key)?;
        if value.is_some() {
            self.remove_key(key, ChangeKind::Delete);
        }
        Ok(value)
    }

    /// Adds `delta` to the integer stored at `key`, creating it at zero
    /// when missing. String values that parse as integers are promoted.
    pub fn incr_by(&mut self, key: &Bytes, delta: i64) -> Result<i64, StoreError> {
        self.expire_if_due(key);
        match self.entries.get_mut(&key[..]) {
            None => {
                self.write_value(key.clone(), Value::Int(delta), time::NO_EXPIRY);
                Ok(delta)
            }
            Some(entry) => {
                let current = match &entry.value {
                    Value::Int(n) => *n,
                    Value::Str(data) => parse_i64(data).ok_or(StoreError::NotAnInteger)?,
                    _ => return Err(StoreError::WrongType),
                };
                let next = current.checked_add(delta).ok_or(StoreError::Overflow)?;
                let before = Some(entry.value.tag());
                entry.value = Value::Int(next);
                entry.mark_modified();
                self.note(key.clone(), before, Some(TypeTag::Int), ChangeKind::Update);
                Ok(next)
            }
        }
    }

    /// Appends bytes to the string at `key`, creating it when missing.
    /// Returns the resulting length.
    pub fn append(&mut self, key: &Bytes, suffix: &Bytes) -> Result<usize, StoreError> {
        self.expire_if_due(key);
        match self.entries.get_mut(&key[..]) {
            None => {
                let len = suffix.len();
                self.write_value(key.clone(), Value::Str(suffix.clone()), time::NO_EXPIRY);
                Ok(len)
            }
            Some(entry) => {
                let base = match &entry.value {
                    Value::Str(data) => data.clone(),
                    Value::Int(n) => int_bytes(*n),
                    _ => return Err(StoreError::WrongType),
                };
                let mut combined = BytesMut::with_capacity(base.len() + suffix.len());
                combined.put_slice(&base);
                combined.put_slice(suffix);
                let len = combined.len();
                let before = Some(entry.value.tag());
                entry.value = Value::Str(combined.freeze());
                entry.mark_modified();
                self.note(key.clone(), before, Some(TypeTag::Str), ChangeKind::Update);
                Ok(len)
            }
        }
    }

    pub fn strlen(&mut self, key: &[u8]) -> Result<usize, StoreError> {
        Ok(self.get(key)?.map(|data| data.len()).unwrap_or(0))
    }

    // -- key family -------------------------------------------------------

    pub fn del(&mut self, key: &[u8]) -> bool {
        self.expire_if_due(key);
        self.remove_key(key, ChangeKind::Delete).is_some()
    }

    pub fn exists(&mut self, key: &[u8]) -> bool {
        self.expire_if_due(key);
        self.entries.contains_key(key)
    }

    /// Sets an expiry `ms` milliseconds from now. Returns `false` when
    /// the key doesn't exist.
    pub fn expire_in(&mut self, key: &Bytes, ms: u64) -> bool {
        self.expire_if_due(key);
        let Some(entry) = self.entries.get_mut(&key[..]) else {
            return false;
        };
        let old_exp = entry.expires_at_ms;
        let tag = entry.value.tag();
        let new_exp = time::now_ms() + ms;
        entry.expires_at_ms = new_exp;
        entry.mark_modified();

        if old_exp != time::NO_EXPIRY {
            self.expiry_index.remove(&(old_exp, key.clone()));
        }
        self.expiry_index.insert((new_exp, key.clone()));
        self.note(key.clone(), Some(tag), Some(tag), ChangeKind::Update);
        true
    }

    pub fn ttl(&mut self, key: &[u8]) -> TtlState {
        self.expire_if_due(key);
        match self.entries.get(key) {
            None => TtlState::Missing,
            Some(entry) => match time::remaining_ms(entry.expires_at_ms) {
                Some(ms) => TtlState::Remaining(ms),
                None => TtlState::NoExpiry,
            },
        }
    }

    /// Clears the expiry. Returns `true` when an expiry was removed.
    pub fn persist(&mut self, key: &Bytes) -> bool {
        self.expire_if_due(key);
        let Some(entry) = self.entries.get_mut(&key[..]) else {
            return false;
        };
        if entry.expires_at_ms == time::NO_EXPIRY {
            return false;
        }
        let old_exp = entry.expires_at_ms;
        let tag = entry.value.tag();
        entry.expires_at_ms = time::NO_EXPIRY;
        entry.mark_modified();

        self.expiry_index.remove(&(old_exp, key.clone()));
        self.note(key.clone(), Some(tag), Some(tag), ChangeKind::Update);
        true
    }

    pub fn type_name(&mut self, key: &[u8]) -> &'static str {
        self.expire_if_due(key);
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.touch();
                entry.value.type_name()
            }
            None => "none",
        }
    }

    /// Removes every key, recording a delete per key.
    pub fn flush(&mut self) {
        let keys: Vec<Bytes> = self.entries.keys().cloned().collect();
        for key in keys {
            self.remove_key(&key, ChangeKind::Delete);
        }
    }

    // -- list family ------------------------------------------------------

    pub fn push(&mut self, key: &Bytes, values: Vec<Bytes>, front: bool) -> Result<usize, StoreError> {
        self.expire_if_due(key);
        match self.entries.get_mut(&key[..]) {
            Some(entry) => match &mut entry.value {
                Value::List(list) => {
                    for v in values {
                        if front {
                            list.push_front(v);
                        } else {
                            list.push_back(v);
                        }
                    }
                    let len = list.len();
                    entry.mark_modified();
                    self.note(
                        key.clone(),
                        Some(TypeTag::List),
                        Some(TypeTag::List),
                        ChangeKind::Update,
                    );
                    Ok(len)
                }
                _ => Err(StoreError::WrongType),
            },
            None => {
                let mut list = VecDeque::with_capacity(values.len());
                for v in values {
                    if front {
                        list.push_front(v);
                    } else {
                        list.push_back(v);
                    }
                }
                let len = list.len();
                self.write_value(key.clone(), Value::List(list), time::NO_EXPIRY);
                Ok(len)
            }
        }
    }

    pub fn pop(&mut self, key: &Bytes, front: bool) -> Result<Option<Bytes>, StoreError> {
        self.expire_if_due(key);
        let popped = match self.entries.get_mut(&key[..]) {
            None => return Ok(None),
            Some(entry) => match &mut entry.value {
                Value::List(list) => {
                    let popped = if front {
                        list.pop_front()
                    } else {
                        list.pop_back()
                    };
                    let emptied = list.is_empty();
                    entry.mark_modified();
                    (popped, emptied)
                }
                _ => return Err(StoreError::WrongType),
            },
        };
        let (popped, emptied) = popped;
        if popped.is_some() {
            if emptied {
                self.remove_key(key, ChangeKind::Delete);
            } else {
                self.note(
                    key.clone(),
                    Some(TypeTag::List),
                    Some(TypeTag::List),
                    ChangeKind::Update,
                );
            }
        }
        Ok(popped)
    }

    pub fn lrange(&mut self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Bytes>, StoreError> {
        self.expire_if_due(key);
        match self.entries.get_mut(key) {
            None => Ok(Vec::new()),
            Some(entry) => {
                entry.touch();
                match &entry.value {
                    Value::List(list) => {
                        let (s, e) = crate::value::normalize_range(start, stop, list.len());
                        if s > e {
                            return Ok(Vec::new());
                        }
                        Ok(list
                            .iter()
                            .skip(s as usize)
                            .take((e - s + 1) as usize)
                            .cloned()
                            .collect())
                    }
                    _ => Err(StoreError::WrongType),
                }
            }
        }
    }

    pub fn llen(&mut self, key: &[u8]) -> Result<usize, StoreError> {
        self.expire_if_due(key);
        match self.entries.get(key) {
            None => Ok(0),
            Some(entry) => match &entry.value {
                Value::List(list) => Ok(list.len()),
                _ => Err(StoreError::WrongType),
            },
        }
    }

    // -- set family -------------------------------------------------------

    pub fn sadd(&mut self, key: &Bytes, members: Vec<Bytes>) -> Result<usize, StoreError> {
        self.expire_if_due(key);
        match self.entries.get_mut(&key[..]) {
            Some(entry) => match &mut entry.value {
                Value::Set(set) => {
                    let added = members.into_iter().filter(|m| set.insert(m.clone())).count();
                    entry.mark_modified();
                    if added > 0 {
                        self.note(
                            key.clone(),
                            Some(TypeTag::Set),
                            Some(TypeTag::Set),
                            ChangeKind::Update,
                        );
                    }
                    Ok(added)
                }
                _ => Err(StoreError::WrongType),
            },
            None => {
                let set: AHashSet<Bytes> = members.into_iter().collect();
                let added = set.len();
                self.write_value(key.clone(), Value::Set(set), time::NO_EXPIRY);
                Ok(added)
            }
        }
    }

    pub fn srem(&mut self, key: &Bytes, members: &[Bytes]) -> Result<usize, StoreError> {
        self.expire_if_due(key);
        let (removed, emptied) = match self.entries.get_mut(&key[..]) {
            None => return Ok(0),
            Some(entry) => match &mut entry.value {
                Value::Set(set) => {
                    let removed = members.iter().filter(|m| set.remove(&m[..])).count();
                    let emptied = set.is_empty();
                    entry.mark_modified();
                    (removed, emptied)
                }
                _ => return Err(StoreError::WrongType),
            },
        };
        if removed > 0 {
            if emptied {
                self.remove_key(key, ChangeKind::Delete);
            } else {
                self.note(
                    key.clone(),
                    Some(TypeTag::Set),
                    Some(TypeTag::Set),
                    ChangeKind::Update,
                );
            }
        }
        Ok(removed)
    }

    pub fn smembers(&mut self, key: &[u8]) -> Result<Vec<Bytes>, StoreError> {
        self.expire_if_due(key);
        match self.entries.get_mut(key) {
            None => Ok(Vec::new()),
            Some(entry) => {
                entry.touch();
                match &entry.value {
                    Value::Set(set) => Ok(set.iter().cloned().collect()),
                    _ => Err(StoreError::WrongType),
                }
            }
        }
    }

    pub fn sismember(&mut self, key: &[u8], member: &[u8]) -> Result<bool, StoreError> {
        self.expire_if_due(key);
        match self.entries.get_mut(key) {
            None => Ok(false),
            Some(entry) => {
                entry.touch();
                match &entry.value {
                    Value::Set(set) => Ok(set.contains(member)),
                    _ => Err(StoreError::WrongType),
                }
            }
        }
    }

    pub fn scard(&mut self, key: &[u8]) -> Result<usize, StoreError> {
        self.expire_if_due(key);
        match self.entries.get(key) {
            None => Ok(0),
            Some(entry) => match &entry.value {
                Value::Set(set) => Ok(set.len()),
                _ => Err(StoreError::WrongType),
            },
        }
    }

    // -- hash family ------------------------------------------------------

    /// Sets fields, returning the number of newly created fields.
    pub fn hset(&mut self, key: &Bytes, pairs: Vec<(Bytes, Bytes)>) -> Result<usize, StoreError> {
        self.expire_if_due(key);
        match self.entries.get_mut(&key[..]) {
            Some(entry) => match &mut entry.value {
                Value::Hash(map) => {
                    let created = pairs
                        .into_iter()
                        .filter(|(f, v)| map.insert(f.clone(), v.clone()).is_none())
                        .count();
                    entry.mark_modified();
                    self.note(
                        key.clone(),
                        Some(TypeTag::Hash),
                        Some(TypeTag::Hash),
                        ChangeKind::Update,
                    );
                    Ok(created)
                }
                _ => Err(StoreError::WrongType),
            },
            None => {
                let map: AHashMap<Bytes, Bytes> = pairs.into_iter().collect();
                let created = map.len();
                self.write_value(key.clone(), Value::Hash(map), time::NO_EXPIRY);
                Ok(created)
            }
        }
    }

    pub fn hget(&mut self, key: &[u8], field: &[u8]) -> Result<Option<Bytes>, StoreError> {
        self.expire_if_due(key);
        match self.entries.get_mut(key) {
            None => Ok(None),
            Some(entry) => {
                entry.touch();
                match &entry.value {
                    Value::Hash(map) => Ok(map.get(field).cloned()),
                    _ => Err(StoreError::WrongType),
                }
            }
        }
    }

    pub fn hdel(&mut self, key: &Bytes, fields: &[Bytes]) -> Result<usize, StoreError> {
        self.expire_if_due(key);
        let (removed, emptied) = match self.entries.get_mut(&key[..]) {
            None => return Ok(0),
            Some(entry) => match &mut entry.value {
                Value::Hash(map) => {
                    let removed = fields.iter().filter(|f| map.remove(&f[..]).is_some()).count();
                    let emptied = map.is_empty();
                    entry.mark_modified();
                    (removed, emptied)
                }
                _ => return Err(StoreError::WrongType),
            },
        };
        if removed > 0 {
            if emptied {
                self.remove_key(key, ChangeKind::Delete);
            } else {
                self.note(
                    key.clone(),
                    Some(TypeTag::Hash),
                    Some(TypeTag::Hash),
                    ChangeKind::Update,
                );
            }
        }
        Ok(removed)
    }

    pub fn hgetall(&mut self, key: &[u8]) -> Result<Vec<(Bytes, Bytes)>, StoreError> {
        self.expire_if_due(key);
        match self.entries.get_mut(key) {
            None => Ok(Vec::new()),
            Some(entry) => {
                entry.touch();
                match &entry.value {
                    Value::Hash(map) => Ok(map.iter().map(|(f, v)| (f.clone(), v.clone())).collect()),
                    _ => Err(StoreError::WrongType),
                }
            }
        }
    }

    pub fn hlen(&mut self, key: &[u8]) -> Result<usize, StoreError> {
        self.expire_if_due(key);
        match self.entries.get(key) {
            None => Ok(0),
            Some(entry) => match &entry.value {
                Value::Hash(map) => Ok(map.len()),
                _ => Err(StoreError::WrongType),
            },
        }
    }

    // -- sorted-set family ------------------------------------------------

    /// Adds members with scores, returning the number newly added.
    /// Scores must be finite.
    pub fn zadd(&mut self, key: &Bytes, members: Vec<(f64, Bytes)>) -> Result<usize, StoreError> {
        if members.iter().any(|(score, _)| !score.is_finite()) {
            return Err(StoreError::NotAFloat);
        }
        self.expire_if_due(key);
        match self.entries.get_mut(&key[..]) {
            Some(entry) => match &mut entry.value {
                Value::ZSet(index) => {
                    let added = members
                        .into_iter()
                        .filter(|(score, member)| index.insert(member.clone(), *score))
                        .count();
                    entry.mark_modified();
                    self.note(
                        key.clone(),
                        Some(TypeTag::ZSet),
                        Some(TypeTag::ZSet),
                        ChangeKind::Update,
                    );
                    Ok(added)
                }
                _ => Err(StoreError::WrongType),
            },
            None => {
                let mut index = ScoreIndex::new();
                let mut added = 0;
                for (score, member) in members {
                    if index.insert(member, score) {
                        added += 1;
                    }
                }
                self.write_value(key.clone(), Value::ZSet(index), time::NO_EXPIRY);
                Ok(added)
            }
        }
    }

    pub fn zrem(&mut self, key: &Bytes, members: &[Bytes]) -> Result<usize, StoreError> {
        self.expire_if_due(key);
        let (removed, emptied) = match self.entries.get_mut(&key[..]) {
            None => return Ok(0),
            Some(entry) => match &mut entry.value {
                Value::ZSet(index) => {
                    let removed = members.iter().filter(|m| index.remove(m).is_some()).count();
                    let emptied = index.is_empty();
                    entry.mark_modified();
                    (removed, emptied)
                }
                _ => return Err(StoreError::WrongType),
            },
        };
        if removed > 0 {
            if emptied {
                self.remove_key(key, ChangeKind::Delete);
            } else {
                self.note(
                    key.clone(),
                    Some(TypeTag::ZSet),
                    Some(TypeTag::ZSet),
                    ChangeKind::Update,
                );
            }
        }
        Ok(removed)
    }

    pub fn zscore(&mut self, key: &[u8], member: &[u8]) -> Result<Option<f64>, StoreError> {
        self.expire_if_due(key);
        match self.entries.get_mut(key) {
            None => Ok(None),
            Some(entry) => {
                entry.touch();
                match &entry.value {
                    Value::ZSet(index) => Ok(index.score(member)),
                    _ => Err(StoreError::WrongType),
                }
            }
        }
    }

    pub fn zcard(&mut self, key: &[u8]) -> Result<usize, StoreError> {
        self.expire_if_due(key);
        match self.entries.get(key) {
            None => Ok(0),
            Some(entry) => match &entry.value {
                Value::ZSet(index) => Ok(index.len()),
                _ => Err(StoreError::WrongType),
            },
        }
    }

    pub fn zrange(
        &mut self,
        key: &[u8],
        start: i64,
        stop: i64,
    ) -> Result<Vec<(Bytes, f64)>, StoreError> {
        self.expire_if_due(key);
        match self.entries.get_mut(key) {
            None => Ok(Vec::new()),
            Some(entry) => {
                entry.touch();
                match &entry.value {
                    Value::ZSet(index) => {
                        let (s, e) = crate::value::normalize_range(start, stop, index.len());
                        if s > e {
                            return Ok(Vec::new());
                        }
                        Ok(index.range(s as usize, e as usize))
                    }
                    _ => Err(StoreError::WrongType),
                }
            }
        }
    }

    // -- expirer driver ---------------------------------------------------

    /// Removes up to `batch` keys whose expiry has passed, scanning
    /// from the front of the expiry index. Returns the count removed.
    pub fn expire_due(&mut self, batch: usize) -> usize {
        let now = time::now_ms();
        let mut removed = 0;
        while removed < batch {
            let due = match self.expiry_index.iter().next() {
                Some((exp, key)) if *exp <= now => key.clone(),
                _ => break,
            };
            self.remove_key(&due, ChangeKind::Expire);
            removed += 1;
        }
        removed
    }
}

/// Parses ASCII decimal bytes into an i64, rejecting any non-numeric
/// content.
pub fn parse_i64(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}
