//! The watch fabric.
//!
//! A single executor task owns all subscription state: nothing else
//! reads or writes it, and shards never learn that watches exist. The
//! fabric consumes the aggregate change-event streams and, for every
//! candidate fingerprint, recomputes the watched query by dispatching
//! a fresh read-only command through the normal routing path. A
//! notification goes out only when the result hash actually changed,
//! so rapid events on one fingerprint coalesce into the last visible
//! state.
//!
//! Two subscription kinds:
//! - **query**: `WATCH GET foo` — recompute-on-change with a cached
//!   result hash, indexed by the key the query reads.
//! - **command-pattern**: `WATCH SET user:*` — matched by key glob
//!   against each change event and forwarded without recompute.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use ripple_core::{stable_hash, ChangeEvent, Command, Response, ShardManager, WatchStreams};

use crate::wire::response_frame;
use crate::worker_manager::{Notification, NotifyOutcome, WorkerManager};

/// What a subscription is keyed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintKind {
    /// A read-only query, recomputed when its key changes.
    Query,
    /// A command name plus key glob; events on matching keys are
    /// forwarded as-is.
    CommandPattern { pattern: Bytes },
}

/// Control messages from workers.
#[derive(Debug)]
pub enum WatchCommand {
    Subscribe {
        worker_id: u64,
        fingerprint: u64,
        kind: FingerprintKind,
        template: Command,
    },
    Unsubscribe {
        worker_id: u64,
        fingerprint: u64,
    },
    /// The worker disconnected; purge everything it subscribed to.
    Disconnect { worker_id: u64 },
}

/// Stable fingerprint of a subscription template. Two subscriptions
/// with the same canonical encoding share a fingerprint, and therefore
/// a cached result.
pub fn fingerprint(template: &Command) -> u64 {
    stable_hash(&template.encode())
}

struct FingerprintMeta {
    kind: FingerprintKind,
    template: Command,
    /// Hash of the last notified result; `None` until first delivery.
    last_result_hash: Option<u64>,
}

/// The subscription registry plus result cache, owned by one task.
pub struct WatchFabric {
    shards: Arc<ShardManager>,
    workers: Arc<WorkerManager>,
    control: mpsc::Receiver<WatchCommand>,
    streams: WatchStreams,
    /// fingerprint → subscriber worker ids.
    subscriptions: AHashMap<u64, AHashSet<u64>>,
    /// fingerprint → kind, template, cached result hash.
    meta: AHashMap<u64, FingerprintMeta>,
    /// key → fingerprints whose result may depend on it (query kind).
    index_by_key: AHashMap<Bytes, AHashSet<u64>>,
    /// Command-pattern fingerprints, scanned per event.
    patterns: AHashSet<u64>,
}

impl WatchFabric {
    pub fn new(
        shards: Arc<ShardManager>,
        workers: Arc<WorkerManager>,
        control: mpsc::Receiver<WatchCommand>,
        streams: WatchStreams,
    ) -> Self {
        Self {
            shards,
            workers,
            control,
            streams,
            subscriptions: AHashMap::new(),
            meta: AHashMap::new(),
            index_by_key: AHashMap::new(),
            patterns: AHashSet::new(),
        }
    }

    /// Drives the fabric until shutdown or until every shard stream
    /// closes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                msg = self.control.recv() => match msg {
                    Some(msg) => self.handle_control(msg),
                    None => break,
                },
                event = self.streams.query_events.recv() => match event {
                    Some(event) => self.on_query_event(event).await,
                    None => break,
                },
                event = self.streams.cmd_events.recv() => match event {
                    Some(event) => self.on_cmd_event(event),
                    None => break,
                },
            }
        }
        debug!(
            fingerprints = self.meta.len(),
            "watch fabric stopped"
        );
    }

    fn handle_control(&mut self, msg: WatchCommand) {
        match msg {
            WatchCommand::Subscribe {
                worker_id,
                fingerprint,
                kind,
                template,
            } => {
                self.subscriptions
                    .entry(fingerprint)
                    .or_default()
                    .insert(worker_id);
                if !self.meta.contains_key(&fingerprint) {
                    match &kind {
                        FingerprintKind::Query => {
                            if let Some(key) = template.args.first() {
                                self.index_by_key
                                    .entry(key.clone())
                                    .or_default()
                                    .insert(fingerprint);
                            }
                        }
                        FingerprintKind::CommandPattern { .. } => {
                            self.patterns.insert(fingerprint);
                        }
                    }
                    self.meta.insert(
                        fingerprint,
                        FingerprintMeta {
                            kind,
                            template,
                            last_result_hash: None,
                        },
                    );
                }
                debug!(worker_id, fingerprint, "watch subscribed");
            }
            WatchCommand::Unsubscribe {
                worker_id,
                fingerprint,
            } => {
                self.remove_subscriber(fingerprint, worker_id);
            }
            WatchCommand::Disconnect { worker_id } => {
                let fingerprints: Vec<u64> = self
                    .subscriptions
                    .iter()
                    .filter(|(_, subs)| subs.contains(&worker_id))
                    .map(|(fp, _)| *fp)
                    .collect();
                for fp in fingerprints {
                    self.remove_subscriber(fp, worker_id);
                }
            }
        }
    }

    /// Drops one subscriber; tears down the fingerprint entirely when
    /// no subscribers remain.
    fn remove_subscriber(&mut self, fingerprint: u64, worker_id: u64) {
        let emptied = match self.subscriptions.get_mut(&fingerprint) {
            Some(subs) => {
                subs.remove(&worker_id);
                subs.is_empty()
            }
            None => return,
        };
        if !emptied {
            return;
        }
        self.subscriptions.remove(&fingerprint);
        if let Some(meta) = self.meta.remove(&fingerprint) {
            match meta.kind {
                FingerprintKind::Query => {
                    if let Some(key) = meta.template.args.first() {
                        if let Some(set) = self.index_by_key.get_mut(key) {
                            set.remove(&fingerprint);
                            if set.is_empty() {
                                self.index_by_key.remove(key);
                            }
                        }
                    }
                }
                FingerprintKind::CommandPattern { .. } => {
                    self.patterns.remove(&fingerprint);
                }
            }
        }
        debug!(worker_id, fingerprint, "watch unsubscribed");
    }

    /// A change event for query watches: recompute every candidate
    /// fingerprint and notify on result change.
    async fn on_query_event(&mut self, event: ChangeEvent) {
        let Some(candidates) = self.index_by_key.get(&event.key) else {
            return;
        };
        let candidates: Vec<u64> = candidates.iter().copied().collect();

        for fp in candidates {
            let Some(meta) = self.meta.get(&fp) else {
                continue;
            };
            let recompute = meta.template.clone();
            let result = match self.shards.dispatch(recompute).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(fingerprint = fp, error = %e, "watch recomputation failed");
                    continue;
                }
            };
            let hash = response_hash(&result);
            let Some(meta) = self.meta.get_mut(&fp) else {
                continue;
            };
            if meta.last_result_hash == Some(hash) {
                continue;
            }
            meta.last_result_hash = Some(hash);
            self.deliver(fp, event.seq, result);
        }
    }

    /// A change event for command-pattern watches: forward the event
    /// kind and key to every matching subscriber, no recompute.
    fn on_cmd_event(&mut self, event: ChangeEvent) {
        if self.patterns.is_empty() {
            return;
        }
        let matching: Vec<u64> = self
            .patterns
            .iter()
            .copied()
            .filter(|fp| match self.meta.get(fp) {
                Some(meta) => match &meta.kind {
                    FingerprintKind::CommandPattern { pattern } => {
                        glob_match(pattern, &event.key)
                    }
                    FingerprintKind::Query => false,
                },
                None => false,
            })
            .collect();

        for fp in matching {
            let result = Response::Array(vec![
                Response::Bulk(Bytes::from_static(event.kind.label().as_bytes())),
                Response::Bulk(event.key.clone()),
            ]);
            self.deliver(fp, event.seq, result);
        }
    }

    /// Pushes one notification to every subscriber of a fingerprint.
    fn deliver(&mut self, fingerprint: u64, seq: u64, result: Response) {
        let Some(subscribers) = self.subscriptions.get(&fingerprint) else {
            return;
        };
        let subscribers: Vec<u64> = subscribers.iter().copied().collect();
        let mut gone = Vec::new();
        for worker_id in subscribers {
            let outcome = self.workers.notify(
                worker_id,
                Notification {
                    fingerprint,
                    seq,
                    result: result.clone(),
                },
            );
            match outcome {
                NotifyOutcome::Delivered => {}
                NotifyOutcome::DroppedOldest => {
                    warn!(worker_id, fingerprint, "notification inbox full, dropped oldest");
                }
                NotifyOutcome::Disconnected | NotifyOutcome::Gone => gone.push(worker_id),
            }
        }
        for worker_id in gone {
            self.remove_subscriber(fingerprint, worker_id);
        }
    }
}

/// Hash of a response's canonical wire encoding. Used to suppress
/// notifications when a recomputation produced an identical result.
fn response_hash(response: &Response) -> u64 {
    let mut buf = BytesMut::new();
    response_frame(response.clone()).serialize(&mut buf);
    stable_hash(&buf)
}

/// Glob match supporting `*` (any run) and `?` (any single byte).
/// Iterative with backtracking, so adversarial patterns stay linear.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let (mut star_p, mut star_t) = (usize::MAX, 0);

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star_p = p;
            star_t = t;
            p += 1;
        } else if star_p != usize::MAX {
            p = star_p + 1;
            star_t += 1;
            t = star_t;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprints_are_stable_and_shared() {
        let a = Command::new("GET", vec![Bytes::from("foo")]);
        let b = Command::new("GET", vec![Bytes::from("foo")]);
        let c = Command::new("GET", vec![Bytes::from("bar")]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }

    #[test]
    fn response_hash_distinguishes_results() {
        let null = Response::Null;
        let hello = Response::Bulk(Bytes::from("hello"));
        assert_ne!(response_hash(&null), response_hash(&hello));
        assert_eq!(response_hash(&hello), response_hash(&hello.clone()));
    }

    #[test]
    fn glob_basics() {
        assert!(glob_match(b"user:*", b"user:1"));
        assert!(glob_match(b"user:*", b"user:"));
        assert!(!glob_match(b"user:*", b"session:1"));
        assert!(glob_match(b"*", b"anything"));
        assert!(glob_match(b"u?er:1", b"user:1"));
        assert!(!glob_match(b"u?er:1", b"uber:12"));
        assert!(glob_match(b"a*b*c", b"aXXbYYc"));
        assert!(!glob_match(b"a*b*c", b"aXXbYY"));
        assert!(glob_match(b"exact", b"exact"));
        assert!(!glob_match(b"exact", b"exactly"));
    }
}
