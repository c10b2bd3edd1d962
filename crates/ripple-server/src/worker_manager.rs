//! Worker registry and watch-notification delivery.
//!
//! The `WorkerManager` maps worker ids to their notification inboxes
//! so the watch fabric can push to a specific subscriber. It also
//! enforces `max_clients` at registration time.
//!
//! A notification inbox is a bounded deque drained by its worker
//! between responses. Overflow behavior is a deployment policy:
//! `DropOldest` keeps the subscriber live at the cost of losing the
//! oldest unseen notification, `DisconnectSubscriber` closes the inbox
//! so the worker tears the connection down.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::Notify;

use ripple_core::{CommandError, Response};

/// What to do when a subscriber's inbox is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Drop the oldest queued notification. Lossy but live.
    DropOldest,
    /// Close the subscriber's connection.
    DisconnectSubscriber,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drop-oldest" => Ok(OverflowPolicy::DropOldest),
            "disconnect" => Ok(OverflowPolicy::DisconnectSubscriber),
            other => Err(format!(
                "unknown overflow policy '{other}'. valid options: drop-oldest, disconnect"
            )),
        }
    }
}

/// A watch notification envelope, as delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct Notification {
    pub fingerprint: u64,
    /// The change-event sequence number that triggered this
    /// notification. Strictly increasing per fingerprint.
    pub seq: u64,
    pub result: Response,
}

/// Outcome of pushing one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Delivered,
    /// Delivered after evicting the oldest queued notification.
    DroppedOldest,
    /// The subscriber was disconnected under the strict policy.
    Disconnected,
    /// No such worker (already gone).
    Gone,
}

/// Bounded notification queue shared between the watch fabric (push
/// side) and one worker (drain side).
#[derive(Debug)]
pub struct NotificationInbox {
    queue: Mutex<VecDeque<Notification>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
}

impl NotificationInbox {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Pushes one notification under the given policy.
    fn push(&self, notification: Notification, policy: OverflowPolicy) -> NotifyOutcome {
        if self.closed.load(Ordering::Acquire) {
            return NotifyOutcome::Gone;
        }
        let outcome = {
            let mut queue = self.queue.lock().expect("inbox mutex");
            if queue.len() >= self.capacity {
                match policy {
                    OverflowPolicy::DropOldest => {
                        queue.pop_front();
                        queue.push_back(notification);
                        NotifyOutcome::DroppedOldest
                    }
                    OverflowPolicy::DisconnectSubscriber => NotifyOutcome::Disconnected,
                }
            } else {
                queue.push_back(notification);
                NotifyOutcome::Delivered
            }
        };
        match outcome {
            NotifyOutcome::Disconnected => self.close(),
            _ => self.notify.notify_one(),
        }
        outcome
    }

    /// Awaits the next notification. Returns `None` once the inbox is
    /// closed and drained — the worker should close the connection.
    pub async fn recv(&self) -> Option<Notification> {
        loop {
            // register interest before checking, so a push between the
            // check and the await still wakes us
            let notified = self.notify.notified();
            if let Some(n) = self.queue.lock().expect("inbox mutex").pop_front() {
                return Some(n);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}

/// A registered connection: its id and the inbox the watch fabric will
/// push into.
#[derive(Debug, Clone)]
pub struct WorkerRegistration {
    pub id: u64,
    pub inbox: Arc<NotificationInbox>,
}

/// Registry of live workers.
#[derive(Debug)]
pub struct WorkerManager {
    workers: DashMap<u64, Arc<NotificationInbox>>,
    next_id: AtomicU64,
    max_clients: usize,
    notify_capacity: usize,
    policy: OverflowPolicy,
}

impl WorkerManager {
    pub fn new(max_clients: usize, notify_capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            workers: DashMap::new(),
            next_id: AtomicU64::new(1),
            max_clients,
            notify_capacity,
            policy,
        }
    }

    pub fn client_count(&self) -> usize {
        self.workers.len()
    }

    /// Admits a new connection, failing with `TOO_MANY_CLIENTS` when
    /// the registry is full.
    pub fn register(&self) -> Result<WorkerRegistration, CommandError> {
        if self.workers.len() >= self.max_clients {
            return Err(CommandError::too_many_clients());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let inbox = Arc::new(NotificationInbox::new(self.notify_capacity));
        self.workers.insert(id, Arc::clone(&inbox));
        Ok(WorkerRegistration { id, inbox })
    }

    /// Removes a worker and closes its inbox.
    pub fn deregister(&self, id: u64) {
        if let Some((_, inbox)) = self.workers.remove(&id) {
            inbox.close();
        }
    }

    /// Pushes a notification to one worker, applying the overflow
    /// policy. Under the strict policy an overflowing subscriber is
    /// removed from the registry here.
    pub fn notify(&self, worker_id: u64, notification: Notification) -> NotifyOutcome {
        let Some(inbox) = self.workers.get(&worker_id).map(|e| Arc::clone(e.value())) else {
            return NotifyOutcome::Gone;
        };
        let outcome = inbox.push(notification, self.policy);
        if outcome == NotifyOutcome::Disconnected {
            self.workers.remove(&worker_id);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_core::ErrorKind;

    fn note(seq: u64) -> Notification {
        Notification {
            fingerprint: 7,
            seq,
            result: Response::Null,
        }
    }

    #[test]
    fn register_enforces_max_clients() {
        let mgr = WorkerManager::new(2, 8, OverflowPolicy::DropOldest);
        let _a = mgr.register().unwrap();
        let _b = mgr.register().unwrap();
        let err = mgr.register().unwrap_err();
        assert_eq!(err.kind, ErrorKind::TooManyClients);
    }

    #[test]
    fn deregister_frees_a_slot() {
        let mgr = WorkerManager::new(1, 8, OverflowPolicy::DropOldest);
        let a = mgr.register().unwrap();
        mgr.deregister(a.id);
        assert!(mgr.register().is_ok());
    }

    #[tokio::test]
    async fn notifications_arrive_in_order() {
        let mgr = WorkerManager::new(4, 8, OverflowPolicy::DropOldest);
        let reg = mgr.register().unwrap();
        for seq in 1..=3 {
            assert_eq!(mgr.notify(reg.id, note(seq)), NotifyOutcome::Delivered);
        }
        for expected in 1..=3 {
            assert_eq!(reg.inbox.recv().await.unwrap().seq, expected);
        }
    }

    #[tokio::test]
    async fn drop_oldest_keeps_the_newest() {
        let mgr = WorkerManager::new(4, 2, OverflowPolicy::DropOldest);
        let reg = mgr.register().unwrap();
        mgr.notify(reg.id, note(1));
        mgr.notify(reg.id, note(2));
        assert_eq!(mgr.notify(reg.id, note(3)), NotifyOutcome::DroppedOldest);

        assert_eq!(reg.inbox.recv().await.unwrap().seq, 2);
        assert_eq!(reg.inbox.recv().await.unwrap().seq, 3);
    }

    #[tokio::test]
    async fn disconnect_policy_closes_the_inbox() {
        let mgr = WorkerManager::new(4, 1, OverflowPolicy::DisconnectSubscriber);
        let reg = mgr.register().unwrap();
        mgr.notify(reg.id, note(1));
        assert_eq!(mgr.notify(reg.id, note(2)), NotifyOutcome::Disconnected);

        // the queued notification drains, then the closed inbox
        // reports end-of-stream
        assert_eq!(reg.inbox.recv().await.unwrap().seq, 1);
        assert!(reg.inbox.recv().await.is_none());
        assert_eq!(mgr.client_count(), 0);
    }

    #[tokio::test]
    async fn recv_wakes_on_push() {
        let mgr = Arc::new(WorkerManager::new(4, 8, OverflowPolicy::DropOldest));
        let reg = mgr.register().unwrap();
        let inbox = Arc::clone(&reg.inbox);

        let waiter = tokio::spawn(async move { inbox.recv().await });
        tokio::task::yield_now().await;
        mgr.notify(reg.id, note(9));
        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.seq, 9);
    }

    #[test]
    fn notify_unknown_worker_is_gone() {
        let mgr = WorkerManager::new(4, 8, OverflowPolicy::DropOldest);
        assert_eq!(mgr.notify(404, note(1)), NotifyOutcome::Gone);
    }
}
