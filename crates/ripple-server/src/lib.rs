//! ripple-server: the serving layer over the ripple engine.
//!
//! Hosts the immutable configuration record, the TCP acceptor, the
//! per-connection workers, the worker registry with its notification
//! inboxes, and the watch fabric. The binary in `main.rs` wires these
//! together; everything here is also driven directly by the
//! integration tests over in-process duplex pipes.

pub mod config;
pub mod restore;
pub mod server;
pub mod watch;
pub mod wire;
pub mod worker;
pub mod worker_manager;

pub use config::{Config, Flags, WalEngine};
pub use watch::{fingerprint, WatchCommand, WatchFabric};
pub use worker::{run as run_worker, WorkerContext};
pub use worker_manager::{
    Notification, NotificationInbox, NotifyOutcome, OverflowPolicy, WorkerManager,
    WorkerRegistration,
};
