//! Immutable server configuration.
//!
//! The bootstrap parses CLI flags, resolves them into one [`Config`]
//! record, and passes it by `Arc` into every constructor. Nothing in
//! the engine reads configuration from anywhere else.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use ripple_core::EngineConfig;

use crate::worker_manager::OverflowPolicy;

/// Which WAL backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalEngine {
    Null,
    Segmented,
    Sqlite,
}

impl FromStr for WalEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "null" => Ok(WalEngine::Null),
            "segmented" => Ok(WalEngine::Segmented),
            "sqlite" => Ok(WalEngine::Sqlite),
            other => Err(format!(
                "unknown wal engine '{other}'. valid options: null, segmented, sqlite"
            )),
        }
    }
}

/// CLI surface. Defaults mirror a single-node cache deployment.
#[derive(Debug, Parser)]
#[command(name = "ripple-server", about = "reactive in-memory key-value server")]
pub struct Flags {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 7379)]
    pub port: u16,

    /// Number of shards; -1 means one per logical core.
    #[arg(long, default_value_t = -1)]
    pub num_shards: i64,

    /// Per-shard live-key bound; 0 disables eviction.
    #[arg(long, default_value_t = 0)]
    pub keys_limit: u64,

    /// Candidates sampled per eviction.
    #[arg(long, default_value_t = 5)]
    pub eviction_sample: usize,

    /// Enable WATCH commands and real-time notifications.
    #[arg(long, default_value_t = false)]
    pub enable_watch: bool,

    /// Enable write-ahead logging.
    #[arg(long, default_value_t = false)]
    pub enable_wal: bool,

    /// WAL backend: null, segmented, or sqlite.
    #[arg(long, default_value = "null")]
    pub wal_engine: WalEngine,

    /// Directory for WAL files.
    #[arg(long, default_value = "/tmp/ripple")]
    pub wal_dir: PathBuf,

    /// Replay the WAL into the shards before accepting clients.
    #[arg(long, default_value_t = false)]
    pub restore_wal: bool,

    /// Abort writes when the WAL reports degraded durability.
    #[arg(long, default_value_t = false)]
    pub strict_degraded: bool,

    /// Require AUTH with this password before serving commands.
    #[arg(long)]
    pub requirepass: Option<String>,

    /// Maximum simultaneous client connections.
    #[arg(long, default_value_t = 10_000)]
    pub max_clients: usize,

    /// Per-worker watch-notification inbox capacity.
    #[arg(long, default_value_t = 256)]
    pub notify_buffer: usize,

    /// Aggregate change-event stream capacity.
    #[arg(long, default_value_t = 4096)]
    pub watch_buffer: usize,

    /// What to do when a subscriber's inbox is full.
    #[arg(long, default_value = "drop-oldest")]
    pub overflow_policy: OverflowPolicy,

    /// Per-command timeout in milliseconds, enforced at the worker.
    #[arg(long, default_value_t = 5_000)]
    pub command_timeout_ms: u64,

    /// Grace deadline for shutdown draining, in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    pub shutdown_grace_ms: u64,

    /// Log filter when RUST_LOG is unset (e.g. "info", "ripple=debug").
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// The resolved, immutable configuration record.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub num_shards: usize,
    pub keys_limit: Option<usize>,
    pub eviction_sample: usize,
    pub enable_watch: bool,
    pub enable_wal: bool,
    pub wal_engine: WalEngine,
    pub wal_dir: PathBuf,
    pub restore_wal: bool,
    pub strict_degraded: bool,
    pub require_pass: Option<String>,
    pub max_clients: usize,
    pub notify_buffer: usize,
    pub watch_buffer: usize,
    pub overflow_policy: OverflowPolicy,
    pub command_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Config {
    /// Resolves raw flags: shard count -1 becomes one per core, a
    /// keys-limit of 0 disables eviction.
    pub fn resolve(flags: &Flags) -> Self {
        let num_shards = if flags.num_shards > 0 {
            flags.num_shards as usize
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        };
        Self {
            host: flags.host.clone(),
            port: flags.port,
            num_shards,
            keys_limit: (flags.keys_limit > 0).then_some(flags.keys_limit as usize),
            eviction_sample: flags.eviction_sample.max(1),
            enable_watch: flags.enable_watch,
            enable_wal: flags.enable_wal,
            wal_engine: if flags.enable_wal {
                flags.wal_engine
            } else {
                WalEngine::Null
            },
            wal_dir: flags.wal_dir.clone(),
            restore_wal: flags.restore_wal,
            strict_degraded: flags.strict_degraded,
            require_pass: flags.requirepass.clone(),
            max_clients: flags.max_clients,
            notify_buffer: flags.notify_buffer,
            watch_buffer: flags.watch_buffer,
            overflow_policy: flags.overflow_policy,
            command_timeout: Duration::from_millis(flags.command_timeout_ms),
            shutdown_grace: Duration::from_millis(flags.shutdown_grace_ms),
        }
    }

    /// The engine-level slice of this configuration.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            shards: self.num_shards,
            keys_limit: self.keys_limit,
            eviction_sample: self.eviction_sample,
            event_buffer: self.watch_buffer,
            strict_degraded: self.strict_degraded,
            ..EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(args: &[&str]) -> Flags {
        let mut argv = vec!["ripple-server"];
        argv.extend_from_slice(args);
        Flags::parse_from(argv)
    }

    #[test]
    fn negative_shards_resolve_to_cores() {
        let cfg = Config::resolve(&flags(&[]));
        assert!(cfg.num_shards >= 1);
    }

    #[test]
    fn explicit_shards_are_kept() {
        let cfg = Config::resolve(&flags(&["--num-shards", "3"]));
        assert_eq!(cfg.num_shards, 3);
    }

    #[test]
    fn zero_keys_limit_disables_eviction() {
        let cfg = Config::resolve(&flags(&[]));
        assert_eq!(cfg.keys_limit, None);
        let cfg = Config::resolve(&flags(&["--keys-limit", "100"]));
        assert_eq!(cfg.keys_limit, Some(100));
    }

    #[test]
    fn wal_engine_ignored_without_enable_wal() {
        let cfg = Config::resolve(&flags(&["--wal-engine", "sqlite"]));
        assert_eq!(cfg.wal_engine, WalEngine::Null);
        let cfg = Config::resolve(&flags(&["--enable-wal", "--wal-engine", "sqlite"]));
        assert_eq!(cfg.wal_engine, WalEngine::Sqlite);
    }

    #[test]
    fn wal_engine_parses_known_names_only() {
        assert!("segmented".parse::<WalEngine>().is_ok());
        assert!("SQLITE".parse::<WalEngine>().is_ok());
        assert!("aof".parse::<WalEngine>().is_err());
    }
}
