//! Process bootstrap: flags, logging, WAL selection and replay, shard
//! spawn, watch fabric, acceptor, and graceful shutdown.
//!
//! Initialization is plain `Result` plumbing — failures bubble up here
//! and decide the exit code. Exit 0 means a clean drain; any fatal
//! startup error (unbindable port, WAL init failure with WAL enabled)
//! exits non-zero before a single client is accepted.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use ripple_core::{CommandTable, ShardManager, ShardSet};
use ripple_server::config::{Config, Flags, WalEngine};
use ripple_server::restore;
use ripple_server::server;
use ripple_server::watch::WatchFabric;
use ripple_server::worker::WorkerContext;
use ripple_server::worker_manager::WorkerManager;
use ripple_wal::{NullWal, SegmentedWal, SqliteWal, WalError, WalSink};

/// How often the background flusher pushes the WAL toward disk.
const WAL_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> ExitCode {
    let flags = Flags::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| flags.log_level.clone().into()),
        )
        .init();

    let config = Arc::new(Config::resolve(&flags));
    info!(
        host = %config.host,
        port = config.port,
        shards = config.num_shards,
        keys_limit = ?config.keys_limit,
        watch = config.enable_watch,
        wal = ?config.wal_engine,
        max_clients = config.max_clients,
        "ripple starting"
    );

    // -- WAL --------------------------------------------------------------
    let wal: Arc<dyn WalSink> = match build_wal(&config) {
        Ok(wal) => wal,
        Err(e) => {
            error!(error = %e, "could not create WAL backend");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = wal.init(SystemTime::now()) {
        error!(error = %e, "could not initialize WAL");
        return ExitCode::FAILURE;
    }

    // -- shutdown signal --------------------------------------------------
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    // -- engine -----------------------------------------------------------
    let table = Arc::new(CommandTable::standard());
    let (shards, shard_set, streams) = ShardManager::spawn(
        &config.engine(),
        Arc::clone(&table),
        Arc::clone(&wal),
        shutdown_rx.clone(),
        config.enable_watch,
    );

    // replay before any client is accepted
    if config.restore_wal {
        match restore::replay_wal(Arc::clone(&wal), &shards).await {
            Ok(count) => info!(commands = count, "restored from WAL"),
            Err(e) => {
                error!(error = %e, "WAL replay failed");
                return ExitCode::FAILURE;
            }
        }
    }

    // -- workers & watch fabric -------------------------------------------
    let workers = Arc::new(WorkerManager::new(
        config.max_clients,
        config.notify_buffer,
        config.overflow_policy,
    ));

    let watch_tx = match streams {
        Some(streams) => {
            let (tx, rx) = mpsc::channel(256);
            let fabric =
                WatchFabric::new(Arc::clone(&shards), Arc::clone(&workers), rx, streams);
            tokio::spawn(fabric.run(shutdown_rx.clone()));
            Some(tx)
        }
        None => None,
    };

    // background flusher; a no-op for synchronous backends
    tokio::spawn({
        let wal = Arc::clone(&wal);
        let mut shutdown = shutdown_rx.clone();
        async move {
            let mut tick = tokio::time::interval(WAL_FLUSH_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tick.tick() => {
                        if let Err(e) = wal.flush() {
                            warn!(error = %e, "wal flush failed");
                        }
                    }
                }
            }
        }
    });

    // -- acceptor ---------------------------------------------------------
    let addr = format!("{}:{}", config.host, config.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "could not bind");
            return ExitCode::FAILURE;
        }
    };
    info!(%addr, "listening");

    let ctx = WorkerContext {
        config: Arc::clone(&config),
        table,
        shards,
        workers,
        watch_tx,
    };
    if let Err(e) = server::run(listener, ctx, shutdown_rx.clone()).await {
        error!(error = %e, "acceptor failed");
        let _ = shutdown_tx.send(true);
    }

    // -- graceful drain ---------------------------------------------------
    shutdown_and_drain(&config, shard_set).await;

    if let Err(e) = wal.shutdown() {
        warn!(error = %e, "wal shutdown failed");
    }
    info!("bye");
    ExitCode::SUCCESS
}

fn build_wal(config: &Config) -> Result<Arc<dyn WalSink>, WalError> {
    Ok(match config.wal_engine {
        WalEngine::Null => Arc::new(NullWal::new()),
        WalEngine::Segmented => Arc::new(SegmentedWal::new(&config.wal_dir)),
        WalEngine::Sqlite => Arc::new(SqliteWal::open(&config.wal_dir)?),
    })
}

async fn shutdown_and_drain(config: &Config, shard_set: ShardSet) {
    match tokio::time::timeout(config.shutdown_grace, shard_set.join()).await {
        Ok(()) => info!("shards drained"),
        Err(_) => warn!(
            grace_ms = config.shutdown_grace.as_millis() as u64,
            "grace deadline exceeded, aborting remaining tasks"
        ),
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!(error = %e, "could not install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
