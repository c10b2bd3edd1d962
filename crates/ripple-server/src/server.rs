//! TCP acceptor.
//!
//! Accepts connections until shutdown, registers each with the
//! `WorkerManager` (rejecting with `TOO_MANY_CLIENTS` when full), and
//! spawns a worker task per connection.

use std::io;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

use ripple_protocol::Frame;

use crate::worker::{self, WorkerContext};

/// Runs the accept loop until the shutdown signal flips.
pub async fn run(
    listener: TcpListener,
    ctx: WorkerContext,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("acceptor stopping");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (mut stream, peer) = accepted?;
                match ctx.workers.register() {
                    Ok(registration) => {
                        debug!(%peer, worker_id = registration.id, "client connected");
                        let ctx = ctx.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = worker::run(stream, registration, ctx, shutdown).await {
                                error!(%peer, error = %e, "connection error");
                            }
                        });
                    }
                    Err(e) => {
                        // one error frame, then close
                        let mut buf = BytesMut::new();
                        Frame::Error(e.message).serialize(&mut buf);
                        let _ = stream.write_all(&buf).await;
                        debug!(%peer, "rejected: client limit reached");
                    }
                }
            }
        }
    }
}
