//! TCP acceptor and the fixed worker pool.
//!
//! The acceptor polls the listener with a short timeout so it can
//! observe the shutdown flag between attempts, and pushes accepted
//! connections onto a shared unbounded queue. Each worker loops pulling
//! one connection and running its session to completion; sessions get no
//! parallelism beyond their worker.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::approval::ApprovalGate;
use crate::config::ServerConfig;
use crate::session;
use crate::state::ServerState;

pub struct Server {
    config: Arc<ServerConfig>,
    state: Arc<ServerState>,
    approval: Arc<dyn ApprovalGate>,
}

impl Server {
    pub fn new(config: ServerConfig, approval: Arc<dyn ApprovalGate>) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(ServerState::new()),
            approval,
        }
    }

    /// Shared state handle, mainly for inspection in tests.
    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(self) -> anyhow::Result<()> {
        let listen = self.config.listen;
        info!(%listen, "starting server");
        let listener = TcpListener::bind(listen)
            .await
            .with_context(|| format!("bind {listen}"))?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener. Tests bind port
    /// 0 themselves and pass the listener in.
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let local = listener.local_addr().context("listener local addr")?;
        info!(addr = %local, "server is listening for connections");

        let (tx, rx) = async_channel::unbounded::<(TcpStream, SocketAddr)>();

        let mut workers = JoinSet::new();
        for worker_id in 0..self.config.workers {
            let rx = rx.clone();
            let config = Arc::clone(&self.config);
            let state = Arc::clone(&self.state);
            let approval = Arc::clone(&self.approval);
            workers.spawn(async move {
                // Runs until the queue is closed at shutdown.
                while let Ok((stream, addr)) = rx.recv().await {
                    debug!(worker_id, %addr, "worker picked up connection");
                    session::handle_connection(
                        stream,
                        addr,
                        Arc::clone(&config),
                        Arc::clone(&state),
                        Arc::clone(&approval),
                    )
                    .await;
                }
                debug!(worker_id, "worker exiting");
            });
        }
        drop(rx);

        while !self.state.shutdown_requested() {
            match timeout(self.config.poll_interval, listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    if let Err(e) = tx.send((stream, addr)).await {
                        error!(error = %e, "connection queue closed");
                        break;
                    }
                }
                Ok(Err(e)) => error!(error = %e, "accept failed"),
                // Poll expired; loop around to re-check the flag.
                Err(_elapsed) => continue,
            }
        }

        info!("shutdown requested, draining workers");
        drop(tx);
        while workers.join_next().await.is_some() {}
        info!("server stopped");
        Ok(())
    }
}
