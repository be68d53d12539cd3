use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tracing::{info, warn};

use crate::config::Config;
use crate::handler::handle_client;
use crate::replication::{connect_with_retry, replicate};
use crate::types::ServerState;

/// Owns the listening socket and spawns one task per accepted connection.
pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl Server {
    pub async fn bind(config: Config) -> Result<Self> {
        let addr = SocketAddr::new(config.bind, config.port);
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        Ok(Self {
            listener,
            state: ServerState::new(config),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Serves until `shutdown` resolves.
    ///
    /// A replica first completes its handshake with the master; if that fails
    /// after every retry, this returns the error without serving.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let listening_port = self.local_addr()?.port();
        let Server { listener, state } = self;

        let replication = match state.config.replica_of.clone() {
            Some(master) => {
                let link = connect_with_retry(&state, &master, listening_port).await?;
                Some(tokio::spawn(replicate(Arc::clone(&state), master, listening_port, link)))
            }
            None => None,
        };

        tokio::pin!(shutdown);
        loop {
            select! {
                _ = &mut shutdown => {
                    info!("server shutting down");
                    break;
                }
                accepted = listener.accept() => handle_accept_result(accepted, &state),
            }
        }

        if let Some(task) = replication {
            task.abort();
        }
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(result: std::io::Result<(TcpStream, SocketAddr)>, state: &Arc<ServerState>) {
    match result {
        Ok((stream, peer)) => {
            tokio::spawn(handle_client(stream, peer, Arc::clone(state)));
        }
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}
