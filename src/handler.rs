use std::future::pending;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::select;
use tracing::{debug, info, warn};

use crate::commands::{execute, Origin, Reply};
use crate::connection::{write_reply, FrameReader};
use crate::replication::master::write_bounded;
use crate::replication::{full_resync, ReplicaLink};
use crate::types::ServerState;

/// Serves one accepted connection until the peer closes it or sends a malformed frame.
pub async fn handle_client(stream: TcpStream, peer: SocketAddr, state: Arc<ServerState>) {
    let clients = state.client_connected();
    info!(%peer, clients, "client connected");

    let (reader, writer) = stream.into_split();
    let mut link = None;
    match serve(reader, writer, peer, &state, &mut link).await {
        Ok(()) => debug!(%peer, "client closed the connection"),
        Err(err) => warn!(%peer, error = %err, "connection closed with error"),
    }

    if let Some(link) = link {
        if state.replicas.remove(link.id).is_some() {
            info!(%peer, replicas = state.replicas.len(), "replica dropped from registry");
        }
    }
    let clients = state.client_disconnected();
    debug!(%peer, clients, "client disconnected");
}

/// Frames are handled strictly in arrival order. After PSYNC the same loop
/// also forwards the replication stream, so the socket has a single writer.
async fn serve(
    reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    peer: SocketAddr,
    state: &ServerState,
    link: &mut Option<ReplicaLink>,
) -> Result<()> {
    let mut reader = FrameReader::new(reader);

    loop {
        select! {
            frame = reader.read_frame() => {
                let Some((frame, _)) = frame? else {
                    return Ok(());
                };
                match execute(&frame.into_command(), state, Origin::Client) {
                    Reply::Data(reply) => write_reply(&mut writer, &reply).await?,
                    Reply::Silent => {}
                    Reply::FullResync => {
                        if let Some(previous) = link.take() {
                            state.replicas.remove(previous.id);
                        }
                        *link = Some(full_resync(&mut writer, peer, state).await?);
                    }
                }
            }
            command = next_propagated(link) => match command {
                Some(command) => {
                    write_bounded(&mut writer, &command, state.config.replica_write_timeout).await?;
                }
                None => {
                    warn!(%peer, "replica no longer registered; stopping replication stream");
                    *link = None;
                }
            },
        }
    }
}

async fn next_propagated(link: &mut Option<ReplicaLink>) -> Option<Bytes> {
    match link {
        Some(link) => link.stream.recv().await,
        None => pending().await,
    }
}
