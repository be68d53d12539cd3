use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::connection::write_reply;
use crate::rdb;
use crate::registry::ReplicaHandle;
use crate::resp::{encode_simple_string, encode_snapshot};
use crate::types::ServerState;

/// A connection that completed a full resync and now receives the write stream.
pub struct ReplicaLink {
    pub id: u64,
    pub stream: mpsc::UnboundedReceiver<Bytes>,
}

/// Sends `+FULLRESYNC <replid> 0`, pauses, ships the snapshot and then registers
/// the connection so it receives every later write.
pub async fn full_resync<W>(writer: &mut W, peer: SocketAddr, state: &ServerState) -> Result<ReplicaLink>
where
    W: AsyncWrite + Unpin,
{
    let write_timeout = state.config.replica_write_timeout;

    let header = encode_simple_string(&format!("FULLRESYNC {} 0", state.master_replid));
    write_bounded(writer, &header, write_timeout)
        .await
        .context("sending FULLRESYNC")?;

    // Some peers are not reading yet right after the header.
    tokio::time::sleep(state.config.resync_delay).await;

    let snapshot = rdb::empty_snapshot().context("decoding snapshot image")?;
    write_bounded(writer, &encode_snapshot(&snapshot), write_timeout)
        .await
        .context("sending snapshot")?;
    debug!(%peer, bytes = snapshot.len(), "snapshot sent");

    let (handle, stream) = ReplicaHandle::new(state.replicas.next_id(), peer);
    let id = handle.id();
    state.replicas.add(handle);
    info!(%peer, replicas = state.replicas.len(), "replica registered");

    Ok(ReplicaLink { id, stream })
}

/// Writes one buffer, failing if the peer does not drain it within `limit`.
pub async fn write_bounded<W>(writer: &mut W, bytes: &[u8], limit: Duration) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match timeout(limit, write_reply(writer, bytes)).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("write did not complete within {limit:?}"),
        )),
    }
}
