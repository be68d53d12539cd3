#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use kvrepl::connection::{write_reply, FrameReader};
use kvrepl::resp::{encode_array, Frame};
use kvrepl::{Config, MasterAddr, Server, ServerState};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;

pub const READ_TIMEOUT: Duration = Duration::from_secs(3);

pub fn local_config() -> Config {
    Config {
        bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        resync_delay: Duration::from_millis(10),
        retry_backoff: Duration::from_millis(10),
        ..Config::default()
    }
}

pub fn replica_config(master: SocketAddr) -> Config {
    Config {
        replica_of: Some(MasterAddr {
            host: master.ip().to_string(),
            port: master.port(),
        }),
        ..local_config()
    }
}

pub struct RunningServer {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

pub async fn start(config: Config) -> Result<RunningServer> {
    let server = Server::bind(config).await?;
    let addr = server.local_addr()?;
    let state = server.state();
    let (shutdown, stopped) = oneshot::channel::<()>();
    tokio::spawn(server.run_until(async {
        let _ = stopped.await;
    }));
    Ok(RunningServer {
        addr,
        state,
        shutdown: Some(shutdown),
    })
}

/// A raw RESP peer: a client, or a hand-driven replica.
pub struct Peer {
    pub reader: FrameReader<OwnedReadHalf>,
    pub writer: OwnedWriteHalf,
}

impl Peer {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Ok(Self::from_stream(TcpStream::connect(addr).await?))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: FrameReader::new(reader),
            writer,
        }
    }

    pub async fn expect_command(&mut self, expected: &[&str]) -> Result<()> {
        let command = self.read().await?.into_command();
        anyhow::ensure!(command == expected, "expected {expected:?}, got {command:?}");
        Ok(())
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        write_reply(&mut self.writer, bytes).await?;
        Ok(())
    }

    pub async fn send(&mut self, command: &[&str]) -> Result<()> {
        self.send_raw(&encode_array(command)).await
    }

    pub async fn read(&mut self) -> Result<Frame> {
        let (frame, _) = timeout(READ_TIMEOUT, self.reader.read_frame())
            .await
            .context("timed out waiting for a frame")??
            .context("connection closed")?;
        Ok(frame)
    }

    pub async fn request(&mut self, command: &[&str]) -> Result<Frame> {
        self.send(command).await?;
        self.read().await
    }

    /// Runs the replica side of the handshake by hand and swallows the snapshot.
    pub async fn become_replica(&mut self) -> Result<String> {
        self.request(&["PING"]).await?;
        self.request(&["REPLCONF", "listening-port", "6380"]).await?;
        self.request(&["REPLCONF", "capa", "psync2"]).await?;
        let header = self.request(&["PSYNC", "?", "-1"]).await?;
        timeout(READ_TIMEOUT, self.reader.read_snapshot())
            .await
            .context("timed out waiting for the snapshot")??
            .context("connection closed before the snapshot")?;
        match header {
            Frame::Simple(line) => Ok(line),
            other => anyhow::bail!("unexpected PSYNC reply {other:?}"),
        }
    }
}

pub fn bulk(text: &str) -> Frame {
    Frame::Bulk(bytes::Bytes::copy_from_slice(text.as_bytes()))
}

pub fn simple(text: &str) -> Frame {
    Frame::Simple(text.to_string())
}

/// Polls `check` until it holds or the read timeout elapses.
pub async fn eventually<F>(mut check: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + READ_TIMEOUT;
    while !check() {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("condition not reached in time");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
