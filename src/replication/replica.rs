use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::commands::{execute, Origin, Reply};
use crate::config::MasterAddr;
use crate::connection::{write_reply, FrameReader};
use crate::error::{HandshakeError, ProtocolError};
use crate::resp::{encode_array, Frame};
use crate::types::ServerState;

const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Steps of the replica bootstrap, in order. There are no backward transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Disconnected,
    Connected,
    PingAcked,
    ReplConf1Acked,
    ReplConf2Acked,
    AwaitingFullResync,
    AwaitingSnapshot,
    Streaming,
}

/// An established replication link, positioned right after the snapshot.
pub struct MasterLink {
    pub replid: String,
    pub master_offset: i64,
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// One attempt at bootstrapping against a master. Retrying is the caller's job.
pub struct Handshake {
    state: HandshakeState,
    master: MasterAddr,
    listening_port: u16,
    connect_timeout: Duration,
    io: Option<(FrameReader<OwnedReadHalf>, OwnedWriteHalf)>,
    resync: Option<(String, i64)>,
}

impl Handshake {
    pub fn new(master: MasterAddr, listening_port: u16, connect_timeout: Duration) -> Self {
        Self {
            state: HandshakeState::Disconnected,
            master,
            listening_port,
            connect_timeout,
            io: None,
            resync: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Drives every transition up to `Streaming`.
    pub async fn run(mut self) -> Result<MasterLink, HandshakeError> {
        while self.state != HandshakeState::Streaming {
            self.step().await?;
        }
        self.into_link()
    }

    /// Performs the single transition out of the current state.
    pub async fn step(&mut self) -> Result<HandshakeState, HandshakeError> {
        use HandshakeState::*;

        let next = match self.state {
            Disconnected => {
                let addr = self.master.to_string();
                let stream = timeout(self.connect_timeout, TcpStream::connect(&addr))
                    .await
                    .map_err(|_| HandshakeError::DialTimeout(addr.clone()))?
                    .map_err(|source| HandshakeError::Dial { addr, source })?;
                let (reader, writer) = stream.into_split();
                self.io = Some((FrameReader::new(reader), writer));
                Connected
            }
            Connected => {
                self.exchange("PING", &["PING"]).await?;
                PingAcked
            }
            PingAcked => {
                let port = self.listening_port.to_string();
                self.exchange("REPLCONF listening-port", &["REPLCONF", "listening-port", port.as_str()])
                    .await?;
                ReplConf1Acked
            }
            ReplConf1Acked => {
                self.exchange("REPLCONF capa", &["REPLCONF", "capa", "psync2"]).await?;
                ReplConf2Acked
            }
            ReplConf2Acked => {
                let (_, writer) = self.io("PSYNC")?;
                write_reply(writer, &encode_array(&["PSYNC", "?", "-1"])).await?;
                AwaitingFullResync
            }
            AwaitingFullResync => {
                let reply = self.read_reply("PSYNC").await?;
                self.resync = Some(parse_fullresync(reply)?);
                AwaitingSnapshot
            }
            AwaitingSnapshot => {
                let limit = self.connect_timeout;
                let (reader, _) = self.io("snapshot transfer")?;
                let len = timeout(limit, reader.read_snapshot())
                    .await
                    .map_err(|_| HandshakeError::ReplyTimeout("snapshot transfer"))??
                    .ok_or(HandshakeError::Closed("snapshot transfer"))?;
                debug!(bytes = len, "snapshot received and discarded");
                Streaming
            }
            Streaming => Streaming,
        };

        debug!(from = ?self.state, to = ?next, master = %self.master, "handshake transition");
        self.state = next;
        Ok(next)
    }

    fn into_link(self) -> Result<MasterLink, HandshakeError> {
        let Some((reader, writer)) = self.io else {
            return Err(HandshakeError::Closed("handshake"));
        };
        let (replid, master_offset) = self.resync.unwrap_or_default();
        Ok(MasterLink {
            replid,
            master_offset,
            reader,
            writer,
        })
    }

    fn io(
        &mut self,
        stage: &'static str,
    ) -> Result<&mut (FrameReader<OwnedReadHalf>, OwnedWriteHalf), HandshakeError> {
        self.io.as_mut().ok_or(HandshakeError::Closed(stage))
    }

    /// Sends `command` and waits for any non-error reply.
    async fn exchange(&mut self, stage: &'static str, command: &[&str]) -> Result<Frame, HandshakeError> {
        let (_, writer) = self.io(stage)?;
        write_reply(writer, &encode_array(command)).await?;
        self.read_reply(stage).await
    }

    /// Reads the master's answer; a master that stays silent for longer than
    /// the connect timeout fails this attempt.
    async fn read_reply(&mut self, stage: &'static str) -> Result<Frame, HandshakeError> {
        let limit = self.connect_timeout;
        let (reader, _) = self.io(stage)?;
        let reply = timeout(limit, reader.read_frame())
            .await
            .map_err(|_| HandshakeError::ReplyTimeout(stage))??;
        match reply {
            None => Err(HandshakeError::Closed(stage)),
            Some((Frame::Error(reply), _)) => Err(HandshakeError::UnexpectedReply { stage, reply }),
            Some((frame, _)) => Ok(frame),
        }
    }
}

fn parse_fullresync(reply: Frame) -> Result<(String, i64), HandshakeError> {
    let unexpected = |reply: String| HandshakeError::UnexpectedReply {
        stage: "PSYNC",
        reply,
    };
    let line = match reply {
        Frame::Simple(line) => line,
        other => return Err(unexpected(format!("{other:?}"))),
    };
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        [keyword, replid, offset] if keyword.eq_ignore_ascii_case("FULLRESYNC") => {
            let offset = offset.parse::<i64>().map_err(|_| unexpected(line.clone()))?;
            Ok((replid.to_string(), offset))
        }
        _ => Err(unexpected(line.clone())),
    }
}

/// Applies the master's command stream until the link drops.
///
/// Every frame, including ones that carry no command, advances the replication
/// offset by its exact size after it has been applied.
pub async fn stream_from_master(link: &mut MasterLink, state: &ServerState) -> Result<(), ProtocolError> {
    loop {
        let Some((frame, consumed)) = link.reader.read_frame().await? else {
            return Ok(());
        };
        let command = frame.into_command();
        if let Reply::Data(reply) = execute(&command, state, Origin::Master) {
            write_reply(&mut link.writer, &reply).await?;
        }
        let offset = state.advance_repl_offset(consumed);
        debug!(?command, consumed, offset, "applied command from master");
    }
}

/// Runs handshakes against `master` with exponential backoff until one
/// succeeds or the configured attempts are used up. The replication offset
/// restarts from zero on every successful full resync.
pub async fn connect_with_retry(state: &ServerState, master: &MasterAddr, listening_port: u16) -> Result<MasterLink> {
    let attempts = state.config.handshake_attempts;
    let mut delay = state.config.retry_backoff;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let handshake = Handshake::new(master.clone(), listening_port, state.config.connect_timeout);
        match handshake.run().await {
            Ok(link) => {
                state.reset_repl_offset();
                info!(
                    %master,
                    replid = %link.replid,
                    master_offset = link.master_offset,
                    attempt,
                    "replication link established"
                );
                return Ok(link);
            }
            Err(err) if attempts == 0 || attempt < attempts => {
                warn!(%master, attempt, ?delay, error = %err, "handshake failed; retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_BACKOFF);
            }
            Err(err) => {
                return Err(err).with_context(|| format!("giving up on master {master} after {attempt} attempts"));
            }
        }
    }
}

/// Streams from an established link and re-bootstraps whenever it drops.
///
/// If reconnecting exhausts its attempts the replica stops replicating and
/// keeps serving whatever it already holds.
pub async fn replicate(state: Arc<ServerState>, master: MasterAddr, listening_port: u16, mut link: MasterLink) {
    loop {
        match stream_from_master(&mut link, &state).await {
            Ok(()) => warn!(%master, "master closed the replication link"),
            Err(err) => warn!(%master, error = %err, "replication link failed"),
        }
        link = match connect_with_retry(&state, &master, listening_port).await {
            Ok(link) => link,
            Err(err) => {
                error!(error = ?err, "replication stopped; serving existing data");
                return;
            }
        };
    }
}
