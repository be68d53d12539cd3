use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;

use crate::types::Role;

pub const DEFAULT_PORT: u16 = 6379;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "In-memory key-value server with master/replica replication", long_about = None)]
pub struct Cli {
    /// Port to accept client connections on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Interface to bind the listener to.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Replicate from this master, given as "<host> <port>" or as two arguments.
    #[arg(long, num_args = 1..=2, value_names = ["HOST", "PORT"])]
    pub replicaof: Option<Vec<String>>,

    /// Upper bound on a single write of the replication stream to one replica.
    #[arg(long, default_value_t = 1000)]
    pub replica_write_timeout_ms: u64,

    /// Upper bound on dialing the master.
    #[arg(long, default_value_t = 5000)]
    pub connect_timeout_ms: u64,

    /// Pause between the FULLRESYNC line and the snapshot payload.
    #[arg(long, default_value_t = 200)]
    pub resync_delay_ms: u64,

    /// Handshake attempts before giving up on the master. 0 retries forever.
    #[arg(long, default_value_t = 5)]
    pub handshake_attempts: u32,

    /// First retry delay; doubled after every failed attempt.
    #[arg(long, default_value_t = 100)]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterAddr {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for MasterAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: IpAddr,
    pub port: u16,
    pub replica_of: Option<MasterAddr>,
    pub replica_write_timeout: Duration,
    pub connect_timeout: Duration,
    pub resync_delay: Duration,
    pub handshake_attempts: u32,
    pub retry_backoff: Duration,
}

impl Config {
    /// Fixed at startup: the presence of a master address makes this process a replica.
    pub fn role(&self) -> Role {
        match self.replica_of {
            Some(_) => Role::Replica,
            None => Role::Master,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            replica_of: None,
            replica_write_timeout: Duration::from_millis(1000),
            connect_timeout: Duration::from_millis(5000),
            resync_delay: Duration::from_millis(200),
            handshake_attempts: 5,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

impl TryFrom<Cli> for Config {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self> {
        let replica_of = cli.replicaof.as_deref().map(parse_master_addr).transpose()?;

        Ok(Self {
            bind: cli.bind,
            port: cli.port,
            replica_of,
            replica_write_timeout: Duration::from_millis(cli.replica_write_timeout_ms),
            connect_timeout: Duration::from_millis(cli.connect_timeout_ms),
            resync_delay: Duration::from_millis(cli.resync_delay_ms),
            handshake_attempts: cli.handshake_attempts,
            retry_backoff: Duration::from_millis(cli.retry_backoff_ms),
        })
    }
}

fn parse_master_addr(parts: &[String]) -> Result<MasterAddr> {
    let joined = parts.join(" ");
    let words: Vec<&str> = joined.split_whitespace().collect();
    let [host, port] = words.as_slice() else {
        bail!("--replicaof expects '<host> <port>', got '{joined}'");
    };
    let port = port
        .parse::<u16>()
        .with_context(|| format!("invalid master port '{port}'"))?;
    Ok(MasterAddr {
        host: host.to_string(),
        port,
    })
}
