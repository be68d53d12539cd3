//! In-memory key-value server speaking RESP, with single-master,
//! multi-replica asynchronous replication.
//!
//! - [`resp`] and [`connection`] frame bytes on the wire.
//! - [`commands`] dispatches PING, ECHO, SET, GET, INFO, REPLCONF and PSYNC.
//! - [`registry`] and [`propagator`] carry a master's writes to its replicas.
//! - [`replication`] holds the full-resync sequence and the replica handshake.
//! - [`server`] and [`handler`] accept connections and run one task per peer.

pub mod commands;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod handler;
pub mod propagator;
pub mod rdb;
pub mod registry;
pub mod replication;
pub mod resp;
pub mod server;
pub mod types;

pub use config::{Cli, Config, MasterAddr};
pub use server::Server;
pub use types::{Role, ServerState};
