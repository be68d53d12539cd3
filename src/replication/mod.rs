//! Master/replica replication.
//!
//! - [`master`] answers PSYNC with a full resync and registers the connection
//!   for the write stream.
//! - [`replica`] drives the handshake against the configured master, then
//!   applies the streamed commands while counting consumed bytes.

pub mod master;
pub mod replica;

pub use master::{full_resync, ReplicaLink};
pub use replica::{connect_with_retry, replicate, Handshake, HandshakeState, MasterLink};
