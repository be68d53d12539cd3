use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::Config;
use crate::db::InMemoryDB;
use crate::propagator::CommandPropagator;
use crate::registry::ReplicaRegistry;
use crate::resp::encode_array;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica,
}

impl Role {
    /// Name reported on the wire by INFO.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Replica => "slave",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a connection task needs, shared behind an `Arc`.
///
/// The storage and the replica registry each sit behind their own lock and
/// no code path holds both.
pub struct ServerState {
    pub config: Config,
    pub role: Role,
    pub master_replid: String,
    pub replicas: Arc<ReplicaRegistry>,
    db: Mutex<InMemoryDB>,
    propagator: Option<CommandPropagator>,
    repl_offset: AtomicU64,
    connected_clients: AtomicUsize,
}

impl ServerState {
    /// Builds the state for `config`. A master also starts its fan-out task,
    /// so this must run inside a Tokio runtime.
    pub fn new(config: Config) -> Arc<Self> {
        let role = config.role();
        let replicas = Arc::new(ReplicaRegistry::new());
        let propagator = match role {
            Role::Master => Some(CommandPropagator::spawn(Arc::clone(&replicas))),
            Role::Replica => None,
        };

        Arc::new(Self {
            config,
            role,
            master_replid: generate_replid(),
            replicas,
            db: Mutex::new(InMemoryDB::new()),
            propagator,
            repl_offset: AtomicU64::new(0),
            connected_clients: AtomicUsize::new(0),
        })
    }

    pub fn db(&self) -> MutexGuard<'_, InMemoryDB> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores a string value and, on a master, journals it for the replicas.
    ///
    /// The journal entry is a plain `SET key value`; expiry is not propagated.
    pub fn apply_set(&self, key: String, value: String, ttl: Option<Duration>, propagate: bool) {
        let mut db = self.db();
        if propagate {
            if let Some(propagator) = &self.propagator {
                propagator.propagate(encode_array(&["SET", key.as_str(), value.as_str()]));
            }
        }
        match ttl {
            Some(ttl) => db.set_with_expiry(key, value, ttl),
            None => db.set(key, value),
        }
    }

    /// Bytes of the master's stream consumed since the last FULLRESYNC.
    pub fn repl_offset(&self) -> u64 {
        self.repl_offset.load(Ordering::SeqCst)
    }

    pub fn advance_repl_offset(&self, consumed: usize) -> u64 {
        self.repl_offset.fetch_add(consumed as u64, Ordering::SeqCst) + consumed as u64
    }

    pub fn reset_repl_offset(&self) {
        self.repl_offset.store(0, Ordering::SeqCst);
    }

    pub fn connected_clients(&self) -> usize {
        self.connected_clients.load(Ordering::Relaxed)
    }

    pub fn client_connected(&self) -> usize {
        self.connected_clients.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn client_disconnected(&self) -> usize {
        self.connected_clients.fetch_sub(1, Ordering::Relaxed) - 1
    }
}

fn generate_replid() -> String {
    hex::encode(rand::random::<[u8; 20]>())
}
