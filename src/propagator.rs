use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::registry::ReplicaRegistry;

/// Ordered journal of write commands accepted by the master.
///
/// Writers enqueue while still holding the storage lock, so the journal order
/// is the order in which writes were applied. A single fan-out task drains it.
pub struct CommandPropagator {
    journal: mpsc::UnboundedSender<Bytes>,
}

impl CommandPropagator {
    /// Starts the fan-out task. Must be called from within a Tokio runtime.
    pub fn spawn(registry: Arc<ReplicaRegistry>) -> Self {
        let (journal, entries) = mpsc::unbounded_channel();
        tokio::spawn(run_fan_out(registry, entries));
        Self { journal }
    }

    pub fn propagate(&self, command: Bytes) {
        if self.journal.send(command).is_err() {
            warn!("replication fan-out task is gone; dropping command");
        }
    }
}

async fn run_fan_out(registry: Arc<ReplicaRegistry>, mut entries: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(command) = entries.recv().await {
        fan_out(&registry, &command);
    }
    debug!("replication journal closed");
}

/// Hands `command` to every registered replica, dropping the ones whose
/// connection has gone away. Returns how many replicas accepted it.
pub fn fan_out(registry: &ReplicaRegistry, command: &Bytes) -> usize {
    let mut delivered = 0;
    for replica in registry.snapshot() {
        if replica.send(command.clone()) {
            delivered += 1;
        } else {
            registry.remove(replica.id());
            warn!(peer = %replica.peer(), "replica connection closed; removed from registry");
        }
    }
    delivered
}
