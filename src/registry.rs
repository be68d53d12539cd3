use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::RegistryError;

/// Outbound side of a connection that completed PSYNC.
///
/// The connection task owns the socket; the handle only queues bytes for it.
#[derive(Debug, Clone)]
pub struct ReplicaHandle {
    id: u64,
    peer: SocketAddr,
    sender: mpsc::UnboundedSender<Bytes>,
}

impl ReplicaHandle {
    pub fn new(id: u64, peer: SocketAddr) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { id, peer, sender }, receiver)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queues `bytes` for the replica. `false` once its connection task has gone away.
    pub fn send(&self, bytes: Bytes) -> bool {
        self.sender.send(bytes).is_ok()
    }
}

/// The set of connections currently accepted as replicas.
#[derive(Default)]
pub struct ReplicaRegistry {
    replicas: Mutex<VecDeque<ReplicaHandle>>,
    next_id: AtomicU64,
}

impl ReplicaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn add(&self, replica: ReplicaHandle) {
        self.lock().push_back(replica);
    }

    /// Removes and returns the head of the pool.
    pub fn get(&self) -> Result<ReplicaHandle, RegistryError> {
        self.lock().pop_front().ok_or(RegistryError::Empty)
    }

    /// Returns a connection to the tail of the pool.
    pub fn put(&self, replica: ReplicaHandle) {
        self.lock().push_back(replica);
    }

    pub fn remove(&self, id: u64) -> Option<ReplicaHandle> {
        let mut replicas = self.lock();
        let index = replicas.iter().position(|r| r.id == id)?;
        replicas.remove(index)
    }

    /// Copies the current membership so callers can write without holding the lock.
    pub fn snapshot(&self) -> Vec<ReplicaHandle> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ReplicaHandle>> {
        self.replicas
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(registry: &ReplicaRegistry) -> (ReplicaHandle, mpsc::UnboundedReceiver<Bytes>) {
        ReplicaHandle::new(registry.next_id(), "127.0.0.1:6380".parse().unwrap())
    }

    #[test]
    fn get_rotates_through_the_pool() {
        let registry = ReplicaRegistry::new();
        assert_eq!(registry.get().unwrap_err(), RegistryError::Empty);

        let (a, _rx_a) = handle(&registry);
        let (b, _rx_b) = handle(&registry);
        registry.add(a.clone());
        registry.add(b.clone());

        let head = registry.get().unwrap();
        assert_eq!(head.id(), a.id());
        registry.put(head);
        assert_eq!(registry.get().unwrap().id(), b.id());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_drops_only_the_named_connection() {
        let registry = ReplicaRegistry::new();
        let (a, _rx_a) = handle(&registry);
        let (b, _rx_b) = handle(&registry);
        registry.add(a.clone());
        registry.add(b.clone());

        assert!(registry.remove(a.id()).is_some());
        assert!(registry.remove(a.id()).is_none());
        let ids: Vec<u64> = registry.snapshot().iter().map(ReplicaHandle::id).collect();
        assert_eq!(ids, vec![b.id()]);
    }

    #[test]
    fn send_fails_once_the_receiver_is_gone() {
        let registry = ReplicaRegistry::new();
        let (replica, rx) = handle(&registry);
        assert!(replica.send(Bytes::from_static(b"+PING\r\n")));
        drop(rx);
        assert!(!replica.send(Bytes::from_static(b"+PING\r\n")));
    }
}
