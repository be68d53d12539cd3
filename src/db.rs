use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// String keyspace with optional per-key expiry. Expired keys are evicted lazily on read.
#[derive(Default)]
pub struct InMemoryDB {
    map: HashMap<String, Entry>,
}

impl InMemoryDB {
    pub fn new() -> Self {
        Self { map: HashMap::new() }
    }

    pub fn set(&mut self, key: String, value: String) {
        let entry = Entry { value, expires_at: None };
        self.map.insert(key, entry);
    }

    pub fn set_with_expiry(&mut self, key: String, value: String, ttl: Duration) {
        let entry = Entry { value, expires_at: Some(Instant::now() + ttl) };
        self.map.insert(key, entry);
    }

    pub fn get(&mut self, key: &str) -> Option<String> {
        let entry = self.map.get(key)?;
        if entry.is_expired(Instant::now()) {
            self.map.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
