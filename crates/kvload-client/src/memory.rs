use async_trait::async_trait;
use kvload_engine::{StoreClient, StoreError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Expired entries are dropped once every this many puts.
const SWEEP_EVERY: u64 = 1024;

/// `None` never expires (TTL too large for `Instant`).
type Expiry = Option<Instant>;

fn live(expiry: &Expiry, now: Instant) -> bool {
    expiry.map_or(true, |at| at > now)
}

/// In-process stand-in for a store cluster. Keys expire after their TTL.
///
/// Lets the whole pipeline run without a cluster (`--store memory`).
/// Reads ignore expired entries, so the sweep only bounds memory.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Expiry>>,
    puts: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys that have not yet expired.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|exp| live(exp, now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn get(&self, keys: &[String]) -> Result<Vec<bool>, StoreError> {
        let now = Instant::now();
        let entries = self.entries.lock();
        Ok(keys
            .iter()
            .map(|k| entries.get(k).is_some_and(|exp| live(exp, now)))
            .collect())
    }

    async fn put(&self, keys: &[String], ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let expires = now.checked_add(ttl);
        let sweep = (self.puts.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0;

        let mut entries = self.entries.lock();
        if sweep {
            entries.retain(|_, exp| live(exp, now));
        }
        for key in keys {
            entries.insert(key.clone(), expires);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.entries.lock().clear();
        Ok(())
    }
}
