// SPDX-License-Identifier: Apache-2.0

use pacsproxy_model::{MetadataRecord, ResourceKey};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

struct MetadataEntry {
    record: MetadataRecord,
    created_at: Instant,
    last_access: u64,
}

#[derive(Default)]
struct Entries {
    map: HashMap<ResourceKey, MetadataEntry>,
    clock: u64,
}

impl Entries {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// In-memory LRU of query results with a hard TTL from insertion.
pub struct MetadataCache {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<Entries>,
}

impl MetadataCache {
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: Mutex::new(Entries::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn expired(&self, entry: &MetadataEntry, now: Instant) -> bool {
        now.duration_since(entry.created_at) >= self.ttl
    }

    pub fn get(&self, key: &ResourceKey) -> Option<MetadataRecord> {
        let now = Instant::now();
        let mut entries = self.lock();
        let expired = self.expired(entries.map.get(key)?, now);
        if expired {
            entries.map.remove(key);
            return None;
        }
        let tick = entries.tick();
        let entry = entries.map.get_mut(key)?;
        entry.last_access = tick;
        Some(entry.record.clone())
    }

    /// Stores `record`, replacing any previous value and restarting its TTL.
    /// Returns the key evicted to make room, if any.
    pub fn put(&self, key: ResourceKey, record: MetadataRecord) -> Option<ResourceKey> {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.map.retain(|_, v| now.duration_since(v.created_at) < self.ttl);
        let mut evicted = None;
        if !entries.map.contains_key(&key) && entries.map.len() >= self.max_entries {
            if let Some(victim) = entries
                .map
                .iter()
                .min_by_key(|(_, v)| v.last_access)
                .map(|(k, _)| k.clone())
            {
                entries.map.remove(&victim);
                evicted = Some(victim);
            }
        }
        let tick = entries.tick();
        entries.map.insert(
            key,
            MetadataEntry {
                record,
                created_at: now,
                last_access: tick,
            },
        );
        evicted
    }

    pub fn invalidate(&self, key: &ResourceKey) -> bool {
        self.lock().map.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.lock().map.clear();
    }

    /// Number of stored entries, expired ones included until touched.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_entries
    }
}
