//! Pluggable durable backend interface.
//!
//! The state store replicates its hot tier through this narrow key-value +
//! sorted-set surface. [`MemoryBackend`] provides the in-process mode; a
//! remote key-value implementation (redis-shaped) provides durability and
//! lives outside this workspace.

use std::{
    collections::HashSet,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{StoreError, StoreResult};

#[async_trait]
pub trait DurableBackend: Send + Sync {
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;
    async fn delete(&self, key: &str) -> StoreResult<()>;

    async fn set_add(&self, set: &str, member: &str) -> StoreResult<()>;
    async fn set_rem(&self, set: &str, member: &str) -> StoreResult<()>;
    async fn set_members(&self, set: &str) -> StoreResult<Vec<String>>;

    async fn zadd(&self, zset: &str, member: &str, score: f64) -> StoreResult<()>;
    /// Inclusive range by rank; negative indices count from the tail
    /// (`zrange(z, 0, -1)` returns everything, ascending by score).
    async fn zrange(&self, zset: &str, start: isize, stop: isize) -> StoreResult<Vec<String>>;
    async fn zrem(&self, zset: &str, member: &str) -> StoreResult<()>;

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()>;
}

struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn live(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() < at,
            None => true,
        }
    }
}

/// In-process backend used when no remote store is configured.
#[derive(Default)]
pub struct MemoryBackend {
    kv: DashMap<String, StoredValue>,
    sets: DashMap<String, HashSet<String>>,
    zsets: DashMap<String, Mutex<Vec<(f64, String)>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableBackend for MemoryBackend {
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.kv.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self.kv.get(key) {
            Some(stored) if stored.live() => Ok(Some(stored.value.clone())),
            Some(_) => {
                drop(self.kv.remove(key));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.kv.remove(key);
        Ok(())
    }

    async fn set_add(&self, set: &str, member: &str) -> StoreResult<()> {
        self.sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_rem(&self, set: &str, member: &str) -> StoreResult<()> {
        if let Some(mut members) = self.sets.get_mut(set) {
            members.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, set: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .sets
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn zadd(&self, zset: &str, member: &str, score: f64) -> StoreResult<()> {
        let entry = self.zsets.entry(zset.to_string()).or_default();
        let mut scored = entry.lock();
        scored.retain(|(_, m)| m != member);
        scored.push((score, member.to_string()));
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(())
    }

    async fn zrange(&self, zset: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let Some(entry) = self.zsets.get(zset) else {
            return Ok(Vec::new());
        };
        let scored = entry.lock();
        let len = scored.len() as isize;
        if len == 0 {
            return Ok(Vec::new());
        }
        let normalize = |index: isize| -> isize {
            if index < 0 {
                (len + index).max(0)
            } else {
                index.min(len - 1)
            }
        };
        let (start, stop) = (normalize(start), normalize(stop));
        if start > stop {
            return Ok(Vec::new());
        }
        Ok(scored[start as usize..=stop as usize]
            .iter()
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn zrem(&self, zset: &str, member: &str) -> StoreResult<()> {
        if let Some(entry) = self.zsets.get(zset) {
            entry.lock().retain(|(_, m)| m != member);
        }
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let mut stored = self
            .kv
            .get_mut(key)
            .ok_or_else(|| StoreError::Backend(format!("expire on missing key '{key}'")))?;
        stored.expires_at = Some(Instant::now() + ttl);
        Ok(())
    }
}
