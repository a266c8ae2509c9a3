// Copyright 2025 Pulse (https://github.com/pulse-registry)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Process-local TTL cache for response payloads.
//!
//! Values are pre-serialized `serde_json::Value`s so a hit replays exactly
//! what was cached. A background sweeper evicts expired entries at `ttl`
//! cadence; handlers invalidate by key or prefix after mutations. Negative
//! results are never cached.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::debug;

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// TTL map with reader-preferred locking and a background sweeper.
pub struct TtlCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    stop_tx: watch::Sender<bool>,
}

impl TtlCache {
    /// Create the cache and spawn its sweeper. Must be called from within a
    /// tokio runtime; the sweeper stops on [`TtlCache::shutdown`].
    pub fn new(ttl: Duration) -> Arc<Self> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let cache = Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            stop_tx,
        });

        let sweeper = Arc::clone(&cache);
        tokio::spawn(async move {
            sweeper.run_sweeper(stop_rx).await;
        });

        cache
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if Instant::now() >= entry.expires_at {
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.write().insert(key.into(), entry);
    }

    pub fn delete(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Remove every key starting with `prefix`; this is how handler-side
    /// wildcard invalidation (`vp:servers:*`) is implemented.
    pub fn delete_prefix(&self, prefix: &str) {
        self.entries.write().retain(|key, _| !key.starts_with(prefix));
    }

    /// Stop the background sweeper.
    pub fn shutdown(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    async fn run_sweeper(&self, mut stop_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.ttl);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Instant::now();
                    let mut entries = self.entries.write();
                    let before = entries.len();
                    entries.retain(|_, entry| entry.expires_at > now);
                    let evicted = before - entries.len();
                    if evicted > 0 {
                        debug!(evicted, remaining = entries.len(), "cache sweep");
                    }
                }
                _ = stop_rx.changed() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_delete() {
        let cache = TtlCache::new(DEFAULT_TTL);
        assert!(cache.get("vp:stats:foo").is_none());

        cache.set("vp:stats:foo", json!({"install_count": 3}));
        assert_eq!(cache.get("vp:stats:foo").unwrap()["install_count"], 3);

        cache.delete("vp:stats:foo");
        assert!(cache.get("vp:stats:foo").is_none());
        cache.shutdown();
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = TtlCache::new(Duration::from_millis(20));
        cache.set("key", json!(1));
        assert!(cache.get("key").is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("key").is_none());
        cache.shutdown();
    }

    #[tokio::test]
    async fn prefix_invalidation() {
        let cache = TtlCache::new(DEFAULT_TTL);
        cache.set("vp:servers:sort=installs", json!(1));
        cache.set("vp:servers:sort=rating", json!(2));
        cache.set("vp:stats:global", json!(3));

        cache.delete_prefix("vp:servers:");
        assert!(cache.get("vp:servers:sort=installs").is_none());
        assert!(cache.get("vp:servers:sort=rating").is_none());
        assert!(cache.get("vp:stats:global").is_some());
        cache.shutdown();
    }

    #[tokio::test]
    async fn sweeper_evicts_in_background() {
        let cache = TtlCache::new(Duration::from_millis(10));
        cache.set("a", json!(1));
        cache.set("b", json!(2));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.is_empty());
        cache.shutdown();
    }
}
