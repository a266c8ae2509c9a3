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

//! Per-source server statistics store.
//!
//! Counter updates and the running-mean rating update happen inside a
//! per-key critical section (the map's entry lock), so no rating sample is
//! ever lost under concurrent writers.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

use pulse_core::validation::{sanitize_id, validate_limit};
use pulse_core::{
    AggregatedStats, GlobalStats, Result, ServerStats, Source, SourceSelector, StatsUpdate,
    StoreError,
};

/// Minimum rating count before a server qualifies for the rating board.
const RATING_BOARD_MIN_COUNT: u64 = 5;

/// Statistics store contract. Implementations are wired at process init.
#[async_trait]
pub trait StatsStore: Send + Sync {
    /// Stats for one `(server, source)`; zeroed defaults on a miss.
    async fn get(&self, server_id: &str, selector: SourceSelector) -> Result<ServerStats>;

    /// All per-source entries recorded for a server.
    async fn get_by_server(&self, server_id: &str) -> Result<Vec<ServerStats>>;

    /// Stats for many servers at once; missing entries are zero-filled.
    async fn batch_get(
        &self,
        server_ids: &[String],
        selector: SourceSelector,
    ) -> Result<HashMap<String, ServerStats>>;

    /// Cross-source aggregate with a count-weighted mean rating.
    async fn get_aggregated(&self, server_id: &str) -> Result<AggregatedStats>;

    /// Replace or create a full record.
    async fn upsert(&self, stats: ServerStats) -> Result<()>;

    /// `install_count += 1` with `first_seen` stamped on insert.
    async fn increment_install(&self, server_id: &str, source: Source) -> Result<()>;

    /// Fold one rating sample into the running mean.
    async fn update_rating(&self, server_id: &str, source: Source, rating: f64) -> Result<()>;

    async fn top_by_installs(
        &self,
        limit: usize,
        selector: SourceSelector,
    ) -> Result<Vec<ServerStats>>;

    /// Highest rated servers with at least five ratings.
    async fn top_by_rating(
        &self,
        limit: usize,
        selector: SourceSelector,
    ) -> Result<Vec<ServerStats>>;

    /// Most recently first-seen servers.
    async fn get_recent(&self, limit: usize, selector: SourceSelector)
        -> Result<Vec<ServerStats>>;

    /// Registry-wide aggregate, optionally source-scoped.
    async fn global(&self, selector: SourceSelector) -> Result<GlobalStats>;

    /// Full dump, used by the sync pipeline and quality metrics.
    async fn all(&self) -> Result<Vec<ServerStats>>;

    /// Bulk upsert of analytics-derived fields.
    async fn sync_analytics(&self, updates: Vec<StatsUpdate>) -> Result<()>;

    /// Merge one statistical identity into another for a claim. The source
    /// record is annotated, never deleted; a repeated transfer to the same
    /// target leaves the target unchanged.
    async fn transfer(
        &self,
        from_id: &str,
        to_id: &str,
        from_source: Source,
        to_source: Source,
    ) -> Result<()>;

    /// One-shot migration assigning `REGISTRY` to records without a source.
    /// Returns the number of migrated records.
    async fn migrate_legacy(&self) -> Result<u64>;
}

/// In-memory stats store keyed by `(server_id, source)`.
pub struct MemoryStatsStore {
    entries: DashMap<(String, Source), ServerStats>,
}

impl MemoryStatsStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
        })
    }

    fn collect_filtered(&self, selector: SourceSelector) -> Vec<ServerStats> {
        self.entries
            .iter()
            .filter(|entry| selector.matches(entry.key().1))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl Default for MemoryStatsStore {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

#[async_trait]
impl StatsStore for MemoryStatsStore {
    async fn get(&self, server_id: &str, selector: SourceSelector) -> Result<ServerStats> {
        let server_id = sanitize_id(server_id)?;
        let source = selector.or_registry();
        Ok(self
            .entries
            .get(&(server_id.clone(), source))
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| ServerStats::empty(server_id, source)))
    }

    async fn get_by_server(&self, server_id: &str) -> Result<Vec<ServerStats>> {
        let server_id = sanitize_id(server_id)?;
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.key().0 == server_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn batch_get(
        &self,
        server_ids: &[String],
        selector: SourceSelector,
    ) -> Result<HashMap<String, ServerStats>> {
        let source = selector.or_registry();
        let mut result = HashMap::with_capacity(server_ids.len());
        for raw in server_ids {
            let server_id = sanitize_id(raw)?;
            let stats = self
                .entries
                .get(&(server_id.clone(), source))
                .map(|entry| entry.value().clone())
                .unwrap_or_else(|| ServerStats::empty(server_id.clone(), source));
            result.insert(server_id, stats);
        }
        Ok(result)
    }

    async fn get_aggregated(&self, server_id: &str) -> Result<AggregatedStats> {
        let server_id = sanitize_id(server_id)?;
        let all = self.get_by_server(&server_id).await?;

        let mut aggregated = AggregatedStats {
            server_id,
            total_installs: 0,
            average_rating: 0.0,
            total_rating_count: 0,
            source_breakdown: HashMap::new(),
            last_updated: Utc::now(),
        };

        let mut weighted_rating = 0.0;
        for stats in all {
            aggregated.total_installs += stats.install_count;
            aggregated.total_rating_count += stats.rating_count;
            weighted_rating += stats.rating * stats.rating_count as f64;
            aggregated.source_breakdown.insert(stats.source, stats);
        }

        if aggregated.total_rating_count > 0 {
            aggregated.average_rating = weighted_rating / aggregated.total_rating_count as f64;
        }

        Ok(aggregated)
    }

    async fn upsert(&self, mut stats: ServerStats) -> Result<()> {
        stats.server_id = sanitize_id(&stats.server_id)?;
        stats.last_updated = Utc::now();
        self.entries
            .insert((stats.server_id.clone(), stats.source), stats);
        Ok(())
    }

    async fn increment_install(&self, server_id: &str, source: Source) -> Result<()> {
        let server_id = sanitize_id(server_id)?;
        let now = Utc::now();
        let mut entry = self
            .entries
            .entry((server_id.clone(), source))
            .or_insert_with(|| ServerStats::empty(server_id, source));
        entry.install_count += 1;
        entry.last_updated = now;
        Ok(())
    }

    async fn update_rating(&self, server_id: &str, source: Source, rating: f64) -> Result<()> {
        let server_id = sanitize_id(server_id)?;
        let now = Utc::now();
        // The entry guard is the per-key critical section: read-compute-write
        // of the running mean happens atomically with respect to other keys'
        // writers on this record.
        let mut entry = self
            .entries
            .entry((server_id.clone(), source))
            .or_insert_with(|| ServerStats::empty(server_id, source));
        entry.apply_rating(rating, now);
        Ok(())
    }

    async fn top_by_installs(
        &self,
        limit: usize,
        selector: SourceSelector,
    ) -> Result<Vec<ServerStats>> {
        let limit = validate_limit(limit)?;
        let mut stats = self.collect_filtered(selector);
        stats.sort_by(|a, b| b.install_count.cmp(&a.install_count));
        stats.truncate(limit);
        Ok(stats)
    }

    async fn top_by_rating(
        &self,
        limit: usize,
        selector: SourceSelector,
    ) -> Result<Vec<ServerStats>> {
        let limit = validate_limit(limit)?;
        let mut stats: Vec<ServerStats> = self
            .collect_filtered(selector)
            .into_iter()
            .filter(|s| s.rating_count >= RATING_BOARD_MIN_COUNT)
            .collect();
        stats.sort_by(|a, b| {
            b.rating
                .total_cmp(&a.rating)
                .then(b.install_count.cmp(&a.install_count))
        });
        stats.truncate(limit);
        Ok(stats)
    }

    async fn get_recent(
        &self,
        limit: usize,
        selector: SourceSelector,
    ) -> Result<Vec<ServerStats>> {
        let limit = validate_limit(limit)?;
        let mut stats = self.collect_filtered(selector);
        stats.sort_by(|a, b| b.first_seen.cmp(&a.first_seen));
        stats.truncate(limit);
        Ok(stats)
    }

    async fn global(&self, selector: SourceSelector) -> Result<GlobalStats> {
        let stats = self.collect_filtered(selector);

        let mut total_installs = 0u64;
        let mut active_servers = 0u64;
        let mut total_rating = 0.0;
        let mut total_ratings = 0u64;
        for s in &stats {
            total_installs += s.install_count;
            if s.active_installs.unwrap_or(0) > 0 {
                active_servers += 1;
            }
            total_rating += s.rating * s.rating_count as f64;
            total_ratings += s.rating_count;
        }

        let average_rating = if total_ratings > 0 {
            total_rating / total_ratings as f64
        } else {
            0.0
        };

        Ok(GlobalStats {
            total_servers: stats.len() as u64,
            total_installs,
            active_servers,
            average_rating,
            last_updated: Utc::now(),
        })
    }

    async fn all(&self) -> Result<Vec<ServerStats>> {
        Ok(self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn sync_analytics(&self, updates: Vec<StatsUpdate>) -> Result<()> {
        let now = Utc::now();
        for update in updates {
            let server_id = sanitize_id(&update.server_id)?;
            let mut entry = self
                .entries
                .entry((server_id.clone(), Source::Registry))
                .or_insert_with(|| ServerStats::empty(server_id, Source::Registry));
            if update.active_installs.is_some() {
                entry.active_installs = update.active_installs;
            }
            if update.daily_active_users.is_some() {
                entry.daily_active_users = update.daily_active_users;
            }
            if update.monthly_active_users.is_some() {
                entry.monthly_active_users = update.monthly_active_users;
            }
            entry.last_updated = now;
        }
        Ok(())
    }

    async fn transfer(
        &self,
        from_id: &str,
        to_id: &str,
        from_source: Source,
        to_source: Source,
    ) -> Result<()> {
        let from_id = sanitize_id(from_id)?;
        let to_id = sanitize_id(to_id)?;
        if from_id == to_id && from_source == to_source {
            return Err(StoreError::Conflict(
                "cannot transfer stats onto themselves".into(),
            ));
        }
        let now = Utc::now();

        // Nothing to transfer when the source side has no record.
        let source_stats = match self.entries.get(&(from_id.clone(), from_source)) {
            Some(entry) => entry.value().clone(),
            None => return Ok(()),
        };

        // A completed transfer is detected by the audit stamp; re-running
        // must leave the target unchanged.
        if source_stats.claimed_to.as_deref() == Some(to_id.as_str()) {
            if let Some(mut source_entry) = self.entries.get_mut(&(from_id, from_source)) {
                source_entry.claimed_at = Some(now);
            }
            return Ok(());
        }

        let target_key = (to_id.clone(), to_source);
        let merged = match self.entries.get(&target_key).map(|e| e.value().clone()) {
            Some(target) => {
                let rating_count = target.rating_count + source_stats.rating_count;
                let rating = if rating_count > 0 {
                    (target.rating * target.rating_count as f64
                        + source_stats.rating * source_stats.rating_count as f64)
                        / rating_count as f64
                } else {
                    0.0
                };
                ServerStats {
                    server_id: to_id.clone(),
                    source: to_source,
                    install_count: target.install_count + source_stats.install_count,
                    rating,
                    rating_count,
                    first_seen: target.first_seen.min(source_stats.first_seen),
                    last_updated: now,
                    // Analytics-derived fields stay with the target.
                    active_installs: target.active_installs,
                    daily_active_users: target.daily_active_users,
                    monthly_active_users: target.monthly_active_users,
                    claimed_from: Some(from_source),
                    claimed_at: Some(now),
                    claimed_to: None,
                }
            }
            None => ServerStats {
                server_id: to_id.clone(),
                source: to_source,
                last_updated: now,
                claimed_from: Some(from_source),
                claimed_at: Some(now),
                claimed_to: None,
                ..source_stats.clone()
            },
        };
        self.entries.insert(target_key, merged);

        // Audit trail on the source side; the record is kept.
        if let Some(mut source_entry) = self.entries.get_mut(&(from_id, from_source)) {
            source_entry.claimed_at = Some(now);
            source_entry.claimed_to = Some(to_id);
        }

        Ok(())
    }

    async fn migrate_legacy(&self) -> Result<u64> {
        // The typed in-memory store cannot hold records without a source;
        // there is nothing to migrate. Document backends rewrite sourceless
        // rows to REGISTRY here.
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<MemoryStatsStore> {
        MemoryStatsStore::new()
    }

    #[tokio::test]
    async fn get_returns_zeroed_default_on_miss() {
        let store = store();
        let stats = store.get("unknown", SourceSelector::Default).await.unwrap();
        assert_eq!(stats.install_count, 0);
        assert_eq!(stats.rating_count, 0);
        assert_eq!(stats.source, Source::Registry);
    }

    #[tokio::test]
    async fn install_counter_and_first_seen() {
        let store = store();
        store
            .increment_install("postgres-tools", Source::Registry)
            .await
            .unwrap();
        store
            .increment_install("postgres-tools", Source::Registry)
            .await
            .unwrap();

        let stats = store
            .get("postgres-tools", SourceSelector::Default)
            .await
            .unwrap();
        assert_eq!(stats.install_count, 2);
        assert!(stats.last_updated >= stats.first_seen);
    }

    #[tokio::test]
    async fn rating_mean_matches_samples() {
        let store = store();
        for r in [5.0, 3.0, 4.0] {
            store.update_rating("foo", Source::Registry, r).await.unwrap();
        }
        let stats = store.get("foo", SourceSelector::Default).await.unwrap();
        assert_eq!(stats.rating_count, 3);
        assert!((stats.rating - 4.0).abs() < 1e-6);
        assert!(stats.rating >= 0.0 && stats.rating <= 5.0);
    }

    #[tokio::test]
    async fn no_rating_is_lost_under_concurrency() {
        let store = store();
        let mut handles = Vec::new();
        for i in 0..50u32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let rating = 1.0 + f64::from(i % 5);
                store.update_rating("busy", Source::Registry, rating).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stats = store.get("busy", SourceSelector::Default).await.unwrap();
        assert_eq!(stats.rating_count, 50);
        assert!(stats.rating >= 1.0 && stats.rating <= 5.0);
    }

    #[tokio::test]
    async fn aggregated_sums_sources() {
        let store = store();
        store.increment_install("srv", Source::Registry).await.unwrap();
        store.increment_install("srv", Source::Community).await.unwrap();
        store.increment_install("srv", Source::Community).await.unwrap();
        store.update_rating("srv", Source::Registry, 5.0).await.unwrap();
        store.update_rating("srv", Source::Community, 3.0).await.unwrap();

        let agg = store.get_aggregated("srv").await.unwrap();
        assert_eq!(agg.total_installs, 3);
        assert_eq!(agg.total_rating_count, 2);
        assert!((agg.average_rating - 4.0).abs() < 1e-6);
        assert_eq!(agg.source_breakdown.len(), 2);

        // Aggregate equals the sum of the per-source breakdown.
        let breakdown_total: u64 = agg
            .source_breakdown
            .values()
            .map(|s| s.install_count)
            .sum();
        assert_eq!(agg.total_installs, breakdown_total);
    }

    #[tokio::test]
    async fn batch_get_zero_fills_missing() {
        let store = store();
        store.increment_install("present", Source::Registry).await.unwrap();

        let ids = vec!["present".to_string(), "absent".to_string()];
        let map = store.batch_get(&ids, SourceSelector::Default).await.unwrap();
        assert_eq!(map["present"].install_count, 1);
        assert_eq!(map["absent"].install_count, 0);
    }

    #[tokio::test]
    async fn rating_board_requires_five_ratings() {
        let store = store();
        for _ in 0..5 {
            store.update_rating("qualified", Source::Registry, 5.0).await.unwrap();
        }
        store.update_rating("unqualified", Source::Registry, 5.0).await.unwrap();

        let board = store
            .top_by_rating(10, SourceSelector::Default)
            .await
            .unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].server_id, "qualified");
    }

    #[tokio::test]
    async fn recent_sorts_by_first_seen_desc() {
        let store = store();
        store.increment_install("older", Source::Registry).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.increment_install("newer", Source::Registry).await.unwrap();

        let recent = store.get_recent(10, SourceSelector::All).await.unwrap();
        assert_eq!(recent[0].server_id, "newer");
        assert_eq!(recent[1].server_id, "older");
    }

    #[tokio::test]
    async fn global_stats_weighted_average() {
        let store = store();
        store.update_rating("a", Source::Registry, 5.0).await.unwrap();
        store.update_rating("b", Source::Registry, 1.0).await.unwrap();
        store.update_rating("b", Source::Registry, 1.0).await.unwrap();

        let global = store.global(SourceSelector::Default).await.unwrap();
        assert_eq!(global.total_servers, 2);
        // (5 + 1 + 1) / 3
        assert!((global.average_rating - 7.0 / 3.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn sync_analytics_sets_activity_fields() {
        let store = store();
        store
            .sync_analytics(vec![StatsUpdate {
                server_id: "srv".into(),
                active_installs: Some(12),
                daily_active_users: Some(3),
                monthly_active_users: Some(90),
            }])
            .await
            .unwrap();

        let stats = store.get("srv", SourceSelector::Default).await.unwrap();
        assert_eq!(stats.active_installs, Some(12));

        let global = store.global(SourceSelector::Default).await.unwrap();
        assert_eq!(global.active_servers, 1);
    }

    #[tokio::test]
    async fn transfer_merges_and_keeps_audit_trail() {
        let store = store();
        for _ in 0..100 {
            store.increment_install("x", Source::Community).await.unwrap();
        }
        for _ in 0..10 {
            store.update_rating("x", Source::Community, 4.0).await.unwrap();
        }

        store
            .transfer("x", "x", Source::Community, Source::Registry)
            .await
            .unwrap();

        let target = store.get("x", SourceSelector::One(Source::Registry)).await.unwrap();
        assert_eq!(target.install_count, 100);
        assert_eq!(target.rating_count, 10);
        assert!((target.rating - 4.0).abs() < 1e-6);
        assert_eq!(target.claimed_from, Some(Source::Community));
        assert!(target.claimed_at.is_some());

        let source = store
            .get("x", SourceSelector::One(Source::Community))
            .await
            .unwrap();
        assert_eq!(source.claimed_to.as_deref(), Some("x"));
        assert_eq!(source.install_count, 100);
    }

    #[tokio::test]
    async fn transfer_is_idempotent() {
        let store = store();
        for _ in 0..100 {
            store.increment_install("x", Source::Community).await.unwrap();
        }
        store
            .transfer("x", "x", Source::Community, Source::Registry)
            .await
            .unwrap();
        store
            .transfer("x", "x", Source::Community, Source::Registry)
            .await
            .unwrap();

        let target = store.get("x", SourceSelector::One(Source::Registry)).await.unwrap();
        assert_eq!(target.install_count, 100);
    }

    #[tokio::test]
    async fn transfer_merges_into_existing_target() {
        let store = store();
        for _ in 0..30 {
            store.increment_install("x", Source::Community).await.unwrap();
        }
        for _ in 0..20 {
            store.increment_install("x", Source::Registry).await.unwrap();
        }
        store.update_rating("x", Source::Community, 2.0).await.unwrap();
        store.update_rating("x", Source::Registry, 4.0).await.unwrap();

        store
            .transfer("x", "x", Source::Community, Source::Registry)
            .await
            .unwrap();

        let target = store.get("x", SourceSelector::One(Source::Registry)).await.unwrap();
        assert_eq!(target.install_count, 50);
        assert_eq!(target.rating_count, 2);
        assert!((target.rating - 3.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn transfer_with_no_source_is_a_noop() {
        let store = store();
        store
            .transfer("ghost", "ghost", Source::Community, Source::Registry)
            .await
            .unwrap();
        let target = store.get("ghost", SourceSelector::Default).await.unwrap();
        assert_eq!(target.install_count, 0);
    }

    #[tokio::test]
    async fn invalid_ids_are_rejected() {
        let store = store();
        assert!(store.get("-bad", SourceSelector::Default).await.is_err());
        assert!(store
            .increment_install("two words", Source::Registry)
            .await
            .is_err());
    }
}
