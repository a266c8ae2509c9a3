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

//! Analytics aggregation engine: event ingestion, API/search tracking,
//! dashboards, trending, growth, milestones, and time series.
//!
//! Search tracking emits an activity event so the growth pipeline has a
//! single source of truth; quality metrics are computed from the stats
//! store rather than hardcoded.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Months, Timelike, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use pulse_core::validation::validate_limit;
use pulse_core::{
    activity, ActivityEvent, AnalyticsMetrics, ApiCallMetrics, DataPoint, GrowthMetric,
    GrowthMetrics, MilestoneEvent, Period, Result, SearchAnalytics, SourceSelector,
    TimeSeriesPoint, TrendingServer,
};

use crate::health::HealthMonitor;
use crate::stats_store::StatsStore;

/// Total-install thresholds recorded as milestones, at most once each.
const INSTALL_MILESTONES: [i64; 7] = [100, 500, 1000, 5000, 10_000, 50_000, 100_000];

/// Servers at or above this mean with a qualifying count are "five star".
const FIVE_STAR_THRESHOLD: f64 = 4.8;

/// Minimum mean rating for the trending all-time pad.
const TRENDING_PAD_MIN_RATING: f64 = 4.0;

/// Analytics store contract.
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// Insert an activity event (id and timestamp are server-assigned) and
    /// bump the global counters its type maps to.
    async fn record_activity(&self, event: ActivityEvent) -> Result<ActivityEvent>;

    /// Most recent activity, newest first, optionally filtered by type.
    async fn recent_activity(&self, limit: usize, kind: &str) -> Result<Vec<ActivityEvent>>;

    async fn track_api_call(
        &self,
        endpoint: &str,
        method: &str,
        duration_ms: f64,
        is_error: bool,
    ) -> Result<()>;

    /// Per-endpoint metrics sorted by call count.
    async fn api_metrics(&self, limit: usize) -> Result<Vec<ApiCallMetrics>>;

    async fn track_search(&self, term: &str, results_count: u64) -> Result<()>;

    async fn track_search_conversion(&self, term: &str, server_id: &str) -> Result<()>;

    async fn top_searches(&self, limit: usize) -> Result<Vec<SearchAnalytics>>;

    async fn record_time_series(&self, point: TimeSeriesPoint) -> Result<()>;

    /// Points in `[start, end]`, aggregated into `interval` buckets
    /// (`hour`, `day`, or `week`; anything else returns raw points).
    async fn time_series(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: &str,
    ) -> Result<Vec<TimeSeriesPoint>>;

    /// Period-bucketed snapshot of registry-wide analytics.
    async fn dashboard(&self, period: Period) -> Result<AnalyticsMetrics>;

    /// Trending servers over the last 48 h window, padded from top-rated
    /// when fewer than `limit` servers saw install activity.
    async fn calculate_trending(
        &self,
        limit: usize,
        selector: SourceSelector,
    ) -> Result<Vec<TrendingServer>>;

    /// Growth of one metric across two adjacent windows, with momentum.
    async fn growth(&self, metric: GrowthMetric, period: Period) -> Result<GrowthMetrics>;

    /// Record any newly crossed install milestones, at most once each.
    async fn check_and_record_milestones(&self) -> Result<()>;

    async fn recent_milestones(&self, limit: usize) -> Result<Vec<MilestoneEvent>>;
}

#[derive(Debug, Default)]
struct GlobalCounters {
    total_installs: i64,
    total_api_calls: i64,
    total_ratings: i64,
    total_searches: i64,
    error_count: i64,
}

/// In-memory analytics store.
///
/// Holds the stats store for the trending pad and quality metrics, and the
/// health monitor for percentiles and uptime.
pub struct MemoryAnalyticsStore {
    stats: Arc<dyn StatsStore>,
    health: Arc<HealthMonitor>,
    activity: RwLock<Vec<ActivityEvent>>,
    api_calls: DashMap<(String, String), ApiCallMetrics>,
    searches: DashMap<String, SearchAnalytics>,
    time_series: RwLock<Vec<TimeSeriesPoint>>,
    milestones: Mutex<Vec<MilestoneEvent>>,
    counters: Mutex<GlobalCounters>,
}

impl MemoryAnalyticsStore {
    pub fn new(stats: Arc<dyn StatsStore>, health: Arc<HealthMonitor>) -> Arc<Self> {
        Arc::new(Self {
            stats,
            health,
            activity: RwLock::new(Vec::new()),
            api_calls: DashMap::new(),
            searches: DashMap::new(),
            time_series: RwLock::new(Vec::new()),
            milestones: Mutex::new(Vec::new()),
            counters: Mutex::new(GlobalCounters::default()),
        })
    }

    fn count_events(&self, kind: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
        self.activity
            .read()
            .iter()
            .filter(|e| e.kind == kind && e.timestamp >= start && e.timestamp < end)
            .count() as i64
    }

    fn distinct_users(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
        let activity = self.activity.read();
        let users: HashSet<&str> = activity
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp < end)
            .filter_map(|e| e.user_id.as_deref())
            .filter(|u| !u.is_empty())
            .collect();
        users.len() as i64
    }

    fn api_call_volume(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
        // Approximate: attributes an endpoint's whole count to the window
        // its last call fell into.
        self.api_calls
            .iter()
            .filter(|e| e.value().last_called >= start && e.value().last_called < end)
            .map(|e| e.value().count as i64)
            .sum()
    }

    fn search_volume(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
        self.searches
            .iter()
            .filter(|e| e.value().last_searched >= start && e.value().last_searched < end)
            .count() as i64
    }

    fn metric_value(&self, metric: GrowthMetric, start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
        match metric {
            GrowthMetric::Installs => self.count_events(activity::INSTALL, start, end) as f64,
            GrowthMetric::Ratings => self.count_events(activity::RATING, start, end) as f64,
            GrowthMetric::Servers => self.count_events(activity::SERVER_ADDED, start, end) as f64,
            GrowthMetric::Users => self.distinct_users(start, end) as f64,
            GrowthMetric::ApiCalls => self.api_call_volume(start, end) as f64,
            GrowthMetric::Searches => self.search_volume(start, end) as f64,
        }
    }

    fn growth_data_points(
        &self,
        metric: GrowthMetric,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: Period,
    ) -> Vec<DataPoint> {
        let step = match period {
            Period::Day => ChronoDuration::hours(1),
            Period::Week | Period::Month => ChronoDuration::days(1),
            Period::Year => ChronoDuration::days(30),
        };

        let mut points = Vec::new();
        let mut cursor = start;
        while cursor < end {
            let next = (cursor + step).min(end);
            points.push(DataPoint {
                timestamp: cursor,
                value: self.metric_value(metric, cursor, next),
            });
            cursor = next;
        }
        points
    }

    /// Whether an install event passes a source filter; events that carry no
    /// source metadata are never excluded.
    fn event_matches_source(event: &ActivityEvent, selector: SourceSelector) -> bool {
        let SourceSelector::One(wanted) = selector else {
            return true;
        };
        match event.metadata.get("source").and_then(|v| v.as_str()) {
            Some(source) => source == wanted.as_str(),
            None => true,
        }
    }
}

fn period_start(period: Period, now: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight")
        .and_utc();
    match period {
        Period::Day => midnight,
        Period::Week => midnight - ChronoDuration::days(now.weekday().num_days_from_sunday() as i64),
        Period::Month => midnight - ChronoDuration::days(now.day0() as i64),
        Period::Year => midnight - ChronoDuration::days(now.ordinal0() as i64),
    }
}

fn previous_start(period: Period, current_start: DateTime<Utc>) -> DateTime<Utc> {
    match period {
        Period::Day => current_start - ChronoDuration::days(1),
        Period::Week => current_start - ChronoDuration::days(7),
        Period::Month => current_start - Months::new(1),
        Period::Year => current_start - Months::new(12),
    }
}

#[async_trait]
impl AnalyticsStore for MemoryAnalyticsStore {
    async fn record_activity(&self, mut event: ActivityEvent) -> Result<ActivityEvent> {
        event.id = uuid::Uuid::new_v4().to_string();

        {
            // Timestamp is assigned under the append lock so stored events
            // are monotonically non-decreasing in time.
            let mut activity_log = self.activity.write();
            event.timestamp = Utc::now();
            activity_log.push(event.clone());
        }

        let mut counters = self.counters.lock();
        match event.kind.as_str() {
            activity::INSTALL => counters.total_installs += 1,
            activity::RATING => counters.total_ratings += 1,
            activity::SEARCH => counters.total_searches += 1,
            _ => {}
        }

        Ok(event)
    }

    async fn recent_activity(&self, limit: usize, kind: &str) -> Result<Vec<ActivityEvent>> {
        let limit = validate_limit(limit)?;
        Ok(self
            .activity
            .read()
            .iter()
            .rev()
            .filter(|e| kind.is_empty() || e.kind == kind)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn track_api_call(
        &self,
        endpoint: &str,
        method: &str,
        duration_ms: f64,
        is_error: bool,
    ) -> Result<()> {
        let now = Utc::now();
        let mut entry = self
            .api_calls
            .entry((endpoint.to_string(), method.to_string()))
            .or_insert_with(|| ApiCallMetrics {
                endpoint: endpoint.to_string(),
                method: method.to_string(),
                count: 0,
                avg_duration_ms: 0.0,
                error_count: 0,
                last_called: now,
            });
        entry.avg_duration_ms = (entry.avg_duration_ms * entry.count as f64 + duration_ms)
            / (entry.count + 1) as f64;
        entry.count += 1;
        if is_error {
            entry.error_count += 1;
        }
        entry.last_called = now;
        drop(entry);

        let mut counters = self.counters.lock();
        counters.total_api_calls += 1;
        if is_error {
            counters.error_count += 1;
        }
        Ok(())
    }

    async fn api_metrics(&self, limit: usize) -> Result<Vec<ApiCallMetrics>> {
        let limit = validate_limit(limit)?;
        let mut metrics: Vec<ApiCallMetrics> = self
            .api_calls
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        metrics.sort_by(|a, b| b.count.cmp(&a.count));
        metrics.truncate(limit);
        Ok(metrics)
    }

    async fn track_search(&self, term: &str, results_count: u64) -> Result<()> {
        let now = Utc::now();
        {
            let mut entry = self
                .searches
                .entry(term.to_string())
                .or_insert_with(|| SearchAnalytics {
                    search_term: term.to_string(),
                    count: 0,
                    results_found: 0,
                    installs_from_search: 0,
                    success_rate: 0.0,
                    last_searched: now,
                });
            entry.count += 1;
            entry.results_found += results_count;
            entry.success_rate = entry.installs_from_search as f64 / entry.count as f64 * 100.0;
            entry.last_searched = now;
        }

        // Search growth is derived from activity events, not from a
        // separate table: keep the single source of truth.
        let mut event = ActivityEvent::new(activity::SEARCH);
        event.value = Some(serde_json::Value::String(term.to_string()));
        event
            .metadata
            .insert("results_count".into(), serde_json::json!(results_count));
        self.record_activity(event).await?;
        Ok(())
    }

    async fn track_search_conversion(&self, term: &str, _server_id: &str) -> Result<()> {
        if let Some(mut entry) = self.searches.get_mut(term) {
            entry.installs_from_search += 1;
            entry.success_rate = entry.installs_from_search as f64 / entry.count as f64 * 100.0;
        }
        Ok(())
    }

    async fn top_searches(&self, limit: usize) -> Result<Vec<SearchAnalytics>> {
        let limit = validate_limit(limit)?;
        let mut searches: Vec<SearchAnalytics> = self
            .searches
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        searches.sort_by(|a, b| b.count.cmp(&a.count));
        searches.truncate(limit);
        Ok(searches)
    }

    async fn record_time_series(&self, mut point: TimeSeriesPoint) -> Result<()> {
        let mut series = self.time_series.write();
        point.timestamp = Utc::now();
        series.push(point);
        Ok(())
    }

    async fn time_series(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: &str,
    ) -> Result<Vec<TimeSeriesPoint>> {
        let mut points: Vec<TimeSeriesPoint> = self
            .time_series
            .read()
            .iter()
            .filter(|p| p.timestamp >= start && p.timestamp <= end)
            .cloned()
            .collect();
        points.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        let truncate = |ts: DateTime<Utc>| -> Option<DateTime<Utc>> {
            let midnight = ts.date_naive().and_hms_opt(0, 0, 0)?.and_utc();
            match interval {
                "hour" => ts.with_minute(0)?.with_second(0)?.with_nanosecond(0),
                "day" => Some(midnight),
                "week" => {
                    Some(midnight - ChronoDuration::days(ts.weekday().num_days_from_sunday() as i64))
                }
                _ => None,
            }
        };

        if truncate(start).is_none() {
            return Ok(points);
        }

        let mut buckets: BTreeMap<DateTime<Utc>, TimeSeriesPoint> = BTreeMap::new();
        for point in points {
            let Some(bucket_ts) = truncate(point.timestamp) else {
                continue;
            };
            let bucket = buckets
                .entry(bucket_ts)
                .or_insert_with(|| TimeSeriesPoint::at(bucket_ts));
            bucket.installs += point.installs;
            bucket.api_calls += point.api_calls;
            bucket.active_users += point.active_users;
            bucket.new_servers += point.new_servers;
            bucket.ratings += point.ratings;
        }

        Ok(buckets.into_values().collect())
    }

    async fn dashboard(&self, period: Period) -> Result<AnalyticsMetrics> {
        let now = Utc::now();
        let mut metrics = AnalyticsMetrics::default();

        {
            let counters = self.counters.lock();
            metrics.total_installs = counters.total_installs;
            metrics.total_api_calls = counters.total_api_calls;
            metrics.total_ratings = counters.total_ratings;
            metrics.total_searches = counters.total_searches;
            if counters.total_api_calls > 0 {
                metrics.error_rate =
                    counters.error_count as f64 / counters.total_api_calls as f64 * 100.0;
            }
        }

        let today = period_start(Period::Day, now);
        let week = period_start(Period::Week, now);
        let month = period_start(Period::Month, now);
        metrics.installs_today = self.count_events(activity::INSTALL, today, now);
        metrics.installs_this_week = self.count_events(activity::INSTALL, week, now);
        metrics.installs_this_month = self.count_events(activity::INSTALL, month, now);

        let day_ago = now - ChronoDuration::hours(24);
        metrics.install_velocity = self.count_events(activity::INSTALL, day_ago, now) as f64 / 24.0;

        let last_week = self.count_events(
            activity::INSTALL,
            week - ChronoDuration::days(7),
            week,
        );
        if last_week > 0 {
            metrics.weekly_growth = (metrics.installs_this_week - last_week) as f64
                / last_week as f64
                * 100.0;
        }
        let last_month_start = previous_start(Period::Month, month);
        let last_month = self.count_events(activity::INSTALL, last_month_start, month);
        if last_month > 0 {
            metrics.monthly_growth = (metrics.installs_this_month - last_month) as f64
                / last_month as f64
                * 100.0;
        }

        let period_window = period_start(period, now);
        metrics.active_users = self.distinct_users(period_window, now);
        metrics.new_servers = self.count_events(activity::SERVER_ADDED, period_window, now);

        // Per-source install split, from event metadata.
        {
            let activity_log = self.activity.read();
            for event in activity_log.iter().filter(|e| e.kind == activity::INSTALL) {
                match event.metadata.get("source").and_then(|v| v.as_str()) {
                    Some("COMMUNITY") => metrics.community_installs += 1,
                    _ => metrics.registry_installs += 1,
                }
            }
        }

        // Health: percentiles and uptime over the trailing 24 hours.
        let (p50, p90, p99) = self.health.percentiles("", Duration::from_secs(24 * 3600));
        metrics.response_time_p50 = p50;
        metrics.response_time_p90 = p90;
        metrics.response_time_p99 = p99;
        metrics.uptime_percentage = self.health.uptime();

        // Quality, computed from the stats store.
        let global = self.stats.global(SourceSelector::All).await?;
        metrics.average_rating = global.average_rating;
        let all_stats = self.stats.all().await?;
        metrics.total_ratings = all_stats.iter().map(|s| s.rating_count as i64).sum();
        metrics.five_star_servers = all_stats
            .iter()
            .filter(|s| s.rating >= FIVE_STAR_THRESHOLD && s.rating_count >= 5)
            .count() as i64;
        metrics.active_installs = all_stats
            .iter()
            .map(|s| s.active_installs.unwrap_or(0) as i64)
            .sum();
        metrics.updated_servers = all_stats
            .iter()
            .filter(|s| s.last_updated >= period_window)
            .count() as i64;
        metrics.total_feedback = metrics.total_ratings;

        // Overall search conversion.
        let (search_count, conversions) = self
            .searches
            .iter()
            .fold((0u64, 0u64), |(count, conv), entry| {
                (count + entry.value().count, conv + entry.value().installs_from_search)
            });
        if search_count > 0 {
            metrics.search_success_rate = conversions as f64 / search_count as f64 * 100.0;
        }

        metrics.last_updated = now;
        Ok(metrics)
    }

    async fn calculate_trending(
        &self,
        limit: usize,
        selector: SourceSelector,
    ) -> Result<Vec<TrendingServer>> {
        let limit = validate_limit(limit)?;
        let now = Utc::now();
        let day_ago = now - ChronoDuration::hours(24);
        let two_days_ago = now - ChronoDuration::hours(48);

        struct Bucket {
            recent: i64,
            previous: i64,
            server_name: String,
        }

        let mut buckets: HashMap<String, Bucket> = HashMap::new();
        {
            let activity_log = self.activity.read();
            for event in activity_log.iter().filter(|e| {
                e.kind == activity::INSTALL
                    && e.timestamp >= two_days_ago
                    && e.server_id.as_deref().is_some_and(|id| !id.is_empty())
                    && Self::event_matches_source(e, selector)
            }) {
                let id = event.server_id.clone().unwrap_or_default();
                let bucket = buckets.entry(id).or_insert_with(|| Bucket {
                    recent: 0,
                    previous: 0,
                    server_name: event.server_name.clone().unwrap_or_default(),
                });
                if event.timestamp >= day_ago {
                    bucket.recent += 1;
                } else {
                    bucket.previous += 1;
                }
                if bucket.server_name.is_empty() {
                    if let Some(name) = &event.server_name {
                        bucket.server_name = name.clone();
                    }
                }
            }
        }

        let mut trending: Vec<TrendingServer> = buckets
            .into_iter()
            .map(|(server_id, bucket)| {
                let velocity = bucket.recent as f64 / 24.0;
                let momentum = if bucket.previous == 0 {
                    100.0
                } else {
                    (bucket.recent - bucket.previous) as f64 / bucket.previous as f64 * 100.0
                };
                TrendingServer {
                    server_id,
                    server_name: bucket.server_name,
                    trending_score: velocity + 0.1 * momentum,
                    install_velocity: velocity,
                    momentum_change: momentum,
                    recent_installs: bucket.recent,
                    previous_installs: bucket.previous,
                    trend_period: "24h".to_string(),
                }
            })
            .collect();
        trending.sort_by(|a, b| b.trending_score.total_cmp(&a.trending_score));
        trending.truncate(limit);

        // Fewer trending servers than asked for: pad from top-rated.
        if trending.len() < limit {
            let included: HashSet<String> =
                trending.iter().map(|t| t.server_id.clone()).collect();
            let mut rated: Vec<_> = self
                .stats
                .all()
                .await?
                .into_iter()
                .filter(|s| {
                    selector.matches(s.source)
                        && s.rating >= TRENDING_PAD_MIN_RATING
                        && !included.contains(&s.server_id)
                })
                .collect();
            rated.sort_by(|a, b| {
                b.rating
                    .total_cmp(&a.rating)
                    .then(b.install_count.cmp(&a.install_count))
            });

            for stats in rated.into_iter().take(limit - trending.len()) {
                trending.push(TrendingServer {
                    server_id: stats.server_id,
                    server_name: String::new(),
                    trending_score: stats.rating * 10.0,
                    install_velocity: stats.install_count as f64 / (30.0 * 24.0),
                    momentum_change: 0.0,
                    recent_installs: 0,
                    previous_installs: 0,
                    trend_period: "all-time".to_string(),
                });
            }
        }

        Ok(trending)
    }

    async fn growth(&self, metric: GrowthMetric, period: Period) -> Result<GrowthMetrics> {
        let now = Utc::now();
        let current_start = period_start(period, now);
        let prev_start = previous_start(period, current_start);
        let prior_start = previous_start(period, prev_start);

        let current_value = self.metric_value(metric, current_start, now);
        let previous_value = self.metric_value(metric, prev_start, current_start);
        let prior_value = self.metric_value(metric, prior_start, prev_start);

        let growth_rate = if previous_value > 0.0 {
            (current_value - previous_value) / previous_value * 100.0
        } else if current_value > 0.0 {
            100.0
        } else {
            0.0
        };

        let (momentum, trend) = if prior_value > 0.0 {
            let previous_growth = (previous_value - prior_value) / prior_value * 100.0;
            let momentum = growth_rate - previous_growth;
            let trend = if momentum > 0.0 {
                "accelerating"
            } else if momentum < -5.0 {
                "decelerating"
            } else {
                "steady"
            };
            (momentum, trend)
        } else {
            (0.0, "new")
        };

        Ok(GrowthMetrics {
            metric: metric.as_str().to_string(),
            period: period.as_str().to_string(),
            current_period_start: current_start,
            previous_period_start: prev_start,
            current_value,
            previous_value,
            absolute_change: current_value - previous_value,
            growth_rate,
            momentum,
            trend: trend.to_string(),
            data_points: self.growth_data_points(metric, current_start, now, period),
        })
    }

    async fn check_and_record_milestones(&self) -> Result<()> {
        let total_installs = self.counters.lock().total_installs;

        // Check-and-insert under one lock keeps (type, milestone) unique.
        let mut milestones = self.milestones.lock();
        for milestone in INSTALL_MILESTONES {
            if total_installs < milestone {
                continue;
            }
            let exists = milestones
                .iter()
                .any(|m| m.kind == "installs" && m.milestone == milestone);
            if !exists {
                milestones.push(MilestoneEvent {
                    id: uuid::Uuid::new_v4().to_string(),
                    kind: "installs".to_string(),
                    milestone,
                    achieved_at: Utc::now(),
                    server_id: None,
                    server_name: None,
                    description: format!("Registry reached {milestone} total installs!"),
                });
            }
        }
        Ok(())
    }

    async fn recent_milestones(&self, limit: usize) -> Result<Vec<MilestoneEvent>> {
        let limit = validate_limit(limit)?;
        let mut milestones = self.milestones.lock().clone();
        milestones.sort_by(|a, b| b.achieved_at.cmp(&a.achieved_at));
        milestones.truncate(limit);
        Ok(milestones)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::DEFAULT_CHECK_INTERVAL;
    use crate::stats_store::MemoryStatsStore;
    use pulse_core::Source;

    fn setup() -> (Arc<MemoryStatsStore>, Arc<MemoryAnalyticsStore>) {
        let stats = MemoryStatsStore::new();
        let health = HealthMonitor::new(DEFAULT_CHECK_INTERVAL);
        let analytics = MemoryAnalyticsStore::new(stats.clone(), health);
        (stats, analytics)
    }

    fn install_event(server_id: &str, user_id: &str) -> ActivityEvent {
        let mut event = ActivityEvent::new(activity::INSTALL);
        event.server_id = Some(server_id.to_string());
        event.user_id = Some(user_id.to_string());
        event
    }

    #[tokio::test]
    async fn record_activity_assigns_id_and_bumps_counters() {
        let (_, analytics) = setup();
        let stored = analytics
            .record_activity(install_event("srv", "u1"))
            .await
            .unwrap();
        assert!(!stored.id.is_empty());

        let metrics = analytics.dashboard(Period::Day).await.unwrap();
        assert_eq!(metrics.total_installs, 1);
        assert_eq!(metrics.installs_today, 1);
    }

    #[tokio::test]
    async fn activity_timestamps_are_monotonic() {
        let (_, analytics) = setup();
        let mut handles = Vec::new();
        for i in 0..20 {
            let analytics = analytics.clone();
            handles.push(tokio::spawn(async move {
                analytics
                    .record_activity(install_event("srv", &format!("u{i}")))
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let log = analytics.activity.read();
        for pair in log.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[tokio::test]
    async fn recent_activity_filters_by_type() {
        let (_, analytics) = setup();
        analytics
            .record_activity(install_event("srv", "u1"))
            .await
            .unwrap();
        analytics
            .record_activity(ActivityEvent::new(activity::RATING))
            .await
            .unwrap();

        let installs = analytics.recent_activity(10, activity::INSTALL).await.unwrap();
        assert_eq!(installs.len(), 1);

        let everything = analytics.recent_activity(10, "").await.unwrap();
        assert_eq!(everything.len(), 2);
        // Newest first.
        assert_eq!(everything[0].kind, activity::RATING);
    }

    #[tokio::test]
    async fn api_call_running_mean() {
        let (_, analytics) = setup();
        analytics
            .track_api_call("/vp/servers", "GET", 10.0, false)
            .await
            .unwrap();
        analytics
            .track_api_call("/vp/servers", "GET", 30.0, true)
            .await
            .unwrap();

        let metrics = analytics.api_metrics(10).await.unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].count, 2);
        assert_eq!(metrics[0].error_count, 1);
        assert!((metrics[0].avg_duration_ms - 20.0).abs() < 1e-6);

        let dashboard = analytics.dashboard(Period::Day).await.unwrap();
        assert_eq!(dashboard.total_api_calls, 2);
        assert!((dashboard.error_rate - 50.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn search_tracking_emits_activity_and_rates() {
        let (_, analytics) = setup();
        analytics.track_search("postgres", 5).await.unwrap();
        analytics.track_search("postgres", 3).await.unwrap();
        analytics
            .track_search_conversion("postgres", "postgres-tools")
            .await
            .unwrap();

        let searches = analytics.top_searches(10).await.unwrap();
        assert_eq!(searches.len(), 1);
        assert_eq!(searches[0].count, 2);
        assert_eq!(searches[0].results_found, 8);
        assert_eq!(searches[0].installs_from_search, 1);
        assert!((searches[0].success_rate - 50.0).abs() < 1e-6);

        // One activity event per search, none for the conversion.
        let events = analytics.recent_activity(10, activity::SEARCH).await.unwrap();
        assert_eq!(events.len(), 2);

        let dashboard = analytics.dashboard(Period::Day).await.unwrap();
        assert_eq!(dashboard.total_searches, 2);
        assert!((dashboard.search_success_rate - 50.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn conversion_for_unknown_term_is_ignored() {
        let (_, analytics) = setup();
        analytics
            .track_search_conversion("never-searched", "srv")
            .await
            .unwrap();
        assert!(analytics.top_searches(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn trending_ranks_by_velocity_and_momentum() {
        let (_, analytics) = setup();
        for _ in 0..6 {
            analytics
                .record_activity(install_event("hot", "u"))
                .await
                .unwrap();
        }
        analytics
            .record_activity(install_event("warm", "u"))
            .await
            .unwrap();

        let trending = analytics
            .calculate_trending(10, SourceSelector::Default)
            .await
            .unwrap();
        assert_eq!(trending[0].server_id, "hot");
        assert_eq!(trending[0].recent_installs, 6);
        // No previous-window installs: momentum pegs at 100.
        assert!((trending[0].momentum_change - 100.0).abs() < 1e-6);
        assert_eq!(trending[0].trend_period, "24h");
    }

    #[tokio::test]
    async fn trending_pads_from_top_rated() {
        let (stats, analytics) = setup();
        for (server, rating) in [("excellent", 4.5), ("great", 4.2), ("good", 3.9)] {
            for _ in 0..5 {
                stats
                    .update_rating(server, Source::Registry, rating)
                    .await
                    .unwrap();
            }
        }

        // Empty activity store: everything comes from the all-time pad.
        let trending = analytics
            .calculate_trending(2, SourceSelector::Default)
            .await
            .unwrap();
        assert_eq!(trending.len(), 2);
        assert_eq!(trending[0].server_id, "excellent");
        assert_eq!(trending[1].server_id, "great");
        for entry in &trending {
            assert_eq!(entry.trend_period, "all-time");
            assert_eq!(entry.momentum_change, 0.0);
        }
    }

    #[tokio::test]
    async fn trending_pad_respects_source_filter() {
        let (stats, analytics) = setup();
        for _ in 0..5 {
            stats
                .update_rating("community-star", Source::Community, 5.0)
                .await
                .unwrap();
        }

        let registry_only = analytics
            .calculate_trending(5, SourceSelector::One(Source::Registry))
            .await
            .unwrap();
        assert!(registry_only.is_empty());

        let community = analytics
            .calculate_trending(5, SourceSelector::One(Source::Community))
            .await
            .unwrap();
        assert_eq!(community.len(), 1);
    }

    #[tokio::test]
    async fn growth_with_no_history_is_new() {
        let (_, analytics) = setup();
        analytics
            .record_activity(install_event("srv", "u1"))
            .await
            .unwrap();

        let growth = analytics
            .growth(GrowthMetric::Installs, Period::Day)
            .await
            .unwrap();
        assert_eq!(growth.current_value, 1.0);
        assert_eq!(growth.previous_value, 0.0);
        assert_eq!(growth.growth_rate, 100.0);
        assert_eq!(growth.trend, "new");
        assert!(!growth.data_points.is_empty());
    }

    #[tokio::test]
    async fn growth_counts_distinct_users() {
        let (_, analytics) = setup();
        for user in ["u1", "u2", "u1"] {
            analytics
                .record_activity(install_event("srv", user))
                .await
                .unwrap();
        }

        let growth = analytics
            .growth(GrowthMetric::Users, Period::Week)
            .await
            .unwrap();
        assert_eq!(growth.current_value, 2.0);
    }

    #[tokio::test]
    async fn milestones_recorded_at_most_once() {
        let (_, analytics) = setup();
        for _ in 0..150 {
            analytics
                .record_activity(install_event("srv", "u"))
                .await
                .unwrap();
        }

        analytics.check_and_record_milestones().await.unwrap();
        analytics.check_and_record_milestones().await.unwrap();

        let milestones = analytics.recent_milestones(10).await.unwrap();
        assert_eq!(milestones.len(), 1);
        assert_eq!(milestones[0].milestone, 100);
        assert_eq!(milestones[0].kind, "installs");
    }

    #[tokio::test]
    async fn time_series_buckets_by_day() {
        let (_, analytics) = setup();
        for installs in [1, 2, 3] {
            let mut point = TimeSeriesPoint::at(Utc::now());
            point.installs = installs;
            point.api_calls = 10;
            analytics.record_time_series(point).await.unwrap();
        }

        let start = Utc::now() - ChronoDuration::days(1);
        let end = Utc::now() + ChronoDuration::minutes(1);

        let raw = analytics.time_series(start, end, "").await.unwrap();
        assert_eq!(raw.len(), 3);

        let daily = analytics.time_series(start, end, "day").await.unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].installs, 6);
        assert_eq!(daily[0].api_calls, 30);
    }

    #[tokio::test]
    async fn dashboard_quality_metrics_come_from_stats() {
        let (stats, analytics) = setup();
        for _ in 0..5 {
            stats.update_rating("star", Source::Registry, 5.0).await.unwrap();
        }
        stats.update_rating("meh", Source::Registry, 2.0).await.unwrap();

        let dashboard = analytics.dashboard(Period::Week).await.unwrap();
        assert_eq!(dashboard.five_star_servers, 1);
        // (5*5 + 2) / 6
        assert!((dashboard.average_rating - 27.0 / 6.0).abs() < 1e-6);
    }
}
