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

//! Analytics entities: activity events, API-call metrics, search analytics,
//! time series, trending, growth, milestones, and the dashboard envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// Well-known activity event types. The set is open; unknown types are
/// stored and returned untouched.
pub mod activity {
    pub const INSTALL: &str = "install";
    pub const RATING: &str = "rating";
    pub const SEARCH: &str = "search";
    pub const SERVER_ADDED: &str = "server_added";
}

/// A single append-only activity record. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Open map: unknown keys are preserved on read and write.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            kind: kind.into(),
            server_id: None,
            server_name: None,
            user_id: None,
            value: None,
            metadata: serde_json::Map::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Usage counters for one `(endpoint, method)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCallMetrics {
    pub endpoint: String,
    pub method: String,
    pub count: u64,
    pub avg_duration_ms: f64,
    pub error_count: u64,
    pub last_called: DateTime<Utc>,
}

/// Per-term search behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchAnalytics {
    pub search_term: String,
    pub count: u64,
    pub results_found: u64,
    pub installs_from_search: u64,
    pub success_rate: f64,
    pub last_searched: DateTime<Utc>,
}

/// One append-only sample of registry-wide counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub installs: i64,
    #[serde(default)]
    pub api_calls: i64,
    #[serde(default)]
    pub active_users: i64,
    #[serde(default)]
    pub new_servers: i64,
    #[serde(default)]
    pub ratings: i64,
}

impl TimeSeriesPoint {
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            installs: 0,
            api_calls: 0,
            active_users: 0,
            new_servers: 0,
            ratings: 0,
        }
    }
}

/// Snapshot of registry-wide analytics for a period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsMetrics {
    // Core
    pub total_installs: i64,
    pub total_api_calls: i64,
    pub active_users: i64,
    pub active_installs: i64,

    // Growth
    pub installs_today: i64,
    pub installs_this_week: i64,
    pub installs_this_month: i64,
    pub weekly_growth: f64,
    pub monthly_growth: f64,
    /// Installs per hour over the trailing 24 hours.
    pub install_velocity: f64,

    // Quality
    pub average_rating: f64,
    pub total_ratings: i64,
    pub five_star_servers: i64,
    pub total_feedback: i64,

    // Performance
    pub response_time_p50: f64,
    pub response_time_p90: f64,
    pub response_time_p99: f64,
    pub uptime_percentage: f64,
    pub error_rate: f64,

    // Discovery
    pub total_searches: i64,
    pub search_success_rate: f64,
    pub registry_installs: i64,
    pub community_installs: i64,

    // Developer activity
    pub active_publishers: i64,
    pub new_servers: i64,
    pub updated_servers: i64,

    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

impl Default for AnalyticsMetrics {
    fn default() -> Self {
        Self {
            total_installs: 0,
            total_api_calls: 0,
            active_users: 0,
            active_installs: 0,
            installs_today: 0,
            installs_this_week: 0,
            installs_this_month: 0,
            weekly_growth: 0.0,
            monthly_growth: 0.0,
            install_velocity: 0.0,
            average_rating: 0.0,
            total_ratings: 0,
            five_star_servers: 0,
            total_feedback: 0,
            response_time_p50: 0.0,
            response_time_p90: 0.0,
            response_time_p99: 0.0,
            uptime_percentage: 0.0,
            error_rate: 0.0,
            total_searches: 0,
            search_success_rate: 0.0,
            registry_installs: 0,
            community_installs: 0,
            active_publishers: 0,
            new_servers: 0,
            updated_servers: 0,
            last_updated: Utc::now(),
        }
    }
}

/// A server ranked by short-horizon install velocity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendingServer {
    pub server_id: String,
    #[serde(default)]
    pub server_name: String,
    pub trending_score: f64,
    pub install_velocity: f64,
    /// Percent change of velocity between the two trailing 24 h windows.
    pub momentum_change: f64,
    pub recent_installs: i64,
    pub previous_installs: i64,
    pub trend_period: String,
}

/// Metric selector for growth queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthMetric {
    Installs,
    Users,
    ApiCalls,
    Servers,
    Ratings,
    Searches,
}

impl GrowthMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrowthMetric::Installs => "installs",
            GrowthMetric::Users => "users",
            GrowthMetric::ApiCalls => "api_calls",
            GrowthMetric::Servers => "servers",
            GrowthMetric::Ratings => "ratings",
            GrowthMetric::Searches => "searches",
        }
    }
}

impl fmt::Display for GrowthMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrowthMetric {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "installs" => GrowthMetric::Installs,
            "users" => GrowthMetric::Users,
            "api_calls" => GrowthMetric::ApiCalls,
            "servers" => GrowthMetric::Servers,
            "ratings" => GrowthMetric::Ratings,
            "searches" => GrowthMetric::Searches,
            other => {
                return Err(StoreError::InvalidInput(format!(
                    "unsupported metric: {other}"
                )))
            }
        })
    }
}

/// Reporting period for dashboards and growth queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Period {
    Day,
    #[default]
    Week,
    Month,
    Year,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "day" => Period::Day,
            "week" => Period::Week,
            "month" => Period::Month,
            "year" => Period::Year,
            other => {
                return Err(StoreError::InvalidInput(format!(
                    "invalid period parameter: {other}"
                )))
            }
        })
    }
}

/// One point in a growth visualization series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Growth of one metric across two adjacent windows, with momentum
/// (the change of the growth rate itself) when a prior window exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrowthMetrics {
    pub metric: String,
    pub period: String,
    pub current_period_start: DateTime<Utc>,
    pub previous_period_start: DateTime<Utc>,
    pub current_value: f64,
    pub previous_value: f64,
    pub absolute_change: f64,
    pub growth_rate: f64,
    pub momentum: f64,
    /// `accelerating`, `steady`, `decelerating`, or `new`.
    pub trend: String,
    pub data_points: Vec<DataPoint>,
}

/// A threshold crossing recorded at most once per `(type, milestone)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub milestone: i64,
    pub achieved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    pub description: String,
}

/// A metric value with its trend annotation for dashboard tiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricWithTrend {
    pub value: Value,
    pub trend: f64,
    pub trend_direction: String,
    pub comparison_period: String,
}

/// Quick server callout on the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerQuickStat {
    pub server_id: String,
    pub server_name: String,
    pub value: Value,
    pub label: String,
}

/// The main dashboard payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardMetrics {
    pub total_installs: MetricWithTrend,
    pub total_api_calls: MetricWithTrend,
    pub active_users: MetricWithTrend,
    pub server_health: MetricWithTrend,

    pub new_servers_today: i64,
    pub install_velocity: f64,
    pub top_rated_count: i64,
    pub search_success_rate: f64,

    /// Installs per day over the trailing week, for sparklines.
    pub install_trend: Vec<i64>,
    /// Activity per hour over the trailing 7 hours.
    pub activity_trend: Vec<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub most_installed_today: Option<ServerQuickStat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hottest_server: Option<ServerQuickStat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newest_server: Option<ServerQuickStat>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_event_preserves_unknown_metadata() {
        let json = serde_json::json!({
            "id": "abc",
            "type": "install",
            "server_id": "srv",
            "metadata": {"platform": "linux", "custom_key": {"nested": true}},
            "timestamp": "2025-06-01T00:00:00Z"
        });
        let event: ActivityEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.kind, "install");
        assert!(event.metadata.contains_key("custom_key"));

        let back = serde_json::to_value(&event).unwrap();
        assert_eq!(back["metadata"]["custom_key"]["nested"], true);
    }

    #[test]
    fn growth_metric_round_trips() {
        for name in ["installs", "users", "api_calls", "servers", "ratings", "searches"] {
            let metric: GrowthMetric = name.parse().unwrap();
            assert_eq!(metric.as_str(), name);
        }
        assert!("revenue".parse::<GrowthMetric>().is_err());
    }

    #[test]
    fn period_rejects_junk() {
        assert_eq!("day".parse::<Period>().unwrap(), Period::Day);
        assert!("decade".parse::<Period>().is_err());
    }
}
