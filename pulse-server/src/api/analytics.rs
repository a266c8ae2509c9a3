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

//! Analytics endpoints: dashboard, activity feed, growth, API metrics,
//! search insights, time series, and hot servers.
//!
//! Read paths consult the external analytics client first when it is
//! configured and fall back to the local store on any failure; the payload
//! shape is identical either way.

use axum::extract::{Query, State};
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use pulse_core::{
    ActivityEvent, AnalyticsMetrics, DashboardMetrics, GrowthMetric, GrowthMetrics,
    MetricWithTrend, Period, ServerQuickStat, SourceSelector, TrendingServer,
};
use pulse_storage::health::health_score;

use super::{parse_limit, respond_hit, respond_miss, ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct DashboardParams {
    #[serde(default)]
    pub period: Option<String>,
}

/// GET /vp/analytics/dashboard
pub async fn dashboard(
    State(state): State<AppState>,
    Query(params): Query<DashboardParams>,
) -> Result<Response, ApiError> {
    let period: Period = params.period.as_deref().unwrap_or("day").parse()?;

    let cache_key = format!("vp:dashboard:{period}");
    if let Some(cached) = state.cache.get(&cache_key) {
        return Ok(respond_hit(cached));
    }

    // External analytics first; any failure falls back to the local store.
    if let Some(client) = &state.analytics_client {
        match client.dashboard_metrics(period).await {
            Ok(mut metrics) => {
                metrics.hottest_server = hottest_server(&state).await;
                metrics.newest_server = newest_server(&state).await;
                return respond_miss(&state.cache, &cache_key, &metrics);
            }
            Err(err) => {
                warn!(error = %err, "external analytics failed, falling back to local store");
            }
        }
    }

    let analytics = state.analytics()?;
    let metrics = analytics.dashboard(period).await?;
    let dashboard = build_dashboard(&state, period, &metrics).await?;
    respond_miss(&state.cache, &cache_key, &dashboard)
}

async fn build_dashboard(
    state: &AppState,
    period: Period,
    metrics: &AnalyticsMetrics,
) -> Result<DashboardMetrics, ApiError> {
    let analytics = state.analytics()?;

    let installs_growth = analytics.growth(GrowthMetric::Installs, period).await?;
    let api_calls_growth = analytics.growth(GrowthMetric::ApiCalls, period).await?;
    let users_growth = analytics.growth(GrowthMetric::Users, period).await?;

    // Install sparkline from the daily time-series buckets of the trailing
    // week.
    let now = Utc::now();
    let series = analytics
        .time_series(now - ChronoDuration::days(7), now, "day")
        .await
        .unwrap_or_default();
    let install_trend: Vec<i64> = series.iter().map(|p| p.installs).take(7).collect();

    let comparison = comparison_period(period);
    let health = health_score(metrics.uptime_percentage, metrics.response_time_p50);

    Ok(DashboardMetrics {
        total_installs: tile(
            json!(metrics.total_installs),
            installs_growth.growth_rate,
            comparison,
        ),
        total_api_calls: tile(
            json!(metrics.total_api_calls),
            api_calls_growth.growth_rate,
            comparison,
        ),
        active_users: tile(
            json!(metrics.active_users),
            users_growth.growth_rate,
            comparison,
        ),
        server_health: tile(json!(format!("{health:.1}%")), 0.0, comparison),
        new_servers_today: metrics.new_servers,
        install_velocity: metrics.install_velocity,
        top_rated_count: metrics.five_star_servers,
        search_success_rate: metrics.search_success_rate,
        install_trend,
        activity_trend: Vec::new(),
        most_installed_today: None,
        hottest_server: hottest_server(state).await,
        newest_server: newest_server(state).await,
    })
}

fn tile(value: serde_json::Value, trend: f64, comparison: &str) -> MetricWithTrend {
    let direction = if trend > 0.0 {
        "up"
    } else if trend < 0.0 {
        "down"
    } else {
        "stable"
    };
    MetricWithTrend {
        value,
        trend,
        trend_direction: direction.to_string(),
        comparison_period: comparison.to_string(),
    }
}

fn comparison_period(period: Period) -> &'static str {
    match period {
        Period::Day => "vs yesterday",
        Period::Week => "vs last week",
        Period::Month => "vs last month",
        Period::Year => "vs last year",
    }
}

async fn hottest_server(state: &AppState) -> Option<ServerQuickStat> {
    let analytics = state.analytics.as_ref()?;
    let trending = analytics
        .calculate_trending(1, SourceSelector::Default)
        .await
        .ok()?;
    let top = trending.first()?;
    Some(ServerQuickStat {
        server_id: top.server_id.clone(),
        server_name: top.server_name.clone(),
        value: json!(format!("{:.1}/hr", top.install_velocity)),
        label: "installs/hour".to_string(),
    })
}

async fn newest_server(state: &AppState) -> Option<ServerQuickStat> {
    let recent = state
        .stats
        .get_recent(1, SourceSelector::Default)
        .await
        .ok()?;
    let newest = recent.first()?;
    let record = state.catalog.get(&newest.server_id).await.ok()?;
    let age_minutes = (Utc::now() - newest.first_seen).num_minutes().max(0);
    Some(ServerQuickStat {
        server_id: record.id.clone(),
        server_name: record.name.clone(),
        value: json!("Just added"),
        label: format!("{age_minutes}m ago"),
    })
}

#[derive(Debug, Deserialize)]
pub struct ActivityParams {
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// GET /vp/analytics/activity
pub async fn activity_feed(
    State(state): State<AppState>,
    Query(params): Query<ActivityParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = parse_limit(params.limit.as_deref(), 20, 100);
    let kind = params.kind.unwrap_or_default();

    let mut events: Option<Vec<ActivityEvent>> = None;
    if let Some(client) = &state.analytics_client {
        match client.recent_activity(limit).await {
            Ok(mut activity) => {
                if !kind.is_empty() {
                    activity.retain(|e| e.kind == kind);
                }
                events = Some(activity);
            }
            Err(err) => {
                warn!(error = %err, "external analytics failed, falling back to local store");
            }
        }
    }

    let mut events = match events {
        Some(events) => events,
        None => {
            state
                .analytics()?
                .recent_activity(limit, &kind)
                .await?
        }
    };

    // Backfill server names from the catalog where events only carry ids.
    for event in &mut events {
        if event.server_name.is_none() {
            if let Some(id) = &event.server_id {
                if let Ok(record) = state.catalog.get(id).await {
                    event.server_name = Some(record.name);
                }
            }
        }
    }

    let count = events.len();
    Ok(Json(json!({
        "activity": events,
        "count": count,
        "type": kind,
    })))
}

#[derive(Debug, Deserialize)]
pub struct GrowthParams {
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub period: Option<String>,
}

/// GET /vp/analytics/growth
pub async fn growth(
    State(state): State<AppState>,
    Query(params): Query<GrowthParams>,
) -> Result<Json<GrowthMetrics>, ApiError> {
    let metric: GrowthMetric = params.metric.as_deref().unwrap_or("installs").parse()?;
    let period: Period = params.period.as_deref().unwrap_or("week").parse()?;

    let growth = state.analytics()?.growth(metric, period).await?;
    Ok(Json(growth))
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    #[serde(default)]
    pub limit: Option<String>,
}

/// GET /vp/analytics/api-metrics
pub async fn api_metrics(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = parse_limit(params.limit.as_deref(), 20, 100);
    let metrics = state.analytics()?.api_metrics(limit).await?;
    let count = metrics.len();
    Ok(Json(json!({
        "endpoints": metrics,
        "count": count,
    })))
}

/// GET /vp/analytics/search
pub async fn search_analytics(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = parse_limit(params.limit.as_deref(), 20, 100);
    let searches = state.analytics()?.top_searches(limit).await?;

    let total_searches: u64 = searches.iter().map(|s| s.count).sum();
    let conversions: u64 = searches.iter().map(|s| s.installs_from_search).sum();
    let overall_success_rate = if total_searches > 0 {
        conversions as f64 / total_searches as f64 * 100.0
    } else {
        0.0
    };

    Ok(Json(json!({
        "top_searches": searches,
        "total_searches": total_searches,
        "overall_success_rate": overall_success_rate,
    })))
}

#[derive(Debug, Deserialize)]
pub struct TimeSeriesParams {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub interval: Option<String>,
}

/// GET /vp/analytics/time-series
pub async fn time_series(
    State(state): State<AppState>,
    Query(params): Query<TimeSeriesParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let interval = params.interval.unwrap_or_else(|| "hour".to_string());

    // Default window: the trailing 7 days.
    let end = params
        .end
        .as_deref()
        .and_then(parse_rfc3339)
        .unwrap_or_else(Utc::now);
    let start = params
        .start
        .as_deref()
        .and_then(parse_rfc3339)
        .unwrap_or_else(|| end - ChronoDuration::days(7));

    let data = state
        .analytics()?
        .time_series(start, end, &interval)
        .await?;

    let count = data.len();
    Ok(Json(json!({
        "data": data,
        "start": start,
        "end": end,
        "interval": interval,
        "count": count,
    })))
}

fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// GET /vp/analytics/hot
///
/// Trending servers whose velocity rose by more than half against the
/// previous window.
pub async fn hot_servers(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = parse_limit(params.limit.as_deref(), 10, 50);
    let trending = state
        .analytics()?
        .calculate_trending(limit, SourceSelector::Default)
        .await?;

    let hot: Vec<TrendingServer> = trending
        .into_iter()
        .filter(|t| t.momentum_change > 50.0)
        .collect();

    let count = hot.len();
    Ok(Json(json!({
        "servers": hot,
        "count": count,
    })))
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsEnvelopeParams {
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub include_activity: Option<String>,
    #[serde(default)]
    pub include_trending: Option<String>,
    #[serde(default)]
    pub include_search: Option<String>,
}

/// GET /vp/analytics
pub async fn analytics_envelope(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsEnvelopeParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let period: Period = params.period.as_deref().unwrap_or("week").parse()?;
    let analytics = state.analytics()?;

    let metrics = analytics.dashboard(period).await?;

    let trending = if params.include_trending.as_deref() == Some("true") {
        analytics
            .calculate_trending(10, SourceSelector::Default)
            .await
            .unwrap_or_default()
    } else {
        Vec::new()
    };
    let recent_activity = if params.include_activity.as_deref() == Some("true") {
        analytics.recent_activity(20, "").await.unwrap_or_default()
    } else {
        Vec::new()
    };
    let search_insights = if params.include_search.as_deref() == Some("true") {
        analytics.top_searches(10).await.unwrap_or_default()
    } else {
        Vec::new()
    };
    let milestones = analytics.recent_milestones(5).await.unwrap_or_default();

    Ok(Json(json!({
        "metrics": metrics,
        "trending_servers": trending,
        "recent_activity": recent_activity,
        "search_insights": search_insights,
        "milestones": milestones,
        "time_period": period.as_str(),
        "generated_at": Utc::now(),
    })))
}
