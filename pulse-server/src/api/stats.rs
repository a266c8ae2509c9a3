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

//! Install tracking, per-server stats, global stats, leaderboards, and
//! trending.

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};

use pulse_core::validation::{parse_source, parse_write_source};
use pulse_core::{
    activity, ActivityEvent, ExtendedServer, InstallRequest, ServerRecord, ServerStats,
    SourceSelector, TrendingServer,
};

use super::{
    invalidate_server_caches, invalidate_source_caches, parse_limit, respond_hit, respond_miss,
    spawn_activity, spawn_milestone_check, ApiError, AppState,
};

/// Minimum rating for the no-analytics trending fallback.
const TRENDING_PAD_MIN_RATING: f64 = 4.0;

#[derive(Debug, Serialize)]
pub struct SuccessEnvelope {
    success: bool,
    message: String,
}

/// POST /vp/servers/{id}/install
///
/// The body is optional; an empty or malformed body still counts the
/// install against the default source.
pub async fn track_install(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
    payload: Option<Json<InstallRequest>>,
) -> Result<Json<SuccessEnvelope>, ApiError> {
    let request = payload.map(|Json(req)| req).unwrap_or_default();
    let source = parse_write_source(&request.source)?;

    state.stats.increment_install(&server_id, source).await?;

    invalidate_server_caches(&state.cache, &server_id);
    invalidate_source_caches(&state.cache, &server_id, source);

    let mut event = ActivityEvent::new(activity::INSTALL);
    event.server_id = Some(server_id.clone());
    if !request.user_id.is_empty() {
        event.user_id = Some(request.user_id.clone());
    }
    event
        .metadata
        .insert("source".into(), serde_json::json!(source.as_str()));
    if !request.version.is_empty() {
        event
            .metadata
            .insert("version".into(), serde_json::json!(request.version));
    }
    if !request.platform.is_empty() {
        event
            .metadata
            .insert("platform".into(), serde_json::json!(request.platform));
    }
    spawn_activity(&state, event);
    spawn_milestone_check(&state);

    Ok(Json(SuccessEnvelope {
        success: true,
        message: "Installation tracked successfully".into(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub aggregated: Option<String>,
}

/// GET /vp/servers/{id}/stats
pub async fn get_stats(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
    Query(params): Query<StatsParams>,
) -> Result<Response, ApiError> {
    let source_raw = params.source.as_deref().unwrap_or("");
    let selector = parse_source(source_raw)?;
    let aggregated = params.aggregated.as_deref() == Some("true");

    let cache_key = if aggregated {
        format!("vp:stats:{server_id}:aggregated")
    } else if source_raw.is_empty() {
        format!("vp:stats:{server_id}")
    } else {
        format!("vp:stats:{server_id}:{source_raw}")
    };
    if let Some(cached) = state.cache.get(&cache_key) {
        return Ok(respond_hit(cached));
    }

    if aggregated {
        let stats = state.stats.get_aggregated(&server_id).await?;
        respond_miss(&state.cache, &cache_key, &stats)
    } else {
        let stats = state.stats.get(&server_id, selector).await?;
        respond_miss(
            &state.cache,
            &cache_key,
            &serde_json::json!({ "stats": stats }),
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct GlobalParams {
    #[serde(default)]
    pub source: Option<String>,
}

/// GET /vp/stats/global
pub async fn global_stats(
    State(state): State<AppState>,
    Query(params): Query<GlobalParams>,
) -> Result<Response, ApiError> {
    let source_raw = params.source.as_deref().unwrap_or("");
    let selector = parse_source(source_raw)?;

    let cache_key = if source_raw.is_empty() {
        "vp:stats:global".to_string()
    } else {
        format!("vp:stats:global:{source_raw}")
    };
    if let Some(cached) = state.cache.get(&cache_key) {
        return Ok(respond_hit(cached));
    }

    let global = state.stats.global(selector).await?;
    respond_miss(&state.cache, &cache_key, &global)
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardParams {
    #[serde(default, rename = "type")]
    pub board: Option<String>,
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

/// GET /vp/stats/leaderboard
pub async fn leaderboard(
    State(state): State<AppState>,
    Query(params): Query<LeaderboardParams>,
) -> Result<Response, ApiError> {
    let board = params.board.as_deref().unwrap_or("installs").to_string();
    let limit = parse_limit(params.limit.as_deref(), 10, 100);
    let source_raw = params.source.as_deref().unwrap_or("");
    let selector = parse_source(source_raw)?;

    let cache_key = if source_raw.is_empty() {
        format!("vp:leaderboard:{board}:{limit}")
    } else {
        format!("vp:leaderboard:{board}:{limit}:{source_raw}")
    };
    if let Some(cached) = state.cache.get(&cache_key) {
        return Ok(respond_hit(cached));
    }

    let data = match board.as_str() {
        "installs" => serde_json::to_value(state.stats.top_by_installs(limit, selector).await?),
        "rating" => serde_json::to_value(state.stats.top_by_rating(limit, selector).await?),
        "trending" => serde_json::to_value(trending_entries(&state, limit, selector).await?),
        _ => return Err(ApiError::BadRequest("Invalid leaderboard type".into())),
    }
    .map_err(|e| ApiError::Internal(format!("failed to encode leaderboard: {e}")))?;

    respond_miss(
        &state.cache,
        &cache_key,
        &serde_json::json!({
            "type": board,
            "limit": limit,
            "data": data,
        }),
    )
}

#[derive(Debug, Deserialize)]
pub struct TrendingParams {
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

/// Trending listing entry: server envelope plus its trend annotations.
#[derive(Debug, Serialize)]
struct TrendingListEntry {
    #[serde(flatten)]
    server: ExtendedServer,
    trending_score: f64,
    momentum_change: f64,
    trend_period: String,
}

/// GET /vp/stats/trending
pub async fn trending(
    State(state): State<AppState>,
    Query(params): Query<TrendingParams>,
) -> Result<Response, ApiError> {
    let limit = parse_limit(params.limit.as_deref(), 20, 100);
    let source_raw = params.source.as_deref().unwrap_or("");
    let selector = parse_source(source_raw)?;

    let cache_key = if source_raw.is_empty() {
        format!("vp:trending:{limit}")
    } else {
        format!("vp:trending:{limit}:{source_raw}")
    };
    if let Some(cached) = state.cache.get(&cache_key) {
        return Ok(respond_hit(cached));
    }

    let entries = trending_entries(&state, limit, selector).await?;

    let mut servers = Vec::with_capacity(entries.len());
    for entry in entries {
        let stats = state
            .stats
            .get(&entry.server_id, selector)
            .await
            .unwrap_or_else(|_| ServerStats::empty(&entry.server_id, selector.or_registry()));
        // Servers the catalog does not know yet still appear, identified by
        // their stats record alone.
        let record = state
            .catalog
            .get(&entry.server_id)
            .await
            .unwrap_or_else(|_| ServerRecord {
                id: entry.server_id.clone(),
                name: entry.server_name.clone(),
                ..Default::default()
            });
        servers.push(TrendingListEntry {
            server: ExtendedServer::new(record, Some(&stats)),
            trending_score: entry.trending_score,
            momentum_change: entry.momentum_change,
            trend_period: entry.trend_period,
        });
    }

    respond_miss(
        &state.cache,
        &cache_key,
        &serde_json::json!({
            "limit": limit,
            "servers": servers,
        }),
    )
}

/// Trending servers via the analytics store, or the all-time pad computed
/// from the stats store when analytics is not initialized.
pub(crate) async fn trending_entries(
    state: &AppState,
    limit: usize,
    selector: SourceSelector,
) -> Result<Vec<TrendingServer>, ApiError> {
    if let Some(analytics) = &state.analytics {
        return Ok(analytics.calculate_trending(limit, selector).await?);
    }

    let mut rated: Vec<ServerStats> = state
        .stats
        .all()
        .await?
        .into_iter()
        .filter(|s| selector.matches(s.source) && s.rating >= TRENDING_PAD_MIN_RATING)
        .collect();
    rated.sort_by(|a, b| {
        b.rating
            .total_cmp(&a.rating)
            .then(b.install_count.cmp(&a.install_count))
    });

    Ok(rated
        .into_iter()
        .take(limit)
        .map(|stats| TrendingServer {
            server_id: stats.server_id,
            server_name: String::new(),
            trending_score: stats.rating * 10.0,
            install_velocity: stats.install_count as f64 / (30.0 * 24.0),
            momentum_change: 0.0,
            recent_installs: 0,
            previous_installs: 0,
            trend_period: "all-time".to_string(),
        })
        .collect())
}
