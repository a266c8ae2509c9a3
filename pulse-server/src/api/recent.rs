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

//! Recently discovered servers and the admin timeline stub.

use axum::extract::{Query, State};
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use pulse_core::validation::parse_source;
use pulse_core::ExtendedServer;

use super::{parse_limit, respond_hit, respond_miss, ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct RecentParams {
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub days: Option<String>,
}

/// A recently first-seen server with its discovery annotation.
#[derive(Debug, Serialize)]
struct RecentServer {
    #[serde(flatten)]
    server: ExtendedServer,
    first_seen: DateTime<Utc>,
    discovered_via: String,
}

/// GET /vp/servers/recent
pub async fn recent_servers(
    State(state): State<AppState>,
    Query(params): Query<RecentParams>,
) -> Result<Response, ApiError> {
    let limit = parse_limit(params.limit.as_deref(), 10, 100);
    let source_raw = params.source.as_deref().unwrap_or("");
    let selector = parse_source(source_raw)?;
    let days_raw = params.days.clone().unwrap_or_default();
    let since = days_raw
        .parse::<i64>()
        .ok()
        .filter(|d| *d > 0)
        .map(|d| Utc::now() - ChronoDuration::days(d));

    let cache_key = format!("vp:recent:{source_raw}:{limit}:{days_raw}");
    if let Some(cached) = state.cache.get(&cache_key) {
        return Ok(respond_hit(cached));
    }

    let mut recent = state.stats.get_recent(limit, selector).await?;
    if let Some(cutoff) = since {
        recent.retain(|s| s.first_seen > cutoff);
    }

    let mut servers = Vec::with_capacity(recent.len());
    for stats in recent {
        // Stats rows whose server has left the catalog are skipped.
        let Ok(record) = state.catalog.get(&stats.server_id).await else {
            continue;
        };
        servers.push(RecentServer {
            first_seen: stats.first_seen,
            server: ExtendedServer::new(record, Some(&stats)),
            discovered_via: "stats".to_string(),
        });
    }

    let total_count = servers.len();
    respond_miss(
        &state.cache,
        &cache_key,
        &json!({
            "servers": servers,
            "total_count": total_count,
            "filter": {
                "source": source_raw,
                "limit": limit,
                "days": days_raw,
            },
        }),
    )
}

#[derive(Debug, Deserialize)]
pub struct TimelineParams {
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub days: Option<String>,
}

/// GET /vp/admin/timeline
///
/// TODO: replace the stub with a day/week/month bucketing over first_seen
/// once the admin dashboard lands.
pub async fn server_timeline(
    Query(params): Query<TimelineParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let period = params.period.unwrap_or_else(|| "day".to_string());
    let days = params
        .days
        .as_deref()
        .and_then(|d| d.parse::<i64>().ok())
        .filter(|d| *d > 0)
        .unwrap_or(30);

    Ok(Json(json!({
        "message": "Timeline endpoint - coming soon",
        "period": period,
        "days": days,
    })))
}
