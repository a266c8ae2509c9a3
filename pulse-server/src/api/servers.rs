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

//! Server listing and detail endpoints, decorated with statistics.

use axum::extract::{Path, Query, RawQuery, State};
use axum::response::Response;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use pulse_core::validation::parse_source;
use pulse_core::{ExtendedServer, ServerStats, SourceSelector};

use super::{parse_limit, respond_hit, respond_miss, ApiError, AppState};
use crate::api::stats::trending_entries;

const CATALOG_SCAN_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct ListServersParams {
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub limit: Option<String>,
}

#[derive(Debug, Serialize)]
struct ServersEnvelope {
    servers: Vec<ExtendedServer>,
}

#[derive(Debug, Serialize)]
struct ServerEnvelope {
    server: ExtendedServer,
}

/// GET /vp/servers
pub async fn list_servers(
    State(state): State<AppState>,
    Query(params): Query<ListServersParams>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, ApiError> {
    let selector = parse_source(params.source.as_deref().unwrap_or(""))?;
    let limit = parse_limit(params.limit.as_deref(), 100, 1000);

    let cache_key = format!("vp:servers:{}", raw_query.unwrap_or_default());
    if let Some(cached) = state.cache.get(&cache_key) {
        return Ok(respond_hit(cached));
    }

    let servers = match params.sort.as_deref() {
        Some("") | None => unsorted_servers(&state, selector).await?,
        Some(sort) => sorted_servers(&state, sort, selector, limit).await?,
    };

    respond_miss(&state.cache, &cache_key, &ServersEnvelope { servers })
}

/// GET /vp/servers/{id}
pub async fn get_server(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
    Query(params): Query<SourceParam>,
) -> Result<Response, ApiError> {
    let selector = parse_source(params.source.as_deref().unwrap_or(""))?;

    let cache_key = format!("vp:server:{server_id}");
    if let Some(cached) = state.cache.get(&cache_key) {
        return Ok(respond_hit(cached));
    }

    let record = state
        .catalog
        .get(&server_id)
        .await
        .map_err(|_| ApiError::NotFound("Server not found".into()))?;
    let stats = state.stats.get(&server_id, selector).await?;
    let mut server = ExtendedServer::new(record, Some(&stats));

    // Analytics-derived fields come from the external service when it is
    // configured; failures fall back to the locally synced values.
    if let Some(client) = &state.analytics_client {
        match client.server_metrics(&server_id).await {
            Ok(metrics) => {
                server.active_installs = Some(metrics.active_installs);
                server.weekly_growth = Some(metrics.weekly_growth);
            }
            Err(err) => {
                tracing::warn!(%server_id, error = %err, "external analytics failed, falling back to local stats");
            }
        }
    }

    respond_miss(&state.cache, &cache_key, &ServerEnvelope { server })
}

#[derive(Debug, Deserialize)]
pub struct SourceParam {
    #[serde(default)]
    pub source: Option<String>,
}

async fn unsorted_servers(
    state: &AppState,
    selector: SourceSelector,
) -> Result<Vec<ExtendedServer>, ApiError> {
    let records = state.catalog.list(CATALOG_SCAN_LIMIT).await?;
    let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
    let stats = match state.stats.batch_get(&ids, selector).await {
        Ok(stats) => stats,
        Err(err) => {
            tracing::warn!(error = %err, "failed to batch-load stats for server listing");
            HashMap::new()
        }
    };
    let mut servers = ExtendedServer::from_servers(records, &stats);

    if let Some(client) = &state.analytics_client {
        match client.batch_server_metrics(&ids).await {
            Ok(metrics) => {
                for server in &mut servers {
                    if let Some(m) = metrics.get(&server.server.id) {
                        server.active_installs = Some(m.active_installs);
                        server.weekly_growth = Some(m.weekly_growth);
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "external analytics failed, falling back to local stats");
            }
        }
    }

    Ok(servers)
}

async fn sorted_servers(
    state: &AppState,
    sort: &str,
    selector: SourceSelector,
    limit: usize,
) -> Result<Vec<ExtendedServer>, ApiError> {
    let sorted_stats: Vec<ServerStats> = match sort {
        "installs" => state.stats.top_by_installs(limit, selector).await?,
        "rating" => state.stats.top_by_rating(limit, selector).await?,
        "trending" => {
            let trending = trending_entries(state, limit, selector).await?;
            let mut servers = Vec::with_capacity(trending.len());
            for entry in trending {
                let stats = state
                    .stats
                    .get(&entry.server_id, selector)
                    .await
                    .unwrap_or_else(|_| ServerStats::empty(&entry.server_id, selector.or_registry()));
                if let Ok(record) = state.catalog.get(&entry.server_id).await {
                    servers.push(ExtendedServer::new(record, Some(&stats)));
                }
            }
            return Ok(servers);
        }
        _ => {
            return Err(ApiError::BadRequest(
                "Invalid sort parameter. Must be 'installs', 'rating', or 'trending'".into(),
            ))
        }
    };

    // Preserve the store's ordering; servers missing from the catalog are
    // skipped.
    let mut servers = Vec::with_capacity(sorted_stats.len());
    for stats in sorted_stats {
        if let Ok(record) = state.catalog.get(&stats.server_id).await {
            servers.push(ExtendedServer::new(record, Some(&stats)));
        }
    }
    Ok(servers)
}
