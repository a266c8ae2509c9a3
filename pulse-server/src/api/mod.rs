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

//! Handler plumbing shared by every `/vp` endpoint: the API error type,
//! application state, cache helpers, and lenient query parsing.

pub mod analytics;
pub mod feedback;
pub mod recent;
pub mod servers;
pub mod stats;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use pulse_core::{ActivityEvent, Source, StoreError};
use pulse_storage::{
    AnalyticsStore, FeedbackStore, HealthMonitor, ServerCatalog, StatsStore, TtlCache,
};

use crate::analytics_client::AnalyticsClient;
use crate::claim::ClaimCoordinator;

/// API error type; serializes as `{"success": false, "error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (
            status,
            Json(ErrorBody {
                success: false,
                error: message,
            }),
        )
            .into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidInput(msg) => ApiError::BadRequest(msg),
            StoreError::NotFound => ApiError::NotFound("not found".into()),
            StoreError::DuplicateFeedback => {
                ApiError::Conflict("You have already rated this server".into())
            }
            StoreError::Unauthorized => ApiError::Unauthorized("Unauthorized".into()),
            StoreError::Forbidden => ApiError::Forbidden("Forbidden".into()),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::DependencyUnavailable(msg) | StoreError::Internal(msg) => {
                ApiError::Internal(msg)
            }
        }
    }
}

/// Shared application state; stores are polymorphic and wired at init.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn ServerCatalog>,
    pub stats: Arc<dyn StatsStore>,
    pub feedback: Arc<dyn FeedbackStore>,
    pub analytics: Option<Arc<dyn AnalyticsStore>>,
    pub analytics_client: Option<Arc<dyn AnalyticsClient>>,
    pub cache: Arc<TtlCache>,
    pub health: Arc<HealthMonitor>,
    pub claims: Arc<ClaimCoordinator>,
}

impl AppState {
    pub(crate) fn analytics(&self) -> Result<&Arc<dyn AnalyticsStore>, ApiError> {
        self.analytics
            .as_ref()
            .ok_or_else(|| ApiError::Internal("analytics store not initialized".into()))
    }
}

/// Serialize a response payload and return it with `X-Cache: MISS` after
/// populating the cache. Cache writes happen only here, once the full
/// response value is assembled.
pub(crate) fn respond_miss<T: Serialize>(
    cache: &TtlCache,
    key: &str,
    payload: &T,
) -> Result<Response, ApiError> {
    let value = serde_json::to_value(payload)
        .map_err(|e| ApiError::Internal(format!("failed to encode response: {e}")))?;
    cache.set(key, value.clone());
    Ok(([("x-cache", "MISS")], Json(value)).into_response())
}

/// Replay a cached payload with `X-Cache: HIT`.
pub(crate) fn respond_hit(value: Value) -> Response {
    ([("x-cache", "HIT")], Json(value)).into_response()
}

/// Lenient limit parsing: absent or out-of-range values fall back to the
/// default instead of erroring, matching the rest of the query surface.
pub(crate) fn parse_limit(raw: Option<&str>, default: usize, max: usize) -> usize {
    let parsed = raw.and_then(|s| s.parse::<usize>().ok());
    pulse_core::validation::clamp_limit(parsed, default, max)
}

pub(crate) fn parse_offset(raw: Option<&str>) -> usize {
    raw.and_then(|s| s.parse::<usize>().ok()).unwrap_or(0)
}

/// Invalidate the cache entries affected by any mutation of a server.
pub(crate) fn invalidate_server_caches(cache: &TtlCache, server_id: &str) {
    cache.delete(&format!("vp:server:{server_id}"));
    cache.delete(&format!("vp:stats:{server_id}"));
    cache.delete(&format!("vp:stats:{server_id}:aggregated"));
    cache.delete_prefix("vp:servers:");
    cache.delete_prefix("vp:stats:global");
    cache.delete_prefix("vp:trending:");
    cache.delete_prefix("vp:leaderboard:");
    cache.delete_prefix("vp:recent:");
}

/// Invalidate the per-source entries for a server mutation.
pub(crate) fn invalidate_source_caches(cache: &TtlCache, server_id: &str, source: Source) {
    cache.delete(&format!("vp:stats:{server_id}:{source}"));
    cache.delete(&format!("vp:stats:global:{source}"));
    cache.delete_prefix(&format!("vp:feedback:{server_id}:{source}"));
}

/// Record an activity event without blocking the response path. Failures
/// are logged, never propagated.
pub(crate) fn spawn_activity(state: &AppState, event: ActivityEvent) {
    let Some(analytics) = state.analytics.clone() else {
        return;
    };
    tokio::spawn(async move {
        if let Err(err) = analytics.record_activity(event).await {
            warn!(error = %err, "failed to record activity event");
        }
    });
}

/// Fire-and-forget milestone check after install-type activity.
pub(crate) fn spawn_milestone_check(state: &AppState) {
    let Some(analytics) = state.analytics.clone() else {
        return;
    };
    tokio::spawn(async move {
        if let Err(err) = analytics.check_and_record_milestones().await {
            warn!(error = %err, "milestone check failed");
        }
    });
}
