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

//! Rating and feedback endpoints.
//!
//! `POST /rate` is the single write path: with a `user_id` or comment it
//! creates (or updates) a feedback row and folds the rating into the stats;
//! without either it only updates the stats.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rand::RngCore;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use pulse_core::validation::{
    parse_source, parse_write_source, validate_comment, validate_rating,
};
use pulse_core::{
    activity, ActivityEvent, FeedbackPage, FeedbackSort, RatingRequest, ServerFeedback, Source,
    UserFeedback,
};

use super::{
    invalidate_server_caches, invalidate_source_caches, parse_limit, parse_offset, respond_hit,
    respond_miss, spawn_activity, ApiError, AppState,
};

/// POST /vp/servers/{id}/rate
pub async fn submit_feedback(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
    Json(mut request): Json<RatingRequest>,
) -> Result<Response, ApiError> {
    validate_rating(request.rating)?;
    validate_comment(&request.comment)?;
    let source = parse_write_source(&request.source)?;

    // A body with a user or comment goes down the feedback path; a bare
    // rating only moves the counters.
    if request.user_id.is_empty() && request.comment.is_empty() {
        return basic_rating(&state, &server_id, source, request.rating).await;
    }

    if request.user_id.is_empty() {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        request.user_id = format!("anon_{hex}");
    }

    let existing = state
        .feedback
        .get_user(&server_id, &request.user_id, source)
        .await?;

    let feedback = match existing {
        Some(mut current) => {
            current.rating = request.rating;
            current.comment = request.comment.clone();
            state.feedback.update(current.clone()).await?;
            state.feedback.get(&current.id).await?
        }
        None => {
            let feedback = ServerFeedback::new(
                &server_id,
                &request.user_id,
                source,
                request.rating,
                &request.comment,
            );
            state.feedback.create(feedback.clone()).await?;
            feedback
        }
    };

    if let Err(err) = state
        .stats
        .update_rating(&server_id, source, request.rating)
        .await
    {
        warn!(%server_id, error = %err, "failed to update rating stats");
    }

    invalidate_server_caches(&state.cache, &server_id);
    invalidate_source_caches(&state.cache, &server_id, source);

    let mut event = ActivityEvent::new(activity::RATING);
    event.server_id = Some(server_id.clone());
    event.user_id = Some(request.user_id.clone());
    event.value = Some(json!(request.rating));
    event
        .metadata
        .insert("source".into(), json!(source.as_str()));
    spawn_activity(&state, event);

    let stats = state.stats.get(&server_id, source.into()).await.ok();
    Ok((
        axum::http::StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Feedback submitted successfully",
            "feedback": feedback,
            "stats": stats,
        })),
    )
        .into_response())
}

async fn basic_rating(
    state: &AppState,
    server_id: &str,
    source: Source,
    rating: f64,
) -> Result<Response, ApiError> {
    state.stats.update_rating(server_id, source, rating).await?;

    invalidate_server_caches(&state.cache, server_id);
    invalidate_source_caches(&state.cache, server_id, source);

    let mut event = ActivityEvent::new(activity::RATING);
    event.server_id = Some(server_id.to_string());
    event.value = Some(json!(rating));
    event
        .metadata
        .insert("source".into(), json!(source.as_str()));
    spawn_activity(state, event);

    let stats = state.stats.get(server_id, source.into()).await.ok();
    Ok((
        axum::http::StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Rating submitted successfully",
            "stats": stats,
        })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct ListFeedbackParams {
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default)]
    pub offset: Option<String>,
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

/// GET /vp/servers/{id}/feedback
pub async fn list_feedback(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
    Query(params): Query<ListFeedbackParams>,
) -> Result<Response, ApiError> {
    let limit = parse_limit(params.limit.as_deref(), 20, 100);
    let offset = parse_offset(params.offset.as_deref());
    let sort: FeedbackSort = params
        .sort
        .as_deref()
        .unwrap_or("")
        .parse()
        .unwrap_or_default();
    let source = parse_source(params.source.as_deref().unwrap_or(""))?.or_registry();

    let cache_key = format!("vp:feedback:{server_id}:{source}:{limit}:{offset}:{sort}");
    if let Some(cached) = state.cache.get(&cache_key) {
        return Ok(respond_hit(cached));
    }

    let page = match state
        .feedback
        .list(&server_id, source, limit, offset, sort)
        .await
    {
        Ok(page) => page,
        Err(err) => {
            warn!(%server_id, error = %err, "failed to list feedback");
            FeedbackPage {
                feedback: Vec::new(),
                total_count: 0,
                has_more: false,
            }
        }
    };

    respond_miss(&state.cache, &cache_key, &page)
}

#[derive(Debug, Deserialize)]
pub struct UserFeedbackParams {
    #[serde(default)]
    pub source: Option<String>,
}

/// GET /vp/servers/{id}/rating/{user_id}
pub async fn user_feedback(
    State(state): State<AppState>,
    Path((server_id, user_id)): Path<(String, String)>,
    Query(params): Query<UserFeedbackParams>,
) -> Result<Json<UserFeedback>, ApiError> {
    let source = parse_source(params.source.as_deref().unwrap_or(""))?.or_registry();

    let feedback = state
        .feedback
        .get_user(&server_id, &user_id, source)
        .await?;
    Ok(Json(UserFeedback {
        has_rated: feedback.is_some(),
        feedback,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateFeedbackRequest {
    pub rating: f64,
    #[serde(default)]
    pub comment: String,
    pub user_id: String,
}

/// PUT /vp/servers/{id}/feedback/{fid}
pub async fn update_feedback(
    State(state): State<AppState>,
    Path((server_id, feedback_id)): Path<(String, String)>,
    Json(request): Json<UpdateFeedbackRequest>,
) -> Result<Response, ApiError> {
    validate_rating(request.rating)?;
    validate_comment(&request.comment)?;
    if request.user_id.is_empty() {
        return Err(ApiError::BadRequest("User ID is required".into()));
    }

    let existing = state.feedback.get(&feedback_id).await?;
    if existing.user_id != request.user_id {
        // Ownership mismatch is indistinguishable from absence.
        return Err(ApiError::NotFound("Feedback not found".into()));
    }

    let mut updated = existing.clone();
    updated.rating = request.rating;
    updated.comment = request.comment.clone();
    state.feedback.update(updated).await?;

    if let Err(err) = state
        .stats
        .update_rating(&server_id, existing.source, request.rating)
        .await
    {
        warn!(%server_id, error = %err, "failed to update rating stats");
    }

    invalidate_server_caches(&state.cache, &server_id);
    invalidate_source_caches(&state.cache, &server_id, existing.source);

    let feedback = state.feedback.get(&feedback_id).await?;
    Ok((
        axum::http::StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Feedback updated successfully",
            "feedback": feedback,
        })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct DeleteFeedbackParams {
    #[serde(default)]
    pub user_id: Option<String>,
}

/// DELETE /vp/servers/{id}/feedback/{fid}
pub async fn delete_feedback(
    State(state): State<AppState>,
    Path((server_id, feedback_id)): Path<(String, String)>,
    Query(params): Query<DeleteFeedbackParams>,
) -> Result<Response, ApiError> {
    let user_id = params
        .user_id
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::BadRequest("User ID is required".into()))?;

    state
        .feedback
        .delete(&feedback_id, &user_id)
        .await
        .map_err(|err| match err {
            pulse_core::StoreError::NotFound => {
                ApiError::NotFound("Feedback not found or unauthorized".into())
            }
            other => other.into(),
        })?;

    invalidate_server_caches(&state.cache, &server_id);
    invalidate_source_caches(&state.cache, &server_id, Source::Registry);
    invalidate_source_caches(&state.cache, &server_id, Source::Community);

    Ok((
        axum::http::StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Feedback deleted successfully",
        })),
    )
        .into_response())
}
