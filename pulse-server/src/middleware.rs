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

//! Request middleware: per-endpoint API-call tracking.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::warn;

use crate::api::AppState;

/// Times every request and records it through the analytics store on a
/// spawned task, so the response is never delayed by tracking.
pub async fn track_api_calls(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let endpoint = request.uri().path().to_string();
    let method = request.method().to_string();

    let response = next.run(request).await;

    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    let is_error = response.status().as_u16() >= 400;

    state.health.record_response_time(&endpoint, duration_ms);

    if let Some(analytics) = state.analytics.clone() {
        tokio::spawn(async move {
            if let Err(err) = analytics
                .track_api_call(&endpoint, &method, duration_ms, is_error)
                .await
            {
                warn!(error = %err, "failed to track API call");
            }
        });
    }

    response
}
