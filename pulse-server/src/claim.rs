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

//! Claim protocol: an authenticated repository owner takes over a
//! community identity, optionally merging its statistics into the registry
//! identity.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use pulse_core::validation::sanitize_id;
use pulse_core::{ExtendedServer, PublishRequest, ServerRecord, ServerStats, Source, SourceSelector};
use pulse_storage::{ServerCatalog, StatsStore};

use crate::api::{invalidate_server_caches, invalidate_source_caches, ApiError, AppState};
use crate::auth::AuthService;

const VERIFICATION_CODE_TTL_SECS: i64 = 15 * 60;

/// Body of `POST /vp/servers/{id}/claim`.
#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub publish_request: PublishRequest,
    #[serde(default)]
    pub transfer_stats: bool,
    #[serde(default)]
    pub verification_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub success: bool,
    pub server_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transferred_stats: Option<ServerStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_server: Option<ExtendedServer>,
}

#[derive(Debug, Deserialize)]
pub struct ClaimVerificationRequest {
    pub server_id: String,
    #[allow(dead_code)]
    pub github_token: String,
}

#[derive(Debug, Serialize)]
pub struct ClaimVerificationResponse {
    pub verification_code: String,
    pub instructions: String,
    pub expires_at: i64,
}

/// Progress of one claim through the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimState {
    Received,
    TokenVerified,
    RepoVerified,
    ServerUpserted,
    StatsTransferred,
    Done,
}

impl fmt::Display for ClaimState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClaimState::Received => "received",
            ClaimState::TokenVerified => "token_verified",
            ClaimState::RepoVerified => "repo_verified",
            ClaimState::ServerUpserted => "server_upserted",
            ClaimState::StatsTransferred => "stats_transferred",
            ClaimState::Done => "done",
        };
        f.write_str(name)
    }
}

/// Drives the claim state machine. Each step either advances or fails the
/// claim; a re-run of a completed claim leaves the target state unchanged.
pub struct ClaimCoordinator {
    catalog: Arc<dyn ServerCatalog>,
    stats: Arc<dyn StatsStore>,
    auth: Arc<dyn AuthService>,
}

impl ClaimCoordinator {
    pub fn new(
        catalog: Arc<dyn ServerCatalog>,
        stats: Arc<dyn StatsStore>,
        auth: Arc<dyn AuthService>,
    ) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            stats,
            auth,
        })
    }

    pub async fn claim(
        &self,
        server_id: &str,
        token: &str,
        request: ClaimRequest,
    ) -> Result<ClaimResponse, ApiError> {
        let server_id = sanitize_id(server_id).map_err(ApiError::from)?;
        let mut state = ClaimState::Received;
        debug!(%server_id, claim_state = %state, "claim received");

        validate_publish_request(&request.publish_request)?;

        if !self
            .auth
            .validate_token(token)
            .await
            .map_err(ApiError::from)?
        {
            return Err(ApiError::Unauthorized("Authentication failed".into()));
        }
        state = ClaimState::TokenVerified;
        debug!(%server_id, claim_state = %state, "token verified");

        // The target identity must already exist in the catalog.
        self.catalog
            .get(&server_id)
            .await
            .map_err(|_| ApiError::NotFound("Server not found".into()))?;

        let repo_ref = repo_ref(&request.publish_request.repository.url);
        let has_access = self
            .auth
            .verify_repo_access(token, &repo_ref)
            .await
            .map_err(ApiError::from)?;
        if !has_access {
            return Err(ApiError::Forbidden(
                "You don't have access to the specified repository".into(),
            ));
        }
        state = ClaimState::RepoVerified;
        debug!(%server_id, claim_state = %state, repo = %repo_ref, "repository access verified");

        // Upsert the registry-side catalog entry, keeping the same id.
        let record = ServerRecord {
            id: server_id.clone(),
            name: request.publish_request.name.clone(),
            description: request.publish_request.description.clone(),
            repository: request.publish_request.repository.clone(),
            version: request.publish_request.version.clone(),
            packages: request.publish_request.packages.clone(),
            remotes: request.publish_request.remotes.clone(),
        };
        self.catalog
            .publish(record.clone())
            .await
            .map_err(ApiError::from)?;
        state = ClaimState::ServerUpserted;
        debug!(%server_id, claim_state = %state, "catalog entry upserted");

        // Merge community statistics into the registry identity. Transfer
        // failure does not fail the claim.
        let mut transferred_stats = None;
        if request.transfer_stats {
            match self
                .stats
                .transfer(&server_id, &server_id, Source::Community, Source::Registry)
                .await
            {
                Ok(()) => {
                    transferred_stats = self
                        .stats
                        .get(&server_id, SourceSelector::One(Source::Registry))
                        .await
                        .ok();
                    state = ClaimState::StatsTransferred;
                    debug!(%server_id, claim_state = %state, "stats transferred");
                }
                Err(err) => {
                    warn!(%server_id, error = %err, "failed to transfer stats during claim");
                }
            }
        }

        let registry_stats = self
            .stats
            .get(&server_id, SourceSelector::One(Source::Registry))
            .await
            .ok();
        let extended = ExtendedServer::new(record, registry_stats.as_ref());

        state = ClaimState::Done;
        debug!(%server_id, claim_state = %state, "claim complete");

        Ok(ClaimResponse {
            success: true,
            server_id,
            message: Some("Server successfully claimed".into()),
            transferred_stats,
            new_server: Some(extended),
        })
    }
}

fn validate_publish_request(request: &PublishRequest) -> Result<(), ApiError> {
    if request.name.is_empty() {
        return Err(ApiError::BadRequest("name is required".into()));
    }
    if request.description.is_empty() {
        return Err(ApiError::BadRequest("description is required".into()));
    }
    if request.repository.url.is_empty() {
        return Err(ApiError::BadRequest("repository URL is required".into()));
    }
    Ok(())
}

/// Build the `io.github.{owner}/{repo}` reference checked by the auth
/// provider from a repository URL.
fn repo_ref(repo_url: &str) -> String {
    let mut parts = repo_url.trim_end_matches('/').rsplit('/');
    let repo = parts.next().unwrap_or_default().trim_end_matches(".git");
    let owner = parts.next().unwrap_or_default();
    if repo_url.contains("github.com") && !owner.is_empty() && !repo.is_empty() {
        format!("io.github.{owner}/{repo}")
    } else {
        repo_url.to_string()
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<String, ApiError> {
    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Authorization required".into()))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("Invalid authorization format".into()))?;
    Ok(token.to_string())
}

/// POST /vp/servers/{id}/claim
pub async fn claim_server(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<ClaimResponse>, ApiError> {
    let token = bearer_token(&headers)?;
    let response = state.claims.claim(&server_id, &token, request).await?;

    // Both statistical identities changed; drop every affected key.
    invalidate_server_caches(&state.cache, &response.server_id);
    invalidate_source_caches(&state.cache, &response.server_id, Source::Community);
    invalidate_source_caches(&state.cache, &response.server_id, Source::Registry);

    Ok(Json(response))
}

/// POST /vp/claim/verify
pub async fn generate_verification(
    State(_state): State<AppState>,
    Json(request): Json<ClaimVerificationRequest>,
) -> Result<Json<ClaimVerificationResponse>, ApiError> {
    sanitize_id(&request.server_id).map_err(ApiError::from)?;

    let mut code_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut code_bytes);
    let verification_code: String = code_bytes.iter().map(|b| format!("{b:02x}")).collect();

    let expires_at = (Utc::now() + chrono::Duration::seconds(VERIFICATION_CODE_TTL_SECS)).timestamp();

    Ok(Json(ClaimVerificationResponse {
        instructions: format!(
            "Add a file named '.mcp-claim-verification' to the root of your repository \
             with the following content:\n{verification_code}\n\nThis code expires in 15 minutes.",
        ),
        verification_code,
        expires_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_ref_from_github_url() {
        assert_eq!(
            repo_ref("https://github.com/alice/tool"),
            "io.github.alice/tool"
        );
        assert_eq!(
            repo_ref("https://github.com/alice/tool.git"),
            "io.github.alice/tool"
        );
        assert_eq!(
            repo_ref("https://gitlab.com/alice/tool"),
            "https://gitlab.com/alice/tool"
        );
    }

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        headers.insert("authorization", "Token abc".parse().unwrap());
        assert!(bearer_token(&headers).is_err());

        headers.insert("authorization", "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "abc");
    }

    #[test]
    fn publish_request_requires_core_fields() {
        let mut request = PublishRequest {
            name: "tool".into(),
            description: "a tool".into(),
            repository: pulse_core::Repository {
                url: "https://github.com/alice/tool".into(),
                ..Default::default()
            },
            version: None,
            packages: None,
            remotes: None,
        };
        assert!(validate_publish_request(&request).is_ok());

        request.name.clear();
        assert!(validate_publish_request(&request).is_err());
    }
}
