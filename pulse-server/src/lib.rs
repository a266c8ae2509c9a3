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

//! Pulse Server
//!
//! HTTP statistics and analytics plane for an MCP server registry, served
//! under the `/vp` namespace.

pub mod analytics_client;
pub mod api;
pub mod auth;
pub mod claim;
pub mod config;
pub mod middleware;

use anyhow::Result;
use axum::extract::Request;
use axum::http::{header, HeaderValue, Method};
use axum::middleware as axum_middleware;
use axum::routing::{get, post, put};
use axum::{Router, ServiceExt};
use std::sync::Arc;
use std::time::Duration;
use tower::Layer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::normalize_path::NormalizePathLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pulse_storage::health::DEFAULT_CHECK_INTERVAL;
use pulse_storage::{
    AnalyticsStore, FeedbackStore, HealthMonitor, MemoryAnalyticsStore, MemoryCatalog,
    MemoryFeedbackStore, MemoryStatsStore, ServerCatalog, StatsStore, TtlCache,
};

use crate::analytics_client::{AnalyticsClient, HttpAnalyticsClient};
use crate::api::AppState;
use crate::auth::StaticTokenAuth;
use crate::claim::ClaimCoordinator;
use crate::config::{DatabaseKind, ServerConfig};

const SEED_IMPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Wire the stores and collaborators described by the configuration.
///
/// Must be called from within a tokio runtime: the cache spawns its sweeper
/// here. The health monitor is created but not started; `run_server` starts
/// it (tests usually leave it idle).
pub async fn build_state(config: &ServerConfig) -> Result<AppState> {
    if config.database_kind == DatabaseKind::MongoDb {
        anyhow::bail!(
            "the document-database backend is not available in this build; \
             set PULSE_DATABASE_TYPE=memory"
        );
    }

    let catalog = MemoryCatalog::new();
    if config.seed_import {
        if let Some(path) = &config.seed_file_path {
            match tokio::time::timeout(SEED_IMPORT_TIMEOUT, catalog.import_seed(path)).await {
                Ok(Ok(count)) => info!(count, path = %path, "seed data imported"),
                Ok(Err(err)) => warn!(path = %path, error = %err, "failed to import seed data"),
                Err(_) => warn!(path = %path, "seed import timed out"),
            }
        }
    }

    let stats = MemoryStatsStore::new();
    let feedback = MemoryFeedbackStore::new();
    let health = HealthMonitor::new(DEFAULT_CHECK_INTERVAL);
    let analytics = MemoryAnalyticsStore::new(
        stats.clone() as Arc<dyn StatsStore>,
        Arc::clone(&health),
    );
    let cache = TtlCache::new(config.cache_ttl());

    // One-shot migration for records predating the source field.
    match stats.migrate_legacy().await {
        Ok(0) => {}
        Ok(count) => info!(count, "migrated legacy stats records"),
        Err(err) => warn!(error = %err, "failed to migrate legacy stats"),
    }

    let analytics_client: Option<Arc<dyn AnalyticsClient>> = match &config.analytics_base_url {
        Some(url) => {
            let basic_auth = match (&config.analytics_user, &config.analytics_pass) {
                (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
                _ => None,
            };
            match HttpAnalyticsClient::new(url.clone(), basic_auth) {
                Ok(client) => {
                    info!(url = %url, "external analytics client enabled");
                    Some(Arc::new(client))
                }
                Err(err) => {
                    warn!(error = %err, "failed to build analytics client");
                    None
                }
            }
        }
        None => None,
    };

    let auth = Arc::new(StaticTokenAuth::new(config.claim_tokens.clone()));
    let catalog: Arc<dyn ServerCatalog> = catalog;
    let stats: Arc<dyn StatsStore> = stats;
    let feedback: Arc<dyn FeedbackStore> = feedback;
    let claims = ClaimCoordinator::new(
        Arc::clone(&catalog),
        Arc::clone(&stats),
        auth.clone(),
    );

    Ok(AppState {
        catalog,
        stats,
        feedback,
        analytics: Some(analytics as Arc<dyn AnalyticsStore>),
        analytics_client,
        cache,
        health,
        claims,
    })
}

/// Build the `/vp` router. Explicit routes keep the specific patterns ahead
/// of the `{id}` catch-all; analytics routes are registered only when the
/// analytics store is initialized.
pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/vp/servers", get(api::servers::list_servers))
        .route("/vp/servers/recent", get(api::recent::recent_servers))
        .route("/vp/servers/:id", get(api::servers::get_server))
        .route("/vp/servers/:id/install", post(api::stats::track_install))
        .route("/vp/servers/:id/rate", post(api::feedback::submit_feedback))
        .route("/vp/servers/:id/stats", get(api::stats::get_stats))
        .route("/vp/servers/:id/claim", post(claim::claim_server))
        .route("/vp/servers/:id/feedback", get(api::feedback::list_feedback))
        .route(
            "/vp/servers/:id/feedback/:fid",
            put(api::feedback::update_feedback).delete(api::feedback::delete_feedback),
        )
        .route(
            "/vp/servers/:id/rating/:user_id",
            get(api::feedback::user_feedback),
        )
        .route("/vp/stats/global", get(api::stats::global_stats))
        .route("/vp/stats/leaderboard", get(api::stats::leaderboard))
        .route("/vp/stats/trending", get(api::stats::trending))
        .route("/vp/claim/verify", post(claim::generate_verification))
        .route("/vp/admin/timeline", get(api::recent::server_timeline));

    if state.analytics.is_some() {
        app = app
            .route("/vp/analytics/dashboard", get(api::analytics::dashboard))
            .route("/vp/analytics/activity", get(api::analytics::activity_feed))
            .route("/vp/analytics/growth", get(api::analytics::growth))
            .route("/vp/analytics/api-metrics", get(api::analytics::api_metrics))
            .route("/vp/analytics/search", get(api::analytics::search_analytics))
            .route("/vp/analytics/time-series", get(api::analytics::time_series))
            .route("/vp/analytics/hot", get(api::analytics::hot_servers))
            .route("/vp/analytics", get(api::analytics::analytics_envelope));
    }

    app.layer(axum_middleware::from_fn_with_state(
        state.clone(),
        middleware::track_api_calls,
    ))
    .with_state(state)
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }

    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ACCEPT,
            header::CONTENT_TYPE,
            header::CONTENT_LENGTH,
            header::ACCEPT_ENCODING,
            header::AUTHORIZATION,
        ])
        .max_age(Duration::from_secs(86400));

    if origins.iter().any(|origin| origin == "*") {
        Some(layer.allow_origin(Any))
    } else {
        let allowed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        // Credentials are only allowed for explicitly matched origins.
        Some(
            layer
                .allow_origin(AllowOrigin::list(allowed))
                .allow_credentials(true),
        )
    }
}

/// Run the server until interrupted.
pub async fn run_server(config: ServerConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Pulse server");
    config.validate()?;

    let state = build_state(&config).await?;
    let cache = Arc::clone(&state.cache);
    let health = Arc::clone(&state.health);
    health.start();

    let mut app = router(state);
    if let Some(cors) = cors_layer(&config.cors_origins) {
        info!(origins = ?config.cors_origins, "CORS enabled");
        app = app.layer(cors);
    }
    let app = app.layer(TraceLayer::new_for_http());

    // Normalize trailing slashes before dispatch so /vp/servers/ and
    // /vp/servers match the same route.
    let app = NormalizePathLayer::trim_trailing_slash().layer(app);

    let addr = config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{addr}");

    axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    health.stop();
    cache.shutdown();
    info!("Server stopped");
    Ok(())
}
