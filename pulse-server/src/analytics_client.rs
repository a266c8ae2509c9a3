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

//! Read-through client for the external analytics service.
//!
//! Optional: when no base URL is configured the client is absent and read
//! paths go straight to the local stores. The client never caches; caching
//! is the handlers' concern.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use pulse_core::{ActivityEvent, DashboardMetrics, Period, Result, StoreError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-server metrics as reported by the analytics service.
#[derive(Debug, Clone)]
pub struct ServerAnalyticsMetrics {
    pub server_id: String,
    pub active_installs: u64,
    pub daily_active_users: u64,
    pub monthly_active_users: u64,
    pub weekly_growth: f64,
    pub last_updated: chrono::DateTime<Utc>,
}

/// External analytics operations used by the read paths.
#[async_trait]
pub trait AnalyticsClient: Send + Sync {
    async fn server_metrics(&self, server_id: &str) -> Result<ServerAnalyticsMetrics>;

    /// Batch fetch; on any batch failure the client falls back to
    /// individual fetches and returns what it could gather.
    async fn batch_server_metrics(
        &self,
        server_ids: &[String],
    ) -> Result<HashMap<String, ServerAnalyticsMetrics>>;

    async fn dashboard_metrics(&self, period: Period) -> Result<DashboardMetrics>;

    async fn recent_activity(&self, limit: usize) -> Result<Vec<ActivityEvent>>;
}

/// Wire shape of the analytics service's per-server stats payload.
#[derive(Debug, Deserialize)]
struct WireServerStats {
    #[serde(default)]
    server_id: String,
    #[serde(default)]
    installation_count: u64,
    #[serde(default)]
    daily_active_users: u64,
    #[serde(default)]
    weekly_growth_rate: f64,
}

impl WireServerStats {
    fn into_metrics(self) -> ServerAnalyticsMetrics {
        ServerAnalyticsMetrics {
            server_id: self.server_id,
            active_installs: self.installation_count,
            daily_active_users: self.daily_active_users,
            // Rough estimate until the service reports MAU directly.
            monthly_active_users: self.daily_active_users * 30,
            weekly_growth: self.weekly_growth_rate,
            last_updated: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireBatchResponse {
    #[serde(default)]
    stats: HashMap<String, WireServerStats>,
}

#[derive(Debug, Deserialize)]
struct WireActivityResponse {
    #[serde(default)]
    activity: Vec<ActivityEvent>,
}

/// HTTP implementation with optional Basic auth.
pub struct HttpAnalyticsClient {
    base_url: String,
    client: reqwest::Client,
    basic_auth: Option<(String, String)>,
}

impl HttpAnalyticsClient {
    pub fn new(
        base_url: impl Into<String>,
        basic_auth: Option<(String, String)>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Internal(format!("failed to build http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            basic_auth,
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.basic_auth {
            Some((user, pass)) => builder.basic_auth(user, Some(pass)),
            None => builder,
        }
    }

    async fn fetch_individual(
        &self,
        server_ids: &[String],
    ) -> HashMap<String, ServerAnalyticsMetrics> {
        let mut results = HashMap::new();
        for server_id in server_ids {
            if let Ok(metrics) = self.server_metrics(server_id).await {
                results.insert(server_id.clone(), metrics);
            }
        }
        results
    }
}

fn unavailable(err: reqwest::Error) -> StoreError {
    StoreError::DependencyUnavailable(err.to_string())
}

#[async_trait]
impl AnalyticsClient for HttpAnalyticsClient {
    async fn server_metrics(&self, server_id: &str) -> Result<ServerAnalyticsMetrics> {
        let url = format!("{}/servers/{}/stats", self.base_url, server_id);
        let response = self
            .request(self.client.get(&url))
            .send()
            .await
            .map_err(unavailable)?;

        if !response.status().is_success() {
            return Err(StoreError::DependencyUnavailable(format!(
                "unexpected status code: {}",
                response.status()
            )));
        }

        let wire: WireServerStats = response.json().await.map_err(unavailable)?;
        Ok(wire.into_metrics())
    }

    async fn batch_server_metrics(
        &self,
        server_ids: &[String],
    ) -> Result<HashMap<String, ServerAnalyticsMetrics>> {
        if server_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let url = format!("{}/servers/stats/batch", self.base_url);
        let body = serde_json::json!({ "server_ids": server_ids });

        let response = match self.request(self.client.post(&url).json(&body)).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                debug!(status = %resp.status(), "batch stats failed, fetching individually");
                return Ok(self.fetch_individual(server_ids).await);
            }
            Err(err) => {
                debug!(error = %err, "batch stats failed, fetching individually");
                return Ok(self.fetch_individual(server_ids).await);
            }
        };

        let wire: WireBatchResponse = response.json().await.map_err(unavailable)?;
        Ok(wire
            .stats
            .into_iter()
            .map(|(id, stats)| (id, stats.into_metrics()))
            .collect())
    }

    async fn dashboard_metrics(&self, period: Period) -> Result<DashboardMetrics> {
        let url = format!("{}/dashboard?period={}", self.base_url, period);
        let response = self
            .request(self.client.get(&url))
            .send()
            .await
            .map_err(unavailable)?;

        if !response.status().is_success() {
            return Err(StoreError::DependencyUnavailable(format!(
                "unexpected status code: {}",
                response.status()
            )));
        }

        response.json().await.map_err(unavailable)
    }

    async fn recent_activity(&self, limit: usize) -> Result<Vec<ActivityEvent>> {
        let url = format!("{}/events/recent?limit={}", self.base_url, limit);
        let response = self
            .request(self.client.get(&url))
            .send()
            .await
            .map_err(unavailable)?;

        if !response.status().is_success() {
            return Err(StoreError::DependencyUnavailable(format!(
                "unexpected status code: {}",
                response.status()
            )));
        }

        let wire: WireActivityResponse = response.json().await.map_err(unavailable)?;
        Ok(wire.activity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_stats_estimate_mau() {
        let wire = WireServerStats {
            server_id: "srv".into(),
            installation_count: 40,
            daily_active_users: 7,
            weekly_growth_rate: 3.5,
        };
        let metrics = wire.into_metrics();
        assert_eq!(metrics.active_installs, 40);
        assert_eq!(metrics.monthly_active_users, 210);
        assert!((metrics.weekly_growth - 3.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unreachable_host_is_dependency_unavailable() {
        // Port 1 refuses connections immediately.
        let client = HttpAnalyticsClient::new("http://127.0.0.1:1", None).unwrap();
        let err = client.server_metrics("srv").await.unwrap_err();
        assert!(matches!(err, StoreError::DependencyUnavailable(_)));

        let err = client.dashboard_metrics(Period::Day).await.unwrap_err();
        assert!(matches!(err, StoreError::DependencyUnavailable(_)));
    }

    #[tokio::test]
    async fn batch_falls_back_to_individual_fetches() {
        let client = HttpAnalyticsClient::new("http://127.0.0.1:1", None).unwrap();
        // Both the batch and the individual fetches fail; the fallback
        // yields an empty map rather than an error.
        let results = client
            .batch_server_metrics(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn empty_batch_short_circuits() {
        let client = HttpAnalyticsClient::new("http://127.0.0.1:1", None).unwrap();
        let results = client.batch_server_metrics(&[]).await.unwrap();
        assert!(results.is_empty());
    }
}
