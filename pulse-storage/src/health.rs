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

//! Periodic health probing of registered server endpoints.
//!
//! A ticker-driven task probes all registered targets concurrently, writes
//! per-server health records, and appends response-time samples that the
//! analytics store later turns into percentiles. Recording is best-effort;
//! probe failures never propagate.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Probe classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Slow,
    Degraded,
    Down,
    Unknown,
}

impl HealthStatus {
    /// Availability score derived from the current status. Placeholder for a
    /// true rolling computation over historical checks.
    pub fn availability(self) -> f64 {
        match self {
            HealthStatus::Healthy => 99.9,
            HealthStatus::Slow => 95.0,
            HealthStatus::Degraded => 75.0,
            HealthStatus::Down => 0.0,
            HealthStatus::Unknown => 50.0,
        }
    }
}

/// A registered health probe target.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    pub server_id: String,
    pub url: String,
    pub timeout: Duration,
}

/// Current health record for one server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerHealth {
    pub server_id: String,
    pub status: HealthStatus,
    pub response_time: f64,
    pub availability: f64,
    pub last_health_check: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone)]
struct ResponseSample {
    endpoint: String,
    response_time: f64,
    timestamp: DateTime<Utc>,
}

/// Background health monitor with an explicit stop handle.
pub struct HealthMonitor {
    probes: RwLock<HashMap<String, HealthProbe>>,
    records: DashMap<String, ServerHealth>,
    samples: RwLock<Vec<ResponseSample>>,
    client: reqwest::Client,
    check_interval: Duration,
    stop_tx: watch::Sender<bool>,
}

impl HealthMonitor {
    pub fn new(check_interval: Duration) -> Arc<Self> {
        let (stop_tx, _) = watch::channel(false);
        Arc::new(Self {
            probes: RwLock::new(HashMap::new()),
            records: DashMap::new(),
            samples: RwLock::new(Vec::new()),
            client: reqwest::Client::new(),
            check_interval,
            stop_tx,
        })
    }

    /// Spawn the ticker task. An initial sweep runs immediately.
    pub fn start(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();
        tokio::spawn(async move {
            monitor.run_checks().await;
            let mut ticker = tokio::time::interval(monitor.check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => monitor.run_checks().await,
                    _ = stop_rx.changed() => return,
                }
            }
        });
    }

    /// Stop the ticker task.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn register(&self, server_id: impl Into<String>, url: impl Into<String>) {
        let server_id = server_id.into();
        self.probes.write().insert(
            server_id.clone(),
            HealthProbe {
                server_id,
                url: url.into(),
                timeout: DEFAULT_PROBE_TIMEOUT,
            },
        );
    }

    pub fn unregister(&self, server_id: &str) {
        self.probes.write().remove(server_id);
    }

    async fn run_checks(&self) {
        let targets: Vec<HealthProbe> = self.probes.read().values().cloned().collect();
        if targets.is_empty() {
            return;
        }
        debug!(targets = targets.len(), "running health checks");

        let checks = targets.into_iter().map(|probe| self.check_one(probe));
        futures::future::join_all(checks).await;
    }

    async fn check_one(&self, probe: HealthProbe) {
        let start = Instant::now();
        let response = self
            .client
            .get(&probe.url)
            .timeout(probe.timeout)
            .send()
            .await;
        let elapsed_ms = start.elapsed().as_millis() as f64;

        let (status, message) = match response {
            Ok(resp) => {
                let code = resp.status().as_u16();
                if code >= 500 {
                    (HealthStatus::Down, format!("HTTP {code}"))
                } else if code >= 400 {
                    (HealthStatus::Degraded, format!("HTTP {code}"))
                } else if elapsed_ms > 1000.0 {
                    (HealthStatus::Slow, format!("HTTP {code} (slow response)"))
                } else {
                    (HealthStatus::Healthy, format!("HTTP {code}"))
                }
            }
            Err(err) => {
                warn!(server_id = %probe.server_id, error = %err, "health probe failed");
                (HealthStatus::Down, err.to_string())
            }
        };

        self.record_check(&probe.server_id, status, elapsed_ms, message);
    }

    fn record_check(&self, server_id: &str, status: HealthStatus, response_time: f64, message: String) {
        self.records.insert(
            server_id.to_string(),
            ServerHealth {
                server_id: server_id.to_string(),
                status,
                response_time,
                availability: status.availability(),
                last_health_check: Utc::now(),
                message,
            },
        );
        self.record_response_time(server_id, response_time);
    }

    /// Append a response-time sample. Also used by the API middleware for
    /// endpoint latency; recording is fire-and-forget.
    pub fn record_response_time(&self, endpoint: &str, response_time: f64) {
        self.samples.write().push(ResponseSample {
            endpoint: endpoint.to_string(),
            response_time,
            timestamp: Utc::now(),
        });
    }

    /// Current health record for a server; `unknown` when never probed.
    pub fn server_health(&self, server_id: &str) -> ServerHealth {
        self.records
            .get(server_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| ServerHealth {
                server_id: server_id.to_string(),
                status: HealthStatus::Unknown,
                response_time: 0.0,
                availability: 0.0,
                last_health_check: Utc::now(),
                message: String::new(),
            })
    }

    /// Response-time percentiles over `window`, optionally scoped to one
    /// endpoint. Returns zeros when no samples are in range.
    pub fn percentiles(&self, endpoint: &str, window: Duration) -> (f64, f64, f64) {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::hours(24));

        let mut times: Vec<f64> = self
            .samples
            .read()
            .iter()
            .filter(|s| s.timestamp >= cutoff && (endpoint.is_empty() || s.endpoint == endpoint))
            .map(|s| s.response_time)
            .collect();

        if times.is_empty() {
            return (0.0, 0.0, 0.0);
        }
        times.sort_by(f64::total_cmp);

        (
            percentile(&times, 50.0),
            percentile(&times, 90.0),
            percentile(&times, 99.0),
        )
    }

    /// Average availability across monitored servers; 99.9 with no data.
    pub fn uptime(&self) -> f64 {
        if self.records.is_empty() {
            return 99.9;
        }
        let (sum, count) = self
            .records
            .iter()
            .fold((0.0, 0u32), |(sum, count), entry| {
                (sum + entry.value().availability, count + 1)
            });
        sum / f64::from(count)
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((sorted.len() - 1) as f64 * p / 100.0).floor() as usize;
    sorted[index]
}

/// Dashboard health composite: uptime minus a latency penalty, floored at 0.
pub fn health_score(uptime: f64, p50: f64) -> f64 {
    let penalty = if p50 > 100.0 { (p50 - 100.0) / 10.0 } else { 0.0 };
    (uptime - penalty).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_server_has_unknown_status() {
        let monitor = HealthMonitor::new(DEFAULT_CHECK_INTERVAL);
        let health = monitor.server_health("ghost");
        assert_eq!(health.status, HealthStatus::Unknown);
    }

    #[tokio::test]
    async fn percentiles_from_samples() {
        let monitor = HealthMonitor::new(DEFAULT_CHECK_INTERVAL);
        for ms in [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0] {
            monitor.record_response_time("api", ms);
        }

        let (p50, p90, p99) = monitor.percentiles("", Duration::from_secs(3600));
        assert_eq!(p50, 50.0);
        assert_eq!(p90, 90.0);
        assert_eq!(p99, 90.0);
    }

    #[tokio::test]
    async fn percentiles_empty_window_is_zero() {
        let monitor = HealthMonitor::new(DEFAULT_CHECK_INTERVAL);
        let (p50, p90, p99) = monitor.percentiles("", Duration::from_secs(60));
        assert_eq!((p50, p90, p99), (0.0, 0.0, 0.0));
    }

    #[tokio::test]
    async fn uptime_defaults_without_data() {
        let monitor = HealthMonitor::new(DEFAULT_CHECK_INTERVAL);
        assert_eq!(monitor.uptime(), 99.9);

        monitor.record_check("a", HealthStatus::Healthy, 12.0, "HTTP 200".into());
        monitor.record_check("b", HealthStatus::Down, 0.0, "connect error".into());
        let uptime = monitor.uptime();
        assert!((uptime - (99.9 / 2.0)).abs() < 1e-6);
    }

    #[test]
    fn availability_table() {
        assert_eq!(HealthStatus::Healthy.availability(), 99.9);
        assert_eq!(HealthStatus::Slow.availability(), 95.0);
        assert_eq!(HealthStatus::Degraded.availability(), 75.0);
        assert_eq!(HealthStatus::Down.availability(), 0.0);
        assert_eq!(HealthStatus::Unknown.availability(), 50.0);
    }

    #[test]
    fn health_score_penalizes_latency() {
        assert_eq!(health_score(99.9, 50.0), 99.9);
        assert!((health_score(99.9, 200.0) - 89.9).abs() < 1e-6);
        assert_eq!(health_score(10.0, 5000.0), 0.0);
    }

    #[tokio::test]
    async fn register_and_unregister_probes() {
        let monitor = HealthMonitor::new(DEFAULT_CHECK_INTERVAL);
        monitor.register("srv", "http://localhost:9/health");
        assert_eq!(monitor.probes.read().len(), 1);
        monitor.unregister("srv");
        assert!(monitor.probes.read().is_empty());
    }
}
