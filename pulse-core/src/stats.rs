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

//! Per-source server statistics.

use crate::source::Source;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Statistics for a single `(server_id, source)` pair.
///
/// Invariants: `rating == 0.0` iff `rating_count == 0`;
/// `first_seen <= last_updated`; counters never decrease except through an
/// explicit claim transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStats {
    pub server_id: String,
    pub source: Source,
    pub install_count: u64,
    pub rating: f64,
    pub rating_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,

    // Analytics-derived metrics, synced from the analytics service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_installs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_active_users: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_active_users: Option<u64>,

    // Claim audit trail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_from: Option<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_to: Option<String>,
}

impl ServerStats {
    /// Zeroed default returned for servers with no recorded activity.
    pub fn empty(server_id: impl Into<String>, source: Source) -> Self {
        let now = Utc::now();
        Self {
            server_id: server_id.into(),
            source,
            install_count: 0,
            rating: 0.0,
            rating_count: 0,
            first_seen: now,
            last_updated: now,
            active_installs: None,
            daily_active_users: None,
            monthly_active_users: None,
            claimed_from: None,
            claimed_at: None,
            claimed_to: None,
        }
    }

    /// Fold one rating sample into the running mean.
    pub fn apply_rating(&mut self, rating: f64, now: DateTime<Utc>) {
        let total = self.rating * self.rating_count as f64 + rating;
        self.rating_count += 1;
        self.rating = total / self.rating_count as f64;
        self.last_updated = now;
    }
}

/// Combined statistics across every source a server appears under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedStats {
    pub server_id: String,
    pub total_installs: u64,
    pub average_rating: f64,
    pub total_rating_count: u64,
    pub source_breakdown: HashMap<Source, ServerStats>,
    pub last_updated: DateTime<Utc>,
}

/// Aggregate statistics for the whole registry (optionally source-scoped).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_servers: u64,
    pub total_installs: u64,
    pub active_servers: u64,
    pub average_rating: f64,
    pub last_updated: DateTime<Utc>,
}

/// Body of `POST /vp/servers/{id}/install`; every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstallRequest {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Body of `POST /vp/servers/{id}/rate`.
#[derive(Debug, Clone, Deserialize)]
pub struct RatingRequest {
    pub rating: f64,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// One analytics-derived bulk update applied by `sync_analytics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsUpdate {
    pub server_id: String,
    #[serde(default)]
    pub active_installs: Option<u64>,
    #[serde(default)]
    pub daily_active_users: Option<u64>,
    #[serde(default)]
    pub monthly_active_users: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stats_hold_invariants() {
        let stats = ServerStats::empty("foo", Source::Registry);
        assert_eq!(stats.install_count, 0);
        assert_eq!(stats.rating_count, 0);
        assert_eq!(stats.rating, 0.0);
        assert!(stats.first_seen <= stats.last_updated);
    }

    #[test]
    fn running_mean_converges() {
        let mut stats = ServerStats::empty("foo", Source::Registry);
        for r in [5.0, 3.0, 4.0] {
            stats.apply_rating(r, Utc::now());
        }
        assert_eq!(stats.rating_count, 3);
        assert!((stats.rating - 4.0).abs() < 1e-6);
    }

    #[test]
    fn optional_fields_stay_off_the_wire() {
        let stats = ServerStats::empty("foo", Source::Community);
        let json = serde_json::to_value(&stats).unwrap();
        assert!(json.get("active_installs").is_none());
        assert!(json.get("claimed_from").is_none());
        assert_eq!(json["source"], "COMMUNITY");
    }
}
