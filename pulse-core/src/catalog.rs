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

//! Catalog entities. Servers are owned by the base registry; the stats
//! plane only references them by id and decorates them with statistics.

use crate::stats::ServerStats;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Source repository reference for a catalog entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Repository {
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
}

/// A catalog entry as owned by the base registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub repository: Repository,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remotes: Option<Value>,
}

/// Body of a publish (and thus claim) request against the catalog.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublishRequest {
    pub name: String,
    pub description: String,
    pub repository: Repository,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remotes: Option<Value>,
}

/// A catalog entry decorated with its statistics for `/vp` responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendedServer {
    #[serde(flatten)]
    pub server: ServerRecord,
    pub install_count: u64,
    pub rating: f64,
    pub rating_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_installs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekly_growth: Option<f64>,
}

impl ExtendedServer {
    pub fn new(server: ServerRecord, stats: Option<&ServerStats>) -> Self {
        match stats {
            Some(s) => Self {
                server,
                install_count: s.install_count,
                rating: s.rating,
                rating_count: s.rating_count,
                active_installs: s.active_installs,
                weekly_growth: None,
            },
            None => Self {
                server,
                install_count: 0,
                rating: 0.0,
                rating_count: 0,
                active_installs: None,
                weekly_growth: None,
            },
        }
    }

    /// Decorate a set of catalog entries with their stats, preserving order.
    pub fn from_servers(
        servers: Vec<ServerRecord>,
        stats: &HashMap<String, ServerStats>,
    ) -> Vec<Self> {
        servers
            .into_iter()
            .map(|server| {
                let s = stats.get(&server.id);
                ExtendedServer::new(server, s)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Source;

    #[test]
    fn extended_server_flattens_record_fields() {
        let record = ServerRecord {
            id: "srv".into(),
            name: "Server".into(),
            ..Default::default()
        };
        let mut stats = ServerStats::empty("srv", Source::Registry);
        stats.install_count = 7;
        let extended = ExtendedServer::new(record, Some(&stats));
        let json = serde_json::to_value(&extended).unwrap();
        assert_eq!(json["id"], "srv");
        assert_eq!(json["install_count"], 7);
    }

    #[test]
    fn missing_stats_zero_fill() {
        let extended = ExtendedServer::new(ServerRecord::default(), None);
        assert_eq!(extended.install_count, 0);
        assert_eq!(extended.rating_count, 0);
    }
}
