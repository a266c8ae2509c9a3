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

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Backing store for the catalog and the derived stats collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Memory,
    MongoDb,
}

/// Pulse server configuration, read from the environment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// HTTP listen address.
    pub server_addr: String,

    pub database_kind: DatabaseKind,
    /// Connection string; mandatory for the document backend.
    pub database_url: Option<String>,
    pub database_name: String,
    /// Catalog collection; the stats collections derive their names.
    pub collection_name: String,

    /// Base URL of the external analytics service; enables the
    /// read-through client when set.
    pub analytics_base_url: Option<String>,
    pub analytics_user: Option<String>,
    pub analytics_pass: Option<String>,

    pub cache_ttl_secs: u64,

    /// Comma-separated CORS origin allow-list; empty disables CORS.
    pub cors_origins: Vec<String>,

    pub seed_import: bool,
    pub seed_file_path: Option<String>,

    /// `token:user` pairs accepted by the claim auth service.
    pub claim_tokens: Vec<(String, String)>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8080".to_string(),
            database_kind: DatabaseKind::Memory,
            database_url: None,
            database_name: "pulse".to_string(),
            collection_name: "servers".to_string(),
            analytics_base_url: None,
            analytics_user: None,
            analytics_pass: None,
            cache_ttl_secs: 300,
            cors_origins: Vec::new(),
            seed_import: false,
            seed_file_path: None,
            claim_tokens: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Recognized variables:
    /// - PULSE_SERVER_ADDR: listen address (default 127.0.0.1:8080)
    /// - PULSE_DATABASE_TYPE: memory | mongodb (default memory)
    /// - PULSE_DATABASE_URL: connection string for the document backend
    /// - PULSE_DATABASE_NAME, PULSE_COLLECTION_NAME
    /// - PULSE_ANALYTICS_URL, PULSE_ANALYTICS_USER, PULSE_ANALYTICS_PASS
    /// - PULSE_CACHE_TTL_SECS (default 300)
    /// - PULSE_CORS_ORIGINS: comma-separated origin allow-list
    /// - PULSE_SEED_IMPORT, PULSE_SEED_FILE_PATH
    /// - PULSE_CLAIM_TOKENS: comma-separated token:user pairs
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("PULSE_SERVER_ADDR") {
            config.server_addr = addr;
        }
        if let Ok(kind) = std::env::var("PULSE_DATABASE_TYPE") {
            config.database_kind = match kind.to_lowercase().as_str() {
                "mongodb" => DatabaseKind::MongoDb,
                _ => DatabaseKind::Memory,
            };
        }
        if let Ok(url) = std::env::var("PULSE_DATABASE_URL") {
            config.database_url = Some(url);
        }
        if let Ok(name) = std::env::var("PULSE_DATABASE_NAME") {
            config.database_name = name;
        }
        if let Ok(name) = std::env::var("PULSE_COLLECTION_NAME") {
            config.collection_name = name;
        }
        if let Ok(url) = std::env::var("PULSE_ANALYTICS_URL") {
            if !url.is_empty() {
                config.analytics_base_url = Some(url);
            }
        }
        if let Ok(user) = std::env::var("PULSE_ANALYTICS_USER") {
            config.analytics_user = Some(user);
        }
        if let Ok(pass) = std::env::var("PULSE_ANALYTICS_PASS") {
            config.analytics_pass = Some(pass);
        }
        if let Ok(ttl) = std::env::var("PULSE_CACHE_TTL_SECS") {
            if let Ok(secs) = ttl.parse() {
                config.cache_ttl_secs = secs;
            }
        }
        if let Ok(origins) = std::env::var("PULSE_CORS_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(flag) = std::env::var("PULSE_SEED_IMPORT") {
            config.seed_import = flag.parse().unwrap_or(false);
        }
        if let Ok(path) = std::env::var("PULSE_SEED_FILE_PATH") {
            config.seed_file_path = Some(path);
        }
        if let Ok(tokens) = std::env::var("PULSE_CLAIM_TOKENS") {
            config.claim_tokens = tokens
                .split(',')
                .filter_map(|pair| {
                    let (token, user) = pair.trim().split_once(':')?;
                    Some((token.to_string(), user.to_string()))
                })
                .collect();
        }

        config
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(self.server_addr.parse()?)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Validate configuration; failures here are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if self.database_kind == DatabaseKind::MongoDb && self.database_url.is_none() {
            anyhow::bail!("PULSE_DATABASE_URL is required for the mongodb backend");
        }
        if self.seed_import && self.seed_file_path.is_none() {
            anyhow::bail!("PULSE_SEED_FILE_PATH is required when seed import is enabled");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn mongodb_without_url_is_rejected() {
        let config = ServerConfig {
            database_kind: DatabaseKind::MongoDb,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn seed_import_requires_path() {
        let config = ServerConfig {
            seed_import: true,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_listen_addr_is_rejected() {
        let config = ServerConfig {
            server_addr: "not-an-addr".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
