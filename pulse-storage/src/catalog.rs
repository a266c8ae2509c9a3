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

//! Server catalog collaborator.
//!
//! The catalog is owned by the base registry; the stats plane reads entries
//! to decorate them with statistics and upserts entries during claims. The
//! in-memory backend also supports a one-shot JSON seed import at startup.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use pulse_core::{Result, ServerRecord, StoreError};

/// Catalog operations the stats plane relies on.
#[async_trait]
pub trait ServerCatalog: Send + Sync {
    async fn get(&self, server_id: &str) -> Result<ServerRecord>;

    /// Up to `limit` catalog entries, ordered by id for stable pagination.
    async fn list(&self, limit: usize) -> Result<Vec<ServerRecord>>;

    /// Create or replace a catalog entry (claim upsert path).
    async fn publish(&self, record: ServerRecord) -> Result<()>;
}

/// In-memory catalog backend.
pub struct MemoryCatalog {
    servers: DashMap<String, ServerRecord>,
}

impl MemoryCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            servers: DashMap::new(),
        })
    }

    /// Import a JSON array of catalog entries. Returns the number imported.
    pub async fn import_seed(&self, path: impl AsRef<Path>) -> Result<usize> {
        let raw = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| StoreError::Internal(format!("failed to read seed file: {e}")))?;
        let records: Vec<ServerRecord> = serde_json::from_str(&raw)
            .map_err(|e| StoreError::InvalidInput(format!("invalid seed file: {e}")))?;

        let count = records.len();
        for record in records {
            if record.id.is_empty() {
                return Err(StoreError::InvalidInput(
                    "seed entry is missing an id".into(),
                ));
            }
            self.servers.insert(record.id.clone(), record);
        }
        info!(count, "seed import complete");
        Ok(count)
    }
}

#[async_trait]
impl ServerCatalog for MemoryCatalog {
    async fn get(&self, server_id: &str) -> Result<ServerRecord> {
        self.servers
            .get(server_id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn list(&self, limit: usize) -> Result<Vec<ServerRecord>> {
        let mut records: Vec<ServerRecord> = self
            .servers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records.truncate(limit);
        Ok(records)
    }

    async fn publish(&self, record: ServerRecord) -> Result<()> {
        if record.id.is_empty() {
            return Err(StoreError::InvalidInput("server id is required".into()));
        }
        self.servers.insert(record.id.clone(), record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_get() {
        let catalog = MemoryCatalog::new();
        catalog
            .publish(ServerRecord {
                id: "srv".into(),
                name: "Server".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let record = catalog.get("srv").await.unwrap();
        assert_eq!(record.name, "Server");
        assert!(matches!(
            catalog.get("missing").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn list_is_ordered_and_limited() {
        let catalog = MemoryCatalog::new();
        for id in ["c", "a", "b"] {
            catalog
                .publish(ServerRecord {
                    id: id.into(),
                    name: id.to_uppercase(),
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let records = catalog.list(2).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "a");
        assert_eq!(records[1].id, "b");
    }

    #[tokio::test]
    async fn seed_import_round_trip() {
        let dir = std::env::temp_dir().join(format!("pulse-seed-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("seed.json");
        tokio::fs::write(
            &path,
            r#"[{"id": "one", "name": "One"}, {"id": "two", "name": "Two"}]"#,
        )
        .await
        .unwrap();

        let catalog = MemoryCatalog::new();
        let imported = catalog.import_seed(&path).await.unwrap();
        assert_eq!(imported, 2);
        assert_eq!(catalog.get("two").await.unwrap().name, "Two");

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn seed_import_rejects_bad_json() {
        let dir = std::env::temp_dir().join(format!("pulse-seed-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("seed.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        let catalog = MemoryCatalog::new();
        assert!(catalog.import_seed(&path).await.is_err());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
