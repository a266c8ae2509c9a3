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

//! Feedback store enforcing one public rating per
//! `(server_id, user_id, source)`.
//!
//! The uniqueness constraint lives here, not in the handlers, so two
//! racing creates surface as `DuplicateFeedback` for exactly one of them.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use pulse_core::validation::{sanitize_id, validate_comment, validate_rating};
use pulse_core::{FeedbackPage, FeedbackSort, Result, ServerFeedback, Source, StoreError};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// Feedback store contract.
#[async_trait]
pub trait FeedbackStore: Send + Sync {
    /// Insert new feedback; fails with `DuplicateFeedback` when the user has
    /// already rated this `(server, source)`.
    async fn create(&self, feedback: ServerFeedback) -> Result<()>;

    async fn get(&self, feedback_id: &str) -> Result<ServerFeedback>;

    /// Public feedback for a server, sorted and paginated.
    async fn list(
        &self,
        server_id: &str,
        source: Source,
        limit: usize,
        offset: usize,
        sort: FeedbackSort,
    ) -> Result<FeedbackPage>;

    /// A user's feedback for one server, if any.
    async fn get_user(
        &self,
        server_id: &str,
        user_id: &str,
        source: Source,
    ) -> Result<Option<ServerFeedback>>;

    /// Everything one user has submitted, newest first.
    async fn list_by_user(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ServerFeedback>>;

    /// Update rating and comment; matches on `(id, user_id)` and reports
    /// `NotFound` on any mismatch so existence is not leaked.
    async fn update(&self, feedback: ServerFeedback) -> Result<()>;

    /// Delete by id; same `(id, user_id)` matching rule as `update`.
    async fn delete(&self, feedback_id: &str, user_id: &str) -> Result<()>;

    /// Number of public feedback rows for a server.
    async fn count(&self, server_id: &str, source: Source) -> Result<usize>;
}

/// In-memory feedback store with a unique index over
/// `(server_id, user_id, source)`.
pub struct MemoryFeedbackStore {
    by_id: DashMap<String, ServerFeedback>,
    unique: DashMap<(String, String, Source), String>,
}

impl MemoryFeedbackStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            by_id: DashMap::new(),
            unique: DashMap::new(),
        })
    }

    fn clamp_page(limit: usize, offset: usize) -> (usize, usize) {
        let limit = if limit < 1 || limit > MAX_PAGE_SIZE {
            DEFAULT_PAGE_SIZE
        } else {
            limit
        };
        (limit, offset)
    }

    fn sort_rows(rows: &mut [ServerFeedback], sort: FeedbackSort) {
        match sort {
            FeedbackSort::Newest => rows.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            FeedbackSort::Oldest => rows.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            FeedbackSort::RatingHigh => rows.sort_by(|a, b| {
                b.rating
                    .total_cmp(&a.rating)
                    .then(b.created_at.cmp(&a.created_at))
            }),
            FeedbackSort::RatingLow => rows.sort_by(|a, b| {
                a.rating
                    .total_cmp(&b.rating)
                    .then(b.created_at.cmp(&a.created_at))
            }),
        }
    }
}

#[async_trait]
impl FeedbackStore for MemoryFeedbackStore {
    async fn create(&self, mut feedback: ServerFeedback) -> Result<()> {
        if feedback.server_id.is_empty() || feedback.user_id.is_empty() {
            return Err(StoreError::InvalidInput(
                "server_id and user_id are required".into(),
            ));
        }
        feedback.server_id = sanitize_id(&feedback.server_id)?;
        validate_rating(feedback.rating)?;
        validate_comment(&feedback.comment)?;

        if feedback.id.is_empty() {
            feedback.id = uuid::Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        feedback.created_at = now;
        feedback.updated_at = now;
        feedback.is_public = true;

        let key = (
            feedback.server_id.clone(),
            feedback.user_id.clone(),
            feedback.source,
        );
        // Reserving the unique index entry is the race arbiter; the loser of
        // two concurrent creates observes Occupied.
        match self.unique.entry(key) {
            Entry::Occupied(_) => return Err(StoreError::DuplicateFeedback),
            Entry::Vacant(slot) => {
                slot.insert(feedback.id.clone());
            }
        }
        self.by_id.insert(feedback.id.clone(), feedback);
        Ok(())
    }

    async fn get(&self, feedback_id: &str) -> Result<ServerFeedback> {
        self.by_id
            .get(feedback_id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn list(
        &self,
        server_id: &str,
        source: Source,
        limit: usize,
        offset: usize,
        sort: FeedbackSort,
    ) -> Result<FeedbackPage> {
        let server_id = sanitize_id(server_id)?;
        let (limit, offset) = Self::clamp_page(limit, offset);

        let mut rows: Vec<ServerFeedback> = self
            .by_id
            .iter()
            .filter(|entry| {
                let f = entry.value();
                f.server_id == server_id && f.source == source && f.is_public
            })
            .map(|entry| entry.value().clone())
            .collect();

        let total_count = rows.len();
        Self::sort_rows(&mut rows, sort);

        let page: Vec<ServerFeedback> = rows.into_iter().skip(offset).take(limit).collect();
        let has_more = offset + limit < total_count;

        Ok(FeedbackPage {
            feedback: page,
            total_count,
            has_more,
        })
    }

    async fn get_user(
        &self,
        server_id: &str,
        user_id: &str,
        source: Source,
    ) -> Result<Option<ServerFeedback>> {
        let server_id = sanitize_id(server_id)?;
        let key = (server_id, user_id.to_string(), source);
        let Some(id) = self.unique.get(&key).map(|entry| entry.value().clone()) else {
            return Ok(None);
        };
        Ok(self.by_id.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ServerFeedback>> {
        if user_id.is_empty() {
            return Err(StoreError::InvalidInput("user_id is required".into()));
        }
        let (limit, offset) = Self::clamp_page(limit, offset);

        let mut rows: Vec<ServerFeedback> = self
            .by_id
            .iter()
            .filter(|entry| entry.value().user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        Self::sort_rows(&mut rows, FeedbackSort::Newest);

        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn update(&self, feedback: ServerFeedback) -> Result<()> {
        if feedback.id.is_empty() {
            return Err(StoreError::InvalidInput("feedback ID is required".into()));
        }
        validate_rating(feedback.rating)?;
        validate_comment(&feedback.comment)?;

        let mut entry = self.by_id.get_mut(&feedback.id).ok_or(StoreError::NotFound)?;
        if entry.user_id != feedback.user_id {
            // Ownership mismatch is indistinguishable from absence.
            return Err(StoreError::NotFound);
        }
        entry.rating = feedback.rating;
        entry.comment = feedback.comment;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, feedback_id: &str, user_id: &str) -> Result<()> {
        if feedback_id.is_empty() || user_id.is_empty() {
            return Err(StoreError::InvalidInput(
                "feedback_id and user_id are required".into(),
            ));
        }

        let removed = self
            .by_id
            .remove_if(feedback_id, |_, f| f.user_id == user_id);
        match removed {
            Some((_, feedback)) => {
                self.unique.remove(&(
                    feedback.server_id.clone(),
                    feedback.user_id.clone(),
                    feedback.source,
                ));
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn count(&self, server_id: &str, source: Source) -> Result<usize> {
        let server_id = sanitize_id(server_id)?;
        Ok(self
            .by_id
            .iter()
            .filter(|entry| {
                let f = entry.value();
                f.server_id == server_id && f.source == source && f.is_public
            })
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<MemoryFeedbackStore> {
        MemoryFeedbackStore::new()
    }

    fn fb(server: &str, user: &str, rating: f64) -> ServerFeedback {
        ServerFeedback::new(server, user, Source::Registry, rating, "")
    }

    #[tokio::test]
    async fn create_and_get_user() {
        let store = store();
        store.create(fb("srv", "u1", 5.0)).await.unwrap();

        let found = store
            .get_user("srv", "u1", Source::Registry)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.rating, 5.0);
        assert!(found.is_public);

        let missing = store.get_user("srv", "u2", Source::Registry).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = store();
        store.create(fb("srv", "u1", 5.0)).await.unwrap();
        let err = store.create(fb("srv", "u1", 4.0)).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateFeedback));

        // Different source is a different identity.
        store
            .create(ServerFeedback::new("srv", "u1", Source::Community, 4.0, ""))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn concurrent_creates_admit_exactly_one() {
        let store = store();
        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.create(fb("srv", "racer", 5.0)).await
            }));
        }

        let mut ok = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => ok += 1,
                Err(StoreError::DuplicateFeedback) => duplicates += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(duplicates, 9);
        assert_eq!(store.count("srv", Source::Registry).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn list_sorts_and_paginates() {
        let store = store();
        for (user, rating) in [("u1", 2.0), ("u2", 5.0), ("u3", 4.0)] {
            store.create(fb("srv", user, rating)).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(3)).await;
        }

        let newest = store
            .list("srv", Source::Registry, 20, 0, FeedbackSort::Newest)
            .await
            .unwrap();
        assert_eq!(newest.total_count, 3);
        assert_eq!(newest.feedback[0].user_id, "u3");
        assert!(!newest.has_more);

        let by_rating = store
            .list("srv", Source::Registry, 20, 0, FeedbackSort::RatingHigh)
            .await
            .unwrap();
        assert_eq!(by_rating.feedback[0].user_id, "u2");

        let low_first = store
            .list("srv", Source::Registry, 20, 0, FeedbackSort::RatingLow)
            .await
            .unwrap();
        assert_eq!(low_first.feedback[0].user_id, "u1");

        let page = store
            .list("srv", Source::Registry, 2, 0, FeedbackSort::Newest)
            .await
            .unwrap();
        assert_eq!(page.feedback.len(), 2);
        assert!(page.has_more);

        let rest = store
            .list("srv", Source::Registry, 2, 2, FeedbackSort::Newest)
            .await
            .unwrap();
        assert_eq!(rest.feedback.len(), 1);
        assert!(!rest.has_more);
    }

    #[tokio::test]
    async fn rating_high_breaks_ties_by_newest() {
        let store = store();
        store.create(fb("srv", "first", 4.0)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(3)).await;
        store.create(fb("srv", "second", 4.0)).await.unwrap();

        let page = store
            .list("srv", Source::Registry, 20, 0, FeedbackSort::RatingHigh)
            .await
            .unwrap();
        assert_eq!(page.feedback[0].user_id, "second");
    }

    #[tokio::test]
    async fn out_of_range_limits_fall_back_to_default() {
        let store = store();
        for i in 0..25 {
            store.create(fb("srv", &format!("user{i}"), 3.0)).await.unwrap();
        }

        let zero = store
            .list("srv", Source::Registry, 0, 0, FeedbackSort::Newest)
            .await
            .unwrap();
        assert_eq!(zero.feedback.len(), DEFAULT_PAGE_SIZE);

        let oversized = store
            .list("srv", Source::Registry, 500, 0, FeedbackSort::Newest)
            .await
            .unwrap();
        assert_eq!(oversized.feedback.len(), DEFAULT_PAGE_SIZE);
    }

    #[tokio::test]
    async fn list_by_user_spans_servers() {
        let store = store();
        store.create(fb("srv-a", "u1", 5.0)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(3)).await;
        store.create(fb("srv-b", "u1", 3.0)).await.unwrap();
        store.create(fb("srv-a", "u2", 4.0)).await.unwrap();

        let history = store.list_by_user("u1", 20, 0).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].server_id, "srv-b");

        assert!(store.list_by_user("", 20, 0).await.is_err());
    }

    #[tokio::test]
    async fn update_matches_on_user() {
        let store = store();
        let original = fb("srv", "u1", 3.0);
        let id = original.id.clone();
        store.create(original).await.unwrap();

        let mut updated = store.get(&id).await.unwrap();
        updated.rating = 4.0;
        updated.comment = "better now".into();
        store.update(updated).await.unwrap();

        let reread = store.get(&id).await.unwrap();
        assert_eq!(reread.rating, 4.0);
        assert!(reread.updated_at >= reread.created_at);

        // Wrong user cannot tell whether the row exists.
        let mut stranger = store.get(&id).await.unwrap();
        stranger.user_id = "mallory".into();
        stranger.rating = 1.0;
        let err = store.update(stranger).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn delete_matches_on_user_and_frees_unique_slot() {
        let store = store();
        let original = fb("srv", "u1", 3.0);
        let id = original.id.clone();
        store.create(original).await.unwrap();

        let err = store.delete(&id, "mallory").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));

        store.delete(&id, "u1").await.unwrap();
        assert!(matches!(store.get(&id).await, Err(StoreError::NotFound)));

        // The user may rate again after deleting.
        store.create(fb("srv", "u1", 5.0)).await.unwrap();
    }

    #[tokio::test]
    async fn create_validates_inputs() {
        let store = store();
        assert!(store.create(fb("srv", "", 5.0)).await.is_err());
        assert!(store.create(fb("srv", "u1", 0.5)).await.is_err());
        assert!(store
            .create(ServerFeedback::new(
                "srv",
                "u1",
                Source::Registry,
                5.0,
                "x".repeat(1001),
            ))
            .await
            .is_err());
    }
}
