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

//! User feedback: one public rating (with optional comment) per
//! `(server_id, user_id, source)`.

use crate::source::Source;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A user's rating and comment for a server.
///
/// Rows survive removal of the parent server; they are the audit trail for
/// the stats plane's rating counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerFeedback {
    pub id: String,
    pub server_id: String,
    pub source: Source,
    pub user_id: String,
    pub rating: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_public: bool,
}

impl ServerFeedback {
    pub fn new(
        server_id: impl Into<String>,
        user_id: impl Into<String>,
        source: Source,
        rating: f64,
        comment: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            server_id: server_id.into(),
            source,
            user_id: user_id.into(),
            rating,
            comment: comment.into(),
            created_at: now,
            updated_at: now,
            is_public: true,
        }
    }
}

/// Sort order for feedback listings. Rating sorts break ties by newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedbackSort {
    #[default]
    Newest,
    Oldest,
    RatingHigh,
    RatingLow,
}

impl FeedbackSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackSort::Newest => "newest",
            FeedbackSort::Oldest => "oldest",
            FeedbackSort::RatingHigh => "rating_high",
            FeedbackSort::RatingLow => "rating_low",
        }
    }
}

impl fmt::Display for FeedbackSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackSort {
    type Err = ();

    // Unknown values fall back to newest, matching the lenient query parsing
    // of the rest of the API surface.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "oldest" => FeedbackSort::Oldest,
            "rating_high" => FeedbackSort::RatingHigh,
            "rating_low" => FeedbackSort::RatingLow,
            _ => FeedbackSort::Newest,
        })
    }
}

/// One page of public feedback for a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackPage {
    pub feedback: Vec<ServerFeedback>,
    pub total_count: usize,
    pub has_more: bool,
}

/// Answer to "has this user already rated this server?".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFeedback {
    pub has_rated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<ServerFeedback>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_feedback_defaults_public() {
        let fb = ServerFeedback::new("srv", "u1", Source::Registry, 5.0, "");
        assert!(fb.is_public);
        assert_eq!(fb.created_at, fb.updated_at);
        assert!(!fb.id.is_empty());
    }

    #[test]
    fn sort_parses_leniently() {
        assert_eq!("oldest".parse::<FeedbackSort>().unwrap(), FeedbackSort::Oldest);
        assert_eq!(
            "rating_high".parse::<FeedbackSort>().unwrap(),
            FeedbackSort::RatingHigh
        );
        assert_eq!("bogus".parse::<FeedbackSort>().unwrap(), FeedbackSort::Newest);
    }

    #[test]
    fn empty_comment_is_omitted() {
        let fb = ServerFeedback::new("srv", "u1", Source::Registry, 4.0, "");
        let json = serde_json::to_value(&fb).unwrap();
        assert!(json.get("comment").is_none());
    }
}
