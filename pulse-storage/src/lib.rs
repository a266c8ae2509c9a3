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

//! Pulse Storage
//!
//! Store traits plus the in-memory implementations wired by default:
//! per-source server statistics, unique user feedback, the analytics
//! aggregation engine, the TTL cache, the health monitor, and the server
//! catalog collaborator.
//!
//! Mutations are serialized at the document level (keyed-map entry locks);
//! cross-document consistency is eventual.

pub mod analytics_store;
pub mod cache;
pub mod catalog;
pub mod feedback_store;
pub mod health;
pub mod stats_store;

pub use analytics_store::{AnalyticsStore, MemoryAnalyticsStore};
pub use cache::TtlCache;
pub use catalog::{MemoryCatalog, ServerCatalog};
pub use feedback_store::{FeedbackStore, MemoryFeedbackStore};
pub use health::{HealthMonitor, HealthProbe, HealthStatus, ServerHealth};
pub use stats_store::{MemoryStatsStore, StatsStore};
