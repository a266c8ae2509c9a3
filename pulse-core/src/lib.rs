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

//! Pulse Core
//!
//! Shared data model for the registry statistics plane: per-source server
//! stats, user feedback, analytics entities, catalog envelopes, and the
//! input validation every store relies on.

pub mod analytics;
pub mod catalog;
pub mod error;
pub mod feedback;
pub mod source;
pub mod stats;
pub mod validation;

pub use analytics::{
    activity, ActivityEvent, AnalyticsMetrics, ApiCallMetrics, DashboardMetrics, DataPoint,
    GrowthMetric, GrowthMetrics, MetricWithTrend, MilestoneEvent, Period, SearchAnalytics,
    ServerQuickStat, TimeSeriesPoint, TrendingServer,
};
pub use catalog::{ExtendedServer, PublishRequest, Repository, ServerRecord};
pub use error::{Result, StoreError};
pub use feedback::{FeedbackPage, FeedbackSort, ServerFeedback, UserFeedback};
pub use source::{Source, SourceSelector};
pub use stats::{
    AggregatedStats, GlobalStats, InstallRequest, RatingRequest, ServerStats, StatsUpdate,
};
