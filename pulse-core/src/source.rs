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

//! Statistic provenance.
//!
//! Every counter in the plane is keyed by `(server_id, Source)`. `ALL` is a
//! query-only sentinel and never appears on a stored record, which is why it
//! lives on [`SourceSelector`] instead of [`Source`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Provenance of a statistic: curated registry or community contributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "REGISTRY")]
    Registry,
    #[serde(rename = "COMMUNITY")]
    Community,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Registry => "REGISTRY",
            Source::Community => "COMMUNITY",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated source parameter as supplied by a caller.
///
/// `Default` (absent/empty input) resolves to `REGISTRY` on point reads and
/// behaves like `All` on list filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceSelector {
    #[default]
    Default,
    All,
    One(Source),
}

impl From<Source> for SourceSelector {
    fn from(source: Source) -> Self {
        SourceSelector::One(source)
    }
}

impl SourceSelector {
    /// Resolve to a concrete source for point reads and writes.
    pub fn or_registry(self) -> Source {
        match self {
            SourceSelector::One(source) => source,
            _ => Source::Registry,
        }
    }

    /// Whether a stored record with `source` passes this filter.
    pub fn matches(self, source: Source) -> bool {
        match self {
            SourceSelector::Default | SourceSelector::All => true,
            SourceSelector::One(wanted) => wanted == source,
        }
    }
}
