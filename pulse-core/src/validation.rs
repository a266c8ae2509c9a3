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

//! Input validation for everything that reaches a store.
//!
//! The stores only ever receive outputs of these functions; raw request
//! strings never make it into a filter.

use crate::error::{Result, StoreError};
use crate::source::{Source, SourceSelector};
use regex::Regex;
use std::sync::OnceLock;

/// Upper bound for list limits at the store layer.
pub const MAX_LIMIT: usize = 1000;

/// Maximum accepted comment length in characters.
pub const MAX_COMMENT_LENGTH: usize = 1000;

fn uuid_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
        )
        .expect("uuid pattern")
    })
}

fn label_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,254}$").expect("label pattern"))
}

/// Sanitize a server or user identifier.
///
/// Accepts an RFC-4122 UUID (normalized to lowercase) or a label of up to
/// 255 characters starting with an alphanumeric.
pub fn sanitize_id(id: &str) -> Result<String> {
    let id = id.trim();

    if id.is_empty() {
        return Err(StoreError::InvalidInput("ID cannot be empty".into()));
    }

    if uuid_pattern().is_match(id) {
        return Ok(id.to_ascii_lowercase());
    }

    if !label_pattern().is_match(id) {
        return Err(StoreError::InvalidInput(
            "ID contains invalid characters or format".into(),
        ));
    }

    Ok(id.to_string())
}

/// Validate a source parameter against the closed whitelist.
///
/// Empty input maps to [`SourceSelector::Default`]; anything outside
/// `REGISTRY | COMMUNITY | ALL` is rejected.
pub fn parse_source(source: &str) -> Result<SourceSelector> {
    match source.trim() {
        "" => Ok(SourceSelector::Default),
        "ALL" => Ok(SourceSelector::All),
        "REGISTRY" => Ok(SourceSelector::One(Source::Registry)),
        "COMMUNITY" => Ok(SourceSelector::One(Source::Community)),
        other => Err(StoreError::InvalidInput(format!(
            "invalid source value: {other}"
        ))),
    }
}

/// Parse a write-side source, where the `ALL` sentinel is not meaningful.
pub fn parse_write_source(source: &str) -> Result<Source> {
    match parse_source(source)? {
        SourceSelector::One(s) => Ok(s),
        SourceSelector::Default => Ok(Source::Registry),
        SourceSelector::All => Err(StoreError::InvalidInput(
            "source must be 'REGISTRY' or 'COMMUNITY'".into(),
        )),
    }
}

/// Store policy: limits must land in `1..=MAX_LIMIT`.
pub fn validate_limit(limit: usize) -> Result<usize> {
    if limit < 1 {
        return Err(StoreError::InvalidInput("limit must be at least 1".into()));
    }
    if limit > MAX_LIMIT {
        return Err(StoreError::InvalidInput(format!(
            "limit cannot exceed {MAX_LIMIT}"
        )));
    }
    Ok(limit)
}

/// Handler policy: clamp an optional limit into `1..=max`, falling back to
/// `default` for absent or out-of-range values.
pub fn clamp_limit(limit: Option<usize>, default: usize, max: usize) -> usize {
    match limit {
        Some(n) if n >= 1 && n <= max => n,
        _ => default,
    }
}

/// Ratings are accepted on the closed interval `[1, 5]`.
pub fn validate_rating(rating: f64) -> Result<()> {
    if !(1.0..=5.0).contains(&rating) {
        return Err(StoreError::InvalidInput(
            "rating must be between 1 and 5".into(),
        ));
    }
    Ok(())
}

pub fn validate_comment(comment: &str) -> Result<()> {
    if comment.chars().count() > MAX_COMMENT_LENGTH {
        return Err(StoreError::InvalidInput(format!(
            "comment must not exceed {MAX_COMMENT_LENGTH} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_id_accepts_labels() {
        assert_eq!(sanitize_id("postgres-tools").unwrap(), "postgres-tools");
        assert_eq!(sanitize_id("  spaced  ").unwrap(), "spaced");
        assert_eq!(sanitize_id("a.b_c-d").unwrap(), "a.b_c-d");
    }

    #[test]
    fn sanitize_id_normalizes_uuids() {
        let id = sanitize_id("550E8400-E29B-41D4-A716-446655440000").unwrap();
        assert_eq!(id, "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn sanitize_id_rejects_bad_input() {
        assert!(sanitize_id("").is_err());
        assert!(sanitize_id("-leading-hyphen").is_err());
        assert!(sanitize_id("has space").is_err());
        assert!(sanitize_id("semi;colon").is_err());
    }

    #[test]
    fn sanitize_id_length_boundary() {
        let ok = format!("a{}", "b".repeat(254));
        assert_eq!(ok.len(), 255);
        assert!(sanitize_id(&ok).is_ok());

        let too_long = format!("a{}", "b".repeat(255));
        assert_eq!(too_long.len(), 256);
        assert!(sanitize_id(&too_long).is_err());
    }

    #[test]
    fn parse_source_whitelist() {
        assert_eq!(parse_source("").unwrap(), SourceSelector::Default);
        assert_eq!(parse_source("ALL").unwrap(), SourceSelector::All);
        assert_eq!(
            parse_source("REGISTRY").unwrap(),
            SourceSelector::One(Source::Registry)
        );
        assert!(parse_source("registry").is_err());
        assert!(parse_source("'; drop table").is_err());
    }

    #[test]
    fn write_source_rejects_all() {
        assert_eq!(parse_write_source("").unwrap(), Source::Registry);
        assert_eq!(parse_write_source("COMMUNITY").unwrap(), Source::Community);
        assert!(parse_write_source("ALL").is_err());
    }

    #[test]
    fn limit_bounds() {
        assert!(validate_limit(0).is_err());
        assert_eq!(validate_limit(1).unwrap(), 1);
        assert_eq!(validate_limit(MAX_LIMIT).unwrap(), MAX_LIMIT);
        assert!(validate_limit(MAX_LIMIT + 1).is_err());

        assert_eq!(clamp_limit(None, 20, 100), 20);
        assert_eq!(clamp_limit(Some(0), 20, 100), 20);
        assert_eq!(clamp_limit(Some(101), 20, 100), 20);
        assert_eq!(clamp_limit(Some(100), 20, 100), 100);
    }

    #[test]
    fn rating_bounds() {
        assert!(validate_rating(0.0).is_err());
        assert!(validate_rating(0.9).is_err());
        assert!(validate_rating(1.0).is_ok());
        assert!(validate_rating(4.5).is_ok());
        assert!(validate_rating(5.0).is_ok());
        assert!(validate_rating(5.1).is_err());
    }

    #[test]
    fn comment_length_boundary() {
        assert!(validate_comment("").is_ok());
        assert!(validate_comment(&"x".repeat(1000)).is_ok());
        assert!(validate_comment(&"x".repeat(1001)).is_err());
    }
}
