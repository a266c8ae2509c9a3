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

//! Authentication boundary for the claim protocol.
//!
//! Repository-level authorization is delegated to an external provider in
//! production; the static token service covers local deployments and tests.

use async_trait::async_trait;
use std::collections::HashMap;

use pulse_core::Result;

/// Token validation and repository-access checks for claims.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Whether the bearer token is valid at all.
    async fn validate_token(&self, token: &str) -> Result<bool>;

    /// Whether the bearer may act on the named repository.
    async fn verify_repo_access(&self, token: &str, repo_ref: &str) -> Result<bool>;
}

/// Static token table (`token -> user`), loaded from configuration.
pub struct StaticTokenAuth {
    tokens: HashMap<String, String>,
}

impl StaticTokenAuth {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self {
            tokens: pairs.into_iter().collect(),
        }
    }

    pub fn user_for(&self, token: &str) -> Option<&str> {
        self.tokens.get(token).map(String::as_str)
    }
}

#[async_trait]
impl AuthService for StaticTokenAuth {
    async fn validate_token(&self, token: &str) -> Result<bool> {
        Ok(self.tokens.contains_key(token))
    }

    async fn verify_repo_access(&self, token: &str, _repo_ref: &str) -> Result<bool> {
        // Repository membership is the external provider's concern; a known
        // token is granted access here.
        Ok(self.tokens.contains_key(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn known_tokens_validate() {
        let auth = StaticTokenAuth::new(vec![("secret".into(), "alice".into())]);
        assert!(auth.validate_token("secret").await.unwrap());
        assert!(!auth.validate_token("wrong").await.unwrap());
        assert_eq!(auth.user_for("secret"), Some("alice"));
    }

    #[tokio::test]
    async fn repo_access_follows_token_validity() {
        let auth = StaticTokenAuth::new(vec![("secret".into(), "alice".into())]);
        assert!(auth
            .verify_repo_access("secret", "io.github.alice/tool")
            .await
            .unwrap());
        assert!(!auth
            .verify_repo_access("wrong", "io.github.alice/tool")
            .await
            .unwrap());
    }
}
