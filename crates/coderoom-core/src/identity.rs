//! Credential verification.

use std::collections::HashMap;

use async_trait::async_trait;
use coderoom_config::AuthConfig;

use crate::error::AuthError;
use crate::model::Identity;
use crate::traits::IdentityVerifier;

/// Verifies bearer tokens against a fixed table, usually loaded from config.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for a user.
    pub fn with_user(
        mut self,
        token: impl Into<String>,
        user_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        self.tokens
            .insert(token.into(), Identity::new(user_id, display_name));
        self
    }

    /// Build the table from the `auth` config section.
    ///
    /// Users without a display name are shown under their id.
    pub fn from_config(config: &AuthConfig) -> Self {
        let tokens = config
            .users
            .iter()
            .filter(|(_, user)| !user.token.is_empty())
            .map(|(id, user)| {
                let display_name = user.display_name.clone().unwrap_or_else(|| id.clone());
                (user.token.expose().to_string(), Identity::new(id.clone(), display_name))
            })
            .collect();
        StaticTokenVerifier { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        let credential = credential.trim();
        let credential = credential.strip_prefix("Bearer ").unwrap_or(credential).trim();
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        self.tokens
            .get(credential)
            .cloned()
            .ok_or(AuthError::InvalidCredential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coderoom_config::{Secret, UserConfig};

    #[tokio::test]
    async fn test_verify_known_token() {
        let verifier = StaticTokenVerifier::new().with_user("t-1", "alice", "Alice");
        let identity = verifier.verify("t-1").await.unwrap();
        assert_eq!(identity.user_id.as_str(), "alice");
        assert_eq!(identity.display_name, "Alice");

        let identity = verifier.verify("Bearer t-1").await.unwrap();
        assert_eq!(identity.user_id.as_str(), "alice");
    }

    #[tokio::test]
    async fn test_verify_rejects() {
        let verifier = StaticTokenVerifier::new().with_user("t-1", "alice", "Alice");
        assert_eq!(verifier.verify("").await, Err(AuthError::MissingCredential));
        assert_eq!(verifier.verify("  ").await, Err(AuthError::MissingCredential));
        assert_eq!(verifier.verify("t-2").await, Err(AuthError::InvalidCredential));
    }

    #[tokio::test]
    async fn test_from_config() {
        let mut auth = AuthConfig::default();
        auth.users.insert(
            "bob".to_string(),
            UserConfig {
                token: Secret::new("bob-token"),
                display_name: None,
            },
        );
        auth.users.insert(
            "ghost".to_string(),
            UserConfig {
                token: Secret::new(""),
                display_name: None,
            },
        );

        let verifier = StaticTokenVerifier::from_config(&auth);
        assert_eq!(verifier.len(), 1);
        let identity = verifier.verify("bob-token").await.unwrap();
        assert_eq!(identity.display_name, "bob");
    }
}
