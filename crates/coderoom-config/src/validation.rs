use std::collections::HashMap;

use crate::types::{CoderoomConfig, StoreConfig};
use crate::ConfigError;

impl CoderoomConfig {
    /// Validate the configuration and return every problem found.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        // Tokens identify users, so they must be non-empty and unique
        let mut seen_tokens: HashMap<&str, &str> = HashMap::new();
        for (user_id, user) in &self.auth.users {
            if user_id.trim().is_empty() || user_id.chars().any(char::is_whitespace) {
                errors.push(ConfigError::InvalidUserId(
                    user_id.clone(),
                    "User ids must be non-empty and contain no whitespace".to_string(),
                ));
            }
            if user_id == "ai" {
                errors.push(ConfigError::InvalidUserId(
                    user_id.clone(),
                    "'ai' is reserved for the assistant".to_string(),
                ));
            }
            if user.token.is_empty() {
                errors.push(ConfigError::EmptyToken(user_id.clone()));
                continue;
            }
            if let Some(previous) = seen_tokens.insert(user.token.expose(), user_id) {
                errors.push(ConfigError::DuplicateToken(
                    previous.to_string(),
                    user_id.clone(),
                ));
            }
        }

        if self.server.outbound_buffer == 0 {
            errors.push(ConfigError::InvalidConfig(
                "server.outbound_buffer must be greater than zero".to_string(),
            ));
        }

        if self.server.handshake_timeout.as_duration().is_zero() {
            errors.push(ConfigError::InvalidConfig(
                "server.handshake_timeout must be greater than zero".to_string(),
            ));
        }

        if self.ai.mention.trim().is_empty() {
            errors.push(ConfigError::InvalidConfig(
                "ai.mention must not be empty".to_string(),
            ));
        }

        if let StoreConfig::Fs(fs) = &self.store {
            if fs.root.trim().is_empty() {
                errors.push(ConfigError::InvalidConfig(
                    "store.root must not be empty for the fs store".to_string(),
                ));
            }
        }

        if self.sandbox.start.program.trim().is_empty() {
            errors.push(ConfigError::InvalidConfig(
                "sandbox.start.program must not be empty".to_string(),
            ));
        }

        errors
    }

    /// Validate and return Ok(()) if valid, or Err with the first error.
    pub fn validate_or_err(&self) -> Result<(), ConfigError> {
        match self.validate().into_iter().next() {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}
