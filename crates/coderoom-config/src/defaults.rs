use crate::types::{AiProvider, CoderoomConfig};

/// Endpoint used for the OpenAI-compatible provider when none is configured.
pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1";

impl CoderoomConfig {
    /// Apply default inference rules to the configuration in place.
    pub fn apply_defaults(&mut self) {
        // 1. Display names fall back to the user id
        for (user_id, user) in self.auth.users.iter_mut() {
            let missing = user
                .display_name
                .as_deref()
                .map(|n| n.trim().is_empty())
                .unwrap_or(true);
            if missing {
                user.display_name = Some(user_id.clone());
            }
        }

        // 2. Provider endpoint
        if self.ai.endpoint.is_none() && self.ai.provider == AiProvider::OpenAi {
            self.ai.endpoint = Some(DEFAULT_OPENAI_ENDPOINT.to_string());
        }

        // 3. Mention is matched literally, surrounding whitespace is noise
        self.ai.mention = self.ai.mention.trim().to_string();

        // 4. Unnamed deployments fall back to the product name
        if self.name.is_none() {
            self.name = Some("coderoom".to_string());
        }
    }

    /// Returns a new config with all defaults applied.
    pub fn effective(&self) -> CoderoomConfig {
        let mut config = self.clone();
        config.apply_defaults();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Secret, UserConfig};

    #[test]
    fn test_display_name_inferred() {
        let mut config = CoderoomConfig::default();
        config.auth.users.insert(
            "alice".to_string(),
            UserConfig {
                token: Secret::new("t"),
                display_name: None,
            },
        );
        config.auth.users.insert(
            "bob".to_string(),
            UserConfig {
                token: Secret::new("u"),
                display_name: Some("Bobby".to_string()),
            },
        );

        let effective = config.effective();
        assert_eq!(
            effective.auth.users["alice"].display_name.as_deref(),
            Some("alice")
        );
        assert_eq!(
            effective.auth.users["bob"].display_name.as_deref(),
            Some("Bobby")
        );
    }

    #[test]
    fn test_openai_endpoint_inferred() {
        let effective = CoderoomConfig::default().effective();
        assert_eq!(effective.ai.endpoint.as_deref(), Some(DEFAULT_OPENAI_ENDPOINT));
        assert_eq!(effective.name.as_deref(), Some("coderoom"));
    }

    #[test]
    fn test_stub_provider_keeps_no_endpoint() {
        let mut config = CoderoomConfig::default();
        config.ai.provider = AiProvider::Stub;
        config.ai.mention = "  @bot ".to_string();

        let effective = config.effective();
        assert!(effective.ai.endpoint.is_none());
        assert_eq!(effective.ai.mention, "@bot");
    }

    #[test]
    fn test_effective_does_not_mutate_original() {
        let config = CoderoomConfig::default();
        let _ = config.effective();
        assert!(config.ai.endpoint.is_none());
    }
}
