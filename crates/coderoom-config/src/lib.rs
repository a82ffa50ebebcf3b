mod defaults;
mod env;
pub mod types;
mod validation;

use std::path::Path;

pub use defaults::DEFAULT_OPENAI_ENDPOINT;
pub use types::*;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing environment variables: {0:?}")]
    MissingEnvVars(Vec<String>),

    #[error("Duplicate token for users '{0}' and '{1}'")]
    DuplicateToken(String, String),

    #[error("User '{0}' has an empty token")]
    EmptyToken(String),

    #[error("Invalid user id '{0}': {1}")]
    InvalidUserId(String, String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CoderoomConfig {
    /// Parse a configuration from a YAML string.
    /// Environment variables in the format `${VAR_NAME}` are interpolated first.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let interpolated = env::interpolate_env(yaml)?;
        let config: CoderoomConfig = serde_yaml::from_str(&interpolated)?;
        Ok(config)
    }

    /// Load a configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}
