use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Human-readable duration (e.g., "200ms", "10s", "5m").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HumanDuration(pub Duration);

impl HumanDuration {
    pub fn from_secs(secs: u64) -> Self {
        HumanDuration(Duration::from_secs(secs))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl FromStr for HumanDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();

        let (num_str, unit_ms) = if let Some(n) = s.strip_suffix("ms") {
            (n, 1u64)
        } else if let Some(n) = s.strip_suffix('s') {
            (n, 1_000)
        } else if let Some(n) = s.strip_suffix('m') {
            (n, 60_000)
        } else if let Some(n) = s.strip_suffix('h') {
            (n, 3_600_000)
        } else {
            return Err(format!("Invalid duration format: {}", s));
        };

        let num: u64 = num_str
            .trim()
            .parse()
            .map_err(|_| format!("Invalid number in duration: {}", s))?;

        Ok(HumanDuration(Duration::from_millis(num * unit_ms)))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.0.as_millis();
        let secs = self.0.as_secs();

        if millis % 1000 != 0 {
            write!(f, "{}ms", millis)
        } else if secs % 3600 == 0 && secs > 0 {
            write!(f, "{}h", secs / 3600)
        } else if secs % 60 == 0 && secs > 0 {
            write!(f, "{}m", secs / 60)
        } else {
            write!(f, "{}s", secs)
        }
    }
}

impl Serialize for HumanDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        HumanDuration::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Human-readable byte size (e.g., "512kb", "50mb").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HumanBytes(pub u64);

impl HumanBytes {
    pub fn as_bytes(&self) -> u64 {
        self.0
    }
}

impl FromStr for HumanBytes {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();

        let (num_str, multiplier) = if let Some(n) = s.strip_suffix("gb") {
            (n, 1024u64 * 1024 * 1024)
        } else if let Some(n) = s.strip_suffix("mb") {
            (n, 1024u64 * 1024)
        } else if let Some(n) = s.strip_suffix("kb") {
            (n, 1024u64)
        } else if let Some(n) = s.strip_suffix('b') {
            (n, 1u64)
        } else {
            (s.as_str(), 1u64)
        };

        let num: u64 = num_str
            .trim()
            .parse()
            .map_err(|_| format!("Invalid number in bytes: {}", s))?;

        Ok(HumanBytes(num * multiplier))
    }
}

impl fmt::Display for HumanBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const KB: u64 = 1024;
        match self.0 {
            b if b >= KB * KB * KB && b % (KB * KB * KB) == 0 => write!(f, "{}gb", b / (KB * KB * KB)),
            b if b >= KB * KB && b % (KB * KB) == 0 => write!(f, "{}mb", b / (KB * KB)),
            b if b >= KB && b % KB == 0 => write!(f, "{}kb", b / KB),
            b => write!(f, "{}b", b),
        }
    }
}

impl Serialize for HumanBytes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanBytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        HumanBytes::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// A credential that must never end up in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret(value)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// HTTP / WebSocket listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// How long a fresh WebSocket may take to send its join handshake.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: HumanDuration,
    /// Per-connection outbound queue depth before the connection is evicted.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: HumanDuration,
    #[serde(default = "default_body_limit")]
    pub body_limit: HumanBytes,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_handshake_timeout() -> HumanDuration {
    HumanDuration::from_secs(10)
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_request_timeout() -> HumanDuration {
    HumanDuration::from_secs(60)
}

fn default_body_limit() -> HumanBytes {
    HumanBytes(50 * 1024 * 1024)
}

impl Default for ServerSection {
    fn default() -> Self {
        ServerSection {
            host: default_host(),
            port: default_port(),
            handshake_timeout: default_handshake_timeout(),
            outbound_buffer: default_outbound_buffer(),
            request_timeout: default_request_timeout(),
            body_limit: default_body_limit(),
            cors_origins: Vec::new(),
        }
    }
}

/// Where projects, trees and chat history live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    Memory,
    Fs(FsStoreConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsStoreConfig {
    pub root: String,
}

/// A known user and the bearer token that identifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub token: Secret,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Identity settings. Users are keyed by user id.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub users: IndexMap<String, UserConfig>,
}

/// Which AI collaborator implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AiProvider {
    /// OpenAI-compatible chat completions endpoint.
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    /// Canned replies, no network.
    Stub,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub provider: AiProvider,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<Secret>,
    #[serde(default = "default_ai_timeout")]
    pub timeout: HumanDuration,
    /// Token that routes a chat message to the assistant.
    #[serde(default = "default_mention")]
    pub mention: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_ai_timeout() -> HumanDuration {
    HumanDuration::from_secs(60)
}

fn default_mention() -> String {
    "@ai".to_string()
}

impl Default for AiConfig {
    fn default() -> Self {
        AiConfig {
            provider: AiProvider::default(),
            endpoint: None,
            model: default_model(),
            api_key: None,
            timeout: default_ai_timeout(),
            mention: default_mention(),
            system_prompt: None,
        }
    }
}

/// A command split the way the assistant proposes it: `npm` + `["install"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_sandbox_root")]
    pub root: String,
    #[serde(default = "default_build")]
    pub build: CommandConfig,
    #[serde(default = "default_start")]
    pub start: CommandConfig,
}

fn default_sandbox_root() -> String {
    "./sandbox".to_string()
}

fn default_build() -> CommandConfig {
    CommandConfig {
        program: "npm".to_string(),
        args: vec!["install".to_string()],
    }
}

fn default_start() -> CommandConfig {
    CommandConfig {
        program: "npm".to_string(),
        args: vec!["start".to_string()],
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            root: default_sandbox_root(),
            build: default_build(),
            start: default_start(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Top-level coderoom configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoderoomConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}
