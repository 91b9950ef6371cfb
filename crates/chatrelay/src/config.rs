use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::fs;

use crate::llm::Provider;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Chat endpoints keyed by the name clients pass as `endpoint`.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub title: TitleConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,
}

impl Config {
    /// Load configuration from `path`. A missing file yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path.as_ref()).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Self::parse(&contents)
    }

    /// Parse configuration text after expanding `${VAR}` references.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        Ok(serde_saphyr::from_str(&expanded)?)
    }
}

/// Resolve `path` against the directory holding the config file.
pub fn resolve_path(config_path: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(path)
}

/// Default data directory (relative to the config file).
pub const DEFAULT_DATA_DIR: &str = ".chatrelay";

// ============================================================================
// Serde Defaults
// ============================================================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3080
}

fn default_request_timeout() -> u64 {
    60
}

fn default_keep_alive_interval() -> u64 {
    15
}

fn default_max_connections() -> usize {
    256
}

fn default_checkpoint_interval_ms() -> u64 {
    500
}

fn default_salvage_min_chars() -> usize {
    crate::session::SALVAGE_MIN_CHARS
}

fn default_idle_timeout() -> u64 {
    120
}

fn default_sender() -> String {
    "Assistant".to_string()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand `${VAR}`, `${VAR:-default}` and `$$` in configuration text.
///
/// A `$` not followed by `{` or `$` is kept as-is. Nested references are not
/// supported.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
        } else if let Some(body) = after.strip_prefix('{') {
            let end = body.find('}').ok_or(ConfigError::UnclosedVarReference)?;
            out.push_str(&lookup_var(&body[..end])?);
            rest = &body[end + 1..];
        } else {
            out.push('$');
            rest = after;
        }
    }

    out.push_str(rest);
    Ok(out)
}

fn lookup_var(reference: &str) -> Result<String, ConfigError> {
    let (name, fallback) = match reference.split_once(":-") {
        Some((name, fallback)) => (name, Some(fallback)),
        None => (reference, None),
    };

    match (std::env::var(name), fallback) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(fallback)) => Ok(fallback.to_string()),
        (Err(_), None) => Err(ConfigError::MissingEnvVar(name.to_string())),
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Timeout for non-streaming routes. Streaming responses are never cut off.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_keep_alive_interval")]
    pub keep_alive_interval_seconds: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            keep_alive_interval_seconds: default_keep_alive_interval(),
            max_connections: default_max_connections(),
        }
    }
}

// ============================================================================
// StreamingConfig
// ============================================================================

/// Tuning for generation sessions.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamingConfig {
    /// Minimum spacing between two checkpoints of the same session.
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,
    /// A failed generation whose partial text is longer than this many
    /// characters is kept as a cancelled answer instead of an error.
    #[serde(default = "default_salvage_min_chars")]
    pub salvage_min_chars: usize,
    /// Maximum silence between two provider chunks.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
}

impl StreamingConfig {
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval_ms: default_checkpoint_interval_ms(),
            salvage_min_chars: default_salvage_min_chars(),
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

// ============================================================================
// StorageConfig
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Defaults to `.chatrelay` next to the config file.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// ============================================================================
// ProviderConfig
// ============================================================================

/// One chat endpoint: an OpenAI-compatible API or Anthropic's Messages API.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub provider: Provider,
    /// Overrides the provider's default base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model used when the request does not name one.
    pub model: String,
    /// Sender label stored on response messages.
    #[serde(default = "default_sender")]
    pub sender: String,
}

// ============================================================================
// TitleConfig
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct TitleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Endpoint used for titling. Defaults to the conversation's own endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for TitleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: None,
            model: None,
        }
    }
}
