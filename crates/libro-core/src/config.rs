//! Service configuration
//!
//! All tunable parameters in one place. Loaded from TOML at startup,
//! falls back to defaults if no config file exists. A handful of
//! environment variables override the file.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "libro.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LibroConfig {
    /// Orchestration loop bounds.
    pub agent: AgentSettings,
    /// Model provider selection.
    pub llm: LlmSettings,
    /// HTTP surface.
    pub gateway: GatewaySettings,
    /// Book catalog source.
    pub catalog: CatalogSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// LLM calls allowed per user turn, retries included.
    pub max_iterations: usize,
    pub llm_timeout_ms: u64,
    pub tool_timeout_ms: u64,
    /// Pause before the single retry of a failed LLM call.
    pub llm_retry_backoff_ms: u64,
    /// What a second submit on a busy session does.
    pub busy_policy: BusyPolicy,
    /// Sessions idle longer than this are dropped. 0 disables eviction.
    pub session_idle_ttl_secs: u64,
    pub system_prompt: Option<String>,
}

/// Same-session concurrency policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Fail the second submit immediately.
    #[default]
    Reject,
    /// Wait for the running turn to finish.
    Queue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: ProviderKind,
    pub model: String,
    pub base_url: Option<String>,
    /// Name of the environment variable holding the credential.
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    #[serde(alias = "open_ai")]
    OpenAi,
    /// Scripted offline provider; answers without calling tools.
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub port: u16,
    pub bind: BindMode,
}

/// Bind mode for the gateway
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    #[default]
    Loopback,
    Lan,
}

impl BindMode {
    pub fn to_addr(&self) -> &str {
        match self {
            BindMode::Loopback => "127.0.0.1",
            BindMode::Lan => "0.0.0.0",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    /// JSON file with an array of books. Empty catalog when unset.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Directory for daily rolling log files. Stdout only when unset.
    pub dir: Option<PathBuf>,
    /// EnvFilter directive used when RUST_LOG is not set.
    pub filter: Option<String>,
}

/// Opaque credential. Never printed, never inspected.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

// ============================================================
// Defaults
// ============================================================

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            llm_timeout_ms: 30_000,
            tool_timeout_ms: 5_000,
            llm_retry_backoff_ms: 500,
            busy_policy: BusyPolicy::Reject,
            session_idle_ttl_secs: 3_600,
            system_prompt: None,
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: "gpt-4o-mini".into(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".into(),
            max_tokens: 1024,
            temperature: Some(0.0),
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            port: 8787,
            bind: BindMode::Loopback,
        }
    }
}

// ============================================================
// Loading
// ============================================================

impl LibroConfig {
    /// Parse a TOML file. Unlike `discover`, a missing or broken file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))?;
        tracing::info!("Loaded config from {}", path.display());
        config.validate()?;
        Ok(config)
    }

    /// Load ./libro.toml if present, otherwise defaults. Env overrides applied.
    pub fn discover() -> Result<Self> {
        let path = Path::new(DEFAULT_CONFIG_FILE);
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            tracing::info!("No config at {} - using defaults", path.display());
            Self::default()
        };
        config.apply_env(|k| std::env::var(k).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply LIBRO_* overrides. Takes a lookup so tests need not touch the process env.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = lookup("LIBRO_MODEL") {
            self.llm.model = model;
        }
        if let Some(url) = lookup("LIBRO_BASE_URL") {
            self.llm.base_url = Some(url);
        }
        if let Some(n) = lookup("LIBRO_MAX_ITERATIONS").and_then(|v| v.parse().ok()) {
            self.agent.max_iterations = n;
        }
        if let Some(path) = lookup("LIBRO_CATALOG") {
            self.catalog.path = Some(PathBuf::from(path));
        }
        if let Some(prompt) = lookup("LIBRO_SYSTEM_PROMPT") {
            self.agent.system_prompt = Some(prompt);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent.max_iterations == 0 {
            return Err(Error::ConfigError("agent.max_iterations must be at least 1".into()));
        }
        if self.agent.llm_timeout_ms == 0 || self.agent.tool_timeout_ms == 0 {
            return Err(Error::ConfigError("agent timeouts must be greater than zero".into()));
        }
        if self.llm.model.trim().is_empty() {
            return Err(Error::ConfigError("llm.model must not be empty".into()));
        }
        Ok(())
    }

    /// Credential from the configured environment variable.
    pub fn api_key(&self) -> Option<Secret> {
        std::env::var(&self.llm.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(Secret::new)
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}
