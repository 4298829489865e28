//! Configuration parsing and validation.
//!
//! TeamKB is configured via a TOML file passed with `--config`. The file
//! names the SQLite database, the blob root for uploaded files, ingestion
//! worker settings, and the AI provider settings.
//!
//! API keys may live in the file or in the environment
//! (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `GEMINI_API_KEY`); the file wins
//! when both are set.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/kb.sqlite"
//!
//! [storage]
//! root = "./data/blobs"
//!
//! [ai]
//! enabled = true
//! provider = "openai"
//!
//! [ai.providers.openai]
//! key = "sk-..."
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Providers that can generate embeddings.
pub const EMBEDDING_PROVIDERS: &[&str] = &["mock", "openai", "gemini"];

/// Providers that can generate chat completions.
pub const CHAT_PROVIDERS: &[&str] = &["mock", "openai", "anthropic", "gemini"];

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub ai: AiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/blobs")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Background workers draining the processing queue.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_document_bytes: default_max_document_bytes(),
        }
    }
}

fn default_workers() -> usize {
    2
}
fn default_max_document_bytes() -> u64 {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Chat provider, and the embedding provider unless
    /// `embedding_provider` is set.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub embedding_provider: Option<String>,
    /// Chat model override applied on top of the provider default.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            embedding_provider: None,
            model: None,
            timeout_secs: default_timeout_secs(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            embedding_dimension: default_embedding_dimension(),
            providers: ProvidersConfig::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_output_tokens() -> u32 {
    700
}
fn default_temperature() -> f32 {
    0.3
}
fn default_embedding_dimension() -> usize {
    1536
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub mock: ProviderSettings,
    #[serde(default)]
    pub openai: ProviderSettings,
    #[serde(default)]
    pub anthropic: ProviderSettings,
    #[serde(default)]
    pub gemini: ProviderSettings,
}

/// Per-provider overrides. Unset fields fall back to built-in defaults.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProviderSettings {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

struct BuiltinProvider {
    chat_model: &'static str,
    embedding_model: &'static str,
    base_url: &'static str,
    key_env: Option<&'static str>,
}

fn builtin(provider: &str) -> Option<BuiltinProvider> {
    match provider {
        "mock" => Some(BuiltinProvider {
            chat_model: "mock",
            embedding_model: "mock",
            base_url: "",
            key_env: None,
        }),
        "openai" => Some(BuiltinProvider {
            chat_model: "gpt-4o-mini",
            embedding_model: "text-embedding-3-small",
            base_url: "https://api.openai.com/v1",
            key_env: Some("OPENAI_API_KEY"),
        }),
        "anthropic" => Some(BuiltinProvider {
            chat_model: "claude-3-5-haiku-20241022",
            embedding_model: "",
            base_url: "https://api.anthropic.com/v1",
            key_env: Some("ANTHROPIC_API_KEY"),
        }),
        "gemini" => Some(BuiltinProvider {
            chat_model: "gemini-2.5-flash",
            embedding_model: "gemini-embedding-001",
            base_url: "https://generativelanguage.googleapis.com/v1beta",
            key_env: Some("GEMINI_API_KEY"),
        }),
        _ => None,
    }
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|v| !v.trim().is_empty())
}

impl AiConfig {
    pub fn settings(&self, provider: &str) -> Option<&ProviderSettings> {
        match provider {
            "mock" => Some(&self.providers.mock),
            "openai" => Some(&self.providers.openai),
            "anthropic" => Some(&self.providers.anthropic),
            "gemini" => Some(&self.providers.gemini),
            _ => None,
        }
    }

    /// Name of the provider used for embeddings.
    pub fn embedding_provider_name(&self) -> &str {
        self.embedding_provider
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(&self.provider)
    }

    /// Non-empty API key for `provider`, if any.
    pub fn api_key(&self, provider: &str) -> Option<&str> {
        self.settings(provider).and_then(|s| non_empty(&s.key))
    }

    /// Chat model: `ai.model`, then the provider's `default_model`, then the
    /// built-in default.
    pub fn chat_model(&self, provider: &str) -> String {
        if let Some(m) = non_empty(&self.model) {
            return m.to_string();
        }
        self.settings(provider)
            .and_then(|s| non_empty(&s.default_model))
            .map(str::to_string)
            .or_else(|| builtin(provider).map(|b| b.chat_model.to_string()))
            .unwrap_or_else(|| "gpt-4o-mini".to_string())
    }

    pub fn embedding_model(&self, provider: &str) -> String {
        self.settings(provider)
            .and_then(|s| non_empty(&s.embedding_model))
            .map(str::to_string)
            .or_else(|| {
                builtin(provider)
                    .map(|b| b.embedding_model)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "text-embedding-3-small".to_string())
    }

    /// API base URL without a trailing slash.
    pub fn base_url(&self, provider: &str) -> String {
        let url = self
            .settings(provider)
            .and_then(|s| non_empty(&s.base_url))
            .map(str::to_string)
            .or_else(|| builtin(provider).map(|b| b.base_url.to_string()))
            .unwrap_or_default();
        url.trim_end_matches('/').to_string()
    }

    /// Fill missing API keys from the provider's environment variable.
    pub fn apply_env_overrides(&mut self) {
        for provider in ["openai", "anthropic", "gemini"] {
            let Some(var) = builtin(provider).and_then(|b| b.key_env) else {
                continue;
            };
            if self.api_key(provider).is_some() {
                continue;
            }
            if let Ok(value) = std::env::var(var) {
                if !value.trim().is_empty() {
                    let settings = match provider {
                        "openai" => &mut self.providers.openai,
                        "anthropic" => &mut self.providers.anthropic,
                        _ => &mut self.providers.gemini,
                    };
                    settings.key = Some(value);
                }
            }
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.ai.embedding_dimension == 0 {
            anyhow::bail!("ai.embedding_dimension must be > 0");
        }
        if self.ai.timeout_secs == 0 {
            anyhow::bail!("ai.timeout_secs must be > 0");
        }
        if self.ai.max_output_tokens == 0 {
            anyhow::bail!("ai.max_output_tokens must be > 0");
        }
        if !(0.0..=2.0).contains(&self.ai.temperature) {
            anyhow::bail!("ai.temperature must be in [0.0, 2.0]");
        }
        if self.ingest.workers == 0 {
            anyhow::bail!("ingest.workers must be >= 1");
        }
        if self.ingest.max_document_bytes == 0 {
            anyhow::bail!("ingest.max_document_bytes must be > 0");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.ai.apply_env_overrides();
    config.validate()?;

    Ok(config)
}
