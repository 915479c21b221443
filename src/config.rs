use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::usage::Pricing;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub knowledge_base: KnowledgeBaseConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub pricing: Pricing,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_prompt_caching")]
    pub prompt_caching: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Initial state of the web search hint; toggled per session.
    #[serde(default)]
    pub web_search: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            prompt_caching: default_prompt_caching(),
            timeout_secs: default_timeout_secs(),
            web_search: false,
        }
    }
}

fn default_endpoint() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4-20250514".to_string()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_prompt_caching() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeBaseConfig {
    #[serde(default = "default_kb_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            dir: default_kb_dir(),
            include_globs: default_include_globs(),
        }
    }
}

fn default_kb_dir() -> PathBuf {
    PathBuf::from("./knowledge_base")
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
        "**/*.json".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_snippets_per_document")]
    pub snippets_per_document: usize,
    #[serde(default = "default_context_chars")]
    pub context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            snippets_per_document: default_snippets_per_document(),
            context_chars: default_context_chars(),
        }
    }
}

fn default_max_results() -> usize {
    3
}
fn default_snippets_per_document() -> usize {
    2
}
fn default_context_chars() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct SettingsConfig {
    #[serde(default = "default_settings_path")]
    pub path: PathBuf,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            path: default_settings_path(),
        }
    }
}

fn default_settings_path() -> PathBuf {
    PathBuf::from("./kbchat_settings.json")
}

/// Environment variable that overrides the persisted API key.
pub const API_KEY_ENV: &str = "KBCHAT_API_KEY";

/// Load the TOML config at `path`, falling back to built-in defaults when
/// the file does not exist. A file that exists but fails to parse or
/// validate is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.api.endpoint.trim().is_empty() {
        anyhow::bail!("api.endpoint must not be empty");
    }

    if config.api.max_tokens == 0 {
        anyhow::bail!("api.max_tokens must be > 0");
    }

    if config.retrieval.max_results < 1 {
        anyhow::bail!("retrieval.max_results must be >= 1");
    }

    if config.retrieval.snippets_per_document < 1 {
        anyhow::bail!("retrieval.snippets_per_document must be >= 1");
    }

    let p = &config.pricing;
    for (name, rate) in [
        ("input_per_m", p.input_per_m),
        ("output_per_m", p.output_per_m),
        ("cache_write_per_m", p.cache_write_per_m),
        ("cache_read_per_m", p.cache_read_per_m),
    ] {
        if rate.is_nan() || rate < 0.0 {
            anyhow::bail!("pricing.{} must be >= 0", name);
        }
    }

    Ok(())
}
