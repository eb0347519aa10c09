use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Bearer token sent with every request. Overridden by `token_env`.
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_token_env() -> String {
    "CORPUS_API_TOKEN".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default = "default_apology")]
    pub apology: String,
    /// Server-side prompt template name, sent as a query parameter.
    #[serde(default)]
    pub prompt_template: Option<String>,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
            apology: default_apology(),
            prompt_template: None,
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_greeting() -> String {
    "Hello! Ask me anything about your documents.".to_string()
}
fn default_apology() -> String {
    "Sorry, there was an error processing your message.".to_string()
}
fn default_debounce_ms() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

fn default_page_size() -> u32 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Config {
    /// Defaults pointing at a backend on localhost, used when no config
    /// file is present.
    pub fn minimal() -> Self {
        Self {
            api: ApiConfig {
                base_url: "http://localhost:8000".to_string(),
                timeout_secs: default_timeout_secs(),
                bearer_token: None,
                token_env: default_token_env(),
            },
            retry: RetryConfig::default(),
            chat: ChatConfig::default(),
            documents: DocumentsConfig::default(),
            upload: UploadConfig::default(),
        }
    }

    /// Token from the environment if set, otherwise the configured one.
    pub fn resolve_token(&self) -> Option<String> {
        std::env::var(&self.api.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.api.bearer_token.clone())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let base = config.api.base_url.trim();
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        anyhow::bail!("api.base_url must start with http:// or https://");
    }

    if config.api.timeout_secs == 0 {
        anyhow::bail!("api.timeout_secs must be > 0");
    }

    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be >= 1");
    }

    // The server rejects larger pages.
    if !(1..=100).contains(&config.documents.page_size) {
        anyhow::bail!("documents.page_size must be in [1, 100]");
    }

    if config.upload.chunk_size == 0 {
        anyhow::bail!("upload.chunk_size must be > 0");
    }

    Ok(())
}
