use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SayrError};
use crate::knowledge::SearchType;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    7777
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    OpenAi,
    #[default]
    OpenRouter,
    Gemini,
}

impl ModelProvider {
    /// Conventional environment variable holding this provider's key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            ModelProvider::OpenAi => "OPENAI_API_KEY",
            ModelProvider::OpenRouter => "OPENROUTER_API_KEY",
            ModelProvider::Gemini => "GOOGLE_API_KEY",
        }
    }
}

impl std::str::FromStr for ModelProvider {
    type Err = SayrError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "openai" => Ok(ModelProvider::OpenAi),
            "openrouter" => Ok(ModelProvider::OpenRouter),
            "gemini" | "google" => Ok(ModelProvider::Gemini),
            other => Err(SayrError::Config(format!("unknown model provider `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: ModelProvider,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub stream: bool,
}

impl ModelConfig {
    pub fn new(provider: ModelProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            api_key: None,
            base_url: None,
            timeout_secs: default_timeout_secs(),
            stream: false,
        }
    }

    /// Fill a missing key from the provider's conventional environment variable.
    pub fn with_env_credentials(mut self) -> Self {
        if self.api_key.is_none() {
            self.api_key = env::var(self.provider.api_key_env()).ok();
        }
        self
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::new(ModelProvider::OpenRouter, "z-ai/glm-4.6v")
    }
}

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    File,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_storage_path")]
    pub file_path: String,
    #[serde(default)]
    pub database_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            file_path: default_storage_path(),
            database_url: None,
        }
    }
}

fn default_storage_path() -> String {
    "tmp/sessions.jsonl".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeConfig {
    #[serde(default)]
    pub search_type: SearchType,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub chunk_overlap: usize,
    #[serde(default)]
    pub min_score: f32,
    #[serde(default = "default_embedding_buckets")]
    pub embedding_buckets: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            search_type: SearchType::default(),
            max_results: default_max_results(),
            chunk_size: default_chunk_size(),
            chunk_overlap: 0,
            min_score: 0.0,
            embedding_buckets: default_embedding_buckets(),
        }
    }
}

fn default_max_results() -> usize {
    5
}

fn default_chunk_size() -> usize {
    5000
}

fn default_embedding_buckets() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentDefaults {
    #[serde(default = "default_history_runs")]
    pub num_history_runs: usize,
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,
    #[serde(default = "default_markdown")]
    pub markdown: bool,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            num_history_runs: default_history_runs(),
            max_tool_calls: default_max_tool_calls(),
            markdown: default_markdown(),
        }
    }
}

fn default_history_runs() -> usize {
    3
}

pub(crate) fn default_max_tool_calls() -> usize {
    10
}

fn default_markdown() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub agent: AgentDefaults,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|err| SayrError::Config(format!("failed to parse configuration: {err}")))
    }

    /// Load `.env`, then the file if it exists, then apply `SAYR_*` overrides
    /// and the provider's conventional credential variable.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();
        let path = path.as_ref();
        let mut cfg = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        cfg.apply_env_overrides()?;
        cfg.model = cfg.model.with_env_credentials();
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = env::var("SAYR_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("SAYR_PORT") {
            self.server.port = port
                .parse()
                .map_err(|err| SayrError::Config(format!("invalid SAYR_PORT `{port}`: {err}")))?;
        }
        if let Ok(provider) = env::var("SAYR_MODEL_PROVIDER") {
            self.model.provider = provider.parse()?;
        }
        if let Ok(model) = env::var("SAYR_MODEL") {
            self.model.model = model;
        }
        if let Ok(key) = env::var("SAYR_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Ok(url) = env::var("SAYR_BASE_URL") {
            self.model.base_url = Some(url);
        }
        if let Ok(stream) = env::var("SAYR_STREAMING") {
            if let Ok(parsed) = stream.parse::<bool>() {
                self.model.stream = parsed;
            }
        }
        if let Ok(backend) = env::var("SAYR_STORAGE_BACKEND") {
            self.storage.backend = match backend.to_ascii_lowercase().as_str() {
                "sqlite" => StorageBackend::Sqlite,
                "file" => StorageBackend::File,
                _ => StorageBackend::Memory,
            };
        }
        if let Ok(path) = env::var("SAYR_STORAGE_PATH") {
            self.storage.file_path = path;
        }
        if let Ok(url) = env::var("SAYR_DATABASE_URL") {
            self.storage.database_url = Some(url);
        }
        if let Ok(runs) = env::var("SAYR_HISTORY_RUNS") {
            if let Ok(parsed) = runs.parse::<usize>() {
                self.agent.num_history_runs = parsed;
            }
        }
        Ok(())
    }
}
