//! Configuration for the query router
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (~/.config/prysm/config.toml)
//! 3. Built-in defaults (lowest priority)

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

mod providers;

#[cfg(test)]
mod tests;

pub use providers::{
    LoadBalancing, Pipeline, ProviderSettings, ProvidersConfig, DEFAULT_CLAUDE_WORKER_MODEL,
    DEFAULT_GEMINI_MODEL, DEFAULT_OPENAI_MODEL, DEFAULT_ORCHESTRATION_MODEL,
};

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP surface binds to
    pub bind_addr: SocketAddr,

    /// Log level when RUST_LOG is not set
    pub log_level: String,

    /// Dev-mode reload flag, surfaced for parity with the deploy scripts
    pub reload: bool,

    /// Redis connection URL; in-memory store when unset
    pub redis_url: Option<String>,

    /// Cache TTL in seconds for request state
    pub redis_ttl_secs: u64,

    /// Origin allowed by the CORS policy
    pub frontend_url: String,

    /// Deployment environment name (development, staging, production)
    pub environment: String,

    /// Worker provider credentials
    pub providers: ProvidersConfig,

    /// Orchestration-model id for the enhancer (key shared with OpenAI)
    pub orchestration_model: String,

    /// Load balancing and circuit breaking
    pub load_balancing: LoadBalancing,

    /// Pipeline concurrency and sizing
    pub pipeline: Pipeline,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".parse().expect("static addr"),
            log_level: "info".to_string(),
            reload: false,
            redis_url: None,
            redis_ttl_secs: 3600,
            frontend_url: "http://localhost:3000".to_string(),
            environment: "development".to_string(),
            providers: ProvidersConfig::default(),
            orchestration_model: DEFAULT_ORCHESTRATION_MODEL.to_string(),
            load_balancing: LoadBalancing::default(),
            pipeline: Pipeline::default(),
        }
    }
}

/// Config file structure (subset of Config that makes sense to persist)
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
    pub redis_url: Option<String>,
    pub redis_ttl_secs: Option<u64>,
    pub frontend_url: Option<String>,
    pub environment: Option<String>,
    pub orchestration_model: Option<String>,
    #[serde(default)]
    pub load_balancing: Option<LoadBalancing>,
    #[serde(default)]
    pub pipeline: Option<Pipeline>,
}

impl Config {
    /// Platform config file path (~/.config/prysm/config.toml)
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("prysm").join("config.toml"))
    }

    /// Load configuration: defaults, then config file, then environment
    pub fn load() -> Self {
        let mut config = Config::default();

        if let Some(file) = Self::read_file() {
            config.apply_file(file);
        }
        config.apply_env();
        config
    }

    fn read_file() -> Option<FileConfig> {
        let path = Self::config_path()?;
        let raw = std::fs::read_to_string(&path).ok()?;
        match toml::from_str(&raw) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                eprintln!("warning: failed to parse {}: {e}", path.display());
                None
            }
        }
    }

    fn apply_file(&mut self, file: FileConfig) {
        let default_addr = self.bind_addr;
        let host = file
            .host
            .unwrap_or_else(|| default_addr.ip().to_string());
        let port = file.port.unwrap_or_else(|| default_addr.port());
        if let Ok(addr) = format!("{host}:{port}").parse() {
            self.bind_addr = addr;
        }

        if let Some(level) = file.log_level {
            self.log_level = level;
        }
        if file.redis_url.is_some() {
            self.redis_url = file.redis_url;
        }
        if let Some(ttl) = file.redis_ttl_secs {
            self.redis_ttl_secs = ttl;
        }
        if let Some(url) = file.frontend_url {
            self.frontend_url = url;
        }
        if let Some(environment) = file.environment {
            self.environment = environment;
        }
        if let Some(model) = file.orchestration_model {
            self.orchestration_model = model;
        }
        if let Some(lb) = file.load_balancing {
            self.load_balancing = lb;
        }
        if let Some(pipeline) = file.pipeline {
            self.pipeline = pipeline;
        }
    }

    fn apply_env(&mut self) {
        let env = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        let host = env("API_HOST").unwrap_or_else(|| self.bind_addr.ip().to_string());
        let port = env("API_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or_else(|| self.bind_addr.port());
        if let Ok(addr) = format!("{host}:{port}").parse() {
            self.bind_addr = addr;
        } else {
            eprintln!("warning: invalid API_HOST/API_PORT, keeping {}", self.bind_addr);
        }

        if let Some(level) = env("API_LOG_LEVEL") {
            self.log_level = level.to_lowercase();
        }
        if let Some(reload) = env("API_RELOAD") {
            self.reload = matches!(reload.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(url) = env("REDIS_URL") {
            self.redis_url = Some(url);
        }
        if let Some(ttl) = env("REDIS_TTL").and_then(|t| t.parse().ok()) {
            self.redis_ttl_secs = ttl;
        }
        if let Some(url) = env("FRONTEND_URL") {
            self.frontend_url = url;
        }
        if let Some(environment) = env("ENVIRONMENT") {
            self.environment = environment;
        }

        self.providers = ProvidersConfig::from_env();
    }

    /// The enhancer runs only when an OpenAI key is present (it shares the
    /// orchestration-model account)
    pub fn orchestration_key(&self) -> Option<&str> {
        self.providers.openai.as_ref().map(|p| p.api_key.as_str())
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}
