// Provider and load-balancing configuration

use serde::Deserialize;

use crate::providers::models::{LoadBalancingStrategy, ProviderId};

/// Default worker models per provider
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_CLAUDE_WORKER_MODEL: &str = "claude-3-5-haiku-20241022";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

/// Model used by the enhancer/aggregator, never by fragment dispatch
pub const DEFAULT_ORCHESTRATION_MODEL: &str = "gpt-4o-mini";

/// Credentials and model choice for one worker provider
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub provider: ProviderId,
    pub api_key: String,
    pub model: String,
}

/// All configured providers; a provider with no key stays disabled
#[derive(Debug, Clone, Default)]
pub struct ProvidersConfig {
    pub openai: Option<ProviderSettings>,
    pub anthropic: Option<ProviderSettings>,
    pub google: Option<ProviderSettings>,
}

impl ProvidersConfig {
    /// Read `*_API_KEY` / model-override variables from the environment
    pub fn from_env() -> Self {
        let read = |key_var: &str, model_var: &str, provider: ProviderId, default_model: &str| {
            std::env::var(key_var)
                .ok()
                .filter(|k| !k.trim().is_empty())
                .map(|api_key| ProviderSettings {
                    provider,
                    api_key,
                    model: std::env::var(model_var)
                        .ok()
                        .filter(|m| !m.trim().is_empty())
                        .unwrap_or_else(|| default_model.to_string()),
                })
        };

        Self {
            openai: read(
                "OPENAI_API_KEY",
                "OPENAI_MODEL",
                ProviderId::OpenAi,
                DEFAULT_OPENAI_MODEL,
            ),
            anthropic: read(
                "ANTHROPIC_API_KEY",
                "CLAUDE_WORKER_MODEL",
                ProviderId::Anthropic,
                DEFAULT_CLAUDE_WORKER_MODEL,
            ),
            google: read(
                "GOOGLE_API_KEY",
                "GEMINI_MODEL",
                ProviderId::Google,
                DEFAULT_GEMINI_MODEL,
            ),
        }
    }

    pub fn configured(&self) -> Vec<&ProviderSettings> {
        [&self.openai, &self.anthropic, &self.google]
            .into_iter()
            .flatten()
            .collect()
    }

    pub fn any_configured(&self) -> bool {
        !self.configured().is_empty()
    }
}

/// Load-balancing section of the config file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoadBalancing {
    pub strategy: LoadBalancingStrategy,
    pub health_check_interval_secs: u64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout_secs: u64,
}

impl Default for LoadBalancing {
    fn default() -> Self {
        Self {
            strategy: LoadBalancingStrategy::RoundRobin,
            health_check_interval_secs: 60,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_secs: 300,
        }
    }
}

/// Pipeline section of the config file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Pipeline {
    pub max_concurrent_requests: usize,
    pub request_timeout_secs: u64,
    pub max_fragment_size: usize,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 10,
            request_timeout_secs: 30,
            max_fragment_size: 2000,
        }
    }
}
