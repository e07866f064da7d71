// Data model for provider adapters: identities, capabilities, requests,
// responses, metrics, health, and the typed provider error

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Google,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Google => "google",
        }
    }

    pub const ALL: [ProviderId; 3] = [
        ProviderId::OpenAi,
        ProviderId::Anthropic,
        ProviderId::Google,
    ];
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Availability status of an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Available,
    Degraded,
    Unavailable,
    RateLimited,
    Maintenance,
}

/// What a configured model can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    TextGeneration,
    CodeAnalysis,
    SensitiveData,
    Vision,
    FunctionCalling,
    Embedding,
}

/// Static configuration for one adapter
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: ProviderId,
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub timeout_secs: u64,
}

impl ProviderConfig {
    pub fn new(provider: ProviderId, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            base_url: None,
            model: model.into(),
            max_tokens: 4000,
            temperature: 0.7,
            timeout_secs: 30,
        }
    }
}

/// Request to an LLM provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub request_id: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fragment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub requires_sensitive_handling: bool,
}

impl LlmRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            fragment_id: None,
            max_tokens: None,
            system_prompt: None,
            requires_sensitive_handling: false,
        }
    }
}

/// Response from an LLM provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub request_id: String,
    pub provider: ProviderId,
    pub content: String,
    pub finish_reason: String,
    pub tokens_used: u32,
    pub latency_ms: f64,
    pub model_used: String,
    pub timestamp: DateTime<Utc>,
}

/// Category of a provider failure, used to decide retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    RateLimit,
    Authentication,
    Server,
    SafetyFilter,
    Timeout,
    CircuitOpen,
    NoProviders,
    AllProvidersFailed,
    NoAvailableProviders,
    InvalidRequest,
    Unexpected,
}

/// Typed error carried out of an adapter or the manager
#[derive(Debug, Clone, thiserror::Error)]
#[error("{provider}: {kind:?}: {message}")]
pub struct ProviderError {
    pub provider: String,
    pub kind: ProviderErrorKind,
    pub message: String,
    pub retryable: bool,
    /// Seconds to wait before retrying, when the provider said so
    pub retry_after: Option<u64>,
}

impl ProviderError {
    pub fn new(
        provider: impl Into<String>,
        kind: ProviderErrorKind,
        message: impl Into<String>,
    ) -> Self {
        let retryable = !matches!(
            kind,
            ProviderErrorKind::Authentication
                | ProviderErrorKind::SafetyFilter
                | ProviderErrorKind::InvalidRequest
        );
        Self {
            provider: provider.into(),
            kind,
            message: message.into(),
            retryable,
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }
}

/// Rolling performance metrics for one adapter
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_latency_ms: f64,
    pub total_tokens_used: u64,
    pub rate_limit_hits: u64,
    pub last_request_time: Option<DateTime<Utc>>,
}

impl ProviderMetrics {
    /// Success rate in [0,1]; a fresh adapter counts as fully successful so
    /// filtering does not starve it of its first request
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    /// Record one request outcome, maintaining the running latency average
    pub fn record(&mut self, success: bool, latency_ms: f64, tokens_used: u32) {
        self.total_requests += 1;
        self.last_request_time = Some(Utc::now());

        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }

        if self.total_requests == 1 {
            self.average_latency_ms = latency_ms;
        } else {
            self.average_latency_ms = (self.average_latency_ms
                * (self.total_requests - 1) as f64
                + latency_ms)
                / self.total_requests as f64;
        }

        self.total_tokens_used += tokens_used as u64;
    }
}

/// Health state for one adapter, driven solely by request outcomes and
/// scheduled health checks
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub status: ProviderStatus,
    pub consecutive_failures: u32,
    pub last_response_time_ms: Option<f64>,
    pub last_error: Option<String>,
    pub last_check: Option<DateTime<Utc>>,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            status: ProviderStatus::Available,
            consecutive_failures: 0,
            last_response_time_ms: None,
            last_error: None,
            last_check: None,
        }
    }
}

impl ProviderHealth {
    /// A success resets the failure counter and restores availability
    pub fn mark_success(&mut self, response_time_ms: f64) {
        self.consecutive_failures = 0;
        self.status = ProviderStatus::Available;
        self.last_response_time_ms = Some(response_time_ms);
        self.last_error = None;
        self.last_check = Some(Utc::now());
    }

    /// A failure increments the counter: 3 consecutive failures demote to
    /// degraded, 5 to unavailable; rate limiting is tracked as its own status
    pub fn mark_failure(&mut self, error: &str, rate_limited: bool) {
        self.consecutive_failures += 1;
        self.last_error = Some(error.to_string());
        self.last_check = Some(Utc::now());

        if rate_limited {
            self.status = ProviderStatus::RateLimited;
        } else if self.consecutive_failures >= 5 {
            self.status = ProviderStatus::Unavailable;
        } else if self.consecutive_failures >= 3 {
            self.status = ProviderStatus::Degraded;
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == ProviderStatus::Available
    }
}

/// Load-balancing strategies the manager can be constructed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    RoundRobin,
    Random,
    Weighted,
    Performance,
    CostOptimized,
}

/// Cost preference for the cost-optimized strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostPreference {
    Low,
    #[default]
    Balanced,
    High,
}

/// Manager-wide load balancing configuration
#[derive(Debug, Clone)]
pub struct LoadBalancingConfig {
    pub strategy: LoadBalancingStrategy,
    pub weights: HashMap<ProviderId, f64>,
    pub health_check_interval_secs: u64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout_secs: u64,
}

impl Default for LoadBalancingConfig {
    fn default() -> Self {
        Self {
            strategy: LoadBalancingStrategy::RoundRobin,
            weights: HashMap::new(),
            health_check_interval_secs: 60,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_secs: 300,
        }
    }
}

/// Criteria for narrowing and ordering candidate providers per request
#[derive(Debug, Clone, Default)]
pub struct SelectionCriteria {
    pub required_capabilities: Vec<Capability>,
    /// Allowlist; empty means any provider
    pub preferred_providers: Vec<ProviderId>,
    pub min_success_rate: f64,
    pub max_latency_ms: Option<f64>,
    pub cost_preference: CostPreference,
}
