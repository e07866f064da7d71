// Provider adapters - uniform generate() over remote LLMs
//
// Each adapter implements `LlmProvider`. The manager wraps adapters in a
// `ProviderHandle`, which owns the per-adapter shared state (metrics, health,
// circuit breaker) and the process-request path: validation, timing, metric
// and health updates. Locks are std mutexes with short critical sections and
// are never held across an await.

pub mod anthropic;
pub mod circuit;
pub mod google;
pub mod manager;
pub mod models;
pub mod openai;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use circuit::CircuitBreaker;
use models::{
    Capability, LlmRequest, LlmResponse, ProviderError, ProviderErrorKind, ProviderHealth,
    ProviderId, ProviderMetrics,
};

/// Uniform interface over one remote LLM
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    fn model(&self) -> &str;

    /// Validate configuration with one probing call. Auth failures are
    /// non-retryable.
    async fn initialize(&self) -> Result<(), ProviderError>;

    /// Generate a response for the request
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError>;

    /// Cheap liveness probe used by the manager's background loop
    async fn health_check(&self) -> bool;

    /// Capabilities of the configured model (per-model, not per-vendor)
    fn capabilities(&self) -> Vec<Capability>;

    /// Provider-specific token estimate; allowed to be 10-25% off
    fn estimate_tokens(&self, text: &str) -> u32;

    /// Upper bound for a single request
    fn max_tokens(&self) -> u32;

    async fn shutdown(&self) {}
}

/// An adapter plus its process-wide mutable state
pub struct ProviderHandle {
    pub provider: Arc<dyn LlmProvider>,
    metrics: Mutex<ProviderMetrics>,
    health: Mutex<ProviderHealth>,
    pub(crate) breaker: Mutex<CircuitBreaker>,
}

impl ProviderHandle {
    pub fn new(provider: Arc<dyn LlmProvider>, breaker_threshold: u32, breaker_timeout: Duration) -> Self {
        Self {
            provider,
            metrics: Mutex::new(ProviderMetrics::default()),
            health: Mutex::new(ProviderHealth::default()),
            breaker: Mutex::new(CircuitBreaker::new(breaker_threshold, breaker_timeout)),
        }
    }

    pub fn id(&self) -> ProviderId {
        self.provider.id()
    }

    pub fn metrics(&self) -> ProviderMetrics {
        self.metrics.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn health(&self) -> ProviderHealth {
        self.health.lock().map(|h| h.clone()).unwrap_or_default()
    }

    pub fn is_available(&self) -> bool {
        self.health
            .lock()
            .map(|h| h.is_available())
            .unwrap_or(false)
    }

    /// Record the outcome of a scheduled health check
    pub fn record_health_check(&self, healthy: bool, response_time_ms: f64) {
        if let Ok(mut health) = self.health.lock() {
            if healthy {
                health.mark_success(response_time_ms);
            } else {
                health.mark_failure("health check failed", false);
            }
        }
    }

    /// Validate, time, and dispatch one request, updating metrics and health
    ///
    /// Unknown failures are converted into the typed error with
    /// retryable=true so the manager can fail over.
    pub async fn process_request(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError> {
        let provider_id = self.provider.id();

        // Validation failures never touch metrics or health
        if request.prompt.trim().is_empty() {
            return Err(ProviderError::new(
                provider_id.as_str(),
                ProviderErrorKind::InvalidRequest,
                "prompt cannot be empty",
            ));
        }
        let estimated = self.provider.estimate_tokens(&request.prompt);
        let limit = request.max_tokens.unwrap_or_else(|| self.provider.max_tokens());
        if estimated > limit {
            return Err(ProviderError::new(
                provider_id.as_str(),
                ProviderErrorKind::InvalidRequest,
                format!("prompt too long: ~{estimated} tokens > {limit} limit"),
            ));
        }

        let start = Instant::now();
        let result = self.provider.generate(request).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(mut response) => {
                response.latency_ms = latency_ms;
                if let Ok(mut metrics) = self.metrics.lock() {
                    metrics.record(true, latency_ms, response.tokens_used);
                }
                if let Ok(mut health) = self.health.lock() {
                    health.mark_success(latency_ms);
                }
                tracing::debug!(
                    provider = %provider_id,
                    latency_ms = latency_ms as u64,
                    tokens = response.tokens_used,
                    "request completed"
                );
                Ok(response)
            }
            Err(error) => {
                let rate_limited = error.kind == ProviderErrorKind::RateLimit;
                if let Ok(mut metrics) = self.metrics.lock() {
                    metrics.record(false, latency_ms, 0);
                    if rate_limited {
                        metrics.rate_limit_hits += 1;
                    }
                }
                if let Ok(mut health) = self.health.lock() {
                    health.mark_failure(&error.message, rate_limited);
                }
                tracing::warn!(
                    provider = %provider_id,
                    kind = ?error.kind,
                    "request failed: {}",
                    error.message
                );
                Err(error)
            }
        }
    }
}

/// Map an HTTP status from a provider API onto the error taxonomy
pub(crate) fn classify_status(provider: ProviderId, status: u16, body: &str) -> ProviderError {
    let kind = match status {
        401 | 403 => ProviderErrorKind::Authentication,
        429 => ProviderErrorKind::RateLimit,
        400 | 422 => ProviderErrorKind::InvalidRequest,
        500..=599 => ProviderErrorKind::Server,
        _ => ProviderErrorKind::Unexpected,
    };
    ProviderError::new(
        provider.as_str(),
        kind,
        format!("HTTP {status}: {}", crate::util::truncate_utf8_safe(body, 300)),
    )
}
