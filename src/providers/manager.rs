// Provider manager - load balancing, failover and circuit breaking
//
// Owns one `ProviderHandle` per adapter. Selection is a two-step function:
// filter candidates by criteria, then order them by the configured
// load-balancing strategy. Dispatch walks the ordered list through each
// adapter's circuit breaker, advancing on retryable failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::pricing;

use super::models::{
    CostPreference, LlmRequest, LlmResponse, LoadBalancingConfig, LoadBalancingStrategy,
    ProviderError, ProviderErrorKind, ProviderHealth, ProviderId, ProviderMetrics,
    SelectionCriteria,
};
use super::{circuit::CircuitState, LlmProvider, ProviderHandle};

/// Snapshot of one adapter for operational views
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProviderSnapshot {
    pub provider: ProviderId,
    pub model: String,
    pub health: ProviderHealth,
    pub metrics: ProviderMetrics,
    pub circuit_state: CircuitState,
}

pub struct ProviderManager {
    config: LoadBalancingConfig,
    handles: HashMap<ProviderId, Arc<ProviderHandle>>,
    round_robin: AtomicUsize,
}

impl ProviderManager {
    pub fn new(config: LoadBalancingConfig) -> Self {
        Self {
            config,
            handles: HashMap::new(),
            round_robin: AtomicUsize::new(0),
        }
    }

    /// Register and initialize an adapter. Auth failures surface here as
    /// non-retryable errors so startup can skip the provider.
    pub async fn add_provider(&mut self, provider: Arc<dyn LlmProvider>) -> Result<(), ProviderError> {
        provider.initialize().await?;
        let id = provider.id();
        let handle = Arc::new(ProviderHandle::new(
            provider,
            self.config.circuit_breaker_threshold,
            Duration::from_secs(self.config.circuit_breaker_timeout_secs),
        ));
        self.handles.insert(id, handle);
        tracing::info!("provider {id} registered");
        Ok(())
    }

    /// Register an adapter without the initialization probe (tests, startup
    /// with deferred validation)
    pub fn add_provider_unchecked(&mut self, provider: Arc<dyn LlmProvider>) {
        let id = provider.id();
        let handle = Arc::new(ProviderHandle::new(
            provider,
            self.config.circuit_breaker_threshold,
            Duration::from_secs(self.config.circuit_breaker_timeout_secs),
        ));
        self.handles.insert(id, handle);
    }

    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.handles.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn available_providers(&self) -> Vec<ProviderId> {
        self.handles
            .iter()
            .filter(|(_, h)| h.is_available())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Providers that are healthy AND whose circuit would let a call through
    /// right now; empty means dispatch would fail immediately
    pub fn dispatchable_providers(&self) -> Vec<ProviderId> {
        self.handles
            .iter()
            .filter(|(_, h)| {
                h.is_available()
                    && h.breaker.lock().map(|b| b.would_allow()).unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn snapshots(&self) -> Vec<ProviderSnapshot> {
        let mut snapshots: Vec<ProviderSnapshot> = self
            .handles
            .values()
            .map(|h| ProviderSnapshot {
                provider: h.id(),
                model: h.provider.model().to_string(),
                health: h.health(),
                metrics: h.metrics(),
                circuit_state: h
                    .breaker
                    .lock()
                    .map(|b| b.state())
                    .unwrap_or(CircuitState::Open),
            })
            .collect();
        snapshots.sort_by_key(|s| s.provider.as_str());
        snapshots
    }

    /// Process a request on the best available provider, failing over down
    /// the ordered candidate list
    pub async fn process_request(
        &self,
        request: &LlmRequest,
        criteria: &SelectionCriteria,
    ) -> Result<LlmResponse, ProviderError> {
        if self.handles.is_empty() {
            return Err(ProviderError::new(
                "manager",
                ProviderErrorKind::NoProviders,
                "no providers registered",
            ));
        }

        let candidates = self.select_providers(criteria);
        if candidates.is_empty() {
            return Err(ProviderError::new(
                "manager",
                ProviderErrorKind::NoAvailableProviders,
                "no providers are currently available",
            ));
        }

        let mut last_error: Option<ProviderError> = None;
        let mut attempted = false;

        for provider_id in &candidates {
            let handle = match self.handles.get(provider_id) {
                Some(h) => h,
                None => continue,
            };

            if !handle.is_available() {
                tracing::debug!("provider {provider_id} not available, skipping");
                continue;
            }

            // Circuit check: open circuits fail fast, an elapsed timeout
            // lets one probe through in half-open
            let acquired = handle.breaker.lock().ok().map(|mut b| b.try_acquire());
            match acquired {
                Some(Ok(())) => {}
                Some(Err(open)) => {
                    tracing::debug!(
                        "provider {provider_id} circuit open (retry in {:?}), skipping",
                        open.retry_in
                    );
                    continue;
                }
                None => continue,
            }

            attempted = true;
            match handle.process_request(request).await {
                Ok(response) => {
                    if let Ok(mut breaker) = handle.breaker.lock() {
                        breaker.on_success();
                    }
                    return Ok(response);
                }
                Err(error) => {
                    if let Ok(mut breaker) = handle.breaker.lock() {
                        breaker.on_failure();
                    }
                    tracing::warn!(
                        "provider {provider_id} failed for request {}: {}",
                        request.request_id,
                        error.message
                    );
                    last_error = Some(error);
                }
            }
        }

        match last_error {
            Some(error) => Err(ProviderError::new(
                "manager",
                ProviderErrorKind::AllProvidersFailed,
                format!("all providers failed; last error: {}", error.message),
            )),
            None if !attempted => Err(ProviderError::new(
                "manager",
                ProviderErrorKind::NoAvailableProviders,
                "no providers are currently available",
            )),
            None => Err(ProviderError::new(
                "manager",
                ProviderErrorKind::AllProvidersFailed,
                "all providers failed",
            )),
        }
    }

    /// Filter by criteria, then order by the configured strategy
    fn select_providers(&self, criteria: &SelectionCriteria) -> Vec<ProviderId> {
        let mut candidates: Vec<ProviderId> = self
            .handles
            .iter()
            .filter(|(id, handle)| {
                let capabilities = handle.provider.capabilities();
                if !criteria
                    .required_capabilities
                    .iter()
                    .all(|c| capabilities.contains(c))
                {
                    return false;
                }
                if !criteria.preferred_providers.is_empty()
                    && !criteria.preferred_providers.contains(id)
                {
                    return false;
                }
                let metrics = handle.metrics();
                if metrics.success_rate() < criteria.min_success_rate {
                    return false;
                }
                if let Some(max_latency) = criteria.max_latency_ms {
                    if metrics.average_latency_ms > max_latency && metrics.total_requests > 0 {
                        return false;
                    }
                }
                true
            })
            .map(|(id, _)| *id)
            .collect();

        if candidates.is_empty() {
            // Nothing matched the criteria: fall back to whatever is up
            candidates = self.available_providers();
        }

        candidates.sort_by_key(|id| id.as_str());
        self.order_candidates(candidates, criteria)
    }

    fn order_candidates(
        &self,
        mut candidates: Vec<ProviderId>,
        criteria: &SelectionCriteria,
    ) -> Vec<ProviderId> {
        if candidates.len() <= 1 {
            return candidates;
        }

        match self.config.strategy {
            LoadBalancingStrategy::RoundRobin => {
                let start = self.round_robin.fetch_add(1, Ordering::Relaxed) % candidates.len();
                candidates.rotate_left(start);
                candidates
            }
            LoadBalancingStrategy::Random => {
                candidates.shuffle(&mut rand::thread_rng());
                candidates
            }
            LoadBalancingStrategy::Weighted => {
                let mut rng = rand::thread_rng();
                let weights: Vec<f64> = candidates
                    .iter()
                    .map(|id| self.config.weights.get(id).copied().unwrap_or(1.0).max(0.0))
                    .collect();
                let total: f64 = weights.iter().sum();

                let winner = if total > 0.0 {
                    let mut pick = rng.gen_range(0.0..total);
                    let mut chosen = 0;
                    for (i, w) in weights.iter().enumerate() {
                        if pick < *w {
                            chosen = i;
                            break;
                        }
                        pick -= w;
                    }
                    candidates.remove(chosen)
                } else {
                    candidates.remove(0)
                };

                candidates.shuffle(&mut rng);
                let mut ordered = vec![winner];
                ordered.extend(candidates);
                ordered
            }
            LoadBalancingStrategy::Performance => {
                candidates.sort_by(|a, b| {
                    let score = |id: &ProviderId| {
                        let metrics = self.handles[id].metrics();
                        let latency_score =
                            1.0 / (1.0 + metrics.average_latency_ms / 1000.0);
                        metrics.success_rate() * 0.7 + latency_score * 0.3
                    };
                    score(b).total_cmp(&score(a))
                });
                candidates
            }
            LoadBalancingStrategy::CostOptimized => {
                match criteria.cost_preference {
                    CostPreference::Low => {
                        candidates.sort_by(|a, b| {
                            pricing::rates_for(*a)
                                .cost_per_1k_tokens
                                .total_cmp(&pricing::rates_for(*b).cost_per_1k_tokens)
                        });
                    }
                    CostPreference::High => {
                        candidates.sort_by(|a, b| {
                            pricing::rates_for(*b)
                                .cost_per_1k_tokens
                                .total_cmp(&pricing::rates_for(*a).cost_per_1k_tokens)
                        });
                    }
                    CostPreference::Balanced => {
                        candidates.sort_by(|a, b| {
                            let score = |id: &ProviderId| {
                                let success = self.handles[id].metrics().success_rate();
                                // Normalize cost to roughly [0,1] against the rate card
                                let cost = pricing::rates_for(*id).cost_per_1k_tokens / 0.03;
                                success - 0.5 * cost
                            };
                            score(b).total_cmp(&score(a))
                        });
                    }
                }
                candidates
            }
        }
    }

    /// Run one health check pass over all adapters
    pub async fn run_health_checks(&self) {
        for (id, handle) in &self.handles {
            let start = Instant::now();
            let healthy = handle.provider.health_check().await;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            handle.record_health_check(healthy, elapsed_ms);
            if !healthy {
                tracing::warn!("health check failed for provider {id}");
            }
        }
    }

    pub async fn shutdown(&self) {
        for handle in self.handles.values() {
            handle.provider.shutdown().await;
        }
        tracing::info!("provider manager shut down");
    }
}

/// Background health monitoring at the configured interval
///
/// Stops when the shutdown watch flips to true or its sender is dropped.
pub fn spawn_health_loop(
    manager: Arc<ProviderManager>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_secs(manager.config.health_check_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup probes settle
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    manager.run_health_checks().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("health loop stopping");
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::models::Capability;
    use crate::providers::testing::MockProvider;

    fn manager_with(
        strategy: LoadBalancingStrategy,
        providers: Vec<MockProvider>,
    ) -> ProviderManager {
        let mut manager = ProviderManager::new(LoadBalancingConfig {
            strategy,
            ..Default::default()
        });
        for provider in providers {
            manager.add_provider_unchecked(Arc::new(provider));
        }
        manager
    }

    #[tokio::test]
    async fn test_dispatch_succeeds_on_first_available() {
        let manager = manager_with(
            LoadBalancingStrategy::RoundRobin,
            vec![MockProvider::new(ProviderId::Anthropic, "claude says hi")],
        );
        let response = manager
            .process_request(&LlmRequest::new("hello"), &SelectionCriteria::default())
            .await
            .unwrap();
        assert_eq!(response.provider, ProviderId::Anthropic);
        assert_eq!(response.content, "claude says hi");
    }

    #[tokio::test]
    async fn test_failover_to_next_candidate() {
        let failing = MockProvider::failing(ProviderId::OpenAi, 10);
        let healthy = MockProvider::new(ProviderId::Anthropic, "fallback answer");
        let manager = manager_with(LoadBalancingStrategy::RoundRobin, vec![failing, healthy]);

        // Whatever the rotation, the healthy provider must end up answering
        for _ in 0..3 {
            let response = manager
                .process_request(&LlmRequest::new("hello"), &SelectionCriteria::default())
                .await
                .unwrap();
            assert_eq!(response.provider, ProviderId::Anthropic);
        }
    }

    #[tokio::test]
    async fn test_all_providers_failed() {
        let manager = manager_with(
            LoadBalancingStrategy::RoundRobin,
            vec![
                MockProvider::failing(ProviderId::OpenAi, 100),
                MockProvider::failing(ProviderId::Google, 100),
            ],
        );
        let error = manager
            .process_request(&LlmRequest::new("hello"), &SelectionCriteria::default())
            .await
            .unwrap_err();
        assert_eq!(error.kind, ProviderErrorKind::AllProvidersFailed);
    }

    #[tokio::test]
    async fn test_no_providers_registered() {
        let manager = ProviderManager::new(LoadBalancingConfig::default());
        let error = manager
            .process_request(&LlmRequest::new("hello"), &SelectionCriteria::default())
            .await
            .unwrap_err();
        assert_eq!(error.kind, ProviderErrorKind::NoProviders);
    }

    #[tokio::test]
    async fn test_circuit_opens_and_fails_fast() {
        let mut config = LoadBalancingConfig::default();
        config.circuit_breaker_threshold = 2;
        config.circuit_breaker_timeout_secs = 3600;
        let mut manager = ProviderManager::new(config);
        manager.add_provider_unchecked(Arc::new(MockProvider::failing(ProviderId::OpenAi, 100)));

        // Two failures open the circuit
        for _ in 0..2 {
            let _ = manager
                .process_request(&LlmRequest::new("hello"), &SelectionCriteria::default())
                .await;
        }
        let snapshot = &manager.snapshots()[0];
        assert_eq!(snapshot.circuit_state, CircuitState::Open);

        // With the circuit open nothing is attempted
        let error = manager
            .process_request(&LlmRequest::new("hello"), &SelectionCriteria::default())
            .await
            .unwrap_err();
        assert_eq!(error.kind, ProviderErrorKind::NoAvailableProviders);
    }

    #[tokio::test]
    async fn test_capability_filter() {
        let mut no_sensitive = MockProvider::new(ProviderId::Google, "gemini");
        no_sensitive.capabilities = vec![Capability::TextGeneration];
        let full = MockProvider::new(ProviderId::Anthropic, "claude");
        let manager = manager_with(LoadBalancingStrategy::RoundRobin, vec![no_sensitive, full]);

        let criteria = SelectionCriteria {
            required_capabilities: vec![Capability::SensitiveData],
            ..Default::default()
        };
        for _ in 0..4 {
            let response = manager
                .process_request(&LlmRequest::new("hello"), &criteria)
                .await
                .unwrap();
            assert_eq!(response.provider, ProviderId::Anthropic);
        }
    }

    #[tokio::test]
    async fn test_preferred_provider_allowlist() {
        let manager = manager_with(
            LoadBalancingStrategy::RoundRobin,
            vec![
                MockProvider::new(ProviderId::OpenAi, "gpt"),
                MockProvider::new(ProviderId::Google, "gemini"),
            ],
        );
        let criteria = SelectionCriteria {
            preferred_providers: vec![ProviderId::Google],
            ..Default::default()
        };
        for _ in 0..4 {
            let response = manager
                .process_request(&LlmRequest::new("hello"), &criteria)
                .await
                .unwrap();
            assert_eq!(response.provider, ProviderId::Google);
        }
    }

    #[tokio::test]
    async fn test_round_robin_rotates() {
        let manager = manager_with(
            LoadBalancingStrategy::RoundRobin,
            vec![
                MockProvider::new(ProviderId::OpenAi, "gpt"),
                MockProvider::new(ProviderId::Anthropic, "claude"),
            ],
        );
        let mut seen = std::collections::HashSet::new();
        for _ in 0..4 {
            let response = manager
                .process_request(&LlmRequest::new("hello"), &SelectionCriteria::default())
                .await
                .unwrap();
            seen.insert(response.provider);
        }
        assert_eq!(seen.len(), 2, "round robin should hit both providers");
    }

    #[tokio::test]
    async fn test_cost_optimized_low_prefers_cheapest() {
        let manager = manager_with(
            LoadBalancingStrategy::CostOptimized,
            vec![
                MockProvider::new(ProviderId::OpenAi, "gpt"),
                MockProvider::new(ProviderId::Google, "gemini"),
            ],
        );
        let criteria = SelectionCriteria {
            cost_preference: CostPreference::Low,
            ..Default::default()
        };
        let response = manager
            .process_request(&LlmRequest::new("hello"), &criteria)
            .await
            .unwrap();
        // Google is the cheapest in the rate card
        assert_eq!(response.provider, ProviderId::Google);
    }

    #[tokio::test]
    async fn test_health_check_pass_updates_state() {
        let manager = manager_with(
            LoadBalancingStrategy::RoundRobin,
            vec![MockProvider::failing(ProviderId::OpenAi, 100)],
        );
        manager.run_health_checks().await;
        let snapshot = &manager.snapshots()[0];
        assert_eq!(snapshot.health.consecutive_failures, 1);
    }
}
