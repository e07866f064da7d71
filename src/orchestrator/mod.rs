// Query orchestrator - drives the pipeline stages end to end
//
// received -> detection -> fragmentation -> routing -> processing ->
// aggregation -> completed | failed. Every transition publishes a progress
// event. Fragment dispatch is fanned out under a request-wide semaphore with
// a per-fragment deadline; results are reordered by ordinal before
// aggregation. If every fragment fails, the request fails.

pub mod models;

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::Semaphore;

use crate::aggregation::{self, ResponseAggregator};
use crate::detection::DetectionEngine;
use crate::enhancement::{EnhancedFragment, FragmentEnhancer};
use crate::fragmentation::models::{FragmentType, FragmentationResult};
use crate::fragmentation::Fragmenter;
use crate::intelligence::{
    CostBudget, CostOptimizer, IntelligenceDecision, PerformanceMonitor, PrivacyRouter,
};
use crate::pricing;
use crate::progress::{ProgressBus, ProgressEventKind};
use crate::providers::manager::ProviderManager;
use crate::providers::models::{
    Capability, LlmRequest, ProviderError, ProviderErrorKind, ProviderId, SelectionCriteria,
};

use models::{
    FragmentResult, OrchestrationMetrics, OrchestrationRequest, OrchestrationResponse,
    OrchestratorConfig, PrivacyLevel, ProcessingStage, RequestSample,
};

/// Most recent completed requests kept for the timeseries view
const SAMPLE_LIMIT: usize = 500;

/// Terminal failure of one orchestrated request
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("query cannot be empty")]
    EmptyQuery,
    #[error("no providers are currently available")]
    NoAvailableProviders,
    #[error("all fragments failed: {0}")]
    AllFragmentsFailed(String),
}

pub struct QueryOrchestrator {
    config: OrchestratorConfig,
    detection: Arc<DetectionEngine>,
    fragmenter: Fragmenter,
    manager: Arc<ProviderManager>,
    enhancer: FragmentEnhancer,
    aggregator: ResponseAggregator,
    monitor: PerformanceMonitor,
    progress: Arc<ProgressBus>,
    metrics: Mutex<OrchestrationMetrics>,
    samples: Mutex<VecDeque<RequestSample>>,
}

impl QueryOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        detection: Arc<DetectionEngine>,
        manager: Arc<ProviderManager>,
        enhancer: FragmentEnhancer,
        progress: Arc<ProgressBus>,
    ) -> Self {
        let fragmenter = Fragmenter::new(
            crate::fragmentation::FragmenterConfig {
                max_fragment_size: config.max_fragment_size,
            },
            detection.pii_detector(),
        );
        Self {
            config,
            detection,
            fragmenter,
            manager,
            enhancer,
            aggregator: ResponseAggregator::new(),
            monitor: PerformanceMonitor::new(),
            progress,
            metrics: Mutex::new(OrchestrationMetrics::default()),
            samples: Mutex::new(VecDeque::with_capacity(SAMPLE_LIMIT)),
        }
    }

    pub fn metrics(&self) -> OrchestrationMetrics {
        self.metrics.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn samples(&self) -> Vec<RequestSample> {
        self.samples
            .lock()
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Process one query through the complete privacy-preserving pipeline
    pub async fn process_query(
        &self,
        request: OrchestrationRequest,
    ) -> Result<OrchestrationResponse, OrchestrationError> {
        // Input errors surface before any progress event is emitted
        if request.query.trim().is_empty() {
            return Err(OrchestrationError::EmptyQuery);
        }

        let start = Instant::now();
        let request_id = request.request_id.clone();
        tracing::info!(request_id = %request_id, "starting orchestration");

        match self.run_pipeline(&request, start).await {
            Ok(response) => {
                if let Ok(mut metrics) = self.metrics.lock() {
                    metrics.record_success(
                        response.total_processing_time_ms,
                        response.total_cost_estimate,
                        response.tokens_used,
                    );
                }
                self.record_sample(&response, true);
                tracing::info!(
                    request_id = %request_id,
                    time_ms = response.total_processing_time_ms as u64,
                    "orchestration completed"
                );
                Ok(response)
            }
            Err(error) => {
                if let Ok(mut metrics) = self.metrics.lock() {
                    metrics.record_failure();
                }
                self.progress.publish(
                    &request_id,
                    ProgressEventKind::Error,
                    json!({
                        "error": error.to_string(),
                        "stage": ProcessingStage::Failed,
                    }),
                );
                tracing::error!(request_id = %request_id, "orchestration failed: {error}");
                Err(error)
            }
        }
    }

    async fn run_pipeline(
        &self,
        request: &OrchestrationRequest,
        start: Instant,
    ) -> Result<OrchestrationResponse, OrchestrationError> {
        let request_id = &request.request_id;
        let query = request.query.trim();

        self.publish_step(request_id, ProcessingStage::Received, "starting", json!({}));

        // Stage: detection
        self.publish_step(request_id, ProcessingStage::Detection, "processing", json!({}));
        let detection = self.detection.analyze(query).await;
        self.publish_step(
            request_id,
            ProcessingStage::Detection,
            "completed",
            json!({
                "has_pii": detection.has_pii,
                "has_code": detection.code.has_code,
                "sensitivity_score": detection.sensitivity_score,
                "recommended_strategy": detection.recommended_strategy,
                "analyzer_time_ms": detection.analyzer_time_ms,
            }),
        );

        // Stage: fragmentation
        self.publish_step(request_id, ProcessingStage::Fragmentation, "processing", json!({}));
        let fragmentation = self.fragmenter.fragment(query, &detection, request.strategy);
        self.publish_step(
            request_id,
            ProcessingStage::Fragmentation,
            "completed",
            json!({
                "strategy": fragmentation.strategy_used,
                "fragments": fragmentation.fragments.len(),
                "sensitive_isolated": fragmentation.metrics.sensitive_data_isolated,
            }),
        );

        // Stage: routing (advisers are consulted, not obeyed blindly)
        let mut decisions = PrivacyRouter::analyze(request, &detection, &fragmentation.fragments);
        decisions.extend(CostOptimizer::optimize(
            &fragmentation.fragments,
            &self.manager.provider_ids(),
            CostBudget::default(),
        ));
        self.publish_step(
            request_id,
            ProcessingStage::Routing,
            "completed",
            json!({ "decisions": decisions.len() }),
        );

        // A request with every circuit open fails before any fragment is
        // dispatched and before the processing stage is announced
        if self.manager.dispatchable_providers().is_empty() {
            return Err(OrchestrationError::NoAvailableProviders);
        }

        // Stage: processing
        self.publish_step(
            request_id,
            ProcessingStage::Processing,
            "processing",
            json!({ "fragments": fragmentation.fragments.len() }),
        );

        let assignments = self.fragment_assignments(&fragmentation, &decisions, request);
        let (enhanced, session) = self
            .enhancer
            .enhance(&fragmentation.fragments, &assignments, query, &detection)
            .await;

        let results = self.dispatch_fragments(request, &enhanced, &decisions).await?;

        self.publish_step(
            request_id,
            ProcessingStage::Processing,
            "completed",
            json!({ "results": results.len() }),
        );

        // Stage: aggregation
        self.publish_step(request_id, ProcessingStage::Aggregation, "processing", json!({}));

        // Thread-continuous aggregation first, the response aggregator as
        // the always-available fallback. `use_orchestrator: false` opts a
        // request out of the orchestration-model path entirely.
        let mut aggregated = None;
        if let Some(mut session) = session {
            if request.use_orchestrator != Some(false) {
                let provider_responses: Vec<(ProviderId, String)> = results
                    .iter()
                    .map(|r| (r.provider, r.response.content.clone()))
                    .collect();
                aggregated = session.aggregate(&provider_responses).await;
            }
        }
        // Both paths end placeholder-free: the model answer gets the same
        // restoration and cleanup the response aggregator applies internally
        let mut aggregated = match aggregated {
            Some(answer) => {
                aggregation::post_process(&fragmentation.redaction_map.restore(&answer))
            }
            None => self.aggregator.aggregate(
                &results,
                &fragmentation.fragments,
                &fragmentation.redaction_map,
                request.privacy_level,
            ),
        };
        if aggregated.trim().is_empty() {
            aggregated = aggregation::fallback_concat(&results);
        }

        self.publish_step(request_id, ProcessingStage::Aggregation, "completed", json!({}));

        // Post-hoc performance decisions join the response metadata
        let total_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        decisions.extend(self.monitor.monitor(request_id, &results, total_time_ms));

        let response = self.build_response(
            request,
            detection,
            fragmentation,
            results,
            aggregated,
            decisions,
            total_time_ms,
        );

        self.progress.publish(
            request_id,
            ProgressEventKind::InvestorKpis,
            json!({
                "privacy_score": response.privacy_score,
                "total_cost": response.total_cost_estimate,
                "cost_comparison": response.cost_comparison,
                "providers_used": response.providers_used,
                "total_time_ms": response.total_processing_time_ms,
            }),
        );
        self.progress.publish(
            request_id,
            ProgressEventKind::Complete,
            json!({
                "request_id": response.request_id,
                "aggregated_response": response.aggregated_response,
                "privacy_level_achieved": response.privacy_level_achieved,
                "total_time_ms": response.total_processing_time_ms,
            }),
        );

        Ok(response)
    }

    /// Target provider per fragment: the privacy router's recommendation
    /// first, then the fragment's own hint, then the configured default
    fn fragment_assignments(
        &self,
        fragmentation: &FragmentationResult,
        decisions: &[IntelligenceDecision],
        request: &OrchestrationRequest,
    ) -> Vec<ProviderId> {
        fragmentation
            .fragments
            .iter()
            .map(|fragment| {
                if let Some(providers) = routed_providers(decisions, &fragment.fragment_id) {
                    if let Some(first) = providers.first() {
                        return *first;
                    }
                }
                fragment.provider_hint.unwrap_or_else(|| {
                    if request.privacy_level >= PrivacyLevel::Restricted {
                        pricing::privacy_preferred()
                    } else {
                        ProviderId::OpenAi
                    }
                })
            })
            .collect()
    }

    /// Fan out all fragments, bounded by the request-wide semaphore, each
    /// with its own deadline. Individual failures are logged and omitted;
    /// an empty result set fails the request.
    async fn dispatch_fragments(
        &self,
        request: &OrchestrationRequest,
        enhanced: &[EnhancedFragment],
        decisions: &[IntelligenceDecision],
    ) -> Result<Vec<FragmentResult>, OrchestrationError> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_requests.max(1)));
        let timeout = Duration::from_secs(self.config.request_timeout_secs);

        let tasks = enhanced.iter().map(|item| {
            let semaphore = semaphore.clone();
            let fragment = &item.fragment;
            async move {
                let _permit = semaphore.acquire().await.ok()?;

                let sensitive_type =
                    matches!(fragment.fragment_type, FragmentType::Pii | FragmentType::Code);
                let mut llm_request = LlmRequest::new(fragment.content.clone());
                llm_request.fragment_id = Some(fragment.fragment_id.clone());
                llm_request.requires_sensitive_handling = sensitive_type
                    || request.privacy_level >= PrivacyLevel::Restricted;

                let criteria = self.criteria_for(fragment, decisions, request);

                let outcome =
                    tokio::time::timeout(timeout, self.manager.process_request(&llm_request, &criteria))
                        .await;

                let result = match outcome {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::new(
                        "manager",
                        ProviderErrorKind::Timeout,
                        format!("fragment deadline of {}s expired", timeout.as_secs()),
                    )),
                };

                match result {
                    Ok(response) => {
                        let provider = response.provider;
                        let tokens = response.tokens_used;
                        let latency = response.latency_ms;
                        Some(Ok(FragmentResult {
                            fragment_id: fragment.fragment_id.clone(),
                            ordinal: fragment.ordinal,
                            provider,
                            latency_ms: latency,
                            tokens_used: tokens,
                            cost_estimate: pricing::calculate_cost(provider, tokens),
                            privacy_score: pricing::fragment_privacy_score(provider, sensitive_type),
                            response,
                        }))
                    }
                    Err(error) => {
                        tracing::warn!(
                            fragment_id = %fragment.fragment_id,
                            "fragment dispatch failed: {error}"
                        );
                        Some(Err(error))
                    }
                }
            }
        });

        let outcomes = futures::future::join_all(tasks).await;

        let mut results = Vec::new();
        let mut errors = Vec::new();
        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                Ok(result) => results.push(result),
                Err(error) => errors.push(error),
            }
        }

        if results.is_empty() {
            if !errors.is_empty()
                && errors
                    .iter()
                    .all(|e| e.kind == ProviderErrorKind::NoAvailableProviders)
            {
                return Err(OrchestrationError::NoAvailableProviders);
            }
            let last = errors
                .last()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "no fragments dispatched".to_string());
            return Err(OrchestrationError::AllFragmentsFailed(last));
        }

        results.sort_by_key(|r| r.ordinal);
        Ok(results)
    }

    /// Selection criteria per fragment: privacy-router recommendation when
    /// present, otherwise the configured sensitive-data preference
    fn criteria_for(
        &self,
        fragment: &crate::fragmentation::models::Fragment,
        decisions: &[IntelligenceDecision],
        request: &OrchestrationRequest,
    ) -> SelectionCriteria {
        if let Some(providers) = routed_providers(decisions, &fragment.fragment_id) {
            return SelectionCriteria {
                preferred_providers: providers,
                required_capabilities: vec![Capability::TextGeneration],
                ..Default::default()
            };
        }

        let sensitive = matches!(fragment.fragment_type, FragmentType::Pii | FragmentType::Code)
            || request.privacy_level >= PrivacyLevel::Restricted;
        if sensitive {
            return SelectionCriteria {
                preferred_providers: self.config.sensitive_data_providers.clone(),
                required_capabilities: vec![Capability::TextGeneration, Capability::SensitiveData],
                ..Default::default()
            };
        }

        SelectionCriteria {
            required_capabilities: vec![Capability::TextGeneration],
            ..Default::default()
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_response(
        &self,
        request: &OrchestrationRequest,
        detection: crate::detection::models::DetectionReport,
        fragmentation: FragmentationResult,
        results: Vec<FragmentResult>,
        aggregated: String,
        decisions: Vec<IntelligenceDecision>,
        total_time_ms: f64,
    ) -> OrchestrationResponse {
        let providers_used: Vec<ProviderId> = {
            let mut seen = HashSet::new();
            results
                .iter()
                .map(|r| r.provider)
                .filter(|p| seen.insert(*p))
                .collect()
        };

        let total_cost: f64 = results.iter().map(|r| r.cost_estimate).sum();
        let total_tokens: u32 = results.iter().map(|r| r.tokens_used).sum();
        let privacy_score = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|r| r.privacy_score).sum::<f64>() / results.len() as f64
        };

        let any_sensitive = fragmentation
            .fragments
            .iter()
            .any(|f| f.contains_sensitive_data);
        let achieved = achieved_privacy_level(request.privacy_level, &results, any_sensitive);

        OrchestrationResponse {
            request_id: request.request_id.clone(),
            aggregated_response: aggregated,
            detection,
            strategy_used: fragmentation.strategy_used,
            fragment_results: results,
            providers_used,
            privacy_level_achieved: achieved,
            privacy_score,
            total_processing_time_ms: total_time_ms,
            total_cost_estimate: total_cost,
            tokens_used: total_tokens,
            cost_comparison: pricing::compare_costs(total_cost, total_tokens),
            intelligence_decisions: decisions,
            completed_at: chrono::Utc::now(),
        }
    }

    fn record_sample(&self, response: &OrchestrationResponse, success: bool) {
        if let Ok(mut samples) = self.samples.lock() {
            if samples.len() >= SAMPLE_LIMIT {
                samples.pop_front();
            }
            samples.push_back(RequestSample {
                request_id: response.request_id.clone(),
                completed_at: response.completed_at,
                processing_time_ms: response.total_processing_time_ms,
                fragments: response.fragment_results.len(),
                providers_used: response.providers_used.clone(),
                cost: response.total_cost_estimate,
                privacy_score: response.privacy_score,
                success,
            });
        }
    }

    fn publish_step(
        &self,
        request_id: &str,
        stage: ProcessingStage,
        status: &str,
        mut detail: serde_json::Value,
    ) {
        if let Some(map) = detail.as_object_mut() {
            map.insert("step".to_string(), json!(stage));
            map.insert("status".to_string(), json!(status));
        }
        self.progress
            .publish(request_id, ProgressEventKind::StepProgress, detail);
    }
}

/// Providers recommended for a fragment by the privacy router, if any
fn routed_providers(
    decisions: &[IntelligenceDecision],
    fragment_id: &str,
) -> Option<Vec<ProviderId>> {
    decisions
        .iter()
        .filter(|d| d.decision_type == "provider_routing")
        .find(|d| d.metadata["fragment_id"] == fragment_id)
        .and_then(|d| {
            serde_json::from_value::<Vec<ProviderId>>(d.metadata["recommended_providers"].clone())
                .ok()
        })
        .filter(|p| !p.is_empty())
}

/// The achieved level reflects how many results landed on privacy-preferred
/// providers and is never below the requested level. Without sensitive
/// fragments there is nothing to protect and the requested level stands.
fn achieved_privacy_level(
    requested: PrivacyLevel,
    results: &[FragmentResult],
    any_sensitive: bool,
) -> PrivacyLevel {
    if results.is_empty() || !any_sensitive {
        return requested;
    }
    let preferred = results.iter().filter(|r| r.privacy_score >= 0.8).count();
    let observed = if preferred == results.len() {
        PrivacyLevel::Restricted
    } else if preferred as f64 >= results.len() as f64 * 0.7 {
        PrivacyLevel::Confidential
    } else {
        PrivacyLevel::Public
    };
    requested.max(observed)
}
