// Orchestration data model: request/response envelopes, stages, and
// process-wide metrics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detection::models::DetectionReport;
use crate::fragmentation::models::FragmentationStrategy;
use crate::intelligence::IntelligenceDecision;
use crate::providers::models::{LlmResponse, ProviderId};

/// Requested confidentiality of a query; ordered from least to most sensitive
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyLevel {
    #[default]
    Public,
    Internal,
    Confidential,
    Restricted,
    TopSecret,
}

impl PrivacyLevel {
    /// Contribution of the user-declared level to privacy scoring
    pub fn score(&self) -> f64 {
        match self {
            PrivacyLevel::Public => 0.0,
            PrivacyLevel::Internal => 0.2,
            PrivacyLevel::Confidential => 0.5,
            PrivacyLevel::Restricted => 0.8,
            PrivacyLevel::TopSecret => 1.0,
        }
    }
}

/// Stages a request moves through; every transition publishes a progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Received,
    Detection,
    Fragmentation,
    Routing,
    Processing,
    Aggregation,
    Completed,
    Failed,
}

/// One query submitted to the pipeline
#[derive(Debug, Clone)]
pub struct OrchestrationRequest {
    pub request_id: String,
    pub query: String,
    pub privacy_level: PrivacyLevel,
    /// Optional strategy override; bypasses selection, not invariants
    pub strategy: Option<FragmentationStrategy>,
    /// Force orchestration-model involvement regardless of the escalation hint
    pub use_orchestrator: Option<bool>,
}

impl OrchestrationRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            query: query.into(),
            privacy_level: PrivacyLevel::default(),
            strategy: None,
            use_orchestrator: None,
        }
    }

    pub fn with_privacy_level(mut self, level: PrivacyLevel) -> Self {
        self.privacy_level = level;
        self
    }
}

/// Outcome of dispatching one fragment
#[derive(Debug, Clone, Serialize)]
pub struct FragmentResult {
    pub fragment_id: String,
    pub ordinal: usize,
    pub provider: ProviderId,
    pub response: LlmResponse,
    pub latency_ms: f64,
    pub tokens_used: u32,
    pub cost_estimate: f64,
    /// Provider-by-fragment-type weighting in [0,1]
    pub privacy_score: f64,
}

/// Final envelope for one completed request
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationResponse {
    pub request_id: String,
    pub aggregated_response: String,
    pub detection: DetectionReport,
    pub strategy_used: FragmentationStrategy,
    pub fragment_results: Vec<FragmentResult>,
    pub providers_used: Vec<ProviderId>,
    /// Always >= the requested level
    pub privacy_level_achieved: PrivacyLevel,
    pub privacy_score: f64,
    pub total_processing_time_ms: f64,
    pub total_cost_estimate: f64,
    pub tokens_used: u32,
    pub cost_comparison: crate::pricing::CostComparison,
    pub intelligence_decisions: Vec<IntelligenceDecision>,
    pub completed_at: DateTime<Utc>,
}

/// Pipeline tuning knobs
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrent_requests: usize,
    pub request_timeout_secs: u64,
    pub max_fragment_size: usize,
    /// Providers preferred when a fragment requires sensitive handling
    pub sensitive_data_providers: Vec<ProviderId>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 10,
            request_timeout_secs: 30,
            max_fragment_size: 2000,
            sensitive_data_providers: vec![ProviderId::Anthropic],
        }
    }
}

/// Process-wide rolling metrics over all orchestrated requests
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestrationMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_processing_time_ms: f64,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub last_request_time: Option<DateTime<Utc>>,
}

impl OrchestrationMetrics {
    pub fn record_success(&mut self, processing_time_ms: f64, cost: f64, tokens: u32) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.total_cost += cost;
        self.total_tokens += tokens as u64;
        self.last_request_time = Some(Utc::now());

        let n = self.successful_requests as f64;
        self.average_processing_time_ms =
            (self.average_processing_time_ms * (n - 1.0) + processing_time_ms) / n;
    }

    pub fn record_failure(&mut self) {
        self.total_requests += 1;
        self.failed_requests += 1;
        self.last_request_time = Some(Utc::now());
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}

/// One completed request in the bounded timeseries view
#[derive(Debug, Clone, Serialize)]
pub struct RequestSample {
    pub request_id: String,
    pub completed_at: DateTime<Utc>,
    pub processing_time_ms: f64,
    pub fragments: usize,
    pub providers_used: Vec<ProviderId>,
    pub cost: f64,
    pub privacy_score: f64,
    pub success: bool,
}
