// Request/response DTOs for the HTTP surface

use serde::{Deserialize, Serialize};

use crate::detection::models::DetectionReport;
use crate::fragmentation::models::FragmentationStrategy;
use crate::orchestrator::models::{OrchestrationResponse, PrivacyLevel};
use crate::pricing::CostComparison;
use crate::providers::models::ProviderId;

/// Body of POST /api/v1/analyze
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub query: String,
    #[serde(default)]
    pub privacy_level: Option<PrivacyLevel>,
    #[serde(default)]
    pub strategy: Option<FragmentationStrategy>,
    #[serde(default)]
    pub use_orchestrator: Option<bool>,
}

/// Per-fragment summary in the analyze response
#[derive(Debug, Serialize)]
pub struct FragmentView {
    pub fragment_id: String,
    pub ordinal: usize,
    pub provider: ProviderId,
    pub tokens_used: u32,
    pub latency_ms: f64,
    pub privacy_score: f64,
}

/// Body of the 200 response from POST /api/v1/analyze
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub request_id: String,
    pub detection: DetectionReport,
    pub strategy_used: FragmentationStrategy,
    pub fragments: Vec<FragmentView>,
    pub aggregated_response: String,
    pub privacy_level_achieved: PrivacyLevel,
    pub privacy_score: f64,
    pub total_time_ms: f64,
    pub total_cost: f64,
    pub cost_comparison: CostComparison,
}

impl From<&OrchestrationResponse> for AnalyzeResponse {
    fn from(response: &OrchestrationResponse) -> Self {
        Self {
            request_id: response.request_id.clone(),
            detection: response.detection.clone(),
            strategy_used: response.strategy_used,
            fragments: response
                .fragment_results
                .iter()
                .map(|r| FragmentView {
                    fragment_id: r.fragment_id.clone(),
                    ordinal: r.ordinal,
                    provider: r.provider,
                    tokens_used: r.tokens_used,
                    latency_ms: r.latency_ms,
                    privacy_score: r.privacy_score,
                })
                .collect(),
            aggregated_response: response.aggregated_response.clone(),
            privacy_level_achieved: response.privacy_level_achieved,
            privacy_score: response.privacy_score,
            total_time_ms: response.total_processing_time_ms,
            total_cost: response.total_cost_estimate,
            cost_comparison: response.cost_comparison.clone(),
        }
    }
}

/// Error envelope for 4xx/5xx responses
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// One entry of the static provider capability table
#[derive(Debug, Serialize)]
pub struct ProviderInfo {
    pub provider: ProviderId,
    pub configured: bool,
    pub model: Option<String>,
    pub capabilities: Vec<crate::providers::models::Capability>,
    pub cost_per_1k_tokens: f64,
    pub privacy_score: f64,
}

/// Body of GET /api/v1/metrics/summary
#[derive(Debug, Serialize)]
pub struct MetricsSummary {
    pub orchestration: crate::orchestrator::models::OrchestrationMetrics,
    pub providers: Vec<crate::providers::manager::ProviderSnapshot>,
    pub active_streams: usize,
}
