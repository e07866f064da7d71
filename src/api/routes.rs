// REST endpoint handlers

use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;

use crate::orchestrator::models::OrchestrationRequest;
use crate::pricing;
use crate::providers::models::{Capability, ProviderId};
use crate::state::request_key;

use super::models::{
    AnalyzeRequest, AnalyzeResponse, MetricsSummary, ProviderInfo,
};
use super::{ApiError, AppState};

/// POST /api/v1/analyze - run the full pipeline and return the aggregated
/// answer once processing completes
pub async fn analyze(
    State(state): State<AppState>,
    Json(body): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    if body.query.trim().is_empty() {
        return Err(ApiError::Validation(
            "query cannot be empty or only whitespace".to_string(),
        ));
    }

    let mut request = OrchestrationRequest::new(body.query);
    if let Some(level) = body.privacy_level {
        request = request.with_privacy_level(level);
    }
    request.strategy = body.strategy;
    request.use_orchestrator = body.use_orchestrator;

    let request_id = request.request_id.clone();

    // Record processing state so /status works while the request runs
    let _ = state
        .store
        .set(
            &request_key(&request_id),
            json!({ "request_id": request_id, "state": "processing" }),
            state.store_ttl,
        )
        .await;

    match state.orchestrator.process_query(request).await {
        Ok(response) => {
            let view = AnalyzeResponse::from(&response);
            let _ = state
                .store
                .set(
                    &request_key(&request_id),
                    json!({
                        "request_id": request_id,
                        "state": "completed",
                        "response": &view,
                    }),
                    state.store_ttl,
                )
                .await;
            Ok(Json(view))
        }
        Err(error) => {
            let _ = state
                .store
                .set(
                    &request_key(&request_id),
                    json!({
                        "request_id": request_id,
                        "state": "failed",
                        "error": error.to_string(),
                    }),
                    state.store_ttl,
                )
                .await;
            Err(error.into())
        }
    }
}

/// GET /api/v1/status/{request_id} - current cached state or 404
pub async fn status(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let value = state
        .store
        .get(&request_key(&request_id))
        .await
        .map_err(|e| ApiError::Internal {
            kind: "store_error",
            message: e.to_string(),
        })?;

    match value {
        Some(value) => Ok(Json(value)),
        None => Err(ApiError::NotFound(format!(
            "no state for request {request_id}"
        ))),
    }
}

/// GET /api/v1/providers - static capability and rate table
pub async fn providers(State(state): State<AppState>) -> Json<Vec<ProviderInfo>> {
    let snapshots = state.manager.snapshots();

    let info = ProviderId::ALL
        .iter()
        .map(|provider| {
            let rates = pricing::rates_for(*provider);
            let snapshot = snapshots.iter().find(|s| s.provider == *provider);
            ProviderInfo {
                provider: *provider,
                configured: snapshot.is_some(),
                model: snapshot.map(|s| s.model.clone()),
                capabilities: default_capabilities(*provider),
                cost_per_1k_tokens: rates.cost_per_1k_tokens,
                privacy_score: rates.privacy_score,
            }
        })
        .collect();

    Json(info)
}

/// Capability table for the default model of each provider
fn default_capabilities(provider: ProviderId) -> Vec<Capability> {
    match provider {
        ProviderId::OpenAi => vec![
            Capability::TextGeneration,
            Capability::CodeAnalysis,
            Capability::FunctionCalling,
            Capability::Vision,
        ],
        ProviderId::Anthropic => vec![
            Capability::TextGeneration,
            Capability::CodeAnalysis,
            Capability::SensitiveData,
            Capability::Vision,
        ],
        ProviderId::Google => vec![
            Capability::TextGeneration,
            Capability::FunctionCalling,
            Capability::Vision,
        ],
    }
}

/// GET /api/v1/providers/status - live health/metrics/circuit view
pub async fn provider_status(
    State(state): State<AppState>,
) -> Json<Vec<crate::providers::manager::ProviderSnapshot>> {
    Json(state.manager.snapshots())
}

/// GET /api/v1/metrics/summary
pub async fn metrics_summary(State(state): State<AppState>) -> Json<MetricsSummary> {
    Json(MetricsSummary {
        orchestration: state.orchestrator.metrics(),
        providers: state.manager.snapshots(),
        active_streams: state.progress.len(),
    })
}

/// GET /api/v1/metrics/timeseries - most recent completed requests
pub async fn metrics_timeseries(
    State(state): State<AppState>,
) -> Json<Vec<crate::orchestrator::models::RequestSample>> {
    Json(state.orchestrator.samples())
}

/// GET /health - liveness
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "version": crate::config::VERSION }))
}
