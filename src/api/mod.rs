// HTTP surface - REST endpoints plus the SSE progress stream
//
// Thin layer over the orchestrator: validation errors become 422, missing
// resources 404, internal failures 500 with an error envelope. All endpoints
// return JSON except the event stream.

pub mod models;
mod routes;
mod sse;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use crate::orchestrator::{OrchestrationError, QueryOrchestrator};
use crate::progress::ProgressBus;
use crate::providers::manager::ProviderManager;
use crate::state::StateStore;

use models::ErrorBody;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<QueryOrchestrator>,
    pub manager: Arc<ProviderManager>,
    pub progress: Arc<ProgressBus>,
    pub store: Arc<dyn StateStore>,
    pub store_ttl: Duration,
    pub cors_origin: String,
}

/// Build the router with all endpoints
pub fn build_router(state: AppState) -> Router {
    let cors_origin = state.cors_origin.clone();

    Router::new()
        .route("/api/v1/analyze", post(routes::analyze))
        .route("/api/v1/status/:request_id", get(routes::status))
        .route("/api/v1/stream/:request_id", get(sse::stream))
        .route("/api/v1/providers", get(routes::providers))
        .route("/api/v1/providers/status", get(routes::provider_status))
        .route("/api/v1/metrics/summary", get(routes::metrics_summary))
        .route("/api/v1/metrics/timeseries", get(routes::metrics_timeseries))
        .route("/health", get(routes::health))
        .layer(axum::middleware::from_fn(move |request, next| {
            let origin = cors_origin.clone();
            cors_headers(request, next, origin)
        }))
        .with_state(state)
}

/// Minimal CORS layer allowing the configured front-end origin
async fn cors_headers(
    request: axum::extract::Request,
    next: axum::middleware::Next,
    origin: String,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    if let Ok(value) = header::HeaderValue::from_str(&origin) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        header::HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        header::HeaderValue::from_static("content-type"),
    );
    response
}

/// Errors surfaced by the HTTP handlers
#[derive(Debug)]
pub enum ApiError {
    /// 422: the request body failed validation
    Validation(String),
    /// 404: unknown request id or resource
    NotFound(String),
    /// 500: internal failure with a stable error kind
    Internal { kind: &'static str, message: String },
}

impl From<OrchestrationError> for ApiError {
    fn from(error: OrchestrationError) -> Self {
        match error {
            OrchestrationError::EmptyQuery => ApiError::Validation(error.to_string()),
            OrchestrationError::NoAvailableProviders => ApiError::Internal {
                kind: "no_available_providers",
                message: error.to_string(),
            },
            OrchestrationError::AllFragmentsFailed(_) => ApiError::Internal {
                kind: "all_providers_failed",
                message: error.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Validation(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    error: "validation_error".to_string(),
                    message,
                    details: None,
                },
            ),
            ApiError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    error: "not_found".to_string(),
                    message,
                    details: None,
                },
            ),
            ApiError::Internal { kind, message } => {
                tracing::error!("internal error ({kind}): {message}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: kind.to_string(),
                        message,
                        details: None,
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestration_error_mapping() {
        let api: ApiError = OrchestrationError::EmptyQuery.into();
        assert!(matches!(api, ApiError::Validation(_)));

        let api: ApiError = OrchestrationError::NoAvailableProviders.into();
        assert!(matches!(
            api,
            ApiError::Internal {
                kind: "no_available_providers",
                ..
            }
        ));

        let api: ApiError = OrchestrationError::AllFragmentsFailed("x".to_string()).into();
        assert!(matches!(
            api,
            ApiError::Internal {
                kind: "all_providers_failed",
                ..
            }
        ));
    }
}
