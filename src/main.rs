// Prysm - privacy-preserving query router for LLM providers
//
// A user query is analyzed for PII, code and named entities, split into
// fragments such that no single provider receives a reconstructable whole,
// dispatched concurrently with load balancing and circuit breaking, and
// recomposed into one answer. Progress streams to the UI over SSE.
//
// Architecture:
// - Detection (regex/heuristic analyzers): sensitivity report per query
// - Fragmenter: strategy-driven splitting with a process-private redaction map
// - Provider manager: adapters + health + circuit breakers + failover
// - Orchestrator: stage machine driving the pipeline, bounded fan-out
// - Progress bus: per-request ordered event history consumed by the SSE API
// - HTTP surface (axum): analyze/status/stream/providers/metrics endpoints

mod aggregation;
mod api;
mod cli;
mod config;
mod detection;
mod enhancement;
mod fragmentation;
mod intelligence;
mod orchestrator;
mod pricing;
mod progress;
mod providers;
mod startup;
mod state;
mod tokens;
mod util;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use config::Config;
use detection::DetectionEngine;
use enhancement::{FragmentEnhancer, HttpOrchestrationModel, OrchestrationModel};
use orchestrator::models::OrchestratorConfig;
use orchestrator::QueryOrchestrator;
use progress::ProgressBus;
use providers::manager::ProviderManager;
use providers::models::{LoadBalancingConfig, ProviderConfig, ProviderId};
use providers::LlmProvider;
use state::{MemoryStore, RedisStore, StateStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Handle CLI commands first (config --show, --path, --reset)
    if cli::handle_cli() {
        return Ok(());
    }

    let config = Config::load();

    // Precedence: RUST_LOG env var > config file > default "info"
    let default_filter = format!("prysm={},tower_http=debug,axum=debug", config.log_level);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    startup::print_startup(&config);
    startup::log_startup(&config);

    // Provider manager with one adapter per configured key
    let manager = Arc::new(build_manager(&config).await);
    if manager.is_empty() {
        tracing::warn!("running without providers; every analyze request will fail");
    }

    // Process-wide runtime state; progress history lives one hour after a
    // request's first event regardless of the cache TTL
    let progress = Arc::new(ProgressBus::default());
    let store = build_store(&config).await;

    let enhancer = match config.orchestration_key() {
        Some(key) => match HttpOrchestrationModel::new(key, config.orchestration_model.clone()) {
            Ok(model) => {
                let model: Arc<dyn OrchestrationModel> = Arc::new(model);
                FragmentEnhancer::new(Some(model))
            }
            Err(e) => {
                tracing::warn!("failed to build orchestration model, enhancer disabled: {e}");
                FragmentEnhancer::disabled()
            }
        },
        None => FragmentEnhancer::disabled(),
    };

    let detection = Arc::new(DetectionEngine::with_builtin_analyzers(
        config.pipeline.max_fragment_size,
    ));

    let orchestrator = Arc::new(QueryOrchestrator::new(
        OrchestratorConfig {
            max_concurrent_requests: config.pipeline.max_concurrent_requests,
            request_timeout_secs: config.pipeline.request_timeout_secs,
            max_fragment_size: config.pipeline.max_fragment_size,
            sensitive_data_providers: vec![ProviderId::Anthropic],
        },
        detection,
        manager.clone(),
        enhancer,
        progress.clone(),
    ));

    // Background tasks stop when the shutdown watch flips
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let health_handle = providers::manager::spawn_health_loop(manager.clone(), shutdown_rx.clone());
    let sweeper_handle = progress::spawn_sweeper(progress.clone(), shutdown_rx);

    let app = api::build_router(api::AppState {
        orchestrator,
        manager: manager.clone(),
        progress,
        store,
        store_ttl: Duration::from_secs(config.redis_ttl_secs),
        cors_origin: if config.is_production() {
            config.frontend_url.clone()
        } else {
            "*".to_string()
        },
    });

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!("listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    // Stop background tasks and close adapters
    let _ = shutdown_tx.send(true);
    let _ = health_handle.await;
    let _ = sweeper_handle.await;
    manager.shutdown().await;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Construct and register one adapter per configured provider; a provider
/// that fails its initialization probe is skipped, not fatal
async fn build_manager(config: &Config) -> ProviderManager {
    let lb = &config.load_balancing;
    let mut manager = ProviderManager::new(LoadBalancingConfig {
        strategy: lb.strategy,
        weights: Default::default(),
        health_check_interval_secs: lb.health_check_interval_secs,
        circuit_breaker_threshold: lb.circuit_breaker_threshold,
        circuit_breaker_timeout_secs: lb.circuit_breaker_timeout_secs,
    });

    for settings in config.providers.configured() {
        let adapter: Result<Arc<dyn LlmProvider>, _> = match settings.provider {
            ProviderId::OpenAi => providers::openai::OpenAiProvider::new(ProviderConfig::new(
                ProviderId::OpenAi,
                settings.api_key.clone(),
                settings.model.clone(),
            ))
            .map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
            ProviderId::Anthropic => providers::anthropic::AnthropicProvider::new(
                ProviderConfig::new(
                    ProviderId::Anthropic,
                    settings.api_key.clone(),
                    settings.model.clone(),
                ),
            )
            .map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
            ProviderId::Google => providers::google::GoogleProvider::new(ProviderConfig::new(
                ProviderId::Google,
                settings.api_key.clone(),
                settings.model.clone(),
            ))
            .map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
        };

        match adapter {
            Ok(adapter) => {
                if let Err(e) = manager.add_provider(adapter).await {
                    tracing::warn!(
                        "provider {} failed initialization, skipping: {e}",
                        settings.provider
                    );
                }
            }
            Err(e) => {
                tracing::warn!("failed to construct {} adapter: {e}", settings.provider);
            }
        }
    }

    manager
}

/// Redis when configured and reachable, in-memory otherwise
async fn build_store(config: &Config) -> Arc<dyn StateStore> {
    match &config.redis_url {
        Some(url) => match RedisStore::connect(url).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::warn!("redis unavailable ({e}), falling back to in-memory store");
                Arc::new(MemoryStore::new())
            }
        },
        None => Arc::new(MemoryStore::new()),
    }
}
