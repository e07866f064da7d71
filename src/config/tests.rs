// Config loading tests
//
// Environment-variable tests mutate process state, so each one uses a
// distinct variable set and restores it afterwards.

use super::*;

struct EnvGuard(Vec<(&'static str, Option<String>)>);

impl EnvGuard {
    fn set(pairs: &[(&'static str, &str)]) -> Self {
        let saved = pairs
            .iter()
            .map(|(name, value)| {
                let old = std::env::var(name).ok();
                std::env::set_var(name, value);
                (*name, old)
            })
            .collect();
        Self(saved)
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (name, old) in self.0.drain(..) {
            match old {
                Some(value) => std::env::set_var(name, value),
                None => std::env::remove_var(name),
            }
        }
    }
}

#[test]
fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.bind_addr.port(), 8000);
    assert_eq!(config.log_level, "info");
    assert_eq!(config.redis_ttl_secs, 3600);
    assert!(config.redis_url.is_none());
    assert!(!config.providers.any_configured());
    assert_eq!(config.orchestration_model, DEFAULT_ORCHESTRATION_MODEL);
}

#[test]
fn test_env_overrides_bind_addr() {
    let _guard = EnvGuard::set(&[("API_HOST", "0.0.0.0"), ("API_PORT", "9100")]);
    let mut config = Config::default();
    config.apply_env();
    assert_eq!(config.bind_addr.to_string(), "0.0.0.0:9100");
}

#[test]
fn test_env_enables_provider_with_model_override() {
    let _guard = EnvGuard::set(&[
        ("ANTHROPIC_API_KEY", "sk-ant-test"),
        ("CLAUDE_WORKER_MODEL", "claude-3-5-sonnet-20241022"),
    ]);
    let providers = ProvidersConfig::from_env();
    let anthropic = providers.anthropic.expect("anthropic enabled");
    assert_eq!(anthropic.model, "claude-3-5-sonnet-20241022");
    assert_eq!(anthropic.api_key, "sk-ant-test");
}

#[test]
fn test_blank_key_leaves_provider_disabled() {
    let _guard = EnvGuard::set(&[("GOOGLE_API_KEY", "  ")]);
    let providers = ProvidersConfig::from_env();
    assert!(providers.google.is_none());
}

#[test]
fn test_redis_env() {
    let _guard = EnvGuard::set(&[
        ("REDIS_URL", "redis://cache:6379"),
        ("REDIS_TTL", "120"),
    ]);
    let mut config = Config::default();
    config.apply_env();
    assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
    assert_eq!(config.redis_ttl_secs, 120);
}

#[test]
fn test_file_config_parses() {
    let raw = r#"
host = "10.0.0.5"
port = 8800
log_level = "debug"
frontend_url = "https://app.example.com"

[load_balancing]
strategy = "performance"
circuit_breaker_threshold = 3

[pipeline]
max_concurrent_requests = 4
"#;
    let file: FileConfig = toml::from_str(raw).unwrap();
    let mut config = Config::default();
    config.apply_file(file);

    assert_eq!(config.bind_addr.to_string(), "10.0.0.5:8800");
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.frontend_url, "https://app.example.com");
    assert_eq!(
        config.load_balancing.strategy,
        crate::providers::models::LoadBalancingStrategy::Performance
    );
    assert_eq!(config.load_balancing.circuit_breaker_threshold, 3);
    assert_eq!(config.pipeline.max_concurrent_requests, 4);
    // Untouched sections keep their defaults
    assert_eq!(config.pipeline.request_timeout_secs, 30);
}

#[test]
fn test_is_production() {
    let mut config = Config::default();
    assert!(!config.is_production());
    config.environment = "Production".to_string();
    assert!(config.is_production());
}
