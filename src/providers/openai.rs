// OpenAI adapter - chat completions API

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::models::{
    Capability, LlmRequest, LlmResponse, ProviderConfig, ProviderError, ProviderErrorKind,
    ProviderId,
};
use super::{classify_status, LlmProvider};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: Option<u32>,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| {
                ProviderError::new(
                    ProviderId::OpenAi.as_str(),
                    ProviderErrorKind::Unexpected,
                    format!("failed to build HTTP client: {e}"),
                )
            })?;
        Ok(Self { config, client })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    async fn chat(&self, request: &LlmRequest, max_tokens: u32) -> Result<LlmResponse, ProviderError> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let body = json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": self.config.temperature,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url()))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() {
                    ProviderErrorKind::Timeout
                } else {
                    ProviderErrorKind::Server
                };
                ProviderError::new(ProviderId::OpenAi.as_str(), kind, e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            let mut error = classify_status(ProviderId::OpenAi, status.as_u16(), &text);
            if let Some(secs) = retry_after {
                error = error.with_retry_after(secs);
            }
            return Err(error);
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
            ProviderError::new(
                ProviderId::OpenAi.as_str(),
                ProviderErrorKind::Unexpected,
                format!("invalid response body: {e}"),
            )
        })?;

        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            ProviderError::new(
                ProviderId::OpenAi.as_str(),
                ProviderErrorKind::Unexpected,
                "response contained no choices",
            )
        })?;

        Ok(LlmResponse {
            request_id: request.request_id.clone(),
            provider: ProviderId::OpenAi,
            content: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            tokens_used: parsed
                .usage
                .and_then(|u| u.total_tokens)
                .unwrap_or_else(|| self.estimate_tokens(&request.prompt)),
            latency_ms: 0.0,
            model_used: parsed.model.unwrap_or_else(|| self.config.model.clone()),
            timestamp: chrono::Utc::now(),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        let probe = LlmRequest::new("ping");
        self.chat(&probe, 1).await.map(|_| ()).map_err(|e| {
            if e.kind == ProviderErrorKind::Authentication {
                tracing::error!("OpenAI authentication failed during initialize");
            }
            e
        })
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError> {
        let max_tokens = request.max_tokens.unwrap_or(self.config.max_tokens);
        self.chat(request, max_tokens).await
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/models", self.base_url()))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn capabilities(&self) -> Vec<Capability> {
        // Capability tables are per-model
        let mut caps = vec![Capability::TextGeneration, Capability::FunctionCalling];
        if self.config.model.starts_with("gpt-4") {
            caps.push(Capability::CodeAnalysis);
            caps.push(Capability::Vision);
        }
        if self.config.model.contains("embedding") {
            caps.push(Capability::Embedding);
        }
        caps
    }

    fn estimate_tokens(&self, text: &str) -> u32 {
        crate::tokens::estimate_tokens(text)
    }

    fn max_tokens(&self) -> u32 {
        self.config.max_tokens
    }
}

/// Parse a Retry-After header value in seconds
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new(ProviderConfig::new(ProviderId::OpenAi, "sk-test", "gpt-4o")).unwrap()
    }

    #[test]
    fn test_capabilities_per_model() {
        let gpt4 = provider();
        assert!(gpt4.capabilities().contains(&Capability::CodeAnalysis));

        let small = OpenAiProvider::new(ProviderConfig::new(
            ProviderId::OpenAi,
            "sk-test",
            "gpt-3.5-turbo",
        ))
        .unwrap();
        assert!(!small.capabilities().contains(&Capability::CodeAnalysis));
        assert!(small.capabilities().contains(&Capability::TextGeneration));
    }

    #[test]
    fn test_estimate_tokens_nonzero() {
        assert!(provider().estimate_tokens("hello world this is a prompt") > 0);
    }

    #[test]
    fn test_parses_completion_response() {
        let body = r#"{
            "choices": [{"message": {"content": "Paris."}, "finish_reason": "stop"}],
            "usage": {"total_tokens": 12},
            "model": "gpt-4o"
        }"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Paris."));
        assert_eq!(parsed.usage.unwrap().total_tokens, Some(12));
    }
}
