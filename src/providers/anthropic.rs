// Anthropic adapter - Messages API

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::models::{
    Capability, LlmRequest, LlmResponse, ProviderConfig, ProviderError, ProviderErrorKind,
    ProviderId,
};
use super::openai::parse_retry_after;
use super::LlmProvider;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    model: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| {
                ProviderError::new(
                    ProviderId::Anthropic.as_str(),
                    ProviderErrorKind::Unexpected,
                    format!("failed to build HTTP client: {e}"),
                )
            })?;
        Ok(Self { config, client })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    /// Map the API's error envelope onto the taxonomy; falls back to status
    /// classification when the body is not the documented shape
    fn classify_error(status: u16, body: &str, retry_after: Option<u64>) -> ProviderError {
        let kind = match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => match envelope.error.error_type.as_str() {
                "authentication_error" | "permission_error" => ProviderErrorKind::Authentication,
                "rate_limit_error" => ProviderErrorKind::RateLimit,
                "overloaded_error" | "api_error" => ProviderErrorKind::Server,
                "invalid_request_error" => ProviderErrorKind::InvalidRequest,
                _ => {
                    return super::classify_status(ProviderId::Anthropic, status, &envelope.error.message)
                }
            },
            Err(_) => return super::classify_status(ProviderId::Anthropic, status, body),
        };

        let mut error = ProviderError::new(
            ProviderId::Anthropic.as_str(),
            kind,
            crate::util::truncate_utf8_safe(body, 300),
        );
        if let Some(secs) = retry_after {
            error = error.with_retry_after(secs);
        }
        error
    }

    async fn messages(
        &self,
        request: &LlmRequest,
        max_tokens: u32,
    ) -> Result<LlmResponse, ProviderError> {
        let mut body = json!({
            "model": self.config.model,
            "max_tokens": max_tokens,
            "messages": [{"role": "user", "content": request.prompt}],
            "temperature": self.config.temperature,
        });
        if let Some(system) = &request.system_prompt {
            body["system"] = json!(system);
        }

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url()))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() {
                    ProviderErrorKind::Timeout
                } else {
                    ProviderErrorKind::Server
                };
                ProviderError::new(ProviderId::Anthropic.as_str(), kind, e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            return Err(Self::classify_error(status.as_u16(), &text, retry_after));
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            ProviderError::new(
                ProviderId::Anthropic.as_str(),
                ProviderErrorKind::Unexpected,
                format!("invalid response body: {e}"),
            )
        })?;

        let content: String = parsed
            .content
            .iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect();

        let tokens_used = parsed
            .usage
            .map(|u| u.input_tokens.unwrap_or(0) + u.output_tokens.unwrap_or(0))
            .filter(|t| *t > 0)
            .unwrap_or_else(|| self.estimate_tokens(&request.prompt));

        Ok(LlmResponse {
            request_id: request.request_id.clone(),
            provider: ProviderId::Anthropic,
            content,
            finish_reason: parsed.stop_reason.unwrap_or_else(|| "end_turn".to_string()),
            tokens_used,
            latency_ms: 0.0,
            model_used: parsed.model.unwrap_or_else(|| self.config.model.clone()),
            timestamp: chrono::Utc::now(),
        })
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        let probe = LlmRequest::new("ping");
        self.messages(&probe, 1).await.map(|_| ())
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError> {
        let max_tokens = request.max_tokens.unwrap_or(self.config.max_tokens);
        self.messages(request, max_tokens).await
    }

    async fn health_check(&self) -> bool {
        let probe = LlmRequest::new("ping");
        self.messages(&probe, 1).await.is_ok()
    }

    fn capabilities(&self) -> Vec<Capability> {
        let mut caps = vec![
            Capability::TextGeneration,
            Capability::CodeAnalysis,
            Capability::SensitiveData,
        ];
        // Vision landed with the Claude 3 family
        if self.config.model.contains("claude-3") || self.config.model.contains("claude-sonnet") {
            caps.push(Capability::Vision);
        }
        caps
    }

    fn estimate_tokens(&self, text: &str) -> u32 {
        // Claude's tokenizer runs slightly denser than the baseline heuristic
        crate::tokens::estimate_tokens_scaled(text, 1.1)
    }

    fn max_tokens(&self) -> u32 {
        self.config.max_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_documented_error_envelope() {
        let body = r#"{"type":"error","error":{"type":"rate_limit_error","message":"slow down"}}"#;
        let error = AnthropicProvider::classify_error(429, body, Some(7));
        assert_eq!(error.kind, ProviderErrorKind::RateLimit);
        assert_eq!(error.retry_after, Some(7));
        assert!(error.retryable);
    }

    #[test]
    fn test_classify_auth_error_not_retryable() {
        let body = r#"{"type":"error","error":{"type":"authentication_error","message":"bad key"}}"#;
        let error = AnthropicProvider::classify_error(401, body, None);
        assert_eq!(error.kind, ProviderErrorKind::Authentication);
        assert!(!error.retryable);
    }

    #[test]
    fn test_classify_falls_back_on_unknown_body() {
        let error = AnthropicProvider::classify_error(503, "<html>gateway</html>", None);
        assert_eq!(error.kind, ProviderErrorKind::Server);
    }

    #[test]
    fn test_parses_messages_response() {
        let body = r#"{
            "content": [{"type": "text", "text": "Paris is the capital."}],
            "stop_reason": "end_turn",
            "model": "claude-3-5-haiku-20241022",
            "usage": {"input_tokens": 10, "output_tokens": 8}
        }"#;
        let parsed: MessagesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.content[0].text.as_deref(), Some("Paris is the capital."));
        assert_eq!(parsed.usage.unwrap().output_tokens, Some(8));
    }

    #[test]
    fn test_sensitive_data_capability_present() {
        let provider = AnthropicProvider::new(ProviderConfig::new(
            ProviderId::Anthropic,
            "sk-ant-test",
            "claude-3-5-haiku-20241022",
        ))
        .unwrap();
        assert!(provider.capabilities().contains(&Capability::SensitiveData));
    }
}
