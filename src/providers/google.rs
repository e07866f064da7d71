// Google adapter - Gemini generateContent API

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::models::{
    Capability, LlmRequest, LlmResponse, ProviderConfig, ProviderError, ProviderErrorKind,
    ProviderId,
};
use super::{classify_status, LlmProvider};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GoogleProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<Part>>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u32>,
}

impl GoogleProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| {
                ProviderError::new(
                    ProviderId::Google.as_str(),
                    ProviderErrorKind::Unexpected,
                    format!("failed to build HTTP client: {e}"),
                )
            })?;
        Ok(Self { config, client })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    async fn generate_content(
        &self,
        request: &LlmRequest,
        max_tokens: u32,
    ) -> Result<LlmResponse, ProviderError> {
        let mut body = json!({
            "contents": [{"role": "user", "parts": [{"text": request.prompt}]}],
            "generationConfig": {
                "maxOutputTokens": max_tokens,
                "temperature": self.config.temperature,
            }
        });
        if let Some(system) = &request.system_prompt {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url(),
            self.config.model,
            self.config.api_key
        );

        let response = self.client.post(url).json(&body).send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                ProviderErrorKind::Timeout
            } else {
                ProviderErrorKind::Server
            };
            ProviderError::new(ProviderId::Google.as_str(), kind, e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(ProviderId::Google, status.as_u16(), &text));
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            ProviderError::new(
                ProviderId::Google.as_str(),
                ProviderErrorKind::Unexpected,
                format!("invalid response body: {e}"),
            )
        })?;

        let candidate = parsed
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| {
                // Gemini omits candidates entirely when the safety filter trips
                ProviderError::new(
                    ProviderId::Google.as_str(),
                    ProviderErrorKind::SafetyFilter,
                    "response contained no candidates",
                )
            })?;

        let finish_reason = candidate
            .finish_reason
            .unwrap_or_else(|| "STOP".to_string());
        if finish_reason == "SAFETY" {
            return Err(ProviderError::new(
                ProviderId::Google.as_str(),
                ProviderErrorKind::SafetyFilter,
                "generation blocked by safety filter",
            ));
        }

        let content: String = candidate
            .content
            .and_then(|c| c.parts)
            .unwrap_or_default()
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();

        Ok(LlmResponse {
            request_id: request.request_id.clone(),
            provider: ProviderId::Google,
            content,
            finish_reason,
            tokens_used: parsed
                .usage_metadata
                .and_then(|u| u.total_token_count)
                .unwrap_or_else(|| self.estimate_tokens(&request.prompt)),
            latency_ms: 0.0,
            model_used: self.config.model.clone(),
            timestamp: chrono::Utc::now(),
        })
    }
}

#[async_trait]
impl LlmProvider for GoogleProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Google
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        let probe = LlmRequest::new("ping");
        self.generate_content(&probe, 1).await.map(|_| ())
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError> {
        let max_tokens = request.max_tokens.unwrap_or(self.config.max_tokens);
        self.generate_content(request, max_tokens).await
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(format!(
                "{}/models/{}?key={}",
                self.base_url(),
                self.config.model,
                self.config.api_key
            ))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn capabilities(&self) -> Vec<Capability> {
        let mut caps = vec![Capability::TextGeneration, Capability::FunctionCalling];
        if self.config.model.contains("pro") || self.config.model.contains("flash") {
            caps.push(Capability::Vision);
        }
        caps
    }

    fn estimate_tokens(&self, text: &str) -> u32 {
        // Gemini's tokenizer merges a little more aggressively
        crate::tokens::estimate_tokens_scaled(text, 0.9)
    }

    fn max_tokens(&self) -> u32 {
        self.config.max_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_generate_content_response() {
        let body = r#"{
            "candidates": [{
                "content": {"parts": [{"text": "Paris."}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"totalTokenCount": 14}
        }"#;
        let parsed: GenerateContentResponse = serde_json::from_str(body).unwrap();
        let candidate = &parsed.candidates.unwrap()[0];
        assert_eq!(
            candidate.content.as_ref().unwrap().parts.as_ref().unwrap()[0]
                .text
                .as_deref(),
            Some("Paris.")
        );
        assert_eq!(parsed.usage_metadata.unwrap().total_token_count, Some(14));
    }

    #[test]
    fn test_no_sensitive_data_capability() {
        let provider = GoogleProvider::new(ProviderConfig::new(
            ProviderId::Google,
            "key",
            "gemini-1.5-flash",
        ))
        .unwrap();
        assert!(!provider.capabilities().contains(&Capability::SensitiveData));
        assert!(provider.capabilities().contains(&Capability::Vision));
    }

    #[test]
    fn test_estimate_lower_than_baseline() {
        let provider = GoogleProvider::new(ProviderConfig::new(
            ProviderId::Google,
            "key",
            "gemini-1.5-flash",
        ))
        .unwrap();
        let text = "a reasonably long sentence used for comparing token estimates";
        assert!(provider.estimate_tokens(text) <= crate::tokens::estimate_tokens(text));
    }
}
