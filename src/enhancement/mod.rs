// Fragment enhancer - per-fragment context/instruction expansion and
// thread-continuous aggregation on a dedicated orchestration model
//
// The orchestration model is a small, cheap model distinct from the worker
// providers that see fragments. Enhancement is always skippable: with no
// model configured, fragments pass through unchanged and aggregation falls
// back to the response aggregator. Failures here degrade answer quality, not
// correctness.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::detection::models::DetectionReport;
use crate::fragmentation::models::Fragment;
use crate::providers::models::ProviderId;

/// One turn in the orchestration-model conversation
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant",
            content: content.into(),
        }
    }
}

/// The dedicated model used by the enhancer and the thread-continuous
/// aggregation step
#[async_trait]
pub trait OrchestrationModel: Send + Sync {
    fn model_id(&self) -> &str;

    /// Complete a conversation, returning the assistant text
    async fn complete(&self, messages: &[ChatMessage], max_tokens: u32) -> anyhow::Result<String>;
}

/// Reqwest-backed orchestration model speaking the chat-completions format
pub struct HttpOrchestrationModel {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpOrchestrationModel {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .pool_max_idle_per_host(10)
            .build()?;
        Ok(Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            client,
        })
    }
}

#[async_trait]
impl OrchestrationModel for HttpOrchestrationModel {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage], max_tokens: u32) -> anyhow::Result<String> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": 0.2,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let value: serde_json::Value = response.json().await?;
        value["choices"][0]["message"]["content"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| anyhow::anyhow!("orchestration model returned no content"))
    }
}

/// Structured understanding of the whole query, produced before per-fragment
/// enhancement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub primary_intent: String,
    pub expected_response_type: String,
    #[serde(default)]
    pub key_requirements: Vec<String>,
    pub domain_expertise: String,
    pub response_format: String,
    #[serde(default = "default_priority")]
    pub context_preservation_priority: u8,
}

fn default_priority() -> u8 {
    7
}

impl Default for QueryAnalysis {
    fn default() -> Self {
        Self {
            primary_intent: "general_request".to_string(),
            expected_response_type: "informational".to_string(),
            key_requirements: vec![
                "accurate information".to_string(),
                "clear explanation".to_string(),
            ],
            domain_expertise: "general".to_string(),
            response_format: "natural_language".to_string(),
            context_preservation_priority: 7,
        }
    }
}

/// What the enhancer did to one fragment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancementMetadata {
    pub context_added: String,
    pub instructions_added: String,
    pub rationale: String,
    /// Model's own confidence in the enhancement, 0 on failure
    pub quality_score: f64,
    pub enhanced_by: String,
}

/// A fragment plus its pre-enhancement content
#[derive(Debug, Clone)]
pub struct EnhancedFragment {
    pub fragment: Fragment,
    pub original_content: String,
    pub enhancement: Option<EnhancementMetadata>,
}

impl EnhancedFragment {
    fn passthrough(fragment: Fragment) -> Self {
        let original_content = fragment.content.clone();
        Self {
            fragment,
            original_content,
            enhancement: None,
        }
    }
}

/// JSON contract for the per-fragment enhancement response
#[derive(Debug, Deserialize)]
struct EnhancementReply {
    enhanced_content: String,
    #[serde(default)]
    context_added: String,
    #[serde(default)]
    instructions_added: String,
    #[serde(default)]
    enhancement_rationale: String,
    #[serde(default)]
    quality_score: f64,
}

/// Conversation state carried from enhancement into aggregation so the model
/// aggregates with the context of its own enhancement turns
pub struct EnhancementSession {
    model: Arc<dyn OrchestrationModel>,
    history: Vec<ChatMessage>,
    original_query: String,
    pub query_analysis: QueryAnalysis,
}

impl EnhancementSession {
    /// Consolidate provider responses into one answer on the same thread.
    /// Returns None on any failure so the caller can fall back.
    pub async fn aggregate(&mut self, responses: &[(ProviderId, String)]) -> Option<String> {
        if responses.is_empty() {
            return None;
        }
        if responses.len() == 1 {
            return Some(responses[0].1.clone());
        }

        let mut responses_context = String::new();
        for (i, (provider, response)) in responses.iter().enumerate() {
            responses_context.push_str(&format!(
                "\nFRAGMENT {} (Provider: {}):\n{}\n",
                i + 1,
                provider.as_str().to_uppercase(),
                response
            ));
        }

        let prompt = format!(
            "You previously enhanced query fragments for optimal processing. Now \
             aggregate the provider responses into a single, coherent, high-quality answer.\n\n\
             ORIGINAL QUERY:\n{}\n\n\
             QUERY ANALYSIS CONTEXT:\n\
             - Primary Intent: {}\n\
             - Expected Response Type: {}\n\
             - Domain Expertise: {}\n\n\
             FRAGMENT RESPONSES TO AGGREGATE:\n{}\n\n\
             AGGREGATION INSTRUCTIONS:\n\
             1. Combine these responses into ONE coherent answer\n\
             2. Remove redundancy and contradictions\n\
             3. Ensure the final response directly answers the original query\n\
             4. Use natural transitions between combined content\n\n\
             Your response should be the final aggregated answer only, without \
             meta-commentary about the aggregation process.",
            self.original_query,
            self.query_analysis.primary_intent,
            self.query_analysis.expected_response_type,
            self.query_analysis.domain_expertise,
            responses_context,
        );

        self.history.push(ChatMessage::user(prompt));

        match self.model.complete(&self.history, 3000).await {
            Ok(answer) => {
                self.history.push(ChatMessage::assistant(answer.clone()));
                Some(answer)
            }
            Err(e) => {
                tracing::warn!("thread-continuous aggregation failed: {e}");
                None
            }
        }
    }

    #[cfg(test)]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

/// Static capability blurb shown to the orchestration model per target provider
fn provider_capabilities(provider: ProviderId) -> &'static str {
    match provider {
        ProviderId::Anthropic => {
            "Excellent at analysis, reasoning, and following complex instructions. \
             Strong with code and technical content. Prefers structured, clear prompts."
        }
        ProviderId::OpenAi => {
            "Very capable at creative tasks, code generation, and conversational \
             responses. Works well with direct, conversational prompts."
        }
        ProviderId::Google => {
            "Fast and efficient for straightforward tasks. Good at factual \
             information. Prefers concise, direct prompts with clear objectives."
        }
    }
}

/// Fragment enhancer over an optional orchestration model
pub struct FragmentEnhancer {
    model: Option<Arc<dyn OrchestrationModel>>,
}

impl FragmentEnhancer {
    pub fn new(model: Option<Arc<dyn OrchestrationModel>>) -> Self {
        Self { model }
    }

    pub fn disabled() -> Self {
        Self { model: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.model.is_some()
    }

    /// Enhance all fragments for their assigned providers
    ///
    /// Returns the fragments (unchanged when disabled or on failure) and the
    /// conversation session for thread-continuous aggregation.
    pub async fn enhance(
        &self,
        fragments: &[Fragment],
        assignments: &[ProviderId],
        original_query: &str,
        detection: &DetectionReport,
    ) -> (Vec<EnhancedFragment>, Option<EnhancementSession>) {
        let model = match &self.model {
            Some(model) => model.clone(),
            None => {
                return (
                    fragments.iter().cloned().map(EnhancedFragment::passthrough).collect(),
                    None,
                );
            }
        };

        let query_analysis = self
            .analyze_query(model.as_ref(), original_query, detection)
            .await;

        // Per-fragment enhancement runs in parallel
        let total = fragments.len();
        let tasks = fragments.iter().enumerate().map(|(i, fragment)| {
            let provider = assignments.get(i).copied().unwrap_or(ProviderId::Anthropic);
            let model = model.clone();
            let analysis = query_analysis.clone();
            async move {
                Self::enhance_single(model.as_ref(), fragment, provider, original_query, &analysis, i, total)
                    .await
            }
        });
        let enhanced = futures::future::join_all(tasks).await;

        let history = vec![ChatMessage::system(format!(
            "You have just enhanced {} query fragments for optimal processing, \
             based on the original query: '{}'",
            enhanced.len(),
            original_query
        ))];

        let session = EnhancementSession {
            model,
            history,
            original_query: original_query.to_string(),
            query_analysis,
        };

        (enhanced, Some(session))
    }

    async fn analyze_query(
        &self,
        model: &dyn OrchestrationModel,
        original_query: &str,
        detection: &DetectionReport,
    ) -> QueryAnalysis {
        let prompt = format!(
            "Analyze this query to understand its intent and requirements for \
             fragment enhancement:\n\nOriginal Query:\n{}\n\n\
             Detection Context:\n\
             - PII spans found: {}\n\
             - Contains code: {}\n\
             - Sensitivity score: {:.2}\n\n\
             Provide a JSON response with: \"primary_intent\", \
             \"expected_response_type\", \"key_requirements\" (list), \
             \"domain_expertise\", \"response_format\", and \
             \"context_preservation_priority\" (1-10).\n\
             Respond only with valid JSON.",
            original_query,
            detection.pii_spans.len(),
            detection.code.has_code,
            detection.sensitivity_score,
        );

        match model.complete(&[ChatMessage::user(prompt)], 1000).await {
            Ok(reply) => match parse_json_reply::<QueryAnalysis>(&reply) {
                Some(analysis) => analysis,
                None => {
                    tracing::warn!("query analysis returned invalid JSON, using defaults");
                    QueryAnalysis::default()
                }
            },
            Err(e) => {
                tracing::warn!("query analysis failed: {e}, using defaults");
                QueryAnalysis::default()
            }
        }
    }

    async fn enhance_single(
        model: &dyn OrchestrationModel,
        fragment: &Fragment,
        provider: ProviderId,
        original_query: &str,
        analysis: &QueryAnalysis,
        index: usize,
        total: usize,
    ) -> EnhancedFragment {
        let prompt = format!(
            "You are an AI query optimization specialist. Enhance a query fragment \
             to maximize response quality from the target LLM provider.\n\n\
             ORIGINAL COMPLETE QUERY:\n{}\n\n\
             QUERY ANALYSIS:\n\
             - Primary Intent: {}\n\
             - Expected Response: {}\n\
             - Domain Expertise: {}\n\
             - Response Format: {}\n\n\
             FRAGMENT TO ENHANCE:\n{}\n\n\
             TARGET PROVIDER: {}\nProvider Capabilities: {}\n\n\
             FRAGMENT CONTEXT:\n\
             - This is fragment {} of {}\n\
             - Fragment is {}\n\n\
             ENHANCEMENT REQUIREMENTS:\n\
             1. Add necessary context so the provider understands the fragment\n\
             2. Add clear instructions about the expected response\n\
             3. Maintain privacy: do not reveal this is part of a larger fragmented query\n\
             4. Optimize for the target provider's strengths\n\n\
             Provide JSON with fields: \"enhanced_content\", \"context_added\", \
             \"instructions_added\", \"enhancement_rationale\", \"quality_score\" (0.0-1.0).\n\
             Respond only with valid JSON.",
            original_query,
            analysis.primary_intent,
            analysis.expected_response_type,
            analysis.domain_expertise,
            analysis.response_format,
            fragment.content,
            provider.as_str().to_uppercase(),
            provider_capabilities(provider),
            index + 1,
            total,
            if fragment.metadata.is_redacted {
                "anonymized"
            } else {
                "not anonymized"
            },
        );

        match model.complete(&[ChatMessage::user(prompt)], 2000).await {
            Ok(reply) => match parse_json_reply::<EnhancementReply>(&reply) {
                Some(data) => {
                    let mut enhanced = fragment.clone();
                    let original_content = std::mem::replace(&mut enhanced.content, data.enhanced_content);
                    EnhancedFragment {
                        fragment: enhanced,
                        original_content,
                        enhancement: Some(EnhancementMetadata {
                            context_added: data.context_added,
                            instructions_added: data.instructions_added,
                            rationale: data.enhancement_rationale,
                            quality_score: data.quality_score.clamp(0.0, 1.0),
                            enhanced_by: model.model_id().to_string(),
                        }),
                    }
                }
                None => {
                    tracing::warn!("fragment {} enhancement returned invalid JSON", index + 1);
                    failed_enhancement(fragment, model.model_id())
                }
            },
            Err(e) => {
                tracing::warn!("fragment {} enhancement failed: {e}", index + 1);
                failed_enhancement(fragment, model.model_id())
            }
        }
    }
}

/// On failure the fragment passes through unchanged with quality 0 recorded
fn failed_enhancement(fragment: &Fragment, model_id: &str) -> EnhancedFragment {
    EnhancedFragment {
        fragment: fragment.clone(),
        original_content: fragment.content.clone(),
        enhancement: Some(EnhancementMetadata {
            context_added: String::new(),
            instructions_added: String::new(),
            rationale: "enhancement failed".to_string(),
            quality_score: 0.0,
            enhanced_by: model_id.to_string(),
        }),
    }
}

/// Extract the outermost JSON object from a model reply that may wrap it in
/// prose or code fencing
fn parse_json_reply<T: serde::de::DeserializeOwned>(reply: &str) -> Option<T> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&reply[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragmentation::models::FragmentType;
    use std::sync::Mutex;

    /// Scripted orchestration model that records every conversation it sees
    struct MockModel {
        replies: Mutex<Vec<String>>,
        seen: Mutex<Vec<usize>>,
    }

    impl MockModel {
        fn new(replies: Vec<&str>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().map(String::from).collect()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl OrchestrationModel for MockModel {
        fn model_id(&self) -> &str {
            "mock-orchestrator"
        }

        async fn complete(&self, messages: &[ChatMessage], _max_tokens: u32) -> anyhow::Result<String> {
            self.seen.lock().unwrap().push(messages.len());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("no scripted reply"))
        }
    }

    fn fragment(content: &str) -> Fragment {
        Fragment::new(0, content, FragmentType::General, false)
    }

    #[tokio::test]
    async fn test_disabled_enhancer_passes_through() {
        let enhancer = FragmentEnhancer::disabled();
        let fragments = vec![fragment("tell me about rust")];
        let report = DetectionReport::empty();
        let (enhanced, session) = enhancer
            .enhance(&fragments, &[ProviderId::OpenAi], "tell me about rust", &report)
            .await;

        assert!(session.is_none());
        assert_eq!(enhanced.len(), 1);
        assert_eq!(enhanced[0].fragment.content, "tell me about rust");
        assert!(enhanced[0].enhancement.is_none());
    }

    #[tokio::test]
    async fn test_enhancement_rewrites_content() {
        let model = Arc::new(MockModel::new(vec![
            // Query analysis
            r#"{"primary_intent":"information_request","expected_response_type":"informational","domain_expertise":"general","response_format":"natural_language","context_preservation_priority":5}"#,
            // Per-fragment enhancement
            r#"{"enhanced_content":"Please explain Rust ownership clearly.","context_added":"clarity","instructions_added":"explain","enhancement_rationale":"focus","quality_score":0.9}"#,
        ]));
        let enhancer = FragmentEnhancer::new(Some(model));
        let fragments = vec![fragment("explain rust ownership")];
        let report = DetectionReport::empty();

        let (enhanced, session) = enhancer
            .enhance(&fragments, &[ProviderId::Anthropic], "explain rust ownership", &report)
            .await;

        assert!(session.is_some());
        let item = &enhanced[0];
        assert_eq!(item.fragment.content, "Please explain Rust ownership clearly.");
        assert_eq!(item.original_content, "explain rust ownership");
        let meta = item.enhancement.as_ref().unwrap();
        assert!((meta.quality_score - 0.9).abs() < 1e-9);
        assert_eq!(meta.enhanced_by, "mock-orchestrator");
    }

    #[tokio::test]
    async fn test_invalid_json_passes_fragment_through_with_zero_quality() {
        let model = Arc::new(MockModel::new(vec![
            r#"{"primary_intent":"x","expected_response_type":"y","domain_expertise":"z","response_format":"w"}"#,
            "this is not json at all",
        ]));
        let enhancer = FragmentEnhancer::new(Some(model));
        let fragments = vec![fragment("original content")];
        let report = DetectionReport::empty();

        let (enhanced, _) = enhancer
            .enhance(&fragments, &[ProviderId::OpenAi], "original content", &report)
            .await;

        assert_eq!(enhanced[0].fragment.content, "original content");
        assert_eq!(enhanced[0].enhancement.as_ref().unwrap().quality_score, 0.0);
    }

    #[tokio::test]
    async fn test_analysis_failure_uses_defaults() {
        // No scripted replies at all: analysis and enhancement both fail
        let model = Arc::new(MockModel::new(vec![]));
        let enhancer = FragmentEnhancer::new(Some(model));
        let fragments = vec![fragment("hello")];
        let report = DetectionReport::empty();

        let (enhanced, session) = enhancer
            .enhance(&fragments, &[ProviderId::Google], "hello", &report)
            .await;

        assert_eq!(enhanced[0].fragment.content, "hello");
        assert_eq!(session.unwrap().query_analysis.primary_intent, "general_request");
    }

    #[tokio::test]
    async fn test_aggregate_carries_thread_history() {
        let model = Arc::new(MockModel::new(vec![
            r#"{"primary_intent":"x","expected_response_type":"y","domain_expertise":"z","response_format":"w"}"#,
            r#"{"enhanced_content":"frag one","quality_score":0.8}"#,
            "the combined answer",
        ]));
        let enhancer = FragmentEnhancer::new(Some(model.clone()));
        let fragments = vec![fragment("part one")];
        let report = DetectionReport::empty();

        let (_, session) = enhancer
            .enhance(&fragments, &[ProviderId::Anthropic], "whole query", &report)
            .await;
        let mut session = session.unwrap();

        let answer = session
            .aggregate(&[
                (ProviderId::Anthropic, "answer a".to_string()),
                (ProviderId::OpenAi, "answer b".to_string()),
            ])
            .await;

        assert_eq!(answer.as_deref(), Some("the combined answer"));
        // system + user(aggregate) + assistant(answer)
        assert_eq!(session.history_len(), 3);

        // The aggregation call saw the system turn from enhancement
        let seen = model.seen.lock().unwrap();
        assert_eq!(*seen.last().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_aggregate_single_response_shortcut() {
        let model = Arc::new(MockModel::new(vec![
            r#"{"primary_intent":"x","expected_response_type":"y","domain_expertise":"z","response_format":"w"}"#,
            r#"{"enhanced_content":"frag","quality_score":0.5}"#,
        ]));
        let enhancer = FragmentEnhancer::new(Some(model));
        let (_, session) = enhancer
            .enhance(
                &[fragment("only")],
                &[ProviderId::OpenAi],
                "only",
                &DetectionReport::empty(),
            )
            .await;
        let mut session = session.unwrap();

        let answer = session
            .aggregate(&[(ProviderId::OpenAi, "sole answer".to_string())])
            .await;
        assert_eq!(answer.as_deref(), Some("sole answer"));
    }

    #[test]
    fn test_parse_json_reply_unwraps_fencing() {
        let wrapped = "Here you go:\n```json\n{\"primary_intent\":\"a\",\"expected_response_type\":\"b\",\"domain_expertise\":\"c\",\"response_format\":\"d\"}\n```";
        let parsed: Option<QueryAnalysis> = parse_json_reply(wrapped);
        assert_eq!(parsed.unwrap().primary_intent, "a");
    }
}
