// Fragment data model and the redaction map

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detection::models::PiiKind;
use crate::providers::models::ProviderId;

/// How a query is split before dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentationStrategy {
    /// Single fragment, no splitting
    None,
    /// Redacted carrier plus one instruction fragment per PII span
    PiiIsolation,
    /// Alternating prose and code fragments
    CodeIsolation,
    /// Sentence-boundary split with entity-based sensitivity marking
    SemanticSplit,
    /// Code isolation, nested PII isolation, then length capping
    MaximumIsolation,
    /// Word-boundary split to respect the size cap
    LengthBased,
}

impl FragmentationStrategy {
    /// Strategies whose fragments concatenate back to the original query
    /// exactly (no placeholder rewriting)
    pub fn is_syntactic(&self) -> bool {
        matches!(
            self,
            FragmentationStrategy::None
                | FragmentationStrategy::CodeIsolation
                | FragmentationStrategy::SemanticSplit
                | FragmentationStrategy::LengthBased
        )
    }
}

/// Kind of content a fragment carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentType {
    General,
    Pii,
    Code,
    Semantic,
}

/// Provider-visible fragment metadata
///
/// The redaction map is deliberately NOT part of this struct: metadata
/// travels with the fragment to the provider, the map never leaves the
/// process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FragmentMetadata {
    /// Placeholder this PII fragment resolves, e.g. `<EMAIL>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    /// PII kind for PII fragments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pii_kind: Option<PiiKind>,
    /// Language for code fragments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Detector confidence for code fragments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// True for a carrier fragment whose spans were replaced by placeholders
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_redacted: bool,
}

/// One bounded piece of the query sent to one provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub fragment_id: String,
    /// Dense position in 0..n, unique per request
    pub ordinal: usize,
    pub content: String,
    pub fragment_type: FragmentType,
    pub contains_sensitive_data: bool,
    /// Preferred provider for this fragment, set for sensitive fragments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_hint: Option<ProviderId>,
    /// Ids of earlier fragments this one depends on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_references: Vec<String>,
    #[serde(default)]
    pub metadata: FragmentMetadata,
}

impl Fragment {
    pub fn new(
        ordinal: usize,
        content: impl Into<String>,
        fragment_type: FragmentType,
        contains_sensitive_data: bool,
    ) -> Self {
        Self {
            fragment_id: Uuid::new_v4().to_string(),
            ordinal,
            content: content.into(),
            fragment_type,
            contains_sensitive_data,
            provider_hint: None,
            context_references: Vec::new(),
            metadata: FragmentMetadata::default(),
        }
    }

    pub fn with_hint(mut self, provider: ProviderId) -> Self {
        self.provider_hint = Some(provider);
        self
    }
}

/// Bidirectional pairing of placeholders and the sensitive text they replace
///
/// Keys are placeholder tokens (`<EMAIL>`, `<EMAIL_2>`, …), values the
/// original spans. Never serialized into anything provider-visible.
#[derive(Debug, Clone, Default)]
pub struct RedactionMap {
    entries: HashMap<String, String>,
}

impl RedactionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a unique placeholder for `kind`, suffixing repeats so the map
    /// stays bijective (`<EMAIL>`, then `<EMAIL_2>`, …)
    pub fn reserve_placeholder(&mut self, kind: PiiKind, original: &str) -> String {
        let base = kind.placeholder();
        let mut candidate = base.to_string();
        let mut n = 1;
        while self.entries.contains_key(&candidate) {
            n += 1;
            candidate = format!("{}_{}>", &base[..base.len() - 1], n);
        }
        self.entries.insert(candidate.clone(), original.to_string());
        candidate
    }

    /// Restore originals in `text`, longest placeholder first so nested or
    /// overlapping tokens cannot corrupt each other
    pub fn restore(&self, text: &str) -> String {
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let mut restored = text.to_string();
        for key in keys {
            restored = restored.replace(key.as_str(), &self.entries[key]);
        }
        restored
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn merge(&mut self, other: RedactionMap) {
        self.entries.extend(other.entries);
    }
}

/// Timing and shape metrics for one fragmentation run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FragmentationMetrics {
    pub fragmentation_time_ms: f64,
    pub fragments_created: usize,
    pub sensitive_data_isolated: bool,
}

/// Output of the fragmenter: ordered fragments plus the process-private
/// redaction map
#[derive(Debug, Clone)]
pub struct FragmentationResult {
    pub original_query: String,
    pub fragments: Vec<Fragment>,
    pub strategy_used: FragmentationStrategy,
    pub redaction_map: RedactionMap,
    pub metrics: FragmentationMetrics,
}
