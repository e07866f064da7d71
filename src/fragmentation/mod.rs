// Query fragmenter - turns one query plus its detection report into an
// ordered list of fragments under a chosen strategy
//
// Strategy selection lives in the detection engine; this module implements
// the per-strategy splitting. Invariants maintained here:
// 1. Concatenating fragment contents in ordinal order reconstructs the
//    original query (syntactic strategies) or the redacted carrier form
//    (anonymizing strategies).
// 2. Every PII span is represented by a carrier placeholder plus a PII
//    fragment, or contained in a fragment marked sensitive.
// 3. Sensitive fragments carry a provider hint toward the privacy-preferred
//    provider.

pub mod models;

use std::sync::Arc;
use std::time::Instant;

use crate::detection::models::{CodeBlock, DetectionReport, EntitySpan, PiiSpan};
use crate::detection::pii::PiiDetector;
use crate::pricing;

use models::{
    Fragment, FragmentMetadata, FragmentType, FragmentationMetrics, FragmentationResult,
    FragmentationStrategy, RedactionMap,
};

/// Configuration for fragmentation behavior
#[derive(Debug, Clone)]
pub struct FragmenterConfig {
    /// Fragments longer than this are split on word boundaries
    pub max_fragment_size: usize,
}

impl Default for FragmenterConfig {
    fn default() -> Self {
        Self {
            max_fragment_size: 2000,
        }
    }
}

/// Core fragmenter
pub struct Fragmenter {
    config: FragmenterConfig,
    /// Used by maximum isolation to re-analyze prose fragments
    pii_detector: Arc<dyn PiiDetector>,
}

impl Fragmenter {
    pub fn new(config: FragmenterConfig, pii_detector: Arc<dyn PiiDetector>) -> Self {
        Self {
            config,
            pii_detector,
        }
    }

    /// Fragment a query under the report's recommended strategy, or a forced
    /// override
    pub fn fragment(
        &self,
        query: &str,
        report: &DetectionReport,
        force_strategy: Option<FragmentationStrategy>,
    ) -> FragmentationResult {
        let start = Instant::now();
        let strategy = force_strategy.unwrap_or(report.recommended_strategy);

        let mut redaction_map = RedactionMap::new();
        let mut fragments = match strategy {
            FragmentationStrategy::None => self.no_fragmentation(query),
            FragmentationStrategy::PiiIsolation => {
                self.pii_isolation(query, &report.pii_spans, &mut redaction_map)
            }
            FragmentationStrategy::CodeIsolation => self.code_isolation(query, &report.code.blocks),
            FragmentationStrategy::SemanticSplit => self.semantic_split(query, &report.entities),
            FragmentationStrategy::MaximumIsolation => {
                self.maximum_isolation(query, report, &mut redaction_map)
            }
            FragmentationStrategy::LengthBased => self.length_based(query),
        };

        renumber(&mut fragments);

        let metrics = FragmentationMetrics {
            fragmentation_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            fragments_created: fragments.len(),
            sensitive_data_isolated: fragments.iter().any(|f| f.contains_sensitive_data),
        };

        tracing::debug!(
            strategy = ?strategy,
            fragments = fragments.len(),
            "query fragmented"
        );

        FragmentationResult {
            original_query: query.to_string(),
            fragments,
            strategy_used: strategy,
            redaction_map,
            metrics,
        }
    }

    fn no_fragmentation(&self, query: &str) -> Vec<Fragment> {
        vec![Fragment::new(0, query, FragmentType::General, false)]
    }

    /// Replace each PII span with a typed placeholder, emit the redacted
    /// carrier first, then one instruction fragment per span in document order
    fn pii_isolation(
        &self,
        query: &str,
        spans: &[PiiSpan],
        redaction_map: &mut RedactionMap,
    ) -> Vec<Fragment> {
        if spans.is_empty() {
            return self.no_fragmentation(query);
        }

        // Assign placeholders in document order so repeats get stable suffixes
        let mut ordered: Vec<(&PiiSpan, String)> = Vec::with_capacity(spans.len());
        let mut sorted: Vec<&PiiSpan> = spans.iter().collect();
        sorted.sort_by_key(|s| s.start);
        for span in sorted {
            let placeholder = redaction_map.reserve_placeholder(span.kind, &span.text);
            ordered.push((span, placeholder));
        }

        // Replace right-to-left so earlier offsets stay valid
        let mut redacted = query.to_string();
        for (span, placeholder) in ordered.iter().rev() {
            redacted.replace_range(span.start..span.end, placeholder);
        }

        let mut fragments = Vec::with_capacity(ordered.len() + 1);
        let mut carrier = Fragment::new(0, redacted, FragmentType::General, false);
        carrier.metadata.is_redacted = true;
        fragments.push(carrier);

        for (i, (span, placeholder)) in ordered.iter().enumerate() {
            let mut fragment = Fragment::new(
                i + 1,
                format!("Replace {} with: {}", placeholder, span.text),
                FragmentType::Pii,
                true,
            )
            .with_hint(pricing::privacy_preferred());
            fragment.metadata = FragmentMetadata {
                placeholder: Some(placeholder.clone()),
                pii_kind: Some(span.kind),
                ..Default::default()
            };
            fragments.push(fragment);
        }

        fragments
    }

    /// Walk code blocks in ascending order, alternating prose and code
    /// fragments; prose is skipped only when empty after trimming
    fn code_isolation(&self, query: &str, blocks: &[CodeBlock]) -> Vec<Fragment> {
        if blocks.is_empty() {
            return self.no_fragmentation(query);
        }

        let mut sorted: Vec<&CodeBlock> = blocks.iter().collect();
        sorted.sort_by_key(|b| b.start);

        let mut fragments = Vec::new();
        let mut last_end = 0;

        for block in sorted {
            if block.start > last_end {
                let prose = &query[last_end..block.start];
                if !prose.trim().is_empty() {
                    fragments.push(Fragment::new(
                        fragments.len(),
                        prose,
                        FragmentType::General,
                        false,
                    ));
                }
            }

            let mut code = Fragment::new(
                fragments.len(),
                &query[block.start..block.end],
                FragmentType::Code,
                true,
            )
            .with_hint(pricing::privacy_preferred());
            code.metadata = FragmentMetadata {
                language: block.language.clone(),
                confidence: Some(block.confidence),
                ..Default::default()
            };
            fragments.push(code);
            last_end = block.end;
        }

        if last_end < query.len() {
            let rest = &query[last_end..];
            if !rest.trim().is_empty() {
                fragments.push(Fragment::new(
                    fragments.len(),
                    rest,
                    FragmentType::General,
                    false,
                ));
            }
        }

        fragments
    }

    /// Split on sentence boundaries; a sentence is sensitive when it contains
    /// any recognized entity text (case-insensitive)
    fn semantic_split(&self, query: &str, entities: &[EntitySpan]) -> Vec<Fragment> {
        let mut fragments = Vec::new();

        for sentence in split_sentences(query) {
            if sentence.trim().is_empty() {
                continue;
            }
            let lower = sentence.to_lowercase();
            let sensitive = entities
                .iter()
                .any(|e| lower.contains(&e.text.to_lowercase()));

            let mut fragment = Fragment::new(
                fragments.len(),
                sentence,
                FragmentType::Semantic,
                sensitive,
            );
            if sensitive {
                fragment = fragment.with_hint(pricing::privacy_preferred());
            }
            fragments.push(fragment);
        }

        if fragments.is_empty() {
            return self.no_fragmentation(query);
        }

        fragments
    }

    /// Code isolation first, then PII isolation nested inside still-PII-bearing
    /// prose fragments, then a final length cap pass
    fn maximum_isolation(
        &self,
        query: &str,
        report: &DetectionReport,
        redaction_map: &mut RedactionMap,
    ) -> Vec<Fragment> {
        let mut fragments = if report.code.has_code {
            let mut expanded = Vec::new();
            for fragment in self.code_isolation(query, &report.code.blocks) {
                if fragment.fragment_type == FragmentType::General {
                    let spans = self.pii_detector.detect(&fragment.content);
                    if spans.is_empty() {
                        expanded.push(fragment);
                    } else {
                        expanded.extend(self.pii_isolation(
                            &fragment.content,
                            &spans,
                            redaction_map,
                        ));
                    }
                } else {
                    expanded.push(fragment);
                }
            }
            expanded
        } else if !report.pii_spans.is_empty() {
            self.pii_isolation(query, &report.pii_spans, redaction_map)
        } else {
            self.semantic_split(query, &report.entities)
        };

        // Length cap: chunks inherit type, sensitivity and hint from the parent
        let max = self.config.max_fragment_size;
        let mut capped = Vec::with_capacity(fragments.len());
        for fragment in fragments.drain(..) {
            if fragment.content.len() <= max {
                capped.push(fragment);
                continue;
            }
            for chunk in crate::util::split_by_words(&fragment.content, max) {
                let mut piece = Fragment::new(
                    capped.len(),
                    chunk,
                    fragment.fragment_type,
                    fragment.contains_sensitive_data,
                );
                piece.provider_hint = fragment.provider_hint;
                piece.metadata = fragment.metadata.clone();
                capped.push(piece);
            }
        }

        capped
    }

    fn length_based(&self, query: &str) -> Vec<Fragment> {
        let chunks = crate::util::split_by_words(query, self.config.max_fragment_size);
        if chunks.is_empty() {
            return self.no_fragmentation(query);
        }
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| Fragment::new(i, chunk, FragmentType::General, false))
            .collect()
    }
}

/// Assign dense ordinals 0..n in current order
fn renumber(fragments: &mut [Fragment]) {
    for (i, fragment) in fragments.iter_mut().enumerate() {
        fragment.ordinal = i;
    }
}

/// Split text after runs of terminal punctuation, keeping the punctuation and
/// trailing whitespace attached to the sentence so concatenation is lossless
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if matches!(bytes[i], b'.' | b'!' | b'?') {
            // Consume the punctuation run and any following whitespace
            while i < bytes.len() && matches!(bytes[i], b'.' | b'!' | b'?') {
                i += 1;
            }
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            sentences.push(&text[start..i]);
            start = i;
        } else {
            i += 1;
        }
    }

    if start < text.len() {
        sentences.push(&text[start..]);
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::DetectionEngine;

    fn fragmenter() -> Fragmenter {
        Fragmenter::new(
            FragmenterConfig::default(),
            Arc::new(crate::detection::pii::RegexPiiDetector::new()),
        )
    }

    async fn analyze(query: &str) -> DetectionReport {
        DetectionEngine::with_builtin_analyzers(2000)
            .analyze(query)
            .await
    }

    fn assert_invariants(result: &FragmentationResult) {
        // Dense ordinals from zero
        for (i, fragment) in result.fragments.iter().enumerate() {
            assert_eq!(fragment.ordinal, i);
        }
        // PII fragments are always sensitive
        for fragment in &result.fragments {
            if fragment.fragment_type == FragmentType::Pii {
                assert!(fragment.contains_sensitive_data);
            }
        }
        // Sensitive fragments carry a hint away from the public-preferred provider
        for fragment in &result.fragments {
            if fragment.contains_sensitive_data {
                let hint = fragment.provider_hint.expect("sensitive fragment needs hint");
                assert_ne!(hint, pricing::public_preferred());
            }
        }
    }

    #[tokio::test]
    async fn test_none_strategy_single_fragment() {
        let query = "What is the capital of France?";
        let report = analyze(query).await;
        let result = fragmenter().fragment(query, &report, None);

        assert_eq!(result.strategy_used, FragmentationStrategy::None);
        assert_eq!(result.fragments.len(), 1);
        assert_eq!(result.fragments[0].content, query);
        assert!(!result.fragments[0].contains_sensitive_data);
        assert!(result.redaction_map.is_empty());
        assert_invariants(&result);
    }

    #[tokio::test]
    async fn test_pii_isolation_carrier_and_instruction_fragments() {
        let query = "My name is John Smith and my email is john.smith@example.com. What's a good password manager?";
        let report = analyze(query).await;
        let result = fragmenter().fragment(query, &report, None);

        assert_eq!(result.strategy_used, FragmentationStrategy::PiiIsolation);
        assert!(result.fragments.len() >= 3, "carrier + person + email");
        assert_invariants(&result);

        // Carrier comes first, redacted and non-sensitive
        let carrier = &result.fragments[0];
        assert!(carrier.metadata.is_redacted);
        assert!(!carrier.contains_sensitive_data);
        assert!(!carrier.content.contains("John Smith"));
        assert!(!carrier.content.contains("john.smith@example.com"));
        assert!(carrier.content.contains("<PERSON>"));
        assert!(carrier.content.contains("<EMAIL>"));

        // Every span appears as placeholder + instruction fragment
        for span in &report.pii_spans {
            assert!(
                result
                    .fragments
                    .iter()
                    .skip(1)
                    .any(|f| f.content.contains(&span.text)),
                "span {:?} must have an instruction fragment",
                span.text
            );
        }

        // No raw PII in any non-sensitive fragment
        for fragment in result.fragments.iter().filter(|f| !f.contains_sensitive_data) {
            for span in &report.pii_spans {
                assert!(!fragment.content.contains(&span.text));
            }
        }
    }

    #[tokio::test]
    async fn test_pii_carrier_restores_to_original() {
        let query = "My name is John Smith and my email is john.smith@example.com. Help me.";
        let report = analyze(query).await;
        let result = fragmenter().fragment(query, &report, None);

        let carrier = &result.fragments[0];
        assert_eq!(result.redaction_map.restore(&carrier.content), query);
    }

    #[tokio::test]
    async fn test_repeated_pii_kind_gets_unique_placeholders() {
        let query = "My email is a@x.io and my email is b@y.io. Compare them.";
        let report = analyze(query).await;
        let result = fragmenter().fragment(query, &report, None);

        let carrier = &result.fragments[0];
        assert!(carrier.content.contains("<EMAIL>"));
        assert!(carrier.content.contains("<EMAIL_2>"));
        assert_eq!(result.redaction_map.restore(&carrier.content), query);
    }

    #[tokio::test]
    async fn test_code_isolation_roundtrip() {
        let query = "How can I improve this Python function: def hello(): print('Hello world')";
        let report = analyze(query).await;
        let result = fragmenter().fragment(query, &report, None);

        assert_eq!(result.strategy_used, FragmentationStrategy::CodeIsolation);
        assert!(result.fragments.len() >= 2);
        assert_invariants(&result);

        // Syntactic strategy: concatenation reconstructs the query exactly
        let rebuilt: String = result.fragments.iter().map(|f| f.content.as_str()).collect();
        assert_eq!(rebuilt, query);

        let code = result
            .fragments
            .iter()
            .find(|f| f.fragment_type == FragmentType::Code)
            .expect("code fragment");
        assert!(code.contains_sensitive_data);
        assert_eq!(code.provider_hint, Some(pricing::privacy_preferred()));
        assert_eq!(code.metadata.language.as_deref(), Some("python"));
    }

    #[tokio::test]
    async fn test_semantic_split_marks_entity_sentences() {
        let query = "Our vendor is Acme Systems Inc. The weather is nice today. We pay $3 million yearly.";
        let report = analyze(query).await;
        let result = fragmenter().fragment(query, &report, Some(FragmentationStrategy::SemanticSplit));

        assert!(result.fragments.len() >= 3);
        assert_invariants(&result);

        let rebuilt: String = result.fragments.iter().map(|f| f.content.as_str()).collect();
        assert_eq!(rebuilt, query);

        let vendor = result
            .fragments
            .iter()
            .find(|f| f.content.contains("Acme"))
            .unwrap();
        assert!(vendor.contains_sensitive_data);

        let weather = result
            .fragments
            .iter()
            .find(|f| f.content.contains("weather"))
            .unwrap();
        assert!(!weather.contains_sensitive_data);
    }

    #[tokio::test]
    async fn test_maximum_isolation_nests_pii_in_prose() {
        let query = "I'm John Doe (john@company.com) working on a Python script: import os; os.getenv('SECRET'). Can you help optimize it for security?";
        let report = analyze(query).await;
        let result = fragmenter().fragment(query, &report, None);

        assert_eq!(result.strategy_used, FragmentationStrategy::MaximumIsolation);
        assert!(result.fragments.len() >= 4);
        assert_invariants(&result);

        // No raw PII or code in any non-sensitive fragment
        for fragment in result.fragments.iter().filter(|f| !f.contains_sensitive_data) {
            assert!(!fragment.content.contains("John Doe"));
            assert!(!fragment.content.contains("john@company.com"));
        }

        // Code fragment preserved and isolated
        assert!(result
            .fragments
            .iter()
            .any(|f| f.fragment_type == FragmentType::Code && f.content.contains("os.getenv")));

        // Redaction map can restore the hidden spans
        assert!(!result.redaction_map.is_empty());
    }

    #[tokio::test]
    async fn test_maximum_isolation_caps_fragment_length() {
        let config = FragmenterConfig {
            max_fragment_size: 40,
        };
        let fragmenter = Fragmenter::new(
            config,
            Arc::new(crate::detection::pii::RegexPiiDetector::new()),
        );
        let query = "Here's my credit card: 4111-1111-1111-1111 and I would like a long explanation of how payment networks process transactions";
        let report = analyze(query).await;
        let result = fragmenter.fragment(query, &report, Some(FragmentationStrategy::MaximumIsolation));

        assert_invariants(&result);
        for fragment in &result.fragments {
            assert!(
                fragment.content.len() <= 60,
                "fragment should be length-capped: {:?}",
                fragment.content
            );
        }
    }

    #[tokio::test]
    async fn test_length_based_roundtrip() {
        let config = FragmenterConfig {
            max_fragment_size: 30,
        };
        let fragmenter = Fragmenter::new(
            config,
            Arc::new(crate::detection::pii::RegexPiiDetector::new()),
        );
        let query = "tell me about gardens and plants and seasons and light";
        let report = analyze(query).await;
        let result = fragmenter.fragment(query, &report, Some(FragmentationStrategy::LengthBased));

        assert!(result.fragments.len() > 1);
        assert_invariants(&result);
        let rebuilt: Vec<String> = result.fragments.iter().map(|f| f.content.clone()).collect();
        assert_eq!(rebuilt.join(" "), query);
    }

    #[tokio::test]
    async fn test_fragmentation_is_deterministic() {
        let query = "My name is John Smith and my email is john.smith@example.com. Help.";
        let report = analyze(query).await;
        let fragmenter = fragmenter();

        let a = fragmenter.fragment(query, &report, None);
        let b = fragmenter.fragment(query, &report, None);

        let contents_a: Vec<&str> = a.fragments.iter().map(|f| f.content.as_str()).collect();
        let contents_b: Vec<&str> = b.fragments.iter().map(|f| f.content.as_str()).collect();
        assert_eq!(contents_a, contents_b);
        assert_eq!(a.strategy_used, b.strategy_used);
    }

    #[test]
    fn test_split_sentences_lossless() {
        let text = "One. Two! Three? Four";
        let sentences = split_sentences(text);
        assert_eq!(sentences.len(), 4);
        assert_eq!(sentences.concat(), text);
    }
}
