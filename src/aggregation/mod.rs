// Response aggregator - combines fragment responses into one answer
//
// The strategy is selected by fragment mix. Weighted ensemble scores each
// response on length fit, processing time, privacy alignment, coherence and
// type appropriateness, then multiplies by the provider reliability weight
// from the pricing table. PII reassembly restores redaction-map placeholders
// longest-first. Any failure path degrades to ordered concatenation.

use std::collections::HashSet;

use regex::Regex;

use crate::fragmentation::models::{Fragment, FragmentType, RedactionMap};
use crate::orchestrator::models::{FragmentResult, PrivacyLevel};
use crate::pricing;

/// Aggregation strategies, keyed by fragment mix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationStrategy {
    WeightedEnsemble,
    PiiReassembly,
    CodeReassembly,
    SemanticMerge,
    Contextual,
}

pub struct ResponseAggregator {
    code_fence: Regex,
    inline_code: Regex,
}

impl Default for ResponseAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseAggregator {
    pub fn new() -> Self {
        Self {
            code_fence: Regex::new(r"(?s)```[a-zA-Z0-9_+-]*\n?(.*?)```").unwrap(),
            inline_code: Regex::new(r"`([^`\n]+)`").unwrap(),
        }
    }

    /// Combine fragment results into one answer
    ///
    /// Results may arrive in any completion order; aggregation reorders by
    /// fragment ordinal before merging.
    pub fn aggregate(
        &self,
        results: &[FragmentResult],
        fragments: &[Fragment],
        redaction_map: &RedactionMap,
        privacy_level: PrivacyLevel,
    ) -> String {
        let pairs = sort_by_ordinal(results, fragments);
        if pairs.is_empty() {
            return fallback_concat(results);
        }

        let strategy = select_strategy(fragments, privacy_level);
        tracing::debug!(strategy = ?strategy, responses = pairs.len(), "aggregating responses");

        let merged = match strategy {
            AggregationStrategy::WeightedEnsemble => self.weighted_ensemble(&pairs),
            AggregationStrategy::PiiReassembly => self.pii_reassembly(&pairs, redaction_map),
            AggregationStrategy::CodeReassembly => self.code_reassembly(&pairs),
            AggregationStrategy::SemanticMerge => self.semantic_merge(&pairs),
            AggregationStrategy::Contextual => self.contextual(&pairs),
        };

        if merged.trim().is_empty() {
            return fallback_concat(results);
        }

        post_process(&merged)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Weighted ensemble
    // ─────────────────────────────────────────────────────────────────────

    fn weighted_ensemble(&self, pairs: &[(&FragmentResult, &Fragment)]) -> String {
        let mut weighted: Vec<(String, f64)> = Vec::new();
        let mut total_weight = 0.0;

        for (result, fragment) in pairs {
            let text = result.response.content.trim();
            if text.is_empty() {
                continue;
            }
            let confidence = self.confidence_score(result, fragment);
            let reliability = pricing::rates_for(result.provider).reliability_weight;
            let weight = confidence * reliability;
            total_weight += weight;
            weighted.push((text.to_string(), weight));
        }

        if weighted.is_empty() {
            return String::new();
        }

        weighted.sort_by(|a, b| b.1.total_cmp(&a.1));

        match weighted.len() {
            1 => weighted[0].0.clone(),
            2 => merge_two(&weighted[0], &weighted[1]),
            _ => merge_multiple(&weighted, total_weight),
        }
    }

    /// Confidence in [0,1] from response-quality indicators
    fn confidence_score(&self, result: &FragmentResult, fragment: &Fragment) -> f64 {
        let text = result.response.content.trim();
        let mut score = 0.5;

        score += score_length(text) * 0.2;
        score += score_time(result.latency_ms) * 0.1;
        score += if fragment.contains_sensitive_data {
            result.privacy_score * 0.3
        } else {
            0.15
        };
        score += score_coherence(text) * 0.3;
        score += self.score_type_fit(text, fragment) * 0.1;

        score.clamp(0.0, 1.0)
    }

    fn score_type_fit(&self, text: &str, fragment: &Fragment) -> f64 {
        match fragment.fragment_type {
            FragmentType::Code => {
                if text.contains("```") || text.contains('`') {
                    1.0
                } else if ["function", "def ", "class ", "let ", "const ", "fn "]
                    .iter()
                    .any(|k| text.to_lowercase().contains(k))
                {
                    0.7
                } else {
                    0.3
                }
            }
            FragmentType::Pii => {
                if fragment
                    .metadata
                    .placeholder
                    .as_deref()
                    .is_some_and(|p| text.contains(p))
                {
                    1.0
                } else {
                    0.8
                }
            }
            _ => 0.8,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // PII reassembly
    // ─────────────────────────────────────────────────────────────────────

    /// Restore placeholders in carrier responses; PII instruction fragments
    /// are a control channel, their acknowledgments are not user-visible
    fn pii_reassembly(
        &self,
        pairs: &[(&FragmentResult, &Fragment)],
        redaction_map: &RedactionMap,
    ) -> String {
        let mut restored: Vec<String> = Vec::new();

        for (result, fragment) in pairs {
            if fragment.fragment_type == FragmentType::Pii {
                continue;
            }
            let text = result.response.content.trim();
            if text.is_empty() {
                continue;
            }
            let text = if fragment.metadata.is_redacted {
                redaction_map.restore(text)
            } else {
                text.to_string()
            };

            // Avoid near-duplicate answers from parallel fragments
            let duplicate = restored.iter().any(|kept| jaccard(kept, &text) > 0.7);
            if !duplicate {
                restored.push(text);
            }
        }

        restored.join("\n\n")
    }

    // ─────────────────────────────────────────────────────────────────────
    // Code reassembly
    // ─────────────────────────────────────────────────────────────────────

    /// Prose pieces first, then code pieces with fencing preserved
    fn code_reassembly(&self, pairs: &[(&FragmentResult, &Fragment)]) -> String {
        let mut prose = Vec::new();
        let mut code = Vec::new();

        for (result, fragment) in pairs {
            let text = result.response.content.trim();
            if text.is_empty() {
                continue;
            }
            if fragment.fragment_type == FragmentType::Code {
                code.extend(self.extract_code_sections(text));
            } else {
                prose.push(text.to_string());
            }
        }

        let mut out = String::new();
        if !prose.is_empty() {
            out.push_str(&prose.join("\n\n"));
        }
        if !code.is_empty() {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(&code.join("\n\n"));
        }
        out
    }

    fn extract_code_sections(&self, text: &str) -> Vec<String> {
        let mut sections: Vec<String> = self
            .code_fence
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| format!("```\n{}\n```", m.as_str().trim_matches('\n')))
            .collect();

        if sections.is_empty() {
            sections = self
                .inline_code
                .captures_iter(text)
                .filter_map(|c| c.get(1))
                .map(|m| format!("`{}`", m.as_str()))
                .collect();
        }

        if sections.is_empty() {
            vec![text.to_string()]
        } else {
            sections
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Semantic merge and contextual
    // ─────────────────────────────────────────────────────────────────────

    /// Group consecutive fragments of identical type, join groups with
    /// transitional connectives
    fn semantic_merge(&self, pairs: &[(&FragmentResult, &Fragment)]) -> String {
        let mut groups: Vec<Vec<&str>> = Vec::new();
        let mut current_type: Option<FragmentType> = None;

        for (result, fragment) in pairs {
            let text = result.response.content.trim();
            if text.is_empty() {
                continue;
            }
            if current_type == Some(fragment.fragment_type) {
                if let Some(group) = groups.last_mut() {
                    group.push(text);
                }
            } else {
                groups.push(vec![text]);
                current_type = Some(fragment.fragment_type);
            }
        }

        groups
            .iter()
            .map(|group| merge_group(group))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Prepend connective prose when a fragment references an earlier one
    fn contextual(&self, pairs: &[(&FragmentResult, &Fragment)]) -> String {
        let seen: HashSet<&str> = pairs
            .iter()
            .map(|(_, f)| f.fragment_id.as_str())
            .collect();

        let mut parts = Vec::new();
        for (result, fragment) in pairs {
            let text = result.response.content.trim();
            if text.is_empty() {
                continue;
            }
            let references_earlier = fragment
                .context_references
                .iter()
                .any(|id| seen.contains(id.as_str()));

            if references_earlier && !parts.is_empty() && !starts_with_transition(text) {
                parts.push(format!(
                    "Building on the previous point, {}",
                    lower_first(text)
                ));
            } else {
                parts.push(text.to_string());
            }
        }
        parts.join("\n\n")
    }
}

/// Strategy by fragment mix, first match wins
pub fn select_strategy(fragments: &[Fragment], privacy_level: PrivacyLevel) -> AggregationStrategy {
    if privacy_level >= PrivacyLevel::Restricted {
        return AggregationStrategy::WeightedEnsemble;
    }

    let distinct_hints: HashSet<_> = fragments.iter().filter_map(|f| f.provider_hint).collect();
    if distinct_hints.len() > 1 {
        return AggregationStrategy::WeightedEnsemble;
    }

    let types: HashSet<FragmentType> = fragments.iter().map(|f| f.fragment_type).collect();
    if types.contains(&FragmentType::Pii) {
        return AggregationStrategy::PiiReassembly;
    }
    if types.contains(&FragmentType::Code) {
        return AggregationStrategy::CodeReassembly;
    }
    if types.contains(&FragmentType::Semantic) {
        return AggregationStrategy::SemanticMerge;
    }
    if fragments.iter().any(|f| !f.context_references.is_empty()) {
        return AggregationStrategy::Contextual;
    }

    AggregationStrategy::WeightedEnsemble
}

/// Ordered concatenation of non-empty responses, the universal fallback
pub fn fallback_concat(results: &[FragmentResult]) -> String {
    let mut sorted: Vec<&FragmentResult> = results.iter().collect();
    sorted.sort_by_key(|r| r.ordinal);
    sorted
        .iter()
        .map(|r| r.response.content.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Pair results with their fragments and order by ordinal regardless of
/// completion order
fn sort_by_ordinal<'a>(
    results: &'a [FragmentResult],
    fragments: &'a [Fragment],
) -> Vec<(&'a FragmentResult, &'a Fragment)> {
    let mut pairs: Vec<(&FragmentResult, &Fragment)> = results
        .iter()
        .filter_map(|result| {
            fragments
                .iter()
                .find(|f| f.fragment_id == result.fragment_id)
                .map(|fragment| (result, fragment))
        })
        .collect();
    pairs.sort_by_key(|(_, f)| f.ordinal);
    pairs
}

fn score_length(text: &str) -> f64 {
    let len = text.len();
    if (50..=500).contains(&len) {
        1.0
    } else if (20..=1000).contains(&len) {
        0.7
    } else if len < 20 {
        0.3
    } else {
        0.5
    }
}

fn score_time(time_ms: f64) -> f64 {
    if time_ms < 1000.0 {
        1.0
    } else if time_ms < 3000.0 {
        0.8
    } else if time_ms < 5000.0 {
        0.6
    } else {
        0.4
    }
}

const ERROR_PHRASES: &[&str] = &[
    "sorry, but i can't",
    "i don't understand",
    "i'm not sure",
    "could you provide",
    "please clarify",
];

fn score_coherence(text: &str) -> f64 {
    let lower = text.to_lowercase();
    if ERROR_PHRASES.iter().any(|p| lower.contains(p)) {
        return 0.2;
    }

    let sentences = text.split('.').filter(|s| !s.trim().is_empty()).count();
    let mut coherence: f64 = match sentences {
        0 => 0.4,
        1 => 0.6,
        _ => 0.8,
    };

    let starts_upper = text.chars().next().is_some_and(|c| c.is_uppercase());
    if starts_upper && text.ends_with(['.', '!', '?']) {
        coherence += 0.2;
    }

    coherence.min(1.0)
}

fn merge_two(primary: &(String, f64), secondary: &(String, f64)) -> String {
    let ratio = primary.1 / (secondary.1 + 0.001);
    if ratio > 2.0 {
        primary.0.clone()
    } else if ratio > 1.5 {
        format!("{}\n\nAdditionally, {}", primary.0, lower_first(&secondary.0))
    } else {
        format!("{}\n\n{}", primary.0, secondary.0)
    }
}

fn merge_multiple(weighted: &[(String, f64)], total_weight: f64) -> String {
    let mut out = weighted[0].0.clone();
    for (i, (text, weight)) in weighted.iter().take(3).enumerate().skip(1) {
        // Only include meaningfully-weighted contributions
        if total_weight > 0.0 && weight / total_weight > 0.15 {
            let connective = if i == 1 { "Additionally" } else { "Furthermore" };
            out.push_str(&format!("\n\n{connective}, {}", lower_first(text)));
        }
    }
    out
}

fn merge_group(responses: &[&str]) -> String {
    match responses {
        [] => String::new(),
        [single] => (*single).to_string(),
        _ => {
            let mut merged = responses[0].to_string();
            for (i, response) in responses.iter().enumerate().skip(1) {
                let connective = if i == responses.len() - 1 {
                    "Finally"
                } else {
                    "Additionally"
                };
                merged.push_str(&format!("\n\n{connective}, {}", lower_first(response)));
            }
            merged
        }
    }
}

fn starts_with_transition(text: &str) -> bool {
    let lower = text.to_lowercase();
    [
        "however",
        "but ",
        "on the other hand",
        "additionally",
        "furthermore",
        "also",
        "building on",
    ]
    .iter()
    .any(|t| lower.starts_with(t))
}

fn lower_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Word-set Jaccard similarity for duplicate suppression
fn jaccard(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = a.split_whitespace().map(|w| w.to_lowercase()).collect();
    let set_b: HashSet<String> = b.split_whitespace().map(|w| w.to_lowercase()).collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    intersection / union
}

/// Final cleanup: collapse blank-line runs, strip stuttered connectives,
/// re-capitalize sentence starts. Idempotent.
pub fn post_process(text: &str) -> String {
    // Collapse 3+ newlines to a blank line
    let collapsed = Regex::new(r"\n{3,}")
        .expect("static regex")
        .replace_all(text, "\n\n")
        .into_owned();

    // Strip immediate repetitions of the same connective
    let stutter = Regex::new(r"(?i)\b(additionally|furthermore|also), (?:(additionally|furthermore|also), )+")
        .expect("static regex");
    let destuttered = stutter.replace_all(&collapsed, "$1, ").into_owned();

    // Capitalize sentence starts after ". "
    let mut out = String::with_capacity(destuttered.len());
    let mut capitalize_next = true;
    let mut chars = destuttered.chars().peekable();
    while let Some(c) = chars.next() {
        if capitalize_next && c.is_alphabetic() {
            out.extend(c.to_uppercase());
            capitalize_next = false;
        } else {
            out.push(c);
            if c == '.' && chars.peek().is_some_and(|n| n.is_whitespace()) {
                capitalize_next = true;
            } else if !c.is_whitespace() && c != '.' {
                capitalize_next = false;
            }
        }
    }

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::models::PiiKind;
    use crate::providers::models::{LlmResponse, ProviderId};

    fn fragment(ordinal: usize, fragment_type: FragmentType, sensitive: bool) -> Fragment {
        let mut f = Fragment::new(ordinal, format!("frag {ordinal}"), fragment_type, sensitive);
        f.ordinal = ordinal;
        if sensitive {
            f.provider_hint = Some(pricing::privacy_preferred());
        }
        f
    }

    fn result_for(fragment: &Fragment, provider: ProviderId, content: &str) -> FragmentResult {
        FragmentResult {
            fragment_id: fragment.fragment_id.clone(),
            ordinal: fragment.ordinal,
            provider,
            response: LlmResponse {
                request_id: "r".to_string(),
                provider,
                content: content.to_string(),
                finish_reason: "stop".to_string(),
                tokens_used: 10,
                latency_ms: 200.0,
                model_used: "m".to_string(),
                timestamp: chrono::Utc::now(),
            },
            latency_ms: 200.0,
            tokens_used: 10,
            cost_estimate: 0.001,
            privacy_score: 0.9,
        }
    }

    #[test]
    fn test_strategy_restricted_forces_weighted() {
        let fragments = vec![fragment(0, FragmentType::Pii, true)];
        assert_eq!(
            select_strategy(&fragments, PrivacyLevel::Restricted),
            AggregationStrategy::WeightedEnsemble
        );
    }

    #[test]
    fn test_strategy_pii_mix() {
        let fragments = vec![
            fragment(0, FragmentType::General, false),
            fragment(1, FragmentType::Pii, true),
        ];
        assert_eq!(
            select_strategy(&fragments, PrivacyLevel::Internal),
            AggregationStrategy::PiiReassembly
        );
    }

    #[test]
    fn test_strategy_code_mix() {
        let fragments = vec![
            fragment(0, FragmentType::General, false),
            fragment(1, FragmentType::Code, true),
        ];
        assert_eq!(
            select_strategy(&fragments, PrivacyLevel::Internal),
            AggregationStrategy::CodeReassembly
        );
    }

    #[test]
    fn test_aggregation_reorders_by_ordinal() {
        let aggregator = ResponseAggregator::new();
        let f0 = fragment(0, FragmentType::Semantic, false);
        let f1 = fragment(1, FragmentType::Semantic, false);

        // Results arrive out of order
        let results = vec![
            result_for(&f1, ProviderId::OpenAi, "Second part."),
            result_for(&f0, ProviderId::OpenAi, "First part."),
        ];
        let merged = aggregator.aggregate(
            &results,
            &[f0, f1],
            &RedactionMap::new(),
            PrivacyLevel::Public,
        );
        let first = merged.find("First").unwrap();
        let second = merged.find("second").or_else(|| merged.find("Second")).unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_pii_reassembly_restores_placeholders_and_drops_control_responses() {
        let aggregator = ResponseAggregator::new();
        let mut map = RedactionMap::new();
        let placeholder = map.reserve_placeholder(PiiKind::Person, "John Smith");

        let mut carrier = fragment(0, FragmentType::General, false);
        carrier.metadata.is_redacted = true;
        let pii = fragment(1, FragmentType::Pii, true);

        let results = vec![
            result_for(
                &carrier,
                ProviderId::OpenAi,
                &format!("Dear {placeholder}, use a password manager with strong encryption."),
            ),
            result_for(&pii, ProviderId::Anthropic, "Understood, I will handle the replacement."),
        ];

        let merged = aggregator.aggregate(
            &results,
            &[carrier, pii],
            &map,
            PrivacyLevel::Confidential,
        );

        // Strategy note: confidential is below restricted and there is a
        // single distinct hint, so PII reassembly applies
        assert!(merged.contains("John Smith"));
        assert!(!merged.contains("<PERSON>"));
        assert!(!merged.contains("Understood, I will handle"));
    }

    #[test]
    fn test_no_placeholder_survives_aggregation() {
        let aggregator = ResponseAggregator::new();
        let mut map = RedactionMap::new();
        let p1 = map.reserve_placeholder(PiiKind::Email, "a@x.io");
        let p2 = map.reserve_placeholder(PiiKind::Email, "b@y.io");

        let mut carrier = fragment(0, FragmentType::General, false);
        carrier.metadata.is_redacted = true;
        let pii = fragment(1, FragmentType::Pii, true);

        let results = vec![result_for(
            &carrier,
            ProviderId::OpenAi,
            &format!("Send from {p1} to {p2} directly."),
        )];
        let merged = aggregator.aggregate(&results, &[carrier, pii], &map, PrivacyLevel::Internal);

        for placeholder in map.placeholders() {
            assert!(!merged.contains(placeholder.as_str()));
        }
        assert!(merged.contains("a@x.io"));
        assert!(merged.contains("b@y.io"));
    }

    #[test]
    fn test_code_reassembly_prose_then_code() {
        let aggregator = ResponseAggregator::new();
        let prose = fragment(0, FragmentType::General, false);
        let code = fragment(1, FragmentType::Code, true);

        let results = vec![
            result_for(&prose, ProviderId::OpenAi, "You can simplify the function."),
            result_for(
                &code,
                ProviderId::Anthropic,
                "Try this:\n```python\ndef hello():\n    print('hi')\n```",
            ),
        ];
        let merged = aggregator.aggregate(
            &results,
            &[prose, code],
            &RedactionMap::new(),
            PrivacyLevel::Internal,
        );

        let prose_pos = merged.find("simplify").unwrap();
        let code_pos = merged.find("```").unwrap();
        assert!(prose_pos < code_pos);
        assert!(merged.contains("def hello()"));
    }

    #[test]
    fn test_weighted_ensemble_orders_by_weight() {
        let aggregator = ResponseAggregator::new();

        // A coherent, well-sized answer vs an error-ish stub; distinct
        // provider hints force the weighted ensemble
        let mut strong = fragment(0, FragmentType::General, true);
        strong.provider_hint = Some(ProviderId::Anthropic);
        let mut weak = fragment(1, FragmentType::General, true);
        weak.provider_hint = Some(ProviderId::OpenAi);

        let results = vec![
            result_for(&weak, ProviderId::Google, "I'm not sure"),
            result_for(
                &strong,
                ProviderId::Anthropic,
                "Paris is the capital of France. It has been the seat of government for centuries.",
            ),
        ];
        let merged = aggregator.aggregate(
            &results,
            &[strong, weak],
            &RedactionMap::new(),
            PrivacyLevel::Public,
        );
        // The higher-weighted answer leads even though it completed second
        assert!(merged.starts_with("Paris"));
    }

    #[test]
    fn test_merge_two_ratio_thresholds() {
        let primary = ("Primary answer.".to_string(), 0.9);

        // Dominant: only the primary survives
        let dominated = merge_two(&primary, &("Secondary answer.".to_string(), 0.4));
        assert_eq!(dominated, "Primary answer.");

        // Clearly better: secondary folded in as an addition
        let folded = merge_two(&primary, &("Secondary answer.".to_string(), 0.5));
        assert!(folded.contains("Additionally, secondary answer."));

        // Balanced: both stand alone
        let balanced = merge_two(&primary, &("Secondary answer.".to_string(), 0.8));
        assert_eq!(balanced, "Primary answer.\n\nSecondary answer.");
    }

    #[test]
    fn test_fallback_concat_orders_and_skips_empty() {
        let f0 = fragment(0, FragmentType::General, false);
        let f1 = fragment(1, FragmentType::General, false);
        let f2 = fragment(2, FragmentType::General, false);
        let results = vec![
            result_for(&f2, ProviderId::OpenAi, "third"),
            result_for(&f0, ProviderId::OpenAi, "first"),
            result_for(&f1, ProviderId::OpenAi, "   "),
        ];
        assert_eq!(fallback_concat(&results), "first\n\nthird");
    }

    #[test]
    fn test_post_process_collapses_blank_lines() {
        assert_eq!(post_process("a\n\n\n\nb"), "A\n\nb");
    }

    #[test]
    fn test_post_process_strips_stuttered_connectives() {
        let out = post_process("Additionally, Additionally, the answer is yes.");
        assert_eq!(out, "Additionally, the answer is yes.");
    }

    #[test]
    fn test_post_process_capitalizes_sentence_starts() {
        let out = post_process("first point. second point.");
        assert_eq!(out, "First point. Second point.");
    }

    #[test]
    fn test_post_process_idempotent() {
        let samples = [
            "a\n\n\n\nb. c d. additionally, more",
            "Additionally, Additionally, x. y",
            "Paris is the capital.\n\n\nIt is large.",
        ];
        for sample in samples {
            let once = post_process(sample);
            let twice = post_process(&once);
            assert_eq!(once, twice, "post_process must be idempotent for {sample:?}");
        }
    }

    #[test]
    fn test_jaccard_duplicate_detection() {
        assert!(jaccard("the quick brown fox", "the quick brown fox") > 0.99);
        assert!(jaccard("the quick brown fox", "a completely different thing") < 0.2);
    }

    #[test]
    fn test_semantic_merge_groups_consecutive() {
        let aggregator = ResponseAggregator::new();
        let f0 = fragment(0, FragmentType::Semantic, false);
        let f1 = fragment(1, FragmentType::Semantic, false);
        let results = vec![
            result_for(&f0, ProviderId::OpenAi, "The first sentence answer."),
            result_for(&f1, ProviderId::OpenAi, "The second sentence answer."),
        ];
        let merged = aggregator.aggregate(
            &results,
            &[f0, f1],
            &RedactionMap::new(),
            PrivacyLevel::Public,
        );
        assert!(merged.contains("Finally, the second sentence answer."));
    }
}
