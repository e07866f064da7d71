// Named entity recognition
//
// Consumed through the `EntityRecognizer` trait. The built-in recognizer is a
// pattern-based stand-in for a statistical NER: organization suffixes, money
// amounts, and capitalized multi-word names outside sentence starts. It also
// owns the entity-sensitivity scoring used by the report assembler.

use regex::Regex;

use super::models::EntitySpan;

/// Entity labels that raise sensitivity
const SENSITIVE_LABELS: &[&str] = &["PERSON", "ORG", "GPE", "MONEY", "FAC", "PRODUCT"];

/// Span producer for named entities
pub trait EntityRecognizer: Send + Sync {
    fn recognize(&self, text: &str) -> Vec<EntitySpan>;

    /// Sensitivity contribution of the recognized entities, in [0,1]
    fn entity_sensitivity(&self, entities: &[EntitySpan]) -> f64 {
        if entities.is_empty() {
            return 0.0;
        }

        let sensitive_count = entities
            .iter()
            .filter(|e| SENSITIVE_LABELS.contains(&e.label.as_str()))
            .count();
        let mut score = sensitive_count as f64 / entities.len() as f64;

        // Information-rich queries get a density boost
        let density_boost = (entities.len() as f64 / 20.0).min(0.3);

        let labels: std::collections::HashSet<&str> =
            entities.iter().map(|e| e.label.as_str()).collect();

        // Financial context
        if labels.contains("ORG") && labels.contains("MONEY") {
            score = (score + 0.2).min(1.0);
        }
        // Personal context
        if labels.contains("PERSON") && (labels.contains("GPE") || labels.contains("LOC")) {
            score = (score + 0.15).min(1.0);
        }
        // Product/business context
        if labels.contains("PRODUCT") && labels.contains("ORG") {
            score = (score + 0.1).min(1.0);
        }

        (score + density_boost).min(1.0)
    }
}

/// Pattern-based recognizer for organizations, money, and proper names
pub struct PatternEntityRecognizer {
    org_suffix: Regex,
    money: Regex,
    proper_name: Regex,
}

impl PatternEntityRecognizer {
    pub fn new() -> Self {
        Self {
            org_suffix: Regex::new(
                r"\b([A-Z][A-Za-z0-9&]+(?:\s[A-Z][A-Za-z0-9&]+)*\s(?:Inc|Corp|Corporation|LLC|Ltd|GmbH|Labs|Systems|Technologies)\.?)",
            )
            .unwrap(),
            money: Regex::new(r"\$\d[\d,]*(?:\.\d+)?(?:\s?(?:million|billion|k|M|B))?").unwrap(),
            // Two or more capitalized words not opening a sentence
            proper_name: Regex::new(r"([A-Z][a-z]+(?:\s[A-Z][a-z]+)+)").unwrap(),
        }
    }

    /// True when the match position opens the text or follows a sentence end,
    /// where capitalization carries no signal
    fn at_sentence_start(text: &str, start: usize) -> bool {
        if start == 0 {
            return true;
        }
        let before = text[..start].trim_end();
        before.is_empty() || before.ends_with(['.', '!', '?'])
    }
}

impl Default for PatternEntityRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityRecognizer for PatternEntityRecognizer {
    fn recognize(&self, text: &str) -> Vec<EntitySpan> {
        let mut entities: Vec<EntitySpan> = Vec::new();
        let mut seen = std::collections::HashSet::new();

        let mut push = |entities: &mut Vec<EntitySpan>, span: EntitySpan| {
            let overlaps = entities
                .iter()
                .any(|e| span.start < e.end && e.start < span.end);
            if !overlaps && seen.insert((span.text.clone(), span.label.clone(), span.start)) {
                entities.push(span);
            }
        };

        for m in self.org_suffix.find_iter(text) {
            push(
                &mut entities,
                EntitySpan {
                    text: m.as_str().to_string(),
                    label: "ORG".to_string(),
                    start: m.start(),
                    end: m.end(),
                    score: 0.85,
                },
            );
        }

        for m in self.money.find_iter(text) {
            push(
                &mut entities,
                EntitySpan {
                    text: m.as_str().to_string(),
                    label: "MONEY".to_string(),
                    start: m.start(),
                    end: m.end(),
                    score: 0.90,
                },
            );
        }

        for m in self.proper_name.find_iter(text) {
            if Self::at_sentence_start(text, m.start()) {
                continue;
            }
            push(
                &mut entities,
                EntitySpan {
                    text: m.as_str().to_string(),
                    label: "PERSON".to_string(),
                    start: m.start(),
                    end: m.end(),
                    score: 0.70,
                },
            );
        }

        entities.sort_by_key(|e| e.start);
        entities
    }
}
