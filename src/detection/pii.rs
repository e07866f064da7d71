// PII span detection
//
// The pipeline consumes PII spans through the `PiiDetector` trait so the
// analyzer can be swapped for an external service. The built-in
// `RegexPiiDetector` covers the structured kinds (email, phone, SSN, credit
// card, IP, URL) plus introduction-phrase person names, which keeps the
// service self-contained and the tests hermetic.

use regex::Regex;

use super::models::{PiiKind, PiiSpan};

/// Span producer for personally identifiable information
pub trait PiiDetector: Send + Sync {
    fn detect(&self, text: &str) -> Vec<PiiSpan>;
}

/// Regex-based detector for structured PII
pub struct RegexPiiDetector {
    patterns: Vec<(PiiKind, Regex, f64)>,
    person_intro: Regex,
}

impl RegexPiiDetector {
    pub fn new() -> Self {
        // Pattern order is priority order for overlap resolution
        let patterns = vec![
            (
                PiiKind::Ssn,
                Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap(),
                0.95,
            ),
            (
                PiiKind::CreditCard,
                Regex::new(r"\b(?:\d{4}[-\s]){3}\d{4}\b|\b\d{16}\b").unwrap(),
                0.95,
            ),
            (
                PiiKind::Email,
                Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap(),
                0.95,
            ),
            (
                PiiKind::Phone,
                Regex::new(r"(?:\+?1[-. ]?)?\(?[0-9]{3}\)?[-. ][0-9]{3}[-. ][0-9]{4}\b").unwrap(),
                0.90,
            ),
            (
                PiiKind::IpAddress,
                Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap(),
                0.85,
            ),
            (
                PiiKind::Url,
                Regex::new(r"\bhttps?://[^\s<>]+").unwrap(),
                0.80,
            ),
        ];

        // Names announced by an introduction phrase ("My name is John Smith")
        let person_intro = Regex::new(
            r"(?:[Mm]y name is|I'm|I am|[Tt]his is|[Cc]ontact)\s+([A-Z][a-z]+(?:\s[A-Z][a-z]+)+)",
        )
        .unwrap();

        Self {
            patterns,
            person_intro,
        }
    }
}

impl Default for RegexPiiDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PiiDetector for RegexPiiDetector {
    fn detect(&self, text: &str) -> Vec<PiiSpan> {
        let mut spans: Vec<PiiSpan> = Vec::new();

        for (kind, pattern, score) in &self.patterns {
            for m in pattern.find_iter(text) {
                push_non_overlapping(
                    &mut spans,
                    PiiSpan {
                        text: m.as_str().to_string(),
                        kind: *kind,
                        start: m.start(),
                        end: m.end(),
                        score: *score,
                    },
                );
            }
        }

        for caps in self.person_intro.captures_iter(text) {
            if let Some(name) = caps.get(1) {
                push_non_overlapping(
                    &mut spans,
                    PiiSpan {
                        text: name.as_str().to_string(),
                        kind: PiiKind::Person,
                        start: name.start(),
                        end: name.end(),
                        score: 0.85,
                    },
                );
            }
        }

        spans.sort_by_key(|s| (s.start, s.end));
        spans
    }
}

/// Keep spans within one analyzer non-overlapping; earlier (higher-priority)
/// patterns win ties
fn push_non_overlapping(spans: &mut Vec<PiiSpan>, candidate: PiiSpan) {
    let overlaps = spans
        .iter()
        .any(|s| candidate.start < s.end && s.start < candidate.end);
    if !overlaps {
        spans.push(candidate);
    }
}

/// Fraction of query characters covered by PII spans, deduplicated by
/// `(start, end, kind)` and clamped to [0,1]
pub fn pii_density(query: &str, spans: &[PiiSpan]) -> f64 {
    if query.is_empty() {
        return 0.0;
    }

    let mut seen = std::collections::HashSet::new();
    let covered: usize = spans
        .iter()
        .filter(|s| seen.insert((s.start, s.end, s.kind)))
        .map(|s| s.end - s.start)
        .sum();

    (covered as f64 / query.len() as f64).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_email() {
        let detector = RegexPiiDetector::new();
        let spans = detector.detect("Reach me at john.smith@example.com today");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].kind, PiiKind::Email);
        assert_eq!(spans[0].text, "john.smith@example.com");
    }

    #[test]
    fn test_detects_person_from_introduction() {
        let detector = RegexPiiDetector::new();
        let spans = detector.detect("My name is John Smith and I like Rust");
        assert!(spans.iter().any(|s| s.kind == PiiKind::Person && s.text == "John Smith"));
    }

    #[test]
    fn test_detects_credit_card() {
        let detector = RegexPiiDetector::new();
        let spans = detector.detect("Here's my credit card: 4111-1111-1111-1111");
        assert!(spans.iter().any(|s| s.kind == PiiKind::CreditCard));
    }

    #[test]
    fn test_detects_ssn() {
        let detector = RegexPiiDetector::new();
        let spans = detector.detect("SSN 123-45-6789 on file");
        assert_eq!(spans[0].kind, PiiKind::Ssn);
        assert_eq!(spans[0].text, "123-45-6789");
    }

    #[test]
    fn test_spans_do_not_overlap() {
        let detector = RegexPiiDetector::new();
        // Credit card digits could also match the phone pattern
        let spans = detector.detect("card 4111-1111-1111-1111 thanks");
        for (i, a) in spans.iter().enumerate() {
            for b in spans.iter().skip(i + 1) {
                assert!(a.end <= b.start || b.end <= a.start, "overlap: {a:?} {b:?}");
            }
        }
    }

    #[test]
    fn test_span_offsets_are_valid() {
        let detector = RegexPiiDetector::new();
        let text = "Contact Jane Doe at jane@corp.io or 555-123-4567.";
        for span in detector.detect(text) {
            assert!(span.start < span.end);
            assert!(span.end <= text.len());
            assert_eq!(&text[span.start..span.end], span.text);
        }
    }

    #[test]
    fn test_density_clamped_and_deduplicated() {
        let spans = vec![
            PiiSpan {
                text: "aa".into(),
                kind: PiiKind::Email,
                start: 0,
                end: 2,
                score: 0.9,
            },
            PiiSpan {
                text: "aa".into(),
                kind: PiiKind::Email,
                start: 0,
                end: 2,
                score: 0.9,
            },
        ];
        assert!((pii_density("aabb", &spans) - 0.5).abs() < 1e-9);
        assert_eq!(pii_density("", &[]), 0.0);
    }

    #[test]
    fn test_no_findings_in_plain_text() {
        let detector = RegexPiiDetector::new();
        assert!(detector.detect("What is the capital of France?").is_empty());
    }
}
