// Detection engine - unified sensitivity analysis over one query
//
// Runs the three analyzers (PII, code, entities) concurrently on the blocking
// pool, then derives density, per-factor sensitivity, the overall score, and
// the recommended fragmentation strategy. An individual analyzer failure is
// absorbed as "no findings" so the request can proceed.

pub mod code;
pub mod entities;
pub mod models;
pub mod pii;

use std::sync::Arc;
use std::time::Instant;

use crate::fragmentation::models::FragmentationStrategy;

use code::CodeDetector;
use entities::EntityRecognizer;
use models::{DetectionReport, PiiKind, SensitivityFactors};
use pii::PiiDetector;

/// Keywords that mark a query as sensitive regardless of spans
const SENSITIVE_KEYWORDS: &[&str] = &[
    "password",
    "secret",
    "token",
    "api key",
    "private key",
    "ssn",
    "social security",
    "credit card",
    "bank account",
    "medical",
    "diagnosis",
    "prescription",
    "health",
    "confidential",
    "proprietary",
    "internal",
    "revenue",
    "profit",
    "salary",
    "compensation",
    "strategy",
    "roadmap",
    "acquisition",
    "merger",
];

/// Keywords that mark a casual context where names and locations are benign
const CASUAL_CONTEXT_KEYWORDS: &[&str] = &[
    "weather",
    "news",
    "restaurant",
    "hotel",
    "flight",
    "train",
    "tourist",
    "visit",
    "travel",
    "directions",
    "map",
    "what is",
];

/// Languages whose presence in code raises the code factor
const HIGH_RISK_LANGUAGES: &[&str] = &["sql", "bash", "powershell"];

/// Unified detection engine over the three analyzers
pub struct DetectionEngine {
    pii: Arc<dyn PiiDetector>,
    code: Arc<dyn CodeDetector>,
    entities: Arc<dyn EntityRecognizer>,
    /// Length above which an otherwise-plain query is split by length
    max_fragment_size: usize,
}

impl DetectionEngine {
    pub fn new(
        pii: Arc<dyn PiiDetector>,
        code: Arc<dyn CodeDetector>,
        entities: Arc<dyn EntityRecognizer>,
        max_fragment_size: usize,
    ) -> Self {
        Self {
            pii,
            code,
            entities,
            max_fragment_size,
        }
    }

    /// Engine with the built-in regex/heuristic analyzers
    pub fn with_builtin_analyzers(max_fragment_size: usize) -> Self {
        Self::new(
            Arc::new(pii::RegexPiiDetector::new()),
            Arc::new(code::HeuristicCodeDetector::new()),
            Arc::new(entities::PatternEntityRecognizer::new()),
            max_fragment_size,
        )
    }

    /// The PII detector, shared with the fragmenter for prose re-analysis
    pub fn pii_detector(&self) -> Arc<dyn PiiDetector> {
        self.pii.clone()
    }

    /// Analyze a query with all three analyzers in parallel
    pub async fn analyze(&self, query: &str) -> DetectionReport {
        let start = Instant::now();

        // Analyzers are CPU-bound, so they run on the blocking pool; the
        // wall-clock is the max of the three plus merge cost
        let pii = self.pii.clone();
        let code = self.code.clone();
        let entities = self.entities.clone();
        let (q1, q2, q3) = (query.to_string(), query.to_string(), query.to_string());

        let (pii_result, code_result, entity_result) = tokio::join!(
            tokio::task::spawn_blocking(move || pii.detect(&q1)),
            tokio::task::spawn_blocking(move || code.detect(&q2)),
            tokio::task::spawn_blocking(move || entities.recognize(&q3)),
        );

        // A panicking analyzer contributes no findings
        let pii_spans = pii_result.unwrap_or_else(|e| {
            tracing::warn!("PII analyzer failed: {e}");
            Vec::new()
        });
        let code_detection = code_result.unwrap_or_else(|e| {
            tracing::warn!("Code analyzer failed: {e}");
            Default::default()
        });
        let entity_spans = entity_result.unwrap_or_else(|e| {
            tracing::warn!("Entity analyzer failed: {e}");
            Vec::new()
        });

        let query_lower = query.to_lowercase();
        let is_casual = CASUAL_CONTEXT_KEYWORDS
            .iter()
            .any(|k| query_lower.contains(k));

        let pii_density = pii::pii_density(query, &pii_spans);

        // Per-factor sensitivity
        let pii_factor = if pii_spans.is_empty() {
            0.0
        } else {
            let only_casual_kinds = pii_spans
                .iter()
                .all(|s| matches!(s.kind, PiiKind::Location | PiiKind::Person));
            if is_casual && only_casual_kinds {
                0.1
            } else {
                let high_risk = pii_spans.iter().filter(|s| s.kind.is_high_risk()).count();
                (0.3 + pii_spans.len() as f64 * 0.1 + high_risk as f64 * 0.2).min(1.0)
            }
        };

        let code_factor = if code_detection.has_code {
            let mut factor = code_detection.confidence;
            if code_detection
                .language
                .as_deref()
                .is_some_and(|l| HIGH_RISK_LANGUAGES.contains(&l))
            {
                factor = (factor + 0.2).min(1.0);
            }
            factor
        } else {
            0.0
        };

        let mut entity_factor = self.entities.entity_sensitivity(&entity_spans);
        if is_casual {
            entity_factor *= 0.3;
        }

        let keyword_hits = SENSITIVE_KEYWORDS
            .iter()
            .filter(|k| query_lower.contains(*k))
            .count();
        let keyword_factor = (keyword_hits as f64 * 0.25).min(1.0);

        let factors = SensitivityFactors {
            pii_factor,
            code_factor,
            entity_factor,
            keyword_factor,
        };
        let sensitivity_score = factors.overall();

        let has_pii = has_significant_pii(&pii_spans, is_casual);

        let (recommended_strategy, requires_orchestrator) = self.select_strategy(
            sensitivity_score,
            &factors,
            &code_detection,
            &pii_spans,
            has_pii,
            entity_spans.len(),
            query.len(),
        );

        let report = DetectionReport {
            has_pii,
            pii_spans,
            pii_density,
            code: code_detection,
            entities: entity_spans,
            factors,
            sensitivity_score,
            recommended_strategy,
            requires_orchestrator,
            analyzer_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        };

        tracing::debug!(
            sensitivity = report.sensitivity_score,
            strategy = ?report.recommended_strategy,
            has_pii = report.has_pii,
            "detection completed in {:.2}ms",
            report.analyzer_time_ms
        );

        report
    }

    /// Strategy selection table, first match wins
    #[allow(clippy::too_many_arguments)]
    fn select_strategy(
        &self,
        sensitivity: f64,
        factors: &SensitivityFactors,
        code: &models::CodeDetection,
        pii_spans: &[models::PiiSpan],
        has_pii: bool,
        entity_count: usize,
        query_len: usize,
    ) -> (FragmentationStrategy, bool) {
        if sensitivity >= 0.7 {
            return (FragmentationStrategy::MaximumIsolation, true);
        }
        if factors.keyword_factor >= 0.5 {
            return (FragmentationStrategy::SemanticSplit, true);
        }
        if code.has_code && has_pii {
            return (FragmentationStrategy::MaximumIsolation, true);
        }
        if entity_count > 10 {
            return (FragmentationStrategy::SemanticSplit, true);
        }
        if code.has_code {
            // Low-confidence PII spans alongside code still warrant escalation
            return (FragmentationStrategy::CodeIsolation, !pii_spans.is_empty());
        }
        if has_pii {
            return (FragmentationStrategy::PiiIsolation, false);
        }
        if sensitivity > 0.4 {
            return (FragmentationStrategy::SemanticSplit, false);
        }
        if query_len > self.max_fragment_size {
            return (FragmentationStrategy::LengthBased, false);
        }
        (FragmentationStrategy::None, false)
    }
}

/// Significant PII: high-risk kinds always count; names and locations only
/// outside casual contexts and with high confidence
fn has_significant_pii(spans: &[models::PiiSpan], is_casual: bool) -> bool {
    spans.iter().any(|s| {
        if s.kind.is_significant() {
            return true;
        }
        if matches!(s.kind, PiiKind::Person | PiiKind::Location) {
            return !is_casual && s.score > 0.8;
        }
        false
    })
}
