// Data types shared by the three analyzers and the report assembler

use serde::{Deserialize, Serialize};

use crate::fragmentation::models::FragmentationStrategy;

/// PII categories recognized by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    Person,
    Email,
    Phone,
    Ssn,
    CreditCard,
    Location,
    DateTime,
    IpAddress,
    Url,
    Medical,
    DriverLicense,
    Passport,
    BankAccount,
    Other,
}

impl PiiKind {
    /// Placeholder token used when this kind is redacted out of a carrier
    /// fragment, e.g. `<EMAIL>`
    pub fn placeholder(&self) -> &'static str {
        match self {
            PiiKind::Person => "<PERSON>",
            PiiKind::Email => "<EMAIL>",
            PiiKind::Phone => "<PHONE>",
            PiiKind::Ssn => "<SSN>",
            PiiKind::CreditCard => "<CREDIT_CARD>",
            PiiKind::Location => "<LOCATION>",
            PiiKind::DateTime => "<DATE_TIME>",
            PiiKind::IpAddress => "<IP_ADDRESS>",
            PiiKind::Url => "<URL>",
            PiiKind::Medical => "<MEDICAL>",
            PiiKind::DriverLicense => "<DRIVER_LICENSE>",
            PiiKind::Passport => "<PASSPORT>",
            PiiKind::BankAccount => "<BANK_ACCOUNT>",
            PiiKind::Other => "<PII>",
        }
    }

    /// High-risk kinds always count as significant PII regardless of context
    pub fn is_high_risk(&self) -> bool {
        matches!(
            self,
            PiiKind::Ssn
                | PiiKind::CreditCard
                | PiiKind::BankAccount
                | PiiKind::Medical
                | PiiKind::Passport
                | PiiKind::DriverLicense
        )
    }

    /// Kinds that count as significant PII outside a casual context
    pub fn is_significant(&self) -> bool {
        self.is_high_risk() || matches!(self, PiiKind::Email | PiiKind::Phone | PiiKind::IpAddress)
    }
}

/// One detected PII span, half-open `[start, end)` byte offsets into the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiiSpan {
    pub text: String,
    pub kind: PiiKind,
    pub start: usize,
    pub end: usize,
    /// Detector confidence in [0,1]
    pub score: f64,
}

/// One detected code block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeBlock {
    pub start: usize,
    pub end: usize,
    pub language: Option<String>,
    pub confidence: f64,
}

/// Summary of code detection over the whole query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeDetection {
    pub has_code: bool,
    pub language: Option<String>,
    pub confidence: f64,
    pub blocks: Vec<CodeBlock>,
}

/// One recognized named entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpan {
    pub text: String,
    pub label: String,
    pub start: usize,
    pub end: usize,
    pub score: f64,
}

/// Per-factor sensitivity contributions, each in [0,1]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SensitivityFactors {
    pub pii_factor: f64,
    pub code_factor: f64,
    pub entity_factor: f64,
    pub keyword_factor: f64,
}

impl SensitivityFactors {
    /// Weighted overall sensitivity: 0.35 pii + 0.25 code + 0.15 entity + 0.25 keyword
    pub fn overall(&self) -> f64 {
        let score = 0.35 * self.pii_factor
            + 0.25 * self.code_factor
            + 0.15 * self.entity_factor
            + 0.25 * self.keyword_factor;
        score.clamp(0.0, 1.0)
    }
}

/// Unified view over the three analyzers plus derived scores
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionReport {
    /// True only for significant PII (high-risk kinds, or person/location
    /// outside casual contexts)
    pub has_pii: bool,
    pub pii_spans: Vec<PiiSpan>,
    /// Covered chars / total chars over deduplicated PII spans, clamped to [0,1]
    pub pii_density: f64,
    pub code: CodeDetection,
    pub entities: Vec<EntitySpan>,
    pub factors: SensitivityFactors,
    pub sensitivity_score: f64,
    pub recommended_strategy: FragmentationStrategy,
    /// Escalation hint: the query warrants orchestration-model involvement
    pub requires_orchestrator: bool,
    pub analyzer_time_ms: f64,
}

impl DetectionReport {
    /// Empty report for a query with no findings
    pub fn empty() -> Self {
        Self {
            has_pii: false,
            pii_spans: Vec::new(),
            pii_density: 0.0,
            code: CodeDetection::default(),
            entities: Vec::new(),
            factors: SensitivityFactors::default(),
            sensitivity_score: 0.0,
            recommended_strategy: FragmentationStrategy::None,
            requires_orchestrator: false,
            analyzer_time_ms: 0.0,
        }
    }
}
