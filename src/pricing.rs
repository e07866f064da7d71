// Pricing and privacy weights for LLM providers
//
// Single source of truth for the per-provider numbers used across the
// pipeline: cost per 1k tokens, privacy score, reliability weight, and
// performance score. The intelligence layer, orchestrator, manager and
// aggregator all read from this table rather than carrying their own copies.

use crate::providers::models::ProviderId;

/// Static rating for one provider
#[derive(Debug, Clone, Copy)]
pub struct ProviderRates {
    /// USD per 1000 tokens (blended input/output estimate)
    pub cost_per_1k_tokens: f64,
    /// How strongly the provider is preferred for sensitive fragments [0,1]
    pub privacy_score: f64,
    /// Response-quality weight used by the weighted-ensemble aggregator [0,1]
    pub reliability_weight: f64,
    /// Throughput/quality score used by the cost optimizer [0,1]
    pub performance_score: f64,
}

/// Get the rate card for a provider
pub fn rates_for(provider: ProviderId) -> ProviderRates {
    match provider {
        ProviderId::OpenAi => ProviderRates {
            cost_per_1k_tokens: 0.03,
            privacy_score: 0.80,
            reliability_weight: 0.85,
            performance_score: 0.95,
        },
        ProviderId::Anthropic => ProviderRates {
            cost_per_1k_tokens: 0.025,
            privacy_score: 0.95,
            reliability_weight: 0.95,
            performance_score: 0.90,
        },
        ProviderId::Google => ProviderRates {
            cost_per_1k_tokens: 0.02,
            privacy_score: 0.70,
            reliability_weight: 0.75,
            performance_score: 0.85,
        },
    }
}

/// The provider preferred for sensitive fragments (highest privacy score)
pub fn privacy_preferred() -> ProviderId {
    ProviderId::Anthropic
}

/// The provider preferred for public, non-sensitive traffic (cheapest)
pub fn public_preferred() -> ProviderId {
    ProviderId::Google
}

/// Calculate cost in USD for the given token usage on a provider
pub fn calculate_cost(provider: ProviderId, tokens: u32) -> f64 {
    (tokens as f64 / 1000.0) * rates_for(provider).cost_per_1k_tokens
}

/// Privacy score for a fragment result, weighted by fragment sensitivity
///
/// Sensitive fragment types get a small bonus when they land on a
/// privacy-focused provider, capped at 1.0.
pub fn fragment_privacy_score(provider: ProviderId, sensitive_fragment: bool) -> f64 {
    let base = rates_for(provider).privacy_score;
    if sensitive_fragment {
        (base * 1.1).min(1.0)
    } else {
        base
    }
}

/// Cost comparison between fragmented routing and a single-provider baseline
#[derive(Debug, Clone, serde::Serialize)]
pub struct CostComparison {
    pub fragmented_cost: f64,
    pub single_provider_cost: f64,
    pub savings_percent: f64,
}

/// Compare the actual fragmented cost against sending the whole query to the
/// most expensive single provider
pub fn compare_costs(fragmented_cost: f64, total_tokens: u32) -> CostComparison {
    let single = calculate_cost(ProviderId::OpenAi, total_tokens);
    let savings_percent = if single > 0.0 {
        ((single - fragmented_cost) / single * 100.0).max(0.0)
    } else {
        0.0
    };
    CostComparison {
        fragmented_cost,
        single_provider_cost: single,
        savings_percent,
    }
}
