// Intelligence layer - three advisers emitting tagged decisions
//
// Each adviser is a pure function over the request, detection report,
// fragments and (for the monitor) fragment results. Advisers never mutate
// pipeline state; the orchestrator consults them and may override. All
// numeric provider weights come from the pricing table.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::json;

use crate::detection::models::DetectionReport;
use crate::fragmentation::models::{Fragment, FragmentType};
use crate::orchestrator::models::{FragmentResult, OrchestrationRequest, PrivacyLevel};
use crate::pricing;
use crate::providers::models::ProviderId;
use crate::tokens;

/// A tagged recommendation from one adviser
#[derive(Debug, Clone, Serialize)]
pub struct IntelligenceDecision {
    pub component: &'static str,
    pub decision_type: &'static str,
    pub recommendation: String,
    pub confidence: f64,
    pub reasoning: String,
    pub metadata: serde_json::Value,
}

// ─────────────────────────────────────────────────────────────────────────────
// Privacy router
// ─────────────────────────────────────────────────────────────────────────────

pub struct PrivacyRouter;

impl PrivacyRouter {
    /// Overall assessment, one routing recommendation per fragment, and a
    /// compliance hint when high-risk content appears
    pub fn analyze(
        request: &OrchestrationRequest,
        detection: &DetectionReport,
        fragments: &[Fragment],
    ) -> Vec<IntelligenceDecision> {
        let mut decisions = Vec::with_capacity(fragments.len() + 2);
        decisions.push(Self::assess_privacy(request, detection, fragments));
        for fragment in fragments {
            decisions.push(Self::route_fragment(fragment, request.privacy_level));
        }
        decisions.push(Self::check_compliance(detection));
        decisions
    }

    fn assess_privacy(
        request: &OrchestrationRequest,
        detection: &DetectionReport,
        fragments: &[Fragment],
    ) -> IntelligenceDecision {
        let mut score = 0.0;
        let mut factors = Vec::new();

        if detection.has_pii {
            score += (detection.pii_spans.len() as f64 * 0.2).min(1.0);
            factors.push(format!("PII detected ({} spans)", detection.pii_spans.len()));
        }
        if detection.code.has_code {
            score += detection.code.confidence * 0.3;
            factors.push(format!(
                "code detected (confidence {:.2})",
                detection.code.confidence
            ));
        }
        score += request.privacy_level.score();
        factors.push(format!("user privacy level {:?}", request.privacy_level));

        let sensitive = fragments.iter().filter(|f| f.contains_sensitive_data).count();
        if sensitive > 0 && !fragments.is_empty() {
            score += (sensitive as f64 / fragments.len() as f64) * 0.3;
            factors.push(format!("sensitive fragments {sensitive}/{}", fragments.len()));
        }

        let score = (score / 2.0).min(1.0);

        let recommendation = if score >= 0.8 {
            "require_top_tier_privacy_providers"
        } else if score >= 0.6 {
            "prefer_privacy_focused_providers"
        } else if score >= 0.4 {
            "use_standard_privacy_measures"
        } else {
            "standard_routing_acceptable"
        };

        IntelligenceDecision {
            component: "privacy_router",
            decision_type: "privacy_assessment",
            recommendation: recommendation.to_string(),
            confidence: 0.9,
            reasoning: format!("privacy score {score:.2}; factors: {}", factors.join(", ")),
            metadata: json!({ "privacy_score": score, "factors": factors }),
        }
    }

    /// Sensitivity of one fragment from its type plus the sensitive flag
    pub fn fragment_sensitivity(fragment: &Fragment) -> f64 {
        let type_score: f64 = match fragment.fragment_type {
            FragmentType::Pii => 0.8,
            FragmentType::Code => 0.7,
            FragmentType::Semantic => 0.3,
            FragmentType::General => 0.1,
        };
        let flag_bonus = if fragment.contains_sensitive_data { 0.2 } else { 0.0 };
        (type_score + flag_bonus).min(1.0)
    }

    /// Providers acceptable for one fragment given its sensitivity and the
    /// user's declared level
    pub fn providers_for(sensitivity: f64, level: PrivacyLevel) -> Vec<ProviderId> {
        if sensitivity >= 0.8 || level >= PrivacyLevel::Restricted {
            vec![pricing::privacy_preferred()]
        } else if sensitivity >= 0.5 || level == PrivacyLevel::Confidential {
            vec![ProviderId::Anthropic, ProviderId::OpenAi]
        } else {
            ProviderId::ALL.to_vec()
        }
    }

    fn route_fragment(fragment: &Fragment, level: PrivacyLevel) -> IntelligenceDecision {
        let sensitivity = Self::fragment_sensitivity(fragment);
        let providers = Self::providers_for(sensitivity, level);

        let reasoning = if sensitivity >= 0.8 || level >= PrivacyLevel::Restricted {
            "high sensitivity: privacy-focused providers only"
        } else if sensitivity >= 0.5 || level == PrivacyLevel::Confidential {
            "medium sensitivity: preferring privacy-focused providers"
        } else {
            "low sensitivity: all providers acceptable"
        };

        let names: Vec<&str> = providers.iter().map(|p| p.as_str()).collect();
        IntelligenceDecision {
            component: "privacy_router",
            decision_type: "provider_routing",
            recommendation: format!("route_to_{}", names.join(",")),
            confidence: 0.85,
            reasoning: reasoning.to_string(),
            metadata: json!({
                "fragment_id": fragment.fragment_id,
                "sensitivity_score": sensitivity,
                "recommended_providers": providers,
            }),
        }
    }

    fn check_compliance(detection: &DetectionReport) -> IntelligenceDecision {
        let mut issues = Vec::new();

        for span in &detection.pii_spans {
            if span.kind.is_high_risk() {
                issues.push(format!("high-risk PII detected: {:?}", span.kind));
            }
        }
        if detection.code.has_code && detection.code.confidence > 0.8 {
            issues.push("high-confidence proprietary code detected".to_string());
        }

        let (recommendation, confidence, reasoning) = if issues.is_empty() {
            (
                "standard_compliance_sufficient",
                0.8,
                "no specific compliance issues detected".to_string(),
            )
        } else {
            (
                "enforce_strict_compliance_measures",
                0.95,
                format!("compliance issues: {}", issues.join(", ")),
            )
        };

        IntelligenceDecision {
            component: "privacy_router",
            decision_type: "compliance_check",
            recommendation: recommendation.to_string(),
            confidence,
            reasoning,
            metadata: json!({ "compliance_issues": issues }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cost optimizer
// ─────────────────────────────────────────────────────────────────────────────

/// Budget limits consulted by the cost optimizer
#[derive(Debug, Clone, Copy)]
pub struct CostBudget {
    pub max_cost_per_fragment: f64,
    pub max_total_cost: f64,
}

impl Default for CostBudget {
    fn default() -> Self {
        Self {
            max_cost_per_fragment: 0.1,
            max_total_cost: 1.0,
        }
    }
}

pub struct CostOptimizer;

impl CostOptimizer {
    /// Per-fragment provider selection by cost-performance ratio plus one
    /// overall budget-compliance decision
    pub fn optimize(
        fragments: &[Fragment],
        available: &[ProviderId],
        budget: CostBudget,
    ) -> Vec<IntelligenceDecision> {
        let mut decisions = Vec::with_capacity(fragments.len() + 1);
        let mut total_cost = 0.0;

        for fragment in fragments {
            let estimated_tokens = tokens::estimate_tokens(&fragment.content) + 10;

            let mut options: Vec<(ProviderId, f64, f64, f64)> = available
                .iter()
                .map(|provider| {
                    let rates = pricing::rates_for(*provider);
                    let cost = pricing::calculate_cost(*provider, estimated_tokens);
                    let ratio = cost / rates.performance_score.max(0.1);
                    (*provider, cost, rates.performance_score, ratio)
                })
                .collect();
            options.sort_by(|a, b| a.3.total_cmp(&b.3));

            let decision = match options.first() {
                Some((provider, cost, performance, _)) => {
                    total_cost += cost;
                    let within_budget = *cost <= budget.max_cost_per_fragment;
                    IntelligenceDecision {
                        component: "cost_optimizer",
                        decision_type: "provider_selection",
                        recommendation: if within_budget {
                            format!("use_provider_{provider}")
                        } else {
                            format!("use_provider_{provider}_budget_exceeded")
                        },
                        confidence: if within_budget { 0.9 } else { 0.6 },
                        reasoning: format!(
                            "best cost-performance: ${cost:.4} at performance {performance:.2}"
                        ),
                        metadata: json!({
                            "fragment_id": fragment.fragment_id,
                            "selected_provider": provider,
                            "cost_estimate": cost,
                            "estimated_tokens": estimated_tokens,
                            "alternatives": options
                                .iter()
                                .skip(1)
                                .take(2)
                                .map(|(p, ..)| *p)
                                .collect::<Vec<_>>(),
                        }),
                    }
                }
                None => IntelligenceDecision {
                    component: "cost_optimizer",
                    decision_type: "provider_selection",
                    recommendation: "no_providers_available".to_string(),
                    confidence: 0.0,
                    reasoning: "no providers available for cost optimization".to_string(),
                    metadata: json!({ "fragment_id": fragment.fragment_id }),
                },
            };
            decisions.push(decision);
        }

        let compliant = total_cost <= budget.max_total_cost;
        decisions.push(IntelligenceDecision {
            component: "cost_optimizer",
            decision_type: "budget_compliance",
            recommendation: if compliant {
                "budget_compliant".to_string()
            } else {
                "budget_exceeded_optimization_needed".to_string()
            },
            confidence: if compliant { 0.9 } else { 0.8 },
            reasoning: format!(
                "total estimated cost ${total_cost:.4} vs budget ${:.4}",
                budget.max_total_cost
            ),
            metadata: json!({
                "total_estimated_cost": total_cost,
                "budget_limit": budget.max_total_cost,
            }),
        });

        decisions
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Performance monitor
// ─────────────────────────────────────────────────────────────────────────────

const MAX_LATENCY_MS: f64 = 30_000.0;
const MIN_SUCCESS_RATE: f64 = 0.95;
const SLOW_FRAGMENT_MS: f64 = 10_000.0;
const HISTORY_LIMIT: usize = 100;

/// Post-hoc performance analysis with a bounded rolling history
pub struct PerformanceMonitor {
    history: Mutex<std::collections::VecDeque<(String, f64)>>,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(std::collections::VecDeque::with_capacity(HISTORY_LIMIT)),
        }
    }

    pub fn monitor(
        &self,
        request_id: &str,
        results: &[FragmentResult],
        total_time_ms: f64,
    ) -> Vec<IntelligenceDecision> {
        let mut decisions = Vec::new();
        decisions.push(Self::overall(results, total_time_ms));
        decisions.extend(Self::per_provider(results));
        decisions.push(Self::bottlenecks(results, total_time_ms));

        if let Ok(mut history) = self.history.lock() {
            if history.len() >= HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back((request_id.to_string(), total_time_ms));
        }

        decisions
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().map(|h| h.len()).unwrap_or(0)
    }

    fn success_rate(results: &[FragmentResult]) -> f64 {
        if results.is_empty() {
            return 0.0;
        }
        let ok = results
            .iter()
            .filter(|r| matches!(r.response.finish_reason.as_str(), "stop" | "end_turn" | "STOP"))
            .count();
        ok as f64 / results.len() as f64
    }

    fn overall(results: &[FragmentResult], total_time_ms: f64) -> IntelligenceDecision {
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();

        if total_time_ms > MAX_LATENCY_MS {
            issues.push(format!("high latency: {total_time_ms:.0}ms"));
            recommendations.push("consider_fragment_reduction");
        }
        let success_rate = Self::success_rate(results);
        if success_rate < MIN_SUCCESS_RATE {
            issues.push(format!("low success rate: {:.0}%", success_rate * 100.0));
            recommendations.push("review_provider_selection");
        }
        let avg_fragment = total_time_ms / results.len().max(1) as f64;
        if avg_fragment > SLOW_FRAGMENT_MS {
            issues.push(format!("slow fragment processing: {avg_fragment:.0}ms avg"));
            recommendations.push("optimize_fragmentation_strategy");
        }

        let (recommendation, confidence, reasoning) = if issues.is_empty() {
            (
                "performance_acceptable".to_string(),
                0.9,
                format!(
                    "good performance: {total_time_ms:.0}ms total, {:.0}% success",
                    success_rate * 100.0
                ),
            )
        } else {
            (
                recommendations.join(";"),
                0.85,
                format!("performance issues: {}", issues.join(", ")),
            )
        };

        IntelligenceDecision {
            component: "performance_monitor",
            decision_type: "overall_performance",
            recommendation,
            confidence,
            reasoning,
            metadata: json!({
                "total_time_ms": total_time_ms,
                "success_rate": success_rate,
                "fragment_count": results.len(),
                "avg_fragment_time_ms": avg_fragment,
            }),
        }
    }

    fn per_provider(results: &[FragmentResult]) -> Vec<IntelligenceDecision> {
        let mut stats: HashMap<ProviderId, Vec<f64>> = HashMap::new();
        for result in results {
            stats.entry(result.provider).or_default().push(result.latency_ms);
        }

        let mut providers: Vec<_> = stats.into_iter().collect();
        providers.sort_by_key(|(p, _)| p.as_str());

        providers
            .into_iter()
            .map(|(provider, times)| {
                let avg = times.iter().sum::<f64>() / times.len() as f64;
                let (recommendation, reasoning) = if avg > 15_000.0 {
                    (
                        format!("provider_{provider}_slow"),
                        format!("provider {provider} average time {avg:.0}ms"),
                    )
                } else {
                    (
                        format!("provider_{provider}_performing_well"),
                        format!("provider {provider}: {avg:.0}ms avg over {} calls", times.len()),
                    )
                };
                IntelligenceDecision {
                    component: "performance_monitor",
                    decision_type: "provider_performance",
                    recommendation,
                    confidence: 0.85,
                    reasoning,
                    metadata: json!({
                        "provider": provider,
                        "avg_time_ms": avg,
                        "request_count": times.len(),
                    }),
                }
            })
            .collect()
    }

    fn bottlenecks(results: &[FragmentResult], total_time_ms: f64) -> IntelligenceDecision {
        let mut bottlenecks = Vec::new();

        let times: Vec<f64> = results.iter().map(|r| r.latency_ms).collect();
        if !times.is_empty() {
            let max = times.iter().cloned().fold(f64::MIN, f64::max);
            let mean = times.iter().sum::<f64>() / times.len() as f64;
            if max > mean * 2.0 && times.len() > 1 {
                bottlenecks.push(format!("slowest fragment {max:.0}ms vs mean {mean:.0}ms"));
            }
        }

        // Load imbalance across providers
        let mut counts: HashMap<ProviderId, usize> = HashMap::new();
        for result in results {
            *counts.entry(result.provider).or_default() += 1;
        }
        if counts.len() > 1 {
            let max_load = counts.values().max().copied().unwrap_or(0);
            let min_load = counts.values().min().copied().unwrap_or(0);
            if min_load > 0 && max_load as f64 / min_load as f64 > 2.0 {
                bottlenecks.push(format!("load imbalance {max_load}:{min_load}"));
            }
        }

        let (recommendation, reasoning) = if bottlenecks.is_empty() {
            (
                "no_bottlenecks_detected".to_string(),
                format!("balanced execution in {total_time_ms:.0}ms"),
            )
        } else {
            (
                "rebalance_fragment_distribution".to_string(),
                format!("bottlenecks: {}", bottlenecks.join(", ")),
            )
        };

        IntelligenceDecision {
            component: "performance_monitor",
            decision_type: "bottleneck_analysis",
            recommendation,
            confidence: 0.8,
            reasoning,
            metadata: json!({ "bottlenecks": bottlenecks }),
        }
    }
}
