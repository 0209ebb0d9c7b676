//! Importance scoring and compaction planning for scratchpad results.
//!
//! Each result is scored on six weighted axes; the plan assigns tiers either
//! by count limits (default) or greedily against a token budget. A result
//! cited by any investigation note is never demoted below `compact`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use sleuth_core::config::CompactorConfig;
use sleuth_core::investigation::{
    EvidenceStrength, HypothesisId, InvestigationNote, NoteType,
};

use crate::scratchpad::StoredResult;
use crate::summarizer::HealthStatus;

/// Tier assignment for every scored result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompactionPlan {
    pub keep_full: Vec<String>,
    pub compact: Vec<String>,
    pub clear: Vec<String>,
}

/// Everything the scorer looks at.
pub struct CompactionInputs<'a> {
    pub results: &'a [StoredResult],
    pub notes: &'a [InvestigationNote],
    pub active_hypothesis_ids: &'a [HypothesisId],
    pub services_discovered: &'a [String],
    pub symptoms: &'a [String],
    pub query: &'a str,
}

/// A scored result, exposed for diagnostics.
#[derive(Debug, Clone)]
pub struct ScoredResult {
    pub result_id: String,
    pub score: f64,
}

pub struct ContextCompactor {
    config: CompactorConfig,
}

const ERROR_PROBE_KEYWORDS: &[&str] =
    &["error", "exception", "failed", "timeout", "refused", "5xx"];

impl ContextCompactor {
    pub fn new(config: CompactorConfig) -> Self {
        Self { config }
    }

    /// Score all results and produce a compaction plan.
    pub fn compact(&self, inputs: &CompactionInputs<'_>) -> CompactionPlan {
        let scored = self.score_all(inputs);
        let cited = cited_result_ids(inputs.notes);

        // Descending score; ties resolve to the earlier result. Sorting by
        // (score, reversed index) keeps the order deterministic.
        let mut order: Vec<usize> = (0..inputs.results.len()).collect();
        order.sort_by(|&a, &b| {
            scored[b]
                .score
                .partial_cmp(&scored[a].score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });

        let mut plan = match self.config.token_budget {
            Some(budget) => self.plan_by_budget(inputs, &scored, &order, budget),
            None => self.plan_by_count(inputs, &scored, &order),
        };

        // Cited results never drop below compact.
        let rescued: Vec<String> = plan
            .clear
            .iter()
            .filter(|id| cited.contains(id.as_str()))
            .cloned()
            .collect();
        plan.clear.retain(|id| !cited.contains(id.as_str()));
        plan.compact.extend(rescued);

        tracing::debug!(
            full = plan.keep_full.len(),
            compact = plan.compact.len(),
            cleared = plan.clear.len(),
            "compaction plan produced"
        );
        plan
    }

    fn plan_by_count(
        &self,
        inputs: &CompactionInputs<'_>,
        scored: &[ScoredResult],
        order: &[usize],
    ) -> CompactionPlan {
        let mut plan = CompactionPlan::default();
        for &idx in order {
            let id = inputs.results[idx].result_id.clone();
            let score = scored[idx].score;
            if plan.keep_full.len() < self.config.max_full_results
                && score >= self.config.min_score_for_full
            {
                plan.keep_full.push(id);
            } else if plan.compact.len() < self.config.max_compact_results
                && score >= self.config.min_score_to_keep
            {
                plan.compact.push(id);
            } else {
                plan.clear.push(id);
            }
        }
        plan
    }

    fn plan_by_budget(
        &self,
        inputs: &CompactionInputs<'_>,
        _scored: &[ScoredResult],
        order: &[usize],
        budget: usize,
    ) -> CompactionPlan {
        let mut plan = CompactionPlan::default();
        let mut spent = 0usize;
        for &idx in order {
            let result = &inputs.results[idx];
            let full_cost = full_token_cost(result);
            let compact_cost = compact_token_cost(result);
            if spent + full_cost <= budget {
                spent += full_cost;
                plan.keep_full.push(result.result_id.clone());
            } else if spent + compact_cost <= budget {
                spent += compact_cost;
                plan.compact.push(result.result_id.clone());
            } else {
                plan.clear.push(result.result_id.clone());
            }
        }
        plan
    }

    /// Score every result in append order.
    pub fn score_all(&self, inputs: &CompactionInputs<'_>) -> Vec<ScoredResult> {
        let total = inputs.results.len();
        inputs
            .results
            .iter()
            .enumerate()
            .map(|(idx, result)| ScoredResult {
                result_id: result.result_id.clone(),
                score: self.score(idx, total, result, inputs),
            })
            .collect()
    }

    fn score(
        &self,
        idx: usize,
        total: usize,
        result: &StoredResult,
        inputs: &CompactionInputs<'_>,
    ) -> f64 {
        let w = &self.config.weights;
        w.recency * recency_score(idx, total)
            + w.query_relevance * query_relevance_score(result, inputs.query)
            + w.error_signals * error_signal_score(result)
            + w.hypothesis_relevance * hypothesis_relevance_score(result, inputs)
            + w.service_relevance * service_relevance_score(result, inputs.services_discovered)
            + w.cited_in_notes * cited_score(result, inputs.notes)
    }
}

/// Linear from 0.1 (oldest) to 1.0 (newest).
fn recency_score(idx: usize, total: usize) -> f64 {
    if total <= 1 {
        return 1.0;
    }
    0.1 + 0.9 * (idx as f64 / (total - 1) as f64)
}

/// Fraction of query tokens (length > 2) appearing in the serialized call.
fn query_relevance_score(result: &StoredResult, query: &str) -> f64 {
    let tokens: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .filter(|t| t.len() > 2)
        .map(str::to_string)
        .collect();
    if tokens.is_empty() {
        return 0.0;
    }
    let haystack = format!("{} {}", result.args, result.result).to_lowercase();
    let hits = tokens.iter().filter(|t| haystack.contains(t.as_str())).count();
    hits as f64 / tokens.len() as f64
}

fn error_signal_score(result: &StoredResult) -> f64 {
    if result.summary.has_errors || result.summary.health_status == HealthStatus::Critical {
        return 1.0;
    }
    if result.summary.health_status == HealthStatus::Degraded {
        return 0.7;
    }
    let serialized = result.result.to_string().to_lowercase();
    let hits = ERROR_PROBE_KEYWORDS
        .iter()
        .filter(|kw| serialized.contains(*kw))
        .count();
    (hits as f64 * 0.25).min(1.0)
}

/// 1.0 for strong evidence on an active hypothesis citing this result, 0.7
/// for weak; 0.5 when the call matches an identified symptom prefix.
fn hypothesis_relevance_score(result: &StoredResult, inputs: &CompactionInputs<'_>) -> f64 {
    let active: HashSet<&HypothesisId> = inputs.active_hypothesis_ids.iter().collect();
    let mut best: f64 = 0.0;

    for note in inputs.notes {
        if note.note_type != NoteType::Evidence {
            continue;
        }
        let Some(hypothesis_id) = note.hypothesis_id.as_ref() else {
            continue;
        };
        if !active.contains(hypothesis_id) {
            continue;
        }
        if !note
            .source_result_ids
            .iter()
            .any(|id| id == &result.result_id)
        {
            continue;
        }
        match note.evidence_strength {
            Some(EvidenceStrength::Strong) => best = best.max(1.0),
            Some(EvidenceStrength::Weak) => best = best.max(0.7),
            _ => {}
        }
    }

    if best > 0.0 {
        return best;
    }

    let call = result.args.to_string().to_lowercase();
    let matches_symptom = inputs.symptoms.iter().any(|symptom| {
        let prefix: String = symptom.to_lowercase().chars().take(12).collect();
        !prefix.is_empty() && call.contains(&prefix)
    });
    if matches_symptom {
        0.5
    } else {
        0.0
    }
}

/// 1.0 on direct summary match, 0.8 on a textual match.
fn service_relevance_score(result: &StoredResult, services: &[String]) -> f64 {
    if services.is_empty() {
        return 0.0;
    }
    if result
        .summary
        .services
        .iter()
        .any(|s| services.contains(s))
    {
        return 1.0;
    }
    let serialized = format!("{} {}", result.args, result.result).to_lowercase();
    if services
        .iter()
        .any(|s| serialized.contains(&s.to_lowercase()))
    {
        return 0.8;
    }
    0.0
}

fn cited_score(result: &StoredResult, notes: &[InvestigationNote]) -> f64 {
    let cited = notes
        .iter()
        .any(|note| note.source_result_ids.iter().any(|id| id == &result.result_id));
    if cited {
        1.0
    } else {
        0.0
    }
}

fn cited_result_ids(notes: &[InvestigationNote]) -> HashSet<&str> {
    notes
        .iter()
        .flat_map(|note| note.source_result_ids.iter().map(String::as_str))
        .collect()
}

fn full_token_cost(result: &StoredResult) -> usize {
    (result.args.to_string().len() + result.result.to_string().len()) / 4 + 8
}

fn compact_token_cost(result: &StoredResult) -> usize {
    result.summary.short_text.len() / 4 + 8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::summarizer::summarize;

    fn stored(result_id: &str, args: serde_json::Value, result: serde_json::Value) -> StoredResult {
        let summary = summarize(result_id, "test_tool", &args, &result);
        StoredResult {
            result_id: result_id.to_string(),
            tool: "test_tool".to_string(),
            args,
            result,
            duration_ms: 1,
            timestamp: Utc::now(),
            summary,
        }
    }

    fn plain_results(n: usize) -> Vec<StoredResult> {
        (0..n)
            .map(|i| {
                stored(
                    &format!("r{}", i + 1),
                    serde_json::json!({"call": i}),
                    serde_json::json!({"ok": i}),
                )
            })
            .collect()
    }

    fn inputs<'a>(
        results: &'a [StoredResult],
        notes: &'a [InvestigationNote],
        active: &'a [HypothesisId],
    ) -> CompactionInputs<'a> {
        CompactionInputs {
            results,
            notes,
            active_hypothesis_ids: active,
            services_discovered: &[],
            symptoms: &[],
            query: "",
        }
    }

    #[test]
    fn cited_strong_evidence_survives_in_full() {
        let results = plain_results(12);
        let h1 = Uuid::new_v4();
        let note = InvestigationNote::new(NoteType::Evidence, "r1 shows the spike", 1)
            .with_strength(EvidenceStrength::Strong)
            .with_sources(vec!["r1".into()])
            .for_hypothesis(h1);
        let notes = vec![note];
        let active = vec![h1];

        let compactor = ContextCompactor::new(CompactorConfig {
            max_full_results: 3,
            max_compact_results: 3,
            min_score_for_full: 0.0,
            min_score_to_keep: 0.0,
            ..CompactorConfig::balanced()
        });
        let plan = compactor.compact(&inputs(&results, &notes, &active));

        assert!(
            plan.keep_full.iter().any(|id| id == "r1"),
            "cited result must stay full, plan: {plan:?}"
        );
        assert_eq!(plan.keep_full.len(), 3);
        assert_eq!(plan.compact.len(), 3);
        assert_eq!(plan.clear.len(), 6);
    }

    #[test]
    fn cited_results_are_never_cleared() {
        let results = plain_results(10);
        // Cite the oldest result with a weak note tied to no hypothesis: the
        // score stays low, but the citation guard still applies.
        let note = InvestigationNote::new(NoteType::Symptom, "see r1", 1)
            .with_sources(vec!["r1".into()]);
        let notes = vec![note];

        let compactor = ContextCompactor::new(CompactorConfig {
            max_full_results: 1,
            max_compact_results: 1,
            min_score_for_full: 0.0,
            min_score_to_keep: 0.0,
            ..CompactorConfig::balanced()
        });
        let plan = compactor.compact(&inputs(&results, &notes, &[]));

        assert!(!plan.clear.iter().any(|id| id == "r1"));
        assert!(plan.compact.iter().any(|id| id == "r1"));
    }

    #[test]
    fn equal_scores_keep_append_order() {
        let results = plain_results(4);
        let compactor = ContextCompactor::new(CompactorConfig {
            weights: sleuth_core::config::CompactorWeights {
                recency: 0.0,
                query_relevance: 1.0,
                error_signals: 0.0,
                hypothesis_relevance: 0.0,
                service_relevance: 0.0,
                cited_in_notes: 0.0,
            },
            max_full_results: 2,
            max_compact_results: 2,
            min_score_for_full: 0.0,
            min_score_to_keep: 0.0,
            ..CompactorConfig::balanced()
        });
        // All query-relevance scores are 0 (empty query): ties everywhere.
        let plan = compactor.compact(&inputs(&results, &[], &[]));
        assert_eq!(plan.keep_full, vec!["r1", "r2"]);
        assert_eq!(plan.compact, vec!["r3", "r4"]);
    }

    #[test]
    fn error_results_outrank_clean_ones() {
        let results = vec![
            stored(
                "clean",
                serde_json::json!({}),
                serde_json::json!({"items": [1, 2]}),
            ),
            stored(
                "erroring",
                serde_json::json!({}),
                serde_json::json!({"error": "connection refused"}),
            ),
        ];
        let compactor = ContextCompactor::new(CompactorConfig::incident());
        let scored = compactor.score_all(&inputs(&results, &[], &[]));
        assert!(scored[1].score > scored[0].score);
    }

    #[test]
    fn budget_mode_respects_the_token_budget() {
        let results: Vec<StoredResult> = (0..6)
            .map(|i| {
                stored(
                    &format!("r{i}"),
                    serde_json::json!({}),
                    serde_json::json!({ "payload": "x".repeat(400) }),
                )
            })
            .collect();
        let compactor = ContextCompactor::new(CompactorConfig {
            token_budget: Some(260),
            ..CompactorConfig::balanced()
        });
        let plan = compactor.compact(&inputs(&results, &[], &[]));

        // Each full result costs ~110 tokens: only two fit in full.
        assert!(plan.keep_full.len() < results.len());
        assert!(!plan.keep_full.is_empty());
        assert_eq!(
            plan.keep_full.len() + plan.compact.len() + plan.clear.len(),
            6
        );
    }

    #[test]
    fn query_relevance_counts_token_fraction() {
        let result = stored(
            "r1",
            serde_json::json!({"service": "payments-api"}),
            serde_json::json!({"note": "latency elevated"}),
        );
        let score = query_relevance_score(&result, "payments-api latency errors");
        assert!((score - 2.0 / 3.0).abs() < 1e-9);
    }
}
