// SPDX-License-Identifier: AGPL-3.0

//! Final session artifact: merged parameter summaries, expression rules,
//! and run statistics.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use warden_types::{ConstraintRule, ExpressionRule, ParamConstraint, Parameter, Value};

use crate::workers::ValidResult;

/// Statistics block of the report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportStatistics {
    pub total_tested: u32,
    pub valid: u32,
    pub failed: u32,
    pub avg_similarity: f64,
    pub max_similarity: f64,
    pub min_similarity: f64,
    pub execution_time_ms: u64,
}

/// One of the highest-similarity variants, with serializable values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopResult {
    pub similarity: f64,
    pub gas_used: u64,
    pub values: Vec<Value>,
}

/// A variant whose ordered overlap with the baseline stayed high even
/// though Dice similarity fell below the validity threshold. Exported for
/// off-band review; never fed to the collector or pushed on-chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateResult {
    pub overlap: f64,
    pub gas_used: u64,
    pub values: Vec<Value>,
}

/// The session's emitted artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackParameterReport {
    pub contract: String,
    /// `0x` + 8 hex.
    pub selector: String,
    pub tx_hash: String,
    pub block_number: u64,
    /// Unix seconds.
    pub generated_at: u64,
    pub valid_parameters: Vec<ParamConstraint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expression_rules: Vec<ExpressionRule>,
    pub statistics: ReportStatistics,
    pub top_results: Vec<TopResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidate_results: Vec<CandidateResult>,
    pub has_invariant_check: bool,
    pub violation_count: usize,
}

impl AttackParameterReport {
    /// Pretty JSON, the form the artifact is shipped in.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Merge per-parameter summaries: the collector's constraints when a rule
/// exists, otherwise a plain summary of observed values per index with
/// address indices omitted.
pub fn merge_parameter_summaries(
    rule: Option<&ConstraintRule>,
    params: &[Parameter],
    results: &[ValidResult],
) -> Vec<ParamConstraint> {
    if let Some(rule) = rule {
        return rule.param_constraints.clone();
    }

    let mut observed: BTreeMap<u32, BTreeSet<String>> = BTreeMap::new();
    for result in results {
        for (param, value) in params.iter().zip(&result.values) {
            if param.ty.is_address() {
                continue;
            }
            observed
                .entry(param.index)
                .or_default()
                .insert(value.canonical_string());
        }
    }

    observed
        .into_iter()
        .map(|(index, values)| {
            let ty = params
                .iter()
                .find(|p| p.index == index)
                .map(|p| p.ty.to_string())
                .unwrap_or_default();
            ParamConstraint {
                index,
                ty,
                is_range: false,
                range_min_hex: String::new(),
                range_max_hex: String::new(),
                values: values.into_iter().collect(),
            }
        })
        .collect()
}

/// Top-similarity results, descending, truncated to `cap`.
pub fn top_results(results: &[ValidResult], cap: usize) -> Vec<TopResult> {
    let mut sorted: Vec<&ValidResult> = results.iter().collect();
    sorted.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    sorted
        .into_iter()
        .take(cap)
        .map(|r| TopResult {
            similarity: r.similarity,
            gas_used: r.gas_used,
            values: r.values.clone(),
        })
        .collect()
}

/// Off-band candidates, highest overlap first, truncated to `cap`.
pub fn top_candidates(candidates: &[CandidateResult], cap: usize) -> Vec<CandidateResult> {
    let mut sorted: Vec<&CandidateResult> = candidates.iter().collect();
    sorted.sort_by(|a, b| b.overlap.total_cmp(&a.overlap));
    sorted.into_iter().take(cap).cloned().collect()
}

/// Similarity statistics over valid results.
pub fn similarity_stats(results: &[ValidResult]) -> (f64, f64, f64) {
    if results.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let mut min = f64::MAX;
    let mut max = f64::MIN;
    let mut sum = 0.0;
    for r in results {
        min = min.min(r.similarity);
        max = max.max(r.similarity);
        sum += r.similarity;
    }
    (sum / results.len() as f64, max, min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;
    use warden_types::SolType;

    fn result(value: u64, similarity: f64) -> ValidResult {
        ValidResult {
            values: vec![Value::Int(BigInt::from(value))],
            similarity,
            gas_used: 21_000,
            violations: 0,
        }
    }

    #[test]
    fn test_top_results_sorted_and_capped() {
        let results = vec![result(1, 0.5), result(2, 0.9), result(3, 0.7)];
        let top = top_results(&results, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].similarity, 0.9);
        assert_eq!(top[1].similarity, 0.7);
    }

    #[test]
    fn test_top_candidates_sorted_and_capped() {
        let candidate = |overlap: f64| CandidateResult {
            overlap,
            gas_used: 21_000,
            values: vec![Value::Int(BigInt::from(1))],
        };
        let candidates = vec![candidate(0.6), candidate(0.95), candidate(0.8)];
        let top = top_candidates(&candidates, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].overlap, 0.95);
        assert_eq!(top[1].overlap, 0.8);
    }

    #[test]
    fn test_similarity_stats() {
        let results = vec![result(1, 0.5), result(2, 0.9)];
        let (avg, max, min) = similarity_stats(&results);
        assert!((avg - 0.7).abs() < 1e-9);
        assert_eq!(max, 0.9);
        assert_eq!(min, 0.5);
        assert_eq!(similarity_stats(&[]), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_summaries_prefer_rule_constraints() {
        let rule = ConstraintRule {
            contract: "0xaa".to_string(),
            selector: "0x11223344".to_string(),
            sample_count: 3,
            param_constraints: vec![ParamConstraint {
                index: 0,
                ty: "uint256".to_string(),
                is_range: true,
                range_min_hex: "0x1".to_string(),
                range_max_hex: "0x9".to_string(),
                values: vec![],
            }],
            state_constraints: vec![],
            similarity_trigger: 0.8,
            generated_at: 0,
        };
        let params = vec![Parameter::new(
            0,
            SolType::Uint(256),
            Value::Int(BigInt::from(5)),
        )];
        let summaries = merge_parameter_summaries(Some(&rule), &params, &[result(5, 0.9)]);
        assert_eq!(summaries, rule.param_constraints);
    }

    #[test]
    fn test_report_serializes_to_json() {
        let report = AttackParameterReport {
            contract: "0x00000000000000000000000000000000000000aa".to_string(),
            selector: "0x2e1a7d4d".to_string(),
            tx_hash: "0xdead".to_string(),
            block_number: 123,
            generated_at: 1_750_000_000,
            valid_parameters: vec![],
            expression_rules: vec![],
            statistics: ReportStatistics::default(),
            top_results: vec![TopResult {
                similarity: 1.0,
                gas_used: 21_000,
                values: vec![Value::Int(BigInt::from(100))],
            }],
            candidate_results: vec![],
            has_invariant_check: false,
            violation_count: 0,
        };
        let json = report.to_json().unwrap();
        assert!(json.contains("\"selector\": \"0x2e1a7d4d\""));
        assert!(json.contains("\"100\""));
    }

    #[test]
    fn test_summaries_omit_address_indices() {
        let params = vec![
            Parameter::new(
                0,
                SolType::Address,
                Value::Address(alloy_primitives::Address::repeat_byte(1)),
            ),
            Parameter::new(1, SolType::Uint(256), Value::Int(BigInt::from(5))),
        ];
        let results = vec![ValidResult {
            values: vec![
                Value::Address(alloy_primitives::Address::repeat_byte(1)),
                Value::Int(BigInt::from(42)),
            ],
            similarity: 0.9,
            gas_used: 0,
            violations: 0,
        }];
        let summaries = merge_parameter_summaries(None, &params, &results);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].index, 1);
        assert_eq!(summaries[0].values, vec!["42"]);
    }
}
