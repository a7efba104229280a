// SPDX-License-Identifier: AGPL-3.0

//! Iterative fuzzing coordination: digest a round's results into
//! per-parameter feedback, detect high-similarity zones, and decide when
//! the loop has converged.

use num_bigint::BigInt;
use std::collections::HashMap;
use warden_config::{AdaptiveConfig, UNLIMITED_ITERATION_CAP};
use warden_seeds::{SimilarityFeedback, ValueRange};
use warden_types::hexnum::parse_bigint;
use warden_types::{Parameter, Value};

/// One variant run as seen by the feedback analysis.
#[derive(Debug, Clone)]
pub struct RunObservation {
    pub values: Vec<Value>,
    pub similarity: f64,
}

/// Digest all results so far into per-parameter feedback.
pub fn analyze_feedback(
    results: &[RunObservation],
    params: &[Parameter],
    config: &AdaptiveConfig,
) -> Vec<SimilarityFeedback> {
    params
        .iter()
        .enumerate()
        .map(|(pos, param)| {
            // Last write wins when the same value was tried repeatedly.
            let mut value_similarities: HashMap<String, f64> = HashMap::new();
            for run in results {
                if let Some(value) = run.values.get(pos) {
                    value_similarities.insert(value.canonical_string(), run.similarity);
                }
            }

            let avg_similarity = if value_similarities.is_empty() {
                0.0
            } else {
                value_similarities.values().sum::<f64>() / value_similarities.len() as f64
            };

            let high_similarity_zones = if param.ty.is_numeric() {
                detect_zones(&value_similarities, config)
            } else {
                Vec::new()
            };

            SimilarityFeedback {
                param_index: param.index,
                avg_similarity,
                value_similarities,
                high_similarity_zones,
            }
        })
        .collect()
}

/// Merge sorted high-similarity values into contiguous ranges. Two
/// neighbors join one zone when their gap is within
/// `max(zone_gap_percent * prev_max, zone_gap_absolute)`.
fn detect_zones(
    value_similarities: &HashMap<String, f64>,
    config: &AdaptiveConfig,
) -> Vec<ValueRange> {
    let mut hot: Vec<BigInt> = value_similarities
        .iter()
        .filter(|(_, &sim)| sim > config.zone_threshold)
        .filter_map(|(value, _)| parse_bigint(value))
        .collect();
    hot.sort();
    hot.dedup();
    if hot.is_empty() {
        return Vec::new();
    }

    let gap_absolute = BigInt::from(config.zone_gap_absolute);
    let mut zones = Vec::new();
    let mut start = hot[0].clone();
    let mut end = hot[0].clone();

    for v in hot.into_iter().skip(1) {
        let relative = relative_gap(&end, config.zone_gap_percent);
        let allowed = relative.max(gap_absolute.clone());
        if &v - &end <= allowed {
            end = v;
        } else {
            zones.push(ValueRange {
                min: start,
                max: end.clone(),
            });
            start = v.clone();
            end = v;
        }
    }
    zones.push(ValueRange {
        min: start,
        max: end,
    });
    zones
}

fn relative_gap(value: &BigInt, percent: f64) -> BigInt {
    let bps = BigInt::from((percent * 10_000.0).round().max(0.0) as u64);
    value * bps / BigInt::from(10_000u32)
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Converged,
    NoNewResults,
    IterationCap,
}

/// Per-session state of the iterative protocol.
pub struct AdaptiveLoop {
    config: AdaptiveConfig,
    current_iteration: u32,
    feedback_history: Vec<Vec<SimilarityFeedback>>,
}

impl AdaptiveLoop {
    pub fn new(config: AdaptiveConfig) -> Self {
        Self {
            config,
            current_iteration: 0,
            feedback_history: Vec::new(),
        }
    }

    pub fn iteration(&self) -> u32 {
        self.current_iteration
    }

    pub fn advance(&mut self) {
        self.current_iteration += 1;
    }

    pub fn history(&self) -> &[Vec<SimilarityFeedback>] {
        &self.feedback_history
    }

    /// Analyze a round and remember the feedback for convergence tracking.
    pub fn analyze(
        &mut self,
        results: &[RunObservation],
        params: &[Parameter],
    ) -> Vec<SimilarityFeedback> {
        let feedback = analyze_feedback(results, params, &self.config);
        self.feedback_history.push(feedback.clone());
        feedback
    }

    /// Mean absolute change of per-parameter average similarity between the
    /// last two rounds, compared against the configured rate. Needs at
    /// least two completed rounds.
    pub fn converged(&self) -> bool {
        let n = self.feedback_history.len();
        if n < 2 {
            return false;
        }
        let prev = &self.feedback_history[n - 2];
        let curr = &self.feedback_history[n - 1];

        let mut total = 0.0;
        let mut count = 0usize;
        for fb in curr {
            if let Some(before) = prev.iter().find(|f| f.param_index == fb.param_index) {
                total += (fb.avg_similarity - before.avg_similarity).abs();
                count += 1;
            }
        }
        if count == 0 {
            return false;
        }
        let change = total / count as f64;
        tracing::debug!(change, rate = self.config.convergence_rate, "convergence check");
        change < self.config.convergence_rate
    }

    /// Decide whether another round should run after the one just analyzed.
    pub fn stop_reason(&self, new_valid_in_round: usize) -> Option<StopReason> {
        if new_valid_in_round == 0 && self.current_iteration > 0 {
            return Some(StopReason::NoNewResults);
        }
        let cap = if self.config.unlimited_mode {
            UNLIMITED_ITERATION_CAP
        } else {
            self.config.max_iterations
        };
        if self.current_iteration + 1 >= cap {
            return Some(StopReason::IterationCap);
        }
        if !self.config.unlimited_mode && self.converged() {
            return Some(StopReason::Converged);
        }
        None
    }

    /// Mean of the last round's per-parameter average similarities.
    pub fn last_average_similarity(&self) -> Option<f64> {
        let last = self.feedback_history.last()?;
        if last.is_empty() {
            return None;
        }
        let sum: f64 = last.iter().map(|f| f.avg_similarity).sum();
        Some(sum / last.len() as f64)
    }
}
