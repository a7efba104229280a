// SPDX-License-Identifier: AGPL-3.0

//! Configuration model for a fuzzing session.
//!
//! These are plain serde structs: the surrounding driver owns flag parsing
//! and config-file discovery and hands a fully formed [`FuzzConfig`] to the
//! session. Every field has a default so partial documents deserialize.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use warden_exceptions::InitError;
use warden_types::Value;

/// Relative weights of the mutation phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationWeights {
    #[serde(default = "default_weight_seed")]
    pub seed_based: u32,
    #[serde(default = "default_weight_random")]
    pub random: u32,
    #[serde(default = "default_weight_boundary")]
    pub boundary: u32,
}

impl Default for MutationWeights {
    fn default() -> Self {
        Self {
            seed_based: default_weight_seed(),
            random: default_weight_random(),
            boundary: default_weight_boundary(),
        }
    }
}

fn default_weight_seed() -> u32 {
    6
}
fn default_weight_random() -> u32 {
    3
}
fn default_weight_boundary() -> u32 {
    1
}

/// Numeric-range exploration knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeConfig {
    /// Percentages applied around numeric seeds (`seed ± p%`).
    #[serde(default = "default_numeric_range_percent")]
    pub numeric_range_percent: Vec<f64>,
    #[serde(default = "default_true")]
    pub boundary_exploration: bool,
    #[serde(default)]
    pub bit_flips: bool,
    /// Cap on generated array lengths.
    #[serde(default = "default_max_elements")]
    pub max_elements: usize,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            numeric_range_percent: default_numeric_range_percent(),
            boundary_exploration: true,
            bit_flips: false,
            max_elements: default_max_elements(),
        }
    }
}

fn default_numeric_range_percent() -> Vec<f64> {
    vec![1.0, 5.0, 10.0, 50.0]
}
fn default_max_elements() -> usize {
    1000
}
fn default_true() -> bool {
    true
}

/// How address-typed parameters may be mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressMutation {
    #[serde(rename = "original")]
    Original,
    #[serde(rename = "bitflip_1")]
    Bitflip1,
    #[serde(rename = "bitflip_2")]
    Bitflip2,
    #[serde(rename = "nearby")]
    Nearby,
}

/// Strategy for constraint-range driven mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStrategy {
    ExploreDangerZone,
    ProgressiveApproach,
    BoundaryBreakthrough,
}

/// Knobs for the constraint-range strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeMutationConfig {
    #[serde(default = "default_mutation_strategy")]
    pub strategy: MutationStrategy,
    /// Percentiles sampled across the danger zone, in `[0, 100]`.
    #[serde(default = "default_percentiles")]
    pub percentiles: Vec<f64>,
    #[serde(default = "default_step_count")]
    pub step_count: usize,
    /// Extra uniform randoms, as a fraction of the deterministic count.
    #[serde(default = "default_random_ratio")]
    pub random_within_range_ratio: f64,
}

impl Default for RangeMutationConfig {
    fn default() -> Self {
        Self {
            strategy: default_mutation_strategy(),
            percentiles: default_percentiles(),
            step_count: default_step_count(),
            random_within_range_ratio: default_random_ratio(),
        }
    }
}

fn default_mutation_strategy() -> MutationStrategy {
    MutationStrategy::ExploreDangerZone
}
fn default_percentiles() -> Vec<f64> {
    vec![0.0, 25.0, 50.0, 75.0, 100.0]
}
fn default_step_count() -> usize {
    10
}
fn default_random_ratio() -> f64 {
    0.5
}

/// Externally supplied value range for one parameter of one function.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConstraintRange {
    #[serde(default)]
    pub attack_values: Vec<Value>,
    #[serde(default)]
    pub safe_threshold: Option<Value>,
    #[serde(default)]
    pub danger_threshold: Option<Value>,
}

/// Percentage schemes selected by the average similarity of the previous
/// round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityStrategies {
    #[serde(default = "default_high_similarity")]
    pub high_similarity: Vec<f64>,
    #[serde(default = "default_medium_similarity")]
    pub medium_similarity: Vec<f64>,
    #[serde(default = "default_low_similarity")]
    pub low_similarity: Vec<f64>,
}

impl Default for SimilarityStrategies {
    fn default() -> Self {
        Self {
            high_similarity: default_high_similarity(),
            medium_similarity: default_medium_similarity(),
            low_similarity: default_low_similarity(),
        }
    }
}

fn default_high_similarity() -> Vec<f64> {
    vec![0.1, 0.5, 1.0]
}
fn default_medium_similarity() -> Vec<f64> {
    vec![1.0, 5.0, 10.0]
}
fn default_low_similarity() -> Vec<f64> {
    vec![10.0, 50.0, 100.0]
}

/// Iterative-round configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Converged when the mean absolute change of per-parameter average
    /// similarity falls below this.
    #[serde(default = "default_convergence_rate")]
    pub convergence_rate: f64,
    /// Similarity above which a value joins a high-similarity zone.
    #[serde(default = "default_zone_threshold")]
    pub zone_threshold: f64,
    /// Max relative gap merged into one zone.
    #[serde(default = "default_zone_gap_percent")]
    pub zone_gap_percent: f64,
    /// Max absolute gap merged into one zone.
    #[serde(default = "default_zone_gap_absolute")]
    pub zone_gap_absolute: u64,
    /// Dense samples drawn inside each zone per round.
    #[serde(default = "default_zone_samples")]
    pub zone_samples: usize,
    #[serde(default)]
    pub unlimited_mode: bool,
    #[serde(default)]
    pub strategies: SimilarityStrategies,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_iterations: default_max_iterations(),
            convergence_rate: default_convergence_rate(),
            zone_threshold: default_zone_threshold(),
            zone_gap_percent: default_zone_gap_percent(),
            zone_gap_absolute: default_zone_gap_absolute(),
            zone_samples: default_zone_samples(),
            unlimited_mode: false,
            strategies: SimilarityStrategies::default(),
        }
    }
}

fn default_max_iterations() -> u32 {
    5
}
fn default_convergence_rate() -> f64 {
    0.02
}
fn default_zone_threshold() -> f64 {
    0.75
}
fn default_zone_gap_percent() -> f64 {
    0.1
}
fn default_zone_gap_absolute() -> u64 {
    1000
}
fn default_zone_samples() -> usize {
    8
}

/// Iteration cap applied when `unlimited_mode` is on.
pub const UNLIMITED_ITERATION_CAP: u32 = 9999;

/// Seeds produced by the external constraint extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolicConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Minimum extractor confidence for a seed to be used.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

impl Default for SymbolicConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

fn default_confidence_threshold() -> f64 {
    0.5
}

/// Seed-driven variant generation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seed values per parameter index.
    #[serde(default)]
    pub attack_seeds: BTreeMap<u32, Vec<Value>>,
    #[serde(default)]
    pub range_config: RangeConfig,
    #[serde(default)]
    pub weights: MutationWeights,
    #[serde(default)]
    pub adaptive: AdaptiveConfig,
    #[serde(default)]
    pub symbolic: SymbolicConfig,
    /// Externally supplied ranges, keyed by function name or full signature,
    /// then by parameter index.
    #[serde(default)]
    pub constraint_ranges: BTreeMap<String, BTreeMap<u32, ConstraintRange>>,
    #[serde(default)]
    pub range_mutation: RangeMutationConfig,
    #[serde(default = "default_address_mutations")]
    pub address_mutation_types: Vec<AddressMutation>,
    /// Global cap on emitted variant tuples.
    #[serde(default = "default_max_variations")]
    pub max_variations: usize,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            attack_seeds: BTreeMap::new(),
            range_config: RangeConfig::default(),
            weights: MutationWeights::default(),
            adaptive: AdaptiveConfig::default(),
            symbolic: SymbolicConfig::default(),
            constraint_ranges: BTreeMap::new(),
            range_mutation: RangeMutationConfig::default(),
            address_mutation_types: default_address_mutations(),
            max_variations: default_max_variations(),
        }
    }
}

fn default_address_mutations() -> Vec<AddressMutation> {
    vec![AddressMutation::Original]
}
fn default_max_variations() -> usize {
    10_000
}

/// Top-level session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Minimum similarity for a variant to count as valid.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Early-stop similarity; 0 disables.
    #[serde(default)]
    pub target_similarity: f64,
    /// Early-stop result count; 0 disables.
    #[serde(default)]
    pub max_high_sim_results: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_per_simulation_ms: u64,
    /// Batch size for best-path diagnostics.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Top-similarity results retained in the report.
    #[serde(default = "default_top_results")]
    pub top_results: usize,
    /// Keep entry-level fuzzing even when the root is not protected.
    #[serde(default)]
    pub entry_call_protected_only: bool,
    #[serde(default)]
    pub enable_invariant_check: bool,
    /// Force the sensitive-function seed clamp on or off; `None` leaves it
    /// to the selector name heuristic.
    #[serde(default)]
    pub sensitive_function_override: Option<bool>,
    /// Samples required before the collector synthesizes rules; also the
    /// sliding-window size.
    #[serde(default = "default_collector_threshold")]
    pub collector_threshold: usize,
    /// Selectors preferred by the call selector, `0x` + 8 hex each.
    #[serde(default)]
    pub high_priority_selectors: Vec<String>,
    #[serde(default)]
    pub seed: SeedConfig,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            similarity_threshold: default_similarity_threshold(),
            target_similarity: 0.0,
            max_high_sim_results: 0,
            timeout_per_simulation_ms: default_timeout_ms(),
            batch_size: default_batch_size(),
            top_results: default_top_results(),
            entry_call_protected_only: false,
            enable_invariant_check: false,
            sensitive_function_override: None,
            collector_threshold: default_collector_threshold(),
            high_priority_selectors: Vec::new(),
            seed: SeedConfig::default(),
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_similarity_threshold() -> f64 {
    0.8
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_batch_size() -> usize {
    100
}
fn default_top_results() -> usize {
    100
}
fn default_collector_threshold() -> usize {
    10
}

impl FuzzConfig {
    /// Check invariants that would otherwise surface as nonsense mid-run.
    pub fn validate(&self) -> Result<(), InitError> {
        if self.workers == 0 {
            return Err(InitError::BadConfig("workers must be > 0".to_string()));
        }
        if self.timeout_per_simulation_ms == 0 {
            return Err(InitError::BadConfig(
                "timeout_per_simulation_ms must be > 0".to_string(),
            ));
        }
        for (name, v) in [
            ("similarity_threshold", self.similarity_threshold),
            ("target_similarity", self.target_similarity),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(InitError::BadConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, v
                )));
            }
        }
        if self.collector_threshold < 2 {
            return Err(InitError::BadConfig(
                "collector_threshold must be >= 2".to_string(),
            ));
        }
        let w = &self.seed.weights;
        if w.seed_based + w.random + w.boundary == 0 {
            return Err(InitError::BadConfig(
                "mutation weights must not all be zero".to_string(),
            ));
        }
        if self.seed.max_variations == 0 {
            return Err(InitError::BadConfig(
                "max_variations must be > 0".to_string(),
            ));
        }
        let a = &self.seed.adaptive;
        if a.convergence_rate <= 0.0 {
            return Err(InitError::BadConfig(
                "convergence_rate must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&a.zone_threshold) {
            return Err(InitError::BadConfig(
                "zone_threshold must be within [0, 1]".to_string(),
            ));
        }
        for p in &self.seed.range_mutation.percentiles {
            if !(0.0..=100.0).contains(p) {
                return Err(InitError::BadConfig(format!(
                    "percentile out of range: {}",
                    p
                )));
            }
        }
        Ok(())
    }
}
