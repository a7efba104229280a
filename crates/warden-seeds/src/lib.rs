// SPDX-License-Identifier: AGPL-3.0

//! Seeded variant generation.
//!
//! For each parameter a variation list is assembled from four phases, in
//! priority order: symbolic seeds from the external constraint extractor,
//! user/collector attack seeds, type-specific random mutation, and boundary
//! exploration. Lists compose by cartesian product into a lazy stream capped
//! at `max_variations`.

pub mod constraint;
pub mod defaults;

use num_bigint::BigInt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet};
use warden_abi::coerce;
use warden_config::{AddressMutation, SeedConfig};
use warden_types::{Parameter, SolType, Value};

/// A seed produced by the external constraint extractor.
#[derive(Debug, Clone)]
pub struct SymbolicSeed {
    pub param_index: u32,
    pub value: Value,
    pub confidence: f64,
    /// Boundary seeds also get nearby neighbors.
    pub is_boundary: bool,
}

/// A contiguous numeric range whose observed similarities were high.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueRange {
    pub min: BigInt,
    pub max: BigInt,
}

/// Per-parameter observations handed back after a fuzzing round.
#[derive(Debug, Clone, Default)]
pub struct SimilarityFeedback {
    pub param_index: u32,
    pub avg_similarity: f64,
    /// Last observed similarity per canonical value string.
    pub value_similarities: HashMap<String, f64>,
    pub high_similarity_zones: Vec<ValueRange>,
}

/// Produces candidate argument tuples for one target function.
pub struct SeedGenerator {
    config: SeedConfig,
    symbolic_seeds: Vec<SymbolicSeed>,
    rng: StdRng,
}

impl SeedGenerator {
    pub fn new(config: SeedConfig) -> Self {
        Self {
            config,
            symbolic_seeds: Vec::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic generator for tests and replayable runs.
    pub fn with_rng_seed(config: SeedConfig, seed: u64) -> Self {
        Self {
            config,
            symbolic_seeds: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &SeedConfig {
        &self.config
    }

    pub fn set_symbolic_seeds(&mut self, seeds: Vec<SymbolicSeed>) {
        self.symbolic_seeds = seeds;
    }

    /// Add a seed value for a parameter.
    pub fn add_attack_seed(&mut self, param_index: u32, value: Value) {
        self.config
            .attack_seeds
            .entry(param_index)
            .or_default()
            .push(value);
    }

    /// Clamp seeding for a known sensitive function (flash/bond/debond
    /// style): every parameter keeps its original value as a seed, numeric
    /// seeds above the original are dropped, and address parameters are
    /// pinned to the original.
    pub fn prime_sensitive(&mut self, params: &[Parameter]) {
        for param in params {
            let seeds = self
                .config
                .attack_seeds
                .entry(param.index)
                .or_default();

            if param.ty.is_address() {
                seeds.clear();
                seeds.push(param.value.clone());
                continue;
            }

            if param.ty.is_numeric() {
                if let Some(original) = param.value.as_bigint() {
                    seeds.retain(|s| match s.as_bigint() {
                        Some(v) => v <= original,
                        None => true,
                    });
                }
            }
            if !seeds.iter().any(|s| s == &param.value) {
                seeds.push(param.value.clone());
            }
        }
        self.config.address_mutation_types = vec![AddressMutation::Original];
    }

    /// Register a constraint range discovered outside the static config,
    /// keyed by function signature.
    pub fn insert_constraint_range(
        &mut self,
        function: &str,
        param_index: u32,
        range: warden_config::ConstraintRange,
    ) {
        self.config
            .constraint_ranges
            .entry(function.to_string())
            .or_default()
            .insert(param_index, range);
    }

    /// Merge an externally supplied constraint range for `signature` into
    /// the attack seeds, with type coercion against the actual parameters.
    pub fn merge_constraint_ranges(&mut self, signature: &str, params: &[Parameter]) {
        let by_name = self.config.constraint_ranges.get(signature).cloned();
        let bare = signature.split('(').next().unwrap_or(signature);
        let ranges = match by_name.or_else(|| self.config.constraint_ranges.get(bare).cloned()) {
            Some(r) => r,
            None => return,
        };

        for (index, range) in ranges {
            let Some(param) = params.iter().find(|p| p.index == index) else {
                continue;
            };
            let seeds = self.config.attack_seeds.entry(index).or_default();
            for v in &range.attack_values {
                seeds.push(coerce(v, &param.ty));
            }
            for v in [&range.safe_threshold, &range.danger_threshold]
                .into_iter()
                .flatten()
            {
                seeds.push(coerce(v, &param.ty));
            }
        }
    }

    /// The per-parameter variation pipeline.
    pub fn param_variations(&mut self, param: &Parameter) -> Vec<Value> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();

        // The original value first: the all-original tuple is the cheapest
        // sanity probe a round can run.
        push_unique(param.value.clone(), &mut out, &mut seen);

        let threshold = self.config.symbolic.confidence_threshold;
        let symbolic: Vec<SymbolicSeed> = self
            .symbolic_seeds
            .iter()
            .filter(|s| s.param_index == param.index && s.confidence >= threshold)
            .cloned()
            .collect();
        for seed in symbolic {
            let coerced = coerce(&seed.value, &param.ty);
            if seed.is_boundary && param.ty.is_numeric() {
                if let Some(v) = coerced.as_bigint() {
                    for delta in [1u32, 10] {
                        let delta = BigInt::from(delta);
                        push_unique(Value::Int(&v + &delta), &mut out, &mut seen);
                        if v >= delta {
                            push_unique(Value::Int(&v - &delta), &mut out, &mut seen);
                        }
                    }
                }
            }
            push_unique(coerced, &mut out, &mut seen);
        }

        let weights = self.config.weights.clone();
        if weights.seed_based > 0 {
            let seeds = self
                .config
                .attack_seeds
                .get(&param.index)
                .cloned()
                .unwrap_or_default();
            for seed in seeds {
                let coerced = coerce(&seed, &param.ty);
                push_unique(coerced.clone(), &mut out, &mut seen);
                let mut expanded = Vec::new();
                self.expand_seed(&coerced, param, &mut |v| expanded.push(v));
                for v in expanded {
                    push_unique(v, &mut out, &mut seen);
                }
            }
        }

        if weights.random > 0 {
            let random = defaults::defaults_for(
                &param.ty,
                &param.value,
                &self.config.range_config,
                &self.config.address_mutation_types,
                &mut self.rng,
            );
            for v in random {
                push_unique(v, &mut out, &mut seen);
            }
        }

        if weights.boundary > 0 && self.config.range_config.boundary_exploration {
            for v in defaults::boundary_values(&param.ty) {
                push_unique(v, &mut out, &mut seen);
            }
        }

        out
    }

    /// Seed-derived neighbors by type: percent offsets and microsteps for
    /// numerics, bit flips for addresses (when enabled), byte flips for
    /// fixed-size bytes.
    fn expand_seed<F: FnMut(Value)>(&self, seed: &Value, param: &Parameter, push: &mut F) {
        match &param.ty {
            SolType::Uint(_) | SolType::Int(_) => {
                if let Some(v) = seed.as_bigint() {
                    for p in &self.config.range_config.numeric_range_percent {
                        for offset in defaults::percent_offsets(&v, *p) {
                            push(Value::Int(offset));
                        }
                    }
                    for step in defaults::microsteps(&v) {
                        push(Value::Int(step));
                    }
                }
            }
            SolType::Address => {
                if let Value::Address(a) = seed {
                    let mutated = defaults::address_defaults(
                        *a,
                        &self.config.address_mutation_types,
                    );
                    for v in mutated {
                        push(v);
                    }
                }
            }
            SolType::FixedBytes(_) => {
                if let Value::Bytes(b) = seed {
                    for v in defaults::fixed_bytes_defaults(b) {
                        push(v);
                    }
                }
            }
            _ => {}
        }
    }

    /// Assemble the capped cartesian stream over all parameters.
    pub fn generate(&mut self, params: &[Parameter]) -> VariantStream {
        if !self.config.enabled || params.is_empty() {
            return VariantStream::empty();
        }
        let lists: Vec<Vec<Value>> = params.iter().map(|p| self.param_variations(p)).collect();
        let total: usize = lists.iter().map(|l| l.len().max(1)).product();
        tracing::debug!(
            params = params.len(),
            tuples = total,
            cap = self.config.max_variations,
            "assembled variation lists"
        );
        VariantStream::new(lists, self.config.max_variations)
    }

    /// Variants for a follow-up round, driven by the previous round's
    /// feedback: dense samples inside high-similarity zones plus a percent
    /// scheme chosen by average similarity.
    pub fn generate_adaptive_round(
        &mut self,
        params: &[Parameter],
        feedback: &[SimilarityFeedback],
    ) -> VariantStream {
        if params.is_empty() {
            return VariantStream::empty();
        }
        let zone_samples = self.config.adaptive.zone_samples.max(2);

        let lists: Vec<Vec<Value>> = params
            .iter()
            .map(|param| {
                let mut out = Vec::new();
                let mut seen = HashSet::new();
                push_unique(param.value.clone(), &mut out, &mut seen);

                let Some(fb) = feedback.iter().find(|f| f.param_index == param.index) else {
                    return out;
                };

                if param.ty.is_numeric() {
                    for zone in &fb.high_similarity_zones {
                        for v in sample_range(&zone.min, &zone.max, zone_samples) {
                            push_unique(Value::Int(v), &mut out, &mut seen);
                        }
                    }
                }

                let strategies = &self.config.adaptive.strategies;
                let percents = if fb.avg_similarity > 0.7 {
                    &strategies.high_similarity
                } else if fb.avg_similarity > 0.4 {
                    &strategies.medium_similarity
                } else {
                    &strategies.low_similarity
                };

                let anchor = fb
                    .value_similarities
                    .iter()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .and_then(|(value, _)| warden_types::hexnum::parse_bigint(value))
                    .or_else(|| param.value.as_bigint());
                if let (Some(anchor), true) = (anchor, param.ty.is_numeric()) {
                    for p in percents {
                        for offset in defaults::percent_offsets(&anchor, *p) {
                            push_unique(Value::Int(offset), &mut out, &mut seen);
                        }
                    }
                }

                out
            })
            .collect();

        VariantStream::new(lists, self.config.max_variations)
    }

    /// Values from the configured constraint-range strategy for one
    /// parameter of `signature`.
    pub fn generate_constraint_based_variations(
        &mut self,
        signature: &str,
        param_index: u32,
    ) -> Vec<Value> {
        constraint::generate(
            &self.config,
            signature,
            param_index,
            &mut self.rng,
        )
    }
}

/// Lazy cartesian product over per-parameter variation lists, capped at a
/// total tuple budget.
pub struct VariantStream {
    lists: Vec<Vec<Value>>,
    indices: Vec<usize>,
    remaining: usize,
    done: bool,
}

impl VariantStream {
    fn new(mut lists: Vec<Vec<Value>>, cap: usize) -> Self {
        for list in &mut lists {
            if list.is_empty() {
                // A parameter with no variations still occupies a slot.
                list.push(Value::Bytes(Vec::new()));
            }
        }
        let done = lists.is_empty();
        Self {
            indices: vec![0; lists.len()],
            lists,
            remaining: cap,
            done,
        }
    }

    fn empty() -> Self {
        Self {
            lists: Vec::new(),
            indices: Vec::new(),
            remaining: 0,
            done: true,
        }
    }
}

impl Iterator for VariantStream {
    type Item = Vec<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.remaining == 0 {
            return None;
        }
        let tuple: Vec<Value> = self
            .indices
            .iter()
            .zip(&self.lists)
            .map(|(&i, list)| list[i].clone())
            .collect();
        self.remaining -= 1;

        // Odometer increment, most-significant parameter last.
        let mut pos = self.lists.len();
        loop {
            if pos == 0 {
                self.done = true;
                break;
            }
            pos -= 1;
            self.indices[pos] += 1;
            if self.indices[pos] < self.lists[pos].len() {
                break;
            }
            self.indices[pos] = 0;
        }
        Some(tuple)
    }
}

fn push_unique(value: Value, out: &mut Vec<Value>, seen: &mut HashSet<String>) {
    if seen.insert(value.canonical_string()) {
        out.push(value);
    }
}

/// Evenly spaced samples across an inclusive numeric range.
pub fn sample_range(min: &BigInt, max: &BigInt, count: usize) -> Vec<BigInt> {
    if min > max || count == 0 {
        return Vec::new();
    }
    if min == max || count == 1 {
        return vec![min.clone()];
    }
    let span = max - min;
    let steps = BigInt::from(count as u64 - 1);
    (0..count)
        .map(|i| min + &span * BigInt::from(i as u64) / &steps)
        .collect()
}
