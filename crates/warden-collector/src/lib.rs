// SPDX-License-Identifier: AGPL-3.0

//! Constraint collection and rule synthesis.
//!
//! High-similarity variant runs are recorded per `(contract, selector)` key.
//! Once enough samples accumulate, the collector aggregates per-parameter
//! and per-slot observations into a [`ConstraintRule`] and attempts a single
//! [`ExpressionRule`], regenerating both on every later sample.

pub mod express;

use alloy_primitives::{Address, B256};
use indexmap::IndexMap;
use num_bigint::{BigInt, Sign};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use warden_types::hexnum::{encode_uint, normalize_slot};
use warden_types::{ConstraintRule, ExpressionRule, ParamConstraint, Parameter, StateConstraint};

/// One recorded observation.
#[derive(Debug, Clone)]
pub struct Sample {
    pub params: Vec<Parameter>,
    /// Post-values of changed storage slots on the protected contract.
    pub state_changes: BTreeMap<B256, B256>,
    pub similarity: f64,
}

/// Externally supplied safe threshold for one parameter, turning the range
/// constraint into a half-line blacklist.
#[derive(Debug, Clone)]
pub struct SafeThreshold {
    pub param_index: u32,
    pub value: BigInt,
    pub is_safe_upper: bool,
}

/// A numeric feature extracted from samples.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeatureId {
    Param { index: u32, ty: String },
    State { slot: String },
}

/// Numeric view of the sample window: one row per sample.
pub struct SampleMatrix {
    params: Vec<FeatureId>,
    states: Vec<FeatureId>,
    rows: Vec<IndexMap<FeatureId, BigInt>>,
}

impl SampleMatrix {
    /// Build from the window: numeric parameters sorted by index, changed
    /// slots sorted by normalized hex.
    pub fn from_samples(samples: &VecDeque<Sample>) -> Self {
        let mut param_ids: BTreeMap<u32, FeatureId> = BTreeMap::new();
        let mut state_ids: BTreeMap<String, FeatureId> = BTreeMap::new();
        for sample in samples {
            for p in &sample.params {
                if p.ty.is_numeric() {
                    param_ids.entry(p.index).or_insert_with(|| FeatureId::Param {
                        index: p.index,
                        ty: p.ty.to_string(),
                    });
                }
            }
            for slot in sample.state_changes.keys() {
                let key = normalize_slot(&format!("0x{}", hex::encode(slot)));
                state_ids
                    .entry(key.clone())
                    .or_insert_with(|| FeatureId::State { slot: key });
            }
        }

        let rows = samples
            .iter()
            .map(|sample| {
                let mut row = IndexMap::new();
                for p in &sample.params {
                    if let (true, Some(v)) = (p.ty.is_numeric(), p.value.as_bigint()) {
                        row.insert(
                            FeatureId::Param {
                                index: p.index,
                                ty: p.ty.to_string(),
                            },
                            v,
                        );
                    }
                }
                for (slot, value) in &sample.state_changes {
                    let key = normalize_slot(&format!("0x{}", hex::encode(slot)));
                    row.insert(
                        FeatureId::State { slot: key },
                        BigInt::from_bytes_be(Sign::Plus, value.as_slice()),
                    );
                }
                row
            })
            .collect();

        Self {
            params: param_ids.into_values().collect(),
            states: state_ids.into_values().collect(),
            rows,
        }
    }

    pub fn param_features(&self) -> Vec<FeatureId> {
        self.params.clone()
    }

    pub fn state_features(&self) -> Vec<FeatureId> {
        self.states.clone()
    }

    pub fn rows(&self) -> &[IndexMap<FeatureId, BigInt>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

struct Entry {
    samples: VecDeque<Sample>,
    rule: Option<ConstraintRule>,
    expression: Option<ExpressionRule>,
}

impl Entry {
    fn new() -> Self {
        Self {
            samples: VecDeque::new(),
            rule: None,
            expression: None,
        }
    }
}

type Key = (Address, [u8; 4]);

/// Thread-safe sample store and rule generator.
pub struct ConstraintCollector {
    /// Window size and generation threshold.
    threshold: usize,
    similarity_trigger: f64,
    entries: Mutex<HashMap<Key, Entry>>,
    safe_thresholds: Mutex<HashMap<Key, SafeThreshold>>,
}

impl ConstraintCollector {
    pub fn new(threshold: usize, similarity_trigger: f64) -> Self {
        Self {
            threshold: threshold.max(2),
            similarity_trigger,
            entries: Mutex::new(HashMap::new()),
            safe_thresholds: Mutex::new(HashMap::new()),
        }
    }

    /// Install an external safe threshold for a key before fuzzing starts.
    pub fn set_safe_threshold(&self, contract: Address, selector: [u8; 4], t: SafeThreshold) {
        if !t.is_safe_upper {
            // The same threshold filters kept seeds (<= safe) and defines
            // the blacklist [0, safe]; those regions overlap. Surfaced
            // instead of silently resolved.
            warden_logs::warn_unique(&format!(
                "lower-safe threshold for {}:{} overlaps the kept-seed region",
                contract,
                warden_hashes::selector_hex(&selector)
            ));
        }
        self.safe_thresholds
            .lock()
            .unwrap()
            .insert((contract, selector), t);
    }

    /// Record one observation. Returns the freshly (re)generated rule when
    /// the window is full.
    pub fn record_sample(
        &self,
        contract: Address,
        selector: [u8; 4],
        params: Vec<Parameter>,
        state_changes: BTreeMap<B256, B256>,
        similarity: f64,
    ) -> Option<ConstraintRule> {
        let key = (contract, selector);
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(key).or_insert_with(Entry::new);

        entry.samples.push_back(Sample {
            params,
            state_changes,
            similarity,
        });
        while entry.samples.len() > self.threshold {
            entry.samples.pop_front();
        }
        if entry.samples.len() < self.threshold {
            return None;
        }

        let safe = self.safe_thresholds.lock().unwrap().get(&key).cloned();
        let rule = self.generate_rule(contract, selector, &entry.samples, safe.as_ref());
        let matrix = SampleMatrix::from_samples(&entry.samples);
        entry.expression = express::synthesize(&matrix);
        entry.rule = rule.clone();
        tracing::debug!(
            contract = %contract,
            selector = %hex::encode(selector),
            has_rule = rule.is_some(),
            has_expression = entry.expression.is_some(),
            "regenerated rules"
        );
        rule
    }

    pub fn get_rule(&self, contract: Address, selector: [u8; 4]) -> Option<ConstraintRule> {
        self.entries
            .lock()
            .unwrap()
            .get(&(contract, selector))
            .and_then(|e| e.rule.clone())
    }

    pub fn get_expression_rule(
        &self,
        contract: Address,
        selector: [u8; 4],
    ) -> Option<ExpressionRule> {
        self.entries
            .lock()
            .unwrap()
            .get(&(contract, selector))
            .and_then(|e| e.expression.clone())
    }

    pub fn sample_count(&self, contract: Address, selector: [u8; 4]) -> usize {
        self.entries
            .lock()
            .unwrap()
            .get(&(contract, selector))
            .map(|e| e.samples.len())
            .unwrap_or(0)
    }

    fn generate_rule(
        &self,
        contract: Address,
        selector: [u8; 4],
        samples: &VecDeque<Sample>,
        safe: Option<&SafeThreshold>,
    ) -> Option<ConstraintRule> {
        let param_constraints = aggregate_params(samples, safe);
        let state_constraints = aggregate_state(samples);
        if param_constraints.is_empty() && state_constraints.is_empty() {
            return None;
        }

        let generated_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Some(ConstraintRule {
            contract: format!("0x{}", hex::encode(contract.as_slice())),
            selector: warden_hashes::selector_hex(&selector),
            sample_count: samples.len(),
            param_constraints,
            state_constraints,
            similarity_trigger: self.similarity_trigger,
            generated_at,
        })
    }
}

fn uint256_max() -> BigInt {
    (BigInt::from(1u8) << 256) - 1
}

fn unsigned_hex(v: &BigInt) -> String {
    encode_uint(v.magnitude())
}

fn aggregate_params(
    samples: &VecDeque<Sample>,
    safe: Option<&SafeThreshold>,
) -> Vec<ParamConstraint> {
    // Schema by index across the window; later samples win on type.
    let mut schema: BTreeMap<u32, String> = BTreeMap::new();
    let mut is_numeric: BTreeMap<u32, bool> = BTreeMap::new();
    let mut is_address: BTreeMap<u32, bool> = BTreeMap::new();
    for sample in samples {
        for p in &sample.params {
            schema.insert(p.index, p.ty.to_string());
            is_numeric.insert(p.index, p.ty.is_numeric());
            is_address.insert(p.index, p.ty.is_address());
        }
    }

    let mut out = Vec::new();
    for (index, ty) in schema {
        // Address parameters never reach the on-chain module.
        if is_address[&index] {
            continue;
        }

        if is_numeric[&index] {
            let mut values: BTreeSet<BigInt> = BTreeSet::new();
            for sample in samples {
                for p in &sample.params {
                    if p.index == index {
                        if let Some(v) = p.value.as_bigint() {
                            values.insert(v);
                        }
                    }
                }
            }
            if values.len() <= 1 {
                continue;
            }

            let (min, max) = match safe {
                Some(t) if t.param_index == index && t.is_safe_upper => {
                    (t.value.clone(), uint256_max())
                }
                Some(t) if t.param_index == index => (BigInt::from(0u8), t.value.clone()),
                _ => (
                    values.iter().next().unwrap().clone(),
                    values.iter().next_back().unwrap().clone(),
                ),
            };
            out.push(ParamConstraint {
                index,
                ty,
                is_range: true,
                range_min_hex: unsigned_hex(&min),
                range_max_hex: unsigned_hex(&max),
                values: Vec::new(),
            });
        } else {
            let mut values: BTreeSet<String> = BTreeSet::new();
            for sample in samples {
                for p in &sample.params {
                    if p.index == index {
                        values.insert(p.value.canonical_string());
                    }
                }
            }
            out.push(ParamConstraint {
                index,
                ty,
                is_range: false,
                range_min_hex: String::new(),
                range_max_hex: String::new(),
                values: values.into_iter().collect(),
            });
        }
    }
    out
}

fn aggregate_state(samples: &VecDeque<Sample>) -> Vec<StateConstraint> {
    let mut by_slot: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for sample in samples {
        for (slot, value) in &sample.state_changes {
            let key = normalize_slot(&format!("0x{}", hex::encode(slot)));
            let v = BigInt::from_bytes_be(Sign::Plus, value.as_slice());
            by_slot.entry(key).or_default().insert(unsigned_hex(&v));
        }
    }
    by_slot
        .into_iter()
        .map(|(slot, values)| StateConstraint {
            slot,
            values: values.into_iter().collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::{SolType, Value};

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn b256_of(v: u64) -> B256 {
        let mut out = [0u8; 32];
        out[24..].copy_from_slice(&v.to_be_bytes());
        B256::from(out)
    }

    fn uint_param(index: u32, value: u64) -> Parameter {
        Parameter::new(index, SolType::Uint(256), Value::Int(BigInt::from(value)))
    }

    const SEL: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

    #[test]
    fn test_threshold_gates_rule_generation() {
        let collector = ConstraintCollector::new(5, 0.8);
        let contract = addr(0xaa);

        for i in 0..4u64 {
            let rule = collector.record_sample(
                contract,
                SEL,
                vec![uint_param(0, 100 + i)],
                BTreeMap::new(),
                0.9,
            );
            assert!(rule.is_none());
            assert!(collector.get_rule(contract, SEL).is_none());
        }

        let rule = collector.record_sample(
            contract,
            SEL,
            vec![uint_param(0, 104)],
            BTreeMap::new(),
            0.9,
        );
        assert!(rule.is_some());
        assert!(collector.get_rule(contract, SEL).is_some());
    }

    #[test]
    fn test_sliding_window_retains_threshold_samples() {
        let collector = ConstraintCollector::new(3, 0.8);
        let contract = addr(0xaa);
        for i in 0..20u64 {
            collector.record_sample(
                contract,
                SEL,
                vec![uint_param(0, i)],
                BTreeMap::new(),
                0.9,
            );
            assert!(collector.sample_count(contract, SEL) <= 3);
        }
        // The window holds the most recent samples only.
        let rule = collector.get_rule(contract, SEL).unwrap();
        assert_eq!(rule.param_constraints[0].range_min_hex, "0x11");
        assert_eq!(rule.param_constraints[0].range_max_hex, "0x13");
    }

    #[test]
    fn test_rule_regenerates_after_threshold() {
        let collector = ConstraintCollector::new(2, 0.8);
        let contract = addr(0xaa);
        collector.record_sample(contract, SEL, vec![uint_param(0, 10)], BTreeMap::new(), 0.9);
        let first = collector
            .record_sample(contract, SEL, vec![uint_param(0, 20)], BTreeMap::new(), 0.9)
            .unwrap();
        assert_eq!(first.param_constraints[0].range_max_hex, "0x14");

        let second = collector
            .record_sample(contract, SEL, vec![uint_param(0, 30)], BTreeMap::new(), 0.9)
            .unwrap();
        assert_eq!(second.param_constraints[0].range_max_hex, "0x1e");
    }

    #[test]
    fn test_address_params_never_emitted() {
        let collector = ConstraintCollector::new(2, 0.8);
        let contract = addr(0xaa);
        for i in 0..3u8 {
            collector.record_sample(
                contract,
                SEL,
                vec![
                    Parameter::new(0, SolType::Address, Value::Address(addr(i))),
                    uint_param(1, 100 + i as u64),
                ],
                BTreeMap::new(),
                0.9,
            );
        }
        let rule = collector.get_rule(contract, SEL).unwrap();
        assert!(rule.param_constraints.iter().all(|c| c.index != 0));

        if let Some(expr) = collector.get_expression_rule(contract, SEL) {
            for term in &expr.terms {
                match &term.kind {
                    warden_types::TermKind::Param { ty, .. } => assert_ne!(ty, "address"),
                    warden_types::TermKind::State { .. } => {}
                }
            }
        }
    }

    #[test]
    fn test_single_valued_numeric_skipped() {
        let collector = ConstraintCollector::new(2, 0.8);
        let contract = addr(0xaa);
        collector.record_sample(contract, SEL, vec![uint_param(0, 5)], BTreeMap::new(), 0.9);
        let rule =
            collector.record_sample(contract, SEL, vec![uint_param(0, 5)], BTreeMap::new(), 0.9);
        // Single-valued numeric and no state: nothing to constrain.
        assert!(rule.is_none());
    }

    #[test]
    fn test_upper_safe_threshold_blacklist_range() {
        let collector = ConstraintCollector::new(10, 0.8);
        let contract = addr(0xaa);
        collector.set_safe_threshold(
            contract,
            SEL,
            SafeThreshold {
                param_index: 0,
                value: BigInt::from(4),
                is_safe_upper: true,
            },
        );

        let mut rule = None;
        for i in 1..=10u64 {
            rule = collector.record_sample(
                contract,
                SEL,
                vec![uint_param(0, 5 * i)],
                BTreeMap::new(),
                0.9,
            );
        }
        let rule = rule.unwrap();
        let constraint = &rule.param_constraints[0];
        assert!(constraint.is_range);
        assert_eq!(constraint.range_min_hex, "0x4");
        assert_eq!(constraint.range_max_hex, format!("0x{}", "f".repeat(64)));
    }

    #[test]
    fn test_lower_safe_threshold_blacklist_range() {
        let collector = ConstraintCollector::new(2, 0.8);
        let contract = addr(0xaa);
        collector.set_safe_threshold(
            contract,
            SEL,
            SafeThreshold {
                param_index: 0,
                value: BigInt::from(1000),
                is_safe_upper: false,
            },
        );
        collector.record_sample(contract, SEL, vec![uint_param(0, 5)], BTreeMap::new(), 0.9);
        let rule = collector
            .record_sample(contract, SEL, vec![uint_param(0, 7)], BTreeMap::new(), 0.9)
            .unwrap();
        let constraint = &rule.param_constraints[0];
        assert_eq!(constraint.range_min_hex, "0x0");
        assert_eq!(constraint.range_max_hex, "0x3e8");
    }

    #[test]
    fn test_discrete_values_for_non_numeric() {
        let collector = ConstraintCollector::new(2, 0.8);
        let contract = addr(0xaa);
        for flag in [true, false, true] {
            collector.record_sample(
                contract,
                SEL,
                vec![
                    Parameter::new(0, SolType::Bool, Value::Bool(flag)),
                    uint_param(1, if flag { 1 } else { 2 }),
                ],
                BTreeMap::new(),
                0.9,
            );
        }
        let rule = collector.get_rule(contract, SEL).unwrap();
        let bool_constraint = rule
            .param_constraints
            .iter()
            .find(|c| c.index == 0)
            .unwrap();
        assert!(!bool_constraint.is_range);
        assert_eq!(bool_constraint.values, vec!["false", "true"]);
    }

    #[test]
    fn test_state_constraints_collect_post_values() {
        let collector = ConstraintCollector::new(2, 0.8);
        let contract = addr(0xaa);
        for v in [100u64, 200] {
            let mut state = BTreeMap::new();
            state.insert(b256_of(1), b256_of(v));
            collector.record_sample(contract, SEL, vec![uint_param(0, v)], state, 0.9);
        }
        let rule = collector.get_rule(contract, SEL).unwrap();
        assert_eq!(rule.state_constraints.len(), 1);
        let sc = &rule.state_constraints[0];
        assert_eq!(sc.slot, format!("0x{:0>64}", "1"));
        assert_eq!(sc.values, vec!["0x64", "0xc8"]);
    }

    #[test]
    fn test_ratio_expression_rule() {
        let collector = ConstraintCollector::new(10, 0.8);
        let contract = addr(0xaa);
        for i in 1..=10u64 {
            let mut state = BTreeMap::new();
            state.insert(b256_of(3), b256_of(100 * i));
            collector.record_sample(contract, SEL, vec![uint_param(0, 1000 * i)], state, 0.95);
        }

        let expr = collector.get_expression_rule(contract, SEL).unwrap();
        assert_eq!(expr.kind, "ratio");
        assert_eq!(expr.strategy, "ratio_param_over_state");
        assert_eq!(expr.threshold, "0x0");
        assert_eq!(expr.sample_count, 10);

        // k = 0.9 * 10 * 1e18 = 9e18.
        let k = warden_types::hexnum::decode_signed(&expr.terms[1].coeff).unwrap();
        assert_eq!(k, BigInt::parse_bytes(b"9000000000000000000", 10).unwrap());
        let neg_scale = warden_types::hexnum::decode_signed(&expr.terms[0].coeff).unwrap();
        assert_eq!(
            neg_scale,
            -BigInt::parse_bytes(b"1000000000000000000", 10).unwrap()
        );

        let margin = warden_types::hexnum::decode_signed(&expr.min_margin).unwrap();
        assert!(margin >= BigInt::from(0));
    }

    #[test]
    fn test_linear_expression_rule_fallback() {
        let collector = ConstraintCollector::new(4, 0.8);
        let contract = addr(0xaa);
        // No state changes, two co-varying numeric params: the ratio rule
        // has no slot to pair with, the hyperplane still separates.
        for i in 1..=4u64 {
            collector.record_sample(
                contract,
                SEL,
                vec![uint_param(0, 1000 * i), uint_param(1, 500 * i)],
                BTreeMap::new(),
                0.9,
            );
        }
        let expr = collector.get_expression_rule(contract, SEL).unwrap();
        assert_eq!(expr.kind, "linear");
        assert_eq!(expr.strategy, "sparse_hyperplane_origin_margin");
        assert!(expr.confidence > 0.0);
        let margin = warden_types::hexnum::decode_signed(&expr.min_margin).unwrap();
        assert!(margin >= BigInt::from(0));
    }
}
