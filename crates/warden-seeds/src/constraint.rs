// SPDX-License-Identifier: AGPL-3.0

//! Constraint-range driven mutation: value generation inside and around an
//! externally supplied `[safe_threshold, danger_threshold]` zone.

use num_bigint::{BigInt, RandBigInt};
use rand::Rng;
use std::collections::HashSet;
use warden_config::{MutationStrategy, SeedConfig};
use warden_types::Value;

/// Generate values for `param_index` of `signature` using the configured
/// strategy. Empty when no constraint range is known or the zone is not
/// numeric.
pub fn generate<R: Rng>(
    config: &SeedConfig,
    signature: &str,
    param_index: u32,
    rng: &mut R,
) -> Vec<Value> {
    let bare = signature.split('(').next().unwrap_or(signature);
    let range = config
        .constraint_ranges
        .get(signature)
        .or_else(|| config.constraint_ranges.get(bare))
        .and_then(|ranges| ranges.get(&param_index));
    let Some(range) = range else {
        return Vec::new();
    };

    let safe = range.safe_threshold.as_ref().and_then(|v| v.as_bigint());
    let danger = range.danger_threshold.as_ref().and_then(|v| v.as_bigint());
    let (Some(safe), Some(danger)) = (safe, danger) else {
        return Vec::new();
    };
    let (low, high) = if safe <= danger {
        (safe, danger)
    } else {
        (danger.clone(), safe)
    };

    let mutation = &config.range_mutation;
    let raw = match mutation.strategy {
        MutationStrategy::ExploreDangerZone => {
            explore_danger_zone(&low, &high, mutation.step_count, &mutation.percentiles, mutation.random_within_range_ratio, rng)
        }
        MutationStrategy::ProgressiveApproach => progressive_approach(&low, &high),
        MutationStrategy::BoundaryBreakthrough => {
            boundary_breakthrough(&high, config.range_config.boundary_exploration)
        }
    };

    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for v in raw {
        if seen.insert(v.to_string()) {
            out.push(Value::Int(v));
        }
    }
    out
}

fn at_percentile(low: &BigInt, high: &BigInt, percentile: f64) -> BigInt {
    let span = high - low;
    let bps = BigInt::from((percentile * 100.0).round().clamp(0.0, 10_000.0) as u64);
    low + span * bps / BigInt::from(10_000u32)
}

fn explore_danger_zone<R: Rng>(
    low: &BigInt,
    high: &BigInt,
    step_count: usize,
    percentiles: &[f64],
    random_ratio: f64,
    rng: &mut R,
) -> Vec<BigInt> {
    let mut out = Vec::new();
    for p in percentiles {
        out.push(at_percentile(low, high, *p));
    }
    if step_count > 0 {
        let steps = BigInt::from(step_count as u64);
        let span = high - low;
        for i in 0..=step_count {
            out.push(low + &span * BigInt::from(i as u64) / &steps);
        }
    }
    let random_count = (out.len() as f64 * random_ratio).round() as usize;
    for _ in 0..random_count {
        out.push(random_in_range(low, high, rng));
    }
    out
}

/// Percentiles climbing toward the danger threshold, each with small
/// neighbors clamped into the zone.
fn progressive_approach(low: &BigInt, high: &BigInt) -> Vec<BigInt> {
    let mut out = Vec::new();
    for p in [10.0, 25.0, 50.0, 75.0, 90.0, 95.0, 99.0, 100.0] {
        let at = at_percentile(low, high, p);
        for delta in [1u32, 10, 100] {
            let delta = BigInt::from(delta);
            let up = &at + &delta;
            if &up <= high {
                out.push(up);
            }
            let down = &at - &delta;
            if &down >= low {
                out.push(down);
            }
        }
        out.push(at);
    }
    out
}

fn boundary_breakthrough(danger: &BigInt, boundary_exploration: bool) -> Vec<BigInt> {
    let mut out = vec![danger.clone()];
    for delta in [1u32, 10, 100, 1000] {
        let delta = BigInt::from(delta);
        out.push(danger + &delta);
        if danger >= &delta {
            out.push(danger - &delta);
        }
    }
    // Multiples in basis points so big-int math stays exact.
    for bps in [10_100u64, 10_500, 11_000, 15_000, 20_000] {
        out.push(danger * BigInt::from(bps) / BigInt::from(10_000u32));
    }
    if boundary_exploration {
        for m in [5u32, 10, 100] {
            out.push(danger * BigInt::from(m));
        }
    }
    out
}

fn random_in_range<R: Rng>(low: &BigInt, high: &BigInt, rng: &mut R) -> BigInt {
    if low >= high {
        return low.clone();
    }
    rng.gen_bigint_range(low, &(high + BigInt::from(1u8)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeMap;
    use warden_config::ConstraintRange;

    fn config_with_range(strategy: MutationStrategy) -> SeedConfig {
        let mut config = SeedConfig::default();
        config.range_mutation.strategy = strategy;
        let mut per_param = BTreeMap::new();
        per_param.insert(
            0u32,
            ConstraintRange {
                attack_values: vec![],
                safe_threshold: Some(Value::Str("100".to_string())),
                danger_threshold: Some(Value::Str("1100".to_string())),
            },
        );
        config
            .constraint_ranges
            .insert("withdraw(uint256)".to_string(), per_param);
        config
    }

    #[test]
    fn test_unknown_function_yields_nothing() {
        let config = config_with_range(MutationStrategy::ExploreDangerZone);
        let mut rng = StdRng::seed_from_u64(3);
        assert!(generate(&config, "transfer(address,uint256)", 0, &mut rng).is_empty());
        assert!(generate(&config, "withdraw(uint256)", 5, &mut rng).is_empty());
    }

    #[test]
    fn test_explore_danger_zone_stays_in_zone() {
        let config = config_with_range(MutationStrategy::ExploreDangerZone);
        let mut rng = StdRng::seed_from_u64(3);
        let values = generate(&config, "withdraw(uint256)", 0, &mut rng);
        assert!(!values.is_empty());
        for v in &values {
            let n = v.as_bigint().unwrap();
            assert!(n >= BigInt::from(100) && n <= BigInt::from(1100), "{} out of zone", n);
        }
    }

    #[test]
    fn test_lookup_by_bare_name() {
        let mut config = config_with_range(MutationStrategy::ExploreDangerZone);
        let ranges = config.constraint_ranges.remove("withdraw(uint256)").unwrap();
        config.constraint_ranges.insert("withdraw".to_string(), ranges);

        let mut rng = StdRng::seed_from_u64(3);
        let values = generate(&config, "withdraw(uint256)", 0, &mut rng);
        assert!(!values.is_empty());
    }

    #[test]
    fn test_progressive_approach_includes_danger() {
        let config = config_with_range(MutationStrategy::ProgressiveApproach);
        let mut rng = StdRng::seed_from_u64(3);
        let values = generate(&config, "withdraw(uint256)", 0, &mut rng);
        assert!(values.contains(&Value::Int(BigInt::from(1100))));
        for v in &values {
            let n = v.as_bigint().unwrap();
            assert!(n >= BigInt::from(100) && n <= BigInt::from(1100));
        }
    }

    #[test]
    fn test_boundary_breakthrough_crosses_threshold() {
        let config = config_with_range(MutationStrategy::BoundaryBreakthrough);
        let mut rng = StdRng::seed_from_u64(3);
        let values = generate(&config, "withdraw(uint256)", 0, &mut rng);

        assert!(values.contains(&Value::Int(BigInt::from(1100))));
        assert!(values.contains(&Value::Int(BigInt::from(1101))));
        assert!(values.contains(&Value::Int(BigInt::from(2200)))); // 2x
        assert!(values.contains(&Value::Int(BigInt::from(11_000)))); // 10x
    }

    #[test]
    fn test_missing_thresholds_yield_nothing() {
        let mut config = SeedConfig::default();
        let mut per_param = BTreeMap::new();
        per_param.insert(
            0u32,
            ConstraintRange {
                attack_values: vec![Value::Str("5".to_string())],
                safe_threshold: None,
                danger_threshold: None,
            },
        );
        config
            .constraint_ranges
            .insert("withdraw(uint256)".to_string(), per_param);

        let mut rng = StdRng::seed_from_u64(3);
        assert!(generate(&config, "withdraw(uint256)", 0, &mut rng).is_empty());
    }
}
