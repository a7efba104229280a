// SPDX-License-Identifier: AGPL-3.0

//! Expression-rule synthesis: a single sparse inequality separating
//! attack-like inputs from safe ones.
//!
//! All intermediate math runs on big rationals; only the emitted
//! coefficients are truncated to scaled integers.

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use warden_types::hexnum::encode_signed;
use warden_types::{ExpressionRule, LinearTerm, TermKind};

use crate::{FeatureId, SampleMatrix};

/// Fixed-point scale of emitted coefficients and thresholds.
pub const SCALE_DECIMALS: u32 = 18;

/// Feature cap for the hyperplane rule.
const MAX_FEATURES: usize = 6;

pub fn scale() -> BigInt {
    BigInt::from(10u8).pow(SCALE_DECIMALS)
}

fn floor_to_int(r: &BigRational) -> BigInt {
    r.floor().to_integer()
}

/// Try the ratio rule first, then the hyperplane rule.
pub fn synthesize(matrix: &SampleMatrix) -> Option<ExpressionRule> {
    ratio_rule(matrix).or_else(|| linear_rule(matrix))
}

/// `ratio_param_over_state`: find a (parameter, slot) pair whose ratio is
/// bounded below across samples, and block inputs exceeding 90% of that
/// bound.
fn ratio_rule(matrix: &SampleMatrix) -> Option<ExpressionRule> {
    let scale = scale();
    let mut best: Option<(FeatureId, FeatureId, BigRational, BigInt)> = None;

    for param in matrix.param_features() {
        for slot in matrix.state_features() {
            let mut min_ratio: Option<BigRational> = None;
            for row in matrix.rows() {
                let (Some(p), Some(s)) = (row.get(&param), row.get(&slot)) else {
                    continue;
                };
                if s.is_zero() {
                    continue;
                }
                let ratio = BigRational::new(p.clone(), s.clone());
                min_ratio = Some(match min_ratio {
                    Some(m) if m <= ratio => m,
                    _ => ratio,
                });
            }
            let Some(min_ratio) = min_ratio else { continue };
            let r_min = min_ratio * BigRational::new(BigInt::from(9u8), BigInt::from(10u8));
            if r_min <= BigRational::zero() {
                continue;
            }
            let k = floor_to_int(&(&r_min * BigRational::from_integer(scale.clone())));

            // Margin of the blocking inequality per sample.
            let mut min_margin: Option<BigInt> = None;
            for row in matrix.rows() {
                let (Some(p), Some(s)) = (row.get(&param), row.get(&slot)) else {
                    continue;
                };
                let margin = p * &scale - &k * s;
                min_margin = Some(match min_margin {
                    Some(m) if m <= margin => m,
                    _ => margin,
                });
            }
            let min_margin = min_margin?;
            if min_margin.is_negative() {
                continue;
            }

            let replace = match &best {
                None => true,
                Some((_, _, best_ratio, best_margin)) => {
                    r_min < *best_ratio || (r_min == *best_ratio && min_margin > *best_margin)
                }
            };
            if replace {
                best = Some((param.clone(), slot.clone(), r_min, min_margin));
            }
        }
    }

    let (param, slot, r_min, min_margin) = best?;
    let k = floor_to_int(&(&r_min * BigRational::from_integer(scale.clone())));
    Some(ExpressionRule {
        kind: "ratio".to_string(),
        terms: vec![
            LinearTerm {
                kind: param.to_term_kind(),
                coeff: encode_signed(&-scale.clone()),
            },
            LinearTerm {
                kind: slot.to_term_kind(),
                coeff: encode_signed(&k),
            },
        ],
        threshold: encode_signed(&BigInt::zero()),
        scale: warden_types::hexnum::encode_uint(scale.magnitude()),
        confidence: 1.0,
        sample_count: matrix.len(),
        min_margin: encode_signed(&min_margin),
        strategy: "ratio_param_over_state".to_string(),
    })
}

/// `sparse_hyperplane_origin_margin`: normalize features into `[-1, 1]`,
/// take the sample centroid as the separating direction, and require 90% of
/// the worst-case dot product as margin.
fn linear_rule(matrix: &SampleMatrix) -> Option<ExpressionRule> {
    let features: Vec<FeatureId> = matrix
        .param_features()
        .into_iter()
        .chain(matrix.state_features())
        .take(MAX_FEATURES)
        .collect();
    if features.is_empty() || matrix.len() == 0 {
        return None;
    }

    // Per-feature normalizer: max absolute value, floored at one.
    let mut max_abs: Vec<BigInt> = Vec::with_capacity(features.len());
    for f in &features {
        let mut m = BigInt::one();
        for row in matrix.rows() {
            if let Some(v) = row.get(f) {
                if v.abs() > m {
                    m = v.abs();
                }
            }
        }
        max_abs.push(m);
    }

    let n = BigInt::from(matrix.len() as u64);
    let mut centroid: Vec<BigRational> = vec![BigRational::zero(); features.len()];
    let mut normalized_rows: Vec<Vec<BigRational>> = Vec::with_capacity(matrix.len());
    for row in matrix.rows() {
        let mut normalized = Vec::with_capacity(features.len());
        for (f, m) in features.iter().zip(&max_abs) {
            let v = row.get(f).cloned().unwrap_or_else(BigInt::zero);
            normalized.push(BigRational::new(v, m.clone()));
        }
        for (c, v) in centroid.iter_mut().zip(&normalized) {
            *c += v;
        }
        normalized_rows.push(normalized);
    }
    for c in centroid.iter_mut() {
        *c /= BigRational::from_integer(n.clone());
    }

    let mut min_dot: Option<BigRational> = None;
    for row in &normalized_rows {
        let dot: BigRational = centroid
            .iter()
            .zip(row)
            .map(|(c, v)| c * v)
            .fold(BigRational::zero(), |acc, x| acc + x);
        min_dot = Some(match min_dot {
            Some(m) if m <= dot => m,
            _ => dot,
        });
    }
    let min_dot = min_dot?;
    if min_dot <= BigRational::zero() {
        return None;
    }
    let target_margin = &min_dot * BigRational::new(BigInt::from(9u8), BigInt::from(10u8));

    let scale = scale();
    let scale_rat = BigRational::from_integer(scale.clone());

    // Negated so the emitted rule holds (<= threshold) on attack-like rows.
    let coeffs: Vec<BigInt> = centroid
        .iter()
        .zip(&max_abs)
        .map(|(c, m)| floor_to_int(&(-c / BigRational::from_integer(m.clone()) * &scale_rat)))
        .collect();
    let threshold = floor_to_int(&(-&target_margin * &scale_rat));

    // Confidence and margin against the integer rule actually emitted.
    let mut satisfied = 0usize;
    let mut min_margin: Option<BigInt> = None;
    for row in matrix.rows() {
        let mut acc = BigInt::zero();
        for (f, coeff) in features.iter().zip(&coeffs) {
            let v = row.get(f).cloned().unwrap_or_else(BigInt::zero);
            acc += coeff * v;
        }
        let margin = &threshold - &acc;
        if !margin.is_negative() {
            satisfied += 1;
        }
        min_margin = Some(match min_margin {
            Some(m) if m <= margin => m,
            _ => margin,
        });
    }
    if satisfied == 0 {
        return None;
    }

    let terms = features
        .iter()
        .zip(&coeffs)
        .map(|(f, coeff)| LinearTerm {
            kind: f.to_term_kind(),
            coeff: encode_signed(coeff),
        })
        .collect();

    Some(ExpressionRule {
        kind: "linear".to_string(),
        terms,
        threshold: encode_signed(&threshold),
        scale: warden_types::hexnum::encode_uint(scale.magnitude()),
        confidence: satisfied as f64 / matrix.len() as f64,
        sample_count: matrix.len(),
        min_margin: encode_signed(&min_margin?),
        strategy: "sparse_hyperplane_origin_margin".to_string(),
    })
}

impl FeatureId {
    fn to_term_kind(&self) -> TermKind {
        match self {
            FeatureId::Param { index, ty } => TermKind::Param {
                index: *index,
                ty: ty.clone(),
            },
            FeatureId::State { slot } => TermKind::State { slot: slot.clone() },
        }
    }
}
