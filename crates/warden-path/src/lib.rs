// SPDX-License-Identifier: AGPL-3.0

//! Path similarity between contract-qualified `JumpDest` sequences.
//!
//! The primary metric is Dice over the longest common subsequence; Jaccard
//! over the unique `(contract, pc)` set recovers similarity when the attack
//! path is a multi-iteration loop and the variant runs fewer iterations.

use alloy_primitives::Address;
use std::collections::HashSet;
use warden_types::{ExecPath, JumpDest};

/// Dice score below which the Jaccard fallback is consulted.
const JACCARD_FALLBACK_THRESHOLD: f64 = 0.3;

/// Max offsets scanned when aligning a loop baseline without a pc anchor.
const MAX_ALIGNMENT_OFFSETS: usize = 30;

/// Scores candidate paths against the attack baseline of one protected
/// contract.
#[derive(Debug, Clone, Copy)]
pub struct PathComparator {
    protected: Address,
}

impl PathComparator {
    pub fn new(protected: Address) -> Self {
        Self { protected }
    }

    /// Similarity in `[0, 1]` between `baseline[start_index..]` and
    /// `candidate`. Two empty sequences compare as unknown (0.0), never as
    /// identical.
    pub fn compare(&self, baseline: &[JumpDest], candidate: &[JumpDest], start_index: usize) -> f64 {
        let base = &baseline[start_index.min(baseline.len())..];
        if base.is_empty() && candidate.is_empty() {
            tracing::debug!("comparing two empty paths, treating as unknown");
            return 0.0;
        }
        if base.is_empty() || candidate.is_empty() {
            return 0.0;
        }

        let dice = dice_over_lcs(base, candidate);
        if dice < JACCARD_FALLBACK_THRESHOLD {
            let jac = jaccard(base, candidate);
            if jac > dice {
                return jac;
            }
        }
        dice
    }

    /// Similarity of a candidate run against the baseline, both sliced at
    /// their protected entry points.
    pub fn compare_paths(&self, baseline: &ExecPath, candidate: &ExecPath) -> f64 {
        self.compare(
            baseline.protected_slice(self.protected),
            candidate.protected_slice(self.protected),
            0,
        )
    }

    /// Similarity for a loop-classified attack: the full original path is
    /// re-anchored at the candidate's first pc and the Jaccard view is
    /// always consulted, so a single-iteration variant still scores close
    /// to a twenty-iteration baseline.
    pub fn compare_loop(&self, full_original: &ExecPath, candidate: &[JumpDest]) -> f64 {
        if candidate.is_empty() {
            return 0.0;
        }
        let aligned = self.align_loop_baseline(full_original, candidate);
        if aligned.is_empty() {
            return 0.0;
        }

        let dice = dice_over_lcs(&aligned, candidate);
        let jac = jaccard(&aligned, candidate);
        dice.max(jac)
    }

    /// Re-anchor the baseline for a loop attack.
    ///
    /// Preference order: the position of the candidate's first pc inside the
    /// original path; otherwise the window offset (up to
    /// [`MAX_ALIGNMENT_OFFSETS`]) maximizing Dice. The result is truncated
    /// to 1.5x the candidate length.
    pub fn align_loop_baseline(
        &self,
        full_original: &ExecPath,
        candidate: &[JumpDest],
    ) -> Vec<JumpDest> {
        let default: Vec<JumpDest> = full_original.protected_slice(self.protected).to_vec();
        if candidate.is_empty() || default.is_empty() {
            return default;
        }

        let anchor_pc = candidate[0].pc;
        let aligned = if let Some(k) = full_original
            .dests
            .iter()
            .position(|d| d.pc == anchor_pc && d.contract == self.protected)
        {
            full_original.protected_slice_from(k, self.protected)
        } else {
            let span = default.len().saturating_sub(candidate.len()) + 1;
            let max_offset = span.min(MAX_ALIGNMENT_OFFSETS);
            let mut best_offset = 0;
            let mut best_score = -1.0f64;
            for offset in 0..max_offset {
                let score = dice_over_lcs(&default[offset..], candidate);
                if score > best_score {
                    best_score = score;
                    best_offset = offset;
                }
            }
            default[best_offset..].to_vec()
        };

        let limit = candidate.len().max(candidate.len() * 3 / 2).max(1);
        let mut aligned = aligned;
        aligned.truncate(limit);
        aligned
    }
}

fn lcs_len(a: &[JumpDest], b: &[JumpDest]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    // Rolling single-row DP; baselines can run to thousands of entries.
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for da in a {
        for (j, db) in b.iter().enumerate() {
            curr[j + 1] = if da.contract == db.contract && da.pc == db.pc {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// `2·LCS / (|a| + |b|)`.
pub fn dice_over_lcs(a: &[JumpDest], b: &[JumpDest]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let lcs = lcs_len(a, b);
    (2 * lcs) as f64 / (a.len() + b.len()) as f64
}

/// `LCS / min(|a|, |b|)`; used for off-band candidate-rule export.
pub fn overlap(a: &[JumpDest], b: &[JumpDest]) -> f64 {
    let min_len = a.len().min(b.len());
    if min_len == 0 {
        return 0.0;
    }
    lcs_len(a, b) as f64 / min_len as f64
}

/// Jaccard index over the unique `(contract, pc)` pairs of each sequence.
pub fn jaccard(a: &[JumpDest], b: &[JumpDest]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let set_a: HashSet<&JumpDest> = a.iter().collect();
    let set_b: HashSet<&JumpDest> = b.iter().collect();
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}
