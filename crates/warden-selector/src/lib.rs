// SPDX-License-Identifier: AGPL-3.0

//! Target-call selection: which frame of the recorded transaction gets
//! fuzzed, and whether the attack is loop-shaped.

use alloy_primitives::Address;
use lazy_static::lazy_static;
use std::collections::HashMap;
use warden_exceptions::{SessionError, SessionResult};
use warden_hashes::function_selector;
use warden_types::{CallFrame, ExecPath};

lazy_static! {
    /// Standard ERC-20 surface; repeated calls to these do not signal a
    /// loop attack, and they are never preferred as targets.
    static ref ERC20_STANDARD_SELECTORS: Vec<[u8; 4]> = [
        "approve(address,uint256)",
        "transfer(address,uint256)",
        "transferFrom(address,address,uint256)",
        "balanceOf(address)",
        "allowance(address,address)",
        "totalSupply()",
        "name()",
        "symbol()",
        "decimals()",
    ]
    .iter()
    .map(|sig| function_selector(sig))
    .collect();
}

/// Whether a selector belongs to the standard ERC-20 surface.
pub fn is_erc20_standard(selector: &[u8; 4]) -> bool {
    ERC20_STANDARD_SELECTORS.contains(selector)
}

/// Calldata longer than this carries more than one argument word, a hint
/// that the function is the interesting one.
const LONG_INPUT_BYTES: usize = 68;

/// The outcome of target selection.
#[derive(Debug, Clone)]
pub struct TargetDecision {
    pub frame: CallFrame,
    /// Position among the protected calls in traversal order; 0 for the
    /// root in entry mode.
    pub call_index: usize,
    pub loop_baseline: bool,
    pub entry_mode: bool,
}

/// Picks the call frame to fuzz out of a recorded call tree.
#[derive(Debug, Clone)]
pub struct CallSelector {
    protected: Address,
    high_priority_selectors: Vec<[u8; 4]>,
    entry_call_protected_only: bool,
}

impl CallSelector {
    pub fn new(
        protected: Address,
        high_priority_selectors: Vec<[u8; 4]>,
        entry_call_protected_only: bool,
    ) -> Self {
        Self {
            protected,
            high_priority_selectors,
            entry_call_protected_only,
        }
    }

    /// Select the target frame and classify the attack shape.
    pub fn select(
        &self,
        call_tree: &CallFrame,
        baseline: &ExecPath,
    ) -> SessionResult<TargetDecision> {
        let protected_calls = call_tree.calls_to(self.protected);
        if protected_calls.is_empty() {
            return Err(SessionError::NoCallsToProtected);
        }

        let (call_index, repeated_selector) = self.pick_preferred(&protected_calls);
        let frame = protected_calls[call_index].clone();

        let loop_baseline = repeated_selector || baseline.has_repeated_pair(self.protected);
        tracing::debug!(
            calls = protected_calls.len(),
            call_index,
            loop_baseline,
            "selected protected call"
        );

        // Entry fallback: nothing to mutate on the protected call, or a
        // loop attack driven from an outside entry point.
        let no_params = frame.input.len() <= 4;
        let root_is_external = call_tree.to != self.protected;
        if no_params || (loop_baseline && root_is_external && !self.entry_call_protected_only) {
            if root_is_external {
                return Ok(TargetDecision {
                    frame: call_tree.clone(),
                    call_index: 0,
                    loop_baseline,
                    entry_mode: true,
                });
            }
        }

        Ok(TargetDecision {
            frame,
            call_index,
            loop_baseline,
            entry_mode: false,
        })
    }

    /// Preference ladder over multiple protected calls. Returns the chosen
    /// index and whether a non-standard selector repeats (loop signal).
    fn pick_preferred(&self, calls: &[&CallFrame]) -> (usize, bool) {
        let selectors: Vec<Option<[u8; 4]>> = calls.iter().map(|c| c.selector()).collect();

        let mut counts: HashMap<[u8; 4], usize> = HashMap::new();
        for sel in selectors.iter().flatten() {
            *counts.entry(*sel).or_insert(0) += 1;
        }
        let any_repeated = counts
            .iter()
            .any(|(sel, &n)| n >= 2 && !is_erc20_standard(sel));

        // 1. Most frequent repeated non-standard selector, first occurrence.
        let repeated_best = counts
            .iter()
            .filter(|(sel, &n)| n > 1 && !is_erc20_standard(sel))
            .max_by_key(|(_, &n)| n)
            .map(|(sel, _)| *sel);
        if let Some(best) = repeated_best {
            if let Some(i) = selectors.iter().position(|s| *s == Some(best)) {
                return (i, true);
            }
        }

        // 2. Configured high-priority selectors.
        for (i, sel) in selectors.iter().enumerate() {
            if let Some(sel) = sel {
                if self.high_priority_selectors.contains(sel) {
                    return (i, any_repeated);
                }
            }
        }

        // 3. Non-standard selector with a multi-word argument block.
        for (i, (call, sel)) in calls.iter().zip(&selectors).enumerate() {
            if let Some(sel) = sel {
                if !is_erc20_standard(sel) && call.input.len() > LONG_INPUT_BYTES {
                    return (i, any_repeated);
                }
            }
        }

        // 4. Any non-standard selector.
        for (i, sel) in selectors.iter().enumerate() {
            if let Some(sel) = sel {
                if !is_erc20_standard(sel) {
                    return (i, any_repeated);
                }
            }
        }

        // 5. First protected call.
        (0, any_repeated)
    }
}
