// SPDX-License-Identifier: AGPL-3.0

//! End-to-end session runs against a scripted simulator.

use alloy_primitives::{Address, B256, U256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use warden::{
    CallMutator, FuzzSession, InvariantChecker, Simulator, SimulatorHandle, TransactionInfo,
};
use warden_exceptions::{SessionError, SimResult, SimulationError};
use warden_hashes::function_selector;
use warden_state::Catalogs;
use warden_types::{
    CallFrame, CallSnapshot, ExecPath, JumpDest, SimulationResult, SlotChange, StateChange,
    StateOverride,
};

const BASELINE_PCS: [u64; 4] = [100, 200, 300, 400];

fn protected() -> Address {
    Address::repeat_byte(0xaa)
}

fn attacker() -> Address {
    Address::repeat_byte(0xee)
}

fn withdraw_selector() -> [u8; 4] {
    function_selector("withdraw(uint256)")
}

fn withdraw_calldata(amount: u64) -> Vec<u8> {
    let mut out = withdraw_selector().to_vec();
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&amount.to_be_bytes());
    out.extend(word);
    out
}

fn baseline_path() -> ExecPath {
    ExecPath::new(
        BASELINE_PCS
            .iter()
            .map(|&pc| JumpDest::new(protected(), pc))
            .collect(),
        protected(),
    )
}

fn amount_of(calldata: &[u8]) -> Option<u64> {
    if calldata.len() < 36 {
        return None;
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&calldata[28..36]);
    // Any higher word bits mean a quantity far outside the window.
    if calldata[4..28].iter().any(|&b| b != 0) {
        return Some(u64::MAX);
    }
    Some(u64::from_be_bytes(bytes))
}

/// Scripted engine: amounts near the original follow the attack path in
/// full, distant amounts cover only its first half, zero reverts.
struct StubSimulator {
    fail_fetch: bool,
    fatal_execute: bool,
    tree_to_other_contract: bool,
}

impl StubSimulator {
    fn healthy() -> Self {
        Self {
            fail_fetch: false,
            fatal_execute: false,
            tree_to_other_contract: false,
        }
    }

    fn result_for_amount(&self, amount: u64) -> SimulationResult {
        let full = (50..=200).contains(&amount);
        let dests: Vec<JumpDest> = if full {
            baseline_path().dests
        } else {
            baseline_path().dests[..2].to_vec()
        };
        let path = ExecPath::new(dests, protected());

        let mut storage_changes = BTreeMap::new();
        let mut slot = [0u8; 32];
        slot[31] = 1;
        let mut after = [0u8; 32];
        after[24..].copy_from_slice(&(amount / 10).to_be_bytes());
        storage_changes.insert(
            B256::from(slot),
            SlotChange {
                before: B256::ZERO,
                after: B256::from(after),
            },
        );
        let mut state_changes = BTreeMap::new();
        state_changes.insert(
            protected(),
            StateChange {
                balance_before: "0x64".to_string(),
                balance_after: "0x32".to_string(),
                storage_changes,
            },
        );

        SimulationResult {
            success: amount != 0,
            jump_dests: path.dests.iter().map(|d| d.pc).collect(),
            path,
            gas_used: 50_000,
            return_data: Vec::new(),
            state_changes,
        }
    }
}

impl Simulator for StubSimulator {
    fn fetch_transaction(&self, _tx_hash: &str) -> SimResult<TransactionInfo> {
        if self.fail_fetch {
            return Err(SimulationError::Rpc("not found".to_string()));
        }
        Ok(TransactionInfo {
            from: attacker(),
            to: protected(),
            value: U256::ZERO,
            input: withdraw_calldata(100),
            block_number: 123,
        })
    }

    fn build_state_override(&self, _tx_hash: &str) -> SimResult<StateOverride> {
        Ok(StateOverride::new())
    }

    fn replay_transaction_with_override(
        &self,
        _tx_hash: &str,
        _block: u64,
        _overrides: &StateOverride,
        _protected: Address,
    ) -> SimResult<SimulationResult> {
        Ok(self.result_for_amount(100))
    }

    fn trace_call_tree_with_override(
        &self,
        _tx_hash: &str,
        _block: u64,
        _overrides: &StateOverride,
    ) -> SimResult<CallFrame> {
        let to = if self.tree_to_other_contract {
            Address::repeat_byte(0xbb)
        } else {
            protected()
        };
        Ok(CallFrame {
            from: attacker(),
            to,
            value: U256::ZERO,
            input: withdraw_calldata(100),
            sub_calls: Vec::new(),
        })
    }

    fn simulate_with_calldata(
        &self,
        _from: Address,
        _to: Address,
        calldata: &[u8],
        _value: U256,
        _block: u64,
        _overrides: &StateOverride,
    ) -> SimResult<SimulationResult> {
        Ok(self.result_for_amount(amount_of(calldata).unwrap_or(0)))
    }

    fn execute_with_hooks(
        &self,
        call_tree: &CallFrame,
        _block: u64,
        _overrides: &StateOverride,
        hooks: &HashMap<Address, CallMutator>,
    ) -> SimResult<SimulationResult> {
        if self.fatal_execute {
            return Err(SimulationError::Rpc("connection refused".to_string()));
        }
        let input = hooks
            .get(&call_tree.to)
            .and_then(|mutator| mutator(call_tree))
            .unwrap_or_else(|| call_tree.input.clone());
        let amount = amount_of(&input).unwrap_or(0);
        let result = self.result_for_amount(amount);
        if !result.success {
            return Err(SimulationError::Revert("zero amount".to_string()));
        }
        Ok(result)
    }

    fn extract_all_call_snapshots(
        &self,
        _tx_hash: &str,
        _contract: Address,
    ) -> SimResult<Vec<CallSnapshot>> {
        Ok(Vec::new())
    }

    fn extract_snapshot_for_protected_call(
        &self,
        _tx_hash: &str,
        _contract: Address,
        _call_index: usize,
    ) -> SimResult<CallSnapshot> {
        Err(SimulationError::Other("no snapshot".to_string()))
    }

    fn build_state_override_from_snapshot(
        &self,
        base: &StateOverride,
        snapshot: &CallSnapshot,
    ) -> SimResult<StateOverride> {
        let mut merged = base.clone();
        warden_types::merge_overrides(&mut merged, &snapshot.overrides);
        Ok(merged)
    }

    fn get_code(&self, _address: Address, _block: u64) -> SimResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

fn test_config() -> warden_config::FuzzConfig {
    let mut config = warden_config::FuzzConfig::default();
    config.workers = 2;
    config.collector_threshold = 3;
    config.seed.max_variations = 300;
    config.seed.adaptive.enabled = false;
    config
}

fn session_with(config: warden_config::FuzzConfig, sim: StubSimulator) -> FuzzSession {
    let simulator: SimulatorHandle = Arc::new(sim);
    let catalogs = Arc::new(Catalogs::new(tempfile::tempdir().unwrap().into_path()));
    FuzzSession::new(config, simulator, catalogs).unwrap()
}

#[test]
fn test_session_produces_report_with_rules() {
    let mut session = session_with(test_config(), StubSimulator::healthy());
    let report = session.run("0xdead", protected(), 123).unwrap();

    assert_eq!(
        report.contract,
        format!("0x{}", hex::encode(protected().as_slice()))
    );
    assert_eq!(
        report.selector,
        format!("0x{}", hex::encode(withdraw_selector()))
    );
    assert!(report.statistics.total_tested > 0);
    assert!(report.statistics.valid > 0);
    assert_eq!(report.statistics.max_similarity, 1.0);

    // Enough distinct in-window amounts ran to aggregate constraints.
    assert!(!report.valid_parameters.is_empty());
    assert!(report.top_results.len() <= 100);
    assert!(!report.has_invariant_check);

    // param/state ratio is constant (amount / (amount/10)): a ratio rule
    // separates the attack region.
    assert!(!report.expression_rules.is_empty());
    assert_eq!(report.expression_rules[0].kind, "ratio");

    // Out-of-window amounts run only the attack prefix: below the Dice bar
    // but fully ordered against the baseline, so they export as candidates.
    assert!(!report.candidate_results.is_empty());
    for c in &report.candidate_results {
        assert!(c.overlap >= 0.8);
    }
}

#[test]
fn test_session_report_top_results_sorted() {
    let mut session = session_with(test_config(), StubSimulator::healthy());
    let report = session.run("0xdead", protected(), 123).unwrap();
    for pair in report.top_results.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
    }
}

#[test]
fn test_no_calls_to_protected() {
    let sim = StubSimulator {
        tree_to_other_contract: true,
        ..StubSimulator::healthy()
    };
    let mut session = session_with(test_config(), sim);
    let err = session.run("0xdead", protected(), 123).unwrap_err();
    assert!(matches!(err, SessionError::NoCallsToProtected));
}

#[test]
fn test_transaction_unavailable() {
    let sim = StubSimulator {
        fail_fetch: true,
        ..StubSimulator::healthy()
    };
    let mut session = session_with(test_config(), sim);
    let err = session.run("0xdead", protected(), 123).unwrap_err();
    assert!(matches!(err, SessionError::TransactionUnavailable(_)));
}

#[test]
fn test_fatal_rpc_cancels_session() {
    let sim = StubSimulator {
        fatal_execute: true,
        ..StubSimulator::healthy()
    };
    let mut session = session_with(test_config(), sim);
    let err = session.run("0xdead", protected(), 123).unwrap_err();
    assert!(matches!(err, SessionError::FatalRpc(_)));
}

#[test]
fn test_early_stop_still_reports() {
    let mut config = test_config();
    config.target_similarity = 0.95;
    config.max_high_sim_results = 1;
    let mut session = session_with(config, StubSimulator::healthy());
    let report = session.run("0xdead", protected(), 123).unwrap();
    assert!(report.statistics.valid >= 1);
}

struct HealthyInvariants;

impl InvariantChecker for HealthyInvariants {
    fn check(&self, _result: &SimulationResult) -> Result<Vec<String>, String> {
        Ok(Vec::new())
    }
}

struct BrokenEvaluator;

impl InvariantChecker for BrokenEvaluator {
    fn check(&self, _result: &SimulationResult) -> Result<Vec<String>, String> {
        Err("evaluator crashed".to_string())
    }
}

#[test]
fn test_healthy_invariants_filter_matches() {
    let mut config = test_config();
    config.enable_invariant_check = true;
    let mut session =
        session_with(config, StubSimulator::healthy()).with_invariant_checker(Arc::new(HealthyInvariants));
    let report = session.run("0xdead", protected(), 123).unwrap();

    // Paths matched but nothing bad happened: nothing is valid.
    assert_eq!(report.statistics.valid, 0);
    assert!(report.has_invariant_check);
    assert_eq!(report.violation_count, 0);
}

#[test]
fn test_broken_evaluator_falls_back_to_similarity() {
    let mut config = test_config();
    config.enable_invariant_check = true;
    let mut session =
        session_with(config, StubSimulator::healthy()).with_invariant_checker(Arc::new(BrokenEvaluator));
    let report = session.run("0xdead", protected(), 123).unwrap();
    assert!(report.statistics.valid > 0);
}

#[test]
fn test_adaptive_rounds_terminate() {
    let mut config = test_config();
    config.seed.adaptive.enabled = true;
    config.seed.adaptive.max_iterations = 3;
    let mut session = session_with(config, StubSimulator::healthy());
    let report = session.run("0xdead", protected(), 123).unwrap();
    assert!(report.statistics.valid > 0);
}
