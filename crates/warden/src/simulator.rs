// SPDX-License-Identifier: AGPL-3.0

//! The simulator capability: replay, prestate construction, hooked
//! execution, and snapshot extraction are provided by an external engine
//! behind this trait.

use alloy_primitives::{Address, U256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use warden_exceptions::SimResult;
use warden_types::{CallFrame, CallSnapshot, SimulationResult, StateOverride};

/// Replaces a frame's calldata before it executes; `None` keeps the
/// original bytes.
pub type CallMutator = Arc<dyn Fn(&CallFrame) -> Option<Vec<u8>> + Send + Sync>;

/// Summary of a fetched transaction.
#[derive(Debug, Clone)]
pub struct TransactionInfo {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub input: Vec<u8>,
    pub block_number: u64,
}

/// Opaque replay/simulation engine. Implementations talk to an archive node
/// or an embedded EVM; the analysis core never sees either directly.
pub trait Simulator {
    fn fetch_transaction(&self, tx_hash: &str) -> SimResult<TransactionInfo>;

    /// Per-account prestate touched by the transaction.
    fn build_state_override(&self, tx_hash: &str) -> SimResult<StateOverride>;

    /// Replay the original transaction against the prestate and produce the
    /// baseline path. The returned path carries `protected_start_index`.
    fn replay_transaction_with_override(
        &self,
        tx_hash: &str,
        block: u64,
        overrides: &StateOverride,
        protected: Address,
    ) -> SimResult<SimulationResult>;

    /// Root call frame plus recursive sub-calls.
    fn trace_call_tree_with_override(
        &self,
        tx_hash: &str,
        block: u64,
        overrides: &StateOverride,
    ) -> SimResult<CallFrame>;

    /// Simulate a single call with explicit calldata.
    fn simulate_with_calldata(
        &self,
        from: Address,
        to: Address,
        calldata: &[u8],
        value: U256,
        block: u64,
        overrides: &StateOverride,
    ) -> SimResult<SimulationResult>;

    /// Execute a recorded call tree, letting hooks rewrite the calldata of
    /// frames addressed to hooked contracts.
    fn execute_with_hooks(
        &self,
        call_tree: &CallFrame,
        block: u64,
        overrides: &StateOverride,
        hooks: &HashMap<Address, CallMutator>,
    ) -> SimResult<SimulationResult>;

    fn extract_all_call_snapshots(
        &self,
        tx_hash: &str,
        contract: Address,
    ) -> SimResult<Vec<CallSnapshot>>;

    fn extract_snapshot_for_protected_call(
        &self,
        tx_hash: &str,
        contract: Address,
        call_index: usize,
    ) -> SimResult<CallSnapshot>;

    fn build_state_override_from_snapshot(
        &self,
        base: &StateOverride,
        snapshot: &CallSnapshot,
    ) -> SimResult<StateOverride>;

    /// Runtime code of an account, for populating injected state.
    fn get_code(&self, address: Address, block: u64) -> SimResult<Vec<u8>>;
}

/// Shared handle workers clone.
pub type SimulatorHandle = Arc<dyn Simulator + Send + Sync>;

/// Serializes access to a simulator that is not itself thread-safe.
pub struct MutexSimulator<S> {
    inner: Mutex<S>,
}

impl<S> MutexSimulator<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }
}

impl<S: Simulator + Send> Simulator for MutexSimulator<S> {
    fn fetch_transaction(&self, tx_hash: &str) -> SimResult<TransactionInfo> {
        self.inner.lock().unwrap().fetch_transaction(tx_hash)
    }

    fn build_state_override(&self, tx_hash: &str) -> SimResult<StateOverride> {
        self.inner.lock().unwrap().build_state_override(tx_hash)
    }

    fn replay_transaction_with_override(
        &self,
        tx_hash: &str,
        block: u64,
        overrides: &StateOverride,
        protected: Address,
    ) -> SimResult<SimulationResult> {
        self.inner
            .lock()
            .unwrap()
            .replay_transaction_with_override(tx_hash, block, overrides, protected)
    }

    fn trace_call_tree_with_override(
        &self,
        tx_hash: &str,
        block: u64,
        overrides: &StateOverride,
    ) -> SimResult<CallFrame> {
        self.inner
            .lock()
            .unwrap()
            .trace_call_tree_with_override(tx_hash, block, overrides)
    }

    fn simulate_with_calldata(
        &self,
        from: Address,
        to: Address,
        calldata: &[u8],
        value: U256,
        block: u64,
        overrides: &StateOverride,
    ) -> SimResult<SimulationResult> {
        self.inner
            .lock()
            .unwrap()
            .simulate_with_calldata(from, to, calldata, value, block, overrides)
    }

    fn execute_with_hooks(
        &self,
        call_tree: &CallFrame,
        block: u64,
        overrides: &StateOverride,
        hooks: &HashMap<Address, CallMutator>,
    ) -> SimResult<SimulationResult> {
        self.inner
            .lock()
            .unwrap()
            .execute_with_hooks(call_tree, block, overrides, hooks)
    }

    fn extract_all_call_snapshots(
        &self,
        tx_hash: &str,
        contract: Address,
    ) -> SimResult<Vec<CallSnapshot>> {
        self.inner
            .lock()
            .unwrap()
            .extract_all_call_snapshots(tx_hash, contract)
    }

    fn extract_snapshot_for_protected_call(
        &self,
        tx_hash: &str,
        contract: Address,
        call_index: usize,
    ) -> SimResult<CallSnapshot> {
        self.inner
            .lock()
            .unwrap()
            .extract_snapshot_for_protected_call(tx_hash, contract, call_index)
    }

    fn build_state_override_from_snapshot(
        &self,
        base: &StateOverride,
        snapshot: &CallSnapshot,
    ) -> SimResult<StateOverride> {
        self.inner
            .lock()
            .unwrap()
            .build_state_override_from_snapshot(base, snapshot)
    }

    fn get_code(&self, address: Address, block: u64) -> SimResult<Vec<u8>> {
        self.inner.lock().unwrap().get_code(address, block)
    }
}

/// Evaluates protocol invariants over a post-state; opaque to the core.
pub trait InvariantChecker: Send + Sync {
    /// Human-readable violations for the post-state, empty when the state
    /// is healthy.
    fn check(&self, result: &SimulationResult) -> Result<Vec<String>, String>;
}
