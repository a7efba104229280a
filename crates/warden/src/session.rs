// SPDX-License-Identifier: AGPL-3.0

//! The per-transaction fuzzing session: baseline replay, target selection,
//! seed priming, round driving, and report assembly.

use crate::report::{
    merge_parameter_summaries, similarity_stats, top_candidates, top_results,
    AttackParameterReport, CandidateResult, ReportStatistics,
};
use crate::simulator::{InvariantChecker, SimulatorHandle};
use crate::workers::{run_round, CancelToken, RoundContext, SessionStats, ValidResult};
use alloy_primitives::Address;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use warden_abi::ContractAbi;
use warden_adaptive::{AdaptiveLoop, RunObservation};
use warden_collector::{ConstraintCollector, SafeThreshold};
use warden_config::{ConstraintRange, FuzzConfig};
use warden_exceptions::{InitError, SessionError, SessionResult, SimResult};
use warden_logs::FailureLog;
use warden_path::PathComparator;
use warden_seeds::{SeedGenerator, SimilarityFeedback, SymbolicSeed};
use warden_selector::{CallSelector, TargetDecision};
use warden_state::Catalogs;
use warden_types::{
    merge_overrides, CallFrame, ExecPath, Parameter, SimulationResult, StateOverride,
};

/// Function-name fragments that mark a call as sensitive: random seeds on
/// these almost always revert, so mutation is clamped around the original.
const SENSITIVE_NAME_FRAGMENTS: [&str; 3] = ["flash", "bond", "debond"];

fn is_sensitive_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    SENSITIVE_NAME_FRAGMENTS.iter().any(|f| lower.contains(f))
}

/// Initial retry backoff; doubles per attempt.
const FETCH_BACKOFF: [Duration; 3] = [
    Duration::from_millis(50),
    Duration::from_millis(100),
    Duration::from_millis(200),
];

fn retry<T>(mut op: impl FnMut() -> SimResult<T>) -> SimResult<T> {
    for backoff in FETCH_BACKOFF {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) => {
                tracing::debug!(error = %e, "fetch attempt failed, backing off");
                std::thread::sleep(backoff);
            }
        }
    }
    op()
}

/// One fuzzing session over a recorded malicious transaction. Owns all
/// per-session mutable state; workers borrow it for the duration of a round.
pub struct FuzzSession {
    config: FuzzConfig,
    simulator: SimulatorHandle,
    catalogs: Arc<Catalogs>,
    invariants: Option<Arc<dyn InvariantChecker>>,
    collector: ConstraintCollector,
    cancel: CancelToken,
    stats: SessionStats,
    failure_log: FailureLog,
    symbolic_seeds: Vec<SymbolicSeed>,
}

impl FuzzSession {
    pub fn new(
        config: FuzzConfig,
        simulator: SimulatorHandle,
        catalogs: Arc<Catalogs>,
    ) -> Result<Self, InitError> {
        warden_logs::init_tracing();
        config.validate()?;
        let collector =
            ConstraintCollector::new(config.collector_threshold, config.similarity_threshold);
        Ok(Self {
            config,
            simulator,
            catalogs,
            invariants: None,
            collector,
            cancel: CancelToken::new(),
            stats: SessionStats::default(),
            failure_log: FailureLog::default(),
            symbolic_seeds: Vec::new(),
        })
    }

    pub fn with_invariant_checker(mut self, checker: Arc<dyn InvariantChecker>) -> Self {
        self.invariants = Some(checker);
        self
    }

    /// Seeds from the external constraint extractor, fed before `run`.
    pub fn set_symbolic_seeds(&mut self, seeds: Vec<SymbolicSeed>) {
        self.symbolic_seeds = seeds;
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn collector(&self) -> &ConstraintCollector {
        &self.collector
    }

    /// Drive the whole pipeline for one transaction. Returns a populated
    /// report or a terminal error; partial progress is never returned.
    pub fn run(
        &mut self,
        tx_hash: &str,
        protected: Address,
        block: u64,
    ) -> SessionResult<AttackParameterReport> {
        let started = Instant::now();

        let simulator = self.simulator.clone();
        retry(|| simulator.fetch_transaction(tx_hash))
            .map_err(|e| SessionError::TransactionUnavailable(e.to_string()))?;

        let mut overrides = retry(|| simulator.build_state_override(tx_hash))
            .map_err(|e| SessionError::BaselineReplayFailed(e.to_string()))?;

        let baseline_run = simulator
            .replay_transaction_with_override(tx_hash, block, &overrides, protected)
            .map_err(|e| SessionError::BaselineReplayFailed(e.to_string()))?;
        if !baseline_run.success || baseline_run.path.is_empty() {
            return Err(SessionError::BaselineReplayFailed(
                "baseline produced no path".to_string(),
            ));
        }
        let baseline = baseline_run.path.clone();

        // Prestate-aware trace preferred; plain call tracer as fallback.
        let call_tree = match simulator.trace_call_tree_with_override(tx_hash, block, &overrides) {
            Ok(tree) => tree,
            Err(e) => {
                tracing::debug!(error = %e, "prestate trace failed, retrying without override");
                simulator
                    .trace_call_tree_with_override(tx_hash, block, &StateOverride::new())
                    .map_err(|e| SessionError::BaselineReplayFailed(e.to_string()))?
            }
        };

        let call_selector = CallSelector::new(
            protected,
            self.parsed_priority_selectors(),
            self.config.entry_call_protected_only,
        );
        let mut decision = call_selector.select(&call_tree, &baseline)?;

        if !decision.loop_baseline && !decision.entry_mode {
            self.probe_for_loop(&mut decision, &call_tree, &baseline, protected, block, &overrides);
        }

        // Decode the target calldata; a frame with no argument bytes
        // decodes to an empty parameter list.
        let (mut abi, mut parsed) = self.decode_target(&decision.frame);

        // An entry with nothing to mutate: warm the state with one plain
        // replay and fall back to the protected call.
        if decision.entry_mode && parsed.params.is_empty() {
            if let Ok(result) = simulator.simulate_with_calldata(
                call_tree.from,
                call_tree.to,
                &call_tree.input,
                call_tree.value,
                block,
                &overrides,
            ) {
                apply_post_state(&mut overrides, &result);
            }
            let protected_only =
                CallSelector::new(protected, self.parsed_priority_selectors(), true);
            decision = protected_only.select(&call_tree, &baseline)?;
            let (a, p) = self.decode_target(&decision.frame);
            abi = a;
            parsed = p;
        }
        let func = abi
            .as_ref()
            .and_then(|a| a.function_by_selector(&parsed.selector));
        let signature = func
            .map(|f| f.signature.clone())
            .unwrap_or_else(|| format!("0x{}", hex::encode(parsed.selector)));

        let mut generator = SeedGenerator::new(self.config.seed.clone());
        if self.config.seed.symbolic.enabled && !self.symbolic_seeds.is_empty() {
            generator.set_symbolic_seeds(self.symbolic_seeds.clone());
        }

        self.install_external_constraints(&mut generator, &signature, &decision);
        generator.merge_constraint_ranges(&signature, &parsed.params);

        let sensitive = self
            .config
            .sensitive_function_override
            .unwrap_or_else(|| is_sensitive_name(parsed.method.as_deref().unwrap_or(&signature)));
        if sensitive {
            tracing::debug!(%signature, "sensitive function, clamping seeds");
            generator.prime_sensitive(&parsed.params);
        }

        self.inject_known_state(&mut overrides, tx_hash, protected, &decision, block);

        let comparator = PathComparator::new(protected);
        let mut adaptive = AdaptiveLoop::new(self.config.seed.adaptive.clone());
        let mut all_results: Vec<ValidResult> = Vec::new();
        let mut feedback: Vec<SimilarityFeedback> = Vec::new();
        let mut early_stopped = false;
        let seen = std::sync::Mutex::new(std::collections::HashSet::new());
        let candidates = std::sync::Mutex::new(Vec::new());

        loop {
            let variants = if adaptive.iteration() == 0 {
                generator.generate(&parsed.params)
            } else {
                generator.generate_adaptive_round(&parsed.params, &feedback)
            };

            let ctx = RoundContext {
                config: &self.config,
                simulator: self.simulator.as_ref(),
                comparator,
                collector: &self.collector,
                invariants: self.invariants.as_deref(),
                protected,
                block,
                baseline: &baseline,
                decision: &decision,
                call_tree: &call_tree,
                params: &parsed.params,
                func,
                overrides: &overrides,
                cancel: &self.cancel,
                stats: &self.stats,
                failure_log: &self.failure_log,
                seen: &seen,
                candidates: &candidates,
            };
            let round_results = run_round(&ctx, variants)?;
            let new_valid = round_results.len();
            all_results.extend(round_results);

            if self.cancel.is_cancelled() {
                let (_, _, _, high) = self.stats.snapshot();
                early_stopped = self.config.max_high_sim_results > 0
                    && high as usize >= self.config.max_high_sim_results;
                break;
            }
            if !self.config.seed.adaptive.enabled {
                break;
            }

            let observations: Vec<RunObservation> = all_results
                .iter()
                .map(|r| RunObservation {
                    values: r.values.clone(),
                    similarity: r.similarity,
                })
                .collect();
            feedback = adaptive.analyze(&observations, &parsed.params);
            if let Some(reason) = adaptive.stop_reason(new_valid) {
                tracing::debug!(?reason, iteration = adaptive.iteration(), "adaptive loop done");
                break;
            }
            adaptive.advance();
        }

        if self.cancel.is_cancelled() && !early_stopped {
            return Err(SessionError::Cancelled);
        }

        let candidates = candidates.into_inner().unwrap();
        Ok(self.assemble_report(
            tx_hash,
            block,
            &decision,
            &parsed.params,
            parsed.selector,
            &all_results,
            &candidates,
            started,
        ))
    }

    fn parsed_priority_selectors(&self) -> Vec<[u8; 4]> {
        self.config
            .high_priority_selectors
            .iter()
            .filter_map(|s| {
                let digits = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(digits).ok()?;
                bytes.try_into().ok()
            })
            .collect()
    }

    fn decode_target(
        &self,
        frame: &CallFrame,
    ) -> (Option<Arc<ContractAbi>>, warden_abi::ParsedCall) {
        let abi = self.catalogs.abi_for(frame.to);
        let parsed = match warden_abi::parse(&frame.input, abi.as_deref()) {
            Ok(parsed) => parsed,
            Err(e) => {
                // Selector-less calldata still gets a (param-free) session.
                tracing::debug!(error = %e, "target calldata not parseable");
                warden_abi::ParsedCall {
                    selector: frame.selector().unwrap_or([0u8; 4]),
                    params: Vec::new(),
                    method: None,
                    abi_decoded: false,
                }
            }
        };
        (abi, parsed)
    }

    /// Single-call probe: a one-iteration run much shorter than the
    /// baseline's protected slice marks the attack as loop-shaped.
    fn probe_for_loop(
        &self,
        decision: &mut TargetDecision,
        call_tree: &CallFrame,
        baseline: &ExecPath,
        protected: Address,
        block: u64,
        overrides: &StateOverride,
    ) {
        let baseline_len = baseline.protected_slice(protected).len();
        if baseline_len == 0 {
            return;
        }
        let probe = self.simulator.simulate_with_calldata(
            decision.frame.from,
            decision.frame.to,
            &decision.frame.input,
            decision.frame.value,
            block,
            overrides,
        );
        let Ok(probe) = probe else { return };
        if !probe.success {
            return;
        }
        let probe_len = probe.path.protected_slice(protected).len();
        if probe_len * 2 < baseline_len {
            tracing::debug!(probe_len, baseline_len, "probe marks loop baseline");
            decision.loop_baseline = true;
            if call_tree.to != protected && !self.config.entry_call_protected_only {
                decision.frame = call_tree.clone();
                decision.call_index = 0;
                decision.entry_mode = true;
            }
        }
    }

    /// Feed `constraint_rules_v2.json` into the generator and the
    /// collector.
    fn install_external_constraints(
        &self,
        generator: &mut SeedGenerator,
        signature: &str,
        decision: &TargetDecision,
    ) {
        let rules = self.catalogs.constraint_rules();
        let Some(entries) = rules.lookup(signature) else {
            return;
        };
        let selector = decision.frame.selector().unwrap_or([0u8; 4]);

        for entry in entries {
            for value in &entry.attack_values {
                generator.add_attack_seed(entry.param_index, value.clone());
            }
            generator.insert_constraint_range(
                signature,
                entry.param_index,
                ConstraintRange {
                    attack_values: entry.attack_values.clone(),
                    safe_threshold: entry.safe_threshold.clone(),
                    danger_threshold: entry.danger_threshold.clone(),
                },
            );
            let variations =
                generator.generate_constraint_based_variations(signature, entry.param_index);
            for v in variations {
                generator.add_attack_seed(entry.param_index, v);
            }

            if let (Some(value), Some(is_safe_upper)) = (
                entry.safe_threshold.as_ref().and_then(|v| v.as_bigint()),
                entry.is_safe_upper,
            ) {
                self.collector.set_safe_threshold(
                    decision.frame.to,
                    selector,
                    SafeThreshold {
                        param_index: entry.param_index,
                        value,
                        is_safe_upper,
                    },
                );
            }
        }
    }

    /// Overlay a per-call snapshot (preferred) or the project's
    /// `attack_state.json`, then make sure every referenced account has
    /// runtime code.
    fn inject_known_state(
        &self,
        overrides: &mut StateOverride,
        tx_hash: &str,
        protected: Address,
        decision: &TargetDecision,
        block: u64,
    ) {
        let snapshot = self
            .simulator
            .extract_snapshot_for_protected_call(tx_hash, protected, decision.call_index)
            .ok();
        if let Some(snapshot) = snapshot {
            if let Ok(merged) = self
                .simulator
                .build_state_override_from_snapshot(overrides, &snapshot)
            {
                *overrides = merged;
            }
        } else {
            let project_id = format!("0x{}", hex::encode(protected.as_slice()));
            if let Some(state) = self.catalogs.attack_state(&project_id) {
                merge_overrides(overrides, &state);
            }
        }

        let missing: Vec<Address> = overrides
            .iter()
            .filter(|(_, acc)| !acc.has_code())
            .map(|(addr, _)| *addr)
            .collect();
        for addr in missing {
            if let Ok(code) = self.simulator.get_code(addr, block) {
                if !code.is_empty() {
                    if let Some(acc) = overrides.get_mut(&addr) {
                        acc.code = Some(code);
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble_report(
        &self,
        tx_hash: &str,
        block: u64,
        decision: &TargetDecision,
        params: &[Parameter],
        selector: [u8; 4],
        results: &[ValidResult],
        candidates: &[CandidateResult],
        started: Instant,
    ) -> AttackParameterReport {
        let target = decision.frame.to;
        let rule = self.collector.get_rule(target, selector);
        let expression = self.collector.get_expression_rule(target, selector);
        let (tested, valid, failed, _) = self.stats.snapshot();
        let (avg, max, min) = similarity_stats(results);
        let violation_count = results.iter().map(|r| r.violations).sum();

        AttackParameterReport {
            contract: format!("0x{}", hex::encode(target.as_slice())),
            selector: warden_hashes::selector_hex(&selector),
            tx_hash: tx_hash.to_string(),
            block_number: block,
            generated_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            valid_parameters: merge_parameter_summaries(rule.as_ref(), params, results),
            expression_rules: expression.into_iter().collect(),
            statistics: ReportStatistics {
                total_tested: tested,
                valid,
                failed,
                avg_similarity: avg,
                max_similarity: max,
                min_similarity: min,
                execution_time_ms: started.elapsed().as_millis() as u64,
            },
            top_results: top_results(results, self.config.top_results),
            candidate_results: top_candidates(candidates, self.config.top_results),
            has_invariant_check: self.config.enable_invariant_check && self.invariants.is_some(),
            violation_count,
        }
    }
}

/// Fold a run's observed post-state back into an override set, so later
/// variants start from the warmed state.
fn apply_post_state(overrides: &mut StateOverride, result: &SimulationResult) {
    for (addr, change) in &result.state_changes {
        let acc = overrides.entry(*addr).or_default();
        if let Some(balance) = warden_types::hexnum::parse_bigint(&change.balance_after) {
            let (_, mag) = balance.into_parts();
            let bytes = mag.to_bytes_be();
            if bytes.len() <= 32 {
                let mut word = [0u8; 32];
                word[32 - bytes.len()..].copy_from_slice(&bytes);
                acc.balance = Some(alloy_primitives::U256::from_be_bytes(word));
            }
        }
        let slots = acc.storage.get_or_insert_with(Default::default);
        for (slot, slot_change) in &change.storage_changes {
            slots.insert(*slot, slot_change.after);
        }
    }
}
