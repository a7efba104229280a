// SPDX-License-Identifier: AGPL-3.0

//! The variant worker pool: a producer thread feeds a bounded channel, a
//! fixed set of OS-thread workers simulates, scores, and records.

use crate::report::CandidateResult;
use crate::simulator::{CallMutator, InvariantChecker, Simulator};
use alloy_primitives::Address;
use crossbeam_channel::bounded;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use warden_abi::AbiFunction;
use warden_collector::ConstraintCollector;
use warden_config::FuzzConfig;
use warden_exceptions::{SessionError, SessionResult};
use warden_logs::FailureLog;
use warden_path::PathComparator;
use warden_seeds::VariantStream;
use warden_selector::TargetDecision;
use warden_types::{CallFrame, ExecPath, Parameter, SimulationResult, StateOverride, Value};

/// Cooperative cancellation shared by the producer, every worker, and the
/// adaptive loop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cumulative counters across all rounds of a session.
#[derive(Debug, Default)]
pub struct SessionStats {
    pub tested: AtomicU32,
    pub valid: AtomicU32,
    pub failed: AtomicU32,
    pub high_sim: AtomicU32,
}

impl SessionStats {
    pub fn snapshot(&self) -> (u32, u32, u32, u32) {
        (
            self.tested.load(Ordering::Relaxed),
            self.valid.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.high_sim.load(Ordering::Relaxed),
        )
    }
}

/// One variant that executed and scored above the validity threshold.
#[derive(Debug, Clone)]
pub struct ValidResult {
    pub values: Vec<Value>,
    pub similarity: f64,
    pub gas_used: u64,
    pub violations: usize,
}

/// Best path seen within the current diagnostics batch.
#[derive(Debug, Default)]
struct BatchBest {
    best_similarity: f64,
    best_path_len: usize,
}

/// Everything a round of workers needs, borrowed from the session.
pub struct RoundContext<'a> {
    pub config: &'a FuzzConfig,
    pub simulator: &'a (dyn Simulator + Send + Sync),
    pub comparator: PathComparator,
    pub collector: &'a ConstraintCollector,
    pub invariants: Option<&'a (dyn InvariantChecker + 'a)>,
    pub protected: Address,
    pub block: u64,
    pub baseline: &'a ExecPath,
    pub decision: &'a TargetDecision,
    pub call_tree: &'a CallFrame,
    pub params: &'a [Parameter],
    pub func: Option<&'a AbiFunction>,
    pub overrides: &'a StateOverride,
    pub cancel: &'a CancelToken,
    pub stats: &'a SessionStats,
    pub failure_log: &'a FailureLog,
    /// Fingerprints of tuples already tested this session, across rounds.
    pub seen: &'a Mutex<HashSet<u64>>,
    /// Off-band candidates accumulated across rounds.
    pub candidates: &'a Mutex<Vec<CandidateResult>>,
}

impl<'a> RoundContext<'a> {
    fn selector(&self) -> [u8; 4] {
        self.decision.frame.selector().unwrap_or([0u8; 4])
    }

    /// Score a candidate run against the baseline.
    fn score(&self, result: &SimulationResult) -> f64 {
        if self.decision.loop_baseline {
            let candidate = result.path.protected_slice(self.protected);
            self.comparator.compare_loop(self.baseline, candidate)
        } else {
            self.comparator.compare_paths(self.baseline, &result.path)
        }
    }
}

/// Run one round of variants through the worker pool. Returns the valid
/// results of this round; counters accumulate on the shared stats.
pub fn run_round(ctx: &RoundContext<'_>, variants: VariantStream) -> SessionResult<Vec<ValidResult>> {
    let workers = ctx.config.workers.max(1);
    let (tx, rx) = bounded::<Vec<Value>>(2 * workers);

    let results: Mutex<Vec<ValidResult>> = Mutex::new(Vec::new());
    let fatal: Mutex<Option<String>> = Mutex::new(None);
    let batch_best: Mutex<BatchBest> = Mutex::new(BatchBest::default());
    let timeout = Duration::from_millis(ctx.config.timeout_per_simulation_ms);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for tuple in variants {
                if ctx.cancel.is_cancelled() {
                    break;
                }
                if tx.send(tuple).is_err() {
                    break;
                }
            }
            drop(tx);
        });

        for _ in 0..workers {
            let rx = rx.clone();
            scope.spawn(|| {
                let rx = rx;
                while let Ok(tuple) = rx.recv() {
                    if ctx.cancel.is_cancelled() {
                        break;
                    }
                    run_variant(ctx, tuple, timeout, &results, &fatal, &batch_best);
                }
            });
        }
        drop(rx);
    });

    if let Some(msg) = fatal.lock().unwrap().take() {
        return Err(SessionError::FatalRpc(msg));
    }
    Ok(results.into_inner().unwrap())
}

fn run_variant(
    ctx: &RoundContext<'_>,
    tuple: Vec<Value>,
    timeout: Duration,
    results: &Mutex<Vec<ValidResult>>,
    fatal: &Mutex<Option<String>>,
    batch_best: &Mutex<BatchBest>,
) {
    let fingerprint =
        warden_hashes::variant_fingerprint(tuple.iter().map(|v| v.canonical_string()));
    if !ctx.seen.lock().unwrap().insert(fingerprint) {
        return;
    }
    let tested = ctx.stats.tested.fetch_add(1, Ordering::SeqCst) + 1;

    // A variant that no longer fits the declared types after mutation is
    // dropped rather than re-encoded heuristically.
    let calldata = match warden_abi::encode(ctx.selector(), &tuple, ctx.func) {
        Ok(calldata) => calldata,
        Err(e) => {
            ctx.stats.failed.fetch_add(1, Ordering::Relaxed);
            ctx.failure_log.record(&format!("re-encode failed: {}", e));
            return;
        }
    };

    let target = ctx.decision.frame.to;
    let target_selector = ctx.selector();
    let mutated: Arc<Vec<u8>> = Arc::new(calldata);
    let hook_calldata = mutated.clone();
    let mutator: CallMutator = Arc::new(move |frame: &CallFrame| {
        if frame.to == target && frame.selector() == Some(target_selector) {
            Some(hook_calldata.as_ref().clone())
        } else {
            None
        }
    });
    let mut hooks: HashMap<Address, CallMutator> = HashMap::new();
    hooks.insert(target, mutator);

    let started = Instant::now();
    let outcome = ctx
        .simulator
        .execute_with_hooks(ctx.call_tree, ctx.block, ctx.overrides, &hooks);
    let elapsed = started.elapsed();

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            if e.is_fatal() {
                *fatal.lock().unwrap() = Some(e.to_string());
                ctx.cancel.cancel();
            } else {
                ctx.stats.failed.fetch_add(1, Ordering::Relaxed);
                ctx.failure_log.record(&format!("simulation failed: {}", e));
            }
            return;
        }
    };
    if elapsed > timeout {
        ctx.stats.failed.fetch_add(1, Ordering::Relaxed);
        ctx.failure_log.record("simulation exceeded soft timeout");
        return;
    }
    if !result.success {
        ctx.stats.failed.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let similarity = ctx.score(&result);
    update_batch_best(ctx, tested, similarity, result.path.len(), batch_best);

    if similarity < ctx.config.similarity_threshold {
        record_candidate(ctx, &tuple, &result);
        return;
    }

    // A matching path with a healthy post-state is not an attack variant.
    let mut violations = 0usize;
    if ctx.config.enable_invariant_check {
        if let Some(checker) = ctx.invariants {
            match checker.check(&result) {
                Ok(found) if found.is_empty() => return,
                Ok(found) => violations = found.len(),
                Err(e) => {
                    ctx.failure_log
                        .record(&format!("invariant evaluator failed: {}", e));
                }
            }
        }
    }

    ctx.stats.valid.fetch_add(1, Ordering::SeqCst);

    let sample_params: Vec<Parameter> = ctx
        .params
        .iter()
        .zip(&tuple)
        .map(|(p, v)| {
            let mut out = p.clone();
            out.value = v.clone();
            out
        })
        .collect();
    let state_changes = result
        .changed_slots(ctx.protected)
        .into_iter()
        .collect();
    ctx.collector.record_sample(
        target_of(ctx),
        target_selector,
        sample_params,
        state_changes,
        similarity,
    );

    results.lock().unwrap().push(ValidResult {
        values: tuple,
        similarity,
        gas_used: result.gas_used,
        violations,
    });

    if ctx.config.target_similarity > 0.0
        && ctx.config.max_high_sim_results > 0
        && similarity >= ctx.config.target_similarity
    {
        let high = ctx.stats.high_sim.fetch_add(1, Ordering::SeqCst) + 1;
        if high as usize >= ctx.config.max_high_sim_results {
            tracing::debug!(high, "early-stop threshold reached");
            ctx.cancel.cancel();
        }
    }
}

fn target_of(ctx: &RoundContext<'_>) -> Address {
    ctx.decision.frame.to
}

/// A variant below the Dice threshold can still track the attack prefix in
/// order: when its overlap with the baseline clears the same bar, it is
/// kept as an off-band candidate for the report.
fn record_candidate(ctx: &RoundContext<'_>, tuple: &[Value], result: &SimulationResult) {
    let base = ctx.baseline.protected_slice(ctx.protected);
    let candidate = result.path.protected_slice(ctx.protected);
    let ov = warden_path::overlap(base, candidate);
    if ov < ctx.config.similarity_threshold {
        return;
    }
    let mut candidates = ctx.candidates.lock().unwrap();
    if candidates.len() < ctx.config.top_results {
        candidates.push(CandidateResult {
            overlap: ov,
            gas_used: result.gas_used,
            values: tuple.to_vec(),
        });
    }
}

fn update_batch_best(
    ctx: &RoundContext<'_>,
    tested: u32,
    similarity: f64,
    path_len: usize,
    batch_best: &Mutex<BatchBest>,
) {
    let batch = ctx.config.batch_size.max(1) as u32;
    let mut best = batch_best.lock().unwrap();
    if similarity > best.best_similarity {
        best.best_similarity = similarity;
        best.best_path_len = path_len;
    }
    if tested % batch == 0 {
        tracing::debug!(
            tested,
            best_similarity = best.best_similarity,
            best_path_len = best.best_path_len,
            "batch summary"
        );
        *best = BatchBest::default();
    }
}
