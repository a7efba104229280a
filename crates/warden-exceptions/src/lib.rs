// SPDX-License-Identifier: AGPL-3.0

//! Error types for the offline attack-analysis pipeline.
//!
//! Session construction and session execution fail with distinct enums so
//! callers can tell a configuration problem from a mid-run failure. Anything
//! that happens to a single variant (revert, timeout, remote hiccup) is not
//! an error at this level: workers count and drop those.

use thiserror::Error;

/// Errors surfaced at session creation time.
#[derive(Error, Debug)]
pub enum InitError {
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    #[error("Simulator unavailable: {0}")]
    SimulatorUnavailable(String),

    #[error("ABI parse failure: {0}")]
    AbiParseFailure(String),
}

/// Terminal outcomes of a fuzzing session. Partial progress is never
/// returned; the caller retries on any of these.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No calls to the protected contract in the transaction")]
    NoCallsToProtected,

    #[error("Transaction unavailable: {0}")]
    TransactionUnavailable(String),

    #[error("Baseline replay failed: {0}")]
    BaselineReplayFailed(String),

    #[error("Session cancelled")]
    Cancelled,

    #[error("Fatal RPC failure: {0}")]
    FatalRpc(String),

    #[error(transparent)]
    Init(#[from] InitError),
}

/// Failure of a single simulation. Non-fatal variants are dropped by the
/// worker; fatal ones cancel the whole session.
#[derive(Error, Debug, Clone)]
pub enum SimulationError {
    #[error("Execution reverted: {0}")]
    Revert(String),

    #[error("Simulation timed out")]
    Timeout,

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Simulation failed: {0}")]
    Other(String),
}

impl SimulationError {
    /// Whether this failure should tear down the session rather than skip
    /// the variant.
    pub fn is_fatal(&self) -> bool {
        match self {
            SimulationError::Rpc(msg) | SimulationError::Other(msg) => is_fatal_rpc_message(msg),
            _ => false,
        }
    }
}

/// Calldata parsing and re-encoding errors. Decode failures downgrade to the
/// heuristic layout; encode failures drop the variant.
#[derive(Error, Debug, Clone)]
pub enum AbiError {
    #[error("Malformed calldata: {0}")]
    Malformed(String),

    #[error("Selector {0} not found in ABI")]
    SelectorNotFound(String),

    #[error("Unsupported type: {0}")]
    TypeParse(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Encode failed: {0}")]
    Encode(String),
}

pub type SessionResult<T> = Result<T, SessionError>;
pub type SimResult<T> = Result<T, SimulationError>;
pub type AbiResult<T> = Result<T, AbiError>;

/// Message patterns that indicate the RPC endpoint is gone for good.
const FATAL_RPC_PATTERNS: [&str; 4] = [
    "connection refused",
    "EOF",
    "connection reset",
    "context canceled",
];

/// Classify an error message as a fatal transport failure.
pub fn is_fatal_rpc_message(msg: &str) -> bool {
    FATAL_RPC_PATTERNS.iter().any(|p| msg.contains(p))
}
