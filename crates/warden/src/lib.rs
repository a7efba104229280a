// SPDX-License-Identifier: AGPL-3.0

//! Offline analysis core of the smart-contract firewall.
//!
//! Given a recorded malicious transaction against a protected contract, a
//! [`FuzzSession`] explores nearby calldata variants, scores their execution
//! paths against the attack baseline, and synthesizes parameter and state
//! constraints for the on-chain enforcement module.

pub mod report;
pub mod session;
pub mod simulator;
pub mod workers;

pub use report::{AttackParameterReport, CandidateResult, ReportStatistics, TopResult};
pub use session::FuzzSession;
pub use simulator::{
    CallMutator, InvariantChecker, MutexSimulator, Simulator, SimulatorHandle, TransactionInfo,
};
pub use workers::{CancelToken, SessionStats, ValidResult};
