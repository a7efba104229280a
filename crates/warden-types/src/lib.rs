// SPDX-License-Identifier: AGPL-3.0

//! Shared data model for the attack-analysis pipeline: decoded parameter
//! values and their Solidity types, call trees, execution paths, simulation
//! results, state overrides, and the synthesized rule artifacts.

pub mod frames;
pub mod hexnum;
pub mod rules;
pub mod sim;
pub mod value;

pub use frames::{CallFrame, ExecPath, JumpDest};
pub use rules::{
    ConstraintRule, ExpressionRule, LinearTerm, ParamConstraint, StateConstraint, TermKind,
};
pub use sim::{
    merge_overrides, AccountOverride, CallSnapshot, SimulationResult, SlotChange, StateChange,
    StateOverride,
};
pub use value::{parse_array_type, Parameter, SolType, Value};
