// SPDX-License-Identifier: AGPL-3.0

//! Synthesized rule artifacts emitted for the on-chain enforcement module.
//!
//! All big-int fields are hex text; signed quantities use the `-0x…` form
//! so the pusher never has to guess sign context.

use serde::{Deserialize, Serialize};

/// Per-parameter constraint: either a `[min, max]` range or a discrete
/// value set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamConstraint {
    pub index: u32,
    #[serde(rename = "type")]
    pub ty: String,
    pub is_range: bool,
    #[serde(default)]
    pub range_min_hex: String,
    #[serde(default)]
    pub range_max_hex: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Observed post-values for one storage slot of the protected contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateConstraint {
    pub slot: String,
    pub values: Vec<String>,
}

/// What a linear term multiplies: a call parameter or a storage slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum TermKind {
    Param {
        index: u32,
        #[serde(rename = "type")]
        ty: String,
    },
    State {
        slot: String,
    },
}

/// One term of a sparse linear inequality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearTerm {
    #[serde(flatten)]
    pub kind: TermKind,
    /// Signed hex coefficient.
    pub coeff: String,
}

/// A single ratio or linear inequality that attack inputs satisfy and safe
/// inputs do not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionRule {
    /// `"ratio"` or `"linear"`.
    pub kind: String,
    pub terms: Vec<LinearTerm>,
    /// Signed hex.
    pub threshold: String,
    /// Unsigned hex fixed-point scale.
    pub scale: String,
    pub confidence: f64,
    pub sample_count: usize,
    /// Signed hex; minimum slack of the inequality over recorded samples.
    pub min_margin: String,
    pub strategy: String,
}

/// The bundled per-function rule shipped on-chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintRule {
    pub contract: String,
    /// `0x` + 8 hex.
    pub selector: String,
    pub sample_count: usize,
    pub param_constraints: Vec<ParamConstraint>,
    pub state_constraints: Vec<StateConstraint>,
    pub similarity_trigger: f64,
    /// Unix seconds.
    pub generated_at: u64,
}
