//! Trust relations
//!
//! An account's relation store holds the `TrustEdge`s it emits: explicit
//! trust markers, blocks, shared favorites and shared co-authorship of the
//! platform's object categories. Each kind carries a fixed weight; weights
//! combine per account pair during propagation, they are never simply summed.

use meridian_core::AccountId;
use serde::{Deserialize, Serialize};

/// The relation categories an account can emit.
///
/// Closed set: adding a category is a compile-time-checked change at every
/// weight and propagation switch point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Explicit "I trust this account" marker.
    ExplicitTrust,
    /// Hard block.
    Block,
    /// Both accounts favorited the same object.
    SharedFavorite,
    CoAuthoredDataset,
    CoAuthoredVariable,
    CoAuthoredKeyword,
    CoAuthoredSwarm,
    CoAuthoredProject,
}

/// Weight per relation kind, in `[-1, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelationWeights {
    pub explicit_trust: f64,
    pub block: f64,
    pub shared_favorite: f64,
    pub co_authored_dataset: f64,
    pub co_authored_variable: f64,
    pub co_authored_keyword: f64,
    pub co_authored_swarm: f64,
    pub co_authored_project: f64,
}

impl Default for RelationWeights {
    fn default() -> Self {
        Self {
            explicit_trust: 1.0,
            block: -1.0,
            shared_favorite: 0.2,
            co_authored_dataset: 0.3,
            co_authored_variable: 0.15,
            co_authored_keyword: 0.1,
            co_authored_swarm: 0.3,
            co_authored_project: 0.25,
        }
    }
}

impl RelationWeights {
    pub fn weight_of(&self, kind: RelationKind) -> f64 {
        match kind {
            RelationKind::ExplicitTrust => self.explicit_trust,
            RelationKind::Block => self.block,
            RelationKind::SharedFavorite => self.shared_favorite,
            RelationKind::CoAuthoredDataset => self.co_authored_dataset,
            RelationKind::CoAuthoredVariable => self.co_authored_variable,
            RelationKind::CoAuthoredKeyword => self.co_authored_keyword,
            RelationKind::CoAuthoredSwarm => self.co_authored_swarm,
            RelationKind::CoAuthoredProject => self.co_authored_project,
        }
    }
}

/// Propagation parameters. Empirically chosen defaults, all overridable.
#[derive(Debug, Clone, PartialEq)]
pub struct TrustConfig {
    /// Multiplicative weight decay per hop away from the origin.
    pub attenuation: f64,
    pub weights: RelationWeights,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            attenuation: 0.8,
            weights: RelationWeights::default(),
        }
    }
}

/// A directed relation one account emits about another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrustEdge {
    pub from: AccountId,
    pub to: AccountId,
    pub kind: RelationKind,
}

impl TrustEdge {
    pub fn new(from: AccountId, to: AccountId, kind: RelationKind) -> Self {
        Self { from, to, kind }
    }

    pub fn weight(&self, weights: &RelationWeights) -> f64 {
        weights.weight_of(self.kind)
    }
}
