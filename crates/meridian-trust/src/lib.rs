//! Meridian Trust - confidence over the account graph
//!
//! Every account emits an explicit relation list: trust markers, blocks,
//! shared favorites and co-authorship records. This crate turns those lists
//! into a live confidence score in `[-1, 1]` for every account reachable
//! within a bounded number of hops from an origin:
//!
//! - `TrustEdge` / `RelationKind` / `RelationWeights`: the relation model
//! - `TrustPropagation`: live propagation with incremental relation
//!   subscriptions and a runtime-changeable depth bound
//! - `relations_from_stores`: adapter from store-held relation lists to the
//!   tracker shape propagation consumes
//!
//! Confidence feeds network search twice over: membership (non-blocked
//! accounts in range) and the per-candidate confidence sub-score.

pub mod adapter;
pub mod edge;
pub mod propagation;

pub use adapter::relations_from_stores;
pub use edge::{RelationKind, RelationWeights, TrustConfig, TrustEdge};
pub use propagation::{
    AccountStanding, ConfidenceRecord, RelationsTracker, TrustPropagation,
};
