//! Meridian Search - adaptive search over the peer network
//!
//! Produces a continuously updated, descending-sorted, length-bounded result
//! list drawn from the open-ended account population, without materializing
//! it: trust propagation bounds the population to accounts reachable within
//! the current exploration depth, and a feedback loop widens or narrows that
//! depth based on whether the deepest explored tiers still contribute
//! accepted results.

pub mod candidate;
pub mod search;

mod depth;

pub use candidate::{mean_combiner, rank, CandidateScore, ScoreCombiner, SearchResult};
pub use search::{NetworkSearch, ScoreTracker, SearchConfig};
