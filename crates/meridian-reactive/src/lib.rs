//! Meridian Reactive - the live-derivation combinators
//!
//! Every higher-level feature of the platform (profiles, datasets, swarms,
//! search) is an instance of "continuously compute value V from a dynamically
//! changing set of distributed, asynchronously-updating sources". This crate
//! provides the combinators those features are written with:
//!
//! - `track_derived_from_list`: the central combinator - one live branch per
//!   item of an evolving root list, reduced into a single emitted value
//! - `track_derived_from_optional_target`: at-most-one dereference - re-points
//!   a nested subscription as the target address changes
//! - `track_filtered_list`: the subset of root items whose live boolean
//!   predicate currently holds
//! - `SharedTrackerCache`: opt-in, value-keyed, reference-counted sharing of
//!   one subscription tree between concurrent consumers
//!
//! # Concurrency model
//!
//! Each combinator instance serializes its own snapshot-diff / rebuild /
//! reduce sequence: a root notification arriving while another is being
//! processed is queued, never interleaved. Emissions of one instance are
//! ordered relative to the diff passes that produced them; across instances
//! there is no ordering guarantee. A cancelled branch never emits again, even
//! if its underlying notification was already in flight.

pub mod filter;
pub mod list;
pub mod memo;
pub mod target;

pub use filter::{track_filtered_list, PredicateTracker};
pub use list::{
    display_code, flatten_dedup, track_derived_from_list, BranchTracker, CodeFn, ReduceFn,
};
pub use memo::SharedTrackerCache;
pub use target::track_derived_from_optional_target;
