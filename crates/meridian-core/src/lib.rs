//! Meridian Core - Identifiers and subscription primitives
//!
//! This crate provides the foundation the rest of the Meridian engine is built
//! on:
//!
//! - Identifiers: `AccountId`, `StoreAddress` - opaque ids for accounts and
//!   replicated stores
//! - Subscriptions: `Callback<T>`, `CancelHandle` - the `track(...) -> cancel`
//!   pair every live derivation is expressed with
//!
//! # Architecture
//!
//! Every "on event, call many listeners" relationship in Meridian is an
//! explicit `track(value_callback) -> CancelHandle` pair. Each subscription is
//! owned by exactly one caller and cancelled by that caller alone; there is no
//! ambient event bus. Cancellation handles are idempotent and cascade to every
//! descendant subscription registered on them.

pub mod cancel;
pub mod error;
pub mod identifiers;

pub use cancel::{Callback, CancelHandle};
pub use error::IdentifierError;
pub use identifiers::{AccountId, StoreAddress};
