//! Meridian Store - the replicated-store collaborator seam
//!
//! The derivation engine consumes replicated stores through a narrow
//! interface: open an address, read the current decoded content, be notified
//! on change, close. The physical store (append, CRDT merge, peer transport)
//! lives behind this seam and is out of scope here.
//!
//! This crate provides:
//!
//! - `StoreBackend`: the consumed interface (`open`/`read_all`/`on_change`/
//!   `close`)
//! - `MemoryBackend`: a reference backend for tests and embedding, with
//!   serialized opens and per-store change listeners
//! - `ValueTracker`: the tracked-value primitive - reference-counted shared
//!   opens, initial replay, decode-and-forward on every change
//!
//! # Visibility assumptions
//!
//! The engine assumes read-after-write visibility for local writes and
//! eventual convergence for remote writes. It performs no conflict resolution
//! itself; whatever `read_all` returns is "the current content".

pub mod backend;
pub mod error;
pub mod memory;
pub mod tracker;

pub use backend::{StoreBackend, StoreHandle, StoreValue};
pub use error::StoreError;
pub use memory::MemoryBackend;
pub use tracker::ValueTracker;
