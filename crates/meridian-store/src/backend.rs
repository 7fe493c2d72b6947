//! The consumed store interface

use crate::error::StoreError;
use meridian_core::{Callback, CancelHandle, StoreAddress};

/// Decoded content of a store.
///
/// Stores hold structured records; the engine sees them as JSON values and
/// decodes them into typed values at the tracking layer.
pub type StoreValue = serde_json::Value;

/// Handle to one open store.
///
/// Handles are cheap to clone; each `open` yields a distinct handle id so a
/// backend can tell concurrent openers apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreHandle {
    address: StoreAddress,
    id: u64,
}

impl StoreHandle {
    /// Create a handle. Backends call this; consumers only receive handles.
    pub fn new(address: StoreAddress, id: u64) -> Self {
        Self { address, id }
    }

    /// The address this handle points at.
    pub fn address(&self) -> &StoreAddress {
        &self.address
    }

    /// The backend-assigned open id.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// The replicated-store collaborator.
///
/// Implementations must serialize concurrent opens of the same address: an
/// open-in-progress for address `A` must not race a second open of `A`.
/// Change notifications fire for both local writes and incoming replication.
pub trait StoreBackend: Send + Sync + 'static {
    /// Open the store at `address`.
    fn open(&self, address: &StoreAddress) -> Result<StoreHandle, StoreError>;

    /// Read the current decoded content.
    fn read_all(&self, handle: &StoreHandle) -> Result<StoreValue, StoreError>;

    /// Register a change listener. The callback receives the new content on
    /// every mutation; it is not replayed on registration (the tracking layer
    /// does the initial replay).
    fn on_change(&self, handle: &StoreHandle, callback: Callback<StoreValue>) -> CancelHandle;

    /// Release one open handle.
    fn close(&self, handle: StoreHandle);
}
