//! Store error types

use meridian_core::StoreAddress;
use thiserror::Error;

/// Errors from store operations.
///
/// Transient unavailability of a replicated store is expected in a partial
/// network; trackers translate it into a subscription that simply never
/// reports, rather than failing their consumer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The address does not name a store currently reachable on this peer.
    #[error("store {address} is not available")]
    Unavailable {
        /// The unreachable address
        address: StoreAddress,
    },

    /// The handle was already closed.
    #[error("handle for store {address} is closed")]
    HandleClosed {
        /// The address the handle pointed at
        address: StoreAddress,
    },
}

impl StoreError {
    /// Create an unavailable-store error.
    pub fn unavailable(address: StoreAddress) -> Self {
        Self::Unavailable { address }
    }

    /// Create a closed-handle error.
    pub fn handle_closed(address: StoreAddress) -> Self {
        Self::HandleClosed { address }
    }
}
