//! Cancellation handles for live subscriptions
//!
//! Every tracking operation in Meridian returns a `CancelHandle`. Calling
//! `cancel` more than once is a no-op, and cancelling a handle runs every
//! teardown registered on it, which is how a combinator cascades cancellation
//! to the subscriptions it created.
//!
//! This module uses only std/parking_lot primitives to stay runtime-agnostic;
//! higher layers drive it from whatever notification source they have.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared callback type for value delivery.
pub type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

type Teardown = Box<dyn FnOnce() + Send>;

struct CancelInner {
    cancelled: AtomicBool,
    teardown: Mutex<Vec<Teardown>>,
}

/// Idempotent cancellation handle for one live subscription.
///
/// The handle owns an ordered list of teardown closures. The first `cancel`
/// call runs them all; later calls do nothing. Registering a teardown on an
/// already-cancelled handle runs it immediately, so a subscription created in
/// a race with cancellation is still torn down.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

impl CancelHandle {
    /// Create a handle with no teardown yet.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                teardown: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a handle from a single teardown closure.
    pub fn from_fn(f: impl FnOnce() + Send + 'static) -> Self {
        let handle = Self::new();
        handle.on_cancel(f);
        handle
    }

    /// Register a teardown closure.
    ///
    /// Runs immediately if the handle is already cancelled.
    pub fn on_cancel(&self, f: impl FnOnce() + Send + 'static) {
        if self.inner.cancelled.load(Ordering::Acquire) {
            f();
            return;
        }
        let mut teardown = self.inner.teardown.lock();
        // Re-check under the lock so a concurrent cancel cannot miss us.
        if self.inner.cancelled.load(Ordering::Acquire) {
            drop(teardown);
            f();
        } else {
            teardown.push(Box::new(f));
        }
    }

    /// Cascade cancellation to a child subscription.
    pub fn attach(&self, child: CancelHandle) {
        self.on_cancel(move || child.cancel());
    }

    /// Cancel the subscription. Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let teardown = std::mem::take(&mut *self.inner.teardown.lock());
        for f in teardown {
            f();
        }
    }

    /// Whether this handle has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
