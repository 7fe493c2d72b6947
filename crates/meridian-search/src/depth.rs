//! Depth-feedback debounce timer
//!
//! One pending depth adjustment at a time: arming replaces any pending
//! action, disarming aborts it. A zero delay runs the action inline, which
//! is how an undebounced re-evaluation (e.g. after a result-limit change)
//! is expressed.

use parking_lot::Mutex;
use std::time::Duration;

pub(crate) struct DepthTimer {
    pending: Mutex<Option<tokio::task::AbortHandle>>,
}

impl DepthTimer {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(None),
        }
    }

    pub(crate) fn arm<F>(&self, delay: Duration, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.disarm();
        if delay.is_zero() {
            action();
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let task = handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    action();
                });
                *self.pending.lock() = Some(task.abort_handle());
            }
            Err(_) => {
                tracing::debug!("no async runtime, depth adjustment not scheduled");
            }
        }
    }

    pub(crate) fn disarm(&self) {
        if let Some(task) = self.pending.lock().take() {
            task.abort();
        }
    }
}

impl Drop for DepthTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}
