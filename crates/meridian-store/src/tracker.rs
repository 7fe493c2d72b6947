//! Tracked values
//!
//! `ValueTracker::track(address, on_change)` is the primitive every live
//! derivation bottoms out in: the callback fires with the decoded current
//! content immediately on subscribe, and again on every store mutation, local
//! or replicated. Independent `track` calls on one address share a single
//! open handle (reference-counted) but cancel independently.

use crate::backend::{StoreBackend, StoreHandle, StoreValue};
use crate::error::StoreError;
use meridian_core::{Callback, CancelHandle, StoreAddress};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct SharedOpen {
    handle: StoreHandle,
    refs: usize,
}

/// Reference-counted live tracking over a store backend.
pub struct ValueTracker<B: StoreBackend> {
    backend: Arc<B>,
    opens: Arc<Mutex<HashMap<StoreAddress, SharedOpen>>>,
}

impl<B: StoreBackend> Clone for ValueTracker<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            opens: self.opens.clone(),
        }
    }
}

impl<B: StoreBackend> ValueTracker<B> {
    /// Create a tracker over a backend.
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            opens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Access the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Track the decoded content of one store.
    ///
    /// Replays the current content immediately, then forwards every change.
    /// Content that does not decode as `T` is skipped (logged at debug); the
    /// next decodable change is forwarded normally. Returns an error only if
    /// the store cannot be opened at all.
    pub fn track<T>(
        &self,
        address: &StoreAddress,
        on_change: Callback<T>,
    ) -> Result<CancelHandle, StoreError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let handle = {
            // The opens map lock doubles as the open-serialization token:
            // two trackers opening the same address cannot race the backend.
            let mut opens = self.opens.lock();
            match opens.get_mut(address) {
                Some(open) => {
                    open.refs += 1;
                    open.handle.clone()
                }
                None => {
                    let handle = self.backend.open(address)?;
                    opens.insert(
                        *address,
                        SharedOpen {
                            handle: handle.clone(),
                            refs: 1,
                        },
                    );
                    handle
                }
            }
        };

        // "Still wanted" gate: a notification already in flight when the
        // subscription is cancelled must be dropped, not forwarded.
        let wanted = Arc::new(AtomicBool::new(true));
        // Set once the listener has delivered anything; the initial replay
        // stands down then, since its snapshot may predate that change.
        let change_seen = Arc::new(AtomicBool::new(false));

        let decode: Callback<StoreValue> = {
            let address = *address;
            Arc::new(move |raw: StoreValue| match serde_json::from_value::<T>(raw) {
                Ok(value) => on_change(value),
                Err(err) => {
                    tracing::debug!(%address, %err, "store content did not decode, skipped");
                }
            })
        };

        // Listener first, then the initial read: a write landing between the
        // two is delivered by the listener instead of being lost.
        let forward: Callback<StoreValue> = {
            let wanted = wanted.clone();
            let change_seen = change_seen.clone();
            let decode = decode.clone();
            Arc::new(move |raw: StoreValue| {
                if !wanted.load(Ordering::Acquire) {
                    return;
                }
                change_seen.store(true, Ordering::Release);
                decode(raw);
            })
        };
        let change_sub = self.backend.on_change(&handle, forward);

        match self.backend.read_all(&handle) {
            Ok(raw) => {
                if !change_seen.load(Ordering::Acquire) {
                    decode(raw);
                }
            }
            Err(err) => {
                tracing::debug!(%address, %err, "initial read failed, waiting for next change");
            }
        }

        let backend = self.backend.clone();
        let opens = self.opens.clone();
        let address = *address;
        Ok(CancelHandle::from_fn(move || {
            wanted.store(false, Ordering::Release);
            change_sub.cancel();
            let released = {
                let mut map = opens.lock();
                match map.get_mut(&address) {
                    Some(open) => {
                        open.refs -= 1;
                        if open.refs == 0 {
                            map.remove(&address).map(|o| o.handle)
                        } else {
                            None
                        }
                    }
                    None => None,
                }
            };
            if let Some(handle) = released {
                backend.close(handle);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use serde_json::json;

    fn collect<T: Clone + Send + Sync + 'static>() -> (Callback<T>, Arc<Mutex<Vec<T>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (Arc::new(move |v: T| sink.lock().push(v)), seen)
    }

    #[test]
    fn test_track_replays_current_content() {
        let backend = MemoryBackend::new();
        let address = backend.create(b"keywords");
        backend.write(&address, json!(["rain", "snow"]));

        let tracker = ValueTracker::new(backend);
        let (cb, seen) = collect::<Vec<String>>();
        let sub = tracker.track(&address, cb).unwrap();

        assert_eq!(*seen.lock(), vec![vec!["rain".to_string(), "snow".into()]]);
        sub.cancel();
    }

    #[test]
    fn test_track_forwards_changes_until_cancelled() {
        let backend = MemoryBackend::new();
        let address = backend.create(b"title");
        backend.write(&address, json!("v1"));

        let tracker = ValueTracker::new(backend.clone());
        let (cb, seen) = collect::<String>();
        let sub = tracker.track(&address, cb).unwrap();

        backend.write(&address, json!("v2"));
        assert_eq!(*seen.lock(), vec!["v1".to_string(), "v2".into()]);

        sub.cancel();
        backend.write(&address, json!("v3"));
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_shared_open_is_reference_counted() {
        let backend = MemoryBackend::new();
        let address = backend.create(b"shared");
        backend.write(&address, json!(1));

        let tracker = ValueTracker::new(backend.clone());
        let (cb1, _seen1) = collect::<i64>();
        let (cb2, seen2) = collect::<i64>();
        let sub1 = tracker.track(&address, cb1).unwrap();
        let sub2 = tracker.track(&address, cb2).unwrap();

        // One shared open serves both subscriptions.
        assert_eq!(backend.opens_total(&address), 1);
        assert_eq!(backend.open_count(&address), 1);

        sub1.cancel();
        assert_eq!(backend.open_count(&address), 1);
        backend.write(&address, json!(2));
        assert_eq!(*seen2.lock(), vec![1, 2]);

        sub2.cancel();
        assert_eq!(backend.open_count(&address), 0);
    }

    #[test]
    fn test_undecodable_content_is_skipped() {
        let backend = MemoryBackend::new();
        let address = backend.create(b"typed");
        backend.write(&address, json!("not a number"));

        let tracker = ValueTracker::new(backend.clone());
        let (cb, seen) = collect::<i64>();
        let _sub = tracker.track(&address, cb).unwrap();
        assert!(seen.lock().is_empty());

        backend.write(&address, json!(7));
        assert_eq!(*seen.lock(), vec![7]);
    }

    /// Delegating backend that has a write race the subscription setup:
    /// the store mutates while the change listener is being registered.
    struct RacingBackend {
        inner: MemoryBackend,
        target: StoreAddress,
        injected: AtomicBool,
    }

    impl StoreBackend for RacingBackend {
        fn open(&self, address: &StoreAddress) -> Result<StoreHandle, StoreError> {
            self.inner.open(address)
        }

        fn read_all(&self, handle: &StoreHandle) -> Result<StoreValue, StoreError> {
            self.inner.read_all(handle)
        }

        fn on_change(&self, handle: &StoreHandle, callback: Callback<StoreValue>) -> CancelHandle {
            if !self.injected.swap(true, Ordering::SeqCst) {
                self.inner.write(&self.target, json!("raced"));
            }
            self.inner.on_change(handle, callback)
        }

        fn close(&self, handle: StoreHandle) {
            self.inner.close(handle);
        }
    }

    #[test]
    fn test_write_racing_subscription_setup_is_not_lost() {
        let inner = MemoryBackend::new();
        let target = inner.create(b"raced");
        inner.write(&target, json!("stale"));
        let tracker = ValueTracker::new(RacingBackend {
            inner,
            target,
            injected: AtomicBool::new(false),
        });

        let (cb, seen) = collect::<String>();
        let _sub = tracker.track(&target, cb).unwrap();

        // The subscriber must come up on the post-race content, not the
        // pre-race snapshot.
        assert_eq!(*seen.lock(), vec!["raced".to_string()]);
    }

    #[test]
    fn test_unavailable_store_is_an_open_error() {
        let backend = MemoryBackend::new();
        let tracker = ValueTracker::new(backend);
        let (cb, _seen) = collect::<i64>();
        let missing = StoreAddress::derive(b"missing");
        assert!(matches!(
            tracker.track(&missing, cb),
            Err(StoreError::Unavailable { .. })
        ));
    }
}
