//! Shared tracking cache
//!
//! Opt-in, value-keyed sharing of one subscription tree between concurrent
//! consumers. The first subscriber for a key builds the underlying tracker;
//! later subscribers attach to it and immediately replay its latest value.
//! The underlying tracker is cancelled when the last subscriber leaves.
//!
//! Sharing is explicit because tracked subscriptions are otherwise owned by
//! exactly one caller; the cache is the one sanctioned exception, and it
//! still presents each consumer with an independently cancellable handle.

use meridian_core::{Callback, CancelHandle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct Slot<V> {
    latest: Mutex<Option<V>>,
    subscribers: Mutex<HashMap<u64, Callback<V>>>,
    next_id: AtomicU64,
}

impl<V: Clone> Slot<V> {
    fn publish(&self, value: V) {
        *self.latest.lock() = Some(value.clone());
        let subscribers: Vec<Callback<V>> = self.subscribers.lock().values().cloned().collect();
        for cb in subscribers {
            cb(value.clone());
        }
    }
}

struct CacheEntry<V> {
    refs: usize,
    /// `None` while the first subscriber is still building the tracker.
    upstream: Option<CancelHandle>,
    slot: Arc<Slot<V>>,
}

/// Reference-counted cache of live trackers, keyed by value.
pub struct SharedTrackerCache<K, V> {
    entries: Arc<Mutex<HashMap<K, CacheEntry<V>>>>,
}

impl<K, V> Clone for SharedTrackerCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<K, V> Default for SharedTrackerCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SharedTrackerCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to the shared tracker for `key`.
    ///
    /// `build` runs only when no tracker for `key` is live; it receives the
    /// callback the tracker must publish through. `on_value` replays the
    /// latest published value immediately (if any) and then receives every
    /// later one. The returned handle detaches this subscriber only; the
    /// underlying tracker is cancelled once no subscriber remains.
    pub fn subscribe<B>(&self, key: K, build: B, on_value: Callback<V>) -> CancelHandle
    where
        B: FnOnce(Callback<V>) -> CancelHandle,
    {
        let (slot, build_upstream) = {
            let mut entries = self.entries.lock();
            match entries.get_mut(&key) {
                Some(entry) => {
                    entry.refs += 1;
                    (entry.slot.clone(), false)
                }
                None => {
                    let slot = Arc::new(Slot {
                        latest: Mutex::new(None),
                        subscribers: Mutex::new(HashMap::new()),
                        next_id: AtomicU64::new(0),
                    });
                    entries.insert(
                        key.clone(),
                        CacheEntry {
                            refs: 1,
                            upstream: None,
                            slot: slot.clone(),
                        },
                    );
                    (slot, true)
                }
            }
        };

        let subscriber_id = slot.next_id.fetch_add(1, Ordering::Relaxed);
        slot.subscribers.lock().insert(subscriber_id, on_value.clone());

        if build_upstream {
            // Built outside the map lock so a tracker that synchronously
            // subscribes to other keys of the same cache cannot deadlock.
            let publish: Callback<V> = {
                let slot = slot.clone();
                Arc::new(move |value: V| slot.publish(value))
            };
            let upstream = build(publish);
            let orphaned = {
                let mut entries = self.entries.lock();
                match entries.get_mut(&key) {
                    Some(entry) => {
                        entry.upstream = Some(upstream.clone());
                        false
                    }
                    None => true,
                }
            };
            // Every subscriber left while the tracker was being built.
            if orphaned {
                upstream.cancel();
            }
        } else {
            let latest = slot.latest.lock().clone();
            if let Some(value) = latest {
                on_value(value);
            }
        }

        let entries = self.entries.clone();
        CancelHandle::from_fn(move || {
            slot.subscribers.lock().remove(&subscriber_id);
            let upstream = {
                let mut map = entries.lock();
                match map.get_mut(&key) {
                    Some(entry) => {
                        entry.refs -= 1;
                        if entry.refs == 0 {
                            map.remove(&key).and_then(|e| e.upstream)
                        } else {
                            None
                        }
                    }
                    None => None,
                }
            };
            if let Some(upstream) = upstream {
                upstream.cancel();
            }
        })
    }

    /// Number of keys with a live shared tracker.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upstream {
        publish: Arc<Mutex<Option<Callback<i64>>>>,
        builds: Arc<Mutex<u32>>,
        cancels: Arc<Mutex<u32>>,
    }

    impl Upstream {
        fn new() -> Self {
            Self {
                publish: Arc::new(Mutex::new(None)),
                builds: Arc::new(Mutex::new(0)),
                cancels: Arc::new(Mutex::new(0)),
            }
        }

        fn builder(&self) -> impl FnOnce(Callback<i64>) -> CancelHandle {
            let publish = self.publish.clone();
            let builds = self.builds.clone();
            let cancels = self.cancels.clone();
            move |cb: Callback<i64>| {
                *publish.lock() = Some(cb);
                *builds.lock() += 1;
                CancelHandle::from_fn(move || *cancels.lock() += 1)
            }
        }

        fn send(&self, value: i64) {
            let cb = self.publish.lock().clone();
            if let Some(cb) = cb {
                cb(value);
            }
        }
    }

    fn collect() -> (Callback<i64>, Arc<Mutex<Vec<i64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (Arc::new(move |v| sink.lock().push(v)), seen)
    }

    #[test]
    fn test_second_subscriber_shares_and_replays() {
        let cache = SharedTrackerCache::<String, i64>::new();
        let upstream = Upstream::new();

        let (cb1, seen1) = collect();
        let _sub1 = cache.subscribe("k".to_string(), upstream.builder(), cb1);
        upstream.send(7);

        let (cb2, seen2) = collect();
        let _sub2 = cache.subscribe("k".to_string(), upstream.builder(), cb2);

        assert_eq!(*upstream.builds.lock(), 1);
        assert_eq!(*seen2.lock(), vec![7]);

        upstream.send(8);
        assert_eq!(*seen1.lock(), vec![7, 8]);
        assert_eq!(*seen2.lock(), vec![7, 8]);
    }

    #[test]
    fn test_last_unsubscribe_cancels_upstream() {
        let cache = SharedTrackerCache::<String, i64>::new();
        let upstream = Upstream::new();

        let (cb1, _s1) = collect();
        let (cb2, _s2) = collect();
        let sub1 = cache.subscribe("k".to_string(), upstream.builder(), cb1);
        let sub2 = cache.subscribe("k".to_string(), upstream.builder(), cb2);

        sub1.cancel();
        assert_eq!(*upstream.cancels.lock(), 0);
        sub2.cancel();
        assert_eq!(*upstream.cancels.lock(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_detached_subscriber_stops_receiving() {
        let cache = SharedTrackerCache::<String, i64>::new();
        let upstream = Upstream::new();

        let (cb1, seen1) = collect();
        let (cb2, seen2) = collect();
        let sub1 = cache.subscribe("k".to_string(), upstream.builder(), cb1);
        let _sub2 = cache.subscribe("k".to_string(), upstream.builder(), cb2);

        sub1.cancel();
        upstream.send(1);
        assert!(seen1.lock().is_empty());
        assert_eq!(*seen2.lock(), vec![1]);
    }

    #[test]
    fn test_rebuilt_after_full_teardown() {
        let cache = SharedTrackerCache::<String, i64>::new();
        let upstream = Upstream::new();

        let (cb1, _s1) = collect();
        let sub1 = cache.subscribe("k".to_string(), upstream.builder(), cb1);
        sub1.cancel();

        let (cb2, seen2) = collect();
        let _sub2 = cache.subscribe("k".to_string(), upstream.builder(), cb2);
        assert_eq!(*upstream.builds.lock(), 2);

        // No stale replay from the previous incarnation.
        assert!(seen2.lock().is_empty());
        upstream.send(5);
        assert_eq!(*seen2.lock(), vec![5]);
    }

    #[test]
    fn test_distinct_keys_are_independent() {
        let cache = SharedTrackerCache::<String, i64>::new();
        let a = Upstream::new();
        let b = Upstream::new();

        let (cb1, seen1) = collect();
        let (cb2, seen2) = collect();
        let _sub1 = cache.subscribe("a".to_string(), a.builder(), cb1);
        let _sub2 = cache.subscribe("b".to_string(), b.builder(), cb2);
        assert_eq!(cache.len(), 2);

        a.send(1);
        b.send(2);
        assert_eq!(*seen1.lock(), vec![1]);
        assert_eq!(*seen2.lock(), vec![2]);
    }
}
