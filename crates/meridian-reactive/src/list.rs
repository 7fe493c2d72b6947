//! List derivation
//!
//! `track_derived_from_list` maintains one live branch subscription per item
//! of an evolving root list and reduces all branch outputs into a single
//! emitted value. Branches are keyed by an item code; a snapshot diff decides
//! which branches to create, keep or tear down:
//!
//! - *new* codes get a fresh branch
//! - *disappeared* codes are cancelled and deleted
//! - *changed* items (same code, different value by deep equality) are torn
//!   down and recreated, never renamed in place
//!
//! No value is emitted until every branch created from the initial snapshot
//! has reported at least once (the ready gate), so consumers never see an
//! artificially incomplete aggregate at startup. After that, every individual
//! branch update emits immediately.

use indexmap::IndexMap;
use meridian_core::{Callback, CancelHandle};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Computes the branch code of one root item.
pub type CodeFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

/// Per-item branch derivation: `(code, on_value, item) -> cancel`.
pub type BranchTracker<T, U> = Arc<dyn Fn(&str, Callback<U>, &T) -> CancelHandle + Send + Sync>;

/// Combines all currently-reported branch values into the emitted value.
pub type ReduceFn<U, V> = Arc<dyn Fn(&[U]) -> V + Send + Sync>;

/// Item code via `Display`, for root items that are naturally string-like
/// (strings, identifiers).
pub fn display_code<T: std::fmt::Display>() -> CodeFn<T> {
    Arc::new(|item| item.to_string())
}

/// Default reduction: flatten all branch lists and deduplicate.
pub fn flatten_dedup<W>() -> ReduceFn<Vec<W>, Vec<W>>
where
    W: Ord + Clone + Send + Sync + 'static,
{
    Arc::new(|values: &[Vec<W>]| {
        let merged: BTreeSet<W> = values.iter().flat_map(|v| v.iter().cloned()).collect();
        merged.into_iter().collect()
    })
}

struct Branch<T, U> {
    /// Raw root item last used to create this branch, for change detection.
    item: T,
    value: Option<U>,
    /// Generation marker; cleared before the branch is cancelled so an
    /// in-flight callback can no longer land.
    alive: Arc<AtomicBool>,
    cancel: Option<CancelHandle>,
}

struct ListState<T, U> {
    branches: IndexMap<String, Branch<T, U>>,
    queue: VecDeque<Vec<T>>,
    diff_in_progress: bool,
    saw_initial: bool,
    ready: bool,
    /// Codes from the initial snapshot that have not reported yet.
    awaiting_first: HashSet<String>,
}

struct ListInner<T, U, V> {
    track_branch: BranchTracker<T, U>,
    item_code: CodeFn<T>,
    reduce: ReduceFn<U, V>,
    emit: Callback<V>,
    cancelled: AtomicBool,
    state: Mutex<ListState<T, U>>,
}

impl<T, U, V> ListInner<T, U, V>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Entry point for root-list snapshots. Serializes diff passes: a
    /// snapshot arriving while another is being processed is queued.
    fn on_root_snapshot(self: &Arc<Self>, items: Vec<T>) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        {
            let mut st = self.state.lock();
            st.queue.push_back(items);
            if st.diff_in_progress {
                return;
            }
            st.diff_in_progress = true;
        }
        loop {
            let next = {
                let mut st = self.state.lock();
                match st.queue.pop_front() {
                    Some(items) => items,
                    None => {
                        st.diff_in_progress = false;
                        break;
                    }
                }
            };
            self.process_snapshot(next);
        }
    }

    fn process_snapshot(self: &Arc<Self>, items: Vec<T>) {
        // Code every item, keeping the first occurrence of a duplicate code.
        let mut coded: IndexMap<String, T> = IndexMap::with_capacity(items.len());
        for item in items {
            let code = (self.item_code)(&item);
            if coded.contains_key(&code) {
                tracing::warn!(code, "duplicate item code in root snapshot, keeping first");
                continue;
            }
            coded.insert(code, item);
        }
        tracing::trace!(items = coded.len(), "processing root snapshot");

        let mut to_cancel: Vec<CancelHandle> = Vec::new();
        let mut to_create: Vec<(String, T, Arc<AtomicBool>)> = Vec::new();
        let initial_pass;
        let became_ready;
        {
            let mut st = self.state.lock();
            initial_pass = !st.saw_initial;

            // Disappeared and changed codes lose their branch. Clearing the
            // alive flag here, under the lock, guarantees the removal path
            // cannot re-enter reduction mid-deletion.
            let existing: Vec<String> = st.branches.keys().cloned().collect();
            for code in existing {
                let stale = match coded.get(&code) {
                    None => true,
                    Some(item) => st
                        .branches
                        .get(&code)
                        .map(|b| b.item != *item)
                        .unwrap_or(false),
                };
                if stale {
                    if let Some(branch) = st.branches.shift_remove(&code) {
                        branch.alive.store(false, Ordering::Release);
                        if let Some(cancel) = branch.cancel {
                            to_cancel.push(cancel);
                        }
                        st.awaiting_first.remove(&code);
                        tracing::trace!(code, "branch removed");
                    }
                }
            }

            // New codes (including recreations after a change).
            for (code, item) in coded.iter() {
                if !st.branches.contains_key(code) {
                    let alive = Arc::new(AtomicBool::new(true));
                    st.branches.insert(
                        code.clone(),
                        Branch {
                            item: item.clone(),
                            value: None,
                            alive: alive.clone(),
                            cancel: None,
                        },
                    );
                    if initial_pass {
                        st.awaiting_first.insert(code.clone());
                    }
                    to_create.push((code.clone(), item.clone(), alive));
                    tracing::trace!(code, "branch created");
                }
            }

            // The gate can also resolve by removal: tearing down the last
            // initial branch that never reported leaves the survivors
            // complete.
            became_ready = if !st.ready && st.saw_initial && st.awaiting_first.is_empty() {
                st.ready = true;
                true
            } else {
                false
            };
        }

        let removed_any = !to_cancel.is_empty();
        for cancel in to_cancel {
            cancel.cancel();
        }
        // Surface the shrinking set promptly (no-op until ready).
        if removed_any || became_ready {
            self.emit_reduced();
        }

        for (code, item, alive) in to_create {
            let callback: Callback<U> = {
                let inner = self.clone();
                let code = code.clone();
                let alive = alive.clone();
                Arc::new(move |value: U| inner.on_branch_value(&code, &alive, value))
            };
            let cancel = (self.track_branch)(&code, callback, &item);
            let stored = {
                let mut st = self.state.lock();
                match st.branches.get_mut(&code) {
                    Some(branch)
                        if Arc::ptr_eq(&branch.alive, &alive)
                            && alive.load(Ordering::Acquire) =>
                    {
                        branch.cancel = Some(cancel.clone());
                        true
                    }
                    _ => false,
                }
            };
            // The branch disappeared (or the combinator was cancelled) while
            // we were subscribing; tear the orphan down.
            if !stored {
                cancel.cancel();
            }
        }

        if initial_pass {
            let becomes_ready = {
                let mut st = self.state.lock();
                st.saw_initial = true;
                if !st.ready && st.awaiting_first.is_empty() {
                    st.ready = true;
                    true
                } else {
                    false
                }
            };
            // Covers the empty initial list (which must still emit the empty
            // reduction) and initial branches that replayed synchronously.
            if becomes_ready {
                self.emit_reduced();
            }
        }
    }

    fn on_branch_value(self: &Arc<Self>, code: &str, alive: &Arc<AtomicBool>, value: U) {
        if self.cancelled.load(Ordering::Acquire) || !alive.load(Ordering::Acquire) {
            return;
        }
        let should_emit = {
            let mut st = self.state.lock();
            let Some(branch) = st.branches.get_mut(code) else {
                return;
            };
            // A recreated branch under the same code is a different
            // generation; a late value from the old one must not land.
            if !Arc::ptr_eq(&branch.alive, alive) {
                return;
            }
            branch.value = Some(value);
            st.awaiting_first.remove(code);
            if !st.ready && st.saw_initial && st.awaiting_first.is_empty() {
                st.ready = true;
            }
            st.ready
        };
        if should_emit {
            self.emit_reduced();
        }
    }

    fn emit_reduced(self: &Arc<Self>) {
        let values: Vec<U> = {
            let st = self.state.lock();
            if !st.ready {
                return;
            }
            st.branches.values().filter_map(|b| b.value.clone()).collect()
        };
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        let reduced = (self.reduce)(&values);
        (self.emit)(reduced);
    }
}

/// Track a value derived from an evolving root list.
///
/// `track_root` is invoked once with the root callback and must replay the
/// current list immediately (tracked-value contract); `track_branch` derives
/// one `U` per item; `item_code` keys branches; `reduce` combines all
/// currently-reported branch values; `emit` receives every reduced value.
///
/// The returned handle cancels the root tracker and every live branch.
pub fn track_derived_from_list<T, U, V, R>(
    track_root: R,
    track_branch: BranchTracker<T, U>,
    item_code: CodeFn<T>,
    reduce: ReduceFn<U, V>,
    emit: Callback<V>,
) -> CancelHandle
where
    R: FnOnce(Callback<Vec<T>>) -> CancelHandle,
    T: Clone + PartialEq + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    let inner = Arc::new(ListInner {
        track_branch,
        item_code,
        reduce,
        emit,
        cancelled: AtomicBool::new(false),
        state: Mutex::new(ListState {
            branches: IndexMap::new(),
            queue: VecDeque::new(),
            diff_in_progress: false,
            saw_initial: false,
            ready: false,
            awaiting_first: HashSet::new(),
        }),
    });

    let root_callback: Callback<Vec<T>> = {
        let inner = inner.clone();
        Arc::new(move |items| inner.on_root_snapshot(items))
    };
    let root_cancel = track_root(root_callback);

    let handle = CancelHandle::new();
    handle.on_cancel(move || {
        inner.cancelled.store(true, Ordering::Release);
        root_cancel.cancel();
        let cancels: Vec<CancelHandle> = {
            let mut st = inner.state.lock();
            let branches = std::mem::take(&mut st.branches);
            branches
                .into_values()
                .filter_map(|b| {
                    b.alive.store(false, Ordering::Release);
                    b.cancel
                })
                .collect()
        };
        for cancel in cancels {
            cancel.cancel();
        }
    });
    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Manually driven root list.
    struct RootHarness<T> {
        callback: Arc<Mutex<Option<Callback<Vec<T>>>>>,
        initial: Vec<T>,
    }

    impl<T: Clone + Send + Sync + 'static> RootHarness<T> {
        fn new(initial: Vec<T>) -> Self {
            Self {
                callback: Arc::new(Mutex::new(None)),
                initial,
            }
        }

        fn tracker(&self) -> impl FnOnce(Callback<Vec<T>>) -> CancelHandle {
            let slot = self.callback.clone();
            let initial = self.initial.clone();
            move |cb: Callback<Vec<T>>| {
                *slot.lock() = Some(cb.clone());
                cb(initial);
                let slot = slot.clone();
                CancelHandle::from_fn(move || {
                    *slot.lock() = None;
                })
            }
        }

        fn set(&self, items: Vec<T>) {
            let cb = self.callback.lock().clone();
            if let Some(cb) = cb {
                cb(items);
            }
        }
    }

    /// Manually driven branches with creation/cancellation bookkeeping.
    struct BranchHarness<U> {
        callbacks: Arc<Mutex<HashMap<String, Callback<U>>>>,
        created: Arc<Mutex<Vec<String>>>,
        cancelled: Arc<Mutex<Vec<String>>>,
    }

    impl<U: Send + Sync + 'static> BranchHarness<U> {
        fn new() -> Self {
            Self {
                callbacks: Arc::new(Mutex::new(HashMap::new())),
                created: Arc::new(Mutex::new(Vec::new())),
                cancelled: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn tracker<T: Send + Sync + 'static>(&self) -> BranchTracker<T, U> {
            let callbacks = self.callbacks.clone();
            let created = self.created.clone();
            let cancelled = self.cancelled.clone();
            Arc::new(move |code, cb, _item| {
                callbacks.lock().insert(code.to_string(), cb);
                created.lock().push(code.to_string());
                let cancelled = cancelled.clone();
                let code = code.to_string();
                CancelHandle::from_fn(move || cancelled.lock().push(code))
            })
        }

        fn send(&self, code: &str, value: U) {
            let cb = self.callbacks.lock().get(code).cloned();
            if let Some(cb) = cb {
                cb(value);
            }
        }
    }

    fn collect_emissions<V: Send + Sync + 'static>() -> (Callback<V>, Arc<Mutex<Vec<V>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (Arc::new(move |v| sink.lock().push(v)), seen)
    }

    #[test]
    fn test_ready_gate_then_flatten_dedup() {
        let root = RootHarness::new(vec!["a".to_string(), "b".to_string()]);
        let branches = BranchHarness::<Vec<i64>>::new();
        let (emit, seen) = collect_emissions::<Vec<i64>>();

        let _sub = track_derived_from_list(
            root.tracker(),
            branches.tracker(),
            display_code(),
            flatten_dedup(),
            emit,
        );

        branches.send("a", vec![1, 2]);
        // "b" has not reported: the ready gate holds the first emission back.
        assert!(seen.lock().is_empty());

        branches.send("b", vec![2, 3]);
        assert_eq!(*seen.lock(), vec![vec![1, 2, 3]]);

        // Removing "a" re-emits promptly with the shrunken set.
        root.set(vec!["b".to_string()]);
        assert_eq!(seen.lock().last().cloned(), Some(vec![2, 3]));
        assert_eq!(*branches.cancelled.lock(), vec!["a".to_string()]);
    }

    #[test]
    fn test_empty_initial_list_still_emits() {
        let root = RootHarness::new(Vec::<String>::new());
        let branches = BranchHarness::<Vec<i64>>::new();
        let (emit, seen) = collect_emissions::<Vec<i64>>();

        let _sub = track_derived_from_list(
            root.tracker(),
            branches.tracker(),
            display_code(),
            flatten_dedup(),
            emit,
        );
        assert_eq!(*seen.lock(), vec![Vec::<i64>::new()]);
    }

    #[test]
    fn test_single_branch_update_emits_without_waiting() {
        let root = RootHarness::new(vec!["a".to_string(), "b".to_string()]);
        let branches = BranchHarness::<Vec<i64>>::new();
        let (emit, seen) = collect_emissions::<Vec<i64>>();

        let _sub = track_derived_from_list(
            root.tracker(),
            branches.tracker(),
            display_code(),
            flatten_dedup(),
            emit,
        );
        branches.send("a", vec![1]);
        branches.send("b", vec![2]);
        assert_eq!(seen.lock().len(), 1);

        // Only "a" updates; "b" is untouched and nothing waits on it.
        branches.send("a", vec![9]);
        assert_eq!(seen.lock().last().cloned(), Some(vec![2, 9]));
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_removing_unreported_initial_branches_resolves_the_ready_gate() {
        let root = RootHarness::new(vec!["a".to_string(), "b".to_string()]);
        let branches = BranchHarness::<Vec<i64>>::new();
        let (emit, seen) = collect_emissions::<Vec<i64>>();

        let _sub = track_derived_from_list(
            root.tracker(),
            branches.tracker(),
            display_code(),
            flatten_dedup(),
            emit,
        );
        branches.send("a", vec![1]);
        // "b" never reports; the gate is still closed.
        assert!(seen.lock().is_empty());

        // Dropping "b" from the root leaves the survivors complete.
        root.set(vec!["a".to_string()]);
        assert_eq!(*seen.lock(), vec![vec![1]]);

        // Emptying the root likewise emits the empty reduction.
        root.set(Vec::new());
        assert_eq!(seen.lock().last().cloned(), Some(Vec::new()));
    }

    #[test]
    fn test_branch_set_tracks_snapshot_codes_exactly() {
        let root = RootHarness::new(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        let branches = BranchHarness::<Vec<i64>>::new();
        let (emit, _seen) = collect_emissions::<Vec<i64>>();

        let _sub = track_derived_from_list(
            root.tracker(),
            branches.tracker(),
            display_code(),
            flatten_dedup(),
            emit,
        );

        root.set(vec!["b".to_string(), "d".to_string()]);
        let created = branches.created.lock().clone();
        let cancelled = branches.cancelled.lock().clone();
        assert_eq!(created, vec!["a", "b", "c", "d"]);
        let cancelled_set: BTreeSet<_> = cancelled.into_iter().collect();
        assert_eq!(
            cancelled_set,
            BTreeSet::from(["a".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn test_changed_item_is_recreated_not_renamed() {
        // Items are (code, payload); a payload change under the same code
        // must tear the branch down and build a fresh one.
        let root = RootHarness::new(vec![("a".to_string(), 1)]);
        let branches = BranchHarness::<Vec<i64>>::new();
        let (emit, _seen) = collect_emissions::<Vec<i64>>();

        let code: CodeFn<(String, i32)> = Arc::new(|item| item.0.clone());
        let _sub = track_derived_from_list(
            root.tracker(),
            branches.tracker(),
            code,
            flatten_dedup(),
            emit,
        );

        root.set(vec![("a".to_string(), 2)]);
        assert_eq!(*branches.created.lock(), vec!["a", "a"]);
        assert_eq!(*branches.cancelled.lock(), vec!["a"]);
    }

    #[test]
    fn test_unchanged_item_keeps_its_branch() {
        let root = RootHarness::new(vec![("a".to_string(), 1)]);
        let branches = BranchHarness::<Vec<i64>>::new();
        let (emit, _seen) = collect_emissions::<Vec<i64>>();

        let code: CodeFn<(String, i32)> = Arc::new(|item| item.0.clone());
        let _sub = track_derived_from_list(
            root.tracker(),
            branches.tracker(),
            code,
            flatten_dedup(),
            emit,
        );

        root.set(vec![("a".to_string(), 1)]);
        assert_eq!(*branches.created.lock(), vec!["a"]);
        assert!(branches.cancelled.lock().is_empty());
    }

    #[test]
    fn test_stale_branch_value_after_recreation_is_dropped() {
        let root = RootHarness::new(vec![("a".to_string(), 1)]);
        let branches = BranchHarness::<Vec<i64>>::new();
        let (emit, seen) = collect_emissions::<Vec<i64>>();

        let code: CodeFn<(String, i32)> = Arc::new(|item| item.0.clone());
        let _sub = track_derived_from_list(
            root.tracker(),
            branches.tracker(),
            code,
            flatten_dedup(),
            emit,
        );
        branches.send("a", vec![1]);

        // Keep the old generation's callback around, then recreate "a".
        let old_cb = branches.callbacks.lock().get("a").cloned().unwrap();
        root.set(vec![("a".to_string(), 2)]);
        let emissions_before = seen.lock().len();

        // The stale callback must be ignored.
        old_cb(vec![99]);
        assert_eq!(seen.lock().len(), emissions_before);
        assert!(!seen.lock().iter().any(|v| v.contains(&99)));
    }

    #[test]
    fn test_cancellation_cascades_and_is_idempotent() {
        let root = RootHarness::new(vec!["a".to_string(), "b".to_string()]);
        let branches = BranchHarness::<Vec<i64>>::new();
        let (emit, seen) = collect_emissions::<Vec<i64>>();

        let sub = track_derived_from_list(
            root.tracker(),
            branches.tracker(),
            display_code(),
            flatten_dedup(),
            emit,
        );
        branches.send("a", vec![1]);
        branches.send("b", vec![2]);
        assert_eq!(seen.lock().len(), 1);

        sub.cancel();
        sub.cancel();
        let cancelled: BTreeSet<_> = branches.cancelled.lock().clone().into_iter().collect();
        assert_eq!(cancelled, BTreeSet::from(["a".to_string(), "b".to_string()]));
        // Root tracker torn down too.
        assert!(root.callback.lock().is_none());

        // A late branch notification is silently dropped.
        branches.send("a", vec![7]);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_never_reporting_branch_does_not_block_updates() {
        let root = RootHarness::new(vec!["a".to_string()]);
        let branches = BranchHarness::<Vec<i64>>::new();
        let (emit, seen) = collect_emissions::<Vec<i64>>();

        let _sub = track_derived_from_list(
            root.tracker(),
            branches.tracker(),
            display_code(),
            flatten_dedup(),
            emit,
        );
        branches.send("a", vec![1]);
        assert_eq!(seen.lock().len(), 1);

        // "b" joins but its peer is unreachable and never reports.
        root.set(vec!["a".to_string(), "b".to_string()]);
        branches.send("a", vec![1, 4]);
        assert_eq!(seen.lock().last().cloned(), Some(vec![1, 4]));
    }

    #[test]
    fn test_duplicate_codes_keep_first_occurrence() {
        let root = RootHarness::new(vec![("a".to_string(), 1), ("a".to_string(), 2)]);
        let branches = BranchHarness::<Vec<i64>>::new();
        let (emit, _seen) = collect_emissions::<Vec<i64>>();

        let code: CodeFn<(String, i32)> = Arc::new(|item| item.0.clone());
        let _sub = track_derived_from_list(
            root.tracker(),
            branches.tracker(),
            code,
            flatten_dedup(),
            emit,
        );
        assert_eq!(*branches.created.lock(), vec!["a"]);
    }

    #[test]
    fn test_snapshots_are_processed_in_order() {
        let root = RootHarness::new(vec!["a".to_string()]);
        let branches = BranchHarness::<Vec<i64>>::new();
        let (emit, _seen) = collect_emissions::<Vec<i64>>();

        let _sub = track_derived_from_list(
            root.tracker(),
            branches.tracker(),
            display_code(),
            flatten_dedup(),
            emit,
        );
        root.set(vec!["b".to_string()]);
        root.set(vec!["c".to_string()]);
        assert_eq!(*branches.created.lock(), vec!["a", "b", "c"]);
        assert_eq!(*branches.cancelled.lock(), vec!["a", "b"]);
    }
}
