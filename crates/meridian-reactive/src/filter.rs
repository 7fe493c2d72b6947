//! Conditional filter
//!
//! `track_filtered_list` is the list combinator specialized to a live boolean
//! predicate per item: the emitted value is the subset of root items whose
//! latest predicate value is `true`, recomputed whenever any predicate flips.
//! Items are emitted in the order they first appeared in the root list; a
//! pure reorder of unchanged items does not reorder the output.

use crate::list::{track_derived_from_list, BranchTracker, CodeFn};
use meridian_core::{Callback, CancelHandle};
use std::sync::Arc;

/// Live boolean predicate per item: `(code, on_verdict, item) -> cancel`.
pub type PredicateTracker<T> = Arc<dyn Fn(&str, Callback<bool>, &T) -> CancelHandle + Send + Sync>;

#[derive(Clone)]
struct Vote<T> {
    item: T,
    keep: bool,
}

/// Track the subset of a live root list passing a live per-item predicate.
///
/// Each item's predicate is tracked independently; the filtered list is
/// re-emitted whenever the root list or any verdict changes. An item is
/// absent until its predicate has reported at least once.
pub fn track_filtered_list<T, R>(
    track_root: R,
    track_predicate: PredicateTracker<T>,
    item_code: CodeFn<T>,
    emit: Callback<Vec<T>>,
) -> CancelHandle
where
    R: FnOnce(Callback<Vec<T>>) -> CancelHandle,
    T: Clone + PartialEq + Send + Sync + 'static,
{
    let track_branch: BranchTracker<T, Vote<T>> = {
        Arc::new(move |code, on_vote: Callback<Vote<T>>, item: &T| {
            let vote_item = item.clone();
            let verdicts: Callback<bool> = Arc::new(move |keep| {
                on_vote(Vote {
                    item: vote_item.clone(),
                    keep,
                });
            });
            track_predicate(code, verdicts, item)
        })
    };

    let reduce = Arc::new(|votes: &[Vote<T>]| {
        votes
            .iter()
            .filter(|vote| vote.keep)
            .map(|vote| vote.item.clone())
            .collect::<Vec<T>>()
    });

    track_derived_from_list(track_root, track_branch, item_code, reduce, emit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::list::display_code;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct PredicateHarness {
        callbacks: Arc<Mutex<HashMap<String, Callback<bool>>>>,
        cancels: Arc<Mutex<Vec<String>>>,
    }

    impl PredicateHarness {
        fn new() -> Self {
            Self {
                callbacks: Arc::new(Mutex::new(HashMap::new())),
                cancels: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn tracker(&self) -> PredicateTracker<String> {
            let callbacks = self.callbacks.clone();
            let cancels = self.cancels.clone();
            Arc::new(move |code, cb, _item| {
                callbacks.lock().insert(code.to_string(), cb);
                let cancels = cancels.clone();
                let code = code.to_string();
                CancelHandle::from_fn(move || cancels.lock().push(code))
            })
        }

        fn verdict(&self, code: &str, keep: bool) {
            let cb = self.callbacks.lock().get(code).cloned();
            if let Some(cb) = cb {
                cb(keep);
            }
        }
    }

    fn fixed_root(items: Vec<String>) -> impl FnOnce(Callback<Vec<String>>) -> CancelHandle {
        move |cb: Callback<Vec<String>>| {
            cb(items);
            CancelHandle::new()
        }
    }

    fn collect() -> (Callback<Vec<String>>, Arc<Mutex<Vec<Vec<String>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (Arc::new(move |v| sink.lock().push(v)), seen)
    }

    #[test]
    fn test_only_passing_items_are_kept_in_order() {
        let predicates = PredicateHarness::new();
        let (emit, seen) = collect();
        let _sub = track_filtered_list(
            fixed_root(vec!["a".into(), "b".into(), "c".into()]),
            predicates.tracker(),
            display_code(),
            emit,
        );

        predicates.verdict("a", true);
        predicates.verdict("b", false);
        assert!(seen.lock().is_empty());
        predicates.verdict("c", true);
        assert_eq!(*seen.lock(), vec![vec!["a".to_string(), "c".into()]]);
    }

    #[test]
    fn test_flipping_a_predicate_reemits() {
        let predicates = PredicateHarness::new();
        let (emit, seen) = collect();
        let _sub = track_filtered_list(
            fixed_root(vec!["a".into(), "b".into()]),
            predicates.tracker(),
            display_code(),
            emit,
        );

        predicates.verdict("a", true);
        predicates.verdict("b", true);
        assert_eq!(seen.lock().last().cloned(), Some(vec!["a".to_string(), "b".into()]));

        predicates.verdict("a", false);
        assert_eq!(seen.lock().last().cloned(), Some(vec!["b".to_string()]));

        predicates.verdict("a", true);
        assert_eq!(seen.lock().last().cloned(), Some(vec!["a".to_string(), "b".into()]));
    }

    #[test]
    fn test_all_rejected_emits_empty_list() {
        let predicates = PredicateHarness::new();
        let (emit, seen) = collect();
        let _sub = track_filtered_list(
            fixed_root(vec!["a".into()]),
            predicates.tracker(),
            display_code(),
            emit,
        );
        predicates.verdict("a", false);
        assert_eq!(*seen.lock(), vec![Vec::<String>::new()]);
    }

    #[test]
    fn test_predicate_receives_each_root_item() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let tracker: PredicateTracker<String> = Arc::new(move |_code, cb, item| {
            sink.lock().push(item.clone());
            cb(true);
            CancelHandle::new()
        });
        let (emit, seen) = collect();
        let _sub = track_filtered_list(
            fixed_root(vec!["a".into(), "b".into()]),
            tracker,
            display_code(),
            emit,
        );
        assert_eq!(*received.lock(), vec!["a".to_string(), "b".into()]);
        assert_eq!(
            seen.lock().last().cloned(),
            Some(vec!["a".to_string(), "b".into()])
        );
    }

    #[test]
    fn test_reordered_root_keeps_first_appearance_order() {
        let slot: Arc<Mutex<Option<Callback<Vec<String>>>>> = Arc::new(Mutex::new(None));
        let root = {
            let slot = slot.clone();
            move |cb: Callback<Vec<String>>| {
                *slot.lock() = Some(cb.clone());
                cb(vec!["a".into(), "b".into()]);
                CancelHandle::new()
            }
        };
        let predicates = PredicateHarness::new();
        let (emit, seen) = collect();
        let _sub = track_filtered_list(root, predicates.tracker(), display_code(), emit);
        predicates.verdict("a", true);
        predicates.verdict("b", true);

        // A pure reorder keeps existing branches; output order stays put.
        let cb = slot.lock().clone().unwrap();
        cb(vec!["b".into(), "a".into()]);
        predicates.verdict("a", false);
        assert_eq!(seen.lock().last().cloned(), Some(vec!["b".to_string()]));
        predicates.verdict("a", true);
        assert_eq!(
            seen.lock().last().cloned(),
            Some(vec!["a".to_string(), "b".into()])
        );
    }

    #[test]
    fn test_cancel_releases_every_predicate() {
        let predicates = PredicateHarness::new();
        let (emit, _seen) = collect();
        let sub = track_filtered_list(
            fixed_root(vec!["a".into(), "b".into()]),
            predicates.tracker(),
            display_code(),
            emit,
        );
        sub.cancel();
        let mut cancelled = predicates.cancels.lock().clone();
        cancelled.sort();
        assert_eq!(cancelled, vec!["a".to_string(), "b".into()]);
    }
}
