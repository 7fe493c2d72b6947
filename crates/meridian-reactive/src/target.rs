//! Single-target derivation
//!
//! `track_derived_from_optional_target` is the "at most one" counterpart of
//! the list combinator: the root names zero or one target address, and a
//! nested subscription is re-pointed as that address changes. Used for
//! indirections like "the dataset a profile currently links to".

use meridian_core::{Callback, CancelHandle};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct ActiveTarget<A> {
    address: A,
    alive: Arc<AtomicBool>,
    cancel: Option<CancelHandle>,
}

struct TargetState<A> {
    current: Option<ActiveTarget<A>>,
    /// Whether any root notification has been handled yet; the very first
    /// `None` emits `None` once, later identical reports are no-ops.
    started: bool,
    queue: VecDeque<Option<A>>,
    repoint_in_progress: bool,
}

struct TargetInner<A, U> {
    track_target: Arc<dyn Fn(&A, Callback<U>) -> CancelHandle + Send + Sync>,
    emit: Callback<Option<U>>,
    cancelled: AtomicBool,
    state: Mutex<TargetState<A>>,
}

impl<A, U> TargetInner<A, U>
where
    A: Clone + PartialEq + Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    /// Root notifications are serialized the same way list diff passes are.
    fn on_new_target(self: &Arc<Self>, next: Option<A>) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        {
            let mut st = self.state.lock();
            st.queue.push_back(next);
            if st.repoint_in_progress {
                return;
            }
            st.repoint_in_progress = true;
        }
        loop {
            let next = {
                let mut st = self.state.lock();
                match st.queue.pop_front() {
                    Some(next) => next,
                    None => {
                        st.repoint_in_progress = false;
                        break;
                    }
                }
            };
            self.repoint(next);
        }
    }

    fn repoint(self: &Arc<Self>, next: Option<A>) {
        let (old_cancel, new_target) = {
            let mut st = self.state.lock();
            let unchanged = match (&st.current, &next) {
                (Some(active), Some(addr)) => active.address == *addr,
                (None, None) => st.started,
                _ => false,
            };
            st.started = true;
            if unchanged {
                return;
            }
            let old = st.current.take();
            let old_cancel = old.and_then(|active| {
                active.alive.store(false, Ordering::Release);
                active.cancel
            });
            let new_target = next.map(|address| {
                let alive = Arc::new(AtomicBool::new(true));
                st.current = Some(ActiveTarget {
                    address: address.clone(),
                    alive: alive.clone(),
                    cancel: None,
                });
                (address, alive)
            });
            (old_cancel, new_target)
        };

        if let Some(cancel) = old_cancel {
            cancel.cancel();
        }

        match new_target {
            None => (self.emit)(None),
            Some((address, alive)) => {
                let callback: Callback<U> = {
                    let inner = self.clone();
                    let alive = alive.clone();
                    Arc::new(move |value: U| {
                        if inner.cancelled.load(Ordering::Acquire)
                            || !alive.load(Ordering::Acquire)
                        {
                            return;
                        }
                        (inner.emit)(Some(value));
                    })
                };
                let cancel = (self.track_target)(&address, callback);
                let stored = {
                    let mut st = self.state.lock();
                    match st.current.as_mut() {
                        Some(active)
                            if Arc::ptr_eq(&active.alive, &alive)
                                && alive.load(Ordering::Acquire) =>
                        {
                            active.cancel = Some(cancel.clone());
                            true
                        }
                        _ => false,
                    }
                };
                if !stored {
                    cancel.cancel();
                }
            }
        }
    }
}

/// Track a value behind an optional, changing indirection.
///
/// `track_root` reports the current target address (or `None`); the emitted
/// value is `Some` of the target's live value, or `None` while no target is
/// named. Re-reporting the address currently subscribed is a no-op: the
/// nested subscription is kept, not recreated.
pub fn track_derived_from_optional_target<A, U, R, S>(
    track_root: R,
    track_target: S,
    emit: Callback<Option<U>>,
) -> CancelHandle
where
    R: FnOnce(Callback<Option<A>>) -> CancelHandle,
    S: Fn(&A, Callback<U>) -> CancelHandle + Send + Sync + 'static,
    A: Clone + PartialEq + Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    let inner = Arc::new(TargetInner {
        track_target: Arc::new(track_target)
            as Arc<dyn Fn(&A, Callback<U>) -> CancelHandle + Send + Sync>,
        emit,
        cancelled: AtomicBool::new(false),
        state: Mutex::new(TargetState {
            current: None,
            started: false,
            queue: VecDeque::new(),
            repoint_in_progress: false,
        }),
    });

    let root_callback: Callback<Option<A>> = {
        let inner = inner.clone();
        Arc::new(move |next| inner.on_new_target(next))
    };
    let root_cancel = track_root(root_callback);

    let handle = CancelHandle::new();
    handle.on_cancel(move || {
        inner.cancelled.store(true, Ordering::Release);
        root_cancel.cancel();
        let target_cancel = {
            let mut st = inner.state.lock();
            st.current.take().and_then(|active| {
                active.alive.store(false, Ordering::Release);
                active.cancel
            })
        };
        if let Some(cancel) = target_cancel {
            cancel.cancel();
        }
    });
    handle
}
