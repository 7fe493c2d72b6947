//! Rank-limited adaptive network search
//!
//! `NetworkSearch` draws its population from trust propagation (non-blocked
//! accounts within the current depth bound) through the list combinator: one
//! branch per member account, each branch nesting three sub-trackers
//! (objective match, confidence, quality). A candidate enters the ranking
//! once all three have reported a value; results are scored, sorted
//! descending and truncated to the runtime-mutable limit.
//!
//! Depth feedback: whenever the published result set changes, the deepest
//! accepted hop is compared against the current depth. Results still coming
//! from the deepest `grow_window` tiers schedule a depth increase after a
//! debounce delay (re-armed on every result change); deepest `shrink_window`
//! tiers all empty shrinks depth immediately, never below `min_depth`. Depth
//! changes flow into trust propagation incrementally.

use crate::candidate::{mean_combiner, rank, CandidateScore, ScoreCombiner, SearchResult};
use crate::depth::DepthTimer;
use meridian_core::{AccountId, Callback, CancelHandle};
use meridian_reactive::{display_code, track_derived_from_list, BranchTracker};
use meridian_trust::{AccountStanding, ConfidenceRecord, TrustPropagation};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Caller-supplied per-account sub-score tracker. The callback reports the
/// current score on subscribe (`None` while unknown) and again on change.
pub type ScoreTracker = Arc<dyn Fn(&AccountId, Callback<Option<f64>>) -> CancelHandle + Send + Sync>;

/// Search tuning. Heuristic constants are configurable defaults.
#[derive(Clone)]
pub struct SearchConfig {
    /// Exploration depth never shrinks below this.
    pub min_depth: u32,
    /// Results within this many tiers of the depth bound count as frontier
    /// activity and schedule growth.
    pub grow_window: u32,
    /// Depth shrinks when no result comes from the deepest this-many tiers.
    pub shrink_window: u32,
    /// Delay before a scheduled depth increase fires.
    pub debounce: Duration,
    /// Top-N truncation; `None` is unbounded.
    pub result_limit: Option<usize>,
    pub combiner: ScoreCombiner,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_depth: 3,
            grow_window: 3,
            shrink_window: 4,
            debounce: Duration::from_secs(3),
            result_limit: None,
            combiner: mean_combiner(),
        }
    }
}

impl fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchConfig")
            .field("min_depth", &self.min_depth)
            .field("grow_window", &self.grow_window)
            .field("shrink_window", &self.shrink_window)
            .field("debounce", &self.debounce)
            .field("result_limit", &self.result_limit)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct PartialCandidate {
    objective: Option<Option<f64>>,
    confidence: Option<Option<AccountStanding>>,
    quality: Option<Option<f64>>,
}

impl PartialCandidate {
    fn complete(&self, account: AccountId) -> Option<CandidateScore> {
        let objective = (self.objective.as_ref()?).as_ref()?;
        let standing = (self.confidence.as_ref()?).as_ref()?;
        let quality = (self.quality.as_ref()?).as_ref()?;
        Some(CandidateScore {
            account,
            hops: standing.hops,
            objective: *objective,
            confidence: standing.confidence,
            quality: *quality,
        })
    }
}

struct SearchState {
    candidates: Vec<CandidateScore>,
    last_results: Option<Vec<SearchResult>>,
    limit: Option<usize>,
}

struct SearchInner {
    trust: TrustPropagation,
    config: SearchConfig,
    on_results: Callback<Vec<SearchResult>>,
    cancelled: AtomicBool,
    timer: DepthTimer,
    state: Mutex<SearchState>,
}

impl SearchInner {
    fn on_candidates(self: &Arc<Self>, candidates: Vec<CandidateScore>) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        self.state.lock().candidates = candidates;
        // The debounce resets only when the published set actually changed.
        if self.publish(false) {
            self.apply_depth_feedback(self.config.debounce);
        }
    }

    /// Rank and emit; dedup against the previous emission unless forced.
    /// Returns whether an emission happened.
    fn publish(self: &Arc<Self>, force: bool) -> bool {
        let emission = {
            let mut st = self.state.lock();
            let results = rank(&st.candidates, &self.config.combiner, st.limit);
            if force || st.last_results.as_ref() != Some(&results) {
                st.last_results = Some(results.clone());
                Some(results)
            } else {
                None
            }
        };
        match emission {
            Some(results) => {
                if !self.cancelled.load(Ordering::Acquire) {
                    tracing::trace!(results = results.len(), "publishing ranked results");
                    (self.on_results)(results);
                }
                true
            }
            None => false,
        }
    }

    fn apply_depth_feedback(self: &Arc<Self>, delay: Duration) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        let depth = self.trust.depth();
        let deepest = {
            let st = self.state.lock();
            st.last_results
                .as_ref()
                .and_then(|results| results.iter().map(|r| r.hops).max())
                .unwrap_or(0)
        };
        let shrink_floor = depth.saturating_sub(self.config.shrink_window);
        let grow_floor = depth.saturating_sub(self.config.grow_window);
        if deepest <= shrink_floor && depth > self.config.min_depth {
            // Nothing accepted from the deep tiers: contract right away.
            self.timer.disarm();
            tracing::debug!(from = depth, deepest, "deep tiers idle, shrinking search depth");
            self.trust.change_depth(depth - 1);
        } else if deepest > grow_floor {
            let inner = self.clone();
            self.timer.arm(delay, move || inner.grow());
        } else {
            self.timer.disarm();
        }
    }

    fn grow(self: &Arc<Self>) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        let depth = self.trust.depth();
        tracing::debug!(from = depth, "frontier still productive, growing search depth");
        self.trust.change_depth(depth + 1);
    }
}

/// A live, rank-limited search over the trust-reachable account population.
pub struct NetworkSearch {
    inner: Arc<SearchInner>,
    handle: CancelHandle,
}

impl Clone for NetworkSearch {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl NetworkSearch {
    /// Start a search over `trust`'s membership. Takes ownership of the
    /// propagation: depth control and teardown belong to the search.
    pub fn start(
        trust: TrustPropagation,
        objective: ScoreTracker,
        quality: ScoreTracker,
        config: SearchConfig,
        on_results: Callback<Vec<SearchResult>>,
    ) -> Self {
        let limit = config.result_limit;
        let inner = Arc::new(SearchInner {
            trust: trust.clone(),
            config,
            on_results,
            cancelled: AtomicBool::new(false),
            timer: DepthTimer::new(),
            state: Mutex::new(SearchState {
                candidates: Vec::new(),
                last_results: None,
                limit,
            }),
        });

        // Membership: non-blocked accounts in range, in stable order.
        let root_tracker = {
            let trust = trust.clone();
            move |on_members: Callback<Vec<AccountId>>| {
                trust.subscribe(Arc::new(move |rows: Vec<ConfidenceRecord>| {
                    let mut members: Vec<AccountId> = rows
                        .iter()
                        .filter(|r| r.confidence >= 0.0)
                        .map(|r| r.account)
                        .collect();
                    members.sort_unstable();
                    on_members(members);
                }))
            }
        };

        let track_branch: BranchTracker<AccountId, Option<CandidateScore>> = {
            let trust = trust.clone();
            Arc::new(move |_code, push, account: &AccountId| {
                let account = *account;
                let state = Arc::new(Mutex::new(PartialCandidate::default()));
                let last: Arc<Mutex<Option<Option<CandidateScore>>>> =
                    Arc::new(Mutex::new(Some(None)));
                // First report right away so startup never waits on a
                // candidate whose sub-scores are still unknown.
                push(None);

                let report = {
                    let state = state.clone();
                    let last = last.clone();
                    let push = push.clone();
                    Arc::new(move || {
                        let current = state.lock().complete(account);
                        let changed = {
                            let mut last = last.lock();
                            if last.as_ref() == Some(&current) {
                                false
                            } else {
                                *last = Some(current);
                                true
                            }
                        };
                        if changed {
                            push(current);
                        }
                    })
                };

                let objective_sub = {
                    let state = state.clone();
                    let report = report.clone();
                    objective(
                        &account,
                        Arc::new(move |score| {
                            state.lock().objective = Some(score);
                            report();
                        }),
                    )
                };
                let quality_sub = {
                    let state = state.clone();
                    let report = report.clone();
                    quality(
                        &account,
                        Arc::new(move |score| {
                            state.lock().quality = Some(score);
                            report();
                        }),
                    )
                };
                let confidence_sub = {
                    let state = state.clone();
                    let report = report.clone();
                    trust.track_account(
                        account,
                        Arc::new(move |standing| {
                            state.lock().confidence = Some(standing);
                            report();
                        }),
                    )
                };

                let handle = CancelHandle::new();
                handle.attach(objective_sub);
                handle.attach(quality_sub);
                handle.attach(confidence_sub);
                handle
            })
        };

        let reduce = Arc::new(|values: &[Option<CandidateScore>]| {
            values.iter().flatten().copied().collect::<Vec<_>>()
        });
        let emit: Callback<Vec<CandidateScore>> = {
            let inner = inner.clone();
            Arc::new(move |candidates| inner.on_candidates(candidates))
        };
        let membership = track_derived_from_list(
            root_tracker,
            track_branch,
            display_code(),
            reduce,
            emit,
        );

        let handle = CancelHandle::new();
        {
            let inner = inner.clone();
            handle.on_cancel(move || {
                inner.cancelled.store(true, Ordering::Release);
                inner.timer.disarm();
                membership.cancel();
                inner.trust.cancel();
            });
        }
        Self { inner, handle }
    }

    /// Change the top-N bound. Forces a re-emission and re-evaluates depth
    /// feedback without debounce.
    pub fn set_result_limit(&self, limit: Option<usize>) {
        if self.inner.cancelled.load(Ordering::Acquire) {
            return;
        }
        self.inner.state.lock().limit = limit;
        self.inner.publish(true);
        self.inner.apply_depth_feedback(Duration::ZERO);
    }

    pub fn result_limit(&self) -> Option<usize> {
        self.inner.state.lock().limit
    }

    /// Current exploration depth.
    pub fn depth(&self) -> u32 {
        self.inner.trust.depth()
    }

    /// Most recently published result list.
    pub fn results(&self) -> Vec<SearchResult> {
        self.inner
            .state
            .lock()
            .last_results
            .clone()
            .unwrap_or_default()
    }

    /// Handle cancelling the whole search, for cascading teardown.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    /// Stop the search: cancels the membership subscription, every
    /// candidate's sub-trackers, any pending depth timer and the underlying
    /// propagation. Idempotent.
    pub fn cancel(&self) {
        self.handle.cancel();
    }
}
