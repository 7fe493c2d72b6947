//! Live confidence propagation
//!
//! `TrustPropagation` maintains, for one origin account, a live relation
//! subscription for every account reachable within the current depth bound
//! and recomputes confidence scores whenever any tracked relation set
//! changes. Confidence combines all incoming weighted edges noisy-OR style:
//!
//! `confidence = (1 − Π(1 − w·att^d)) − (1 − Π(1 − |w|·att^d))`
//!
//! over positive and negative edges respectively, where `d` is the emitting
//! account's hop distance from the origin. Multiple independent positive
//! relations raise confidence sup-additively; a direct edge weighing exactly
//! `1` or `-1` short-circuits to that value, the block side dominating.
//!
//! Confidence is recomputed from the full known edge set on every pass;
//! only the relation *subscriptions* are maintained incrementally (started
//! when an account enters the depth bound, stopped when it leaves).

use crate::edge::{TrustConfig, TrustEdge};
use meridian_core::{AccountId, Callback, CancelHandle};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Live relation set per account: `(account, on_edges) -> cancel`. The
/// callback must replay the current set on subscribe when one is known;
/// an unreachable account simply never reports.
pub type RelationsTracker =
    Arc<dyn Fn(&AccountId, Callback<Vec<TrustEdge>>) -> CancelHandle + Send + Sync>;

/// One account's current standing relative to the origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccountStanding {
    pub confidence: f64,
    pub hops: u32,
}

/// One row of the full propagation output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceRecord {
    pub account: AccountId,
    pub confidence: f64,
    pub hops: u32,
}

struct TrackedRelations {
    edges: Option<Vec<TrustEdge>>,
    alive: Arc<AtomicBool>,
    cancel: Option<CancelHandle>,
}

struct PropState {
    depth: u32,
    tracked: HashMap<AccountId, TrackedRelations>,
    records: BTreeMap<AccountId, AccountStanding>,
    subscribers: HashMap<u64, Callback<Vec<ConfidenceRecord>>>,
    watchers: HashMap<AccountId, HashMap<u64, Callback<Option<AccountStanding>>>>,
    next_id: u64,
    recompute_running: bool,
    recompute_pending: bool,
}

struct PropInner {
    origin: AccountId,
    config: TrustConfig,
    relations: RelationsTracker,
    cancelled: AtomicBool,
    state: Mutex<PropState>,
}

impl PropInner {
    fn on_edges(self: &Arc<Self>, account: AccountId, alive: &Arc<AtomicBool>, edges: Vec<TrustEdge>) {
        if self.cancelled.load(Ordering::Acquire) || !alive.load(Ordering::Acquire) {
            return;
        }
        {
            let mut st = self.state.lock();
            let Some(entry) = st.tracked.get_mut(&account) else {
                return;
            };
            if !Arc::ptr_eq(&entry.alive, alive) {
                return;
            }
            // An account's relation store speaks only for that account.
            entry.edges = Some(edges.into_iter().filter(|e| e.from == account).collect());
        }
        self.schedule_recompute();
    }

    fn subscribe_relations(self: &Arc<Self>, account: AccountId, alive: Arc<AtomicBool>) {
        let callback: Callback<Vec<TrustEdge>> = {
            let inner = self.clone();
            let alive = alive.clone();
            Arc::new(move |edges| inner.on_edges(account, &alive, edges))
        };
        let cancel = (self.relations)(&account, callback);
        let stored = {
            let mut st = self.state.lock();
            match st.tracked.get_mut(&account) {
                Some(entry)
                    if Arc::ptr_eq(&entry.alive, &alive) && alive.load(Ordering::Acquire) =>
                {
                    entry.cancel = Some(cancel.clone());
                    true
                }
                _ => false,
            }
        };
        if !stored {
            cancel.cancel();
        }
    }

    /// Coalesced recompute: notifications landing while a pass runs fold
    /// into one follow-up pass.
    fn schedule_recompute(self: &Arc<Self>) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        {
            let mut st = self.state.lock();
            if st.recompute_running {
                st.recompute_pending = true;
                return;
            }
            st.recompute_running = true;
        }
        loop {
            self.recompute_pass();
            let again = {
                let mut st = self.state.lock();
                if st.recompute_pending {
                    st.recompute_pending = false;
                    true
                } else {
                    st.recompute_running = false;
                    false
                }
            };
            if !again {
                break;
            }
        }
    }

    fn recompute_pass(self: &Arc<Self>) {
        struct PassOutput {
            to_cancel: Vec<CancelHandle>,
            to_subscribe: Vec<(AccountId, Arc<AtomicBool>)>,
            full_emission: Option<Vec<ConfidenceRecord>>,
            watcher_calls: Vec<(Callback<Option<AccountStanding>>, Option<AccountStanding>)>,
            subscriber_calls: Vec<Callback<Vec<ConfidenceRecord>>>,
        }

        let out = {
            let mut st = self.state.lock();
            let depth = st.depth;

            // Hop distances over all currently-known edges.
            let mut outgoing: HashMap<AccountId, Vec<&TrustEdge>> = HashMap::new();
            let mut incoming: HashMap<AccountId, Vec<&TrustEdge>> = HashMap::new();
            for entry in st.tracked.values() {
                if let Some(edges) = &entry.edges {
                    for edge in edges {
                        outgoing.entry(edge.from).or_default().push(edge);
                        incoming.entry(edge.to).or_default().push(edge);
                    }
                }
            }
            let mut dist: HashMap<AccountId, u32> = HashMap::new();
            dist.insert(self.origin, 0);
            let mut queue = VecDeque::from([self.origin]);
            while let Some(current) = queue.pop_front() {
                let d = dist[&current];
                if d >= depth {
                    continue;
                }
                if let Some(edges) = outgoing.get(&current) {
                    for edge in edges {
                        if !dist.contains_key(&edge.to) {
                            dist.insert(edge.to, d + 1);
                            queue.push_back(edge.to);
                        }
                    }
                }
            }

            // Confidence per reachable account.
            let weights = &self.config.weights;
            let attenuation = self.config.attenuation;
            let mut records: BTreeMap<AccountId, AccountStanding> = BTreeMap::new();
            for (&account, &hops) in &dist {
                if account == self.origin {
                    continue;
                }
                let inbound = incoming.get(&account).map(Vec::as_slice).unwrap_or(&[]);
                // The short-circuit keys on the effective weight, so a
                // reconfigured marker below full strength combines normally.
                let direct_block = inbound
                    .iter()
                    .any(|e| e.from == self.origin && e.weight(weights) == -1.0);
                let direct_trust = inbound
                    .iter()
                    .any(|e| e.from == self.origin && e.weight(weights) == 1.0);
                let confidence = if direct_block {
                    -1.0
                } else if direct_trust {
                    1.0
                } else {
                    let mut positive = 1.0f64;
                    let mut negative = 1.0f64;
                    for edge in inbound {
                        let Some(&from_dist) = dist.get(&edge.from) else {
                            continue;
                        };
                        let weight = edge.weight(weights);
                        let contribution = weight.abs() * attenuation.powi(from_dist as i32);
                        if weight > 0.0 {
                            positive *= 1.0 - contribution.min(1.0);
                        } else if weight < 0.0 {
                            negative *= 1.0 - contribution.min(1.0);
                        }
                    }
                    ((1.0 - positive) - (1.0 - negative)).clamp(-1.0, 1.0)
                };
                records.insert(account, AccountStanding { confidence, hops });
            }

            // Incremental subscription diff against the in-range set.
            let mut to_cancel = Vec::new();
            let mut to_subscribe = Vec::new();
            let gone: Vec<AccountId> = st
                .tracked
                .keys()
                .filter(|a| **a != self.origin && !dist.contains_key(a))
                .copied()
                .collect();
            for account in gone {
                if let Some(entry) = st.tracked.remove(&account) {
                    entry.alive.store(false, Ordering::Release);
                    if let Some(cancel) = entry.cancel {
                        to_cancel.push(cancel);
                    }
                    tracing::debug!(%account, "account left propagation range");
                }
            }
            for &account in dist.keys() {
                if !st.tracked.contains_key(&account) {
                    let alive = Arc::new(AtomicBool::new(true));
                    st.tracked.insert(
                        account,
                        TrackedRelations {
                            edges: None,
                            alive: alive.clone(),
                            cancel: None,
                        },
                    );
                    to_subscribe.push((account, alive));
                    tracing::debug!(%account, "account entered propagation range");
                }
            }

            // Emit only when something actually changed.
            let changed = records != st.records;
            let mut watcher_calls = Vec::new();
            let mut subscriber_calls = Vec::new();
            let mut full_emission = None;
            if changed {
                for (account, watchers) in &st.watchers {
                    let now = records.get(account).copied();
                    let before = st.records.get(account).copied();
                    if now != before {
                        for cb in watchers.values() {
                            watcher_calls.push((cb.clone(), now));
                        }
                    }
                }
                let rows: Vec<ConfidenceRecord> = records
                    .iter()
                    .map(|(account, standing)| ConfidenceRecord {
                        account: *account,
                        confidence: standing.confidence,
                        hops: standing.hops,
                    })
                    .collect();
                subscriber_calls = st.subscribers.values().cloned().collect();
                tracing::trace!(accounts = rows.len(), depth, "confidence set changed");
                full_emission = Some(rows);
                st.records = records;
            }

            PassOutput {
                to_cancel,
                to_subscribe,
                full_emission,
                watcher_calls,
                subscriber_calls,
            }
        };

        for cancel in out.to_cancel {
            cancel.cancel();
        }
        if let Some(rows) = out.full_emission {
            for cb in out.subscriber_calls {
                cb(rows.clone());
            }
        }
        for (cb, standing) in out.watcher_calls {
            cb(standing);
        }
        for (account, alive) in out.to_subscribe {
            self.subscribe_relations(account, alive);
        }
    }
}

/// Live trust propagation for one origin account.
pub struct TrustPropagation {
    inner: Arc<PropInner>,
    handle: CancelHandle,
}

impl Clone for TrustPropagation {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl TrustPropagation {
    /// Start propagation from `origin`, exploring up to `depth` hops.
    pub fn start(
        origin: AccountId,
        depth: u32,
        config: TrustConfig,
        relations: RelationsTracker,
    ) -> Self {
        let inner = Arc::new(PropInner {
            origin,
            config,
            relations,
            cancelled: AtomicBool::new(false),
            state: Mutex::new(PropState {
                depth,
                tracked: HashMap::new(),
                records: BTreeMap::new(),
                subscribers: HashMap::new(),
                watchers: HashMap::new(),
                next_id: 0,
                recompute_running: false,
                recompute_pending: false,
            }),
        });

        let origin_alive = Arc::new(AtomicBool::new(true));
        inner.state.lock().tracked.insert(
            origin,
            TrackedRelations {
                edges: None,
                alive: origin_alive.clone(),
                cancel: None,
            },
        );
        inner.subscribe_relations(origin, origin_alive);

        let handle = CancelHandle::new();
        {
            let inner = inner.clone();
            handle.on_cancel(move || {
                inner.cancelled.store(true, Ordering::Release);
                let cancels: Vec<CancelHandle> = {
                    let mut st = inner.state.lock();
                    st.subscribers.clear();
                    st.watchers.clear();
                    st.records.clear();
                    let tracked = std::mem::take(&mut st.tracked);
                    tracked
                        .into_values()
                        .filter_map(|entry| {
                            entry.alive.store(false, Ordering::Release);
                            entry.cancel
                        })
                        .collect()
                };
                for cancel in cancels {
                    cancel.cancel();
                }
            });
        }
        Self { inner, handle }
    }

    pub fn origin(&self) -> AccountId {
        self.inner.origin
    }

    pub fn depth(&self) -> u32 {
        self.inner.state.lock().depth
    }

    /// Change the exploration depth. Only the difference between the old and
    /// new in-range account sets is subscribed or unsubscribed.
    pub fn change_depth(&self, new_depth: u32) {
        if self.inner.cancelled.load(Ordering::Acquire) {
            return;
        }
        {
            let mut st = self.inner.state.lock();
            if st.depth == new_depth {
                return;
            }
            tracing::debug!(from = st.depth, to = new_depth, "propagation depth changed");
            st.depth = new_depth;
        }
        self.inner.schedule_recompute();
    }

    /// Subscribe to the full confidence set. Replays the current set
    /// immediately, then delivers every changed set.
    pub fn subscribe(&self, on_records: Callback<Vec<ConfidenceRecord>>) -> CancelHandle {
        let (id, rows) = {
            let mut st = self.inner.state.lock();
            let id = st.next_id;
            st.next_id += 1;
            st.subscribers.insert(id, on_records.clone());
            let rows: Vec<ConfidenceRecord> = st
                .records
                .iter()
                .map(|(account, standing)| ConfidenceRecord {
                    account: *account,
                    confidence: standing.confidence,
                    hops: standing.hops,
                })
                .collect();
            (id, rows)
        };
        on_records(rows);
        let inner = self.inner.clone();
        CancelHandle::from_fn(move || {
            inner.state.lock().subscribers.remove(&id);
        })
    }

    /// Track one account's standing. Replays the current value (or `None`)
    /// immediately, then notifies only when that account's record changes.
    pub fn track_account(
        &self,
        account: AccountId,
        on_standing: Callback<Option<AccountStanding>>,
    ) -> CancelHandle {
        let current = {
            let mut st = self.inner.state.lock();
            let id = st.next_id;
            st.next_id += 1;
            st.watchers
                .entry(account)
                .or_default()
                .insert(id, on_standing.clone());
            (id, st.records.get(&account).copied())
        };
        let (id, standing) = current;
        on_standing(standing);
        let inner = self.inner.clone();
        CancelHandle::from_fn(move || {
            let mut st = inner.state.lock();
            if let Some(watchers) = st.watchers.get_mut(&account) {
                watchers.remove(&id);
                if watchers.is_empty() {
                    st.watchers.remove(&account);
                }
            }
        })
    }

    /// Handle cancelling the whole propagation, for cascading teardown.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    /// Stop propagation: cancels every relation subscription and drops all
    /// subscribers and watchers. Idempotent.
    pub fn cancel(&self) {
        self.handle.cancel();
    }
}
