//! Store-backed relations
//!
//! Adapts a `ValueTracker` plus an account-to-address directory into the
//! `RelationsTracker` shape propagation consumes. Each account's relation
//! store holds a JSON-encoded `Vec<TrustEdge>`.

use crate::edge::TrustEdge;
use crate::propagation::RelationsTracker;
use meridian_core::{AccountId, Callback, CancelHandle, StoreAddress};
use meridian_store::{StoreBackend, ValueTracker};
use std::sync::Arc;

/// Build a relations tracker over store-held relation lists.
///
/// `directory` resolves an account to its relation-store address. An account
/// without a directory entry, or whose store cannot currently be opened,
/// yields a subscription that never reports; propagation treats such an
/// account as contributing no edges until its store becomes available.
pub fn relations_from_stores<B, D>(tracker: ValueTracker<B>, directory: D) -> RelationsTracker
where
    B: StoreBackend,
    D: Fn(&AccountId) -> Option<StoreAddress> + Send + Sync + 'static,
{
    Arc::new(move |account: &AccountId, on_edges: Callback<Vec<TrustEdge>>| {
        let Some(address) = directory(account) else {
            tracing::debug!(%account, "no relation store known for account");
            return CancelHandle::new();
        };
        match tracker.track::<Vec<TrustEdge>>(&address, on_edges) {
            Ok(cancel) => cancel,
            Err(err) => {
                tracing::debug!(%account, %err, "relation store unavailable");
                CancelHandle::new()
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::RelationKind;
    use meridian_store::MemoryBackend;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[test]
    fn test_edges_replay_and_update_from_store() {
        let backend = MemoryBackend::new();
        let alice = AccountId::new();
        let bob = AccountId::new();
        let address = backend.create(alice.to_string().as_bytes());
        backend.write(
            &address,
            serde_json::to_value(vec![TrustEdge::new(alice, bob, RelationKind::SharedFavorite)])
                .unwrap(),
        );

        let directory: HashMap<AccountId, StoreAddress> = [(alice, address)].into();
        let relations = relations_from_stores(ValueTracker::new(backend.clone()), move |a| {
            directory.get(a).copied()
        });

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = relations(
            &alice,
            Arc::new(move |edges: Vec<TrustEdge>| sink.lock().push(edges)),
        );
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0][0].kind, RelationKind::SharedFavorite);

        backend.write(
            &address,
            serde_json::to_value(vec![TrustEdge::new(alice, bob, RelationKind::ExplicitTrust)])
                .unwrap(),
        );
        assert_eq!(seen.lock().len(), 2);
        sub.cancel();
    }

    #[test]
    fn test_unknown_account_never_reports() {
        let backend = MemoryBackend::new();
        let relations =
            relations_from_stores(ValueTracker::new(backend), |_: &AccountId| None);
        let seen = Arc::new(Mutex::new(0u32));
        let sink = seen.clone();
        let sub = relations(
            &AccountId::new(),
            Arc::new(move |_edges: Vec<TrustEdge>| *sink.lock() += 1),
        );
        assert_eq!(*seen.lock(), 0);
        sub.cancel();
    }
}
