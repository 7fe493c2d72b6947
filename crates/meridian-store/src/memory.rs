//! In-memory store backend
//!
//! Reference implementation of `StoreBackend` for tests and embedding. The
//! whole backend is an explicit state object owned by whoever created it, so
//! independent instances (e.g. in tests) never interfere.

use crate::backend::{StoreBackend, StoreHandle, StoreValue};
use crate::error::StoreError;
use meridian_core::{Callback, CancelHandle, StoreAddress};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct MemoryStore {
    value: RwLock<StoreValue>,
    listeners: Mutex<HashMap<u64, Callback<StoreValue>>>,
    next_listener: AtomicU64,
    open_handles: Mutex<HashSet<u64>>,
    opens_total: AtomicU64,
}

impl MemoryStore {
    fn new(initial: StoreValue) -> Self {
        Self {
            value: RwLock::new(initial),
            listeners: Mutex::new(HashMap::new()),
            next_listener: AtomicU64::new(0),
            open_handles: Mutex::new(HashSet::new()),
            opens_total: AtomicU64::new(0),
        }
    }

    fn notify(&self, value: &StoreValue) {
        let callbacks: Vec<Callback<StoreValue>> =
            self.listeners.lock().values().cloned().collect();
        for cb in callbacks {
            cb(value.clone());
        }
    }
}

struct MemoryInner {
    stores: Mutex<HashMap<StoreAddress, Arc<MemoryStore>>>,
    next_handle: AtomicU64,
}

/// In-memory `StoreBackend`.
///
/// Opens of the same address are serialized by the store-map lock. The backend
/// records cumulative open counts per address so subscription-lifecycle tests
/// can assert that no extra open happened.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                stores: Mutex::new(HashMap::new()),
                next_handle: AtomicU64::new(0),
            }),
        }
    }

    /// Create a store whose address is derived from `seed`, with `null`
    /// content. Returns the new address; creating the same seed twice yields
    /// the same address and keeps the existing content.
    pub fn create(&self, seed: &[u8]) -> StoreAddress {
        let address = StoreAddress::derive(seed);
        self.inner
            .stores
            .lock()
            .entry(address)
            .or_insert_with(|| Arc::new(MemoryStore::new(StoreValue::Null)));
        address
    }

    /// Write content to a store, creating it if absent, and notify listeners.
    ///
    /// This stands in for both local writes and incoming replication.
    pub fn write(&self, address: &StoreAddress, value: StoreValue) {
        let store = self
            .inner
            .stores
            .lock()
            .entry(*address)
            .or_insert_with(|| Arc::new(MemoryStore::new(StoreValue::Null)))
            .clone();
        *store.value.write() = value.clone();
        store.notify(&value);
    }

    /// Number of currently open handles for an address.
    pub fn open_count(&self, address: &StoreAddress) -> usize {
        self.inner
            .stores
            .lock()
            .get(address)
            .map(|s| s.open_handles.lock().len())
            .unwrap_or(0)
    }

    /// Cumulative number of opens ever performed for an address.
    pub fn opens_total(&self, address: &StoreAddress) -> u64 {
        self.inner
            .stores
            .lock()
            .get(address)
            .map(|s| s.opens_total.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn store_for(&self, handle: &StoreHandle) -> Result<Arc<MemoryStore>, StoreError> {
        let store = self
            .inner
            .stores
            .lock()
            .get(handle.address())
            .cloned()
            .ok_or_else(|| StoreError::unavailable(*handle.address()))?;
        if !store.open_handles.lock().contains(&handle.id()) {
            return Err(StoreError::handle_closed(*handle.address()));
        }
        Ok(store)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreBackend for MemoryBackend {
    fn open(&self, address: &StoreAddress) -> Result<StoreHandle, StoreError> {
        // Holding the map lock for the whole open serializes concurrent opens
        // of the same address.
        let stores = self.inner.stores.lock();
        let store = stores
            .get(address)
            .cloned()
            .ok_or_else(|| StoreError::unavailable(*address))?;
        let id = self.inner.next_handle.fetch_add(1, Ordering::Relaxed);
        store.open_handles.lock().insert(id);
        store.opens_total.fetch_add(1, Ordering::Relaxed);
        Ok(StoreHandle::new(*address, id))
    }

    fn read_all(&self, handle: &StoreHandle) -> Result<StoreValue, StoreError> {
        let store = self.store_for(handle)?;
        let value = store.value.read().clone();
        Ok(value)
    }

    fn on_change(&self, handle: &StoreHandle, callback: Callback<StoreValue>) -> CancelHandle {
        let store = match self.store_for(handle) {
            Ok(store) => store,
            Err(err) => {
                tracing::debug!(%err, "on_change on unusable handle, listener dropped");
                return CancelHandle::new();
            }
        };
        let listener_id = store.next_listener.fetch_add(1, Ordering::Relaxed);
        store.listeners.lock().insert(listener_id, callback);

        let store_ref = Arc::downgrade(&store);
        CancelHandle::from_fn(move || {
            if let Some(store) = store_ref.upgrade() {
                store.listeners.lock().remove(&listener_id);
            }
        })
    }

    fn close(&self, handle: StoreHandle) {
        if let Some(store) = self.inner.stores.lock().get(handle.address()) {
            store.open_handles.lock().remove(&handle.id());
        }
    }
}
