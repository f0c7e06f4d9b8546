// src/inject.rs
// Host-framework injection adapter.
//
// Thin dependency-injection shim: a keyed registry that hands store
// instances to application layers that cannot thread an `Arc<Store>`
// through their call graph. Not part of dispatch/commit correctness.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::store::Store;

/// Key used when `install`/`use_store` are called without an explicit one.
pub const DEFAULT_STORE_KEY: &str = "store";

/// Keyed registry of store instances.
#[derive(Default)]
pub struct StoreRegistry {
    stores: RwLock<HashMap<String, Arc<Store>>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store under `key`, or under [`DEFAULT_STORE_KEY`] when
    /// none is given. A second install under the same key replaces the
    /// previous store.
    pub fn install(&self, store: Arc<Store>, key: Option<&str>) {
        let key = key.unwrap_or(DEFAULT_STORE_KEY).to_string();
        let mut stores = self.stores.write().unwrap_or_else(PoisonError::into_inner);
        if stores.insert(key.clone(), store).is_some() {
            tracing::warn!(key = %key, "store replaced an earlier install under the same key");
        }
    }

    /// Resolve a previously installed store.
    pub fn use_store(&self, key: Option<&str>) -> Option<Arc<Store>> {
        let key = key.unwrap_or(DEFAULT_STORE_KEY);
        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
        stores.get(key).cloned()
    }
}
