// src/getters.rs
// Getter cache composer: exposes the flattened getter table as one flat,
// lazily-evaluated namespace.
//
// Evaluation happens against a state snapshot, never under the store lock,
// so getter bodies can freely read other getters through their scope
// proxies. Results are memoized per snapshot inside a `GetterSet`, and the
// store folds those results into a cross-call cache keyed on (state
// version, table epoch). A commit or a tree change invalidates everything,
// which also discards stale entries for removed modules.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use crate::path::resolve_key;
use crate::reactive::state_at;
use crate::registry::GetterEntry;

/// The scope a getter executes in: its module's state slice, sibling
/// getters under the same namespace, and the root equivalents.
pub struct GetterCtx<'a> {
    pub(crate) module_state: Value,
    pub(crate) namespace: Vec<String>,
    pub(crate) set: &'a GetterSet,
}

impl GetterCtx<'_> {
    /// The owning module's state slice.
    pub fn state(&self) -> &Value {
        &self.module_state
    }

    /// Another getter of the same module, by local name.
    pub fn getter(&self, name: &str) -> Option<Value> {
        self.set.value(&resolve_key(&self.namespace, name))
    }

    /// The whole state tree.
    pub fn root_state(&self) -> &Value {
        self.set.root()
    }

    /// Any getter, by canonical global key.
    pub fn root_getter(&self, key: &str) -> Option<Value> {
        self.set.value(key)
    }
}

/// One evaluation scope over a single state snapshot.
pub(crate) struct GetterSet {
    table: Arc<HashMap<String, GetterEntry>>,
    root: Value,
    cache: RefCell<HashMap<String, Value>>,
    evaluating: RefCell<HashSet<String>>,
}

impl GetterSet {
    pub(crate) fn new(table: Arc<HashMap<String, GetterEntry>>, root: Value) -> Self {
        Self::seeded(table, root, HashMap::new())
    }

    pub(crate) fn seeded(
        table: Arc<HashMap<String, GetterEntry>>,
        root: Value,
        seed: HashMap<String, Value>,
    ) -> Self {
        Self {
            table,
            root,
            cache: RefCell::new(seed),
            evaluating: RefCell::new(HashSet::new()),
        }
    }

    pub(crate) fn root(&self) -> &Value {
        &self.root
    }

    /// Evaluate the getter under `key`, memoizing within this snapshot.
    pub(crate) fn value(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.cache.borrow().get(key) {
            return Some(value.clone());
        }
        let entry = self.table.get(key)?.clone();

        if !self.evaluating.borrow_mut().insert(key.to_string()) {
            tracing::warn!(getter = key, "circular getter dependency");
            return None;
        }

        let module_state = state_at(&self.root, &entry.path)
            .cloned()
            .unwrap_or(Value::Null);
        let ctx = GetterCtx {
            module_state,
            namespace: entry.namespace,
            set: self,
        };
        let value = (entry.getter)(&ctx);

        self.evaluating.borrow_mut().remove(key);
        self.cache
            .borrow_mut()
            .insert(key.to_string(), value.clone());
        Some(value)
    }

    pub(crate) fn into_cache(self) -> HashMap<String, Value> {
        self.cache.into_inner()
    }
}

/// Cross-call memoization state held by the store.
#[derive(Default)]
pub(crate) struct GetterCache {
    pub(crate) version: u64,
    pub(crate) epoch: u64,
    pub(crate) values: HashMap<String, Value>,
}

impl GetterCache {
    pub(crate) fn is_current(&self, version: u64, epoch: u64) -> bool {
        self.version == version && self.epoch == epoch
    }
}
