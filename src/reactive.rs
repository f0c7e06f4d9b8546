// src/reactive.rs
// Reactive state container seam.
//
// The store core treats reactivity as an injectable collaborator with
// get/set/watch semantics; `SignalState` is the default implementation used
// when no host reactivity system is wired in. It keeps the whole state tree
// behind one lock, bumps a version counter on every write (the getter cache
// keys its validity on that counter), fans writes out to watchers, and
// reports strict-mode violations for writes that happen outside an active
// commit.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock, Weak};

use serde_json::{Map, Value};
use uuid::Uuid;

pub type WatchExpr = dyn Fn(&Value) -> Value + Send + Sync;
pub type WatchCallback = dyn Fn(&Value, &Value) + Send + Sync;

/// Options accepted by `watch`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// Watch nested fields. The default container compares whole computed
    /// values structurally, so this is always effectively on; the flag is
    /// part of the container contract for implementations that track
    /// dependencies at finer granularity.
    pub deep: bool,
    /// Invoke the callback immediately at registration with the current
    /// value (the old-value argument is `Value::Null` for that first call).
    pub immediate: bool,
}

/// Handle returned by `watch`; `unwatch()` removes the watcher, dropping
/// the handle does not.
pub struct WatchHandle {
    remove: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl WatchHandle {
    pub fn unwatch(&self) {
        let remove = self
            .remove
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(remove) = remove {
            remove();
        }
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle").finish()
    }
}

/// The reactive state collaborator consumed by the store core.
///
/// All paths are sequences of object keys from the root; an empty path
/// addresses the whole tree. Writes must bump `version()` and notify
/// watchers. Implementations check the bound commit flag on every write and
/// report a strict-mode violation when strict is enabled and no commit is
/// in progress.
pub trait StateContainer: Send + Sync {
    /// Clone of the whole state tree.
    fn snapshot(&self) -> Value;

    /// Clone of the subtree at `path`, if present.
    fn get(&self, path: &[String]) -> Option<Value>;

    /// Install `value` at `path`, creating intermediate objects as needed.
    fn set(&self, path: &[String], value: Value);

    /// Delete the key addressed by `path` from its parent object.
    fn remove(&self, path: &[String]);

    /// Swap the whole tree.
    fn replace(&self, root: Value);

    /// Run `f` with mutable access to the root. Used by the commit engine
    /// to apply mutation handlers to module slices.
    fn update(&self, f: &mut dyn FnMut(&mut Value));

    /// Monotonically increasing write counter.
    fn version(&self) -> u64;

    /// Register a watcher over a derived expression of the root state.
    fn watch(
        &self,
        expr: Box<WatchExpr>,
        callback: Box<WatchCallback>,
        options: WatchOptions,
    ) -> WatchHandle;

    /// Wire in the store's committing flag. Called once at store
    /// construction; later calls are ignored.
    fn bind_commit_flag(&self, flag: Arc<AtomicBool>);

    /// Enable or disable strict-mode write checking.
    fn set_strict(&self, strict: bool);

    /// Number of strict-mode violations observed so far.
    fn strict_violations(&self) -> u64;
}

struct Watcher {
    id: Uuid,
    expr: Box<WatchExpr>,
    callback: Box<WatchCallback>,
    last: Mutex<Value>,
    #[allow(dead_code)]
    deep: bool,
}

type WatcherList = Arc<RwLock<Vec<Arc<Watcher>>>>;

/// Default in-process state container.
pub struct SignalState {
    root: RwLock<Value>,
    version: AtomicU64,
    watchers: WatcherList,
    committing: OnceLock<Arc<AtomicBool>>,
    strict: AtomicBool,
    violations: AtomicU64,
}

impl SignalState {
    pub fn new(root: Value) -> Self {
        Self {
            root: RwLock::new(root),
            version: AtomicU64::new(0),
            watchers: Arc::new(RwLock::new(Vec::new())),
            committing: OnceLock::new(),
            strict: AtomicBool::new(false),
            violations: AtomicU64::new(0),
        }
    }

    fn check_write_allowed(&self, op: &str) {
        if !self.strict.load(Ordering::Relaxed) {
            return;
        }
        let committing = self
            .committing
            .get()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false);
        if !committing {
            self.violations.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                operation = op,
                "strict mode: state written outside a mutation handler"
            );
        }
    }

    fn write_guarded(&self, op: &str, f: impl FnOnce(&mut Value)) {
        self.check_write_allowed(op);
        let snapshot = {
            let mut root = self.root.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut root);
            self.version.fetch_add(1, Ordering::Release);
            root.clone()
        };
        self.notify_watchers(&snapshot);
    }

    fn notify_watchers(&self, root: &Value) {
        let watchers: Vec<Arc<Watcher>> = {
            let list = self.watchers.read().unwrap_or_else(PoisonError::into_inner);
            list.clone()
        };
        for watcher in watchers {
            let new_value = (watcher.expr)(root);
            let mut last = watcher.last.lock().unwrap_or_else(PoisonError::into_inner);
            if *last != new_value {
                let old = std::mem::replace(&mut *last, new_value.clone());
                drop(last);
                (watcher.callback)(&new_value, &old);
            }
        }
    }
}

impl StateContainer for SignalState {
    fn snapshot(&self) -> Value {
        self.root
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn get(&self, path: &[String]) -> Option<Value> {
        let root = self.root.read().unwrap_or_else(PoisonError::into_inner);
        state_at(&root, path).cloned()
    }

    fn set(&self, path: &[String], value: Value) {
        self.write_guarded("set", |root| {
            if path.is_empty() {
                *root = value;
            } else {
                let (parent_path, key) = (&path[..path.len() - 1], &path[path.len() - 1]);
                let parent = ensure_slice(root, parent_path);
                if let Value::Object(map) = parent {
                    map.insert(key.clone(), value);
                }
            }
        });
    }

    fn remove(&self, path: &[String]) {
        if path.is_empty() {
            return;
        }
        self.write_guarded("remove", |root| {
            let (parent_path, key) = (&path[..path.len() - 1], &path[path.len() - 1]);
            if let Some(Value::Object(map)) = state_at_mut(root, parent_path) {
                map.remove(key);
            }
        });
    }

    fn replace(&self, root: Value) {
        self.write_guarded("replace", |current| *current = root);
    }

    fn update(&self, f: &mut dyn FnMut(&mut Value)) {
        self.write_guarded("update", |root| f(root));
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn watch(
        &self,
        expr: Box<WatchExpr>,
        callback: Box<WatchCallback>,
        options: WatchOptions,
    ) -> WatchHandle {
        let initial = expr(&self.snapshot());
        if options.immediate {
            callback(&initial, &Value::Null);
        }
        let watcher = Arc::new(Watcher {
            id: Uuid::new_v4(),
            expr,
            callback,
            last: Mutex::new(initial),
            deep: options.deep,
        });
        let id = watcher.id;
        {
            let mut list = self.watchers.write().unwrap_or_else(PoisonError::into_inner);
            list.push(watcher);
        }
        let weak: Weak<RwLock<Vec<Arc<Watcher>>>> = Arc::downgrade(&self.watchers);
        WatchHandle {
            remove: Mutex::new(Some(Box::new(move || {
                if let Some(list) = weak.upgrade() {
                    let mut list = list.write().unwrap_or_else(PoisonError::into_inner);
                    list.retain(|w| w.id != id);
                }
            }))),
        }
    }

    fn bind_commit_flag(&self, flag: Arc<AtomicBool>) {
        let _ = self.committing.set(flag);
    }

    fn set_strict(&self, strict: bool) {
        self.strict.store(strict, Ordering::Relaxed);
    }

    fn strict_violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }
}

/// Navigate to the subtree at `path`.
pub(crate) fn state_at<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = root;
    for key in path {
        current = current.as_object()?.get(key)?;
    }
    Some(current)
}

pub(crate) fn state_at_mut<'a>(root: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    let mut current = root;
    for key in path {
        current = current.as_object_mut()?.get_mut(key)?;
    }
    Some(current)
}

/// Navigate to `path`, creating empty objects along the way. Non-object
/// intermediates are overwritten with objects; module state installation is
/// the only caller and always owns the affected slice.
pub(crate) fn ensure_slice<'a>(root: &'a mut Value, path: &[String]) -> &'a mut Value {
    let mut current = root;
    for key in path {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map.entry(key.clone()).or_insert(Value::Object(Map::new())),
            // Coerced to an object just above.
            other => return other,
        };
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn set_creates_intermediate_objects_and_bumps_version() {
        let state = SignalState::new(json!({}));
        assert_eq!(state.version(), 0);
        state.set(
            &["a".to_string(), "b".to_string()],
            json!({ "count": 1 }),
        );
        assert_eq!(state.version(), 1);
        assert_eq!(
            state.get(&["a".to_string(), "b".to_string(), "count".to_string()]),
            Some(json!(1))
        );
    }

    #[test]
    fn watch_fires_on_change_only() {
        let state = SignalState::new(json!({ "count": 0 }));
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let _handle = state.watch(
            Box::new(|root| root["count"].clone()),
            Box::new(move |_, _| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
            WatchOptions::default(),
        );

        state.set(&["count".to_string()], json!(1));
        state.set(&["other".to_string()], json!(true)); // expr value unchanged
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn immediate_watch_fires_at_registration() {
        let state = SignalState::new(json!({ "count": 7 }));
        let seen = Arc::new(Mutex::new(Value::Null));
        let s = seen.clone();
        let _handle = state.watch(
            Box::new(|root| root["count"].clone()),
            Box::new(move |new, _| {
                *s.lock().unwrap() = new.clone();
            }),
            WatchOptions {
                immediate: true,
                ..Default::default()
            },
        );
        assert_eq!(*seen.lock().unwrap(), json!(7));
    }

    #[test]
    fn unwatch_stops_notifications() {
        let state = SignalState::new(json!({ "count": 0 }));
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let handle = state.watch(
            Box::new(|root| root["count"].clone()),
            Box::new(move |_, _| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
            WatchOptions::default(),
        );
        handle.unwatch();
        state.set(&["count".to_string()], json!(5));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn strict_mode_counts_unsanctioned_writes() {
        let state = SignalState::new(json!({ "count": 0 }));
        let flag = Arc::new(AtomicBool::new(false));
        state.bind_commit_flag(flag.clone());
        state.set_strict(true);

        state.set(&["count".to_string()], json!(1));
        assert_eq!(state.strict_violations(), 1);

        flag.store(true, Ordering::Relaxed);
        state.set(&["count".to_string()], json!(2));
        assert_eq!(state.strict_violations(), 1);
    }
}
