// src/store.rs
// The store: construction surface, dispatch engine, commit engine, and the
// per-module action context.
//
// Dispatch resolves an action key against the flattened tables, runs the
// before subscribers, executes every handler registered under the key, and
// runs the after (or error) subscribers once all handlers settled. Commit
// is synchronous: it raises the committing flag around the handler calls
// (restored on every exit path, including panics) and then fans out to
// mutation subscribers. No lock is held across user callbacks or awaits;
// handlers and subscribers receive snapshots, writes re-acquire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use serde_json::Value;

use crate::error::{ActionError, StoreError};
use crate::getters::{GetterCache, GetterSet};
use crate::module::ModuleDefinition;
use crate::module::ModuleOverlay;
use crate::path::{display_path, parse_path, resolve_key};
use crate::reactive::{
    state_at_mut, SignalState, StateContainer, WatchHandle, WatchOptions,
};
use crate::registry::{ModuleRegistry, RegisterOptions};
use crate::subscription::{
    ActionEvent, ActionSubscriber, MutationEvent, SubscribeOptions, SubscriptionHandle,
    SubscriptionRegistry,
};

/// Options accepted by dispatch calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchOptions {
    /// Resolve the action type at the root namespace instead of the
    /// calling module's namespace. Meaningful for module-scoped contexts;
    /// store-level dispatch is always root-scoped.
    pub root: bool,
}

/// Options accepted by commit calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitOptions {
    /// Skip mutation subscribers for this commit. Supported for
    /// compatibility; subscribing consumers generally assume they see every
    /// mutation, so prefer not to use it.
    pub silent: bool,
    /// Resolve the mutation type at the root namespace (module-scoped
    /// contexts only).
    pub root: bool,
}

/// A store plugin: invoked once at construction with the store handle,
/// typically to self-subscribe to the mutation/action streams.
pub type Plugin = Box<dyn FnOnce(&Arc<Store>) + Send>;

/// Module path input: `"a/b"`, `["a", "b"]`, or owned segment vectors.
pub trait IntoModulePath {
    fn into_module_path(self) -> Vec<String>;
}

impl IntoModulePath for &str {
    fn into_module_path(self) -> Vec<String> {
        parse_path(self)
    }
}

impl IntoModulePath for String {
    fn into_module_path(self) -> Vec<String> {
        parse_path(&self)
    }
}

impl IntoModulePath for &[&str] {
    fn into_module_path(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl<const N: usize> IntoModulePath for [&str; N] {
    fn into_module_path(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl IntoModulePath for Vec<String> {
    fn into_module_path(self) -> Vec<String> {
        self
    }
}

/// Construction options: the root module definition plus store-wide
/// settings.
#[derive(Default)]
pub struct StoreOptions {
    root: ModuleDefinition,
    plugins: Vec<Plugin>,
    strict: bool,
    devtools: bool,
    container: Option<Arc<dyn StateContainer>>,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(mut self, state: Value) -> Self {
        self.root = self.root.state(state);
        self
    }

    pub fn getter<F>(mut self, name: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&crate::getters::GetterCtx<'_>) -> Value + Send + Sync + 'static,
    {
        self.root = self.root.getter(name, getter);
        self
    }

    pub fn mutation<F>(mut self, name: impl Into<String>, mutation: F) -> Self
    where
        F: Fn(&mut Value, Value) + Send + Sync + 'static,
    {
        self.root = self.root.mutation(name, mutation);
        self
    }

    pub fn action<F, Fut>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(ActionContext, Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, ActionError>> + Send + 'static,
    {
        self.root = self.root.action(name, action);
        self
    }

    pub fn module(mut self, name: impl Into<String>, module: ModuleDefinition) -> Self {
        self.root = self.root.module(name, module);
        self
    }

    pub fn plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Enable strict-mode detection of state writes that happen outside a
    /// mutation handler. A development aid; violations are logged and
    /// counted, never fatal.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn devtools(mut self, devtools: bool) -> Self {
        self.devtools = devtools;
        self
    }

    /// Inject a custom reactive state container. The default is
    /// [`SignalState`].
    pub fn container(mut self, container: Arc<dyn StateContainer>) -> Self {
        self.container = Some(container);
        self
    }
}

/// Create a store from its options. Fails if the initial module tree
/// contains a namespace or getter collision.
pub fn create_store(options: StoreOptions) -> Result<Arc<Store>, StoreError> {
    Store::new(options)
}

/// Centralized, hierarchical application-state container.
pub struct Store {
    // Handed to action contexts so handlers can re-enter the store.
    self_ref: Weak<Store>,
    registry: RwLock<ModuleRegistry>,
    container: Arc<dyn StateContainer>,
    subscriptions: SubscriptionRegistry,
    committing: Arc<AtomicBool>,
    strict: bool,
    getter_cache: RwLock<GetterCache>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("strict", &self.strict)
            .field("state_version", &self.container.version())
            .finish()
    }
}

impl Store {
    pub fn new(options: StoreOptions) -> Result<Arc<Self>, StoreError> {
        let (registry, initial_state) = ModuleRegistry::new(options.root)?;

        let container: Arc<dyn StateContainer> = match options.container {
            Some(container) => {
                container.replace(initial_state);
                container
            }
            None => Arc::new(SignalState::new(initial_state)),
        };

        let committing = Arc::new(AtomicBool::new(false));
        container.bind_commit_flag(Arc::clone(&committing));
        container.set_strict(options.strict);

        if options.devtools {
            tracing::debug!("devtools requested; no devtools integration in this build");
        }

        let store = Arc::new_cyclic(|self_ref| Store {
            self_ref: self_ref.clone(),
            registry: RwLock::new(registry),
            container,
            subscriptions: SubscriptionRegistry::new(),
            committing,
            strict: options.strict,
            getter_cache: RwLock::new(GetterCache::default()),
        });

        for plugin in options.plugins {
            plugin(&store);
        }

        Ok(store)
    }

    // State access

    /// Snapshot of the whole state tree.
    pub fn state(&self) -> Value {
        self.container.snapshot()
    }

    /// Snapshot of a module's state slice.
    pub fn state_at<P: IntoModulePath>(&self, path: P) -> Option<Value> {
        self.container.get(&path.into_module_path())
    }

    /// Swap the whole state tree. Counts as a sanctioned write.
    pub fn replace_state(&self, state: Value) {
        let _guard = CommitGuard::raise(&self.committing);
        self.container.replace(state);
    }

    /// Watch a derived expression of the root state.
    pub fn watch<E, C>(&self, expr: E, callback: C, options: WatchOptions) -> WatchHandle
    where
        E: Fn(&Value) -> Value + Send + Sync + 'static,
        C: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        self.container
            .watch(Box::new(expr), Box::new(callback), options)
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Number of strict-mode violations the state container has observed.
    pub fn strict_violations(&self) -> u64 {
        self.container.strict_violations()
    }

    // Getters

    /// Evaluate the getter registered under a canonical global key.
    /// Memoized until the next state write or tree change.
    pub fn getter(&self, key: &str) -> Option<Value> {
        let (table, epoch) = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            (registry.tables().getters(), registry.tables().epoch())
        };
        let version = self.container.version();

        let seed = {
            let cache = self
                .getter_cache
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if cache.is_current(version, epoch) {
                if let Some(value) = cache.values.get(key) {
                    return Some(value.clone());
                }
                cache.values.clone()
            } else {
                Default::default()
            }
        };

        let set = GetterSet::seeded(table, self.container.snapshot(), seed);
        let value = set.value(key);
        let computed = set.into_cache();

        let mut cache = self
            .getter_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if cache.is_current(version, epoch) {
            cache.values.extend(computed);
        } else {
            *cache = GetterCache {
                version,
                epoch,
                values: computed,
            };
        }
        value
    }

    /// All canonical getter keys currently registered, sorted.
    pub fn getter_keys(&self) -> Vec<String> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = registry.tables().getters().keys().cloned().collect();
        keys.sort();
        keys
    }

    // Dispatch engine

    pub async fn dispatch(&self, action_type: &str, payload: Value) -> Result<Value, ActionError> {
        self.dispatch_payload(ActionEvent::new(action_type, payload), DispatchOptions::default())
            .await
    }

    pub async fn dispatch_with(
        &self,
        action_type: &str,
        payload: Value,
        options: DispatchOptions,
    ) -> Result<Value, ActionError> {
        self.dispatch_payload(ActionEvent::new(action_type, payload), options)
            .await
    }

    /// Dispatch an already-assembled `{type, payload}` event. Store-level
    /// dispatch always resolves at the root namespace, so `options.root`
    /// only matters for module-scoped contexts.
    pub async fn dispatch_payload(
        &self,
        event: ActionEvent,
        _options: DispatchOptions,
    ) -> Result<Value, ActionError> {
        let key = event.action_type.clone();
        self.dispatch_resolved(&key, event).await
    }

    pub(crate) async fn dispatch_resolved(
        &self,
        key: &str,
        event: ActionEvent,
    ) -> Result<Value, ActionError> {
        let Some(store) = self.self_ref.upgrade() else {
            return Err(ActionError::failed("store has been dropped"));
        };
        let entries = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            registry.tables().action_entries(key)
        };
        let Some(entries) = entries else {
            tracing::warn!(action = key, "unknown action type");
            return Ok(Value::Null);
        };

        tracing::debug!(action = key, handlers = entries.len(), "dispatching action");
        self.subscriptions
            .notify_action_before(&event, &self.container.snapshot());

        let futures: Vec<_> = entries
            .iter()
            .map(|entry| {
                let ctx = ActionContext {
                    store: Arc::clone(&store),
                    path: entry.path.clone(),
                    namespace: entry.namespace.clone(),
                };
                entry.handler.handle(ctx, event.payload.clone())
            })
            .collect();

        // Every handler runs to completion even when a sibling under the
        // same key fails, so the surviving handlers' commits still land.
        // The first failure is the one reported.
        let mut values = Vec::with_capacity(entries.len());
        let mut first_error = None;
        for result in futures::future::join_all(futures).await {
            match result {
                Ok(value) => values.push(value),
                Err(error) => {
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
        }

        if let Some(error) = first_error {
            tracing::debug!(action = key, %error, "action failed");
            self.subscriptions
                .notify_action_error(&event, &self.container.snapshot(), &error);
            return Err(error);
        }

        let value = if values.len() == 1 {
            values.pop().unwrap_or(Value::Null)
        } else {
            Value::Array(values)
        };
        self.subscriptions
            .notify_action_after(&event, &self.container.snapshot());
        tracing::debug!(action = key, "action completed");
        Ok(value)
    }

    // Commit engine

    pub fn commit(&self, mutation_type: &str, payload: Value) {
        self.commit_payload(MutationEvent::new(mutation_type, payload), CommitOptions::default());
    }

    pub fn commit_with(&self, mutation_type: &str, payload: Value, options: CommitOptions) {
        self.commit_payload(MutationEvent::new(mutation_type, payload), options);
    }

    /// Commit an already-assembled `{type, payload}` event.
    pub fn commit_payload(&self, event: MutationEvent, options: CommitOptions) {
        let key = event.mutation_type.clone();
        let entries = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            registry.tables().mutation_entries(&key)
        };
        let Some(entries) = entries else {
            tracing::warn!(mutation = %key, "unknown mutation type");
            return;
        };

        {
            // The guard restores the previous flag value on drop, so the
            // flag is cleared even when a mutation handler panics, and
            // nested commits keep the outer commit sanctioned.
            let _guard = CommitGuard::raise(&self.committing);
            self.container.update(&mut |root| {
                for entry in &entries {
                    match state_at_mut(root, &entry.path) {
                        Some(slice) => (entry.handler)(slice, event.payload.clone()),
                        None => tracing::warn!(
                            mutation = %key,
                            path = %display_path(&entry.path),
                            "module state slice missing, handler skipped"
                        ),
                    }
                }
            });
        }

        if options.silent {
            return;
        }
        let state = self.container.snapshot();
        self.subscriptions.notify_mutation(&event, &state);
    }

    // Subscriptions

    /// Subscribe to the mutation stream. The callback receives the
    /// `{type, payload}` event and the post-mutation root state.
    pub fn subscribe<F>(&self, subscriber: F, options: SubscribeOptions) -> SubscriptionHandle
    where
        F: Fn(&MutationEvent, &Value) + Send + Sync + 'static,
    {
        self.subscriptions
            .add_mutation_subscriber(Arc::new(subscriber), options)
    }

    /// Subscribe to the action stream. A bare closure is treated as a
    /// `before` subscriber.
    pub fn subscribe_action(
        &self,
        subscriber: impl Into<ActionSubscriber>,
        options: SubscribeOptions,
    ) -> SubscriptionHandle {
        self.subscriptions
            .add_action_subscriber(subscriber.into(), options)
    }

    // Module registration surface

    pub fn register_module<P: IntoModulePath>(
        &self,
        path: P,
        module: ModuleDefinition,
        options: RegisterOptions,
    ) -> Result<(), StoreError> {
        let segments = path.into_module_path();
        // State installation during registration is a sanctioned write.
        let _guard = CommitGuard::raise(&self.committing);
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        registry.register(&segments, module, options, self.container.as_ref())
    }

    pub fn unregister_module<P: IntoModulePath>(&self, path: P) -> Result<(), StoreError> {
        let segments = path.into_module_path();
        let _guard = CommitGuard::raise(&self.committing);
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        registry.unregister(&segments, self.container.as_ref())
    }

    pub fn has_module<P: IntoModulePath>(&self, path: P) -> bool {
        let segments = path.into_module_path();
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.has_module(&segments)
    }

    /// Replace handler definitions live, keeping state. Best-effort:
    /// unknown module paths are skipped.
    pub fn hot_update(&self, overlay: ModuleOverlay) {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        registry.hot_update(overlay);
    }
}

/// Execution context handed to action handlers: the owning module's scoped
/// view of the store.
#[derive(Clone)]
pub struct ActionContext {
    store: Arc<Store>,
    path: Vec<String>,
    namespace: Vec<String>,
}

impl ActionContext {
    /// Snapshot of the owning module's state slice.
    pub fn state(&self) -> Value {
        self.store.container.get(&self.path).unwrap_or(Value::Null)
    }

    /// Snapshot of the whole state tree.
    pub fn root_state(&self) -> Value {
        self.store.container.snapshot()
    }

    /// A getter of the owning module, by local name.
    pub fn getter(&self, name: &str) -> Option<Value> {
        self.store.getter(&resolve_key(&self.namespace, name))
    }

    /// Any getter, by canonical global key.
    pub fn root_getter(&self, key: &str) -> Option<Value> {
        self.store.getter(key)
    }

    /// Commit a mutation, resolving the type against this module's
    /// namespace.
    pub fn commit(&self, mutation_type: &str, payload: Value) {
        self.commit_with(mutation_type, payload, CommitOptions::default());
    }

    pub fn commit_with(&self, mutation_type: &str, payload: Value, options: CommitOptions) {
        let key = if options.root {
            mutation_type.to_string()
        } else {
            resolve_key(&self.namespace, mutation_type)
        };
        self.store
            .commit_payload(MutationEvent::new(key, payload), options);
    }

    /// Dispatch an action, resolving the type against this module's
    /// namespace.
    pub async fn dispatch(&self, action_type: &str, payload: Value) -> Result<Value, ActionError> {
        self.dispatch_with(action_type, payload, DispatchOptions::default())
            .await
    }

    pub async fn dispatch_with(
        &self,
        action_type: &str,
        payload: Value,
        options: DispatchOptions,
    ) -> Result<Value, ActionError> {
        let key = if options.root {
            action_type.to_string()
        } else {
            resolve_key(&self.namespace, action_type)
        };
        let event = ActionEvent::new(key.clone(), payload);
        self.store.dispatch_resolved(&key, event).await
    }

    /// The store handle, for handlers that need the unscoped surface.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// This module's effective namespace segments.
    pub fn namespace(&self) -> &[String] {
        &self.namespace
    }
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("path", &self.path)
            .field("namespace", &self.namespace)
            .finish()
    }
}

/// Raises the committing flag for a scope, restoring the previous value on
/// drop (all exit paths, including unwinding handlers).
struct CommitGuard<'a> {
    flag: &'a AtomicBool,
    previous: bool,
}

impl<'a> CommitGuard<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        let previous = flag.swap(true, Ordering::SeqCst);
        Self { flag, previous }
    }
}

impl Drop for CommitGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::SeqCst);
    }
}
