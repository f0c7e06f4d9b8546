// src/module.rs
// Module definitions: the user-facing description of one node in the store
// tree, covering its state slice, handlers, namespace flag, and child
// modules.
// Definitions are consumed at registration; live handler swapping goes
// through `ModuleOverlay` and the hot-update path instead.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::ActionError;
use crate::getters::GetterCtx;
use crate::store::ActionContext;

/// Synchronous mutation handler: receives the owning module's state slice
/// and the commit payload.
pub type MutationFn = dyn Fn(&mut Value, Value) + Send + Sync;

/// Derived accessor: reads module state, sibling getters, root state and
/// root getters through the ctx.
pub type GetterFn = dyn Fn(&GetterCtx<'_>) -> Value + Send + Sync;

/// Asynchronous action handler.
///
/// Implement directly for handler types that carry their own dependencies,
/// or register plain async closures through `ModuleDefinition::action`.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, ctx: ActionContext, payload: Value) -> Result<Value, ActionError>;
}

/// Adapter turning an async closure into an [`ActionHandler`].
struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(ActionContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ActionError>> + Send + 'static,
{
    async fn handle(&self, ctx: ActionContext, payload: Value) -> Result<Value, ActionError> {
        (self.0)(ctx, payload).await
    }
}

/// An action as registered: the handler plus its addressing scope.
///
/// `root: true` keys the handler at the root namespace even when the owning
/// module is namespaced; the handler's execution context stays local.
#[derive(Clone)]
pub struct ActionSpec {
    pub(crate) handler: Arc<dyn ActionHandler>,
    pub(crate) root: bool,
}

impl ActionSpec {
    pub fn new(handler: Arc<dyn ActionHandler>) -> Self {
        Self {
            handler,
            root: false,
        }
    }

    pub fn root_scoped(handler: Arc<dyn ActionHandler>) -> Self {
        Self {
            handler,
            root: true,
        }
    }
}

/// Declarative description of one store module.
#[derive(Default)]
pub struct ModuleDefinition {
    pub(crate) namespaced: bool,
    pub(crate) state: Option<Value>,
    pub(crate) getters: HashMap<String, Arc<GetterFn>>,
    pub(crate) actions: HashMap<String, ActionSpec>,
    pub(crate) mutations: HashMap<String, Arc<MutationFn>>,
    pub(crate) modules: HashMap<String, ModuleDefinition>,
}

impl ModuleDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate this module's handler names behind its path segment.
    pub fn namespaced(mut self, namespaced: bool) -> Self {
        self.namespaced = namespaced;
        self
    }

    pub fn state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    pub fn getter<F>(mut self, name: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&GetterCtx<'_>) -> Value + Send + Sync + 'static,
    {
        self.getters.insert(name.into(), Arc::new(getter));
        self
    }

    pub fn mutation<F>(mut self, name: impl Into<String>, mutation: F) -> Self
    where
        F: Fn(&mut Value, Value) + Send + Sync + 'static,
    {
        self.mutations.insert(name.into(), Arc::new(mutation));
        self
    }

    /// Register an async closure as a module-scoped action.
    pub fn action<F, Fut>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(ActionContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActionError>> + Send + 'static,
    {
        self.actions
            .insert(name.into(), ActionSpec::new(Arc::new(FnHandler(action))));
        self
    }

    /// Register an async closure addressed at the root namespace regardless
    /// of this module's own namespacing.
    pub fn action_root<F, Fut>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(ActionContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActionError>> + Send + 'static,
    {
        self.actions.insert(
            name.into(),
            ActionSpec::root_scoped(Arc::new(FnHandler(action))),
        );
        self
    }

    /// Register a trait-object action handler.
    pub fn action_handler(
        mut self,
        name: impl Into<String>,
        handler: impl ActionHandler + 'static,
    ) -> Self {
        self.actions
            .insert(name.into(), ActionSpec::new(Arc::new(handler)));
        self
    }

    pub fn module(mut self, name: impl Into<String>, module: ModuleDefinition) -> Self {
        self.modules.insert(name.into(), module);
        self
    }

    /// Assemble the nested state tree for this definition: the module's own
    /// state with each child's state attached under its local name.
    pub(crate) fn build_state(&self) -> Value {
        let mut state = self.state.clone().unwrap_or(Value::Object(Map::new()));
        if !self.modules.is_empty() && !state.is_object() {
            state = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut state {
            for (name, child) in &self.modules {
                map.insert(name.clone(), child.build_state());
            }
        }
        state
    }
}

impl std::fmt::Debug for ModuleDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDefinition")
            .field("namespaced", &self.namespaced)
            .field("getters", &self.getters.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("mutations", &self.mutations.keys().collect::<Vec<_>>())
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Partial tree of replacement handlers consumed by hot update. State is
/// never part of an overlay; live data survives the swap.
#[derive(Default)]
pub struct ModuleOverlay {
    pub(crate) getters: HashMap<String, Arc<GetterFn>>,
    pub(crate) actions: HashMap<String, ActionSpec>,
    pub(crate) mutations: HashMap<String, Arc<MutationFn>>,
    pub(crate) modules: HashMap<String, ModuleOverlay>,
}

impl ModuleOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn getter<F>(mut self, name: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&GetterCtx<'_>) -> Value + Send + Sync + 'static,
    {
        self.getters.insert(name.into(), Arc::new(getter));
        self
    }

    pub fn mutation<F>(mut self, name: impl Into<String>, mutation: F) -> Self
    where
        F: Fn(&mut Value, Value) + Send + Sync + 'static,
    {
        self.mutations.insert(name.into(), Arc::new(mutation));
        self
    }

    pub fn action<F, Fut>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(ActionContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActionError>> + Send + 'static,
    {
        self.actions
            .insert(name.into(), ActionSpec::new(Arc::new(FnHandler(action))));
        self
    }

    pub fn module(mut self, name: impl Into<String>, overlay: ModuleOverlay) -> Self {
        self.modules.insert(name.into(), overlay);
        self
    }
}
