// src/registry.rs
// Module tree registry: owns the runtime module tree and the flattened
// lookup tables the dispatch/commit engines resolve against.
//
// Every structural change (register, unregister, hot update) rebuilds the
// tables from the whole tree and swaps them in as a unit; a rebuild that
// detects a collision leaves the previous tree and tables untouched, so the
// registry stays queryable after a failed operation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::StoreError;
use crate::module::{ActionHandler, ActionSpec, GetterFn, ModuleDefinition, ModuleOverlay, MutationFn};
use crate::path::{display_path, resolve_key};
use crate::reactive::StateContainer;

/// Options accepted by module registration.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterOptions {
    /// Keep the value already present in the state tree at the module's
    /// path instead of installing the definition's state. Used for hot
    /// reload so live data is not clobbered by a re-register.
    pub preserve_state: bool,
}

/// One runtime node of the module tree.
#[derive(Clone, Default)]
pub(crate) struct ModuleNode {
    namespaced: bool,
    getters: HashMap<String, Arc<GetterFn>>,
    actions: HashMap<String, ActionSpec>,
    mutations: HashMap<String, Arc<MutationFn>>,
    children: HashMap<String, ModuleNode>,
}

impl ModuleNode {
    fn from_definition(definition: ModuleDefinition) -> Self {
        Self {
            namespaced: definition.namespaced,
            getters: definition.getters,
            actions: definition.actions,
            mutations: definition.mutations,
            children: definition
                .modules
                .into_iter()
                .map(|(name, child)| (name, ModuleNode::from_definition(child)))
                .collect(),
        }
    }

    /// Bare non-namespaced placeholder created for missing intermediate
    /// path segments during registration.
    fn stand_in() -> Self {
        Self::default()
    }
}

#[derive(Clone)]
pub(crate) struct ActionEntry {
    pub(crate) handler: Arc<dyn ActionHandler>,
    pub(crate) path: Vec<String>,
    pub(crate) namespace: Vec<String>,
}

#[derive(Clone)]
pub(crate) struct MutationEntry {
    pub(crate) handler: Arc<MutationFn>,
    pub(crate) path: Vec<String>,
}

#[derive(Clone)]
pub(crate) struct GetterEntry {
    pub(crate) getter: Arc<GetterFn>,
    pub(crate) path: Vec<String>,
    pub(crate) namespace: Vec<String>,
}

/// Flattened lookup tables, rebuilt from the whole tree on every
/// structural change. Action and mutation keys map to entry lists: entries
/// from distinct non-namespaced modules under the same bare key accumulate
/// and all run. Getter keys are unique.
#[derive(Clone, Default)]
pub(crate) struct Tables {
    epoch: u64,
    actions: HashMap<String, Vec<ActionEntry>>,
    mutations: HashMap<String, Vec<MutationEntry>>,
    getters: Arc<HashMap<String, GetterEntry>>,
}

impl Tables {
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn action_entries(&self, key: &str) -> Option<Vec<ActionEntry>> {
        self.actions.get(key).cloned()
    }

    pub(crate) fn mutation_entries(&self, key: &str) -> Option<Vec<MutationEntry>> {
        self.mutations.get(key).cloned()
    }

    pub(crate) fn getters(&self) -> Arc<HashMap<String, GetterEntry>> {
        Arc::clone(&self.getters)
    }
}

/// Owner of the module tree and its flattened tables.
pub(crate) struct ModuleRegistry {
    root: ModuleNode,
    tables: Tables,
}

impl ModuleRegistry {
    /// Build the registry from the root definition. Returns the registry
    /// and the assembled initial state tree.
    pub(crate) fn new(
        root: ModuleDefinition,
    ) -> Result<(Self, serde_json::Value), StoreError> {
        let initial_state = root.build_state();
        let root = ModuleNode::from_definition(root);
        let tables = build_tables(&root, 0)?;
        Ok((Self { root, tables }, initial_state))
    }

    pub(crate) fn tables(&self) -> &Tables {
        &self.tables
    }

    pub(crate) fn has_module(&self, path: &[String]) -> bool {
        if path.is_empty() {
            return true;
        }
        let mut node = &self.root;
        for segment in path {
            match node.children.get(segment) {
                Some(child) => node = child,
                None => return false,
            }
        }
        true
    }

    pub(crate) fn register(
        &mut self,
        path: &[String],
        definition: ModuleDefinition,
        options: RegisterOptions,
        container: &dyn StateContainer,
    ) -> Result<(), StoreError> {
        if path.is_empty() {
            // The root module always exists.
            return Err(StoreError::DuplicateModule {
                path: display_path(path),
            });
        }

        let state = definition.build_state();

        let mut root = self.root.clone();
        {
            let mut node = &mut root;
            for segment in &path[..path.len() - 1] {
                node = node
                    .children
                    .entry(segment.clone())
                    .or_insert_with(ModuleNode::stand_in);
            }
            let local_name = &path[path.len() - 1];
            if node.children.contains_key(local_name) {
                return Err(StoreError::DuplicateModule {
                    path: display_path(path),
                });
            }
            node.children
                .insert(local_name.clone(), ModuleNode::from_definition(definition));
        }

        let tables = build_tables(&root, self.tables.epoch + 1)?;
        self.root = root;
        self.tables = tables;

        if options.preserve_state && container.get(path).is_some() {
            tracing::debug!(path = %display_path(path), "existing state preserved");
        } else {
            container.set(path, state);
        }
        tracing::info!(path = %display_path(path), "module registered");
        Ok(())
    }

    pub(crate) fn unregister(
        &mut self,
        path: &[String],
        container: &dyn StateContainer,
    ) -> Result<(), StoreError> {
        if path.is_empty() {
            return Err(StoreError::ModuleNotFound {
                path: display_path(path),
            });
        }

        let mut root = self.root.clone();
        {
            let mut node = &mut root;
            for segment in &path[..path.len() - 1] {
                node = node.children.get_mut(segment).ok_or_else(|| {
                    StoreError::ModuleNotFound {
                        path: display_path(path),
                    }
                })?;
            }
            let local_name = &path[path.len() - 1];
            if node.children.remove(local_name).is_none() {
                return Err(StoreError::ModuleNotFound {
                    path: display_path(path),
                });
            }
        }

        let tables = build_tables(&root, self.tables.epoch + 1)?;
        self.root = root;
        self.tables = tables;

        container.remove(path);
        tracing::info!(path = %display_path(path), "module unregistered");
        Ok(())
    }

    /// Replace handler definitions in place, leaving state untouched.
    /// Best-effort: overlay entries for module paths that do not exist are
    /// skipped, and a rebuild failure keeps the previous tree and tables.
    pub(crate) fn hot_update(&mut self, overlay: ModuleOverlay) {
        let mut root = self.root.clone();
        apply_overlay(&mut root, overlay, &mut Vec::new());
        match build_tables(&root, self.tables.epoch + 1) {
            Ok(tables) => {
                self.root = root;
                self.tables = tables;
                tracing::info!("hot update applied");
            }
            Err(error) => {
                tracing::error!(%error, "hot update rejected, keeping previous handlers");
            }
        }
    }
}

fn apply_overlay(node: &mut ModuleNode, overlay: ModuleOverlay, path: &mut Vec<String>) {
    node.getters.extend(overlay.getters);
    node.mutations.extend(overlay.mutations);
    node.actions.extend(overlay.actions);
    for (name, child_overlay) in overlay.modules {
        match node.children.get_mut(&name) {
            Some(child) => {
                path.push(name);
                apply_overlay(child, child_overlay, path);
                path.pop();
            }
            None => {
                path.push(name);
                tracing::debug!(path = %display_path(path), "hot update skipped unknown module");
                path.pop();
            }
        }
    }
}

fn build_tables(root: &ModuleNode, epoch: u64) -> Result<Tables, StoreError> {
    let mut actions: HashMap<String, Vec<ActionEntry>> = HashMap::new();
    let mut mutations: HashMap<String, Vec<MutationEntry>> = HashMap::new();
    let mut getters: HashMap<String, GetterEntry> = HashMap::new();
    let mut namespaces: HashSet<String> = HashSet::new();

    visit(
        root,
        &mut Vec::new(),
        &mut Vec::new(),
        &mut actions,
        &mut mutations,
        &mut getters,
        &mut namespaces,
        true,
    )?;

    return Ok(Tables {
        epoch,
        actions,
        mutations,
        getters: Arc::new(getters),
    });

    #[allow(clippy::too_many_arguments)]
    fn visit(
        node: &ModuleNode,
        path: &mut Vec<String>,
        namespace: &mut Vec<String>,
        actions: &mut HashMap<String, Vec<ActionEntry>>,
        mutations: &mut HashMap<String, Vec<MutationEntry>>,
        getters: &mut HashMap<String, GetterEntry>,
        namespaces: &mut HashSet<String>,
        is_root: bool,
    ) -> Result<(), StoreError> {
        // A node's effective namespace accumulates only the namespaced
        // segments between the root and itself; the root contributes none.
        let pushed_namespace = if !is_root && node.namespaced {
            let local_name = path[path.len() - 1].clone();
            namespace.push(local_name);
            let key = namespace.join("/");
            if !namespaces.insert(key.clone()) {
                namespace.pop();
                return Err(StoreError::NamespaceCollision { key });
            }
            true
        } else {
            false
        };

        let result = (|| {
            for (name, getter) in &node.getters {
                let key = resolve_key(namespace, name);
                if getters.contains_key(&key) {
                    return Err(StoreError::NamespaceCollision { key });
                }
                getters.insert(
                    key,
                    GetterEntry {
                        getter: Arc::clone(getter),
                        path: path.clone(),
                        namespace: namespace.clone(),
                    },
                );
            }

            for (name, spec) in &node.actions {
                let key = if spec.root {
                    name.clone()
                } else {
                    resolve_key(namespace, name)
                };
                actions.entry(key).or_default().push(ActionEntry {
                    handler: Arc::clone(&spec.handler),
                    path: path.clone(),
                    namespace: namespace.clone(),
                });
            }

            for (name, handler) in &node.mutations {
                let key = resolve_key(namespace, name);
                mutations.entry(key).or_default().push(MutationEntry {
                    handler: Arc::clone(handler),
                    path: path.clone(),
                });
            }

            for (name, child) in &node.children {
                path.push(name.clone());
                let visited = visit(
                    child, path, namespace, actions, mutations, getters, namespaces, false,
                );
                path.pop();
                visited?;
            }
            Ok(())
        })();

        if pushed_namespace {
            namespace.pop();
        }
        result
    }
}
