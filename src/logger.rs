// src/logger.rs
// Development logger plugin.
//
// A pure consumer of the subscription API: it subscribes to the mutation
// and action streams and formats entries through `tracing`. Nothing here
// touches dispatch or commit internals, so disabling it never changes
// store behavior.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Local;
use serde_json::Value;

use crate::store::Plugin;
use crate::subscription::{ActionEvent, ActionSubscriber, MutationEvent, SubscribeOptions};

type MutationFilter = dyn Fn(&MutationEvent, &Value, &Value) -> bool + Send + Sync;
type StateTransformer = dyn Fn(&Value) -> Value + Send + Sync;
type MutationTransformer = dyn Fn(&MutationEvent) -> Value + Send + Sync;
type ActionFilter = dyn Fn(&ActionEvent, &Value) -> bool + Send + Sync;
type ActionTransformer = dyn Fn(&ActionEvent) -> Value + Send + Sync;

/// Options for [`create_logger`]. The default logs every mutation and
/// action with untransformed state.
pub struct LoggerOptions {
    pub log_mutations: bool,
    pub log_actions: bool,
    /// Keep a mutation entry? Receives the event, the state before and the
    /// state after the mutation.
    pub filter: Option<Box<MutationFilter>>,
    /// Reshape state before logging (e.g. project out a noisy subtree).
    pub transformer: Option<Box<StateTransformer>>,
    pub mutation_transformer: Option<Box<MutationTransformer>>,
    pub action_filter: Option<Box<ActionFilter>>,
    pub action_transformer: Option<Box<ActionTransformer>>,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            log_mutations: true,
            log_actions: true,
            filter: None,
            transformer: None,
            mutation_transformer: None,
            action_filter: None,
            action_transformer: None,
        }
    }
}

/// Build the logger plugin. Pass the result to `StoreOptions::plugin`.
pub fn create_logger(options: LoggerOptions) -> Plugin {
    Box::new(move |store| {
        let LoggerOptions {
            log_mutations,
            log_actions,
            filter,
            transformer,
            mutation_transformer,
            action_filter,
            action_transformer,
        } = options;

        if log_mutations {
            let previous = Arc::new(Mutex::new(store.state()));
            store.subscribe(
                move |mutation, state| {
                    let before = {
                        let mut previous =
                            previous.lock().unwrap_or_else(PoisonError::into_inner);
                        std::mem::replace(&mut *previous, state.clone())
                    };
                    if let Some(filter) = &filter {
                        if !filter(mutation, &before, state) {
                            return;
                        }
                    }
                    let shown_mutation = match &mutation_transformer {
                        Some(t) => t(mutation),
                        None => mutation.payload.clone(),
                    };
                    let shown_state = match &transformer {
                        Some(t) => t(state),
                        None => state.clone(),
                    };
                    tracing::info!(
                        target: "treestore::logger",
                        mutation = %mutation.mutation_type,
                        time = %Local::now().format("%H:%M:%S%.3f"),
                        payload = %shown_mutation,
                        state = %shown_state,
                        "mutation"
                    );
                },
                SubscribeOptions::default(),
            );
        }

        if log_actions {
            let subscriber = ActionSubscriber::new().before(move |action, state| {
                if let Some(filter) = &action_filter {
                    if !filter(action, state) {
                        return;
                    }
                }
                let shown_action = match &action_transformer {
                    Some(t) => t(action),
                    None => action.payload.clone(),
                };
                tracing::info!(
                    target: "treestore::logger",
                    action = %action.action_type,
                    time = %Local::now().format("%H:%M:%S%.3f"),
                    payload = %shown_action,
                    "action"
                );
            });
            store.subscribe_action(subscriber, SubscribeOptions::default());
        }
    })
}
