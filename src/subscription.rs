// src/subscription.rs
// Subscription registry: ordered mutation and action subscriber lists.
//
// Fan-out snapshots the list before invoking callbacks, so a subscriber may
// unsubscribe itself (or any other entry) mid-notification without skipping
// or double-invoking unaffected entries. Handles are detached from the
// subscription lifetime: dropping a handle keeps the subscription alive,
// only an explicit `unsubscribe()` removes it.

use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ActionError;

/// The `{type, payload}` record handed to mutation subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationEvent {
    #[serde(rename = "type")]
    pub mutation_type: String,
    pub payload: Value,
}

impl MutationEvent {
    pub fn new(mutation_type: impl Into<String>, payload: Value) -> Self {
        Self {
            mutation_type: mutation_type.into(),
            payload,
        }
    }
}

/// The `{type, payload}` record handed to action subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEvent {
    #[serde(rename = "type")]
    pub action_type: String,
    pub payload: Value,
}

impl ActionEvent {
    pub fn new(action_type: impl Into<String>, payload: Value) -> Self {
        Self {
            action_type: action_type.into(),
            payload,
        }
    }
}

pub type MutationSubscriberFn = dyn Fn(&MutationEvent, &Value) + Send + Sync;
pub type ActionSubscriberFn = dyn Fn(&ActionEvent, &Value) + Send + Sync;
pub type ActionErrorSubscriberFn = dyn Fn(&ActionEvent, &Value, &ActionError) + Send + Sync;

/// Options accepted by `subscribe` / `subscribe_action`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeOptions {
    /// Insert at the front of the list instead of the back, so the
    /// subscriber runs before everything registered earlier.
    pub prepend: bool,
}

/// An action subscriber with optional hooks for each lifecycle stage.
///
/// `before` runs ahead of the handler, `after` once every handler under the
/// key has settled successfully, `error` when any handler fails.
#[derive(Default, Clone)]
pub struct ActionSubscriber {
    pub(crate) before: Option<Arc<ActionSubscriberFn>>,
    pub(crate) after: Option<Arc<ActionSubscriberFn>>,
    pub(crate) error: Option<Arc<ActionErrorSubscriberFn>>,
}

impl ActionSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before<F>(mut self, f: F) -> Self
    where
        F: Fn(&ActionEvent, &Value) + Send + Sync + 'static,
    {
        self.before = Some(Arc::new(f));
        self
    }

    pub fn after<F>(mut self, f: F) -> Self
    where
        F: Fn(&ActionEvent, &Value) + Send + Sync + 'static,
    {
        self.after = Some(Arc::new(f));
        self
    }

    pub fn error<F>(mut self, f: F) -> Self
    where
        F: Fn(&ActionEvent, &Value, &ActionError) + Send + Sync + 'static,
    {
        self.error = Some(Arc::new(f));
        self
    }
}

// A bare closure subscribes to the `before` stage.
impl<F> From<F> for ActionSubscriber
where
    F: Fn(&ActionEvent, &Value) + Send + Sync + 'static,
{
    fn from(f: F) -> Self {
        ActionSubscriber::new().before(f)
    }
}

struct Entry<T> {
    id: Uuid,
    subscriber: T,
}

type EntryList<T> = Arc<RwLock<Vec<Entry<T>>>>;

/// Handle returned by subscription calls. Invoking `unsubscribe` removes
/// exactly the entry it was created for; a second call is a no-op.
pub struct SubscriptionHandle {
    remove: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl SubscriptionHandle {
    fn new<T: Send + Sync + 'static>(list: &EntryList<T>, id: Uuid) -> Self {
        let weak: Weak<RwLock<Vec<Entry<T>>>> = Arc::downgrade(list);
        Self {
            remove: Mutex::new(Some(Box::new(move || {
                if let Some(list) = weak.upgrade() {
                    let mut entries =
                        list.write().unwrap_or_else(PoisonError::into_inner);
                    entries.retain(|e| e.id != id);
                }
            }))),
        }
    }

    pub fn unsubscribe(&self) {
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

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle").finish()
    }
}

/// Ordered subscriber lists for one store instance.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    mutation: EntryList<Arc<MutationSubscriberFn>>,
    action: EntryList<ActionSubscriber>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_mutation_subscriber(
        &self,
        subscriber: Arc<MutationSubscriberFn>,
        options: SubscribeOptions,
    ) -> SubscriptionHandle {
        Self::insert(&self.mutation, subscriber, options)
    }

    pub(crate) fn add_action_subscriber(
        &self,
        subscriber: ActionSubscriber,
        options: SubscribeOptions,
    ) -> SubscriptionHandle {
        Self::insert(&self.action, subscriber, options)
    }

    fn insert<T: Send + Sync + 'static>(
        list: &EntryList<T>,
        subscriber: T,
        options: SubscribeOptions,
    ) -> SubscriptionHandle {
        let id = Uuid::new_v4();
        {
            let mut entries = list.write().unwrap_or_else(PoisonError::into_inner);
            let entry = Entry { id, subscriber };
            if options.prepend {
                entries.insert(0, entry);
            } else {
                entries.push(entry);
            }
        }
        SubscriptionHandle::new(list, id)
    }

    pub(crate) fn notify_mutation(&self, event: &MutationEvent, state: &Value) {
        for subscriber in Self::snapshot(&self.mutation, |s| Some(s.clone())) {
            subscriber(event, state);
        }
    }

    pub(crate) fn notify_action_before(&self, event: &ActionEvent, state: &Value) {
        for subscriber in Self::snapshot(&self.action, |s| s.before.clone()) {
            subscriber(event, state);
        }
    }

    pub(crate) fn notify_action_after(&self, event: &ActionEvent, state: &Value) {
        for subscriber in Self::snapshot(&self.action, |s| s.after.clone()) {
            subscriber(event, state);
        }
    }

    pub(crate) fn notify_action_error(
        &self,
        event: &ActionEvent,
        state: &Value,
        error: &ActionError,
    ) {
        for subscriber in Self::snapshot(&self.action, |s| s.error.clone()) {
            subscriber(event, state, error);
        }
    }

    fn snapshot<T, U>(list: &EntryList<T>, select: impl Fn(&T) -> Option<U>) -> Vec<U> {
        let entries = list.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().filter_map(|e| select(&e.subscriber)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event() -> MutationEvent {
        MutationEvent::new("inc", Value::Null)
    }

    #[test]
    fn notify_invokes_in_order_with_prepend_first() {
        let registry = SubscriptionRegistry::new();
        let order = Arc::new(RwLock::new(Vec::new()));

        let o = order.clone();
        registry.add_mutation_subscriber(
            Arc::new(move |_, _| o.write().unwrap().push("first")),
            SubscribeOptions::default(),
        );
        let o = order.clone();
        registry.add_mutation_subscriber(
            Arc::new(move |_, _| o.write().unwrap().push("prepended")),
            SubscribeOptions { prepend: true },
        );

        registry.notify_mutation(&event(), &Value::Null);
        assert_eq!(*order.read().unwrap(), vec!["prepended", "first"]);
    }

    #[test]
    fn unsubscribe_is_exact_and_idempotent() {
        let registry = SubscriptionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        let handle = registry.add_mutation_subscriber(
            Arc::new(move |_, _| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
            SubscribeOptions::default(),
        );

        registry.notify_mutation(&event(), &Value::Null);
        handle.unsubscribe();
        handle.unsubscribe(); // no-op
        registry.notify_mutation(&event(), &Value::Null);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removal_during_fanout_does_not_skip_others() {
        let registry = SubscriptionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let handle: Arc<RwLock<Option<SubscriptionHandle>>> =
            Arc::new(RwLock::new(None));

        // First subscriber unsubscribes the second mid-fan-out; the second
        // was already part of the snapshot, so it still fires this round.
        let h = handle.clone();
        registry.add_mutation_subscriber(
            Arc::new(move |_, _| {
                if let Some(handle) = h.read().unwrap().as_ref() {
                    handle.unsubscribe();
                }
            }),
            SubscribeOptions::default(),
        );
        let c = calls.clone();
        let second = registry.add_mutation_subscriber(
            Arc::new(move |_, _| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
            SubscribeOptions::default(),
        );
        *handle.write().unwrap() = Some(second);

        registry.notify_mutation(&event(), &Value::Null);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        registry.notify_mutation(&event(), &Value::Null);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn bare_closure_becomes_before_subscriber() {
        let registry = SubscriptionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let subscriber: ActionSubscriber = (move |_: &ActionEvent, _: &Value| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .into();
        registry.add_action_subscriber(subscriber, SubscribeOptions::default());

        let event = ActionEvent::new("load", Value::Null);
        registry.notify_action_before(&event, &Value::Null);
        registry.notify_action_after(&event, &Value::Null);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
