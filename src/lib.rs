//! Centralized, hierarchical application-state container.
//!
//! A single state tree is composed from a tree of modules, each owning a
//! state slice plus its getters, mutations, and actions. The tree is
//! flattened into one addressable namespace: mutations are the only
//! sanctioned synchronous writes (`commit`), actions orchestrate async work
//! and compose commits (`dispatch`), getters are memoized derived reads.
//! Modules can be registered, unregistered, and hot-swapped at runtime
//! without breaking outstanding subscriptions.
//!
//! ```no_run
//! use serde_json::json;
//! use treestore::{create_store, StoreOptions};
//!
//! # fn main() -> Result<(), treestore::StoreError> {
//! let store = create_store(
//!     StoreOptions::new()
//!         .state(json!({ "count": 0 }))
//!         .mutation("inc", |state, payload| {
//!             let n = payload.as_i64().unwrap_or(1);
//!             state["count"] = json!(state["count"].as_i64().unwrap_or(0) + n);
//!         }),
//! )?;
//! store.commit("inc", json!(3));
//! assert_eq!(store.state()["count"], json!(3));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod getters;
pub mod inject;
pub mod logger;
pub mod module;
pub mod path;
pub mod reactive;
pub mod registry;
pub mod store;
pub mod subscription;

pub use error::{ActionError, StoreError};
pub use getters::GetterCtx;
pub use inject::{StoreRegistry, DEFAULT_STORE_KEY};
pub use logger::{create_logger, LoggerOptions};
pub use module::{ActionHandler, ActionSpec, ModuleDefinition, ModuleOverlay};
pub use reactive::{SignalState, StateContainer, WatchHandle, WatchOptions};
pub use registry::RegisterOptions;
pub use store::{
    create_store, ActionContext, CommitOptions, DispatchOptions, IntoModulePath, Plugin, Store,
    StoreOptions,
};
pub use subscription::{
    ActionEvent, ActionSubscriber, MutationEvent, SubscribeOptions, SubscriptionHandle,
};
