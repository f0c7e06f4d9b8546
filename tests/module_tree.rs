// tests/module_tree.rs
// Runtime module tree: registration, removal, namespace inheritance,
// collision handling, and hot update.

use serde_json::{json, Value};
use treestore::{
    create_store, ActionContext, ModuleDefinition, ModuleOverlay, RegisterOptions, StoreError,
    StoreOptions,
};

fn session_module() -> ModuleDefinition {
    ModuleDefinition::new()
        .namespaced(true)
        .state(json!({ "user": null }))
        .mutation("login", |state, payload| {
            state["user"] = payload;
        })
}

#[test]
fn register_and_unregister_round_trip() {
    let store = create_store(StoreOptions::new().state(json!({}))).expect("valid store");
    assert!(!store.has_module("session"));

    store
        .register_module("session", session_module(), RegisterOptions::default())
        .expect("registration succeeds");
    assert!(store.has_module("session"));

    store.commit("session/login", json!("ada"));
    assert_eq!(store.state()["session"]["user"], json!("ada"));

    store
        .unregister_module("session")
        .expect("unregistration succeeds");
    assert!(!store.has_module("session"));
    assert!(store.state_at("session").is_none());

    // The mutation key is gone with the module.
    store.commit("session/login", json!("bob"));
    assert!(store.state_at("session").is_none());
}

#[test]
fn duplicate_registration_is_rejected() {
    let store = create_store(StoreOptions::new().state(json!({}))).expect("valid store");
    store
        .register_module("session", session_module(), RegisterOptions::default())
        .expect("registration succeeds");

    let err = store
        .register_module("session", session_module(), RegisterOptions::default())
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateModule { .. }));
}

#[test]
fn root_path_registration_is_rejected() {
    let store = create_store(StoreOptions::new().state(json!({}))).expect("valid store");
    let err = store
        .register_module("", session_module(), RegisterOptions::default())
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateModule { .. }));

    let err = store.unregister_module("").unwrap_err();
    assert!(matches!(err, StoreError::ModuleNotFound { .. }));
}

#[test]
fn unregister_missing_module_is_rejected() {
    let store = create_store(StoreOptions::new().state(json!({}))).expect("valid store");
    let err = store.unregister_module("ghost").unwrap_err();
    assert!(matches!(err, StoreError::ModuleNotFound { .. }));
}

#[test]
fn namespace_collision_leaves_registry_usable() {
    fn shared_module() -> ModuleDefinition {
        ModuleDefinition::new()
            .namespaced(true)
            .state(json!({ "value": 0 }))
            .mutation("set", |state, payload| {
                state["value"] = payload;
            })
    }

    let store = create_store(StoreOptions::new().module("p1", ModuleDefinition::new()))
        .expect("valid store");

    store
        .register_module("p1/shared", shared_module(), RegisterOptions::default())
        .expect("first registration succeeds");

    // A second module under a different parent would flatten to the same
    // namespace because neither parent is namespaced.
    let err = store
        .register_module("p2/shared", shared_module(), RegisterOptions::default())
        .unwrap_err();
    assert!(matches!(err, StoreError::NamespaceCollision { .. }));

    // The failed registration left nothing behind.
    assert!(store.has_module("p1/shared"));
    assert!(!store.has_module("p2"));

    store.commit("shared/set", json!(9));
    assert_eq!(store.state()["p1"]["shared"]["value"], json!(9));
}

#[test]
fn preserve_state_keeps_live_data() {
    let store = create_store(
        StoreOptions::new().state(json!({ "profile": { "name": "live" } })),
    )
    .expect("valid store");

    store
        .register_module(
            "profile",
            ModuleDefinition::new()
                .namespaced(true)
                .state(json!({ "name": "fresh" })),
            RegisterOptions {
                preserve_state: true,
            },
        )
        .expect("registration succeeds");
    assert_eq!(store.state()["profile"]["name"], json!("live"));
}

#[test]
fn registration_without_preserve_installs_definition_state() {
    let store = create_store(
        StoreOptions::new().state(json!({ "profile": { "name": "live" } })),
    )
    .expect("valid store");

    store
        .register_module(
            "profile",
            ModuleDefinition::new()
                .namespaced(true)
                .state(json!({ "name": "fresh" })),
            RegisterOptions::default(),
        )
        .expect("registration succeeds");
    assert_eq!(store.state()["profile"]["name"], json!("fresh"));
}

#[tokio::test]
async fn namespace_skips_non_namespaced_ancestors() {
    // outer (plain) -> inner (namespaced) -> leaf (plain): handlers in leaf
    // inherit the `inner` namespace while state nests under the full path.
    let leaf = ModuleDefinition::new()
        .state(json!({ "hits": 0 }))
        .mutation("bump", |state, payload| {
            let n = payload.as_i64().unwrap_or(1);
            state["hits"] = json!(state["hits"].as_i64().unwrap_or(0) + n);
        })
        .action(
            "whoami",
            |ctx: ActionContext, _payload: Value| async move {
                Ok(json!(ctx.namespace().join("/")))
            },
        );
    let inner = ModuleDefinition::new()
        .namespaced(true)
        .state(json!({}))
        .module("leaf", leaf);
    let outer = ModuleDefinition::new().state(json!({})).module("inner", inner);

    let store = create_store(StoreOptions::new().module("outer", outer)).expect("valid store");

    store.commit("inner/bump", json!(1));
    assert_eq!(store.state()["outer"]["inner"]["leaf"]["hits"], json!(1));

    let namespace = store
        .dispatch("inner/whoami", Value::Null)
        .await
        .expect("dispatch succeeds");
    assert_eq!(namespace, json!("inner"));
}

#[test]
fn registration_creates_missing_intermediate_modules() {
    let store = create_store(StoreOptions::new().state(json!({}))).expect("valid store");

    store
        .register_module("shop/cart", session_module(), RegisterOptions::default())
        .expect("registration succeeds");

    assert!(store.has_module("shop"));
    assert!(store.has_module("shop/cart"));
    store.commit("cart/login", json!("eve"));
    assert_eq!(store.state()["shop"]["cart"]["user"], json!("eve"));
}

#[test]
fn hot_update_swaps_handlers_and_keeps_state() {
    let counter = ModuleDefinition::new()
        .namespaced(true)
        .state(json!({ "count": 0 }))
        .mutation("inc", |state, payload| {
            let n = payload.as_i64().unwrap_or(1);
            state["count"] = json!(state["count"].as_i64().unwrap_or(0) + n);
        });

    let store = create_store(StoreOptions::new().module("counter", counter)).expect("valid store");
    store.commit("counter/inc", json!(1));
    assert_eq!(store.state()["counter"]["count"], json!(1));

    store.hot_update(ModuleOverlay::new().module(
        "counter",
        ModuleOverlay::new().mutation("inc", |state, payload| {
            let n = payload.as_i64().unwrap_or(1);
            state["count"] = json!(state["count"].as_i64().unwrap_or(0) + n * 10);
        }),
    ));

    // New handler, untouched state.
    store.commit("counter/inc", json!(1));
    assert_eq!(store.state()["counter"]["count"], json!(11));
}

#[test]
fn hot_update_skips_unknown_modules() {
    let store = create_store(
        StoreOptions::new()
            .state(json!({ "count": 0 }))
            .mutation("inc", |state, payload| {
                let n = payload.as_i64().unwrap_or(1);
                state["count"] = json!(state["count"].as_i64().unwrap_or(0) + n);
            }),
    )
    .expect("valid store");

    store.hot_update(ModuleOverlay::new().module(
        "ghost",
        ModuleOverlay::new().mutation("inc", |_, _| {}),
    ));

    store.commit("inc", json!(2));
    assert_eq!(store.state()["count"], json!(2));
}
