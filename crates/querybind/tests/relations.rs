//! Relation hydration and the write-side connect protocol.

mod common;

use common::{engine, todo_count};
use querybind::prelude::*;
use serde_json::json;

fn seed_user(engine: &Engine, name: &str, email: &str) -> String {
    engine
        .entity("User")
        .unwrap()
        .create(json!({ "data": { "name": name, "email": email } }))
        .unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string()
}

#[test]
fn create_with_connect_sets_the_foreign_key() {
    let engine = engine();
    let user_id = seed_user(&engine, "Alice", "a@example.com");
    let todos = engine.entity("Todo").unwrap();

    let created = todos
        .create(json!({
            "data": { "title": "connected", "user": { "connect": { "id": user_id } } },
        }))
        .unwrap();
    assert_eq!(created["userId"], json!(user_id));
}

#[test]
fn connect_with_no_matching_target_aborts_the_whole_create() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();

    let err = todos
        .create(json!({
            "data": { "title": "dangling", "user": { "connect": { "id": "missing" } } },
        }))
        .unwrap_err();
    assert!(matches!(err, Error::Relation(_)));

    // The row insert must have been rolled back with the failed connect.
    assert_eq!(todo_count(&engine), 0);
}

#[test]
fn create_with_nested_create() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();

    let created = todos
        .create(json!({
            "data": {
                "title": "with new user",
                "user": { "create": { "name": "Fresh", "email": "fresh@example.com" } },
            },
            "include": { "user": true },
        }))
        .unwrap();

    let related = created["user"].as_array().unwrap();
    assert_eq!(related.len(), 1);
    assert_eq!(related[0]["name"], json!("Fresh"));
}

#[test]
fn connect_or_create_finds_then_creates() {
    let engine = engine();
    let user_id = seed_user(&engine, "Alice", "a@example.com");
    let todos = engine.entity("Todo").unwrap();

    let connected = todos
        .create(json!({
            "data": {
                "title": "existing",
                "user": {
                    "connectOrCreate": {
                        "where": { "email": "a@example.com" },
                        "create": { "name": "Alice", "email": "a@example.com" },
                    },
                },
            },
        }))
        .unwrap();
    assert_eq!(connected["userId"], json!(user_id));

    let created = todos
        .create(json!({
            "data": {
                "title": "fresh",
                "user": {
                    "connectOrCreate": {
                        "where": { "email": "new@example.com" },
                        "create": { "name": "New", "email": "new@example.com" },
                    },
                },
            },
        }))
        .unwrap();
    assert_ne!(created["userId"], json!(user_id));
    assert!(!created["userId"].is_null());
}

#[test]
fn mutually_exclusive_payloads_are_rejected_before_any_write() {
    let engine = engine();
    let user_id = seed_user(&engine, "Alice", "a@example.com");
    let todos = engine.entity("Todo").unwrap();

    for payload in [
        json!({ "create": { "name": "x", "email": "x@e" },
                "connectOrCreate": { "where": {}, "create": {} } }),
        json!({ "connect": { "id": user_id },
                "connectOrCreate": { "where": {}, "create": {} } }),
        json!({ "connect": { "id": user_id }, "disconnect": true }),
    ] {
        let err = todos
            .update(json!({
                "where": { "id": "whatever" },
                "data": { "user": payload },
            }))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "payload not rejected");
    }
}

#[test]
fn disconnect_is_not_allowed_on_create() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();
    let err = todos
        .create(json!({
            "data": { "title": "x", "user": { "disconnect": true } },
        }))
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn unknown_connect_type_is_named() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();
    let err = todos
        .create(json!({
            "data": { "title": "x", "user": { "attach": { "id": "y" } } },
        }))
        .unwrap_err();
    assert!(err.to_string().contains("attach"));
}

#[test]
fn create_many_payload_is_rejected_for_single_valued_relation() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();
    let err = todos
        .create(json!({
            "data": {
                "title": "x",
                "user": { "createMany": [ { "name": "a", "email": "a@e" } ] },
            },
        }))
        .unwrap_err();
    assert!(matches!(err, Error::Relation(_)));
    assert!(err.to_string().contains("createMany"));
}

#[test]
fn update_disconnects_and_reconnects() {
    let engine = engine();
    let alice = seed_user(&engine, "Alice", "a@example.com");
    let bob = seed_user(&engine, "Bob", "b@example.com");
    let todos = engine.entity("Todo").unwrap();

    let created = todos
        .create(json!({
            "data": { "title": "handover", "user": { "connect": { "id": alice } } },
        }))
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let updated = todos
        .update(json!({
            "where": { "id": id },
            "data": { "user": { "disconnect": true } },
        }))
        .unwrap()
        .unwrap();
    assert_eq!(updated["userId"], json!(null));

    let updated = todos
        .update(json!({
            "where": { "id": id },
            "data": { "user": { "connect": { "id": bob } } },
        }))
        .unwrap()
        .unwrap();
    assert_eq!(updated["userId"], json!(bob));
}

#[test]
fn relation_update_edits_the_connected_target() {
    let engine = engine();
    let alice = seed_user(&engine, "Alice", "a@example.com");
    let todos = engine.entity("Todo").unwrap();

    let created = todos
        .create(json!({
            "data": { "title": "x", "user": { "connect": { "id": alice } } },
        }))
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    todos
        .update(json!({
            "where": { "id": id },
            "data": { "user": { "update": { "name": "Renamed" } } },
        }))
        .unwrap();

    let user = engine
        .entity("User")
        .unwrap()
        .find_unique(json!({ "where": { "id": alice } }))
        .unwrap()
        .unwrap();
    assert_eq!(user["name"], json!("Renamed"));
}

#[test]
fn relation_update_without_a_connected_target_fails() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();
    let created = todos.create(json!({ "data": { "title": "loose" } })).unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let err = todos
        .update(json!({
            "where": { "id": id },
            "data": { "user": { "update": { "name": "nobody" } } },
        }))
        .unwrap_err();
    assert!(matches!(err, Error::Relation(_)));
}

#[test]
fn include_hydrates_the_relation() {
    let engine = engine();
    let alice = seed_user(&engine, "Alice", "a@example.com");
    let todos = engine.entity("Todo").unwrap();
    let created = todos
        .create(json!({
            "data": { "title": "x", "user": { "connect": { "id": alice } } },
        }))
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let found = todos
        .find_unique(json!({ "where": { "id": id }, "include": { "user": true } }))
        .unwrap()
        .unwrap();
    let related = found["user"].as_array().unwrap();
    assert_eq!(related[0]["name"], json!("Alice"));
    assert_eq!(related[0]["email"], json!("a@example.com"));
}

#[test]
fn null_foreign_key_hydrates_to_null() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();
    let created = todos.create(json!({ "data": { "title": "alone" } })).unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let found = todos
        .find_unique(json!({ "where": { "id": id }, "include": { "user": true } }))
        .unwrap()
        .unwrap();
    assert_eq!(found["user"], json!(null));
}

#[test]
fn select_with_relation_fetches_key_transiently_and_strips_it() {
    let engine = engine();
    let alice = seed_user(&engine, "Alice", "a@example.com");
    let todos = engine.entity("Todo").unwrap();
    todos
        .create(json!({
            "data": { "title": "projected", "user": { "connect": { "id": alice } } },
        }))
        .unwrap();

    let found = todos
        .find_many(json!({
            "select": { "title": true, "user": { "select": { "name": true } } },
        }))
        .unwrap();

    assert_eq!(found.len(), 1);
    let record = &found[0];
    assert_eq!(record["title"], json!("projected"));

    // Neither the implicitly fetched primary key nor the transient foreign
    // key survive into the result.
    assert!(!record.contains_key("id"));
    assert!(!record.contains_key("userId"));

    let related = record["user"].as_array().unwrap();
    assert_eq!(related[0], json!({ "name": "Alice" }));
}

#[test]
fn nested_projection_validates_against_the_target_entity() {
    let engine = engine();
    let alice = seed_user(&engine, "Alice", "a@example.com");
    let todos = engine.entity("Todo").unwrap();
    let created = todos
        .create(json!({
            "data": { "title": "x", "user": { "connect": { "id": alice } } },
        }))
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let err = todos
        .find_unique(json!({
            "where": { "id": id },
            "select": { "user": { "select": { "ghost": true } } },
        }))
        .unwrap_err();
    assert!(err.to_string().contains("ghost"));
    assert!(err.to_string().contains("User"));
}
