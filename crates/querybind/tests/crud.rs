//! End-to-end CRUD behavior against in-memory SQLite.

mod common;

use common::{engine, todo_count};
use querybind::prelude::*;
use serde_json::json;

#[test]
fn create_then_find_unique_round_trips() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();

    let created = todos
        .create(json!({ "data": { "title": "buy milk" } }))
        .unwrap();

    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(id.len(), 21);
    assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    assert_eq!(created["title"], json!("buy milk"));
    assert_eq!(created["completed"], json!(false));
    assert_eq!(created["createdAt"].as_str().unwrap().len(), 19);
    assert_eq!(created["updatedAt"].as_str().unwrap().len(), 19);
    assert_eq!(created["userId"], json!(null));

    let found = todos
        .find_unique(json!({ "where": { "id": id } }))
        .unwrap()
        .unwrap();
    assert_eq!(found, created);
}

#[test]
fn field_order_follows_the_schema() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();
    let created = todos.create(json!({ "data": { "title": "a" } })).unwrap();
    let keys: Vec<&str> = created.keys().map(String::as_str).collect();
    assert_eq!(
        keys,
        vec!["id", "title", "completed", "createdAt", "updatedAt", "userId"]
    );
}

#[test]
fn create_rejects_missing_required_field() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();
    let err = todos.create(json!({ "data": { "completed": true } })).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(err.to_string().contains("title"));
    assert_eq!(todo_count(&engine), 0);
}

#[test]
fn create_rejects_unknown_field_and_option() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();

    let err = todos
        .create(json!({ "data": { "title": "x", "tittle": "y" } }))
        .unwrap_err();
    assert!(err.to_string().contains("tittle"));

    let err = todos
        .create(json!({ "data": { "title": "x" }, "wehre": {} }))
        .unwrap_err();
    assert!(err.to_string().contains("wehre"));
    assert_eq!(todo_count(&engine), 0);
}

#[test]
fn select_and_include_are_rejected_together_before_any_sql() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();
    for criteria in [
        json!({ "data": { "title": "x" }, "select": { "id": true }, "include": { "user": true } }),
        json!({ "where": { "id": "x" }, "select": { "id": true }, "include": { "user": true } }),
    ] {
        let err = if criteria.get("data").is_some() {
            todos.create(criteria).unwrap_err()
        } else {
            todos.find_unique(criteria).unwrap_err()
        };
        assert!(matches!(err, Error::Validation(_)));
    }
    assert_eq!(todo_count(&engine), 0);
}

#[test]
fn type_coercion_failures_name_the_field() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();
    let err = todos
        .create(json!({ "data": { "title": "x", "completed": "yes" } }))
        .unwrap_err();
    assert!(matches!(err, Error::Type(_)));
    assert!(err.to_string().contains("completed"));
    assert_eq!(todo_count(&engine), 0);
}

#[test]
fn find_unique_requires_a_unique_field() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();
    let err = todos
        .find_unique(json!({ "where": { "title": "buy milk" } }))
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn find_many_with_contains() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();
    todos.create(json!({ "data": { "title": "buy milk" } })).unwrap();
    todos.create(json!({ "data": { "title": "walk the dog" } })).unwrap();

    let found = todos
        .find_many(json!({ "where": { "title": { "contains": "milk" } } }))
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["title"], json!("buy milk"));
}

#[test]
fn find_many_supports_logical_grouping() {
    let engine = engine();
    let items = engine.entity("Item").unwrap();
    for (id, name, score) in [(1, "a", 1.0), (2, "b", 2.0), (3, "c", 3.0)] {
        items
            .create(json!({ "data": { "id": id, "name": name, "score": score } }))
            .unwrap();
    }

    let found = items
        .find_many(json!({
            "where": { "OR": [ { "name": "a" }, { "score": { "gte": 3 } } ] }
        }))
        .unwrap();
    assert_eq!(found.len(), 2);

    let found = items
        .find_many(json!({ "where": { "NOT": { "name": "a" } } }))
        .unwrap();
    assert_eq!(found.len(), 2);

    let found = items
        .find_many(json!({ "where": { "id": { "in": [1, 3] } } }))
        .unwrap();
    assert_eq!(found.len(), 2);
}

#[test]
fn find_many_ordering_take_skip_distinct() {
    let engine = engine();
    let items = engine.entity("Item").unwrap();
    for id in 1..=5 {
        items
            .create(json!({ "data": { "id": id, "name": format!("n{id}") } }))
            .unwrap();
    }

    let found = items
        .find_many(json!({ "orderBy": { "id": "desc" }, "take": 2, "skip": 1 }))
        .unwrap();
    let ids: Vec<i64> = found.iter().map(|r| r["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![4, 3]);

    let found = items
        .find_many(json!({ "orderBy": "id", "distinct": true }))
        .unwrap();
    assert_eq!(found.len(), 5);

    let err = items.find_many(json!({ "orderBy": { "id": "sideways" } })).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn cursor_excludes_the_cursor_row_by_default() {
    let engine = engine();
    let items = engine.entity("Item").unwrap();
    for id in 1..=5 {
        items
            .create(json!({ "data": { "id": id, "name": format!("n{id}") } }))
            .unwrap();
    }

    // id >= 2 with the implicit OFFSET 1 skips the cursor row itself.
    let found = items
        .find_many(json!({ "cursor": { "id": 2 }, "orderBy": "id" }))
        .unwrap();
    let ids: Vec<i64> = found.iter().map(|r| r["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![3, 4, 5]);

    // An explicit skip wins over the default.
    let found = items
        .find_many(json!({ "cursor": { "id": 2 }, "orderBy": "id", "skip": 0 }))
        .unwrap();
    let ids: Vec<i64> = found.iter().map(|r| r["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![2, 3, 4, 5]);
}

#[test]
fn find_first_returns_one_row() {
    let engine = engine();
    let items = engine.entity("Item").unwrap();
    for id in 1..=3 {
        items
            .create(json!({ "data": { "id": id, "name": format!("n{id}") } }))
            .unwrap();
    }
    let first = items
        .find_first(json!({ "orderBy": { "id": "desc" } }))
        .unwrap()
        .unwrap();
    assert_eq!(first["id"], json!(3));

    let none = items
        .find_first(json!({ "where": { "id": 99 } }))
        .unwrap();
    assert!(none.is_none());
}

#[test]
fn update_changes_exactly_the_given_fields() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();
    let created = todos.create(json!({ "data": { "title": "before" } })).unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let updated = todos
        .update(json!({ "where": { "id": id }, "data": { "title": "after" } }))
        .unwrap()
        .unwrap();

    assert_eq!(updated["title"], json!("after"));
    assert_eq!(updated["completed"], created["completed"]);
    assert_eq!(updated["createdAt"], created["createdAt"]);
    assert_eq!(updated["userId"], created["userId"]);
    assert_eq!(updated["id"], created["id"]);
}

#[test]
fn update_sets_explicit_null_on_nullable_fields() {
    let engine = engine();
    let items = engine.entity("Item").unwrap();
    items
        .create(json!({ "data": { "id": 1, "name": "a", "score": 2.5 } }))
        .unwrap();
    let updated = items
        .update(json!({ "where": { "id": 1 }, "data": { "score": null } }))
        .unwrap()
        .unwrap();
    assert_eq!(updated["score"], json!(null));
}

#[test]
fn update_with_no_match_returns_none() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();
    let result = todos
        .update(json!({ "where": { "id": "missing" }, "data": { "title": "x" } }))
        .unwrap();
    assert!(result.is_none());
}

#[test]
fn update_many_reports_affected_rows() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();
    todos.create(json!({ "data": { "title": "a" } })).unwrap();
    todos.create(json!({ "data": { "title": "b" } })).unwrap();

    let result = todos
        .update_many(json!({ "where": { "completed": false }, "data": { "completed": true } }))
        .unwrap();
    assert_eq!(result["status"], json!("success"));
    assert_eq!(result["affectedRows"], json!(2));
}

#[test]
fn delete_returns_the_before_image() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();
    let created = todos.create(json!({ "data": { "title": "to delete" } })).unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let deleted = todos.delete(json!({ "where": { "id": id } })).unwrap();
    assert_eq!(deleted["title"], json!("to delete"));
    assert_eq!(todo_count(&engine), 0);
}

#[test]
fn delete_on_no_match_returns_not_found_value() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();
    todos.create(json!({ "data": { "title": "keep me" } })).unwrap();

    let result = todos.delete(json!({ "where": { "id": "missing" } })).unwrap();
    assert_eq!(result["entity"], json!("Todo"));
    assert_eq!(result["cause"], json!("not found"));
    assert_eq!(todo_count(&engine), 1);
}

#[test]
fn delete_many() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();
    todos.create(json!({ "data": { "title": "a" } })).unwrap();
    todos.create(json!({ "data": { "title": "b" } })).unwrap();

    let result = todos
        .delete_many(json!({ "where": { "completed": false } }))
        .unwrap();
    assert_eq!(result["affectedRows"], json!(2));
    assert_eq!(todo_count(&engine), 0);

    let result = todos
        .delete_many(json!({ "where": { "title": "gone" } }))
        .unwrap();
    assert_eq!(result["cause"], json!("not found"));
}

#[test]
fn upsert_creates_then_updates() {
    let engine = engine();
    let users = engine.entity("User").unwrap();

    let created = users
        .upsert(json!({
            "where": { "email": "a@example.com" },
            "create": { "name": "Alice", "email": "a@example.com" },
            "update": { "name": "Updated" },
        }))
        .unwrap()
        .unwrap();
    assert_eq!(created["name"], json!("Alice"));

    let updated = users
        .upsert(json!({
            "where": { "email": "a@example.com" },
            "create": { "name": "Alice", "email": "a@example.com" },
            "update": { "name": "Updated" },
        }))
        .unwrap()
        .unwrap();
    assert_eq!(updated["name"], json!("Updated"));
    assert_eq!(updated["id"], created["id"]);
}

#[test]
fn create_many_batches_and_skips_duplicates() {
    let engine = engine();
    let users = engine.entity("User").unwrap();

    let result = users
        .create_many(json!({ "data": [
            { "name": "Alice", "email": "a@example.com" },
            { "name": "Bob", "email": "b@example.com" },
        ] }))
        .unwrap();
    assert_eq!(result["count"], json!(2));

    let result = users
        .create_many(json!({
            "data": [
                { "name": "Alice again", "email": "a@example.com" },
                { "name": "Carol", "email": "c@example.com" },
            ],
            "skipDuplicates": true,
        }))
        .unwrap();
    assert_eq!(result["count"], json!(1));

    let err = users
        .create_many(json!({ "data": [
            { "name": "X", "email": "x@example.com", "todos": { "create": {} } },
        ] }))
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn typed_records_via_serde() {
    #[derive(serde::Deserialize)]
    struct TodoRow {
        title: String,
        completed: bool,
    }

    let engine = engine();
    let todos = engine.entity("Todo").unwrap();
    let created = todos.create(json!({ "data": { "title": "typed" } })).unwrap();

    let row: TodoRow = from_record(&created).unwrap();
    assert_eq!(row.title, "typed");
    assert!(!row.completed);
}

#[test]
fn raw_escape_hatch() {
    let engine = engine();
    let affected = engine
        .execute_raw("INSERT INTO Items (id, name) VALUES (7, 'raw')")
        .unwrap();
    assert_eq!(affected, 1);

    let rows = engine.query_raw("SELECT name FROM Items WHERE id = 7").unwrap();
    assert_eq!(rows[0].get_named::<String>("name").unwrap(), "raw");
}

#[test]
fn unknown_entity_is_rejected() {
    let engine = engine();
    assert!(engine.entity("Ghost").is_err());
}

#[test]
fn file_scheme_persists_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("file:{}", dir.path().join("app.db").display());

    {
        let engine = Engine::connect(&url, common::schema()).unwrap();
        engine
            .execute_raw("CREATE TABLE Items (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL)")
            .unwrap();
        engine
            .entity("Item")
            .unwrap()
            .create(json!({ "data": { "id": 1, "name": "persisted" } }))
            .unwrap();
    }

    let engine = Engine::connect(&url, common::schema()).unwrap();
    let row = engine
        .entity("Item")
        .unwrap()
        .find_unique(json!({ "where": { "id": 1 } }))
        .unwrap()
        .unwrap();
    assert_eq!(row["name"], json!("persisted"));
}

#[test]
fn unsupported_scheme_fails_closed() {
    let err = Engine::connect("mongodb://localhost/db", common::schema()).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
