//! Reentrant transaction behavior through the engine surface.

mod common;

use common::{engine, todo_count};
use querybind::prelude::*;
use serde_json::json;

#[test]
fn nested_rollback_wins_at_the_outer_commit() {
    let engine = engine();
    let conn = engine.connection();
    let todos = engine.entity("Todo").unwrap();

    conn.begin().unwrap();
    conn.begin().unwrap();
    todos.create(json!({ "data": { "title": "doomed" } })).unwrap();
    conn.rollback().unwrap();
    conn.commit().unwrap();

    assert_eq!(todo_count(&engine), 0);
}

#[test]
fn nested_commits_persist_at_the_outer_boundary() {
    let engine = engine();
    let conn = engine.connection();
    let todos = engine.entity("Todo").unwrap();

    conn.begin().unwrap();
    conn.begin().unwrap();
    todos.create(json!({ "data": { "title": "kept" } })).unwrap();
    conn.commit().unwrap();

    // Still invisible physically, committed only at the outer boundary.
    conn.commit().unwrap();
    assert_eq!(todo_count(&engine), 1);
}

#[test]
fn engine_transaction_closure_composes_with_operation_scopes() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();

    let result: Result<()> = engine.transaction(|| {
        todos.create(json!({ "data": { "title": "one" } }))?;
        todos.create(json!({ "data": { "title": "two" } }))?;
        Err(Error::Serde("abort".to_string()))
    });
    assert!(result.is_err());
    assert_eq!(todo_count(&engine), 0);

    engine
        .transaction(|| {
            todos.create(json!({ "data": { "title": "one" } }))?;
            todos.create(json!({ "data": { "title": "two" } }))?;
            Ok(())
        })
        .unwrap();
    assert_eq!(todo_count(&engine), 2);
}

#[test]
fn failed_nested_operation_poisons_the_outer_scope() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();

    let result: Result<()> = engine.transaction(|| {
        todos.create(json!({ "data": { "title": "valid" } }))?;
        // The dangling connect fails inside its own nested scope.
        todos.create(json!({
            "data": { "title": "broken", "user": { "connect": { "id": "missing" } } },
        }))?;
        Ok(())
    });
    assert!(result.is_err());
    assert_eq!(todo_count(&engine), 0);
}

#[test]
fn transaction_state_is_reset_after_every_outcome() {
    let engine = engine();
    let conn = engine.connection();
    let todos = engine.entity("Todo").unwrap();

    todos.create(json!({ "data": { "title": "a" } })).unwrap();
    assert_eq!(conn.transaction_state().depth, 0);
    assert!(!conn.transaction_state().rollback_requested);

    let _ = todos.create(json!({ "data": { "completed": 5 } }));
    assert_eq!(conn.transaction_state().depth, 0);
    assert!(!conn.transaction_state().rollback_requested);
}

#[test]
fn storage_failure_mid_transaction_rolls_back() {
    let engine = engine();
    let todos = engine.entity("Todo").unwrap();

    // Drop the table out from under the engine to force a storage error
    // after validation has passed.
    let result: Result<()> = engine.transaction(|| {
        todos.create(json!({ "data": { "title": "first" } }))?;
        engine.execute_raw("INSERT INTO Nowhere (x) VALUES (1)")?;
        Ok(())
    });
    assert!(matches!(result, Err(Error::Query(_))));
    assert_eq!(todo_count(&engine), 0);
}
