//! Shared fixtures: an in-memory SQLite engine with a small schema.

use querybind::prelude::*;

pub fn schema() -> Schema {
    Schema::build(vec![
        EntityDescriptor::builder("User", "Users")
            .field(
                FieldDescriptor::new("id", ScalarType::String)
                    .primary_key(true)
                    .unique(true)
                    .default_value(DefaultValue::Cuid),
            )
            .field(FieldDescriptor::new("name", ScalarType::String))
            .field(FieldDescriptor::new("email", ScalarType::String).unique(true))
            .build()
            .unwrap(),
        EntityDescriptor::builder("Todo", "Todos")
            .field(
                FieldDescriptor::new("id", ScalarType::String)
                    .primary_key(true)
                    .unique(true)
                    .default_value(DefaultValue::Cuid),
            )
            .field(FieldDescriptor::new("title", ScalarType::String))
            .field(
                FieldDescriptor::new("completed", ScalarType::Boolean)
                    .default_value(DefaultValue::Literal(Value::Bool(false))),
            )
            .field(
                FieldDescriptor::new("createdAt", ScalarType::DateTime)
                    .default_value(DefaultValue::Now),
            )
            .field(FieldDescriptor::new("updatedAt", ScalarType::DateTime).updated_at(true))
            .field(
                FieldDescriptor::new("userId", ScalarType::String)
                    .nullable(true)
                    .foreign_key(true),
            )
            .field(
                FieldDescriptor::new("user", ScalarType::String)
                    .nullable(true)
                    .relation(
                        RelationDescriptor::new("user", "User")
                            .fields("userId", "id")
                            .on_delete(ReferentialAction::SetNull)
                            .on_update(ReferentialAction::Cascade),
                    ),
            )
            .build()
            .unwrap(),
        EntityDescriptor::builder("Item", "Items")
            .field(FieldDescriptor::new("id", ScalarType::Int).primary_key(true))
            .field(FieldDescriptor::new("name", ScalarType::String))
            .field(FieldDescriptor::new("score", ScalarType::Float).nullable(true))
            .build()
            .unwrap(),
    ])
    .unwrap()
}

pub fn engine() -> Engine {
    let engine = Engine::connect("sqlite::memory:", schema()).unwrap();
    engine
        .execute_raw(
            "CREATE TABLE Users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE
            )",
        )
        .unwrap();
    engine
        .execute_raw(
            "CREATE TABLE Todos (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                completed INTEGER NOT NULL,
                createdAt TEXT NOT NULL,
                updatedAt TEXT NOT NULL,
                userId TEXT
            )",
        )
        .unwrap();
    engine
        .execute_raw(
            "CREATE TABLE Items (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                score REAL
            )",
        )
        .unwrap();
    engine
}

pub fn todo_count(engine: &Engine) -> i64 {
    engine.query_raw("SELECT COUNT(*) AS n FROM Todos").unwrap()[0]
        .get_named::<i64>("n")
        .unwrap()
}
