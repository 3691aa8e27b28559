//! querybind - schema-aware declarative data access for SQL databases.
//!
//! Declarative JSON criteria go in; parameterized SQL comes out, across
//! embedded SQLite, MySQL, and Postgres backends. The engine validates
//! every criteria shape against a static per-entity schema before touching
//! storage, resolves one-to-many relations on read and write, and composes
//! nested write steps into one atomic unit through a reentrant transaction
//! manager.
//!
//! ```rust,ignore
//! use querybind::prelude::*;
//! use serde_json::json;
//!
//! let engine = Engine::connect("file:todos.db", schema)?;
//! let todos = engine.entity("Todo")?;
//!
//! let created = todos.create(json!({
//!     "data": { "title": "buy milk" },
//! }))?;
//!
//! let found = todos.find_many(json!({
//!     "where": { "title": { "contains": "milk" } },
//! }))?;
//! ```

mod coerce;
mod conditions;
mod config;
mod connection;
mod criteria;
mod defaults;
mod executor;
mod relation;

pub use config::DatabaseConfig;
pub use connection::{Connection, TransactionState};
pub use executor::{CountResult, EntityClient};

pub use querybind_core::{
    Backend, Cardinality, DefaultValue, Dialect, EntityDescriptor, Error, FieldDescriptor,
    ReferentialAction, RelationDescriptor, Result, Row, ScalarType, Schema, ValidationError,
    Value,
};

use serde::de::DeserializeOwned;

/// A hydrated operation result: an ordered field map.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Deserialize a record into a typed value.
pub fn from_record<T: DeserializeOwned>(record: &Record) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(record.clone()))
        .map_err(|e| Error::Serde(e.to_string()))
}

/// The engine: one connection, one schema, per-entity CRUD clients.
pub struct Engine {
    conn: Connection,
    schema: Schema,
}

impl Engine {
    /// Open the backend selected by the connection string and bind it to
    /// the schema.
    pub fn connect(url: &str, schema: Schema) -> Result<Self> {
        Ok(Self {
            conn: Connection::open(url)?,
            schema,
        })
    }

    /// Build an engine over an already-opened backend.
    pub fn from_backend(backend: Box<dyn Backend>, schema: Schema) -> Self {
        Self {
            conn: Connection::from_backend(backend),
            schema,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// CRUD client for a registered entity.
    pub fn entity(&self, name: &str) -> Result<EntityClient<'_>> {
        let descriptor = self.schema.entity(name).ok_or_else(|| {
            Error::Validation(ValidationError::new(
                name,
                format!("the entity '{name}' is not registered in the schema"),
            ))
        })?;
        Ok(EntityClient::new(self, descriptor.clone()))
    }

    /// Run a closure inside one transaction scope: commit on `Ok`, roll
    /// back on `Err`. Nested operation scopes compose reentrantly.
    pub fn transaction<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.conn.transaction(f)
    }

    /// Raw statement execution, bypassing all validation.
    pub fn execute_raw(&self, sql: &str) -> Result<u64> {
        self.conn.execute_raw(sql)
    }

    /// Raw query execution, bypassing all validation.
    pub fn query_raw(&self, sql: &str) -> Result<Vec<Row>> {
        self.conn.query_raw(sql)
    }
}

/// Commonly used types in one import.
pub mod prelude {
    pub use crate::{
        from_record, Cardinality, CountResult, DefaultValue, Engine, EntityClient,
        EntityDescriptor, Error, FieldDescriptor, Record, ReferentialAction, RelationDescriptor,
        Result, ScalarType, Schema, Value,
    };
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("dialect", &self.conn.dialect())
            .field("entities", &self.schema.len())
            .finish()
    }
}
