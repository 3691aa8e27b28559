//! Core types and traits for querybind.
//!
//! This crate carries the pieces every other querybind crate builds on:
//!
//! - `Value` - dynamic SQL values for parameter binding and result rows
//! - `Row` / `ColumnInfo` - ordered result rows with O(1) name lookup
//! - `Error` - the engine-wide error taxonomy
//! - schema descriptors - per-entity field/relation metadata, built once
//! - `Backend` / `Dialect` - the synchronous driver seam

pub mod backend;
pub mod error;
pub mod row;
pub mod schema;
pub mod value;

pub use backend::{Backend, Dialect};
pub use error::{
    ConfigError, Error, QueryError, RelationError, RelationErrorKind, Result, TransactionError,
    TypeError, ValidationError,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use schema::{
    Cardinality, DefaultValue, EntityBuilder, EntityDescriptor, FieldDescriptor,
    ReferentialAction, RelationDescriptor, ScalarType, Schema,
};
pub use value::Value;
