//! Embedded SQLite backend for querybind.
//!
//! Speaks the `Backend` trait from `querybind-core` over a single
//! synchronous connection to a file-backed or in-memory database.

mod connection;

pub use connection::{SqliteBackend, SqliteConfig};
