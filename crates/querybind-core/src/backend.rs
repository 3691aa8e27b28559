//! Backend driver trait and SQL dialect descriptor.

use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// The SQL flavor a backend speaks.
///
/// Everything dialect-specific the engine needs is answered here so the
/// criteria compiler stays backend-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    MySql,
    Postgres,
}

impl Dialect {
    /// Quote an identifier: double quotes on Postgres, backticks otherwise.
    pub fn quote(&self, identifier: &str) -> String {
        match self {
            Dialect::Postgres => format!("\"{identifier}\""),
            Dialect::Sqlite | Dialect::MySql => format!("`{identifier}`"),
        }
    }

    /// Placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite | Dialect::MySql => "?".to_string(),
        }
    }

    /// Pattern-match operator for case-insensitive `contains`.
    pub const fn contains_operator(&self) -> &'static str {
        match self {
            Dialect::Postgres => "ILIKE",
            Dialect::Sqlite | Dialect::MySql => "LIKE",
        }
    }

    /// Can generated keys be read back with `INSERT ... RETURNING`?
    pub const fn supports_returning(&self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    /// Duplicate-skip rendering for batched inserts: MySQL rewrites the
    /// verb, the others append a conflict clause.
    pub fn skip_duplicates(&self, insert_verb: &mut String, suffix: &mut String) {
        match self {
            Dialect::MySql => *insert_verb = "INSERT IGNORE INTO".to_string(),
            Dialect::Sqlite | Dialect::Postgres => {
                *suffix = " ON CONFLICT DO NOTHING".to_string();
            }
        }
    }
}

/// Object-safe synchronous driver interface.
///
/// One instance is one physical connection; the engine serializes access
/// to it. Transaction control here is *physical* - reentrancy bookkeeping
/// lives in the engine's connection wrapper, not in drivers.
pub trait Backend: Send {
    /// The SQL flavor this backend speaks.
    fn dialect(&self) -> Dialect;

    /// Execute a statement that returns rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement and return the affected-row count.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// The key generated by the most recent INSERT, when the backend
    /// tracks one (`Value::Null` otherwise).
    fn last_insert_id(&mut self) -> Result<Value>;

    /// Physically start a transaction.
    fn begin(&mut self) -> Result<()>;

    /// Physically commit the open transaction.
    fn commit(&mut self) -> Result<()>;

    /// Physically roll back the open transaction.
    fn rollback(&mut self) -> Result<()>;
}
