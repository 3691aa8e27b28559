//! The engine-side connection: one backend plus reentrant transaction
//! bookkeeping.
//!
//! Nested logical operations (a row create plus several relation connects,
//! an upsert delegating to create) each open their own transaction scope
//! without knowing whether they are outermost. Only the outermost boundary
//! has physical effect; a rollback requested at any depth is honored there.

use crate::config::DatabaseConfig;
use querybind_core::error::TransactionError;
use querybind_core::{Backend, Dialect, Error, Result, Row, Value};
use querybind_mysql::MySqlBackend;
use querybind_postgres::PostgresBackend;
use querybind_sqlite::SqliteBackend;
use std::sync::Mutex;

/// Transaction bookkeeping owned by the connection for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionState {
    /// Open logical scopes; physical effect only at the 0 boundary
    pub depth: u32,
    /// A nested scope asked for rollback; sticky until the boundary resolves
    pub rollback_requested: bool,
}

impl TransactionState {
    const fn reset() -> Self {
        Self {
            depth: 0,
            rollback_requested: false,
        }
    }
}

/// A single backend connection with reentrant transaction management.
///
/// Access to the backend is serialized through a mutex; the engine assumes
/// one connection per logical session and does not multiplex.
pub struct Connection {
    backend: Mutex<Box<dyn Backend>>,
    state: Mutex<TransactionState>,
    dialect: Dialect,
}

impl Connection {
    /// Open a backend selected by the connection string's scheme.
    pub fn open(url: &str) -> Result<Self> {
        let backend: Box<dyn Backend> = match DatabaseConfig::parse(url)? {
            DatabaseConfig::Sqlite(config) => Box::new(SqliteBackend::open(&config)?),
            DatabaseConfig::MySql(config) => Box::new(MySqlBackend::connect(&config)?),
            DatabaseConfig::Postgres(config) => Box::new(PostgresBackend::connect(&config)?),
        };
        Ok(Self::from_backend(backend))
    }

    /// Wrap an already-opened backend.
    pub fn from_backend(backend: Box<dyn Backend>) -> Self {
        let dialect = backend.dialect();
        Self {
            backend: Mutex::new(backend),
            state: Mutex::new(TransactionState::reset()),
            dialect,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Current transaction state (mainly for tests and diagnostics).
    pub fn transaction_state(&self) -> TransactionState {
        *self.state.lock().unwrap()
    }

    /// Execute a parameterized statement that returns rows.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        tracing::debug!(sql, bindings = params.len(), "query");
        self.backend.lock().unwrap().query(sql, params)
    }

    /// Execute a parameterized statement, returning the first row if any.
    pub fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }

    /// Execute a parameterized statement, returning the affected-row count.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        tracing::debug!(sql, bindings = params.len(), "execute");
        self.backend.lock().unwrap().execute(sql, params)
    }

    /// Key generated by the most recent INSERT, when the backend tracks one.
    pub fn last_insert_id(&self) -> Result<Value> {
        self.backend.lock().unwrap().last_insert_id()
    }

    /// Enter a transaction scope. Physically starts one only at depth 0.
    pub fn begin(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.depth == 0 {
            self.backend.lock().unwrap().begin()?;
        }
        state.depth += 1;
        tracing::trace!(depth = state.depth, "transaction begin");
        Ok(())
    }

    /// Leave a transaction scope.
    ///
    /// At the outermost boundary this physically commits - unless some
    /// nested scope requested a rollback, in which case it physically
    /// rolls back instead. Inner scopes only decrement, except that a
    /// pending rollback request is forced through as soon as the decrement
    /// lands on depth 1.
    pub fn commit(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.depth == 0 {
            return Err(Error::Transaction(TransactionError::new(
                "commit without an active transaction",
            )));
        }
        if state.depth <= 1 {
            let mut backend = self.backend.lock().unwrap();
            let result = if state.rollback_requested {
                tracing::debug!("commit resolving as rollback");
                backend.rollback()
            } else {
                backend.commit()
            };
            *state = TransactionState::reset();
            result
        } else {
            state.depth -= 1;
            if state.depth == 1 && state.rollback_requested {
                let result = self.backend.lock().unwrap().rollback();
                *state = TransactionState::reset();
                result
            } else {
                Ok(())
            }
        }
    }

    /// Abort a transaction scope.
    ///
    /// Physically rolls back at the outermost boundary; inner scopes mark
    /// the rollback request and decrement only.
    pub fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.depth == 0 {
            return Err(Error::Transaction(TransactionError::new(
                "rollback without an active transaction",
            )));
        }
        if state.depth <= 1 {
            let result = self.backend.lock().unwrap().rollback();
            *state = TransactionState::reset();
            result
        } else {
            state.rollback_requested = true;
            state.depth -= 1;
            Ok(())
        }
    }

    /// Run a closure inside a transaction scope: commit on `Ok`, roll back
    /// on `Err`. Composes with nested scopes opened by the closure.
    pub fn transaction<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.begin()?;
        match f() {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                let _ = self.rollback();
                Err(err)
            }
        }
    }

    /// Raw statement execution, bypassing all validation. The caller owns
    /// the injection and portability risk.
    pub fn execute_raw(&self, sql: &str) -> Result<u64> {
        self.execute(sql, &[])
    }

    /// Raw query execution, bypassing all validation.
    pub fn query_raw(&self, sql: &str) -> Result<Vec<Row>> {
        self.query(sql, &[])
    }
}
