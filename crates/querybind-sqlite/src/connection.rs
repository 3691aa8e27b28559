//! SQLite backend implementation.
//!
//! A thin synchronous wrapper over the SQLite C API. SQLite exposes five
//! storage classes (INTEGER, REAL, TEXT, BLOB, NULL) which map directly
//! onto `Value`.

#![allow(unsafe_code)]

use libsqlite3_sys as ffi;
use querybind_core::error::{ConfigError, QueryError};
use querybind_core::row::ColumnInfo;
use querybind_core::{Backend, Dialect, Error, Result, Row, Value};
use std::ffi::{c_char, c_int, CStr, CString};
use std::ptr;
use std::sync::Arc;

/// Configuration for opening a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for an in-memory database.
    pub path: String,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            busy_timeout_ms: 5000,
        }
    }
}

impl SqliteConfig {
    /// Config for a file-backed database (created when missing).
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Set the busy timeout.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

/// A synchronous connection to a SQLite database.
pub struct SqliteBackend {
    db: *mut ffi::sqlite3,
    path: String,
}

// SAFETY: the handle is only touched through &mut self; the engine
// serializes access behind its own lock.
unsafe impl Send for SqliteBackend {}

impl SqliteBackend {
    /// Open a database with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            Error::Config(ConfigError::new("database path contains a null byte"))
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;

        // SAFETY: valid pointers; return code checked below.
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };
        if rc != ffi::SQLITE_OK {
            let message = if db.is_null() {
                "failed to open database".to_string()
            } else {
                // SAFETY: db is valid; errmsg returns a C string owned by it.
                unsafe {
                    let msg = CStr::from_ptr(ffi::sqlite3_errmsg(db))
                        .to_string_lossy()
                        .into_owned();
                    ffi::sqlite3_close(db);
                    msg
                }
            };
            return Err(Error::Config(ConfigError::new(format!(
                "failed to open '{}': {message}",
                config.path
            ))));
        }

        if config.busy_timeout_ms > 0 {
            // SAFETY: db is valid.
            unsafe {
                ffi::sqlite3_busy_timeout(db, config.busy_timeout_ms as c_int);
            }
        }

        tracing::debug!(path = %config.path, "opened sqlite database");
        Ok(Self {
            db,
            path: config.path.clone(),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-backed database.
    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    /// The database path this backend was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn error(&self, sql: &str) -> Error {
        // SAFETY: db is valid; errmsg returns a C string owned by it.
        let message = unsafe {
            CStr::from_ptr(ffi::sqlite3_errmsg(self.db))
                .to_string_lossy()
                .into_owned()
        };
        Error::Query(QueryError::new(message).with_sql(sql))
    }

    fn prepare(&mut self, sql: &str) -> Result<Statement> {
        let c_sql = CString::new(sql)
            .map_err(|_| Error::Query(QueryError::new("statement contains a null byte")))?;
        let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();

        // SAFETY: valid pointers; length -1 reads up to the terminator.
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(self.db, c_sql.as_ptr(), -1, &mut stmt, ptr::null_mut())
        };
        if rc != ffi::SQLITE_OK {
            return Err(self.error(sql));
        }
        Ok(Statement { stmt })
    }

    fn bind(&self, statement: &Statement, sql: &str, params: &[Value]) -> Result<()> {
        for (i, value) in params.iter().enumerate() {
            let index = (i + 1) as c_int;
            // SAFETY: stmt is a valid prepared statement; indices are 1-based.
            let rc = unsafe {
                match value {
                    Value::Null => ffi::sqlite3_bind_null(statement.stmt, index),
                    Value::Bool(b) => {
                        ffi::sqlite3_bind_int(statement.stmt, index, i32::from(*b))
                    }
                    Value::Int(v) => ffi::sqlite3_bind_int64(statement.stmt, index, *v),
                    Value::Float(v) => ffi::sqlite3_bind_double(statement.stmt, index, *v),
                    Value::Text(s) => ffi::sqlite3_bind_text(
                        statement.stmt,
                        index,
                        s.as_ptr().cast::<c_char>(),
                        s.len() as c_int,
                        ffi::SQLITE_TRANSIENT(),
                    ),
                    Value::Bytes(b) => ffi::sqlite3_bind_blob(
                        statement.stmt,
                        index,
                        b.as_ptr().cast(),
                        b.len() as c_int,
                        ffi::SQLITE_TRANSIENT(),
                    ),
                }
            };
            if rc != ffi::SQLITE_OK {
                return Err(self.error(sql));
            }
        }
        Ok(())
    }

    fn column_names(statement: &Statement) -> Vec<String> {
        // SAFETY: stmt is a valid prepared statement.
        unsafe {
            let count = ffi::sqlite3_column_count(statement.stmt);
            (0..count)
                .map(|i| {
                    let ptr = ffi::sqlite3_column_name(statement.stmt, i);
                    if ptr.is_null() {
                        String::new()
                    } else {
                        CStr::from_ptr(ptr).to_string_lossy().into_owned()
                    }
                })
                .collect()
        }
    }

    fn read_row(statement: &Statement, columns: &Arc<ColumnInfo>) -> Row {
        let count = columns.len();
        let mut values = Vec::with_capacity(count);
        for i in 0..count {
            let index = i as c_int;
            // SAFETY: the statement just returned SQLITE_ROW; index in range.
            let value = unsafe {
                match ffi::sqlite3_column_type(statement.stmt, index) {
                    ffi::SQLITE_INTEGER => {
                        Value::Int(ffi::sqlite3_column_int64(statement.stmt, index))
                    }
                    ffi::SQLITE_FLOAT => {
                        Value::Float(ffi::sqlite3_column_double(statement.stmt, index))
                    }
                    ffi::SQLITE_TEXT => {
                        let ptr = ffi::sqlite3_column_text(statement.stmt, index);
                        let len = ffi::sqlite3_column_bytes(statement.stmt, index);
                        if ptr.is_null() {
                            Value::Null
                        } else {
                            let slice =
                                std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize);
                            Value::Text(String::from_utf8_lossy(slice).into_owned())
                        }
                    }
                    ffi::SQLITE_BLOB => {
                        let ptr = ffi::sqlite3_column_blob(statement.stmt, index);
                        let len = ffi::sqlite3_column_bytes(statement.stmt, index);
                        if ptr.is_null() || len == 0 {
                            Value::Bytes(Vec::new())
                        } else {
                            let slice =
                                std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize);
                            Value::Bytes(slice.to_vec())
                        }
                    }
                    _ => Value::Null,
                }
            };
            values.push(value);
        }
        Row::with_columns(Arc::clone(columns), values)
    }
}

impl Backend for SqliteBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let statement = self.prepare(sql)?;
        self.bind(&statement, sql, params)?;

        let columns = Arc::new(ColumnInfo::new(Self::column_names(&statement)));
        let mut rows = Vec::new();
        loop {
            // SAFETY: stmt is valid until the Statement drops.
            let rc = unsafe { ffi::sqlite3_step(statement.stmt) };
            match rc {
                ffi::SQLITE_ROW => rows.push(Self::read_row(&statement, &columns)),
                ffi::SQLITE_DONE => break,
                _ => return Err(self.error(sql)),
            }
        }
        tracing::trace!(rows = rows.len(), "sqlite query done");
        Ok(rows)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let statement = self.prepare(sql)?;
        self.bind(&statement, sql, params)?;

        // SAFETY: stmt is valid until the Statement drops.
        let rc = unsafe { ffi::sqlite3_step(statement.stmt) };
        if rc != ffi::SQLITE_DONE && rc != ffi::SQLITE_ROW {
            return Err(self.error(sql));
        }
        // SAFETY: db is valid.
        let changes = unsafe { ffi::sqlite3_changes(self.db) };
        Ok(changes as u64)
    }

    fn last_insert_id(&mut self) -> Result<Value> {
        // SAFETY: db is valid.
        let rowid = unsafe { ffi::sqlite3_last_insert_rowid(self.db) };
        if rowid == 0 {
            Ok(Value::Null)
        } else {
            Ok(Value::Int(rowid))
        }
    }

    fn begin(&mut self) -> Result<()> {
        self.execute("BEGIN", &[]).map(|_| ())
    }

    fn commit(&mut self) -> Result<()> {
        self.execute("COMMIT", &[]).map(|_| ())
    }

    fn rollback(&mut self) -> Result<()> {
        self.execute("ROLLBACK", &[]).map(|_| ())
    }
}

impl Drop for SqliteBackend {
    fn drop(&mut self) {
        // SAFETY: db was opened by us and is closed exactly once.
        unsafe {
            ffi::sqlite3_close(self.db);
        }
    }
}

/// Owned prepared statement, finalized on drop.
struct Statement {
    stmt: *mut ffi::sqlite3_stmt,
}

impl Drop for Statement {
    fn drop(&mut self) {
        // SAFETY: stmt came from sqlite3_prepare_v2 and is finalized once.
        unsafe {
            ffi::sqlite3_finalize(self.stmt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> SqliteBackend {
        let mut backend = SqliteBackend::open_memory().unwrap();
        backend
            .execute(
                "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT, score REAL)",
                &[],
            )
            .unwrap();
        backend
    }

    #[test]
    fn insert_and_query_round_trip() {
        let mut backend = setup();
        let affected = backend
            .execute(
                "INSERT INTO items (name, score) VALUES (?, ?)",
                &[Value::Text("alpha".into()), Value::Float(1.5)],
            )
            .unwrap();
        assert_eq!(affected, 1);

        let rows = backend
            .query("SELECT id, name, score FROM items", &[])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_named::<i64>("id").unwrap(), 1);
        assert_eq!(rows[0].get_named::<String>("name").unwrap(), "alpha");
        assert!((rows[0].get_named::<f64>("score").unwrap() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn null_and_bool_binding() {
        let mut backend = setup();
        backend
            .execute(
                "INSERT INTO items (name, score) VALUES (?, ?)",
                &[Value::Null, Value::Bool(true)],
            )
            .unwrap();
        let rows = backend.query("SELECT name, score FROM items", &[]).unwrap();
        assert!(rows[0].get_by_name("name").unwrap().is_null());
        assert_eq!(rows[0].get_named::<i64>("score").unwrap(), 1);
    }

    #[test]
    fn last_insert_id_tracks_rowid() {
        let mut backend = setup();
        backend
            .execute("INSERT INTO items (name) VALUES (?)", &[Value::Text("a".into())])
            .unwrap();
        assert_eq!(backend.last_insert_id().unwrap(), Value::Int(1));
        backend
            .execute("INSERT INTO items (name) VALUES (?)", &[Value::Text("b".into())])
            .unwrap();
        assert_eq!(backend.last_insert_id().unwrap(), Value::Int(2));
    }

    #[test]
    fn physical_transaction_rollback() {
        let mut backend = setup();
        backend.begin().unwrap();
        backend
            .execute("INSERT INTO items (name) VALUES (?)", &[Value::Text("tx".into())])
            .unwrap();
        backend.rollback().unwrap();

        let rows = backend.query("SELECT * FROM items", &[]).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn query_error_carries_statement() {
        let mut backend = setup();
        let err = backend.query("SELECT * FROM missing", &[]).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn file_backed_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let path = path.to_string_lossy().to_string();

        {
            let mut backend = SqliteBackend::open_file(path.clone()).unwrap();
            backend
                .execute("CREATE TABLE t (v INTEGER)", &[])
                .unwrap();
            backend
                .execute("INSERT INTO t (v) VALUES (?)", &[Value::Int(42)])
                .unwrap();
        }

        let mut backend = SqliteBackend::open_file(path).unwrap();
        let rows = backend.query("SELECT v FROM t", &[]).unwrap();
        assert_eq!(rows[0].get_named::<i64>("v").unwrap(), 42);
    }
}
