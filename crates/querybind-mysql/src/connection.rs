//! MySQL backend implementation.
//!
//! Wraps a single synchronous connection from the `mysql` driver and maps
//! its dynamic value type onto `Value`. DATETIME/TIME columns are rendered
//! to text so they travel the same way as on the other backends.

use crate::config::MySqlConfig;
use mysql::prelude::Queryable;
use mysql::{Conn, Opts, OptsBuilder, Params};
use querybind_core::error::{ConfigError, QueryError};
use querybind_core::row::ColumnInfo;
use querybind_core::{Backend, Dialect, Error, Result, Row, Value};
use std::sync::Arc;

/// A synchronous connection to a MySQL-family server.
pub struct MySqlBackend {
    conn: Conn,
}

impl MySqlBackend {
    /// Connect with the given configuration.
    pub fn connect(config: &MySqlConfig) -> Result<Self> {
        let opts: Opts = OptsBuilder::new()
            .ip_or_hostname(Some(config.host.clone()))
            .tcp_port(config.port)
            .user(Some(config.user.clone()))
            .pass(config.password.clone())
            .db_name(Some(config.database.clone()))
            .into();

        let conn = Conn::new(opts).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("failed to connect to mysql at {}: {e}", config.host),
                source: Some(Box::new(e)),
            })
        })?;

        tracing::debug!(host = %config.host, db = %config.database, "connected to mysql");
        Ok(Self { conn })
    }

    fn to_params(params: &[Value]) -> Params {
        if params.is_empty() {
            return Params::Empty;
        }
        Params::Positional(params.iter().map(to_mysql_value).collect())
    }

    fn query_error(sql: &str, err: mysql::Error) -> Error {
        Error::Query(QueryError {
            message: err.to_string(),
            sql: Some(sql.to_string()),
            source: Some(Box::new(err)),
        })
    }
}

impl Backend for MySqlBackend {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let result = self
            .conn
            .exec_iter(sql, Self::to_params(params))
            .map_err(|e| Self::query_error(sql, e))?;

        let mut columns: Option<Arc<ColumnInfo>> = None;
        let mut rows = Vec::new();
        for row in result {
            let row = row.map_err(|e| Self::query_error(sql, e))?;
            let info = columns.get_or_insert_with(|| {
                Arc::new(ColumnInfo::new(
                    row.columns_ref()
                        .iter()
                        .map(|c| c.name_str().into_owned())
                        .collect(),
                ))
            });
            let values = row.unwrap().iter().map(from_mysql_value).collect();
            rows.push(Row::with_columns(Arc::clone(info), values));
        }
        tracing::trace!(rows = rows.len(), "mysql query done");
        Ok(rows)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let result = self
            .conn
            .exec_iter(sql, Self::to_params(params))
            .map_err(|e| Self::query_error(sql, e))?;
        Ok(result.affected_rows())
    }

    fn last_insert_id(&mut self) -> Result<Value> {
        let id = self.conn.last_insert_id();
        if id == 0 {
            Ok(Value::Null)
        } else {
            Ok(Value::Int(id as i64))
        }
    }

    fn begin(&mut self) -> Result<()> {
        self.conn
            .query_drop("START TRANSACTION")
            .map_err(|e| Self::query_error("START TRANSACTION", e))
    }

    fn commit(&mut self) -> Result<()> {
        self.conn
            .query_drop("COMMIT")
            .map_err(|e| Self::query_error("COMMIT", e))
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn
            .query_drop("ROLLBACK")
            .map_err(|e| Self::query_error("ROLLBACK", e))
    }
}

fn to_mysql_value(value: &Value) -> mysql::Value {
    match value {
        Value::Null => mysql::Value::NULL,
        Value::Bool(b) => mysql::Value::Int(i64::from(*b)),
        Value::Int(v) => mysql::Value::Int(*v),
        Value::Float(v) => mysql::Value::Double(*v),
        Value::Text(s) => mysql::Value::Bytes(s.clone().into_bytes()),
        Value::Bytes(b) => mysql::Value::Bytes(b.clone()),
    }
}

fn from_mysql_value(value: &mysql::Value) -> Value {
    match value {
        mysql::Value::NULL => Value::Null,
        mysql::Value::Bytes(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        mysql::Value::Int(v) => Value::Int(*v),
        mysql::Value::UInt(v) => match i64::try_from(*v) {
            Ok(v) => Value::Int(v),
            Err(_) => {
                tracing::warn!(value = *v, "u64 column value exceeds i64::MAX; clamping");
                Value::Int(i64::MAX)
            }
        },
        mysql::Value::Float(v) => Value::Float(f64::from(*v)),
        mysql::Value::Double(v) => Value::Float(*v),
        mysql::Value::Date(year, month, day, hour, minute, second, _micros) => {
            Value::Text(format!(
                "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
            ))
        }
        mysql::Value::Time(negative, days, hours, minutes, seconds, _micros) => {
            let sign = if *negative { "-" } else { "" };
            let total_hours = u32::from(*days) * 24 + u32::from(*hours);
            Value::Text(format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}"))
        }
    }
}
