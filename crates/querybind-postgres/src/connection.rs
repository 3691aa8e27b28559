//! PostgreSQL backend implementation.
//!
//! Wraps a single synchronous `postgres` client. Parameters are bound
//! through a dynamic wrapper that renders each `Value` according to the
//! type the server declared for the placeholder, so `Int(1)` can feed an
//! INT2/INT4/INT8 column alike and DateTime text feeds TIMESTAMP columns.

use crate::config::PostgresConfig;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use postgres::types::{IsNull, ToSql, Type};
use postgres::{Client, NoTls};
use querybind_core::error::{ConfigError, QueryError};
use querybind_core::row::ColumnInfo;
use querybind_core::{Backend, Dialect, Error, Result, Row, Value};
use std::sync::Arc;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A synchronous connection to a Postgres-family server.
pub struct PostgresBackend {
    client: Client,
}

impl PostgresBackend {
    /// Connect with the given configuration.
    pub fn connect(config: &PostgresConfig) -> Result<Self> {
        let mut pg = postgres::Config::new();
        pg.host(&config.host)
            .port(config.port)
            .user(&config.user)
            .dbname(&config.database);
        if let Some(password) = &config.password {
            pg.password(password);
        }

        let client = pg.connect(NoTls).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("failed to connect to postgres at {}: {e}", config.host),
                source: Some(Box::new(e)),
            })
        })?;

        tracing::debug!(host = %config.host, db = %config.database, "connected to postgres");
        Ok(Self { client })
    }

    fn query_error(sql: &str, err: postgres::Error) -> Error {
        Error::Query(QueryError {
            message: err.to_string(),
            sql: Some(sql.to_string()),
            source: Some(Box::new(err)),
        })
    }
}

impl Backend for PostgresBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let wrapped: Vec<PgValue<'_>> = params.iter().map(PgValue).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            wrapped.iter().map(|v| v as &(dyn ToSql + Sync)).collect();

        let pg_rows = self
            .client
            .query(sql, &refs)
            .map_err(|e| Self::query_error(sql, e))?;

        let mut columns: Option<Arc<ColumnInfo>> = None;
        let mut rows = Vec::with_capacity(pg_rows.len());
        for pg_row in &pg_rows {
            let info = columns.get_or_insert_with(|| {
                Arc::new(ColumnInfo::new(
                    pg_row
                        .columns()
                        .iter()
                        .map(|c| c.name().to_string())
                        .collect(),
                ))
            });
            rows.push(decode_row(pg_row, info));
        }
        tracing::trace!(rows = rows.len(), "postgres query done");
        Ok(rows)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let wrapped: Vec<PgValue<'_>> = params.iter().map(PgValue).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            wrapped.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
        self.client
            .execute(sql, &refs)
            .map_err(|e| Self::query_error(sql, e))
    }

    fn last_insert_id(&mut self) -> Result<Value> {
        // Generated keys come back through INSERT ... RETURNING instead.
        Ok(Value::Null)
    }

    fn begin(&mut self) -> Result<()> {
        self.client
            .batch_execute("BEGIN")
            .map_err(|e| Self::query_error("BEGIN", e))
    }

    fn commit(&mut self) -> Result<()> {
        self.client
            .batch_execute("COMMIT")
            .map_err(|e| Self::query_error("COMMIT", e))
    }

    fn rollback(&mut self) -> Result<()> {
        self.client
            .batch_execute("ROLLBACK")
            .map_err(|e| Self::query_error("ROLLBACK", e))
    }
}

fn decode_row(pg_row: &postgres::Row, columns: &Arc<ColumnInfo>) -> Row {
    let mut values = Vec::with_capacity(pg_row.len());
    for (i, column) in pg_row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::BOOL {
            opt(pg_row.try_get::<_, Option<bool>>(i), Value::Bool)
        } else if *ty == Type::INT2 {
            opt(pg_row.try_get::<_, Option<i16>>(i), |v| Value::Int(i64::from(v)))
        } else if *ty == Type::INT4 {
            opt(pg_row.try_get::<_, Option<i32>>(i), |v| Value::Int(i64::from(v)))
        } else if *ty == Type::INT8 {
            opt(pg_row.try_get::<_, Option<i64>>(i), Value::Int)
        } else if *ty == Type::FLOAT4 {
            opt(pg_row.try_get::<_, Option<f32>>(i), |v| {
                Value::Float(f64::from(v))
            })
        } else if *ty == Type::FLOAT8 {
            opt(pg_row.try_get::<_, Option<f64>>(i), Value::Float)
        } else if *ty == Type::TIMESTAMP {
            opt(pg_row.try_get::<_, Option<NaiveDateTime>>(i), |v| {
                Value::Text(v.format(DATETIME_FORMAT).to_string())
            })
        } else if *ty == Type::TIMESTAMPTZ {
            opt(pg_row.try_get::<_, Option<DateTime<Utc>>>(i), |v| {
                Value::Text(v.format(DATETIME_FORMAT).to_string())
            })
        } else if *ty == Type::DATE {
            opt(pg_row.try_get::<_, Option<NaiveDate>>(i), |v| {
                Value::Text(v.format("%Y-%m-%d").to_string())
            })
        } else if *ty == Type::BYTEA {
            opt(pg_row.try_get::<_, Option<Vec<u8>>>(i), Value::Bytes)
        } else {
            // TEXT, VARCHAR, NAME, BPCHAR and anything else textual
            opt(pg_row.try_get::<_, Option<String>>(i), Value::Text)
        };
        values.push(value);
    }
    Row::with_columns(Arc::clone(columns), values)
}

fn opt<T>(
    fetched: std::result::Result<Option<T>, postgres::Error>,
    wrap: impl FnOnce(T) -> Value,
) -> Value {
    match fetched {
        Ok(Some(v)) => wrap(v),
        Ok(None) | Err(_) => Value::Null,
    }
}

/// Late-bound parameter: encoded per the type the server inferred for
/// the placeholder.
#[derive(Debug)]
struct PgValue<'a>(&'a Value);

impl ToSql for PgValue<'_> {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => b.to_sql(ty, out),
            Value::Int(v) => {
                if *ty == Type::INT2 {
                    i16::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*v as f64).to_sql(ty, out)
                } else if *ty == Type::BOOL {
                    (*v != 0).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Value::Float(v) => {
                if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Value::Text(s) => {
                if *ty == Type::TIMESTAMP {
                    parse_datetime(s)?.to_sql(ty, out)
                } else if *ty == Type::TIMESTAMPTZ {
                    DateTime::<Utc>::from_naive_utc_and_offset(parse_datetime(s)?, Utc)
                        .to_sql(ty, out)
                } else if *ty == Type::DATE {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")?.to_sql(ty, out)
                } else {
                    s.to_sql(ty, out)
                }
            }
            Value::Bytes(b) => b.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn to_sql_checked(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        self.to_sql(ty, out)
    }
}

fn parse_datetime(
    s: &str,
) -> std::result::Result<NaiveDateTime, Box<dyn std::error::Error + Sync + Send>> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Sync + Send>)
}
