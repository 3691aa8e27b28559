//! Per-scalar-type coercion between JSON criteria values and SQL values.

use chrono::{NaiveDate, NaiveDateTime};
use querybind_core::error::TypeError;
use querybind_core::{Error, FieldDescriptor, Result, ScalarType, Value};
use serde_json::Value as Json;

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Coerce a caller-provided JSON value into the storage value for `field`.
///
/// Fails with a type error before any SQL is built when the value does not
/// fit the field's declared scalar type.
pub fn coerce(field: &FieldDescriptor, json: &Json) -> Result<Value> {
    if json.is_null() {
        if field.nullable {
            return Ok(Value::Null);
        }
        return Err(type_error(field, json));
    }

    match field.scalar_type {
        ScalarType::String => match json {
            Json::String(s) => Ok(Value::Text(s.clone())),
            Json::Number(n) => Ok(Value::Text(n.to_string())),
            _ => Err(type_error(field, json)),
        },
        ScalarType::Int => match json {
            Json::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Ok(Value::Int(v))
                } else if let Some(f) = n.as_f64().filter(|f| f.fract() == 0.0) {
                    Ok(Value::Int(f as i64))
                } else {
                    Err(type_error(field, json))
                }
            }
            Json::String(s) => s
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| type_error(field, json)),
            _ => Err(type_error(field, json)),
        },
        ScalarType::Float => match json {
            Json::Number(n) => n
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| type_error(field, json)),
            Json::String(s) => s
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| type_error(field, json)),
            _ => Err(type_error(field, json)),
        },
        ScalarType::Boolean => match json {
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::Number(n) => match n.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(type_error(field, json)),
            },
            _ => Err(type_error(field, json)),
        },
        ScalarType::DateTime => match json {
            Json::String(s) => parse_datetime(s)
                .map(|dt| Value::Text(dt.format(DATETIME_FORMAT).to_string()))
                .ok_or_else(|| type_error(field, json)),
            _ => Err(type_error(field, json)),
        },
    }
}

/// Decode a storage value back into JSON, shaped by the field's scalar type
/// (so SQLite's 0/1 booleans come back out as JSON booleans).
pub fn decode(field: &FieldDescriptor, value: &Value) -> Json {
    match (field.scalar_type, value) {
        (ScalarType::Boolean, Value::Int(v)) => Json::Bool(*v != 0),
        (ScalarType::Boolean, Value::Text(s)) => match s.as_str() {
            "0" | "false" | "f" => Json::Bool(false),
            "1" | "true" | "t" => Json::Bool(true),
            _ => value.to_json(),
        },
        (ScalarType::Int, Value::Text(s)) => s
            .parse::<i64>()
            .map(Json::from)
            .unwrap_or_else(|_| value.to_json()),
        (ScalarType::Float, Value::Int(v)) => Json::from(*v as f64),
        (ScalarType::Float, Value::Text(s)) => s
            .parse::<f64>()
            .map(Json::from)
            .unwrap_or_else(|_| value.to_json()),
        _ => value.to_json(),
    }
}

/// Structural JSON→Value conversion for places without a schema field at
/// hand (raw relation key values and the like).
pub fn json_to_value(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(v) = n.as_i64() {
                Value::Int(v)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Json::String(s) => Value::Text(s.clone()),
        Json::Array(_) | Json::Object(_) => Value::Text(json.to_string()),
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn type_error(field: &FieldDescriptor, json: &Json) -> Error {
    Error::Type(
        TypeError::new(field.scalar_type.name(), json.to_string()).for_field(field.name),
    )
}
