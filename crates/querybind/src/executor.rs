//! Per-entity CRUD execution.
//!
//! Every operation is a bounded pipeline: validate shapes, compile
//! conditions, run parameterized SQL, resolve relations, and re-fetch
//! through the same read path the caller would use. Writes that take more
//! than one step run inside a reentrant transaction scope.

use crate::coerce::{coerce, decode};
use crate::conditions::{compile_where, SqlParams};
use crate::criteria::{check_options, projection_from, required_object, Projection};
use crate::relation::{self, WriteContext};
use crate::{defaults, Engine, Record};
use querybind_core::error::QueryError;
use querybind_core::{
    EntityDescriptor, Error, Result, Row, ValidationError, Value,
};
use regex::Regex;
use serde_json::{json, Map, Value as Json};
use std::sync::Arc;

/// Result of a `count` operation.
#[derive(Debug, Clone, PartialEq)]
pub enum CountResult {
    /// Plain row count (no field selection)
    Total(i64),
    /// One `COUNT(field)` per selected field
    Fields(Record),
}

const AGGREGATE_TAGS: [(&str, &str); 5] = [
    ("_avg", "AVG"),
    ("_count", "COUNT"),
    ("_max", "MAX"),
    ("_min", "MIN"),
    ("_sum", "SUM"),
];

/// CRUD access to one entity through the engine's connection.
pub struct EntityClient<'e> {
    engine: &'e Engine,
    entity: Arc<EntityDescriptor>,
}

impl<'e> EntityClient<'e> {
    pub(crate) fn new(engine: &'e Engine, entity: Arc<EntityDescriptor>) -> Self {
        Self { engine, entity }
    }

    /// The entity descriptor this client operates on.
    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.entity
    }

    fn name(&self) -> &'static str {
        self.entity.name()
    }

    fn quote(&self, identifier: &str) -> String {
        self.engine.connection().dialect().quote(identifier)
    }

    fn table(&self) -> String {
        self.quote(self.entity.table())
    }

    fn params(&self) -> SqlParams {
        SqlParams::new(self.engine.connection().dialect())
    }

    // ---------------------------------------------------------------
    // create

    /// Insert one row (with optional relation sub-payloads) and return it
    /// re-fetched through the caller's projection.
    pub fn create(&self, criteria: Json) -> Result<Record> {
        let object = check_options(self.name(), &criteria, &["data", "select", "include"])?;
        let data = required_object(self.name(), object, "data")?;
        projection_from(&self.entity, object)?;

        for key in data.keys() {
            if !self.entity.has_field(key) {
                return Err(Error::Validation(ValidationError::unknown_field(
                    self.name(),
                    key,
                )));
            }
        }
        for field in self.entity.required_fields() {
            if !data.contains_key(field.name) {
                return Err(Error::Validation(ValidationError::new(
                    self.name(),
                    format!(
                        "the required field '{}' of type '{}' is missing",
                        field.name,
                        field.scalar_type.name()
                    ),
                )));
            }
        }
        for (key, payload) in data {
            if let Some(rel) = self.entity.relation(key) {
                relation::validate_payload(&self.entity, rel, payload, WriteContext::Create)?;
            }
        }

        let (columns, placeholders, params, bound_pk) = self.insert_tuple(data)?;

        self.engine.connection().transaction(|| {
            let pk = self.entity.primary_key();
            let dialect = self.engine.connection().dialect();
            let mut sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.table(),
                columns.join(", "),
                placeholders.join(", ")
            );

            let pk_value = if dialect.supports_returning() {
                sql.push_str(&format!(" RETURNING {}", self.quote(pk.name)));
                let row = self.engine.connection().query_one(&sql, params.values())?;
                match bound_pk {
                    Some(value) => value,
                    None => row
                        .and_then(|row| row.get_by_name(pk.name).cloned())
                        .unwrap_or(Value::Null),
                }
            } else {
                self.engine.connection().execute(&sql, params.values())?;
                match bound_pk {
                    Some(value) => value,
                    None => self.engine.connection().last_insert_id()?,
                }
            };

            for (key, payload) in data {
                if let Some(rel) = self.entity.relation(key) {
                    relation::resolve_write(
                        self.engine,
                        &self.entity,
                        rel,
                        payload,
                        &pk_value,
                        WriteContext::Create,
                    )?;
                }
            }

            let mut pk_where = Map::new();
            pk_where.insert(pk.name.to_string(), decode(pk, &pk_value));
            let mut refetch = Map::new();
            refetch.insert("where".to_string(), Json::Object(pk_where));
            copy_projection_keys(object, &mut refetch);
            self.find_unique(Json::Object(refetch))?.ok_or_else(|| {
                Error::Query(QueryError::new(format!(
                    "created {} row could not be re-fetched",
                    self.name()
                )))
            })
        })
    }

    /// Batched insert without relation payloads; returns `{count}`.
    pub fn create_many(&self, criteria: Json) -> Result<Record> {
        let object = check_options(self.name(), &criteria, &["data", "skipDuplicates"])?;
        let Some(items) = object.get("data").and_then(Json::as_array) else {
            return Err(Error::Validation(ValidationError::new(
                self.name(),
                "'data' must be an array of field maps",
            )));
        };
        if items.is_empty() {
            return Err(Error::Validation(ValidationError::new(
                self.name(),
                "'data' must contain at least one item",
            )));
        }
        let skip_duplicates = match object.get("skipDuplicates") {
            None => false,
            Some(Json::Bool(flag)) => *flag,
            Some(_) => {
                return Err(Error::Validation(ValidationError::new(
                    self.name(),
                    "'skipDuplicates' must be a boolean",
                )));
            }
        };

        let mut maps = Vec::with_capacity(items.len());
        for item in items {
            let Some(map) = item.as_object() else {
                return Err(Error::Validation(ValidationError::new(
                    self.name(),
                    "every 'data' item must be a field map",
                )));
            };
            for key in map.keys() {
                let Some(field) = self.entity.field(key) else {
                    return Err(Error::Validation(ValidationError::unknown_field(
                        self.name(),
                        key,
                    )));
                };
                if field.is_relation() {
                    return Err(Error::Validation(ValidationError::new(
                        self.name(),
                        "createMany does not support relation payloads",
                    )));
                }
            }
            for field in self.entity.required_fields() {
                if !map.contains_key(field.name) {
                    return Err(Error::Validation(ValidationError::new(
                        self.name(),
                        format!(
                            "the required field '{}' of type '{}' is missing",
                            field.name,
                            field.scalar_type.name()
                        ),
                    )));
                }
            }
            maps.push(map);
        }

        // Column set: every stored field any item binds, in schema order.
        let columns: Vec<_> = self
            .entity
            .scalar_fields()
            .filter(|f| {
                f.updated_at
                    || f.default.is_some()
                    || maps.iter().any(|m| m.contains_key(f.name))
            })
            .collect();

        let mut params = self.params();
        let mut tuples = Vec::with_capacity(maps.len());
        for map in &maps {
            let mut placeholders = Vec::with_capacity(columns.len());
            for &field in &columns {
                let provided = map.get(field.name);
                let value = if field.updated_at {
                    Value::Text(defaults::now())
                } else if let Some(default) = &field.default {
                    match provided {
                        Some(json) if !json.is_null() => coerce(field, json)?,
                        _ => defaults::generate(default),
                    }
                } else {
                    match provided {
                        Some(json) => coerce(field, json)?,
                        None => Value::Null,
                    }
                };
                placeholders.push(params.push(value));
            }
            tuples.push(format!("({})", placeholders.join(", ")));
        }

        let mut insert_verb = "INSERT INTO".to_string();
        let mut suffix = String::new();
        if skip_duplicates {
            self.engine
                .connection()
                .dialect()
                .skip_duplicates(&mut insert_verb, &mut suffix);
        }
        let column_list: Vec<String> = columns.iter().map(|f| self.quote(f.name)).collect();
        let sql = format!(
            "{insert_verb} {} ({}) VALUES {}{suffix}",
            self.table(),
            column_list.join(", "),
            tuples.join(", ")
        );

        let affected = self
            .engine
            .connection()
            .transaction(|| self.engine.connection().execute(&sql, params.values()))?;

        let mut result = Record::new();
        result.insert("count".to_string(), json!(affected));
        Ok(result)
    }

    // ---------------------------------------------------------------
    // reads

    /// Fetch at most one row anchored on a unique field.
    pub fn find_unique(&self, criteria: Json) -> Result<Option<Record>> {
        let object = check_options(self.name(), &criteria, &["where", "select", "include"])?;
        let where_tree = required_object(self.name(), object, "where")?;

        let unique = self.entity.unique_fields();
        if !where_tree.keys().any(|key| unique.contains(&key.as_str())) {
            return Err(Error::Validation(ValidationError::new(
                self.name(),
                format!(
                    "findUnique requires a unique field in 'where'; unique fields: {}",
                    unique.join(", ")
                ),
            )));
        }

        let projection = projection_from(&self.entity, object)?;
        let mut params = self.params();
        let conditions =
            compile_where(&self.entity, &Json::Object(where_tree.clone()), &mut params)?;
        if conditions.is_empty() {
            return Err(Error::Validation(ValidationError::new(
                self.name(),
                "no usable conditions in 'where'",
            )));
        }

        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            self.select_clause(&projection),
            self.table(),
            conditions.join(" AND ")
        );
        let row = self.engine.connection().query_one(&sql, params.values())?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut records = vec![self.record_from_row(&row)];
        relation::hydrate(self.engine, &self.entity, &mut records, &projection)?;
        self.strip_implicit_key(&mut records, &projection);
        Ok(records.pop())
    }

    /// Fetch every row matching the criteria.
    pub fn find_many(&self, criteria: Json) -> Result<Vec<Record>> {
        self.select_records(criteria, false)
    }

    /// Fetch the first row matching the criteria.
    pub fn find_first(&self, criteria: Json) -> Result<Option<Record>> {
        Ok(self.select_records(criteria, true)?.pop())
    }

    fn select_records(&self, criteria: Json, limit_one: bool) -> Result<Vec<Record>> {
        let criteria = if criteria.is_null() { json!({}) } else { criteria };
        let object = check_options(
            self.name(),
            &criteria,
            &[
                "where", "orderBy", "take", "skip", "cursor", "select", "include", "distinct",
            ],
        )?;

        let projection = projection_from(&self.entity, object)?;
        let mut params = self.params();
        let mut conditions = Vec::new();

        let mut implicit_skip = None;
        if let Some(cursor) = object.get("cursor") {
            self.compile_cursor(cursor, &mut params, &mut conditions)?;
            // The cursor row itself is excluded unless the caller skips
            // explicitly.
            if !object.contains_key("skip") {
                implicit_skip = Some(1);
            }
        }
        if let Some(where_tree) = object.get("where") {
            self.check_where_shape(where_tree)?;
            conditions.extend(compile_where(&self.entity, where_tree, &mut params)?);
        }

        let distinct = match object.get("distinct") {
            Some(Json::Bool(true)) => "DISTINCT ",
            Some(Json::Bool(false)) | None => "",
            Some(_) => {
                return Err(Error::Validation(ValidationError::new(
                    self.name(),
                    "'distinct' must be a boolean",
                )));
            }
        };

        let mut sql = format!(
            "SELECT {distinct}{} FROM {}",
            self.select_clause(&projection),
            self.table()
        );
        if !conditions.is_empty() {
            sql.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
        }
        sql.push_str(&self.order_by_clause(object)?);
        if limit_one {
            sql.push_str(" LIMIT 1");
        } else if let Some(take) = object.get("take") {
            sql.push_str(&format!(" LIMIT {}", self.page_bound(take, "take")?));
        }
        if let Some(skip) = object.get("skip") {
            sql.push_str(&format!(" OFFSET {}", self.page_bound(skip, "skip")?));
        } else if let Some(skip) = implicit_skip {
            sql.push_str(&format!(" OFFSET {skip}"));
        }

        let rows = self.engine.connection().query(&sql, params.values())?;
        let mut records: Vec<Record> = rows.iter().map(|row| self.record_from_row(row)).collect();
        relation::hydrate(self.engine, &self.entity, &mut records, &projection)?;
        self.strip_implicit_key(&mut records, &projection);
        Ok(records)
    }

    // ---------------------------------------------------------------
    // update

    /// Update matching rows' fields and relation payloads; returns the
    /// refreshed row located through the same `where`.
    pub fn update(&self, criteria: Json) -> Result<Option<Record>> {
        let object = check_options(
            self.name(),
            &criteria,
            &["where", "data", "select", "include"],
        )?;
        let where_tree = required_object(self.name(), object, "where")?;
        let data = required_object(self.name(), object, "data")?;
        projection_from(&self.entity, object)?;

        for (key, payload) in data {
            if !self.entity.has_field(key) {
                return Err(Error::Validation(ValidationError::unknown_field(
                    self.name(),
                    key,
                )));
            }
            if let Some(rel) = self.entity.relation(key) {
                relation::validate_payload(&self.entity, rel, payload, WriteContext::Update)?;
            }
        }

        let (set_parts, params_base) = self.set_clause(data)?;

        self.engine.connection().transaction(|| {
            let mut params = params_base.clone_into_params(self.params());
            if !set_parts.is_empty() {
                let conditions =
                    compile_where(&self.entity, &Json::Object(where_tree.clone()), &mut params)?;
                // SET placeholders were numbered first, so the WHERE
                // bindings follow them in order.
                let mut sql = format!(
                    "UPDATE {} SET {}",
                    self.table(),
                    render_set_parts(&set_parts, params.dialect())
                );
                if !conditions.is_empty() {
                    sql.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
                }
                self.engine.connection().execute(&sql, params.values())?;
            }

            // Relation payloads key off the primary key of the row the
            // caller's `where` matches, fetched without any projection.
            let located = self.find_first(Json::from(only_where(where_tree)))?;
            if let Some(record) = &located {
                let pk = self.entity.primary_key();
                let pk_value = record
                    .get(pk.name)
                    .map(crate::coerce::json_to_value)
                    .unwrap_or(Value::Null);
                for (key, payload) in data {
                    if let Some(rel) = self.entity.relation(key) {
                        relation::resolve_write(
                            self.engine,
                            &self.entity,
                            rel,
                            payload,
                            &pk_value,
                            WriteContext::Update,
                        )?;
                    }
                }
            }

            self.find_first(Json::from(clone_with(where_tree, object)))
        })
    }

    /// Update every matching row; returns `{status, message, affectedRows}`.
    pub fn update_many(&self, criteria: Json) -> Result<Record> {
        let object = check_options(self.name(), &criteria, &["where", "data"])?;
        let where_tree = required_object(self.name(), object, "where")?;
        let data = required_object(self.name(), object, "data")?;

        for key in data.keys() {
            if !self.entity.has_field(key) {
                return Err(Error::Validation(ValidationError::unknown_field(
                    self.name(),
                    key,
                )));
            }
        }

        let (set_parts, params_base) = self.set_clause(data)?;

        let affected = self.engine.connection().transaction(|| {
            if set_parts.is_empty() {
                return Ok(0);
            }
            let mut params = params_base.clone_into_params(self.params());
            let set_sql = render_set_parts(&set_parts, params.dialect());
            let conditions =
                compile_where(&self.entity, &Json::Object(where_tree.clone()), &mut params)?;
            let mut sql = format!("UPDATE {} SET {set_sql}", self.table());
            if !conditions.is_empty() {
                sql.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
            }
            self.engine.connection().execute(&sql, params.values())
        })?;

        let mut result = Record::new();
        result.insert("status".to_string(), json!("success"));
        result.insert("message".to_string(), json!("records updated successfully"));
        result.insert("affectedRows".to_string(), json!(affected));
        Ok(result)
    }

    // ---------------------------------------------------------------
    // delete

    /// Delete one row, returning its before-image - or a structured
    /// not-found value when nothing matched.
    pub fn delete(&self, criteria: Json) -> Result<Record> {
        let object = check_options(self.name(), &criteria, &["where", "select", "include"])?;
        let where_tree = required_object(self.name(), object, "where")?;
        projection_from(&self.entity, object)?;

        self.engine.connection().transaction(|| {
            let snapshot = self.find_first(Json::from(clone_with(where_tree, object)))?;

            let mut params = self.params();
            let conditions =
                compile_where(&self.entity, &Json::Object(where_tree.clone()), &mut params)?;
            if conditions.is_empty() {
                return Err(Error::Validation(ValidationError::new(
                    self.name(),
                    "no usable conditions in 'where'",
                )));
            }
            let sql = format!(
                "DELETE FROM {} WHERE {}",
                self.table(),
                conditions.join(" AND ")
            );
            let affected = self.engine.connection().execute(&sql, params.values())?;

            match snapshot {
                Some(record) if affected > 0 => Ok(record),
                _ => Ok(self.not_found_record()),
            }
        })
    }

    /// Delete every matching row; a structured not-found value when none
    /// matched, a status/count shape otherwise.
    pub fn delete_many(&self, criteria: Json) -> Result<Record> {
        let object = check_options(self.name(), &criteria, &["where"])?;
        let where_tree = required_object(self.name(), object, "where")?;

        let affected = self.engine.connection().transaction(|| {
            let mut params = self.params();
            let conditions =
                compile_where(&self.entity, &Json::Object(where_tree.clone()), &mut params)?;
            if conditions.is_empty() {
                return Err(Error::Validation(ValidationError::new(
                    self.name(),
                    "no usable conditions in 'where'",
                )));
            }
            let sql = format!(
                "DELETE FROM {} WHERE {}",
                self.table(),
                conditions.join(" AND ")
            );
            self.engine.connection().execute(&sql, params.values())
        })?;

        if affected == 0 {
            return Ok(self.not_found_record());
        }
        let mut result = Record::new();
        result.insert("status".to_string(), json!("success"));
        result.insert("message".to_string(), json!("records deleted successfully"));
        result.insert("affectedRows".to_string(), json!(affected));
        Ok(result)
    }

    // ---------------------------------------------------------------
    // upsert

    /// Update the row matching `where` or create it from `create`; both
    /// branches share one transaction scope.
    pub fn upsert(&self, criteria: Json) -> Result<Option<Record>> {
        let object = check_options(
            self.name(),
            &criteria,
            &["where", "create", "update", "select", "include"],
        )?;
        let where_tree = required_object(self.name(), object, "where")?;
        for key in ["create", "update"] {
            if !object.contains_key(key) {
                return Err(Error::Validation(ValidationError::missing_key(
                    self.name(),
                    key,
                )));
            }
        }

        self.engine.connection().transaction(|| {
            let existing = self.find_unique(Json::from(only_where(where_tree)))?;

            if existing.is_some() {
                let mut update = clone_with(where_tree, object);
                update.insert(
                    "data".to_string(),
                    object.get("update").cloned().unwrap_or(Json::Null),
                );
                self.update(Json::Object(update))
            } else {
                let mut create = Map::new();
                create.insert(
                    "data".to_string(),
                    object.get("create").cloned().unwrap_or(Json::Null),
                );
                copy_projection_keys(object, &mut create);
                self.create(Json::Object(create)).map(Some)
            }
        })
    }

    // ---------------------------------------------------------------
    // aggregation

    /// Project aggregate functions over a filtered/ordered/paginated
    /// subquery; returns `{tag: {field: value}}`.
    pub fn aggregate(&self, criteria: Json) -> Result<Record> {
        let object = check_options(
            self.name(),
            &criteria,
            &[
                "_avg", "_count", "_max", "_min", "_sum", "cursor", "orderBy", "skip", "take",
                "where",
            ],
        )?;

        let mut params = self.params();
        let mut conditions = Vec::new();
        if let Some(cursor) = object.get("cursor") {
            self.compile_cursor(cursor, &mut params, &mut conditions)?;
        }
        if let Some(where_tree) = object.get("where") {
            self.check_where_shape(where_tree)?;
            conditions.extend(compile_where(&self.entity, where_tree, &mut params)?);
        }

        let mut subquery = format!("SELECT * FROM {}", self.table());
        if !conditions.is_empty() {
            subquery.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
        }
        subquery.push_str(&self.order_by_clause(object)?);
        if let Some(take) = object.get("take") {
            subquery.push_str(&format!(" LIMIT {}", self.page_bound(take, "take")?));
        }
        if let Some(skip) = object.get("skip") {
            subquery.push_str(&format!(" OFFSET {}", self.page_bound(skip, "skip")?));
        }

        let mut select_parts = Vec::new();
        for (tag, function) in AGGREGATE_TAGS {
            let Some(fields) = object.get(tag) else {
                continue;
            };
            let Some(fields) = fields.as_object() else {
                return Err(Error::Validation(ValidationError::new(
                    self.name(),
                    format!("'{tag}' must map fields to true"),
                )));
            };
            for (field_name, enabled) in fields {
                if !matches!(enabled, Json::Bool(true)) {
                    continue;
                }
                let alias = self.quote(&format!("{field_name}_{tag}"));
                if field_name == "*" {
                    if tag != "_count" {
                        return Err(Error::Validation(ValidationError::new(
                            self.name(),
                            format!("'{tag}' cannot aggregate over '*'"),
                        )));
                    }
                    select_parts.push(format!("COUNT(*) AS {alias}"));
                    continue;
                }
                let Some(field) = self.entity.field(field_name) else {
                    return Err(Error::Validation(ValidationError::unknown_field(
                        self.name(),
                        field_name,
                    )));
                };
                if field.is_relation() {
                    return Err(Error::Validation(ValidationError::new(
                        self.name(),
                        format!("the relation '{field_name}' cannot be aggregated"),
                    )));
                }
                select_parts.push(format!(
                    "{function}({}) AS {alias}",
                    self.quote(field.name)
                ));
            }
        }
        if select_parts.is_empty() {
            return Err(Error::Validation(ValidationError::new(
                self.name(),
                "no valid aggregate function specified",
            )));
        }

        let sql = format!(
            "SELECT {} FROM ({subquery}) AS sub",
            select_parts.join(", ")
        );
        let row = self
            .engine
            .connection()
            .query_one(&sql, params.values())?
            .ok_or_else(|| Error::Query(QueryError::new("aggregate returned no row")))?;

        // Function-tagged columns parse back into {tag: {field: value}}.
        let tagged = Regex::new(r"^(.*)_(_avg|_count|_max|_min|_sum)$")
            .map_err(|e| Error::Serde(e.to_string()))?;
        let mut result = Record::new();
        for (column, value) in row.iter() {
            let Some(captures) = tagged.captures(column) else {
                continue;
            };
            let field = captures[1].to_string();
            let tag = captures[2].to_string();
            if let Some(fields) = result
                .entry(tag)
                .or_insert_with(|| Json::Object(Map::new()))
                .as_object_mut()
            {
                fields.insert(field, value.to_json());
            }
        }
        Ok(result)
    }

    /// Group rows by caller-specified fields and project aggregates over
    /// each group.
    pub fn group_by(&self, criteria: Json) -> Result<Vec<Record>> {
        let object = check_options(self.name(), &criteria, &["by", "aggregates"])?;

        let Some(by) = object.get("by").and_then(Json::as_array) else {
            return Err(Error::Validation(ValidationError::new(
                self.name(),
                "'by' must be an array of field names",
            )));
        };
        if by.is_empty() {
            return Err(Error::Validation(ValidationError::new(
                self.name(),
                "'by' must name at least one field",
            )));
        }
        let mut group_fields = Vec::with_capacity(by.len());
        for field_name in by {
            let Some(name) = field_name.as_str() else {
                return Err(Error::Validation(ValidationError::new(
                    self.name(),
                    "'by' must be an array of field names",
                )));
            };
            let Some(field) = self.entity.field(name) else {
                return Err(Error::Validation(ValidationError::unknown_field(
                    self.name(),
                    name,
                )));
            };
            if field.is_relation() {
                return Err(Error::Validation(ValidationError::new(
                    self.name(),
                    format!("the relation '{name}' cannot be grouped by"),
                )));
            }
            group_fields.push(self.quote(field.name));
        }

        let mut select_parts = group_fields.clone();
        if let Some(aggregates) = object.get("aggregates") {
            let Some(aggregates) = aggregates.as_array() else {
                return Err(Error::Validation(ValidationError::new(
                    self.name(),
                    "'aggregates' must be an array of {function, field, alias}",
                )));
            };
            for descriptor in aggregates {
                select_parts.push(self.aggregate_descriptor(descriptor)?);
            }
        }

        let sql = format!(
            "SELECT {} FROM {} GROUP BY {}",
            select_parts.join(", "),
            self.table(),
            group_fields.join(", ")
        );
        let rows = self.engine.connection().query(&sql, &[])?;
        Ok(rows.iter().map(|row| self.record_from_row(row)).collect())
    }

    fn aggregate_descriptor(&self, descriptor: &Json) -> Result<String> {
        let shape_error = || {
            Error::Validation(ValidationError::new(
                self.name(),
                "every aggregate must be {function, field, alias}",
            ))
        };
        let descriptor = descriptor.as_object().ok_or_else(shape_error)?;
        let function = descriptor
            .get("function")
            .and_then(Json::as_str)
            .ok_or_else(shape_error)?;
        let field_name = descriptor
            .get("field")
            .and_then(Json::as_str)
            .ok_or_else(shape_error)?;
        let alias = descriptor
            .get("alias")
            .and_then(Json::as_str)
            .ok_or_else(shape_error)?;

        let function = function.to_uppercase();
        if !["COUNT", "AVG", "MAX", "MIN", "SUM"].contains(&function.as_str()) {
            return Err(Error::Validation(ValidationError::new(
                self.name(),
                format!("unsupported aggregate function '{function}'"),
            )));
        }
        if alias.is_empty()
            || !alias
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            || alias.chars().next().is_some_and(|c| c.is_ascii_digit())
        {
            return Err(Error::Validation(ValidationError::new(
                self.name(),
                format!("invalid aggregate alias '{alias}'"),
            )));
        }

        let column = if field_name == "*" {
            if function != "COUNT" {
                return Err(Error::Validation(ValidationError::new(
                    self.name(),
                    format!("'{function}' cannot aggregate over '*'"),
                )));
            }
            "*".to_string()
        } else {
            let Some(field) = self.entity.field(field_name) else {
                return Err(Error::Validation(ValidationError::unknown_field(
                    self.name(),
                    field_name,
                )));
            };
            if field.is_relation() {
                return Err(Error::Validation(ValidationError::new(
                    self.name(),
                    format!("the relation '{field_name}' cannot be aggregated"),
                )));
            }
            self.quote(field.name)
        };
        Ok(format!("{function}({column}) AS {}", self.quote(alias)))
    }

    /// Count matching rows: a plain total, or one count per selected field.
    pub fn count(&self, criteria: Json) -> Result<CountResult> {
        let is_empty = criteria.is_null()
            || criteria.as_object().map(Map::is_empty).unwrap_or(false);
        if is_empty {
            let sql = format!("SELECT COUNT(*) AS {} FROM {}", self.quote("total"), self.table());
            return Ok(CountResult::Total(self.scalar_count(&sql, &[])?));
        }

        let object = check_options(
            self.name(),
            &criteria,
            &["cursor", "orderBy", "select", "skip", "take", "where"],
        )?;

        let mut params = self.params();
        let mut conditions = Vec::new();
        if let Some(cursor) = object.get("cursor") {
            self.compile_cursor(cursor, &mut params, &mut conditions)?;
        }
        if let Some(where_tree) = object.get("where") {
            self.check_where_shape(where_tree)?;
            conditions.extend(compile_where(&self.entity, where_tree, &mut params)?);
        }

        let counted: Vec<&'static str> = match object.get("select") {
            None => Vec::new(),
            Some(select) => {
                let Some(tree) = select.as_object() else {
                    return Err(Error::Validation(ValidationError::new(
                        self.name(),
                        "'select' must be an object",
                    )));
                };
                let mut fields = Vec::with_capacity(tree.len());
                for (key, enabled) in tree {
                    if !matches!(enabled, Json::Bool(true)) {
                        return Err(Error::Validation(ValidationError::new(
                            self.name(),
                            format!("the field '{key}' must be selected with true"),
                        )));
                    }
                    let Some(field) = self.entity.field(key) else {
                        return Err(Error::Validation(ValidationError::unknown_field(
                            self.name(),
                            key,
                        )));
                    };
                    if field.is_relation() {
                        return Err(Error::Validation(ValidationError::new(
                            self.name(),
                            format!("the relation '{key}' cannot be counted"),
                        )));
                    }
                    fields.push(field.name);
                }
                fields
            }
        };

        let select_clause = if counted.is_empty() {
            format!("COUNT(*) AS {}", self.quote("total"))
        } else {
            counted
                .iter()
                .map(|name| format!("COUNT({}) AS {}", self.quote(name), self.quote(name)))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = format!("SELECT {select_clause} FROM {}", self.table());
        if !conditions.is_empty() {
            sql.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
        }
        sql.push_str(&self.order_by_clause(object)?);
        if let Some(take) = object.get("take") {
            sql.push_str(&format!(" LIMIT {}", self.page_bound(take, "take")?));
        }
        if let Some(skip) = object.get("skip") {
            sql.push_str(&format!(" OFFSET {}", self.page_bound(skip, "skip")?));
        }

        if counted.is_empty() {
            return Ok(CountResult::Total(self.scalar_count(&sql, params.values())?));
        }

        let row = self
            .engine
            .connection()
            .query_one(&sql, params.values())?
            .ok_or_else(|| Error::Query(QueryError::new("count returned no row")))?;
        let mut result = Record::new();
        for name in counted {
            let count = row
                .get_by_name(name)
                .and_then(Value::as_i64)
                .unwrap_or(0);
            result.insert(name.to_string(), json!(count));
        }
        Ok(CountResult::Fields(result))
    }

    fn scalar_count(&self, sql: &str, params: &[Value]) -> Result<i64> {
        let row = self
            .engine
            .connection()
            .query_one(sql, params)?
            .ok_or_else(|| Error::Query(QueryError::new("count returned no row")))?;
        row.get_named::<i64>("total")
    }

    // ---------------------------------------------------------------
    // shared helpers

    /// Build the insert column/placeholder/value triple for `create`.
    #[allow(clippy::type_complexity)]
    fn insert_tuple(
        &self,
        data: &Map<String, Json>,
    ) -> Result<(Vec<String>, Vec<String>, SqlParams, Option<Value>)> {
        let mut columns = Vec::new();
        let mut placeholders = Vec::new();
        let mut params = self.params();
        let mut bound_pk = None;

        for field in self.entity.scalar_fields() {
            let provided = data.get(field.name);
            let value = if field.updated_at {
                Some(Value::Text(defaults::now()))
            } else if let Some(default) = &field.default {
                match provided {
                    Some(json) if !json.is_null() => Some(coerce(field, json)?),
                    _ => Some(defaults::generate(default)),
                }
            } else {
                match provided {
                    Some(json) => Some(coerce(field, json)?),
                    None => None,
                }
            };

            if let Some(value) = value {
                if field.primary_key {
                    bound_pk = Some(value.clone());
                }
                columns.push(self.quote(field.name));
                placeholders.push(params.push(value));
            }
        }

        if columns.is_empty() {
            return Err(Error::Validation(ValidationError::new(
                self.name(),
                "'data' binds no stored fields",
            )));
        }
        Ok((columns, placeholders, params, bound_pk))
    }

    /// Build SET parts for update operations. Only fields present in
    /// `data` appear; explicit nulls on nullable fields emit `= NULL`;
    /// `UpdatedAt` fields are always stamped.
    fn set_clause(&self, data: &Map<String, Json>) -> Result<(Vec<SetPart>, SetValues)> {
        let mut parts = Vec::new();
        let mut values = Vec::new();

        for field in self.entity.scalar_fields() {
            if field.updated_at {
                parts.push(SetPart::Bound(self.quote(field.name)));
                values.push(Value::Text(defaults::now()));
                continue;
            }
            let Some(json) = data.get(field.name) else {
                continue;
            };
            if json.is_null() && field.nullable {
                parts.push(SetPart::Null(self.quote(field.name)));
            } else {
                parts.push(SetPart::Bound(self.quote(field.name)));
                values.push(coerce(field, json)?);
            }
        }
        Ok((parts, SetValues(values)))
    }

    fn compile_cursor(
        &self,
        cursor: &Json,
        params: &mut SqlParams,
        conditions: &mut Vec<String>,
    ) -> Result<()> {
        let Some(tree) = cursor.as_object() else {
            return Err(Error::Validation(ValidationError::new(
                self.name(),
                "'cursor' must be an object",
            )));
        };
        for (field_name, value) in tree {
            let Some(field) = self.entity.field(field_name) else {
                return Err(Error::Validation(ValidationError::unknown_field(
                    self.name(),
                    field_name,
                )));
            };
            if field.is_relation() {
                return Err(Error::Validation(ValidationError::new(
                    self.name(),
                    format!("the relation '{field_name}' cannot be a cursor"),
                )));
            }
            let placeholder = params.push(coerce(field, value)?);
            conditions.push(format!("{} >= {placeholder}", self.quote(field.name)));
        }
        Ok(())
    }

    fn check_where_shape(&self, where_tree: &Json) -> Result<()> {
        match where_tree.as_object() {
            Some(tree) if !tree.is_empty() => Ok(()),
            _ => Err(Error::Validation(ValidationError::new(
                self.name(),
                "'where' must be a non-empty object",
            ))),
        }
    }

    fn order_by_clause(&self, object: &Map<String, Json>) -> Result<String> {
        let Some(order_by) = object.get("orderBy") else {
            return Ok(String::new());
        };
        let mut items = Vec::new();
        match order_by {
            Json::String(_) | Json::Object(_) => self.order_by_item(order_by, &mut items)?,
            Json::Array(entries) => {
                for entry in entries {
                    self.order_by_item(entry, &mut items)?;
                }
            }
            _ => {
                return Err(Error::Validation(ValidationError::new(
                    self.name(),
                    "'orderBy' must be a field name, a field-direction map, or an array of them",
                )));
            }
        }
        if items.is_empty() {
            return Ok(String::new());
        }
        Ok(format!(" ORDER BY {}", items.join(", ")))
    }

    fn order_by_item(&self, entry: &Json, items: &mut Vec<String>) -> Result<()> {
        match entry {
            Json::String(field_name) => {
                items.push(self.order_by_field(field_name, "ASC")?);
                Ok(())
            }
            Json::Object(tree) => {
                for (field_name, direction) in tree {
                    let direction = match direction.as_str() {
                        Some(d) if d.eq_ignore_ascii_case("asc") => "ASC",
                        Some(d) if d.eq_ignore_ascii_case("desc") => "DESC",
                        _ => {
                            return Err(Error::Validation(ValidationError::new(
                                self.name(),
                                format!("ordering on '{field_name}' must be 'asc' or 'desc'"),
                            )));
                        }
                    };
                    items.push(self.order_by_field(field_name, direction)?);
                }
                Ok(())
            }
            _ => Err(Error::Validation(ValidationError::new(
                self.name(),
                "'orderBy' entries must be field names or field-direction maps",
            ))),
        }
    }

    fn order_by_field(&self, field_name: &str, direction: &str) -> Result<String> {
        let Some(field) = self.entity.field(field_name) else {
            return Err(Error::Validation(ValidationError::unknown_field(
                self.name(),
                field_name,
            )));
        };
        if field.is_relation() {
            return Err(Error::Validation(ValidationError::new(
                self.name(),
                format!("the relation '{field_name}' cannot be ordered by"),
            )));
        }
        Ok(format!("{} {direction}", self.quote(field.name)))
    }

    fn page_bound(&self, value: &Json, key: &str) -> Result<u64> {
        value
            .as_u64()
            .ok_or_else(|| {
                Error::Validation(ValidationError::new(
                    self.name(),
                    format!("'{key}' must be a non-negative integer"),
                ))
            })
    }

    fn select_clause(&self, projection: &Projection) -> String {
        if projection.primary_fields.is_empty() {
            "*".to_string()
        } else {
            projection
                .primary_fields
                .iter()
                .map(|name| self.quote(name))
                .collect::<Vec<_>>()
                .join(", ")
        }
    }

    fn record_from_row(&self, row: &Row) -> Record {
        let mut record = Record::new();
        for (column, value) in row.iter() {
            let json = match self.entity.field(column) {
                Some(field) if !field.is_relation() => decode(field, value),
                _ => value.to_json(),
            };
            record.insert(column.to_string(), json);
        }
        record
    }

    fn strip_implicit_key(&self, records: &mut [Record], projection: &Projection) {
        if projection.implicit_primary_key {
            let pk = self.entity.primary_key().name;
            for record in records.iter_mut() {
                record.remove(pk);
            }
        }
    }

    fn not_found_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("entity".to_string(), json!(self.name()));
        record.insert("cause".to_string(), json!("not found"));
        record
    }
}

/// One SET item: either `col = <placeholder>` or a literal `col = NULL`.
enum SetPart {
    Bound(String),
    Null(String),
}

/// SET values captured before the transaction opens, so validation errors
/// surface without touching storage.
struct SetValues(Vec<Value>);

impl SetValues {
    fn clone_into_params(&self, mut params: SqlParams) -> SqlParams {
        for value in &self.0 {
            params.push(value.clone());
        }
        params
    }
}

/// Render SET parts against placeholders in the same order `set_clause`
/// captured their values.
fn render_set_parts(parts: &[SetPart], dialect: querybind_core::Dialect) -> String {
    let mut index = 0;
    let rendered: Vec<String> = parts
        .iter()
        .map(|part| match part {
            SetPart::Bound(column) => {
                index += 1;
                format!("{column} = {}", dialect.placeholder(index))
            }
            SetPart::Null(column) => format!("{column} = NULL"),
        })
        .collect();
    rendered.join(", ")
}

fn copy_projection_keys(source: &Map<String, Json>, target: &mut Map<String, Json>) {
    for key in ["select", "include"] {
        if let Some(value) = source.get(key) {
            target.insert(key.to_string(), value.clone());
        }
    }
}

fn clone_with(where_tree: &Map<String, Json>, source: &Map<String, Json>) -> Map<String, Json> {
    let mut criteria = Map::new();
    criteria.insert("where".to_string(), Json::Object(where_tree.clone()));
    copy_projection_keys(source, &mut criteria);
    criteria
}

fn only_where(where_tree: &Map<String, Json>) -> Map<String, Json> {
    let mut criteria = Map::new();
    criteria.insert("where".to_string(), Json::Object(where_tree.clone()));
    criteria
}
