//! Relation resolution: read-side hydration and the write-side connect
//! protocol.
//!
//! Both sides route through the schema registry and the target entity's own
//! client, so nested projections and payloads get the target's full
//! validation/compilation pipeline.

use crate::coerce::json_to_value;
use crate::conditions::SqlParams;
use crate::criteria::{NestedProjection, Projection};
use crate::{Engine, Record};
use querybind_core::error::QueryError;
use querybind_core::{
    EntityDescriptor, Error, RelationDescriptor, Result, ValidationError, Value,
};
use serde_json::{Map, Value as Json};

/// Which write operation is driving relation resolution; `create` forbids
/// `disconnect`/`update` payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteContext {
    Create,
    Update,
}

const CREATE_TYPES: &[&str] = &["create", "createMany", "connect", "connectOrCreate"];
const UPDATE_TYPES: &[&str] = &[
    "create",
    "createMany",
    "connect",
    "connectOrCreate",
    "disconnect",
    "update",
];

/// Hydrate projected relations onto a batch of parent records.
///
/// When the foreign key column was not part of the projection it is
/// fetched by primary key, attached transiently, and stripped again after
/// the related records are in place. A null foreign key hydrates to JSON
/// `null` rather than an empty query.
pub fn hydrate(
    engine: &Engine,
    entity: &EntityDescriptor,
    records: &mut [Record],
    projection: &Projection,
) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    for (relation_name, nested) in &projection.related {
        let relation = entity.relation(relation_name).ok_or_else(|| {
            Error::Validation(ValidationError::unknown_field(entity.name(), relation_name))
        })?;
        let (local, referenced) = single_field_pair(entity, relation)?;

        let attached = attach_foreign_keys(engine, entity, local, records)?;

        for record in records.iter_mut() {
            let fk = record.get(local).cloned().unwrap_or(Json::Null);
            if fk.is_null() {
                record.insert(relation_name.to_string(), Json::Null);
                continue;
            }

            let mut criteria = Map::new();
            let mut where_tree = Map::new();
            where_tree.insert(referenced.to_string(), fk);
            criteria.insert("where".to_string(), Json::Object(where_tree));
            if let NestedProjection::Select(select) = nested {
                criteria.insert("select".to_string(), Json::Object(select.clone()));
            }

            let related = engine
                .entity(relation.target_entity)?
                .find_many(Json::Object(criteria))?;
            record.insert(
                relation_name.to_string(),
                Json::Array(related.into_iter().map(Json::Object).collect()),
            );
        }

        if attached {
            for record in records.iter_mut() {
                record.remove(local);
            }
        }
    }
    Ok(())
}

/// Fetch foreign-key values by primary key when the projection left the FK
/// column out. Returns whether keys were attached (and must be stripped).
fn attach_foreign_keys(
    engine: &Engine,
    entity: &EntityDescriptor,
    local: &str,
    records: &mut [Record],
) -> Result<bool> {
    if records.iter().any(|r| r.contains_key(local)) {
        return Ok(false);
    }

    let pk = entity.primary_key();
    let dialect = engine.connection().dialect();
    let mut params = SqlParams::new(dialect);
    let placeholders: Vec<String> = records
        .iter()
        .map(|record| {
            params.push(json_to_value(record.get(pk.name).unwrap_or(&Json::Null)))
        })
        .collect();

    let sql = format!(
        "SELECT {}, {} FROM {} WHERE {} IN ({})",
        dialect.quote(pk.name),
        dialect.quote(local),
        dialect.quote(entity.table()),
        dialect.quote(pk.name),
        placeholders.join(", ")
    );
    let rows = engine.connection().query(&sql, params.values())?;

    let local_field = entity.field(local).ok_or_else(|| {
        Error::Validation(ValidationError::unknown_field(entity.name(), local))
    })?;
    for record in records.iter_mut() {
        let key = record.get(pk.name).cloned().unwrap_or(Json::Null);
        let fk = rows
            .iter()
            .find(|row| {
                row.get_by_name(pk.name)
                    .map(|v| crate::coerce::decode(pk, v) == key)
                    .unwrap_or(false)
            })
            .and_then(|row| row.get_by_name(local))
            .map(|v| crate::coerce::decode(local_field, v))
            .unwrap_or(Json::Null);
        record.insert(local.to_string(), fk);
    }
    Ok(true)
}

/// Validate a relation-mutation payload's shape without touching storage:
/// object-ness, the per-context connect-type allow-list, and the mutually
/// exclusive combinations. Returns the payload map.
pub fn validate_payload<'p>(
    owner: &EntityDescriptor,
    relation: &RelationDescriptor,
    payload: &'p Json,
    context: WriteContext,
) -> Result<&'p Map<String, Json>> {
    let Some(object) = payload.as_object() else {
        return Err(Error::Validation(ValidationError::new(
            owner.name(),
            format!("the relation '{}' requires an object payload", relation.name),
        )));
    };

    let allowed = match context {
        WriteContext::Create => CREATE_TYPES,
        WriteContext::Update => UPDATE_TYPES,
    };
    for key in object.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(Error::Validation(ValidationError::new(
                owner.name(),
                format!(
                    "the connect type '{key}' is not supported for relation '{}' here; \
                     use one of: {}",
                    relation.name,
                    allowed.join(", ")
                ),
            )));
        }
    }
    for (a, b) in [
        ("create", "connectOrCreate"),
        ("connect", "connectOrCreate"),
        ("connect", "disconnect"),
    ] {
        if object.contains_key(a) && object.contains_key(b) {
            return Err(Error::Validation(ValidationError::exclusive_keys(
                owner.name(),
                a,
                b,
            )));
        }
    }
    if object.is_empty() {
        return Err(Error::Validation(ValidationError::new(
            owner.name(),
            format!(
                "the relation '{}' payload must use one of: {}",
                relation.name,
                allowed.join(", ")
            ),
        )));
    }
    Ok(object)
}

/// Execute one relation-mutation payload against the owner row identified
/// by `owner_pk`.
pub fn resolve_write(
    engine: &Engine,
    owner: &EntityDescriptor,
    relation: &RelationDescriptor,
    payload: &Json,
    owner_pk: &Value,
    context: WriteContext,
) -> Result<()> {
    let object = validate_payload(owner, relation, payload, context)?;
    let allowed = match context {
        WriteContext::Create => CREATE_TYPES,
        WriteContext::Update => UPDATE_TYPES,
    };

    let Some((connect_type, op_payload)) = allowed
        .iter()
        .find_map(|ty| object.get(*ty).map(|payload| (*ty, payload)))
    else {
        return Err(Error::Validation(ValidationError::new(
            owner.name(),
            format!(
                "the relation '{}' payload must use one of: {}",
                relation.name,
                allowed.join(", ")
            ),
        )));
    };

    let (_, referenced) = single_field_pair(owner, relation)?;
    match connect_type {
        "create" => {
            let Some(_) = op_payload.as_object() else {
                return Err(invalid_shape(owner, relation, "create", "a single field map"));
            };
            let created = engine
                .entity(relation.target_entity)?
                .create(Json::from(single_key_map("data", op_payload.clone())))?;
            let target_key = created.get(referenced).cloned().unwrap_or(Json::Null);
            set_foreign_key(engine, owner, relation, owner_pk, json_to_value(&target_key))
        }
        "createMany" => Err(Error::Relation(
            querybind_core::RelationError::invalid_payload(
                relation.name,
                format!(
                    "the relation '{}' does not support 'createMany'; use 'create' instead",
                    relation.name
                ),
            ),
        )),
        "connect" => {
            let Some(_) = op_payload.as_object() else {
                return Err(invalid_shape(owner, relation, "connect", "a unique field map"));
            };
            let target = engine
                .entity(relation.target_entity)?
                .find_unique(Json::from(single_key_map("where", op_payload.clone())))?;
            let Some(target) = target else {
                return Err(Error::Relation(
                    querybind_core::RelationError::target_not_found(relation.name),
                ));
            };
            let target_key = target.get(referenced).cloned().unwrap_or(Json::Null);
            set_foreign_key(engine, owner, relation, owner_pk, json_to_value(&target_key))
        }
        "connectOrCreate" => {
            let Some(shape) = op_payload.as_object() else {
                return Err(invalid_shape(
                    owner,
                    relation,
                    "connectOrCreate",
                    "an object with 'where' and 'create'",
                ));
            };
            let (Some(where_tree), Some(create_tree)) =
                (shape.get("where"), shape.get("create"))
            else {
                return Err(Error::Validation(ValidationError::new(
                    owner.name(),
                    format!(
                        "'connectOrCreate' on relation '{}' requires both 'where' and 'create'",
                        relation.name
                    ),
                )));
            };

            let target_client = engine.entity(relation.target_entity)?;
            let existing =
                target_client.find_unique(Json::from(single_key_map("where", where_tree.clone())))?;
            let target = match existing {
                Some(record) => record,
                None => {
                    target_client.create(Json::from(single_key_map("data", create_tree.clone())))?
                }
            };
            let target_key = target.get(referenced).cloned().unwrap_or(Json::Null);
            set_foreign_key(engine, owner, relation, owner_pk, json_to_value(&target_key))
        }
        "disconnect" => match op_payload {
            Json::Bool(true) => set_foreign_key(engine, owner, relation, owner_pk, Value::Null),
            Json::Bool(false) => Ok(()),
            Json::Object(_) => {
                let target = engine
                    .entity(relation.target_entity)?
                    .find_unique(Json::from(single_key_map("where", op_payload.clone())))?;
                if target.is_some() {
                    set_foreign_key(engine, owner, relation, owner_pk, Value::Null)
                } else {
                    Ok(())
                }
            }
            _ => Err(invalid_shape(
                owner,
                relation,
                "disconnect",
                "true or a unique field map",
            )),
        },
        "update" => {
            let Some(_) = op_payload.as_object() else {
                return Err(invalid_shape(owner, relation, "update", "a field map"));
            };
            let (local, _) = single_field_pair(owner, relation)?;

            // Locate the currently connected target through the owner's FK.
            let pk = owner.primary_key();
            let mut where_tree = Map::new();
            where_tree.insert(pk.name.to_string(), json_value(owner_pk));
            let owner_row = engine
                .entity(owner.name())?
                .find_unique(Json::from(single_key_map("where", Json::Object(where_tree))))?;
            let fk = owner_row
                .as_ref()
                .and_then(|row| row.get(local))
                .cloned()
                .unwrap_or(Json::Null);
            if fk.is_null() {
                return Err(Error::Relation(
                    querybind_core::RelationError::target_not_found(relation.name),
                ));
            }

            let mut criteria = Map::new();
            let mut target_where = Map::new();
            target_where.insert(referenced.to_string(), fk);
            criteria.insert("where".to_string(), Json::Object(target_where));
            criteria.insert("data".to_string(), op_payload.clone());
            engine
                .entity(relation.target_entity)?
                .update(Json::Object(criteria))?;
            Ok(())
        }
        _ => unreachable!("connect type filtered against the allow-list"),
    }
}

/// UPDATE the owner's FK column directly; the value is already resolved.
fn set_foreign_key(
    engine: &Engine,
    owner: &EntityDescriptor,
    relation: &RelationDescriptor,
    owner_pk: &Value,
    value: Value,
) -> Result<()> {
    let (local, _) = single_field_pair(owner, relation)?;
    let dialect = engine.connection().dialect();
    let pk = owner.primary_key();

    let mut params = SqlParams::new(dialect);
    let value_placeholder = params.push(value);
    let pk_placeholder = params.push(owner_pk.clone());
    let sql = format!(
        "UPDATE {} SET {} = {} WHERE {} = {}",
        dialect.quote(owner.table()),
        dialect.quote(local),
        value_placeholder,
        dialect.quote(pk.name),
        pk_placeholder
    );
    let affected = engine.connection().execute(&sql, params.values())?;
    if affected == 0 {
        return Err(Error::Query(QueryError::new(format!(
            "no owner row found while connecting relation '{}'",
            relation.name
        ))));
    }
    Ok(())
}

fn single_field_pair<'r>(
    entity: &EntityDescriptor,
    relation: &'r RelationDescriptor,
) -> Result<(&'r str, &'r str)> {
    match (relation.local_field(), relation.referenced_field()) {
        (Some(local), Some(referenced)) => Ok((local, referenced)),
        _ => Err(Error::Validation(ValidationError::new(
            entity.name(),
            format!(
                "the relation '{}' must pair exactly one local field with one referenced field",
                relation.name
            ),
        ))),
    }
}

fn invalid_shape(
    owner: &EntityDescriptor,
    relation: &RelationDescriptor,
    connect_type: &str,
    expected: &str,
) -> Error {
    Error::Validation(ValidationError::new(
        owner.name(),
        format!(
            "'{connect_type}' on relation '{}' expects {expected}",
            relation.name
        ),
    ))
}

fn single_key_map(key: &str, value: Json) -> Map<String, Json> {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}

fn json_value(value: &Value) -> Json {
    value.to_json()
}
