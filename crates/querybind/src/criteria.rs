//! Criteria shape validation: per-operation option allow-lists and
//! `select`/`include` projection trees.
//!
//! Everything here runs before any SQL is built, so shape violations never
//! touch storage.

use querybind_core::{EntityDescriptor, Error, Result, ValidationError};
use serde_json::{Map, Value as Json};

/// Nested projection carried into relation hydration.
#[derive(Debug, Clone, PartialEq)]
pub enum NestedProjection {
    /// `true` or `{}`: select everything on the target
    All,
    /// `{select: {...}}`: validated recursively against the target entity
    Select(Map<String, Json>),
}

/// A validated projection for one entity.
#[derive(Debug, Clone, Default)]
pub struct Projection {
    /// Scalar columns to fetch; empty means every stored column
    pub primary_fields: Vec<&'static str>,
    /// Relations to hydrate, with their nested projections
    pub related: Vec<(&'static str, NestedProjection)>,
    /// The primary key was added only to drive hydration and must be
    /// stripped from the result afterwards
    pub implicit_primary_key: bool,
}

impl Projection {
    pub fn selects_relations(&self) -> bool {
        !self.related.is_empty()
    }
}

/// Reject any top-level key outside the operation's allow-list, naming the
/// offender. The criteria value itself must be a JSON object.
pub fn check_options<'a>(
    entity: &str,
    criteria: &'a Json,
    allowed: &[&str],
) -> Result<&'a Map<String, Json>> {
    let Some(object) = criteria.as_object() else {
        return Err(Error::Validation(ValidationError::new(
            entity,
            "criteria must be a JSON object",
        )));
    };
    for key in object.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(Error::Validation(ValidationError::unknown_option(
                entity, key, allowed,
            )));
        }
    }
    Ok(object)
}

/// Fetch a required top-level key that must map to an object.
pub fn required_object<'a>(
    entity: &str,
    criteria: &'a Map<String, Json>,
    key: &str,
) -> Result<&'a Map<String, Json>> {
    let Some(value) = criteria.get(key) else {
        return Err(Error::Validation(ValidationError::missing_key(entity, key)));
    };
    value.as_object().ok_or_else(|| {
        Error::Validation(ValidationError::new(
            entity,
            format!("'{key}' must be an object"),
        ))
    })
}

/// Build and validate the projection for one operation's criteria.
///
/// Enforces `select` XOR `include`; validates every key against the entity
/// schema; excludes relation-projected fields from the plain column list;
/// and implicitly adds the primary key when a relation is selected without
/// it (hydration needs the key; it is stripped again afterwards).
pub fn projection_from(
    entity: &EntityDescriptor,
    criteria: &Map<String, Json>,
) -> Result<Projection> {
    let select = criteria.get("select");
    let include = criteria.get("include");
    if select.is_some() && include.is_some() {
        return Err(Error::Validation(ValidationError::exclusive_keys(
            entity.name(),
            "select",
            "include",
        )));
    }

    if let Some(select) = select {
        validate_select(entity, select)
    } else if let Some(include) = include {
        validate_include(entity, include)
    } else {
        Ok(Projection::default())
    }
}

fn validate_select(entity: &EntityDescriptor, select: &Json) -> Result<Projection> {
    let Some(tree) = select.as_object() else {
        return Err(Error::Validation(ValidationError::new(
            entity.name(),
            "'select' must be an object",
        )));
    };

    let mut projection = Projection::default();
    for (key, value) in tree {
        let Some(field) = entity.field(key) else {
            return Err(Error::Validation(ValidationError::unknown_field(
                entity.name(),
                key,
            )));
        };

        if field.is_relation() {
            projection
                .related
                .push((field.name, nested_projection(entity, key, value)?));
        } else {
            match value {
                Json::Bool(true) => projection.primary_fields.push(field.name),
                _ => {
                    return Err(Error::Validation(ValidationError::new(
                        entity.name(),
                        format!("the field '{key}' must be selected with true"),
                    )));
                }
            }
        }
    }

    // Hydration is keyed off the primary key; add it when a relation is
    // projected without it and strip it from the result later.
    let pk = entity.primary_key().name;
    if projection.selects_relations() && !projection.primary_fields.contains(&pk) {
        projection.primary_fields.push(pk);
        projection.implicit_primary_key = true;
    }

    Ok(projection)
}

fn validate_include(entity: &EntityDescriptor, include: &Json) -> Result<Projection> {
    let Some(tree) = include.as_object() else {
        return Err(Error::Validation(ValidationError::new(
            entity.name(),
            "'include' must be an object",
        )));
    };

    let mut projection = Projection::default();
    for (key, value) in tree {
        let Some(field) = entity.field(key) else {
            return Err(Error::Validation(ValidationError::unknown_field(
                entity.name(),
                key,
            )));
        };
        if !field.is_relation() {
            return Err(Error::Validation(ValidationError::new(
                entity.name(),
                format!("the field '{key}' is not a relation and cannot be included"),
            )));
        }
        projection
            .related
            .push((field.name, nested_projection(entity, key, value)?));
    }
    Ok(projection)
}

/// A relation key maps to `true`, `{}` (implicit all), or `{select: {...}}`
/// validated recursively against the target entity - by the target's own
/// pipeline when hydration runs.
fn nested_projection(
    entity: &EntityDescriptor,
    relation: &str,
    value: &Json,
) -> Result<NestedProjection> {
    match value {
        Json::Bool(true) => Ok(NestedProjection::All),
        Json::Object(tree) if tree.is_empty() => Ok(NestedProjection::All),
        Json::Object(tree) => {
            for key in tree.keys() {
                if key != "select" {
                    return Err(Error::Validation(ValidationError::new(
                        entity.name(),
                        format!("the relation '{relation}' accepts only a 'select' projection"),
                    )));
                }
            }
            let nested = tree.get("select").and_then(Json::as_object).ok_or_else(|| {
                Error::Validation(ValidationError::new(
                    entity.name(),
                    format!("the 'select' of relation '{relation}' must be an object"),
                ))
            })?;
            Ok(NestedProjection::Select(nested.clone()))
        }
        _ => Err(Error::Validation(ValidationError::new(
            entity.name(),
            format!(
                "the relation '{relation}' must be projected with true, {{}}, or {{select: ...}}"
            ),
        ))),
    }
}
