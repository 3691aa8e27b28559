//! Condition compiler: nested boolean criteria trees to parameterized SQL
//! predicates.
//!
//! Values are always bound through placeholders, never interpolated into
//! the statement text; identifiers are quoted per dialect.

use crate::coerce::coerce;
use querybind_core::{
    Dialect, EntityDescriptor, Error, FieldDescriptor, Result, ValidationError, Value,
};
use serde_json::Value as Json;

/// Accumulates bound values and hands out dialect-correct placeholders.
pub struct SqlParams {
    dialect: Dialect,
    values: Vec<Value>,
}

impl SqlParams {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            values: Vec::new(),
        }
    }

    /// Bind a value, returning its placeholder text.
    pub fn push(&mut self, value: Value) -> String {
        self.values.push(value);
        self.dialect.placeholder(self.values.len())
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Compile a where-tree into conjunction-ready SQL fragments.
///
/// The caller joins the returned fragments with ` AND `.
pub fn compile_where(
    entity: &EntityDescriptor,
    tree: &Json,
    params: &mut SqlParams,
) -> Result<Vec<String>> {
    let Some(object) = tree.as_object() else {
        return Err(Error::Validation(ValidationError::new(
            entity.name(),
            "'where' must be an object",
        )));
    };

    let mut fragments = Vec::new();
    for (key, value) in object {
        match key.as_str() {
            "AND" | "OR" => {
                let children = logical_children(entity, key, value)?;
                let mut compiled = Vec::new();
                for child in children {
                    let inner = compile_where(entity, child, params)?;
                    if !inner.is_empty() {
                        compiled.push(inner.join(" AND "));
                    }
                }
                if !compiled.is_empty() {
                    fragments.push(format!("({})", compiled.join(&format!(" {key} "))));
                }
            }
            "NOT" => {
                if !value.is_object() {
                    return Err(Error::Validation(ValidationError::new(
                        entity.name(),
                        "'NOT' must be followed by an object of conditions",
                    )));
                }
                let inner = compile_where(entity, value, params)?;
                if !inner.is_empty() {
                    fragments.push(format!("NOT ({})", inner.join(" AND ")));
                }
            }
            field => {
                compile_field(entity, field, value, params, &mut fragments)?;
            }
        }
    }
    Ok(fragments)
}

/// `AND`/`OR` take an array of child trees; a bare object is treated as a
/// single child.
fn logical_children<'a>(
    entity: &EntityDescriptor,
    operator: &str,
    value: &'a Json,
) -> Result<Vec<&'a Json>> {
    match value {
        Json::Array(children) => Ok(children.iter().collect()),
        Json::Object(_) => Ok(vec![value]),
        _ => Err(Error::Validation(ValidationError::new(
            entity.name(),
            format!("'{operator}' must be followed by an array of conditions"),
        ))),
    }
}

fn compile_field(
    entity: &EntityDescriptor,
    field_name: &str,
    condition: &Json,
    params: &mut SqlParams,
    fragments: &mut Vec<String>,
) -> Result<()> {
    let Some(field) = entity.field(field_name) else {
        return Err(Error::Validation(ValidationError::unknown_field(
            entity.name(),
            field_name,
        )));
    };
    if field.is_relation() {
        return Err(Error::Validation(ValidationError::new(
            entity.name(),
            format!("the relation '{field_name}' cannot appear in a where condition"),
        )));
    }

    let column = params.dialect().quote(field.name);
    match condition {
        Json::Object(operators) => {
            for (operator, operand) in operators {
                fragments.push(compile_operator(
                    entity, field, &column, operator, operand, params,
                )?);
            }
            Ok(())
        }
        Json::Null => {
            fragments.push(format!("{column} IS NULL"));
            Ok(())
        }
        scalar => {
            let placeholder = params.push(coerce(field, scalar)?);
            fragments.push(format!("{column} = {placeholder}"));
            Ok(())
        }
    }
}

fn compile_operator(
    entity: &EntityDescriptor,
    field: &FieldDescriptor,
    column: &str,
    operator: &str,
    operand: &Json,
    params: &mut SqlParams,
) -> Result<String> {
    match operator {
        "equals" => {
            let placeholder = params.push(coerce(field, operand)?);
            Ok(format!("{column} = {placeholder}"))
        }
        "not" => {
            let placeholder = params.push(coerce(field, operand)?);
            Ok(format!("{column} != {placeholder}"))
        }
        "contains" | "startsWith" | "endsWith" => {
            let needle = pattern_operand(entity, operator, operand)?;
            let pattern = match operator {
                "contains" => format!("%{needle}%"),
                "startsWith" => format!("{needle}%"),
                _ => format!("%{needle}"),
            };
            // Case-insensitive match where the dialect has one; plain LIKE
            // elsewhere.
            let like = if operator == "contains" {
                params.dialect().contains_operator()
            } else {
                "LIKE"
            };
            let placeholder = params.push(Value::Text(pattern));
            Ok(format!("{column} {like} {placeholder}"))
        }
        "gt" | "gte" | "lt" | "lte" => {
            let comparison = match operator {
                "gt" => ">",
                "gte" => ">=",
                "lt" => "<",
                _ => "<=",
            };
            let placeholder = params.push(coerce(field, operand)?);
            Ok(format!("{column} {comparison} {placeholder}"))
        }
        "in" | "notIn" => {
            let Some(elements) = operand.as_array() else {
                return Err(Error::Validation(ValidationError::new(
                    entity.name(),
                    format!("'{operator}' requires an array of values"),
                )));
            };
            let membership = if operator == "in" { "IN" } else { "NOT IN" };
            if elements.is_empty() {
                // Empty membership can never match (or never exclude).
                return Ok(if operator == "in" { "1 = 0" } else { "1 = 1" }.to_string());
            }
            let placeholders: Vec<String> = elements
                .iter()
                .map(|element| Ok(params.push(coerce(field, element)?)))
                .collect::<Result<_>>()?;
            Ok(format!("{column} {membership} ({})", placeholders.join(", ")))
        }
        other => Err(Error::Validation(ValidationError::unknown_operator(
            entity.name(),
            other,
        ))),
    }
}

fn pattern_operand(entity: &EntityDescriptor, operator: &str, operand: &Json) -> Result<String> {
    match operand {
        Json::String(s) => Ok(s.clone()),
        Json::Number(n) => Ok(n.to_string()),
        _ => Err(Error::Validation(ValidationError::new(
            entity.name(),
            format!("'{operator}' requires a string value"),
        ))),
    }
}
