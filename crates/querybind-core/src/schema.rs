//! Entity schema descriptors.
//!
//! Descriptors are built once per entity at engine start and never mutated.
//! Field metadata is resolved into typed decorator slots at construction so
//! nothing downstream has to inspect loosely-typed maps per call.

use crate::error::{ConfigError, Error, Result};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Scalar types an entity field can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    String,
    Int,
    Float,
    Boolean,
    /// Stored as `%Y-%m-%d %H:%M:%S` text
    DateTime,
}

impl ScalarType {
    /// Human-readable name used in error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            ScalarType::String => "String",
            ScalarType::Int => "Int",
            ScalarType::Float => "Float",
            ScalarType::Boolean => "Boolean",
            ScalarType::DateTime => "DateTime",
        }
    }
}

/// Generator for a field's default value.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    /// A fixed literal
    Literal(Value),
    /// Call-time timestamp
    Now,
    /// Random UUID v4, hyphenated text
    Uuid,
    /// 21-character random identifier
    Cuid,
}

/// Referential action for foreign key constraints (ON DELETE / ON UPDATE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferentialAction {
    /// Raise an error if any references exist
    #[default]
    NoAction,
    Restrict,
    /// Delete/update referencing rows automatically
    Cascade,
    /// Set referencing columns to NULL
    SetNull,
    /// Set referencing columns to their defaults
    SetDefault,
}

impl ReferentialAction {
    pub const fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }

    /// Parse an action name (case-insensitive, spaces/underscores optional).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().replace([' ', '_'], "").as_str() {
            "NOACTION" => Some(ReferentialAction::NoAction),
            "RESTRICT" => Some(ReferentialAction::Restrict),
            "CASCADE" => Some(ReferentialAction::Cascade),
            "SETNULL" => Some(ReferentialAction::SetNull),
            "SETDEFAULT" => Some(ReferentialAction::SetDefault),
            _ => None,
        }
    }
}

/// Relation shape: which side owns the foreign key and how many targets
/// a single owner row can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Many owner rows reference one target row
    OneToMany,
    /// Exactly one owner row references one target row
    OneToOne,
}

/// Metadata for a relation field on the owning entity.
#[derive(Debug, Clone)]
pub struct RelationDescriptor {
    /// Relation field name on the owner
    pub name: &'static str,
    /// Target entity name, resolved through the `Schema` registry
    pub target_entity: &'static str,
    /// Foreign key fields on the owning entity
    pub local_fields: Vec<&'static str>,
    /// Referenced fields on the target entity
    pub referenced_fields: Vec<&'static str>,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
    pub cardinality: Cardinality,
}

impl RelationDescriptor {
    pub fn new(name: &'static str, target_entity: &'static str) -> Self {
        Self {
            name,
            target_entity,
            local_fields: Vec::new(),
            referenced_fields: Vec::new(),
            on_delete: ReferentialAction::default(),
            on_update: ReferentialAction::default(),
            cardinality: Cardinality::OneToMany,
        }
    }

    /// Set the FK pairing: local field on the owner, referenced field on
    /// the target.
    pub fn fields(mut self, local: &'static str, referenced: &'static str) -> Self {
        self.local_fields.push(local);
        self.referenced_fields.push(referenced);
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = action;
        self
    }

    pub fn cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    /// The single local FK field, when the relation is not composite.
    pub fn local_field(&self) -> Option<&'static str> {
        match self.local_fields.as_slice() {
            [single] => Some(single),
            _ => None,
        }
    }

    /// The single referenced field, when the relation is not composite.
    pub fn referenced_field(&self) -> Option<&'static str> {
        match self.referenced_fields.as_slice() {
            [single] => Some(single),
            _ => None,
        }
    }
}

/// Metadata about one entity field.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub scalar_type: ScalarType,
    pub nullable: bool,
    pub primary_key: bool,
    /// Default generator, when the field has one
    pub default: Option<DefaultValue>,
    pub unique: bool,
    /// Stamped to call time on every create/update
    pub updated_at: bool,
    /// Scalar owned by a relation as its foreign key column
    pub foreign_key: bool,
    /// Present on relation fields; such fields never become plain columns
    pub relation: Option<RelationDescriptor>,
}

impl FieldDescriptor {
    pub fn new(name: &'static str, scalar_type: ScalarType) -> Self {
        Self {
            name,
            scalar_type,
            nullable: false,
            primary_key: false,
            default: None,
            unique: false,
            updated_at: false,
            foreign_key: false,
            relation: None,
        }
    }

    pub fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    pub fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    pub fn default_value(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    pub fn updated_at(mut self, value: bool) -> Self {
        self.updated_at = value;
        self
    }

    pub fn foreign_key(mut self, value: bool) -> Self {
        self.foreign_key = value;
        self
    }

    pub fn relation(mut self, relation: RelationDescriptor) -> Self {
        self.relation = Some(relation);
        self
    }

    /// Is this a relation field (as opposed to a stored column)?
    pub fn is_relation(&self) -> bool {
        self.relation.is_some()
    }

    /// Must the caller supply this field on create?
    ///
    /// Anything non-nullable without a generator, excluding relation
    /// fields and auto-stamped timestamps.
    pub fn is_required(&self) -> bool {
        !self.nullable
            && self.default.is_none()
            && !self.updated_at
            && self.relation.is_none()
    }
}

/// One entity: named, table-mapped, with an ordered field list.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    name: &'static str,
    table: &'static str,
    fields: Vec<FieldDescriptor>,
    index: HashMap<&'static str, usize>,
    primary_key: usize,
}

impl EntityDescriptor {
    /// Start building an entity descriptor.
    pub fn builder(name: &'static str, table: &'static str) -> EntityBuilder {
        EntityBuilder {
            name,
            table,
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    /// All fields in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// The entity's single primary-key field.
    pub fn primary_key(&self) -> &FieldDescriptor {
        &self.fields[self.primary_key]
    }

    /// Stored (non-relation) fields in declaration order.
    pub fn scalar_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| !f.is_relation())
    }

    /// Relation fields in declaration order.
    pub fn relation_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_relation())
    }

    /// Look up a relation by its field name.
    pub fn relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.field(name).and_then(|f| f.relation.as_ref())
    }

    /// The relation (if any) that owns the given scalar field as its FK.
    pub fn relation_owning(&self, field: &str) -> Option<&RelationDescriptor> {
        self.relation_fields()
            .filter_map(|f| f.relation.as_ref())
            .find(|r| r.local_fields.iter().any(|local| *local == field))
    }

    /// Names of fields a `findUnique` where-clause may anchor on.
    pub fn unique_fields(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|f| f.primary_key || f.unique)
            .map(|f| f.name)
            .collect()
    }

    /// Fields the caller must supply on create.
    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_required())
    }
}

/// Builder for `EntityDescriptor`; `build` enforces the invariants.
pub struct EntityBuilder {
    name: &'static str,
    table: &'static str,
    fields: Vec<FieldDescriptor>,
}

impl EntityBuilder {
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Finish the descriptor.
    ///
    /// Fails when a field name repeats, when the entity does not have
    /// exactly one primary key, or when a relation names a local field
    /// the entity does not carry.
    pub fn build(self) -> Result<EntityDescriptor> {
        let mut index = HashMap::new();
        for (i, field) in self.fields.iter().enumerate() {
            if index.insert(field.name, i).is_some() {
                return Err(Error::Config(ConfigError::new(format!(
                    "entity '{}' declares field '{}' more than once",
                    self.name, field.name
                ))));
            }
        }

        let pk_fields: Vec<usize> = self
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.primary_key)
            .map(|(i, _)| i)
            .collect();
        let primary_key = match pk_fields.as_slice() {
            [single] => *single,
            _ => {
                return Err(Error::Config(ConfigError::new(format!(
                    "entity '{}' must declare exactly one primary-key field, found {}",
                    self.name,
                    pk_fields.len()
                ))));
            }
        };

        for field in &self.fields {
            if let Some(relation) = &field.relation {
                for local in &relation.local_fields {
                    if !index.contains_key(local) {
                        return Err(Error::Config(ConfigError::new(format!(
                            "relation '{}' on entity '{}' names unknown local field '{}'",
                            relation.name, self.name, local
                        ))));
                    }
                }
            }
        }

        Ok(EntityDescriptor {
            name: self.name,
            table: self.table,
            fields: self.fields,
            index,
            primary_key,
        })
    }
}

/// Registry of every entity the engine knows about.
///
/// Relation targets are resolved through this map; there is no name-based
/// dispatch anywhere downstream.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    entities: HashMap<&'static str, Arc<EntityDescriptor>>,
}

impl Schema {
    /// Build a schema from descriptors, validating cross-entity references.
    pub fn build(descriptors: Vec<EntityDescriptor>) -> Result<Self> {
        let mut entities: HashMap<&'static str, Arc<EntityDescriptor>> = HashMap::new();
        for descriptor in descriptors {
            let name = descriptor.name();
            if entities.insert(name, Arc::new(descriptor)).is_some() {
                return Err(Error::Config(ConfigError::new(format!(
                    "entity '{name}' registered more than once"
                ))));
            }
        }

        for entity in entities.values() {
            for relation in entity.relation_fields().filter_map(|f| f.relation.as_ref()) {
                let Some(target) = entities.get(relation.target_entity) else {
                    return Err(Error::Config(ConfigError::new(format!(
                        "relation '{}' on entity '{}' targets unknown entity '{}'",
                        relation.name,
                        entity.name(),
                        relation.target_entity
                    ))));
                };
                for referenced in &relation.referenced_fields {
                    if !target.has_field(referenced) {
                        return Err(Error::Config(ConfigError::new(format!(
                            "relation '{}' on entity '{}' references unknown field '{}' of '{}'",
                            relation.name,
                            entity.name(),
                            referenced,
                            relation.target_entity
                        ))));
                    }
                }
            }
        }

        Ok(Self { entities })
    }

    pub fn entity(&self, name: &str) -> Option<&Arc<EntityDescriptor>> {
        self.entities.get(name)
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entities.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
