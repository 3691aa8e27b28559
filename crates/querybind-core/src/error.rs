//! Error types for querybind operations.

use std::fmt;

/// The primary error type for all querybind operations.
#[derive(Debug)]
pub enum Error {
    /// Unsupported or malformed connection configuration
    Config(ConfigError),
    /// Criteria shape violations; always raised before any SQL executes
    Validation(ValidationError),
    /// Backend-level failure while executing a statement
    Query(QueryError),
    /// Value does not fit the declared scalar type of a field
    Type(TypeError),
    /// Misuse of the transaction API
    Transaction(TransactionError),
    /// Relation resolution failure (e.g. connect target missing)
    Relation(RelationError),
    /// I/O errors
    Io(std::io::Error),
    /// Serialization/deserialization errors
    Serde(String),
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }
}

/// A criteria shape violation, tagged with the entity it was raised for.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Entity the offending criteria were aimed at
    pub entity: String,
    /// What went wrong, naming the offending key/operator
    pub message: String,
}

impl ValidationError {
    pub fn new(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// A projection or condition referenced a field the entity does not have.
    pub fn unknown_field(entity: &str, field: &str) -> Self {
        Self::new(
            entity,
            format!("the field '{field}' does not exist in the {entity} entity"),
        )
    }

    /// An operation received a top-level key outside its allow-list.
    pub fn unknown_option(entity: &str, key: &str, allowed: &[&str]) -> Self {
        Self::new(
            entity,
            format!(
                "the option '{key}' is not accepted here; accepted options: {}",
                allowed.join(", ")
            ),
        )
    }

    /// A required top-level key is absent.
    pub fn missing_key(entity: &str, key: &str) -> Self {
        Self::new(entity, format!("the '{key}' key is required"))
    }

    /// Two mutually exclusive keys were supplied together.
    pub fn exclusive_keys(entity: &str, a: &str, b: &str) -> Self {
        Self::new(
            entity,
            format!("'{a}' and '{b}' cannot be used at the same time"),
        )
    }

    /// A condition used an operator the compiler does not support.
    pub fn unknown_operator(entity: &str, operator: &str) -> Self {
        Self::new(entity, format!("unsupported condition operator '{operator}'"))
    }
}

#[derive(Debug)]
pub struct QueryError {
    pub message: String,
    /// The statement that failed, when available
    pub sql: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl QueryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    /// Field the value was destined for, when known
    pub field: Option<String>,
}

impl TypeError {
    pub fn new(expected: &'static str, actual: impl Into<String>) -> Self {
        Self {
            expected,
            actual: actual.into(),
            field: None,
        }
    }

    pub fn for_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

#[derive(Debug)]
pub struct TransactionError {
    pub message: String,
}

impl TransactionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub struct RelationError {
    pub kind: RelationErrorKind,
    /// Relation name on the owning entity
    pub relation: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationErrorKind {
    /// `connect` named a target that does not exist; aborts the enclosing write
    TargetNotFound,
    /// The payload shape is not legal for this relation's cardinality
    InvalidPayload,
}

impl RelationError {
    pub fn target_not_found(relation: impl Into<String>) -> Self {
        let relation = relation.into();
        Self {
            message: format!("no record found to connect for relation '{relation}'"),
            kind: RelationErrorKind::TargetNotFound,
            relation,
        }
    }

    pub fn invalid_payload(relation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: RelationErrorKind::InvalidPayload,
            relation: relation.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "configuration error: {}", e.message),
            Error::Validation(e) => write!(f, "validation error: {}", e),
            Error::Query(e) => write!(f, "query error: {}", e),
            Error::Type(e) => write!(f, "type error: {}", e),
            Error::Transaction(e) => write!(f, "transaction error: {}", e.message),
            Error::Relation(e) => write!(f, "relation error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Serde(msg) => write!(f, "serialization error: {}", msg),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} entity)", self.message, self.entity)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sql {
            Some(sql) => write!(f, "{} (statement: {sql})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(
                f,
                "expected {} for field '{}', found {}",
                self.expected, field, self.actual
            ),
            None => write!(f, "expected {}, found {}", self.expected, self.actual),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<RelationError> for Error {
    fn from(err: RelationError) -> Self {
        Error::Relation(err)
    }
}

/// Result type alias for querybind operations.
pub type Result<T> = std::result::Result<T, Error>;
