//! Error taxonomy shared by the store, the policy layer and the HTTP surface.

use thiserror::Error;

/// Result type for EHR operations
pub type Result<T> = std::result::Result<T, EhrError>;

/// Errors surfaced to callers of the data layer.
///
/// Every variant is terminal: nothing in the crate retries or compensates.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EhrError {
    /// A write violates a structural constraint
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// A write references a parent row that does not exist
    #[error("referenced row does not exist: {0}")]
    ReferentialIntegrity(String),

    /// A unique column already holds the value
    #[error("duplicate value for {0}")]
    Uniqueness(String),

    /// The caller's role does not satisfy the table's policy.
    /// Deliberately carries no detail about the target row.
    #[error("operation not permitted")]
    Forbidden,

    /// The row is missing or filtered out by the caller's read policy
    #[error("not found")]
    NotFound,

    /// Connection, pool or driver failure
    #[error("storage error: {0}")]
    Storage(String),
}

impl EhrError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        EhrError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Short machine-readable kind used in JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            EhrError::Validation { .. } => "validation",
            EhrError::ReferentialIntegrity(_) => "referential_integrity",
            EhrError::Uniqueness(_) => "uniqueness",
            EhrError::Forbidden => "forbidden",
            EhrError::NotFound => "not_found",
            EhrError::Storage(_) => "storage",
        }
    }
}

impl From<diesel::result::Error> for EhrError {
    fn from(err: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};

        match err {
            Error::NotFound => EhrError::NotFound,
            Error::DatabaseError(kind, info) => {
                let target = info
                    .constraint_name()
                    .or(info.column_name())
                    .unwrap_or("row")
                    .to_string();
                match kind {
                    DatabaseErrorKind::UniqueViolation => EhrError::Uniqueness(target),
                    DatabaseErrorKind::ForeignKeyViolation => {
                        EhrError::ReferentialIntegrity(foreign_key_column(info.table_name(), &target))
                    }
                    DatabaseErrorKind::CheckViolation | DatabaseErrorKind::NotNullViolation => {
                        EhrError::validation(target, info.message().to_string())
                    }
                    _ => EhrError::Storage(info.message().to_string()),
                }
            }
            Error::DeserializationError(e) => EhrError::Storage(format!("decode failed: {}", e)),
            other => EhrError::Storage(other.to_string()),
        }
    }
}

/// Column behind a default-named foreign key (`<table>_<column>_fkey`), so
/// both stores report the offending column.
fn foreign_key_column(table: Option<&str>, constraint: &str) -> String {
    let column = constraint.strip_suffix("_fkey").unwrap_or(constraint);
    table
        .and_then(|t| column.strip_prefix(t))
        .and_then(|rest| rest.strip_prefix('_'))
        .unwrap_or(column)
        .to_string()
}

impl From<diesel::r2d2::PoolError> for EhrError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        EhrError::Storage(format!("couldn't get db connection from pool: {}", err))
    }
}
