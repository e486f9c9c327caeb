//! Error types for the core crate.

use thiserror::Error;

/// A wire-visible operation error.
///
/// Each variant corresponds to one of the error codes a per-operation result
/// may carry. The code string travels in the result's `error` field and the
/// human-readable detail, when present, in `details`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OperationError {
    /// The operation, or one of its parameters, is not supported.
    #[error("not supported")]
    NotSupported,

    /// A schema constraint was violated (type mismatch, immutable column,
    /// enum membership, composite size bounds, or a duplicate index tuple).
    #[error("constraint violation: {details}")]
    ConstraintViolation {
        /// What was violated.
        details: String,
    },

    /// A referenced row does not satisfy referential integrity.
    #[error("referential integrity violation: {details}")]
    ReferentialIntegrity {
        /// Which reference failed.
        details: String,
    },

    /// An arithmetic mutation was outside its domain (division or modulo
    /// by zero).
    #[error("domain error: {details}")]
    DomainError {
        /// The offending computation.
        details: String,
    },

    /// A numeric result fell outside the representable range.
    #[error("range error: {details}")]
    RangeError {
        /// The offending computation.
        details: String,
    },

    /// A `wait` operation did not observe its predicate within the timeout.
    #[error("timed out")]
    TimedOut,

    /// The request was structurally malformed.
    #[error("syntax error: {details}")]
    SyntaxError {
        /// What failed to parse.
        details: String,
    },

    /// The transaction was aborted.
    #[error("aborted")]
    Aborted,

    /// An internal invariant failed; surfaced as-is.
    #[error("internal error: {details}")]
    Internal {
        /// The failed invariant.
        details: String,
    },
}

impl OperationError {
    /// Build a constraint violation with the given detail.
    pub fn constraint(details: impl Into<String>) -> Self {
        Self::ConstraintViolation { details: details.into() }
    }

    /// Build a domain error with the given detail.
    pub fn domain(details: impl Into<String>) -> Self {
        Self::DomainError { details: details.into() }
    }

    /// Build a range error with the given detail.
    pub fn range(details: impl Into<String>) -> Self {
        Self::RangeError { details: details.into() }
    }

    /// Build a syntax error with the given detail.
    pub fn syntax(details: impl Into<String>) -> Self {
        Self::SyntaxError { details: details.into() }
    }

    /// Build an internal error with the given detail.
    pub fn internal(details: impl Into<String>) -> Self {
        Self::Internal { details: details.into() }
    }

    /// The wire error code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotSupported => "not supported",
            Self::ConstraintViolation { .. } => "constraint violation",
            Self::ReferentialIntegrity { .. } => "referential integrity violation",
            Self::DomainError { .. } => "domain error",
            Self::RangeError { .. } => "range error",
            Self::TimedOut => "timed out",
            Self::SyntaxError { .. } => "syntax error",
            Self::Aborted => "aborted",
            Self::Internal { .. } => "internal error",
        }
    }

    /// The human-readable detail, if this error carries one.
    #[must_use]
    pub fn details(&self) -> Option<&str> {
        match self {
            Self::ConstraintViolation { details }
            | Self::ReferentialIntegrity { details }
            | Self::DomainError { details }
            | Self::RangeError { details }
            | Self::SyntaxError { details }
            | Self::Internal { details } => Some(details),
            _ => None,
        }
    }
}

/// Errors raised while parsing or validating a database schema document.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The schema document is not valid JSON.
    #[error("invalid schema document: {0}")]
    Json(#[from] serde_json::Error),

    /// An atomic type name is not one of the five base atoms.
    #[error("unknown atomic type {0:?}")]
    UnknownAtomKind(String),

    /// A column type's `min`/`max` bounds are inconsistent.
    #[error("invalid bounds for column {column:?}: {details}")]
    InvalidBounds {
        /// The offending column.
        column: String,
        /// What is inconsistent.
        details: String,
    },

    /// An enum declaration is not a set of atoms of the base type.
    #[error("invalid enum for column {column:?}")]
    InvalidEnum {
        /// The offending column.
        column: String,
    },

    /// A table declares an index over a column it does not have.
    #[error("table {table:?} declares index over unknown column {column:?}")]
    UnknownIndexColumn {
        /// The offending table.
        table: String,
        /// The missing column.
        column: String,
    },
}
