//! Error types for the engine crate.

use thiserror::Error;

use switchboard_core::{OperationError, RowUuid};

/// Details of an index-uniqueness collision.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexError {
    /// The table carrying the index.
    pub table: String,
    /// The index's column names, in declaration order.
    pub index: Vec<String>,
    /// The row whose tuple collided.
    pub new: RowUuid,
    /// The rows already holding the tuple.
    pub existing: Vec<RowUuid>,
}

impl IndexError {
    /// The wire details string carried by the trailing constraint
    /// violation of a failed transaction.
    #[must_use]
    pub fn details(&self) -> String {
        let existing: Vec<&str> = self.existing.iter().map(RowUuid::as_str).collect();
        format!(
            "cannot insert row \"{}\" in table \"{}\" because of identical values for index \"{}\": row \"{}\"",
            self.new,
            self.table,
            self.index.join(","),
            existing.join(","),
        )
    }
}

/// Errors raised by the committed store and the transaction scratch cache.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The named database is not registered.
    #[error("database {0:?} does not exist")]
    UnknownDatabase(String),

    /// The named table is not part of the database schema.
    #[error("table {0:?} does not exist")]
    UnknownTable(String),

    /// A row's index tuple collides with another live row.
    #[error("{}", .0.details())]
    IndexExists(IndexError),

    /// An operation-level error surfaced through the store.
    #[error(transparent)]
    Operation(#[from] OperationError),
}

impl From<StoreError> for OperationError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Operation(inner) => inner,
            StoreError::IndexExists(index) => Self::constraint(index.details()),
            other => Self::internal(other.to_string()),
        }
    }
}
