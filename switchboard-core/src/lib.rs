//! Switchboard core.
//!
//! This crate provides the schema-driven data model shared by the
//! Switchboard engine and server: the schema model, typed column values and
//! their wire codec, condition predicates, column mutations, and the
//! operation request/result types.
//!
//! # Modules
//!
//! - [`schema`] - Database, table, and column schemas
//! - [`types`] - Row identifiers, atoms, values, and rows
//! - [`condition`] - Column predicates
//! - [`mutation`] - Typed in-place column mutations
//! - [`op`] - Operation requests and results
//! - [`error`] - Error types

pub mod condition;
pub mod error;
pub mod mutation;
pub mod op;
pub mod schema;
pub mod types;

// Re-export commonly used types
pub use condition::{Condition, ConditionFunction};
pub use error::{OperationError, SchemaError};
pub use mutation::{Mutation, Mutator};
pub use op::{OpKind, Operation, OperationResult, WireRow};
pub use schema::{
    AtomKind, BaseType, ColumnKind, ColumnSchema, ColumnType, DatabaseSchema, Limit, TableSchema,
};
pub use types::{Atom, Row, RowUuid, Value, UUID_COLUMN};
