//! Switchboard
//!
//! A schema-driven relational database engine in the OVSDB mold. Clients
//! submit ordered batches of operations (insert, select, update, mutate,
//! delete, wait) that are evaluated atomically against a snapshot of the
//! committed store augmented by the batch's own in-flight effects; the
//! result is a per-operation result vector plus a row-level diff ready for
//! commit and fan-out to monitors.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use switchboard::{InMemoryDatabase, Transaction};
//! use switchboard_core::{DatabaseSchema, OpKind, Operation};
//!
//! let store = Arc::new(InMemoryDatabase::new());
//! store.register(DatabaseSchema::parse(schema_json)?);
//!
//! let schema = store.schema("Open_vSwitch").unwrap();
//! let mut txn = Transaction::new(schema, "Open_vSwitch", store.clone());
//! let (results, diff) = txn.transact(&operations);
//! if results.iter().all(|r| r.as_ref().is_some_and(|r| r.is_ok())) {
//!     store.commit("Open_vSwitch", &diff)?;
//! }
//! ```

pub mod error;
mod index;
pub mod store;
pub mod transaction;
pub mod updates;

pub use error::{IndexError, StoreError};
pub use store::{Database, InMemoryDatabase};
pub use transaction::{Transaction, TransactionCache};
pub use updates::{RowUpdate, TableUpdates};

// Re-export the core data model
pub use switchboard_core::{
    Condition, ConditionFunction, DatabaseSchema, Mutation, Mutator, OpKind, Operation,
    OperationError, OperationResult, Row, RowUuid, Value, WireRow,
};
