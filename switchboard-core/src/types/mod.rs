//! Core data types: row identifiers, atoms, values, and rows.

mod row;
mod uuid;
mod value;

#[cfg(test)]
mod proptest_tests;

pub use row::{Row, UUID_COLUMN};
pub use uuid::RowUuid;
pub use value::{Atom, Value};
