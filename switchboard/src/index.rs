//! Derived index state.
//!
//! Index uniqueness is tracked as an explicit map from index tuple to the
//! rows holding it, maintained on every row write; collisions are looked
//! up, never scanned for. Tuples are keyed by the stable string rendering
//! of their column values, so index maps never depend on float ordering.

use std::collections::{BTreeMap, BTreeSet};

use switchboard_core::{OperationError, Row, RowUuid, TableSchema};

use crate::error::IndexError;

/// Identifier of an index within a table: its column names, joined.
fn index_id(columns: &[String]) -> String {
    columns.join(",")
}

/// The tuple key of a row under an index: the stable rendering of its
/// column values, absent columns resolved to their defaults.
fn index_tuple(
    schema: &TableSchema,
    columns: &[String],
    row: &Row,
) -> Result<String, OperationError> {
    let mut parts = Vec::with_capacity(columns.len());
    for column in columns {
        parts.push(row.field(schema, column)?.index_key());
    }
    Ok(parts.join("|"))
}

/// The derived index maps of one table.
#[derive(Debug, Clone, Default)]
pub(crate) struct TableIndexes {
    // index id -> tuple key -> rows holding the tuple
    entries: BTreeMap<String, BTreeMap<String, BTreeSet<RowUuid>>>,
}

impl TableIndexes {
    /// Record a row's tuples under every declared index.
    pub fn insert(&mut self, schema: &TableSchema, row: &Row) -> Result<(), OperationError> {
        for index in schema.indexes() {
            let tuple = index_tuple(schema, index, row)?;
            self.entries
                .entry(index_id(index))
                .or_default()
                .entry(tuple)
                .or_default()
                .insert(row.uuid().clone());
        }
        Ok(())
    }

    /// Remove a row's tuples from every declared index.
    pub fn remove(&mut self, schema: &TableSchema, row: &Row) -> Result<(), OperationError> {
        for index in schema.indexes() {
            let tuple = index_tuple(schema, index, row)?;
            if let Some(tuples) = self.entries.get_mut(&index_id(index)) {
                if let Some(holders) = tuples.get_mut(&tuple) {
                    holders.remove(row.uuid());
                    if holders.is_empty() {
                        tuples.remove(&tuple);
                    }
                }
            }
        }
        Ok(())
    }

    /// Find the first index whose tuple for `row` is held by a different
    /// row.
    pub fn collision(
        &self,
        schema: &TableSchema,
        table: &str,
        row: &Row,
    ) -> Result<Option<IndexError>, OperationError> {
        for index in schema.indexes() {
            let tuple = index_tuple(schema, index, row)?;
            let holders = self
                .entries
                .get(&index_id(index))
                .and_then(|tuples| tuples.get(&tuple));
            let Some(holders) = holders else { continue };
            let existing: Vec<RowUuid> =
                holders.iter().filter(|holder| *holder != row.uuid()).cloned().collect();
            if !existing.is_empty() {
                return Ok(Some(IndexError {
                    table: table.to_owned(),
                    index: index.clone(),
                    new: row.uuid().clone(),
                    existing,
                }));
            }
        }
        Ok(None)
    }
}
