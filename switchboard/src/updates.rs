//! The row update accumulator.
//!
//! A transaction accumulates at most one `(old, new)` pair per row. Each
//! operation contributes a fresh single-op update which is merged into the
//! transaction's accumulator and applied to the scratch cache; the merged
//! accumulator, pruned of no-op pairs, is the diff handed to the caller for
//! commit and monitor fan-out.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use switchboard_core::{
    DatabaseSchema, OpKind, Operation, OperationError, Row, RowUuid, Value,
};

/// The effect of a transaction on one row.
///
/// `old` is absent for a pure insert and `new` is absent for a delete;
/// otherwise both are present and hold the full row before and after.
#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    /// The row before the transaction, if it existed.
    pub old: Option<Row>,
    /// The row after the transaction, unless it was deleted.
    pub new: Option<Row>,
}

impl RowUpdate {
    /// An insert of a row that did not previously exist.
    #[must_use]
    pub fn insert(new: Row) -> Self {
        Self { old: None, new: Some(new) }
    }

    /// A modification of an existing row.
    #[must_use]
    pub fn modify(old: Row, new: Row) -> Self {
        Self { old: Some(old), new: Some(new) }
    }

    /// A deletion of an existing row.
    #[must_use]
    pub fn delete(old: Row) -> Self {
        Self { old: Some(old), new: None }
    }

    /// Returns `true` for a pure insert.
    #[must_use]
    pub const fn is_insert(&self) -> bool {
        self.old.is_none() && self.new.is_some()
    }

    /// Returns `true` for a deletion.
    #[must_use]
    pub const fn is_delete(&self) -> bool {
        self.new.is_none()
    }
}

/// The per-row diffs of a transaction, grouped by table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableUpdates {
    tables: BTreeMap<String, BTreeMap<RowUuid, RowUpdate>>,
}

impl TableUpdates {
    /// Returns `true` if no row is affected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.values().all(BTreeMap::is_empty)
    }

    /// The number of affected rows across all tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    /// The diffs of one table.
    #[must_use]
    pub fn table(&self, table: &str) -> Option<&BTreeMap<RowUuid, RowUpdate>> {
        self.tables.get(table)
    }

    /// The diff of one row.
    #[must_use]
    pub fn row(&self, table: &str, uuid: &RowUuid) -> Option<&RowUpdate> {
        self.tables.get(table)?.get(uuid)
    }

    /// Iterate over all diffs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &RowUuid, &RowUpdate)> {
        self.tables
            .iter()
            .flat_map(|(table, rows)| rows.iter().map(move |(uuid, update)| (table, uuid, update)))
    }

    /// Record an operation's effect on one row, validating the operation's
    /// row value against the schema.
    ///
    /// For inserts `old` must be `None`; for update, mutate, and delete it
    /// carries the row the operation found.
    ///
    /// # Errors
    ///
    /// Returns `not supported` for an unknown table and a constraint
    /// violation for schema-invalid values, immutable columns, or invalid
    /// mutations.
    pub fn add_operation(
        &mut self,
        schema: &DatabaseSchema,
        table: &str,
        uuid: &RowUuid,
        old: Option<&Row>,
        op: &Operation,
    ) -> Result<(), OperationError> {
        let table_schema = schema.table(table).ok_or(OperationError::NotSupported)?;
        let update = match op.op {
            OpKind::Insert => {
                let empty = switchboard_core::WireRow::new();
                let wire = op.row.as_ref().unwrap_or(&empty);
                let row = Row::decode(table_schema, uuid.clone(), wire)?;
                RowUpdate::insert(row)
            }
            OpKind::Update => {
                let old = old.ok_or_else(|| {
                    OperationError::internal("update operation without an existing row")
                })?;
                let wire = op.row.as_ref().ok_or_else(|| {
                    OperationError::syntax("update operation without a row value")
                })?;
                let mut new = old.clone();
                for (column, wire_value) in wire {
                    if column == switchboard_core::UUID_COLUMN {
                        continue;
                    }
                    let column_schema = table_schema.column(column).ok_or_else(|| {
                        OperationError::constraint(format!("no column {column:?} in table"))
                    })?;
                    if !column_schema.mutable {
                        return Err(OperationError::constraint(format!(
                            "column {column:?} is not mutable"
                        )));
                    }
                    let value = Value::from_wire(&column_schema.column_type, wire_value)?;
                    column_schema.validate(column, &value)?;
                    if column_schema.is_default(&value) {
                        new.remove(column);
                    } else {
                        new.insert(column.clone(), value);
                    }
                }
                RowUpdate::modify(old.clone(), new)
            }
            OpKind::Mutate => {
                let old = old.ok_or_else(|| {
                    OperationError::internal("mutate operation without an existing row")
                })?;
                let mut new = old.clone();
                for mutation in &op.mutations {
                    let current = new.field(table_schema, &mutation.column)?;
                    let mutated = mutation.apply(table_schema, &current)?;
                    let column_schema =
                        table_schema.column(&mutation.column).ok_or_else(|| {
                            OperationError::constraint(format!(
                                "no column {:?} in table",
                                mutation.column
                            ))
                        })?;
                    if column_schema.is_default(&mutated) {
                        new.remove(&mutation.column);
                    } else {
                        new.insert(mutation.column.clone(), mutated);
                    }
                }
                RowUpdate::modify(old.clone(), new)
            }
            OpKind::Delete => {
                let old = old.ok_or_else(|| {
                    OperationError::internal("delete operation without an existing row")
                })?;
                RowUpdate::delete(old.clone())
            }
            _ => {
                return Err(OperationError::internal(format!(
                    "operation {:?} does not produce row updates",
                    op.op
                )));
            }
        };
        self.merge_row(table, uuid.clone(), update)
    }

    /// Record a row diff directly, merging with any existing entry for the
    /// row.
    ///
    /// # Errors
    ///
    /// Surfaces merge conflicts, as [`TableUpdates::merge`] does.
    pub fn record(
        &mut self,
        table: &str,
        uuid: RowUuid,
        update: RowUpdate,
    ) -> Result<(), OperationError> {
        self.merge_row(table, uuid, update)
    }

    /// Merge another accumulator into this one, row by row.
    ///
    /// # Errors
    ///
    /// Surfaces merge conflicts (insert over insert, insert over modify,
    /// modify after delete), which are fatal for the transaction.
    pub fn merge(&mut self, other: Self) -> Result<(), OperationError> {
        for (table, rows) in other.tables {
            for (uuid, update) in rows {
                self.merge_row(&table, uuid, update)?;
            }
        }
        Ok(())
    }

    fn merge_row(
        &mut self,
        table: &str,
        uuid: RowUuid,
        incoming: RowUpdate,
    ) -> Result<(), OperationError> {
        let rows = self.tables.entry(table.to_owned()).or_default();
        let mut slot = match rows.entry(uuid) {
            Entry::Vacant(slot) => {
                slot.insert(incoming);
                return Ok(());
            }
            Entry::Occupied(slot) => slot,
        };
        let row_id = slot.key().clone();
        let conflict = |what: &str| {
            OperationError::internal(format!(
                "cannot {what} row {row_id} in table {table:?} twice"
            ))
        };
        let existing_old = slot.get().old.clone();
        let existing_is_insert = slot.get().is_insert();
        let existing_is_delete = slot.get().is_delete();

        let merged = if existing_is_insert {
            match (incoming.old.is_some(), incoming.new) {
                (false, Some(_)) => return Err(conflict("insert")),
                (true, Some(new)) => RowUpdate::insert(new),
                // An inserted row deleted again leaves no trace.
                (_, None) => {
                    slot.remove();
                    return Ok(());
                }
            }
        } else {
            let old = existing_old.ok_or_else(|| {
                OperationError::internal(format!(
                    "empty update for row {row_id} in table {table:?}"
                ))
            })?;
            if existing_is_delete {
                match (incoming.old.is_some(), incoming.new) {
                    // A re-insert of a deleted row resurrects it.
                    (false, Some(new)) => RowUpdate::modify(old, new),
                    (true, Some(_)) => return Err(conflict("modify deleted")),
                    (_, None) => RowUpdate::delete(old),
                }
            } else {
                match (incoming.old.is_some(), incoming.new) {
                    (false, Some(_)) => return Err(conflict("insert over modified")),
                    (true, Some(new)) => RowUpdate::modify(old, new),
                    (_, None) => RowUpdate::delete(old),
                }
            }
        };
        slot.insert(merged);
        Ok(())
    }

    /// Drop diffs whose old and new rows are structurally equal, and tables
    /// left without diffs.
    pub fn retain_changed(&mut self) {
        for rows in self.tables.values_mut() {
            rows.retain(|_, update| match (&update.old, &update.new) {
                (Some(old), Some(new)) => old != new,
                _ => true,
            });
        }
        self.tables.retain(|_, rows| !rows.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use switchboard_core::{Condition, ConditionFunction, Mutation, Mutator, OpKind, Operation};

    use super::*;

    fn schema() -> DatabaseSchema {
        DatabaseSchema::from_json(&json!({
            "name": "db",
            "tables": {
                "Bridge": {
                    "columns": {
                        "name": { "type": "string", "mutable": false },
                        "n": { "type": "integer" },
                        "ports": {
                            "type": { "key": "uuid", "min": 0, "max": "unlimited" }
                        }
                    }
                }
            }
        }))
        .expect("schema")
    }

    fn row(uuid: &str) -> Row {
        Row::new(RowUuid::new(uuid)).with("name", "foo")
    }

    #[test]
    fn insert_then_modify_stays_an_insert() {
        let mut updates = TableUpdates::default();
        let uuid = RowUuid::new("r1");
        updates
            .merge_row("Bridge", uuid.clone(), RowUpdate::insert(row("r1")))
            .expect("insert");
        let newer = row("r1").with("n", 2i64);
        updates
            .merge_row("Bridge", uuid.clone(), RowUpdate::modify(row("r1"), newer.clone()))
            .expect("modify");
        let merged = updates.row("Bridge", &uuid).expect("diff present");
        assert!(merged.is_insert());
        assert_eq!(merged.new.as_ref(), Some(&newer));
    }

    #[test]
    fn insert_then_delete_cancels() {
        let mut updates = TableUpdates::default();
        let uuid = RowUuid::new("r1");
        updates
            .merge_row("Bridge", uuid.clone(), RowUpdate::insert(row("r1")))
            .expect("insert");
        updates
            .merge_row("Bridge", uuid.clone(), RowUpdate::delete(row("r1")))
            .expect("delete");
        assert!(updates.row("Bridge", &uuid).is_none());
        assert!(updates.is_empty());
    }

    #[test]
    fn modify_then_delete_keeps_the_original_old() {
        let mut updates = TableUpdates::default();
        let uuid = RowUuid::new("r1");
        let original = row("r1");
        let modified = row("r1").with("n", 2i64);
        updates
            .merge_row("Bridge", uuid.clone(), RowUpdate::modify(original.clone(), modified.clone()))
            .expect("modify");
        updates
            .merge_row("Bridge", uuid.clone(), RowUpdate::delete(modified))
            .expect("delete");
        let merged = updates.row("Bridge", &uuid).expect("diff present");
        assert!(merged.is_delete());
        assert_eq!(merged.old.as_ref(), Some(&original));
    }

    #[test]
    fn delete_then_insert_resurrects() {
        let mut updates = TableUpdates::default();
        let uuid = RowUuid::new("r1");
        let original = row("r1");
        let reborn = row("r1").with("n", 9i64);
        updates
            .merge_row("Bridge", uuid.clone(), RowUpdate::delete(original.clone()))
            .expect("delete");
        updates
            .merge_row("Bridge", uuid.clone(), RowUpdate::insert(reborn.clone()))
            .expect("insert");
        let merged = updates.row("Bridge", &uuid).expect("diff present");
        assert_eq!(merged.old.as_ref(), Some(&original));
        assert_eq!(merged.new.as_ref(), Some(&reborn));
    }

    #[test]
    fn double_insert_conflicts() {
        let mut updates = TableUpdates::default();
        let uuid = RowUuid::new("r1");
        updates
            .merge_row("Bridge", uuid.clone(), RowUpdate::insert(row("r1")))
            .expect("insert");
        let err = updates
            .merge_row("Bridge", uuid, RowUpdate::insert(row("r1")))
            .expect_err("conflict");
        assert_eq!(err.code(), "internal error");
    }

    #[test]
    fn retain_changed_drops_no_op_pairs() {
        let mut updates = TableUpdates::default();
        let uuid = RowUuid::new("r1");
        updates
            .merge_row("Bridge", uuid.clone(), RowUpdate::modify(row("r1"), row("r1")))
            .expect("modify");
        updates.retain_changed();
        assert!(updates.is_empty());
    }

    #[test]
    fn add_update_operation_rejects_immutable_columns() {
        let schema = schema();
        let mut updates = TableUpdates::default();
        let uuid = RowUuid::new("r1");
        let mut wire = switchboard_core::WireRow::new();
        wire.insert("name".into(), json!("bar"));
        let op = Operation::new(OpKind::Update, "Bridge")
            .with_where([Condition::uuid_equals(&uuid)])
            .with_row(wire);
        let err = updates
            .add_operation(&schema, "Bridge", &uuid, Some(&row("r1")), &op)
            .expect_err("immutable");
        assert_eq!(err.code(), "constraint violation");
    }

    #[test]
    fn add_mutate_operation_applies_in_order() {
        let schema = schema();
        let mut updates = TableUpdates::default();
        let uuid = RowUuid::new("r1");
        let op = Operation::new(OpKind::Mutate, "Bridge").with_mutations([
            Mutation::new("n", Mutator::Add, json!(5)),
            Mutation::new("n", Mutator::Multiply, json!(3)),
        ]);
        updates
            .add_operation(&schema, "Bridge", &uuid, Some(&row("r1")), &op)
            .expect("mutate");
        let diff = updates.row("Bridge", &uuid).expect("diff present");
        let new = diff.new.as_ref().expect("new row");
        assert_eq!(new.get("n"), Some(&Value::from(15i64)));
    }

    #[test]
    fn add_insert_operation_validates_and_defaults() {
        let schema = schema();
        let mut updates = TableUpdates::default();
        let uuid = RowUuid::new("r1");
        let mut wire = switchboard_core::WireRow::new();
        wire.insert("name".into(), json!("foo"));
        wire.insert("ports".into(), json!(["set", []]));
        let op = Operation::new(OpKind::Insert, "Bridge").with_row(wire);
        updates.add_operation(&schema, "Bridge", &uuid, None, &op).expect("insert");
        let diff = updates.row("Bridge", &uuid).expect("diff present");
        assert!(diff.is_insert());
        let new = diff.new.as_ref().expect("new row");
        assert!(new.get("ports").is_none());
    }

    #[test]
    fn ignores_where_on_condition_field() {
        // `where` plays no part in building the update itself.
        let schema = schema();
        let mut updates = TableUpdates::default();
        let uuid = RowUuid::new("r1");
        let op = Operation::new(OpKind::Delete, "Bridge")
            .with_where([Condition::new("name", ConditionFunction::Equal, json!("foo"))]);
        updates
            .add_operation(&schema, "Bridge", &uuid, Some(&row("r1")), &op)
            .expect("delete");
        assert!(updates.row("Bridge", &uuid).expect("diff").is_delete());
    }
}
