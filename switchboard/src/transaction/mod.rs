//! The transaction executor.
//!
//! A transaction takes an ordered batch of operations and evaluates them
//! against the committed store augmented by its own in-flight effects. Row
//! resolution unions the scratch cache with the committed rows (scratch
//! wins, deleted rows excluded); every operation's effect is merged into a
//! single accumulator and applied to the scratch cache so later operations
//! observe it. After the last operation the scratch cache is validated
//! against the declared indexes, and the accumulated diff is returned for
//! the caller to commit and fan out to monitors.

mod cache;

pub use cache::TransactionCache;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use switchboard_core::{
    Condition, DatabaseSchema, OpKind, Operation, OperationError, OperationResult, Row, RowUuid,
    TableSchema, Value, WireRow,
};

use crate::error::StoreError;
use crate::store::Database;
use crate::updates::TableUpdates;

/// How often `wait` re-evaluates its predicate.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A single transaction over a snapshot of the committed store.
///
/// The executor is single-threaded: operations run one at a time, in list
/// order. The scratch cache is private to the transaction and never
/// published; the caller takes ownership of the returned diff.
pub struct Transaction {
    id: RowUuid,
    schema: Arc<DatabaseSchema>,
    db_name: String,
    database: Arc<dyn Database>,
    cache: TransactionCache,
}

impl Transaction {
    /// Create a transaction over the given database view.
    #[must_use]
    pub fn new(
        schema: Arc<DatabaseSchema>,
        db_name: impl Into<String>,
        database: Arc<dyn Database>,
    ) -> Self {
        let cache = TransactionCache::new(schema.clone());
        Self { id: RowUuid::generate(), schema, db_name: db_name.into(), database, cache }
    }

    /// The transaction identifier, for logging.
    #[must_use]
    pub const fn id(&self) -> &RowUuid {
        &self.id
    }

    /// Execute an ordered batch of operations.
    ///
    /// The result vector has one entry per operation; once an operation
    /// fails, every later slot is `None`. When all operations succeed the
    /// scratch cache is validated against the declared indexes and at most
    /// one trailing constraint violation is appended. The returned diff
    /// holds the terminal `(old, new)` pair per affected row, with no-op
    /// pairs dropped; it is only meaningful for commit when every result
    /// succeeded.
    pub fn transact(
        &mut self,
        operations: &[Operation],
    ) -> (Vec<Option<OperationResult>>, TableUpdates) {
        debug!(id = %self.id, db = %self.db_name, ops = operations.len(), "transact");
        let mut results: Vec<Option<OperationResult>> = Vec::with_capacity(operations.len());
        let mut updates = TableUpdates::default();
        let mut aborted = false;

        for op in operations {
            // After a failure, every remaining slot is a null placeholder.
            if aborted {
                results.push(None);
                continue;
            }

            if !self.database.exists(&self.db_name) {
                aborted = true;
                results.push(Some(OperationResult::error("database does not exist", None)));
                continue;
            }

            let (mut result, op_updates) = self.execute(op);
            if result.is_ok() {
                if let Some(op_updates) = op_updates {
                    let applied = updates
                        .merge(op_updates.clone())
                        .and_then(|()| self.cache.apply(&op_updates));
                    if let Err(error) = applied {
                        result = error.into();
                    }
                }
            }
            if !result.is_ok() {
                aborted = true;
            }
            results.push(Some(result));
        }

        // A failed batch skips index validation; the diff will not be
        // committed anyway.
        if !aborted {
            if let Err(error) = self.check_indexes() {
                let result = match error {
                    StoreError::IndexExists(index) => {
                        OperationError::constraint(index.details()).into()
                    }
                    other => OperationError::from(other).into(),
                };
                results.push(Some(result));
            }
        }

        updates.retain_changed();
        (results, updates)
    }

    fn execute(&mut self, op: &Operation) -> (OperationResult, Option<TableUpdates>) {
        match op.op {
            OpKind::Insert => self.insert(op),
            OpKind::Select => (self.select(op), None),
            OpKind::Update | OpKind::Mutate | OpKind::Delete => self.modify_rows(op),
            OpKind::Wait => (self.wait(op), None),
            // Durability markers are accepted but not supported in the
            // in-memory profile.
            OpKind::Commit | OpKind::Abort | OpKind::Comment | OpKind::Assert => {
                (OperationError::NotSupported.into(), None)
            }
        }
    }

    fn insert(&self, op: &Operation) -> (OperationResult, Option<TableUpdates>) {
        let uuid = match &op.named_uuid {
            Some(name) => RowUuid::new(name.clone()),
            None => RowUuid::generate(),
        };
        let mut updates = TableUpdates::default();
        match updates.add_operation(&self.schema, &op.table, &uuid, None, op) {
            Ok(()) => (OperationResult::inserted(uuid), Some(updates)),
            Err(error) => (error.into(), None),
        }
    }

    fn select(&mut self, op: &Operation) -> OperationResult {
        let rows = match self.working_set(&op.table, &op.where_, true) {
            Ok(rows) => rows,
            Err(error) => return error.into(),
        };
        let encoded: Vec<WireRow> = rows.values().map(Row::encode).collect();
        OperationResult::rows(encoded)
    }

    /// Update, mutate, and delete share their shape: resolve the working
    /// set, record one row update per row, answer with the row count.
    fn modify_rows(&mut self, op: &Operation) -> (OperationResult, Option<TableUpdates>) {
        let rows = match self.working_set(&op.table, &op.where_, true) {
            Ok(rows) => rows,
            Err(error) => return (error.into(), None),
        };
        let mut updates = TableUpdates::default();
        for (uuid, old) in &rows {
            if let Err(error) = updates.add_operation(&self.schema, &op.table, uuid, Some(old), op)
            {
                return (error.into(), None);
            }
        }
        (OperationResult::count(rows.len()), Some(updates))
    }

    fn wait(&mut self, op: &Operation) -> OperationResult {
        let start = Instant::now();

        let equality = match op.until.as_deref() {
            Some("==") => true,
            Some("!=") => false,
            _ => return OperationError::NotSupported.into(),
        };
        let Some(table_schema) = self.schema.table(&op.table).cloned() else {
            return OperationError::NotSupported.into();
        };

        let expected = match decode_expected_rows(&table_schema, op.rows.as_deref()) {
            Ok(expected) => expected,
            Err(error) => return error.into(),
        };
        let columns = op.columns.clone().unwrap_or_default();

        loop {
            // Resolve without warming the cache, so each poll observes
            // concurrent commits; rows this transaction touched still win.
            let rows = match self.working_set(&op.table, &op.where_, false) {
                Ok(rows) => rows,
                Err(error) => return error.into(),
            };

            let mut matched = 0usize;
            for row in rows.values() {
                match row_matches_expected(&table_schema, row, &columns, &expected) {
                    Ok(true) => matched += 1,
                    Ok(false) => {}
                    Err(error) => return error.into(),
                }
            }

            let satisfied = if equality {
                matched == expected.len()
            } else {
                matched != expected.len()
            };
            if satisfied {
                return OperationResult::empty();
            }

            if let Some(timeout) = op.timeout {
                if start.elapsed() > Duration::from_millis(timeout) {
                    return OperationError::TimedOut.into();
                }
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Resolve the working row set for `(table, where)`: the union of the
    /// scratch cache and the committed store, scratch winning on identifier
    /// conflicts and deleted rows excluded. With `warm`, committed rows are
    /// copied into the scratch cache so later operations observe them.
    fn working_set(
        &mut self,
        table: &str,
        conditions: &[Condition],
        warm: bool,
    ) -> Result<BTreeMap<RowUuid, Row>, OperationError> {
        if self.schema.table(table).is_none() {
            return Err(OperationError::NotSupported);
        }
        let mut cached = self.cache.rows_by_condition(table, conditions)?;
        let mut rows = self
            .database
            .list(&self.db_name, table, conditions)
            .map_err(OperationError::from)?;

        for (uuid, row) in &mut rows {
            if let Some(cached_row) = cached.remove(uuid) {
                *row = cached_row;
            } else if warm {
                self.cache
                    .create(table, uuid.clone(), row.clone(), false)
                    .map_err(OperationError::from)?;
            }
        }
        // Rows only the transaction knows about (inserts).
        rows.extend(cached);
        // Rows the transaction has deleted are not part of any working set.
        rows.retain(|uuid, _| !self.cache.is_deleted(uuid));
        Ok(rows)
    }

    /// Validate every scratch row against the declared indexes: collisions
    /// within the scratch cache are always fatal; collisions with a
    /// committed row are tolerated only when that row has been deleted or
    /// superseded (updated, hence present in the cache) by this
    /// transaction.
    fn check_indexes(&self) -> Result<(), StoreError> {
        let tables: Vec<String> = self.cache.table_names().cloned().collect();
        for table in tables {
            let rows: Vec<Row> = self.cache.rows(&table).cloned().collect();
            for row in rows {
                self.cache.index_exists(&table, &row)?;
                match self.database.check_indexes(&self.db_name, &table, &row) {
                    Ok(()) => {}
                    Err(StoreError::IndexExists(index)) => {
                        let unresolved = index.existing.iter().any(|existing| {
                            !self.cache.is_deleted(existing)
                                && !self.cache.has_row(&table, existing)
                        });
                        if unresolved {
                            return Err(StoreError::IndexExists(index));
                        }
                    }
                    Err(other) => return Err(other),
                }
            }
        }
        Ok(())
    }
}

/// Decode the expected rows of a `wait` operation.
fn decode_expected_rows(
    schema: &TableSchema,
    rows: Option<&[WireRow]>,
) -> Result<Vec<BTreeMap<String, Value>>, OperationError> {
    rows.unwrap_or_default()
        .iter()
        .map(|wire| Row::decode_columns(schema, wire))
        .collect()
}

/// Compare one resolved row against every expected row over the listed
/// columns. An expected column holding the schema default is a wildcard.
fn row_matches_expected(
    schema: &TableSchema,
    row: &Row,
    columns: &[String],
    expected: &[BTreeMap<String, Value>],
) -> Result<bool, OperationError> {
    for column in columns {
        let column_schema = schema.column(column).ok_or_else(|| {
            OperationError::constraint(format!("no column {column:?} in table"))
        })?;
        for expected_row in expected {
            let wanted = expected_row
                .get(column)
                .cloned()
                .unwrap_or_else(|| column_schema.default_value());
            if column_schema.is_default(&wanted) {
                continue;
            }
            let actual = row.field(schema, column)?;
            if actual != wanted {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use switchboard_core::ConditionFunction;

    use crate::store::InMemoryDatabase;
    use crate::updates::RowUpdate;

    use super::*;

    fn setup() -> (Arc<DatabaseSchema>, Arc<InMemoryDatabase>) {
        let schema = DatabaseSchema::from_json(&json!({
            "name": "Open_vSwitch",
            "tables": {
                "Bridge": {
                    "columns": {
                        "name": { "type": "string" },
                        "n": { "type": "integer" }
                    },
                    "indexes": [["name"]]
                }
            }
        }))
        .expect("schema");
        let store = Arc::new(InMemoryDatabase::new());
        store.register(schema.clone());
        let schema = store.schema("Open_vSwitch").expect("registered");
        (schema, store)
    }

    fn seed(store: &InMemoryDatabase, uuid: &str, name: &str) {
        let mut updates = TableUpdates::default();
        updates
            .record(
                "Bridge",
                RowUuid::new(uuid),
                RowUpdate::insert(Row::new(RowUuid::new(uuid)).with("name", name)),
            )
            .expect("record");
        store.commit("Open_vSwitch", &updates).expect("commit");
    }

    #[test]
    fn working_set_prefers_scratch_and_hides_deleted() {
        let (schema, store) = setup();
        seed(&store, "b1", "foo");
        seed(&store, "b2", "bar");

        let mut txn = Transaction::new(schema, "Open_vSwitch", store.clone());

        // Mutate b1 in the transaction.
        let mutate = Operation::new(OpKind::Mutate, "Bridge")
            .with_where([Condition::uuid_equals(&RowUuid::new("b1"))])
            .with_mutations([switchboard_core::Mutation::new(
                "n",
                switchboard_core::Mutator::Add,
                json!(5),
            )]);
        let (results, _) = txn.transact(std::slice::from_ref(&mutate));
        assert_eq!(results[0], Some(OperationResult::count(1)));

        let rows = txn.working_set("Bridge", &[], true).expect("working set");
        assert_eq!(
            rows.get(&RowUuid::new("b1")).and_then(|row| row.get("n")),
            Some(&Value::from(5i64))
        );

        // Delete b2; it disappears from the working set.
        let delete = Operation::new(OpKind::Delete, "Bridge")
            .with_where([Condition::uuid_equals(&RowUuid::new("b2"))]);
        let (results, _) = txn.transact(std::slice::from_ref(&delete));
        assert_eq!(results[0], Some(OperationResult::count(1)));
        let rows = txn.working_set("Bridge", &[], true).expect("working set");
        assert!(!rows.contains_key(&RowUuid::new("b2")));
    }

    #[test]
    fn unknown_table_is_not_supported() {
        let (schema, store) = setup();
        let mut txn = Transaction::new(schema, "Open_vSwitch", store);
        let op = Operation::new(OpKind::Select, "Nope");
        let (results, updates) = txn.transact(std::slice::from_ref(&op));
        assert_eq!(
            results[0].as_ref().and_then(|result| result.error.as_deref()),
            Some("not supported")
        );
        assert!(updates.is_empty());
    }

    #[test]
    fn unregistered_database_reports_directly() {
        let (schema, store) = setup();
        let mut txn = Transaction::new(schema, "Absent", store);
        let ops = [
            Operation::new(OpKind::Select, "Bridge"),
            Operation::new(OpKind::Select, "Bridge"),
        ];
        let (results, _) = txn.transact(&ops);
        assert_eq!(
            results[0].as_ref().and_then(|result| result.error.as_deref()),
            Some("database does not exist")
        );
        assert_eq!(results[1], None);
    }

    #[test]
    fn select_matches_conditions_across_layers() {
        let (schema, store) = setup();
        seed(&store, "b1", "foo");
        let mut txn = Transaction::new(schema, "Open_vSwitch", store);

        let mut row = WireRow::new();
        row.insert("name".into(), json!("bar"));
        let ops = [
            Operation::new(OpKind::Insert, "Bridge").with_named_uuid("b2").with_row(row),
            Operation::new(OpKind::Select, "Bridge").with_where([Condition::new(
                "name",
                ConditionFunction::NotEqual,
                json!(""),
            )]),
        ];
        let (results, _) = txn.transact(&ops);
        let rows = results[1]
            .as_ref()
            .and_then(|result| result.rows.as_ref())
            .expect("select rows");
        assert_eq!(rows.len(), 2);
    }
}
