//! The per-transaction scratch cache.
//!
//! The cache is authoritative for every row the transaction has inserted,
//! updated, mutated, or warmed from the committed store, and tracks the
//! rows the transaction has deleted. Index tuples are maintained as derived
//! state on every write.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use switchboard_core::{condition, Condition, DatabaseSchema, OperationError, Row, RowUuid};

use crate::error::StoreError;
use crate::index::TableIndexes;
use crate::updates::TableUpdates;

#[derive(Debug, Default)]
struct TableCache {
    rows: BTreeMap<RowUuid, Row>,
    indexes: TableIndexes,
}

/// The scratch row store of one transaction.
#[derive(Debug)]
pub struct TransactionCache {
    schema: Arc<DatabaseSchema>,
    tables: BTreeMap<String, TableCache>,
    deleted: HashSet<RowUuid>,
}

impl TransactionCache {
    /// Create an empty cache over the given schema.
    #[must_use]
    pub fn new(schema: Arc<DatabaseSchema>) -> Self {
        Self { schema, tables: BTreeMap::new(), deleted: HashSet::new() }
    }

    /// Get a cached row.
    #[must_use]
    pub fn get(&self, table: &str, uuid: &RowUuid) -> Option<&Row> {
        self.tables.get(table)?.rows.get(uuid)
    }

    /// Returns `true` if the cache holds the row.
    #[must_use]
    pub fn has_row(&self, table: &str, uuid: &RowUuid) -> bool {
        self.get(table, uuid).is_some()
    }

    /// Returns `true` if the transaction has deleted the row.
    #[must_use]
    pub fn is_deleted(&self, uuid: &RowUuid) -> bool {
        self.deleted.contains(uuid)
    }

    /// The rows deleted by the transaction.
    #[must_use]
    pub fn deleted(&self) -> &HashSet<RowUuid> {
        &self.deleted
    }

    /// The names of tables the cache holds rows for.
    pub fn table_names(&self) -> impl Iterator<Item = &String> {
        self.tables.keys()
    }

    /// Iterate over the cached rows of a table.
    pub fn rows(&self, table: &str) -> impl Iterator<Item = &Row> {
        self.tables.get(table).into_iter().flat_map(|cache| cache.rows.values())
    }

    /// The cached rows of a table matching a condition list, keyed by
    /// identifier. A `_uuid` equality condition resolves by direct lookup.
    ///
    /// # Errors
    ///
    /// Propagates condition evaluation errors.
    pub fn rows_by_condition(
        &self,
        table: &str,
        conditions: &[Condition],
    ) -> Result<BTreeMap<RowUuid, Row>, OperationError> {
        let table_schema = self.schema.table(table).ok_or(OperationError::NotSupported)?;
        let mut matches = BTreeMap::new();
        let Some(cache) = self.tables.get(table) else {
            return Ok(matches);
        };
        if let Some(uuid) = condition::uuid_fast_path(conditions) {
            if let Some(row) = cache.rows.get(&uuid) {
                if condition::matches_all(conditions, table_schema, row)? {
                    matches.insert(uuid, row.clone());
                }
            }
            return Ok(matches);
        }
        for (uuid, row) in &cache.rows {
            if condition::matches_all(conditions, table_schema, row)? {
                matches.insert(uuid.clone(), row.clone());
            }
        }
        Ok(matches)
    }

    /// Insert a row, maintaining index state. With `check_indexes` the
    /// insert fails on an index collision; warming committed rows and
    /// applying accumulated diffs pass `false` and leave collision
    /// detection to the post-batch validation walk.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::IndexExists`] on a collision, and propagates
    /// index tuple computation failures.
    pub fn create(
        &mut self,
        table: &str,
        uuid: RowUuid,
        row: Row,
        check_indexes: bool,
    ) -> Result<(), StoreError> {
        let table_schema = self
            .schema
            .table(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_owned()))?;
        let cache = self.tables.entry(table.to_owned()).or_default();
        if check_indexes {
            if let Some(collision) = cache.indexes.collision(table_schema, table, &row)? {
                return Err(StoreError::IndexExists(collision));
            }
        }
        cache.indexes.insert(table_schema, &row)?;
        cache.rows.insert(uuid.clone(), row);
        // A re-created row is no longer deleted.
        self.deleted.remove(&uuid);
        Ok(())
    }

    /// Replace a cached row, recomputing its index tuples.
    ///
    /// # Errors
    ///
    /// Propagates index tuple computation failures.
    pub fn update(&mut self, table: &str, uuid: &RowUuid, row: Row) -> Result<(), StoreError> {
        let table_schema = self
            .schema
            .table(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_owned()))?;
        let cache = self.tables.entry(table.to_owned()).or_default();
        if let Some(previous) = cache.rows.remove(uuid) {
            cache.indexes.remove(table_schema, &previous)?;
        }
        cache.indexes.insert(table_schema, &row)?;
        cache.rows.insert(uuid.clone(), row);
        Ok(())
    }

    /// Remove a row and record it as deleted.
    ///
    /// # Errors
    ///
    /// Propagates index tuple computation failures.
    pub fn delete(&mut self, table: &str, uuid: &RowUuid) -> Result<(), StoreError> {
        let table_schema = self
            .schema
            .table(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_owned()))?;
        if let Some(cache) = self.tables.get_mut(table) {
            if let Some(previous) = cache.rows.remove(uuid) {
                cache.indexes.remove(table_schema, &previous)?;
            }
        }
        self.deleted.insert(uuid.clone());
        Ok(())
    }

    /// Apply an accumulated diff, routing each row update to
    /// [`create`](Self::create), [`update`](Self::update), or
    /// [`delete`](Self::delete).
    ///
    /// # Errors
    ///
    /// Propagates cache write failures.
    pub fn apply(&mut self, updates: &TableUpdates) -> Result<(), OperationError> {
        for (table, uuid, update) in updates.iter() {
            match (&update.old, &update.new) {
                (None, Some(new)) => {
                    self.create(table, uuid.clone(), new.clone(), false)?;
                }
                (Some(_), Some(new)) => {
                    self.update(table, uuid, new.clone())?;
                }
                (_, None) => {
                    self.delete(table, uuid)?;
                }
            }
        }
        Ok(())
    }

    /// Check a cached row for index collisions against the cache itself.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::IndexExists`] when another cached row holds
    /// one of the row's index tuples.
    pub fn index_exists(&self, table: &str, row: &Row) -> Result<(), StoreError> {
        let table_schema = self
            .schema
            .table(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_owned()))?;
        if let Some(cache) = self.tables.get(table) {
            if let Some(collision) = cache.indexes.collision(table_schema, table, row)? {
                return Err(StoreError::IndexExists(collision));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use switchboard_core::ConditionFunction;

    use super::*;

    fn schema() -> Arc<DatabaseSchema> {
        Arc::new(
            DatabaseSchema::from_json(&json!({
                "name": "db",
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
            .expect("schema"),
        )
    }

    fn bridge(uuid: &str, name: &str) -> Row {
        Row::new(RowUuid::new(uuid)).with("name", name)
    }

    #[test]
    fn create_get_update_delete() {
        let mut cache = TransactionCache::new(schema());
        let uuid = RowUuid::new("b1");
        cache.create("Bridge", uuid.clone(), bridge("b1", "foo"), true).expect("create");
        assert!(cache.has_row("Bridge", &uuid));

        cache.update("Bridge", &uuid, bridge("b1", "bar")).expect("update");
        assert_eq!(
            cache.get("Bridge", &uuid).and_then(|row| row.get("name")),
            Some(&switchboard_core::Value::from("bar"))
        );

        cache.delete("Bridge", &uuid).expect("delete");
        assert!(!cache.has_row("Bridge", &uuid));
        assert!(cache.is_deleted(&uuid));
    }

    #[test]
    fn deleted_rows_never_stay_cached() {
        let mut cache = TransactionCache::new(schema());
        let uuid = RowUuid::new("b1");
        cache.create("Bridge", uuid.clone(), bridge("b1", "foo"), true).expect("create");
        cache.delete("Bridge", &uuid).expect("delete");
        // Re-creating clears the deleted mark.
        cache.create("Bridge", uuid.clone(), bridge("b1", "foo"), false).expect("re-create");
        assert!(cache.has_row("Bridge", &uuid));
        assert!(!cache.is_deleted(&uuid));
    }

    #[test]
    fn create_detects_index_collisions() {
        let mut cache = TransactionCache::new(schema());
        cache.create("Bridge", RowUuid::new("b1"), bridge("b1", "foo"), true).expect("create");
        let err = cache
            .create("Bridge", RowUuid::new("b2"), bridge("b2", "foo"), true)
            .expect_err("collision");
        match err {
            StoreError::IndexExists(index) => {
                assert_eq!(index.existing, vec![RowUuid::new("b1")]);
                assert_eq!(index.index, vec!["name".to_owned()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        // Unchecked creation admits the duplicate; the post-batch walk
        // reports it instead.
        cache.create("Bridge", RowUuid::new("b2"), bridge("b2", "foo"), false).expect("create");
        assert!(cache.index_exists("Bridge", &bridge("b2", "foo")).is_err());
    }

    #[test]
    fn update_recomputes_index_tuples() {
        let mut cache = TransactionCache::new(schema());
        cache.create("Bridge", RowUuid::new("b1"), bridge("b1", "foo"), true).expect("create");
        cache.update("Bridge", &RowUuid::new("b1"), bridge("b1", "bar")).expect("update");
        // The old tuple is released for other rows.
        cache.create("Bridge", RowUuid::new("b2"), bridge("b2", "foo"), true).expect("create");
    }

    #[test]
    fn rows_by_condition_scans_and_fast_paths() {
        let mut cache = TransactionCache::new(schema());
        cache.create("Bridge", RowUuid::new("b1"), bridge("b1", "foo"), true).expect("create");
        cache
            .create(
                "Bridge",
                RowUuid::new("b2"),
                bridge("b2", "bar").with("n", 7i64),
                true,
            )
            .expect("create");

        let all = cache.rows_by_condition("Bridge", &[]).expect("all rows");
        assert_eq!(all.len(), 2);

        let by_name = cache
            .rows_by_condition(
                "Bridge",
                &[Condition::new("name", ConditionFunction::Equal, json!("bar"))],
            )
            .expect("by name");
        assert_eq!(by_name.len(), 1);
        assert!(by_name.contains_key(&RowUuid::new("b2")));

        let by_uuid = cache
            .rows_by_condition("Bridge", &[Condition::uuid_equals(&RowUuid::new("b1"))])
            .expect("by uuid");
        assert_eq!(by_uuid.len(), 1);
        assert!(by_uuid.contains_key(&RowUuid::new("b1")));
    }
}
