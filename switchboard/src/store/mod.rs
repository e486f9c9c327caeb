//! The committed store facade.
//!
//! The transaction executor sees the committed store only through the
//! [`Database`] trait: side-effect-free reads plus a serialized commit
//! point. The in-memory implementation guards per-database table maps with
//! a read-write lock, so any number of readers may observe the store while
//! a transaction executes or a `wait` operation polls.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use switchboard_core::{condition, Condition, DatabaseSchema, Row, RowUuid};

use crate::error::StoreError;
use crate::index::TableIndexes;
use crate::updates::TableUpdates;

/// A read view plus the serialized commit point of the committed store.
///
/// All read methods are side-effect-free. Commit ordering between
/// concurrent transactions is this trait's concern; the executor only
/// guarantees that the diff it hands over is self-consistent against the
/// snapshot it observed.
pub trait Database: Send + Sync {
    /// Returns `true` if the named database is registered.
    fn exists(&self, db: &str) -> bool;

    /// The schema of the named database.
    fn schema(&self, db: &str) -> Option<Arc<DatabaseSchema>>;

    /// The committed rows of a table matching a condition list, keyed by
    /// identifier.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown databases or tables, and propagates
    /// condition evaluation failures.
    fn list(
        &self,
        db: &str,
        table: &str,
        conditions: &[Condition],
    ) -> Result<BTreeMap<RowUuid, Row>, StoreError>;

    /// Check a candidate row for index collisions against the committed
    /// rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::IndexExists`] when a committed row other than
    /// the candidate holds one of its index tuples.
    fn check_indexes(&self, db: &str, table: &str, row: &Row) -> Result<(), StoreError>;

    /// Apply a transaction's diff to the committed store.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown databases or tables.
    fn commit(&self, db: &str, updates: &TableUpdates) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct TableState {
    rows: BTreeMap<RowUuid, Row>,
    indexes: TableIndexes,
}

#[derive(Debug)]
struct DatabaseState {
    schema: Arc<DatabaseSchema>,
    tables: BTreeMap<String, TableState>,
}

/// The in-memory committed store, holding any number of named databases.
#[derive(Debug, Default)]
pub struct InMemoryDatabase {
    databases: RwLock<BTreeMap<String, DatabaseState>>,
}

impl InMemoryDatabase {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a database under its schema's name, with one empty table
    /// state per declared table.
    pub fn register(&self, schema: DatabaseSchema) {
        let name = schema.name.clone();
        let tables = schema
            .tables()
            .map(|(table, _)| (table.clone(), TableState::default()))
            .collect();
        let state = DatabaseState { schema: Arc::new(schema), tables };
        if let Ok(mut databases) = self.databases.write() {
            databases.insert(name, state);
        }
    }
}

impl Database for InMemoryDatabase {
    fn exists(&self, db: &str) -> bool {
        self.databases.read().is_ok_and(|databases| databases.contains_key(db))
    }

    fn schema(&self, db: &str) -> Option<Arc<DatabaseSchema>> {
        self.databases
            .read()
            .ok()
            .and_then(|databases| databases.get(db).map(|state| state.schema.clone()))
    }

    fn list(
        &self,
        db: &str,
        table: &str,
        conditions: &[Condition],
    ) -> Result<BTreeMap<RowUuid, Row>, StoreError> {
        let databases = self
            .databases
            .read()
            .map_err(|_| StoreError::UnknownDatabase(db.to_owned()))?;
        let state = databases
            .get(db)
            .ok_or_else(|| StoreError::UnknownDatabase(db.to_owned()))?;
        let table_schema = state
            .schema
            .table(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_owned()))?;
        let table_state = state
            .tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_owned()))?;

        let mut matches = BTreeMap::new();
        if let Some(uuid) = condition::uuid_fast_path(conditions) {
            if let Some(row) = table_state.rows.get(&uuid) {
                if condition::matches_all(conditions, table_schema, row)? {
                    matches.insert(uuid, row.clone());
                }
            }
            return Ok(matches);
        }
        for (uuid, row) in &table_state.rows {
            if condition::matches_all(conditions, table_schema, row)? {
                matches.insert(uuid.clone(), row.clone());
            }
        }
        Ok(matches)
    }

    fn check_indexes(&self, db: &str, table: &str, row: &Row) -> Result<(), StoreError> {
        let databases = self
            .databases
            .read()
            .map_err(|_| StoreError::UnknownDatabase(db.to_owned()))?;
        let state = databases
            .get(db)
            .ok_or_else(|| StoreError::UnknownDatabase(db.to_owned()))?;
        let table_schema = state
            .schema
            .table(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_owned()))?;
        let table_state = state
            .tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_owned()))?;
        if let Some(collision) = table_state.indexes.collision(table_schema, table, row)? {
            return Err(StoreError::IndexExists(collision));
        }
        Ok(())
    }

    fn commit(&self, db: &str, updates: &TableUpdates) -> Result<(), StoreError> {
        let mut databases = self
            .databases
            .write()
            .map_err(|_| StoreError::UnknownDatabase(db.to_owned()))?;
        let state = databases
            .get_mut(db)
            .ok_or_else(|| StoreError::UnknownDatabase(db.to_owned()))?;
        for (table, uuid, update) in updates.iter() {
            let table_schema = state
                .schema
                .table(table)
                .ok_or_else(|| StoreError::UnknownTable(table.clone()))?;
            let table_state = state
                .tables
                .get_mut(table)
                .ok_or_else(|| StoreError::UnknownTable(table.clone()))?;
            if let Some(previous) = table_state.rows.remove(uuid) {
                table_state.indexes.remove(table_schema, &previous)?;
            }
            if let Some(new) = &update.new {
                table_state.indexes.insert(table_schema, new)?;
                table_state.rows.insert(uuid.clone(), new.clone());
            }
        }
        debug!(db, rows = updates.len(), "committed transaction diff");
        Ok(())
    }
}
