//! Switchboard server.
//!
//! An embeddable server over the Switchboard engine: it holds the
//! registered databases, runs transact batches, commits the diffs of fully
//! successful batches into the in-memory store, and fans committed updates
//! out to monitor subscribers. The JSON-RPC message layer lives in
//! [`jsonrpc`]; the TCP transport is provided by the `switchboard-server`
//! binary and is deliberately thin.

pub mod jsonrpc;
pub mod pubsub;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::{debug, warn};

use switchboard::{
    Database, InMemoryDatabase, Operation, OperationResult, StoreError, TableUpdates, Transaction,
};
use switchboard_core::{DatabaseSchema, SchemaError};

pub use pubsub::UpdateHub;

/// Errors raised while registering or serving databases.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The schema document failed to parse.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The committed store rejected an operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The named database is not registered.
    #[error("database {0:?} is not registered")]
    UnknownDatabase(String),
}

struct ServedDatabase {
    schema: Arc<DatabaseSchema>,
    document: serde_json::Value,
    hub: UpdateHub,
}

/// The embeddable Switchboard server.
///
/// Thread-safe: transact calls from concurrent sessions each run their own
/// transaction against the shared committed store; commits are serialized
/// by the store itself.
pub struct Server {
    store: Arc<InMemoryDatabase>,
    databases: RwLock<HashMap<String, ServedDatabase>>,
}

impl Server {
    /// Create a server with no registered databases.
    #[must_use]
    pub fn new() -> Self {
        Self { store: Arc::new(InMemoryDatabase::new()), databases: RwLock::new(HashMap::new()) }
    }

    /// Register a database from its JSON schema document.
    ///
    /// # Errors
    ///
    /// Returns a [`ServerError::Schema`] when the document is malformed.
    pub fn register(&self, document: serde_json::Value) -> Result<(), ServerError> {
        let schema = DatabaseSchema::from_json(&document)?;
        let name = schema.name.clone();
        self.store.register(schema);
        let schema = self
            .store
            .schema(&name)
            .ok_or_else(|| ServerError::UnknownDatabase(name.clone()))?;
        let served = ServedDatabase { schema, document, hub: UpdateHub::new() };
        if let Ok(mut databases) = self.databases.write() {
            databases.insert(name.clone(), served);
        }
        debug!(db = %name, "registered database");
        Ok(())
    }

    /// The names of the registered databases.
    #[must_use]
    pub fn databases(&self) -> Vec<String> {
        self.databases
            .read()
            .map(|databases| databases.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// The raw schema document of a database.
    #[must_use]
    pub fn schema_document(&self, db: &str) -> Option<serde_json::Value> {
        self.databases
            .read()
            .ok()
            .and_then(|databases| databases.get(db).map(|served| served.document.clone()))
    }

    /// Subscribe to the committed updates of a database.
    #[must_use]
    pub fn subscribe(
        &self,
        db: &str,
    ) -> Option<tokio::sync::broadcast::Receiver<Arc<TableUpdates>>> {
        self.databases
            .read()
            .ok()
            .and_then(|databases| databases.get(db).map(|served| served.hub.subscribe()))
    }

    /// Run a transact batch against a database.
    ///
    /// A fully successful batch is committed to the store and its diff is
    /// published to monitor subscribers; any failure leaves the store
    /// untouched. The reply vector mirrors the executor's: one entry per
    /// operation, null-padded after the first failure, plus at most one
    /// trailing constraint violation.
    pub fn transact(&self, db: &str, operations: &[Operation]) -> Vec<Option<OperationResult>> {
        let Some((schema, hub)) = self.database_view(db) else {
            let mut results: Vec<Option<OperationResult>> = Vec::with_capacity(operations.len());
            if !operations.is_empty() {
                results.push(Some(OperationResult::error("database does not exist", None)));
                results.extend(std::iter::repeat_with(|| None).take(operations.len() - 1));
            }
            return results;
        };

        let mut txn = Transaction::new(schema, db, self.store.clone());
        let (results, updates) = txn.transact(operations);

        let succeeded = results.len() == operations.len()
            && results.iter().all(|result| result.as_ref().is_some_and(OperationResult::is_ok));
        if succeeded && !updates.is_empty() {
            match self.store.commit(db, &updates) {
                Ok(()) => hub.publish(Arc::new(updates)),
                Err(error) => {
                    warn!(db, %error, "commit failed");
                    let mut results = results;
                    results.push(Some(OperationResult::error(
                        "internal error",
                        Some(error.to_string()),
                    )));
                    return results;
                }
            }
        }
        results
    }

    fn database_view(&self, db: &str) -> Option<(Arc<DatabaseSchema>, UpdateHub)> {
        self.databases
            .read()
            .ok()
            .and_then(|databases| {
                databases.get(db).map(|served| (served.schema.clone(), served.hub.clone()))
            })
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use switchboard::{OpKind, RowUuid, Value};

    use super::*;

    fn schema_document() -> serde_json::Value {
        json!({
            "name": "Open_vSwitch",
            "tables": {
                "Bridge": {
                    "columns": {
                        "name": { "type": "string" },
                        "external_ids": {
                            "type": {
                                "key": "string",
                                "value": "string",
                                "min": 0,
                                "max": "unlimited"
                            }
                        }
                    },
                    "indexes": [["name"]]
                }
            }
        })
    }

    fn insert_bridge(named_uuid: &str, name: &str) -> Operation {
        let mut row = switchboard::WireRow::new();
        row.insert("name".into(), json!(name));
        Operation::new(OpKind::Insert, "Bridge").with_named_uuid(named_uuid).with_row(row)
    }

    #[test]
    fn successful_batches_commit_and_publish() {
        let server = Server::new();
        server.register(schema_document()).expect("register");
        let mut monitor = server.subscribe("Open_vSwitch").expect("subscribe");

        let results = server.transact("Open_vSwitch", &[insert_bridge("b1", "foo")]);
        assert_eq!(results[0], Some(OperationResult::inserted(RowUuid::new("b1"))));

        let updates = monitor.try_recv().expect("published diff");
        let diff = updates.row("Bridge", &RowUuid::new("b1")).expect("bridge diff");
        assert!(diff.is_insert());
        assert_eq!(
            diff.new.as_ref().and_then(|row| row.get("name")),
            Some(&Value::from("foo"))
        );
    }

    #[test]
    fn failed_batches_do_not_commit_or_publish() {
        let server = Server::new();
        server.register(schema_document()).expect("register");
        let mut monitor = server.subscribe("Open_vSwitch").expect("subscribe");

        // Second insert collides on the name index.
        let results = server.transact(
            "Open_vSwitch",
            &[insert_bridge("b1", "dup"), insert_bridge("b2", "dup")],
        );
        assert_eq!(results.len(), 3);
        assert!(monitor.try_recv().is_err(), "nothing published");

        let follow_up = server.transact("Open_vSwitch", &[insert_bridge("b3", "dup")]);
        assert!(follow_up[0].as_ref().is_some_and(OperationResult::is_ok), "store untouched");
    }

    #[test]
    fn unknown_database_answers_every_slot() {
        let server = Server::new();
        let results = server.transact("Absent", &[insert_bridge("b1", "foo")]);
        assert_eq!(
            results[0].as_ref().and_then(|result| result.error.as_deref()),
            Some("database does not exist")
        );
    }

    #[test]
    fn schema_documents_are_served_back() {
        let server = Server::new();
        server.register(schema_document()).expect("register");
        assert_eq!(server.databases(), vec!["Open_vSwitch".to_owned()]);
        assert_eq!(server.schema_document("Open_vSwitch"), Some(schema_document()));
        assert_eq!(server.schema_document("Absent"), None);
    }
}
