//! Rows: schema-valid mappings from column name to value.

use std::collections::BTreeMap;

use crate::error::OperationError;
use crate::op::WireRow;
use crate::schema::TableSchema;

use super::{Atom, RowUuid, Value};

/// The reserved column carrying the row identifier.
pub const UUID_COLUMN: &str = "_uuid";

/// A row of a table.
///
/// Rows are normalized: a column holding its default value is not stored,
/// and readers treat an absent column as the default. The synthetic `_uuid`
/// column is kept out of the column map and exposed through [`Row::uuid`].
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    uuid: RowUuid,
    columns: BTreeMap<String, Value>,
}

impl Row {
    /// Create an empty row with the given identifier.
    #[must_use]
    pub fn new(uuid: RowUuid) -> Self {
        Self { uuid, columns: BTreeMap::new() }
    }

    /// The row identifier.
    #[must_use]
    pub const fn uuid(&self) -> &RowUuid {
        &self.uuid
    }

    /// Get a stored column value. Absent columns (holding their default)
    /// return `None`; use [`Row::field`] for default-aware access.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// Store a column value without normalization.
    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        self.columns.insert(column.into(), value);
    }

    /// Remove a stored column value.
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.columns.remove(column)
    }

    /// Builder-style [`Row::insert`].
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.insert(column.into(), value.into());
        self
    }

    /// Iterate over the stored (non-default) columns.
    pub fn columns(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.columns.iter()
    }

    /// Default-aware column access: returns the stored value, the schema
    /// default for an absent column, or the row identifier for `_uuid`.
    ///
    /// # Errors
    ///
    /// Returns a constraint violation for a column the table does not have.
    pub fn field(&self, schema: &TableSchema, column: &str) -> Result<Value, OperationError> {
        if column == UUID_COLUMN {
            return Ok(Value::Atom(Atom::Uuid(self.uuid.clone())));
        }
        let column_schema = schema.column(column).ok_or_else(|| {
            OperationError::constraint(format!("no column {column:?} in table"))
        })?;
        Ok(self
            .columns
            .get(column)
            .cloned()
            .unwrap_or_else(|| column_schema.default_value()))
    }

    /// Drop stored columns that hold their default value.
    pub fn normalize(&mut self, schema: &TableSchema) {
        self.columns.retain(|column, value| match schema.column(column) {
            Some(column_schema) => !column_schema.is_default(value),
            None => true,
        });
    }

    /// Decode and validate a wire row into a normalized typed row.
    ///
    /// A `_uuid` entry in the wire row is ignored; the identifier is taken
    /// from `uuid`.
    ///
    /// # Errors
    ///
    /// Returns a constraint violation for unknown columns, wire values of
    /// the wrong shape, enum values outside the allowed set, or composite
    /// sizes outside the declared bounds.
    pub fn decode(
        schema: &TableSchema,
        uuid: RowUuid,
        wire: &WireRow,
    ) -> Result<Self, OperationError> {
        let mut row = Self::new(uuid);
        for (column, wire_value) in wire {
            if column == UUID_COLUMN {
                continue;
            }
            let column_schema = schema.column(column).ok_or_else(|| {
                OperationError::constraint(format!("no column {column:?} in table"))
            })?;
            let value = Value::from_wire(&column_schema.column_type, wire_value)?;
            column_schema.validate(column, &value)?;
            if !column_schema.is_default(&value) {
                row.columns.insert(column.clone(), value);
            }
        }
        Ok(row)
    }

    /// Decode the columns of a wire row without constraint validation.
    ///
    /// Used for expected rows in `wait`, which are compared rather than
    /// stored.
    ///
    /// # Errors
    ///
    /// Returns a constraint violation for unknown columns or wire values of
    /// the wrong shape.
    pub fn decode_columns(
        schema: &TableSchema,
        wire: &WireRow,
    ) -> Result<BTreeMap<String, Value>, OperationError> {
        let mut columns = BTreeMap::new();
        for (column, wire_value) in wire {
            if column == UUID_COLUMN {
                continue;
            }
            let column_schema = schema.column(column).ok_or_else(|| {
                OperationError::constraint(format!("no column {column:?} in table"))
            })?;
            let value = Value::from_wire(&column_schema.column_type, wire_value)?;
            columns.insert(column.clone(), value);
        }
        Ok(columns)
    }

    /// Encode this row into its wire shape, `_uuid` included.
    #[must_use]
    pub fn encode(&self) -> WireRow {
        let mut wire = WireRow::new();
        wire.insert(
            UUID_COLUMN.to_owned(),
            Atom::Uuid(self.uuid.clone()).to_wire(),
        );
        for (column, value) in &self.columns {
            wire.insert(column.clone(), value.to_wire());
        }
        wire
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::schema::DatabaseSchema;

    fn bridge_schema() -> TableSchema {
        let schema = DatabaseSchema::from_json(&json!({
            "name": "Open_vSwitch",
            "tables": {
                "Bridge": {
                    "columns": {
                        "name": { "type": "string" },
                        "ports": {
                            "type": {
                                "key": { "type": "uuid" },
                                "min": 0,
                                "max": "unlimited"
                            }
                        },
                        "external_ids": {
                            "type": {
                                "key": "string",
                                "value": "string",
                                "min": 0,
                                "max": "unlimited"
                            }
                        }
                    }
                }
            }
        }))
        .expect("schema");
        schema.table("Bridge").expect("Bridge").clone()
    }

    #[test]
    fn decode_drops_default_values() {
        let schema = bridge_schema();
        let mut wire = WireRow::new();
        wire.insert("name".into(), json!("foo"));
        wire.insert("ports".into(), json!(["set", []]));
        let row = Row::decode(&schema, RowUuid::new("r1"), &wire).expect("decode");
        assert!(row.get("ports").is_none());
        assert_eq!(row.get("name"), Some(&Value::from("foo")));
    }

    #[test]
    fn field_returns_default_for_absent_column() {
        let schema = bridge_schema();
        let row = Row::new(RowUuid::new("r1"));
        assert_eq!(row.field(&schema, "ports").expect("field"), Value::Set(vec![]));
        assert_eq!(
            row.field(&schema, UUID_COLUMN).expect("field"),
            Value::from(RowUuid::new("r1"))
        );
        assert!(row.field(&schema, "nope").is_err());
    }

    #[test]
    fn encode_includes_uuid() {
        let schema = bridge_schema();
        let row = Row::new(RowUuid::new("r1")).with("name", "foo");
        let wire = row.encode();
        assert_eq!(wire.get(UUID_COLUMN), Some(&json!(["named-uuid", "r1"])));
        let decoded = Row::decode(&schema, RowUuid::new("r1"), &wire).expect("decode");
        assert_eq!(decoded, row);
    }

    #[test]
    fn decode_rejects_unknown_column() {
        let schema = bridge_schema();
        let mut wire = WireRow::new();
        wire.insert("bogus".into(), json!(1));
        let err = Row::decode(&schema, RowUuid::new("r1"), &wire).expect_err("unknown column");
        assert_eq!(err.code(), "constraint violation");
    }
}
