//! The database schema model.
//!
//! Schemas arrive as JSON documents describing tables, columns, atomic and
//! composite types, enums, indexes, and mutability. The parsed model is
//! immutable for the lifetime of the engine; all validation of row values
//! happens against it.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::Deserialize;

use crate::error::{OperationError, SchemaError};
use crate::types::{Atom, RowUuid, Value};

/// The all-zeroes UUID, the default value of uuid columns.
const ZERO_UUID: &str = "00000000-0000-0000-0000-000000000000";

/// The five atomic base types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomKind {
    /// 64-bit signed integer.
    Integer,
    /// 64-bit floating point number.
    Real,
    /// Boolean value.
    Boolean,
    /// UTF-8 string.
    String,
    /// Row reference.
    Uuid,
}

impl AtomKind {
    /// The schema-document name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Uuid => "uuid",
        }
    }

    fn parse(name: &str) -> Result<Self, SchemaError> {
        match name {
            "integer" => Ok(Self::Integer),
            "real" => Ok(Self::Real),
            "boolean" => Ok(Self::Boolean),
            "string" => Ok(Self::String),
            "uuid" => Ok(Self::Uuid),
            other => Err(SchemaError::UnknownAtomKind(other.to_owned())),
        }
    }

    /// The default (zero) value of this kind.
    #[must_use]
    pub fn default_atom(self) -> Atom {
        match self {
            Self::Integer => Atom::Integer(0),
            Self::Real => Atom::Real(0.0),
            Self::Boolean => Atom::Boolean(false),
            Self::String => Atom::String(String::new()),
            Self::Uuid => Atom::Uuid(RowUuid::new(ZERO_UUID)),
        }
    }
}

/// A base (key or value) type: an atomic kind, optionally constrained to an
/// enumerated value set, optionally referencing another table.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseType {
    /// The atomic kind.
    pub kind: AtomKind,
    /// The allowed values, when this base is an enum.
    pub enum_values: Option<Vec<Atom>>,
    /// The referenced table, for uuid bases that are references.
    pub ref_table: Option<String>,
}

impl BaseType {
    /// An unconstrained base of the given kind.
    #[must_use]
    pub const fn new(kind: AtomKind) -> Self {
        Self { kind, enum_values: None, ref_table: None }
    }

    /// Returns `true` if `atom` is admissible for this base: right kind,
    /// and a member of the enum when one is declared.
    #[must_use]
    pub fn admits(&self, atom: &Atom) -> bool {
        if atom.kind() != self.kind {
            return false;
        }
        match &self.enum_values {
            Some(allowed) => allowed.contains(atom),
            None => true,
        }
    }
}

/// An upper size bound for a composite column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// At most this many elements.
    Count(usize),
    /// No upper bound.
    Unlimited,
}

impl Limit {
    /// Returns `true` if `len` exceeds the bound.
    #[must_use]
    pub const fn exceeded_by(self, len: usize) -> bool {
        match self {
            Self::Count(max) => len > max,
            Self::Unlimited => false,
        }
    }
}

/// The shape of a column: atom, set, or map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Exactly one atom.
    Atom,
    /// A set of atoms with size bounds.
    Set,
    /// A map between atoms with size bounds.
    Map,
}

/// A column type descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnType {
    /// The key (or sole) base type.
    pub key: BaseType,
    /// The value base type, for maps.
    pub value: Option<BaseType>,
    /// Minimum number of elements.
    pub min: usize,
    /// Maximum number of elements.
    pub max: Limit,
}

impl ColumnType {
    /// An atomic column of the given kind.
    #[must_use]
    pub const fn atom(kind: AtomKind) -> Self {
        Self { key: BaseType::new(kind), value: None, min: 1, max: Limit::Count(1) }
    }

    /// A set column of the given kind; `max` of `None` means unlimited.
    #[must_use]
    pub const fn set(kind: AtomKind, min: usize, max: Option<usize>) -> Self {
        let max = match max {
            Some(n) => Limit::Count(n),
            None => Limit::Unlimited,
        };
        Self { key: BaseType::new(kind), value: None, min, max }
    }

    /// An unbounded map column between the given kinds.
    #[must_use]
    pub const fn map(key: AtomKind, value: AtomKind) -> Self {
        Self {
            key: BaseType::new(key),
            value: Some(BaseType::new(value)),
            min: 0,
            max: Limit::Unlimited,
        }
    }

    /// The composite kind this descriptor denotes: a map when a value base
    /// is present, an atom when exactly one element is required, a set
    /// otherwise.
    #[must_use]
    pub fn kind(&self) -> ColumnKind {
        if self.value.is_some() {
            ColumnKind::Map
        } else if self.min == 1 && self.max == Limit::Count(1) {
            ColumnKind::Atom
        } else {
            ColumnKind::Set
        }
    }
}

/// A column declaration: type plus mutability.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    /// The column type descriptor.
    pub column_type: ColumnType,
    /// Whether the column may appear in update and mutate operations.
    pub mutable: bool,
    /// Whether the column is ephemeral (not durable).
    pub ephemeral: bool,
}

impl ColumnSchema {
    /// The default value of this column: the zero atom for scalars, the
    /// empty composite otherwise.
    #[must_use]
    pub fn default_value(&self) -> Value {
        match self.column_type.kind() {
            ColumnKind::Atom => Value::Atom(self.column_type.key.kind.default_atom()),
            ColumnKind::Set => Value::Set(Vec::new()),
            ColumnKind::Map => Value::Map(Vec::new()),
        }
    }

    /// Returns `true` if `value` is this column's default.
    #[must_use]
    pub fn is_default(&self, value: &Value) -> bool {
        *value == self.default_value()
    }

    /// Validate a decoded value against this column: atom kinds, enum
    /// membership, and composite size bounds.
    ///
    /// # Errors
    ///
    /// Returns a constraint violation naming `column` on any mismatch.
    pub fn validate(&self, column: &str, value: &Value) -> Result<(), OperationError> {
        let ty = &self.column_type;
        match (ty.kind(), value) {
            (ColumnKind::Atom, Value::Atom(atom)) => {
                if !ty.key.admits(atom) {
                    return Err(OperationError::constraint(format!(
                        "value for column {column:?} is not an admissible {}",
                        ty.key.kind.as_str()
                    )));
                }
            }
            (ColumnKind::Set, Value::Set(elements)) => {
                for element in elements {
                    if !ty.key.admits(element) {
                        return Err(OperationError::constraint(format!(
                            "set element for column {column:?} is not an admissible {}",
                            ty.key.kind.as_str()
                        )));
                    }
                }
                self.validate_size(column, elements.len())?;
            }
            (ColumnKind::Map, Value::Map(entries)) => {
                let value_base = ty.value.as_ref().ok_or_else(|| {
                    OperationError::internal("map column without a value type")
                })?;
                for (key, val) in entries {
                    if !ty.key.admits(key) || !value_base.admits(val) {
                        return Err(OperationError::constraint(format!(
                            "map entry for column {column:?} does not match its declared types"
                        )));
                    }
                }
                self.validate_size(column, entries.len())?;
            }
            (expected, _) => {
                return Err(OperationError::constraint(format!(
                    "value for column {column:?} does not have the declared {expected:?} shape"
                )));
            }
        }
        Ok(())
    }

    fn validate_size(&self, column: &str, len: usize) -> Result<(), OperationError> {
        if len < self.column_type.min {
            return Err(OperationError::constraint(format!(
                "column {column:?} must have at least {} element(s), has {len}",
                self.column_type.min
            )));
        }
        if self.column_type.max.exceeded_by(len) {
            return Err(OperationError::constraint(format!(
                "column {column:?} exceeds its maximum size"
            )));
        }
        Ok(())
    }
}

/// The synthesized schema of the reserved `_uuid` column.
fn uuid_column() -> &'static ColumnSchema {
    static UUID_COLUMN: OnceLock<ColumnSchema> = OnceLock::new();
    UUID_COLUMN.get_or_init(|| ColumnSchema {
        column_type: ColumnType::atom(AtomKind::Uuid),
        mutable: false,
        ephemeral: false,
    })
}

/// A table declaration.
#[derive(Debug, Clone)]
pub struct TableSchema {
    columns: BTreeMap<String, ColumnSchema>,
    indexes: Vec<Vec<String>>,
    /// Whether the table is a root for garbage collection purposes.
    pub is_root: bool,
    /// The declared row cap, if any.
    pub max_rows: Option<usize>,
}

impl TableSchema {
    /// Look up a column. The reserved `_uuid` name resolves to a
    /// synthesized immutable uuid column.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        if name == crate::types::UUID_COLUMN {
            return Some(uuid_column());
        }
        self.columns.get(name)
    }

    /// Iterate over the declared columns.
    pub fn columns(&self) -> impl Iterator<Item = (&String, &ColumnSchema)> {
        self.columns.iter()
    }

    /// The declared indexes: each an ordered list of column names whose
    /// value tuple must be unique across live rows.
    #[must_use]
    pub fn indexes(&self) -> &[Vec<String>] {
        &self.indexes
    }
}

/// A named database schema: an immutable set of table declarations.
#[derive(Debug, Clone)]
pub struct DatabaseSchema {
    /// The database name.
    pub name: String,
    /// The schema document version, if declared.
    pub version: Option<String>,
    tables: BTreeMap<String, TableSchema>,
}

impl DatabaseSchema {
    /// Parse a schema from its JSON document.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] when the document is malformed or
    /// internally inconsistent.
    pub fn from_json(document: &serde_json::Value) -> Result<Self, SchemaError> {
        let wire: WireSchema = serde_json::from_value(document.clone())?;
        Self::from_wire(wire)
    }

    /// Parse a schema from JSON text.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] when the document is malformed or
    /// internally inconsistent.
    pub fn parse(document: &str) -> Result<Self, SchemaError> {
        let wire: WireSchema = serde_json::from_str(document)?;
        Self::from_wire(wire)
    }

    fn from_wire(wire: WireSchema) -> Result<Self, SchemaError> {
        let mut tables = BTreeMap::new();
        for (table_name, wire_table) in wire.tables {
            let mut columns = BTreeMap::new();
            for (column_name, wire_column) in wire_table.columns {
                columns.insert(column_name.clone(), wire_column.resolve(&column_name)?);
            }
            for index in &wire_table.indexes {
                for column in index {
                    if !columns.contains_key(column) {
                        return Err(SchemaError::UnknownIndexColumn {
                            table: table_name.clone(),
                            column: column.clone(),
                        });
                    }
                }
            }
            tables.insert(
                table_name,
                TableSchema {
                    columns,
                    indexes: wire_table.indexes,
                    is_root: wire_table.is_root,
                    max_rows: wire_table.max_rows,
                },
            );
        }
        Ok(Self { name: wire.name, version: wire.version, tables })
    }

    /// Look up a table.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Iterate over the declared tables.
    pub fn tables(&self) -> impl Iterator<Item = (&String, &TableSchema)> {
        self.tables.iter()
    }
}

// ---------------------------------------------------------------------------
// Wire representation of schema documents.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireSchema {
    name: String,
    version: Option<String>,
    #[serde(default)]
    tables: BTreeMap<String, WireTable>,
}

#[derive(Debug, Deserialize)]
struct WireTable {
    #[serde(default)]
    columns: BTreeMap<String, WireColumn>,
    #[serde(default)]
    indexes: Vec<Vec<String>>,
    #[serde(default, rename = "isRoot")]
    is_root: bool,
    #[serde(default, rename = "maxRows")]
    max_rows: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct WireColumn {
    #[serde(rename = "type")]
    column_type: WireType,
    #[serde(default = "default_true")]
    mutable: bool,
    #[serde(default)]
    ephemeral: bool,
}

const fn default_true() -> bool {
    true
}

impl WireColumn {
    fn resolve(self, column: &str) -> Result<ColumnSchema, SchemaError> {
        let column_type = match self.column_type {
            WireType::Atom(name) => ColumnType::atom(AtomKind::parse(&name)?),
            WireType::Composite(composite) => composite.resolve(column)?,
        };
        Ok(ColumnSchema { column_type, mutable: self.mutable, ephemeral: self.ephemeral })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireType {
    Atom(String),
    Composite(WireComposite),
}

#[derive(Debug, Deserialize)]
struct WireComposite {
    key: WireBase,
    value: Option<WireBase>,
    min: Option<usize>,
    max: Option<WireLimit>,
}

impl WireComposite {
    fn resolve(self, column: &str) -> Result<ColumnType, SchemaError> {
        let key = self.key.resolve(column)?;
        let value = self.value.map(|base| base.resolve(column)).transpose()?;
        let min = self.min.unwrap_or(1);
        let max = match self.max {
            None => Limit::Count(1),
            Some(WireLimit::Count(n)) => Limit::Count(n),
            Some(WireLimit::Keyword(word)) if word == "unlimited" => Limit::Unlimited,
            Some(WireLimit::Keyword(word)) => {
                return Err(SchemaError::InvalidBounds {
                    column: column.to_owned(),
                    details: format!("unknown max keyword {word:?}"),
                });
            }
        };
        if let Limit::Count(n) = max {
            if n < min {
                return Err(SchemaError::InvalidBounds {
                    column: column.to_owned(),
                    details: format!("max {n} below min {min}"),
                });
            }
        }
        Ok(ColumnType { key, value, min, max })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireLimit {
    Count(usize),
    Keyword(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireBase {
    Name(String),
    Full(WireBaseFull),
}

#[derive(Debug, Deserialize)]
struct WireBaseFull {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "enum")]
    allowed: Option<serde_json::Value>,
    #[serde(rename = "refTable")]
    ref_table: Option<String>,
}

impl WireBase {
    fn resolve(self, column: &str) -> Result<BaseType, SchemaError> {
        match self {
            Self::Name(name) => Ok(BaseType::new(AtomKind::parse(&name)?)),
            Self::Full(full) => {
                let kind = AtomKind::parse(&full.kind)?;
                let enum_values = full
                    .allowed
                    .map(|wire| parse_enum(kind, &wire, column))
                    .transpose()?;
                Ok(BaseType { kind, enum_values, ref_table: full.ref_table })
            }
        }
    }
}

/// Parse an enum declaration: either a bare scalar or the tagged
/// `["set", […]]` shape.
fn parse_enum(
    kind: AtomKind,
    wire: &serde_json::Value,
    column: &str,
) -> Result<Vec<Atom>, SchemaError> {
    let invalid = || SchemaError::InvalidEnum { column: column.to_owned() };
    let base = BaseType::new(kind);
    let elements: Vec<&serde_json::Value> = match wire.as_array() {
        Some(pair) if pair.len() == 2 && pair[0].as_str() == Some("set") => {
            pair[1].as_array().ok_or_else(invalid)?.iter().collect()
        }
        Some(_) => return Err(invalid()),
        None => vec![wire],
    };
    elements
        .into_iter()
        .map(|element| Atom::from_wire(&base, element).map_err(|_| invalid()))
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample() -> DatabaseSchema {
        DatabaseSchema::from_json(&json!({
            "name": "Open_vSwitch",
            "version": "8.3.0",
            "tables": {
                "Bridge": {
                    "columns": {
                        "name": { "type": "string", "mutable": false },
                        "fail_mode": {
                            "type": {
                                "key": {
                                    "type": "string",
                                    "enum": ["set", ["standalone", "secure"]]
                                },
                                "min": 0,
                                "max": 1
                            }
                        },
                        "ports": {
                            "type": {
                                "key": { "type": "uuid", "refTable": "Port" },
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
                    },
                    "indexes": [["name"]],
                    "isRoot": true
                }
            }
        }))
        .expect("schema parses")
    }

    #[test]
    fn parses_tables_and_indexes() {
        let schema = sample();
        assert_eq!(schema.name, "Open_vSwitch");
        let bridge = schema.table("Bridge").expect("Bridge");
        assert!(bridge.is_root);
        assert_eq!(bridge.indexes(), &[vec!["name".to_owned()]]);
        assert!(schema.table("Port").is_none());
    }

    #[test]
    fn column_kinds_derive_from_bounds() {
        let schema = sample();
        let bridge = schema.table("Bridge").expect("Bridge");
        assert_eq!(bridge.column("name").expect("name").column_type.kind(), ColumnKind::Atom);
        assert_eq!(
            bridge.column("fail_mode").expect("fail_mode").column_type.kind(),
            ColumnKind::Set
        );
        assert_eq!(
            bridge.column("ports").expect("ports").column_type.kind(),
            ColumnKind::Set
        );
        assert_eq!(
            bridge.column("external_ids").expect("external_ids").column_type.kind(),
            ColumnKind::Map
        );
    }

    #[test]
    fn uuid_column_is_synthesized() {
        let schema = sample();
        let bridge = schema.table("Bridge").expect("Bridge");
        let uuid = bridge.column("_uuid").expect("_uuid");
        assert!(!uuid.mutable);
        assert_eq!(uuid.column_type.kind(), ColumnKind::Atom);
        assert_eq!(uuid.column_type.key.kind, AtomKind::Uuid);
    }

    #[test]
    fn defaults_are_zero_or_empty() {
        let schema = sample();
        let bridge = schema.table("Bridge").expect("Bridge");
        let name = bridge.column("name").expect("name");
        assert!(name.is_default(&Value::from("")));
        assert!(!name.is_default(&Value::from("foo")));
        let ports = bridge.column("ports").expect("ports");
        assert!(ports.is_default(&Value::Set(vec![])));
    }

    #[test]
    fn enum_membership_is_validated() {
        let schema = sample();
        let bridge = schema.table("Bridge").expect("Bridge");
        let fail_mode = bridge.column("fail_mode").expect("fail_mode");
        assert!(fail_mode.validate("fail_mode", &Value::set(["secure"])).is_ok());
        let err = fail_mode
            .validate("fail_mode", &Value::set(["bogus"]))
            .expect_err("enum violation");
        assert_eq!(err.code(), "constraint violation");
    }

    #[test]
    fn size_bounds_are_validated() {
        let schema = sample();
        let bridge = schema.table("Bridge").expect("Bridge");
        let fail_mode = bridge.column("fail_mode").expect("fail_mode");
        let err = fail_mode
            .validate("fail_mode", &Value::set(["standalone", "secure"]))
            .expect_err("over max");
        assert_eq!(err.code(), "constraint violation");
    }

    #[test]
    fn index_over_unknown_column_is_rejected() {
        let err = DatabaseSchema::from_json(&json!({
            "name": "db",
            "tables": {
                "T": { "columns": { "a": { "type": "string" } }, "indexes": [["b"]] }
            }
        }))
        .expect_err("unknown index column");
        assert!(matches!(err, SchemaError::UnknownIndexColumn { .. }));
    }
}
