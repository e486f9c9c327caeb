//! Operation requests and per-operation results, as they travel on the
//! wire inside a transact call.

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::error::OperationError;
use crate::mutation::Mutation;
use crate::types::RowUuid;

/// A row in wire form: column name to wire-shaped value.
pub type WireRow = serde_json::Map<String, serde_json::Value>;

/// The kind of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    /// Insert a new row.
    Insert,
    /// Return the rows matching `where`.
    Select,
    /// Replace listed columns on the rows matching `where`.
    Update,
    /// Apply mutations to the rows matching `where`.
    Mutate,
    /// Delete the rows matching `where`.
    Delete,
    /// Block until the rows matching `where` compare against `rows`.
    Wait,
    /// Commit marker; not supported in the in-memory profile.
    Commit,
    /// Abort marker; not supported in the in-memory profile.
    Abort,
    /// Comment marker; not supported in the in-memory profile.
    Comment,
    /// Lock assertion; not supported in the in-memory profile.
    Assert,
}

/// One operation of a transact request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// The operation kind.
    pub op: OpKind,

    /// The table operated on.
    #[serde(default)]
    pub table: String,

    /// Conditions selecting the working row set (non-insert operations).
    #[serde(default, rename = "where", skip_serializing_if = "Vec::is_empty")]
    pub where_: Vec<Condition>,

    /// Requested result columns; accepted and currently ignored, full rows
    /// are returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,

    /// The row to insert, or the replacement columns for update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<WireRow>,

    /// The expected rows for `wait`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<WireRow>>,

    /// Mutations to apply, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mutations: Vec<Mutation>,

    /// Client-chosen identifier for an inserted row, referenceable from
    /// later operations in the same transaction.
    #[serde(default, rename = "named-uuid", skip_serializing_if = "Option::is_none")]
    pub named_uuid: Option<String>,

    /// Timeout in milliseconds for `wait`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Comparison direction for `wait`: `"=="` or `"!="`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,

    /// Durability request for `commit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durable: Option<bool>,

    /// Comment text for `comment`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Lock name for `assert`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<String>,
}

impl Operation {
    /// Create an operation of the given kind on the given table, with every
    /// optional field empty.
    #[must_use]
    pub fn new(op: OpKind, table: impl Into<String>) -> Self {
        Self {
            op,
            table: table.into(),
            where_: Vec::new(),
            columns: None,
            row: None,
            rows: None,
            mutations: Vec::new(),
            named_uuid: None,
            timeout: None,
            until: None,
            durable: None,
            comment: None,
            lock: None,
        }
    }

    /// Set the condition list.
    #[must_use]
    pub fn with_where(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.where_ = conditions.into_iter().collect();
        self
    }

    /// Set the row to insert.
    #[must_use]
    pub fn with_row(mut self, row: WireRow) -> Self {
        self.row = Some(row);
        self
    }

    /// Set the expected rows for `wait`.
    #[must_use]
    pub fn with_rows(mut self, rows: impl IntoIterator<Item = WireRow>) -> Self {
        self.rows = Some(rows.into_iter().collect());
        self
    }

    /// Set the mutation list.
    #[must_use]
    pub fn with_mutations(mut self, mutations: impl IntoIterator<Item = Mutation>) -> Self {
        self.mutations = mutations.into_iter().collect();
        self
    }

    /// Set the requested result columns.
    #[must_use]
    pub fn with_columns(mut self, columns: impl IntoIterator<Item = String>) -> Self {
        self.columns = Some(columns.into_iter().collect());
        self
    }

    /// Set the named UUID for an insert.
    #[must_use]
    pub fn with_named_uuid(mut self, named_uuid: impl Into<String>) -> Self {
        self.named_uuid = Some(named_uuid.into());
        self
    }

    /// Set the `wait` timeout in milliseconds.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the `wait` comparison direction.
    #[must_use]
    pub fn with_until(mut self, until: impl Into<String>) -> Self {
        self.until = Some(until.into());
        self
    }
}

/// The result of one operation.
///
/// At most one of `count`, `uuid`, `rows`, or `error` (+ `details`) is
/// present.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OperationResult {
    /// Rows affected, for update/mutate/delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,

    /// The identifier of an inserted row.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "uuid_wire"
    )]
    pub uuid: Option<RowUuid>,

    /// The selected rows, for select/wait.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<WireRow>>,

    /// The wire error code, when the operation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Human-readable failure detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl OperationResult {
    /// A successful result with no payload (used by `wait`).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A successful result carrying an affected-row count.
    #[must_use]
    pub fn count(count: usize) -> Self {
        Self { count: Some(count), ..Self::default() }
    }

    /// A successful insert result carrying the new row's identifier.
    #[must_use]
    pub fn inserted(uuid: RowUuid) -> Self {
        Self { uuid: Some(uuid), ..Self::default() }
    }

    /// A successful result carrying selected rows.
    #[must_use]
    pub fn rows(rows: Vec<WireRow>) -> Self {
        Self { rows: Some(rows), ..Self::default() }
    }

    /// A failure result with a raw error code and optional details.
    #[must_use]
    pub fn error(code: impl Into<String>, details: Option<String>) -> Self {
        Self { error: Some(code.into()), details, ..Self::default() }
    }

    /// Returns `true` if the operation succeeded.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl From<OperationError> for OperationResult {
    fn from(error: OperationError) -> Self {
        Self::error(error.code(), error.details().map(str::to_owned))
    }
}

/// Serialize the result `uuid` field in its tagged wire shape.
mod uuid_wire {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::types::{Atom, RowUuid};

    pub fn serialize<S: Serializer>(
        uuid: &Option<RowUuid>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match uuid {
            Some(uuid) => {
                let tag = if uuid.is_well_formed() { "uuid" } else { "named-uuid" };
                serde::Serialize::serialize(&(tag, uuid.as_str()), serializer)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<RowUuid>, D::Error> {
        let wire = serde_json::Value::deserialize(deserializer)?;
        if wire.is_null() {
            return Ok(None);
        }
        let base = crate::schema::BaseType::new(crate::schema::AtomKind::Uuid);
        match Atom::from_wire(&base, &wire) {
            Ok(Atom::Uuid(uuid)) => Ok(Some(uuid)),
            _ => Err(D::Error::custom(format!("malformed uuid {wire}"))),
        }
    }
}
