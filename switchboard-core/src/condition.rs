//! Column predicates.
//!
//! A condition is a `(column, function, value)` triple; a row satisfies a
//! condition list iff it satisfies every entry. On the wire a condition is
//! a 3-element array.

use serde::{Deserialize, Serialize};

use crate::error::OperationError;
use crate::schema::{AtomKind, BaseType, TableSchema};
use crate::types::{Atom, Row, RowUuid, Value, UUID_COLUMN};

/// The comparison applied by a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionFunction {
    /// Structural equality (multiset equality for sets).
    #[serde(rename = "==")]
    Equal,
    /// Structural inequality.
    #[serde(rename = "!=")]
    NotEqual,
    /// Ordered less-than, scalars only.
    #[serde(rename = "<")]
    LessThan,
    /// Ordered less-than-or-equal, scalars only.
    #[serde(rename = "<=")]
    LessThanOrEqual,
    /// Ordered greater-than, scalars only.
    #[serde(rename = ">")]
    GreaterThan,
    /// Ordered greater-than-or-equal, scalars only.
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    /// Membership: every argument element (or pair) is present.
    #[serde(rename = "includes")]
    Includes,
    /// Anti-membership: no argument element (or pair) is present.
    #[serde(rename = "excludes")]
    Excludes,
}

/// A single column predicate.
///
/// The argument value is kept in wire form and decoded against the column
/// schema at evaluation time.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// The column the predicate applies to.
    pub column: String,
    /// The comparison function.
    pub function: ConditionFunction,
    /// The wire-form argument.
    pub value: serde_json::Value,
}

impl Condition {
    /// Create a condition.
    #[must_use]
    pub fn new(
        column: impl Into<String>,
        function: ConditionFunction,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self { column: column.into(), function, value: value.into() }
    }

    /// The `_uuid == <uuid>` fast-path condition.
    #[must_use]
    pub fn uuid_equals(uuid: &RowUuid) -> Self {
        Self::new(UUID_COLUMN, ConditionFunction::Equal, Atom::Uuid(uuid.clone()).to_wire())
    }

    /// Evaluate this condition against a row.
    ///
    /// # Errors
    ///
    /// Returns a constraint violation for unknown columns, malformed
    /// arguments, ordered comparisons on non-scalars or booleans, and
    /// membership comparisons on scalars.
    pub fn matches(&self, schema: &TableSchema, row: &Row) -> Result<bool, OperationError> {
        let column_schema = schema.column(&self.column).ok_or_else(|| {
            OperationError::constraint(format!("no column {:?} in table", self.column))
        })?;
        let actual = row.field(schema, &self.column)?;
        let expected = Value::from_wire(&column_schema.column_type, &self.value)?;
        match (&actual, &expected) {
            (Value::Atom(a), Value::Atom(b)) => self.eval_atoms(a, b),
            (Value::Set(a), Value::Set(b)) => self.eval_sets(a, b, &actual, &expected),
            (Value::Map(a), Value::Map(b)) => self.eval_maps(a, b),
            _ => Err(OperationError::internal(format!(
                "condition on column {:?} compared values of different shapes",
                self.column
            ))),
        }
    }

    fn eval_atoms(&self, actual: &Atom, expected: &Atom) -> Result<bool, OperationError> {
        use ConditionFunction::{
            Equal, Excludes, GreaterThan, GreaterThanOrEqual, Includes, LessThan,
            LessThanOrEqual, NotEqual,
        };
        match self.function {
            Equal => Ok(actual == expected),
            NotEqual => Ok(actual != expected),
            Includes | Excludes => Err(OperationError::constraint(format!(
                "membership comparison on scalar column {:?}",
                self.column
            ))),
            LessThan | LessThanOrEqual | GreaterThan | GreaterThanOrEqual => {
                let ordering = match (actual, expected) {
                    (Atom::Integer(a), Atom::Integer(b)) => a.cmp(b),
                    (Atom::Real(a), Atom::Real(b)) => {
                        match a.partial_cmp(b) {
                            Some(ordering) => ordering,
                            // NaN compares false against everything.
                            None => return Ok(false),
                        }
                    }
                    (Atom::String(a), Atom::String(b)) => a.cmp(b),
                    (Atom::Uuid(a), Atom::Uuid(b)) => a.cmp(b),
                    _ => {
                        return Err(OperationError::constraint(format!(
                            "ordered comparison on column {:?}",
                            self.column
                        )));
                    }
                };
                Ok(match self.function {
                    LessThan => ordering.is_lt(),
                    LessThanOrEqual => ordering.is_le(),
                    GreaterThan => ordering.is_gt(),
                    GreaterThanOrEqual => ordering.is_ge(),
                    _ => unreachable!("scalar ordering handles ordered functions only"),
                })
            }
        }
    }

    fn eval_sets(
        &self,
        actual: &[Atom],
        expected: &[Atom],
        actual_value: &Value,
        expected_value: &Value,
    ) -> Result<bool, OperationError> {
        match self.function {
            ConditionFunction::Equal => Ok(actual_value == expected_value),
            ConditionFunction::NotEqual => Ok(actual_value != expected_value),
            ConditionFunction::Includes => {
                Ok(expected.iter().all(|element| actual.contains(element)))
            }
            ConditionFunction::Excludes => {
                Ok(!expected.iter().any(|element| actual.contains(element)))
            }
            _ => Err(OperationError::constraint(format!(
                "ordered comparison on set column {:?}",
                self.column
            ))),
        }
    }

    fn eval_maps(
        &self,
        actual: &[(Atom, Atom)],
        expected: &[(Atom, Atom)],
    ) -> Result<bool, OperationError> {
        let pair_present = |pair: &(Atom, Atom)| {
            actual.iter().any(|(k, v)| *k == pair.0 && *v == pair.1)
        };
        match self.function {
            ConditionFunction::Equal => {
                Ok(actual.len() == expected.len() && expected.iter().all(pair_present))
            }
            ConditionFunction::NotEqual => {
                Ok(!(actual.len() == expected.len() && expected.iter().all(pair_present)))
            }
            ConditionFunction::Includes => Ok(expected.iter().all(pair_present)),
            ConditionFunction::Excludes => Ok(!expected.iter().any(pair_present)),
            _ => Err(OperationError::constraint(format!(
                "ordered comparison on map column {:?}",
                self.column
            ))),
        }
    }
}

impl Serialize for Condition {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.column, &self.function, &self.value).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (column, function, value) =
            <(String, ConditionFunction, serde_json::Value)>::deserialize(deserializer)?;
        Ok(Self { column, function, value })
    }
}

/// Returns `true` if the row satisfies every condition in the list.
///
/// # Errors
///
/// Propagates the first evaluation error.
pub fn matches_all(
    conditions: &[Condition],
    schema: &TableSchema,
    row: &Row,
) -> Result<bool, OperationError> {
    for condition in conditions {
        if !condition.matches(schema, row)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Extract the row identifier from a `_uuid == <uuid>` condition, if the
/// list contains one. Callers can then resolve by direct lookup and verify
/// any remaining conditions against the single candidate.
#[must_use]
pub fn uuid_fast_path(conditions: &[Condition]) -> Option<RowUuid> {
    conditions.iter().find_map(|condition| {
        if condition.column != UUID_COLUMN || condition.function != ConditionFunction::Equal {
            return None;
        }
        match Atom::from_wire(&BaseType::new(AtomKind::Uuid), &condition.value) {
            Ok(Atom::Uuid(uuid)) => Some(uuid),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::schema::DatabaseSchema;

    fn schema() -> DatabaseSchema {
        DatabaseSchema::from_json(&json!({
            "name": "db",
            "tables": {
                "T": {
                    "columns": {
                        "n": { "type": "integer" },
                        "label": { "type": "string" },
                        "flag": { "type": "boolean" },
                        "tags": {
                            "type": { "key": "string", "min": 0, "max": "unlimited" }
                        },
                        "attrs": {
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
        .expect("schema")
    }

    fn row() -> Row {
        Row::new(RowUuid::new("r1"))
            .with("n", 5i64)
            .with("label", "middle")
            .with("tags", Value::set(["a", "b"]))
            .with("attrs", Value::map([("k1", "v1"), ("k2", "v2")]))
    }

    fn eval(column: &str, function: ConditionFunction, value: serde_json::Value) -> bool {
        let schema = schema();
        let table = schema.table("T").expect("T");
        Condition::new(column, function, value)
            .matches(table, &row())
            .expect("evaluates")
    }

    #[test]
    fn scalar_ordering() {
        assert!(eval("n", ConditionFunction::Equal, json!(5)));
        assert!(eval("n", ConditionFunction::LessThan, json!(6)));
        assert!(eval("n", ConditionFunction::GreaterThanOrEqual, json!(5)));
        assert!(!eval("n", ConditionFunction::GreaterThan, json!(5)));
        assert!(eval("label", ConditionFunction::LessThan, json!("zz")));
    }

    #[test]
    fn boolean_ordering_is_invalid() {
        let schema = schema();
        let table = schema.table("T").expect("T");
        let err = Condition::new("flag", ConditionFunction::LessThan, json!(true))
            .matches(table, &row())
            .expect_err("boolean ordering");
        assert_eq!(err.code(), "constraint violation");
    }

    #[test]
    fn scalar_membership_is_invalid() {
        let schema = schema();
        let table = schema.table("T").expect("T");
        let err = Condition::new("n", ConditionFunction::Includes, json!(5))
            .matches(table, &row())
            .expect_err("scalar includes");
        assert_eq!(err.code(), "constraint violation");
    }

    #[test]
    fn set_membership() {
        assert!(eval("tags", ConditionFunction::Includes, json!("a")));
        assert!(eval("tags", ConditionFunction::Includes, json!(["set", ["a", "b"]])));
        assert!(!eval("tags", ConditionFunction::Includes, json!(["set", ["a", "c"]])));
        assert!(eval("tags", ConditionFunction::Excludes, json!("c")));
        assert!(!eval("tags", ConditionFunction::Excludes, json!(["set", ["c", "b"]])));
        assert!(eval("tags", ConditionFunction::Equal, json!(["set", ["b", "a"]])));
    }

    #[test]
    fn map_membership() {
        assert!(eval("attrs", ConditionFunction::Includes, json!(["map", [["k1", "v1"]]])));
        assert!(!eval("attrs", ConditionFunction::Includes, json!(["map", [["k1", "nope"]]])));
        assert!(eval("attrs", ConditionFunction::Excludes, json!(["map", [["k1", "nope"]]])));
        assert!(!eval("attrs", ConditionFunction::Excludes, json!(["map", [["k2", "v2"]]])));
    }

    #[test]
    fn empty_condition_list_matches_everything() {
        let schema = schema();
        let table = schema.table("T").expect("T");
        assert!(matches_all(&[], table, &row()).expect("matches"));
    }

    #[test]
    fn uuid_condition_and_fast_path() {
        let schema = schema();
        let table = schema.table("T").expect("T");
        let condition = Condition::uuid_equals(&RowUuid::new("r1"));
        assert!(condition.matches(table, &row()).expect("matches"));
        assert_eq!(uuid_fast_path(&[condition]), Some(RowUuid::new("r1")));
        assert_eq!(
            uuid_fast_path(&[Condition::new("n", ConditionFunction::Equal, json!(5))]),
            None
        );
    }

    #[test]
    fn wire_form_is_a_triple() {
        let condition = Condition::new("n", ConditionFunction::LessThanOrEqual, json!(4));
        let wire = serde_json::to_value(&condition).expect("serialize");
        assert_eq!(wire, json!(["n", "<=", 4]));
        let back: Condition = serde_json::from_value(wire).expect("deserialize");
        assert_eq!(back, condition);
    }
}
