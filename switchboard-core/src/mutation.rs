//! Typed in-place column mutations.
//!
//! A mutation is a `(column, mutator, argument)` triple: arithmetic over
//! numeric scalars, membership operations over sets and maps. On the wire a
//! mutation is a 3-element array.

use serde::{Deserialize, Serialize};

use crate::error::OperationError;
use crate::schema::{ColumnKind, ColumnType, Limit, TableSchema};
use crate::types::{Atom, Value};

/// The operator applied by a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutator {
    /// Add the argument to a numeric scalar.
    #[serde(rename = "+=")]
    Add,
    /// Subtract the argument from a numeric scalar.
    #[serde(rename = "-=")]
    Subtract,
    /// Multiply a numeric scalar by the argument.
    #[serde(rename = "*=")]
    Multiply,
    /// Divide a numeric scalar by the argument.
    #[serde(rename = "/=")]
    Divide,
    /// Reduce a numeric scalar modulo the argument.
    #[serde(rename = "%=")]
    Modulo,
    /// Union elements into a set, or add absent keys to a map.
    #[serde(rename = "insert")]
    Insert,
    /// Remove elements from a set, or keys (or exact pairs) from a map.
    #[serde(rename = "delete")]
    Delete,
}

/// A single column mutation.
///
/// The argument is kept in wire form and decoded against the column schema
/// when the mutation is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    /// The column the mutation applies to.
    pub column: String,
    /// The operator.
    pub mutator: Mutator,
    /// The wire-form argument.
    pub value: serde_json::Value,
}

impl Mutation {
    /// Create a mutation.
    #[must_use]
    pub fn new(
        column: impl Into<String>,
        mutator: Mutator,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self { column: column.into(), mutator, value: value.into() }
    }

    /// Apply this mutation to the current value of its column, producing
    /// the new value.
    ///
    /// # Errors
    ///
    /// - `constraint violation` for unknown or immutable columns, operator
    ///   and column-kind mismatches, argument type mismatches, enum
    ///   violations, and composite size bounds.
    /// - `domain error` for division or modulo by zero.
    /// - `range error` for integer overflow.
    pub fn apply(&self, schema: &TableSchema, current: &Value) -> Result<Value, OperationError> {
        let column_schema = schema.column(&self.column).ok_or_else(|| {
            OperationError::constraint(format!("no column {:?} in table", self.column))
        })?;
        if !column_schema.mutable {
            return Err(OperationError::constraint(format!(
                "column {:?} is not mutable",
                self.column
            )));
        }
        let ty = &column_schema.column_type;
        let new = match (self.mutator, ty.kind()) {
            (
                Mutator::Add | Mutator::Subtract | Mutator::Multiply | Mutator::Divide
                | Mutator::Modulo,
                ColumnKind::Atom,
            ) => self.apply_arithmetic(ty, current)?,
            (Mutator::Insert | Mutator::Delete, ColumnKind::Set) => {
                self.apply_set(ty, current)?
            }
            (Mutator::Insert | Mutator::Delete, ColumnKind::Map) => {
                self.apply_map(ty, current)?
            }
            (mutator, kind) => {
                return Err(OperationError::constraint(format!(
                    "mutator {mutator:?} cannot be applied to {kind:?} column {:?}",
                    self.column
                )));
            }
        };
        column_schema.validate(&self.column, &new)?;
        Ok(new)
    }

    fn apply_arithmetic(
        &self,
        ty: &ColumnType,
        current: &Value,
    ) -> Result<Value, OperationError> {
        if ty.key.enum_values.is_some() {
            return Err(OperationError::constraint(format!(
                "arithmetic on enum column {:?}",
                self.column
            )));
        }
        let argument = Atom::from_wire(&ty.key, &self.value)?;
        let current = current.as_atom().ok_or_else(|| {
            OperationError::internal(format!("scalar column {:?} holds a composite", self.column))
        })?;
        match (current, &argument) {
            (Atom::Integer(a), Atom::Integer(b)) => {
                self.integer_arithmetic(*a, *b).map(Value::from)
            }
            (Atom::Real(a), Atom::Real(b)) => self.real_arithmetic(*a, *b).map(Value::from),
            _ => Err(OperationError::constraint(format!(
                "arithmetic on non-numeric column {:?}",
                self.column
            ))),
        }
    }

    fn integer_arithmetic(&self, a: i64, b: i64) -> Result<i64, OperationError> {
        let overflow =
            || OperationError::range(format!("integer overflow mutating column {:?}", self.column));
        match self.mutator {
            Mutator::Add => a.checked_add(b).ok_or_else(overflow),
            Mutator::Subtract => a.checked_sub(b).ok_or_else(overflow),
            Mutator::Multiply => a.checked_mul(b).ok_or_else(overflow),
            Mutator::Divide => {
                if b == 0 {
                    return Err(OperationError::domain(format!(
                        "division by zero mutating column {:?}",
                        self.column
                    )));
                }
                a.checked_div(b).ok_or_else(overflow)
            }
            Mutator::Modulo => {
                if b == 0 {
                    return Err(OperationError::domain(format!(
                        "modulo by zero mutating column {:?}",
                        self.column
                    )));
                }
                a.checked_rem(b).ok_or_else(overflow)
            }
            Mutator::Insert | Mutator::Delete => Err(OperationError::internal(
                "membership mutator dispatched to arithmetic",
            )),
        }
    }

    fn real_arithmetic(&self, a: f64, b: f64) -> Result<f64, OperationError> {
        match self.mutator {
            Mutator::Add => Ok(a + b),
            Mutator::Subtract => Ok(a - b),
            Mutator::Multiply => Ok(a * b),
            Mutator::Divide | Mutator::Modulo => {
                if b == 0.0 {
                    return Err(OperationError::domain(format!(
                        "division by zero mutating column {:?}",
                        self.column
                    )));
                }
                Ok(if self.mutator == Mutator::Divide { a / b } else { a % b })
            }
            Mutator::Insert | Mutator::Delete => Err(OperationError::internal(
                "membership mutator dispatched to arithmetic",
            )),
        }
    }

    fn apply_set(&self, ty: &ColumnType, current: &Value) -> Result<Value, OperationError> {
        let argument = match Value::from_wire(ty, &self.value)? {
            Value::Set(elements) => elements,
            _ => {
                return Err(OperationError::internal(
                    "set column argument decoded to a non-set",
                ));
            }
        };
        let mut elements = current.as_set().map(<[Atom]>::to_vec).ok_or_else(|| {
            OperationError::internal(format!("set column {:?} holds a non-set", self.column))
        })?;
        match self.mutator {
            Mutator::Insert => {
                for atom in argument {
                    if !elements.contains(&atom) {
                        elements.push(atom);
                    }
                }
            }
            Mutator::Delete => {
                elements.retain(|atom| !argument.contains(atom));
            }
            _ => {
                return Err(OperationError::internal(
                    "arithmetic mutator dispatched to set",
                ));
            }
        }
        Ok(Value::Set(elements))
    }

    fn apply_map(&self, ty: &ColumnType, current: &Value) -> Result<Value, OperationError> {
        let mut entries = current.as_map().map(<[(Atom, Atom)]>::to_vec).ok_or_else(|| {
            OperationError::internal(format!("map column {:?} holds a non-map", self.column))
        })?;
        match self.mutator {
            Mutator::Insert => {
                let argument = match Value::from_wire(ty, &self.value)? {
                    Value::Map(pairs) => pairs,
                    _ => {
                        return Err(OperationError::internal(
                            "map column argument decoded to a non-map",
                        ));
                    }
                };
                // Insertion never overwrites an existing key.
                for (key, value) in argument {
                    if !entries.iter().any(|(existing, _)| *existing == key) {
                        entries.push((key, value));
                    }
                }
            }
            Mutator::Delete => {
                if is_wire_map(&self.value) {
                    // A map argument removes exact key-value matches only.
                    let argument = match Value::from_wire(ty, &self.value)? {
                        Value::Map(pairs) => pairs,
                        _ => {
                            return Err(OperationError::internal(
                                "map column argument decoded to a non-map",
                            ));
                        }
                    };
                    entries.retain(|(k, v)| {
                        !argument.iter().any(|(ak, av)| ak == k && av == v)
                    });
                } else {
                    // A set-of-keys argument removes by key.
                    let key_set = ColumnType {
                        key: ty.key.clone(),
                        value: None,
                        min: 0,
                        max: Limit::Unlimited,
                    };
                    let keys = match Value::from_wire(&key_set, &self.value)? {
                        Value::Set(keys) => keys,
                        _ => {
                            return Err(OperationError::internal(
                                "key-set argument decoded to a non-set",
                            ));
                        }
                    };
                    entries.retain(|(k, _)| !keys.contains(k));
                }
            }
            _ => {
                return Err(OperationError::internal(
                    "arithmetic mutator dispatched to map",
                ));
            }
        }
        Ok(Value::Map(entries))
    }
}

impl Serialize for Mutation {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.column, &self.mutator, &self.value).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Mutation {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (column, mutator, value) =
            <(String, Mutator, serde_json::Value)>::deserialize(deserializer)?;
        Ok(Self { column, mutator, value })
    }
}

/// Returns `true` if the wire value has the tagged `["map", …]` shape.
fn is_wire_map(wire: &serde_json::Value) -> bool {
    wire.as_array()
        .is_some_and(|pair| pair.len() == 2 && pair[0].as_str() == Some("map"))
}
