//! Column values and their wire encoding.
//!
//! A column value is either a single atom, a set of atoms, or a map between
//! atoms. The wire shape tags composites (`["set", …]`, `["map", …]`) and
//! references (`["uuid", …]` / `["named-uuid", …]`); a one-element set may
//! travel as the bare element, so decoding is always schema-driven.

use serde_json::json;

use crate::error::OperationError;
use crate::schema::{AtomKind, BaseType, ColumnKind, ColumnType};

use super::RowUuid;

/// A single atomic value.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit floating point number.
    Real(f64),
    /// Boolean value.
    Boolean(bool),
    /// UTF-8 string.
    String(String),
    /// Reference to a row, by UUID or in-transaction name.
    Uuid(RowUuid),
}

impl Atom {
    /// The kind of this atom.
    #[must_use]
    pub const fn kind(&self) -> AtomKind {
        match self {
            Self::Integer(_) => AtomKind::Integer,
            Self::Real(_) => AtomKind::Real,
            Self::Boolean(_) => AtomKind::Boolean,
            Self::String(_) => AtomKind::String,
            Self::Uuid(_) => AtomKind::Uuid,
        }
    }

    /// Returns the value as an integer if it is one.
    #[must_use]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the value as a real if it is one.
    #[must_use]
    pub const fn as_real(&self) -> Option<f64> {
        match self {
            Self::Real(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the value as a string slice if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as a row reference if it is one.
    #[must_use]
    pub const fn as_uuid(&self) -> Option<&RowUuid> {
        match self {
            Self::Uuid(u) => Some(u),
            _ => None,
        }
    }

    /// Encode this atom into its wire shape.
    #[must_use]
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            Self::Integer(n) => json!(n),
            Self::Real(f) => json!(f),
            Self::Boolean(b) => json!(b),
            Self::String(s) => json!(s),
            Self::Uuid(u) => {
                let tag = if u.is_well_formed() { "uuid" } else { "named-uuid" };
                json!([tag, u.as_str()])
            }
        }
    }

    /// Decode an atom of the given base type from its wire shape.
    ///
    /// # Errors
    ///
    /// Returns a constraint violation when the wire value does not have the
    /// shape the base type requires.
    pub fn from_wire(base: &BaseType, wire: &serde_json::Value) -> Result<Self, OperationError> {
        let mismatch = || {
            OperationError::constraint(format!(
                "expected value of type {}, got {wire}",
                base.kind.as_str()
            ))
        };
        match base.kind {
            AtomKind::Integer => wire.as_i64().map(Self::Integer).ok_or_else(mismatch),
            AtomKind::Real => wire.as_f64().map(Self::Real).ok_or_else(mismatch),
            AtomKind::Boolean => wire.as_bool().map(Self::Boolean).ok_or_else(mismatch),
            AtomKind::String => {
                wire.as_str().map(|s| Self::String(s.to_owned())).ok_or_else(mismatch)
            }
            AtomKind::Uuid => {
                if let Some(payload) =
                    tagged(wire, "uuid").or_else(|| tagged(wire, "named-uuid"))
                {
                    let id = payload.as_str().ok_or_else(mismatch)?;
                    return Ok(Self::Uuid(RowUuid::new(id)));
                }
                // Bare strings are tolerated on input; output is always tagged.
                wire.as_str().map(|s| Self::Uuid(RowUuid::new(s))).ok_or_else(mismatch)
            }
        }
    }
}

impl From<i64> for Atom {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<f64> for Atom {
    fn from(f: f64) -> Self {
        Self::Real(f)
    }
}

impl From<bool> for Atom {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<&str> for Atom {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Atom {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<RowUuid> for Atom {
    fn from(u: RowUuid) -> Self {
        Self::Uuid(u)
    }
}

/// A column value: a single atom, a set of atoms, or a map between atoms.
///
/// Sets are unordered and duplicate-free; two sets compare equal as
/// multisets. Maps are unordered with unique keys.
#[derive(Debug, Clone)]
pub enum Value {
    /// A scalar value.
    Atom(Atom),
    /// An unordered collection of atoms.
    Set(Vec<Atom>),
    /// An unordered mapping with unique keys.
    Map(Vec<(Atom, Atom)>),
}

impl Value {
    /// Build a set value from anything yielding atoms.
    #[must_use]
    pub fn set<I, A>(atoms: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Atom>,
    {
        let mut elements: Vec<Atom> = Vec::new();
        for atom in atoms {
            let atom = atom.into();
            if !elements.contains(&atom) {
                elements.push(atom);
            }
        }
        Self::Set(elements)
    }

    /// Build a map value from anything yielding key-value pairs.
    ///
    /// Later duplicate keys are ignored.
    #[must_use]
    pub fn map<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Atom>,
        V: Into<Atom>,
    {
        let mut entries: Vec<(Atom, Atom)> = Vec::new();
        for (k, v) in pairs {
            let k = k.into();
            if !entries.iter().any(|(existing, _)| *existing == k) {
                entries.push((k, v.into()));
            }
        }
        Self::Map(entries)
    }

    /// Returns the value as a single atom if it is one.
    #[must_use]
    pub const fn as_atom(&self) -> Option<&Atom> {
        match self {
            Self::Atom(a) => Some(a),
            _ => None,
        }
    }

    /// Returns the set elements if this is a set.
    #[must_use]
    pub fn as_set(&self) -> Option<&[Atom]> {
        match self {
            Self::Set(elements) => Some(elements),
            _ => None,
        }
    }

    /// Returns the map entries if this is a map.
    #[must_use]
    pub fn as_map(&self) -> Option<&[(Atom, Atom)]> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// The number of elements in a composite, or 1 for an atom.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Atom(_) => 1,
            Self::Set(elements) => elements.len(),
            Self::Map(entries) => entries.len(),
        }
    }

    /// Returns `true` if this is an empty composite.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Atom(_) => false,
            Self::Set(elements) => elements.is_empty(),
            Self::Map(entries) => entries.is_empty(),
        }
    }

    /// Encode this value into its wire shape.
    ///
    /// A one-element set is emitted as the bare element; decoders accept
    /// both shapes.
    #[must_use]
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            Self::Atom(a) => a.to_wire(),
            Self::Set(elements) => {
                if elements.len() == 1 {
                    elements[0].to_wire()
                } else {
                    json!(["set", elements.iter().map(Atom::to_wire).collect::<Vec<_>>()])
                }
            }
            Self::Map(entries) => json!([
                "map",
                entries
                    .iter()
                    .map(|(k, v)| json!([k.to_wire(), v.to_wire()]))
                    .collect::<Vec<_>>()
            ]),
        }
    }

    /// Decode a value of the given column type from its wire shape.
    ///
    /// # Errors
    ///
    /// Returns a constraint violation when the wire shape does not fit the
    /// column type.
    pub fn from_wire(ty: &ColumnType, wire: &serde_json::Value) -> Result<Self, OperationError> {
        match ty.kind() {
            ColumnKind::Atom => {
                // Tolerate the tagged one-element set shape for scalars.
                if let Some(payload) = tagged(wire, "set") {
                    let elements = payload.as_array().ok_or_else(|| {
                        OperationError::constraint(format!("malformed set value {wire}"))
                    })?;
                    if elements.len() == 1 {
                        return Atom::from_wire(&ty.key, &elements[0]).map(Self::Atom);
                    }
                    return Err(OperationError::constraint(format!(
                        "expected scalar value, got a {}-element set",
                        elements.len()
                    )));
                }
                Atom::from_wire(&ty.key, wire).map(Self::Atom)
            }
            ColumnKind::Set => {
                if let Some(payload) = tagged(wire, "set") {
                    let elements = payload.as_array().ok_or_else(|| {
                        OperationError::constraint(format!("malformed set value {wire}"))
                    })?;
                    let mut set: Vec<Atom> = Vec::with_capacity(elements.len());
                    for element in elements {
                        let atom = Atom::from_wire(&ty.key, element)?;
                        if !set.contains(&atom) {
                            set.push(atom);
                        }
                    }
                    return Ok(Self::Set(set));
                }
                // A bare element is a one-element set.
                Atom::from_wire(&ty.key, wire).map(|atom| Self::Set(vec![atom]))
            }
            ColumnKind::Map => {
                let value_base = ty.value.as_ref().ok_or_else(|| {
                    OperationError::internal("map column without a value type")
                })?;
                let payload = tagged(wire, "map").ok_or_else(|| {
                    OperationError::constraint(format!("expected map value, got {wire}"))
                })?;
                let pairs = payload.as_array().ok_or_else(|| {
                    OperationError::constraint(format!("malformed map value {wire}"))
                })?;
                let mut entries: Vec<(Atom, Atom)> = Vec::with_capacity(pairs.len());
                for pair in pairs {
                    let kv = pair.as_array().filter(|kv| kv.len() == 2).ok_or_else(|| {
                        OperationError::constraint(format!("malformed map entry {pair}"))
                    })?;
                    let key = Atom::from_wire(&ty.key, &kv[0])?;
                    let value = Atom::from_wire(value_base, &kv[1])?;
                    if entries.iter().any(|(existing, _)| *existing == key) {
                        return Err(OperationError::constraint(format!(
                            "duplicate map key {}",
                            kv[0]
                        )));
                    }
                    entries.push((key, value));
                }
                Ok(Self::Map(entries))
            }
        }
    }

    /// A stable, order-insensitive rendering used to key index maps.
    ///
    /// Two values that compare equal render identically; set elements and
    /// map entries are sorted by their encoded form.
    #[must_use]
    pub fn index_key(&self) -> String {
        match self {
            Self::Atom(a) => a.to_wire().to_string(),
            Self::Set(elements) => {
                let mut rendered: Vec<String> =
                    elements.iter().map(|a| a.to_wire().to_string()).collect();
                rendered.sort_unstable();
                format!("set[{}]", rendered.join(","))
            }
            Self::Map(entries) => {
                let mut rendered: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}:{}", k.to_wire(), v.to_wire()))
                    .collect();
                rendered.sort_unstable();
                format!("map[{}]", rendered.join(","))
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Atom(a), Self::Atom(b)) => a == b,
            (Self::Set(a), Self::Set(b)) => multiset_eq(a, b),
            (Self::Map(a), Self::Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.iter().any(|(bk, bv)| bk == k && bv == v)
                    })
            }
            _ => false,
        }
    }
}

impl From<Atom> for Value {
    fn from(atom: Atom) -> Self {
        Self::Atom(atom)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Atom(Atom::Integer(n))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Atom(Atom::Real(f))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Atom(Atom::Boolean(b))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Atom(Atom::String(s.to_owned()))
    }
}

impl From<RowUuid> for Value {
    fn from(u: RowUuid) -> Self {
        Self::Atom(Atom::Uuid(u))
    }
}

/// Multiset equality over set elements.
fn multiset_eq(a: &[Atom], b: &[Atom]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut rest: Vec<&Atom> = b.iter().collect();
    for atom in a {
        match rest.iter().position(|candidate| *candidate == atom) {
            Some(i) => {
                rest.swap_remove(i);
            }
            None => return false,
        }
    }
    true
}

/// Returns the payload of a `[tag, payload]` wire pair, if `wire` is one.
fn tagged<'a>(wire: &'a serde_json::Value, tag: &str) -> Option<&'a serde_json::Value> {
    let pair = wire.as_array()?;
    if pair.len() == 2 && pair[0].as_str() == Some(tag) {
        Some(&pair[1])
    } else {
        None
    }
}
