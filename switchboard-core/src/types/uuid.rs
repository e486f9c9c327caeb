//! Row identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The synthetic identifier of a row.
///
/// On the wire this is an RFC 4122 UUID string, but rows inserted in the
/// same transaction may be addressed by a client-chosen named UUID that is
/// not parseable as one, so the identifier is kept as an opaque string.
/// The encoder picks the `uuid` or `named-uuid` tag accordingly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowUuid(String);

impl RowUuid {
    /// Create a row identifier from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random (v4) identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the identifier parses as an RFC 4122 UUID.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        uuid::Uuid::parse_str(&self.0).is_ok()
    }
}

impl From<&str> for RowUuid {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RowUuid {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for RowUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
