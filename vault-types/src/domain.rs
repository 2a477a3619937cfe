//! Tenant and key identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A tenant identifier.
///
/// Normalized to an upper-case, trimmed form so that lookups in the
/// [`RotationPolicyStore`](crate::RotationPolicyStore) are case-insensitive at
/// the caller's convenience. Two `Domain`s compare equal iff their normalized
/// forms match.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domain(String);

impl Domain {
    /// Builds a `Domain` from any string-like input, normalizing it.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_uppercase())
    }

    /// Returns the normalized string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Domain {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Domain {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Opaque key identifier, unique per domain by construction.
///
/// Constructed as `"<domain>-<YYYYMMDD>-<HHMMSS>-<8 hex chars>"`. Callers
/// outside of key minting should treat this as opaque.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kid(String);

impl Kid {
    /// Mints a new `Kid` for `domain` at the given timestamp, suffixed with
    /// `entropy` (8 lowercase hex chars expected, but not enforced here).
    pub fn mint(domain: &Domain, at: chrono::DateTime<chrono::Utc>, entropy: &str) -> Self {
        let stamp = at.format("%Y%m%d-%H%M%S");
        Self(format!("{}-{stamp}-{entropy}", domain.as_str()))
    }

    /// Wraps an already-formatted kid string as-is. Used when reading kids
    /// back from storage; does not re-validate the format.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the raw string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Kid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
