//! Origin and archived metadata records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Domain, Kid};

/// Metadata for a kid that is either active or was only just rotated away.
///
/// `expires_at` is always `None` here; once a kid leaves the origin set it
/// becomes an [`ArchivedMeta`] instead of growing an expiry in place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginMeta {
    /// The key this record describes.
    pub kid: Kid,
    /// The domain owning the key.
    pub domain: Domain,
    /// When the key pair was minted.
    pub created_at: DateTime<Utc>,
}

/// Metadata for a kid that has been retired from active signing but is
/// still within its JWKS verification grace window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedMeta {
    /// The key this record describes.
    pub kid: Kid,
    /// The domain owning the key.
    pub domain: Domain,
    /// When the key pair was originally minted.
    pub created_at: DateTime<Utc>,
    /// `rotation time + KEY_PUBLIC_TTL_MS + KEY_GRACE_MS`. Once this passes,
    /// the public key and this record are eligible for garbage collection.
    pub expires_at: DateTime<Utc>,
}

impl ArchivedMeta {
    /// Returns `true` iff this entry's grace window has elapsed as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
