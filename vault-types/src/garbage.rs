//! Garbage records: the durable trail left by the collector for the cleaner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Domain, Kid};

/// The four-way partition of kids eligible for removal from a single domain,
/// as computed by `DomainSnapshot::collect_garbage`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GarbageSet {
    /// Private keys safe to delete.
    pub private_keys: Vec<Kid>,
    /// Public keys safe to delete.
    pub public_keys: Vec<Kid>,
    /// Origin metadata records safe to delete.
    pub origin_meta: Vec<Kid>,
    /// Archived metadata records safe to delete.
    pub archived_meta: Vec<Kid>,
}

impl GarbageSet {
    /// Returns `true` iff every set is empty.
    pub fn is_empty(&self) -> bool {
        self.private_keys.is_empty()
            && self.public_keys.is_empty()
            && self.origin_meta.is_empty()
            && self.archived_meta.is_empty()
    }

    /// Sorts every inner vector by kid, for stable hashing and display.
    pub fn sorted(mut self) -> Self {
        self.private_keys.sort();
        self.public_keys.sort();
        self.origin_meta.sort();
        self.archived_meta.sort();
        self
    }
}

/// The lifecycle status of a [`GarbageRecord`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GarbageStatus {
    /// Collected, waiting for the cleaner.
    Pending,
    /// The cleaner is actively applying deletions (transient; stores may
    /// skip persisting this state and go straight to `Cleaned`/`Critical`).
    Cleaning,
    /// All garbage in the set was removed.
    Cleaned,
    /// The health gate tripped, or retries were exhausted; needs an
    /// operator to look at it.
    Critical,
}

/// A durable record of one domain's pending garbage, and the cleaner's
/// progress against it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GarbageRecord {
    /// Store-assigned identifier.
    pub id: i64,
    /// The domain this record is for. Unique per store.
    pub domain: Domain,
    /// The canonical snapshot hash this record was derived from.
    pub snapshot_hash: String,
    /// The kids eligible for removal.
    pub garbage_set: GarbageSet,
    /// Current lifecycle status.
    pub status: GarbageStatus,
    /// Number of times cleaning has failed with a thrown error.
    pub retries: u32,
    /// The most recent error message, if any.
    pub last_error: Option<String>,
    /// When the record was first created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

/// The threshold at which a cleaner record is escalated to `CRITICAL` after
/// repeated thrown errors (see §4.5/§9 of the design: partial-success
/// increments do not count toward this bound).
pub const MAX_CLEANER_RETRIES: u32 = 5;
