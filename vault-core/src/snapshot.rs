//! Immutable per-domain view of the key universe, and the pure garbage rules
//! derived from it.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use vault_types::{Domain, GarbageSet, Kid};

/// A point-in-time materialisation of every kid-indexed fact for one domain.
///
/// Built fresh by the collector and cleaner before each decision; never
/// mutated in place. All garbage computation and health checks are pure
/// functions over this type, so they can be unit-tested without any store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainSnapshot {
    domain: Domain,
    active_kid: Option<Kid>,
    private_keys: BTreeSet<Kid>,
    public_keys: BTreeSet<Kid>,
    origin_meta: BTreeSet<Kid>,
    archived_meta: BTreeMap<Kid, DateTime<Utc>>,
}

impl DomainSnapshot {
    /// Builds a snapshot from its raw constituent sets. Used by the code
    /// that assembles a snapshot from store reads (see `SnapshotBuilder` in
    /// `vault-stores`) and directly by tests.
    pub fn new(
        domain: Domain,
        active_kid: Option<Kid>,
        private_keys: BTreeSet<Kid>,
        public_keys: BTreeSet<Kid>,
        origin_meta: BTreeSet<Kid>,
        archived_meta: BTreeMap<Kid, DateTime<Utc>>,
    ) -> Self {
        Self {
            domain,
            active_kid,
            private_keys,
            public_keys,
            origin_meta,
            archived_meta,
        }
    }

    /// The domain this snapshot describes.
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// The currently active signing kid, if any key has ever been minted.
    pub fn active_kid(&self) -> Option<&Kid> {
        self.active_kid.as_ref()
    }

    /// Computes the garbage eligible for removal as of `now`.
    ///
    /// Deterministic and store-free: the four-way partition described by the
    /// design's garbage rules.
    pub fn collect_garbage(&self, now: DateTime<Utc>) -> GarbageSet {
        let private_keys = self
            .private_keys
            .iter()
            .filter(|k| Some(*k) != self.active_kid.as_ref())
            .cloned()
            .collect();

        let origin_meta = self
            .origin_meta
            .iter()
            .filter(|k| Some(*k) != self.active_kid.as_ref())
            .cloned()
            .collect();

        let archived_meta: Vec<Kid> = self
            .archived_meta
            .iter()
            .filter(|(_, expires_at)| **expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        let archived_expired: BTreeSet<&Kid> = archived_meta.iter().collect();

        let public_keys = self
            .public_keys
            .iter()
            .filter(|k| {
                let is_active = Some(*k) == self.active_kid.as_ref();
                let in_origin = self.origin_meta.contains(*k);
                let in_archived = self.archived_meta.contains_key(*k);
                let archived_and_expired = archived_expired.contains(k);
                (!is_active && !in_origin && !in_archived) || archived_and_expired
            })
            .cloned()
            .collect();

        GarbageSet {
            private_keys,
            public_keys,
            origin_meta,
            archived_meta,
        }
        .sorted()
    }

    /// Returns a clone of `self` with every kid in `garbage` subtracted from
    /// the matching set. Pure; performs no store calls.
    pub fn simulate_cleanup(&self, garbage: &GarbageSet) -> DomainSnapshot {
        let mut simulated = self.clone();
        for kid in &garbage.private_keys {
            simulated.private_keys.remove(kid);
        }
        for kid in &garbage.public_keys {
            simulated.public_keys.remove(kid);
        }
        for kid in &garbage.origin_meta {
            simulated.origin_meta.remove(kid);
        }
        for kid in &garbage.archived_meta {
            simulated.archived_meta.remove(kid);
        }
        simulated
    }

    /// Evaluates the six global invariants against this snapshot as of `now`.
    ///
    /// Call on the *simulated* post-cleanup snapshot, never the live one —
    /// the cleaner's health gate is the system's primary safety invariant.
    pub fn is_healthy(&self, now: DateTime<Utc>) -> bool {
        // An absent active kid is unhealthy by definition, not merely
        // vacuously fine: a domain with no signing key cannot serve sign().
        let Some(active) = &self.active_kid else {
            return false;
        };

        // 1. activeKid exists => private, public, origin-meta all contain it.
        if !(self.private_keys.contains(active)
            && self.public_keys.contains(active)
            && self.origin_meta.contains(active))
        {
            return false;
        }

        // 2. every origin-meta kid has both private and public key files.
        for kid in &self.origin_meta {
            if !self.private_keys.contains(kid) || !self.public_keys.contains(kid) {
                return false;
            }
        }

        // 3. every archived-meta kid has a public key and no private key.
        for kid in self.archived_meta.keys() {
            if !self.public_keys.contains(kid) || self.private_keys.contains(kid) {
                return false;
            }
        }

        // 4. |publicKeys| == |originMeta| + |archivedMeta|.
        if self.public_keys.len() != self.origin_meta.len() + self.archived_meta.len() {
            return false;
        }

        // 5. a kid is in exactly one of {originMeta, archivedMeta}.
        for kid in &self.origin_meta {
            if self.archived_meta.contains_key(kid) {
                return false;
            }
        }

        // 6. no archived-meta kid has already expired.
        self.has_no_expired_archived(now)
    }

    /// Evaluates invariant 6 against a reference instant — archived entries
    /// may be legitimately expired between a collector pass and a cleaner
    /// pass, so `is_healthy` takes `now` rather than assuming the present.
    pub fn has_no_expired_archived(&self, now: DateTime<Utc>) -> bool {
        self.archived_meta.values().all(|expires_at| *expires_at > now)
    }

    /// Produces a stable, order-independent serialization suitable for
    /// hashing: sorted kid lists, ISO-8601 timestamps. Any divergence here
    /// destroys the idempotence of the collector (see design notes).
    pub fn canonicalize(&self) -> String {
        let mut private: Vec<&str> = self.private_keys.iter().map(Kid::as_str).collect();
        private.sort_unstable();
        let mut public: Vec<&str> = self.public_keys.iter().map(Kid::as_str).collect();
        public.sort_unstable();
        let mut origin: Vec<&str> = self.origin_meta.iter().map(Kid::as_str).collect();
        origin.sort_unstable();
        let mut archived: Vec<(&str, String)> = self
            .archived_meta
            .iter()
            .map(|(k, v)| (k.as_str(), v.to_rfc3339()))
            .collect();
        archived.sort_unstable_by(|a, b| a.0.cmp(b.0));

        serde_json::json!({
            "domain": self.domain.as_str(),
            "activeKid": self.active_kid.as_ref().map(Kid::as_str),
            "privateKeys": private,
            "publicKeys": public,
            "originMeta": origin,
            "archivedMeta": archived,
        })
        .to_string()
    }
}
