//! Capability traits the core depends on. Concrete implementations live in
//! `vault-stores`; the core only ever sees these ports.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vault_types::{ArchivedMeta, Domain, GarbageRecord, GarbageSet, Jwk, Kid, OriginMeta, RotationPolicy};

use crate::error::StoreError;

/// Key material persistence: PEM blobs for private/public keys.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Lists every private-key kid currently stored for `domain`.
    async fn list_private_kids(&self, domain: &Domain) -> Result<Vec<Kid>, StoreError>;
    /// Lists every public-key kid currently stored for `domain`.
    async fn list_public_kids(&self, domain: &Domain) -> Result<Vec<Kid>, StoreError>;
    /// Loads the PKCS#8 PEM for `kid`, if present.
    async fn load_private(&self, domain: &Domain, kid: &Kid) -> Result<Option<String>, StoreError>;
    /// Loads the SPKI PEM for `kid`, if present.
    async fn load_public(&self, domain: &Domain, kid: &Kid) -> Result<Option<String>, StoreError>;
    /// Persists a freshly minted key pair (mode 0600 private / 0644 public
    /// where the backend has a notion of file permissions).
    async fn save(
        &self,
        domain: &Domain,
        kid: &Kid,
        public_pem: &str,
        private_pem: &str,
    ) -> Result<(), StoreError>;
    /// Deletes the private key for `kid`. Idempotent: deleting an absent kid
    /// is not an error.
    async fn delete_private(&self, domain: &Domain, kid: &Kid) -> Result<(), StoreError>;
    /// Deletes the public key for `kid`. Idempotent.
    async fn delete_public(&self, domain: &Domain, kid: &Kid) -> Result<(), StoreError>;
}

/// Optional capability: stores that accumulate temporary files during writes
/// (e.g. a filesystem backend using write-then-rename) may expose best-effort
/// cleanup of residue from interrupted writes.
#[async_trait]
pub trait TmpResidueCleaner: Send + Sync {
    /// Removes any leftover temporary files. Best-effort; failures are
    /// logged by the caller and never propagated.
    async fn clean_tmp_residue(&self) -> Result<(), StoreError>;
}

/// Origin/archived metadata persistence.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Writes (or overwrites) the origin metadata for a kid.
    async fn write_origin(&self, meta: &OriginMeta) -> Result<(), StoreError>;
    /// Reads origin metadata for `kid`, if present.
    async fn read_origin(&self, domain: &Domain, kid: &Kid) -> Result<Option<OriginMeta>, StoreError>;
    /// Deletes origin metadata for `kid`. Idempotent.
    async fn delete_origin(&self, domain: &Domain, kid: &Kid) -> Result<(), StoreError>;
    /// Writes (or overwrites) the archived metadata for a kid.
    async fn write_archive(&self, meta: &ArchivedMeta) -> Result<(), StoreError>;
    /// Reads archived metadata for `kid`, if present.
    async fn read_archive(&self, kid: &Kid) -> Result<Option<ArchivedMeta>, StoreError>;
    /// Deletes archived metadata for `kid`. Idempotent.
    async fn delete_archive(&self, kid: &Kid) -> Result<(), StoreError>;
    /// Lists every kid with origin metadata in `domain`.
    async fn list_origin_kids(&self, domain: &Domain) -> Result<Vec<Kid>, StoreError>;
    /// Lists every archived-metadata record for `domain`.
    async fn list_archived_metas(&self, domain: &Domain) -> Result<Vec<ArchivedMeta>, StoreError>;
}

/// JWKS publication side-table, kept in sync by the janitor alongside key
/// deletion. Best-effort: a miss here does not fail a deletion.
#[async_trait]
pub trait JwksStore: Send + Sync {
    /// Inserts or replaces the JWK for `jwk.kid`.
    async fn upsert(&self, jwk: &Jwk) -> Result<(), StoreError>;
    /// Looks up the JWK for `kid`, if present.
    async fn find(&self, kid: &Kid) -> Result<Option<Jwk>, StoreError>;
    /// Deletes the JWK for `kid`. Idempotent.
    async fn delete(&self, kid: &Kid) -> Result<(), StoreError>;
}

/// The durable trail between the collector and the cleaner.
#[async_trait]
pub trait GarbageStore: Send + Sync {
    /// Returns every record with status `PENDING`, across all domains.
    async fn find_pending(&self) -> Result<Vec<GarbageRecord>, StoreError>;
    /// Returns the `PENDING` record for `domain`, if any (unique per domain).
    async fn find_pending_by_domain(&self, domain: &Domain) -> Result<Option<GarbageRecord>, StoreError>;
    /// Creates a new `PENDING` record, or overwrites the existing one for
    /// this domain (unique on `domain`).
    async fn create(
        &self,
        domain: &Domain,
        snapshot_hash: &str,
        garbage_set: &GarbageSet,
    ) -> Result<(), StoreError>;
    /// Marks a record `CLEANED`.
    async fn mark_cleaned(&self, id: i64) -> Result<(), StoreError>;
    /// Marks a record `CRITICAL`, recording `reason`.
    async fn mark_critical(&self, id: i64, reason: &str) -> Result<(), StoreError>;
    /// Increments `retries`, recording `reason` as `lastError`.
    async fn increment_retry(&self, id: i64, reason: &str) -> Result<(), StoreError>;
}

/// Rotation policy CRUD plus the domain enumeration used by the scheduler.
#[async_trait]
pub trait RotationPolicyStore: Send + Sync {
    /// Returns every domain currently enabled for scheduled rotation/GC.
    async fn get_available_domains(&self) -> Result<Vec<Domain>, StoreError>;
    /// Reads the policy for `domain`, if one has been created.
    async fn get(&self, domain: &Domain) -> Result<Option<RotationPolicy>, StoreError>;
    /// Creates or replaces the policy for `domain`.
    async fn put(&self, policy: &RotationPolicy) -> Result<(), StoreError>;
}

/// Short-lived, per-domain distributed lease used to serialise rotation
/// against garbage-collection writes.
#[async_trait]
pub trait RotationLock: Send + Sync {
    /// Attempts to acquire the lock for `domain` for `ttl_secs` seconds.
    /// Returns an opaque token on success, `None` if already held (NX+EX
    /// semantics) — this is a signal to skip, not an error.
    async fn acquire(&self, domain: &Domain, ttl_secs: u64) -> Result<Option<String>, StoreError>;
    /// Releases the lock, but only if `token` still matches the current
    /// holder (compare-and-delete). A non-owner release is a silent no-op.
    async fn release(&self, domain: &Domain, token: &str) -> Result<(), StoreError>;
}

/// Bundles the five store ports a [`crate::KeyManager`] needs, so call sites
/// pass one value instead of five `Arc`s.
#[derive(Clone)]
pub struct Stores {
    /// Key material (private/public PEM) persistence.
    pub keys: Arc<dyn KeyStore>,
    /// Origin/archived metadata persistence.
    pub metadata: Arc<dyn MetadataStore>,
    /// JWKS side-table.
    pub jwks: Arc<dyn JwksStore>,
    /// Garbage collector/cleaner trail.
    pub garbage: Arc<dyn GarbageStore>,
    /// Rotation policy CRUD.
    pub policies: Arc<dyn RotationPolicyStore>,
    /// Distributed rotation lock.
    pub lock: Arc<dyn RotationLock>,
    /// Optional write-residue cleanup capability, if the key store exposes it.
    pub tmp_residue_cleaner: Option<Arc<dyn TmpResidueCleaner>>,
}

/// Assembles a [`crate::snapshot::DomainSnapshot`] by reading every store for
/// one domain. The only place the core crosses from "ports" back into a
/// concrete, consistent point-in-time view.
pub struct SnapshotBuilder;

impl SnapshotBuilder {
    /// Reads `domain`'s full key/metadata universe from `stores` and
    /// assembles a [`crate::snapshot::DomainSnapshot`].
    pub async fn build(
        stores: &Stores,
        domain: &Domain,
    ) -> Result<crate::snapshot::DomainSnapshot, StoreError> {
        let private_keys = stores.keys.list_private_kids(domain).await?;
        let public_keys = stores.keys.list_public_kids(domain).await?;
        let origin_meta = stores.metadata.list_origin_kids(domain).await?;
        let archived = stores.metadata.list_archived_metas(domain).await?;
        let policy = stores.policies.get(domain).await?;
        let active_kid = policy.and_then(|p| p.active_kid);

        let archived_meta = archived
            .into_iter()
            .map(|meta| (meta.kid, meta.expires_at))
            .collect();

        Ok(crate::snapshot::DomainSnapshot::new(
            domain.clone(),
            active_kid,
            private_keys.into_iter().collect(),
            public_keys.into_iter().collect(),
            origin_meta.into_iter().collect(),
            archived_meta,
        ))
    }
}

/// Helper used by the cleaner/collector to fetch "now" consistently.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}
