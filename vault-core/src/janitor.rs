//! Destructive operations over stores, with cache invalidation ordered so a
//! failed write never leaves a cache pointing at deleted state.

use std::sync::Arc;

use tracing::instrument;
use vault_types::{Domain, Kid};

use crate::{error::StoreError, key_manager::KeyManager, stores::Stores};

/// Executes deletions against the stores, invalidating the key manager's
/// caches only after the source-of-truth write has succeeded.
pub struct Janitor {
    stores: Stores,
    key_manager: Arc<KeyManager>,
}

impl Janitor {
    /// Builds a `Janitor` over `stores`, invalidating `key_manager`'s caches
    /// on every delete that could have been cached.
    pub fn new(stores: Stores, key_manager: Arc<KeyManager>) -> Self {
        Self { stores, key_manager }
    }

    /// Deletes the private key for `kid`, then drops the key manager's
    /// cached `CryptoKey` for `domain` (it may have held exactly this key).
    #[instrument(level = "debug", skip(self))]
    pub async fn delete_private(&self, domain: &Domain, kid: &Kid) -> Result<(), StoreError> {
        self.stores.keys.delete_private(domain, kid).await?;
        self.key_manager.clear_cache(Some(domain));
        Ok(())
    }

    /// Deletes the public key for `kid`, then best-effort removes its JWKS
    /// entry.
    #[instrument(level = "debug", skip(self))]
    pub async fn delete_public(&self, domain: &Domain, kid: &Kid) -> Result<(), StoreError> {
        self.stores.keys.delete_public(domain, kid).await?;
        if let Err(err) = self.stores.jwks.delete(kid).await {
            tracing::warn!(%kid, %err, "failed to remove jwks entry for deleted public key");
        }
        Ok(())
    }

    /// Deletes origin metadata for `kid`.
    pub async fn delete_origin_metadata(&self, domain: &Domain, kid: &Kid) -> Result<(), StoreError> {
        self.stores.metadata.delete_origin(domain, kid).await
    }

    /// Deletes archived metadata for `kid`.
    pub async fn delete_archived_metadata(&self, kid: &Kid) -> Result<(), StoreError> {
        self.stores.metadata.delete_archive(kid).await
    }

    /// Removes every archived-meta entry (and its public key) whose
    /// `expiresAt` has passed for `domain`. Driven by the
    /// [`crate::ExpiredKeyReaper`]'s schedule, independent of the
    /// collector/cleaner pipeline.
    #[instrument(level = "info", skip(self), fields(domain = %domain))]
    pub async fn clean_domain(&self, domain: &Domain, now: chrono::DateTime<chrono::Utc>) -> Result<usize, StoreError> {
        let archived = self.stores.metadata.list_archived_metas(domain).await?;
        let mut cleaned = 0;
        for meta in archived.into_iter().filter(|m| m.is_expired(now)) {
            self.delete_public(domain, &meta.kid).await?;
            self.delete_archived_metadata(&meta.kid).await?;
            cleaned += 1;
        }
        Ok(cleaned)
    }
}
