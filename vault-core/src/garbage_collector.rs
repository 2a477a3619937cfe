//! Periodic scan that derives each domain's garbage set and records it.

use std::sync::Arc;

use tracing::instrument;
use vault_crypto::CryptoEngine;

use crate::{
    constants::DEFAULT_LOCK_TTL_SECS,
    stores::{SnapshotBuilder, Stores, now},
};

/// Advisory background pass: never blocks rotation, never propagates errors
/// past a single domain.
pub struct GarbageCollector {
    stores: Stores,
    crypto: Arc<dyn CryptoEngine>,
    lock_ttl_secs: u64,
}

impl GarbageCollector {
    /// Builds a collector over `stores`, using `crypto` only for its
    /// canonical-hash function.
    pub fn new(stores: Stores, crypto: Arc<dyn CryptoEngine>) -> Self {
        Self {
            stores,
            crypto,
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
        }
    }

    /// Runs one pass over every domain returned by
    /// `RotationPolicyStore::get_available_domains`. Errors for an
    /// individual domain are logged and swallowed — the collector must
    /// never break rotation.
    #[instrument(level = "info", skip(self))]
    pub async fn run_once(&self) {
        let domains = match self.stores.policies.get_available_domains().await {
            Ok(domains) => domains,
            Err(err) => {
                tracing::warn!(%err, "garbage collector could not enumerate domains");
                return;
            }
        };

        for domain in domains {
            if let Err(err) = self.collect_domain(&domain).await {
                tracing::warn!(%domain, %err, "garbage collector pass failed for domain");
            }
        }
    }

    async fn collect_domain(&self, domain: &vault_types::Domain) -> eyre::Result<()> {
        let Some(token) = self.stores.lock.acquire(domain, self.lock_ttl_secs).await? else {
            tracing::debug!(%domain, "skipping garbage collection: lock held elsewhere");
            return Ok(());
        };

        let result = self.collect_domain_locked(domain).await;

        if let Err(err) = self.stores.lock.release(domain, &token).await {
            tracing::warn!(%domain, %err, "failed to release rotation lock after gc pass");
        }

        result
    }

    async fn collect_domain_locked(&self, domain: &vault_types::Domain) -> eyre::Result<()> {
        let snapshot = SnapshotBuilder::build(&self.stores, domain).await?;
        let snapshot_hash = self.crypto.hash(snapshot.canonicalize().as_bytes());

        if let Some(existing) = self.stores.garbage.find_pending_by_domain(domain).await?
            && existing.snapshot_hash == snapshot_hash
        {
            tracing::debug!(%domain, "snapshot unchanged since last pending record, skipping");
            return Ok(());
        }

        let garbage = snapshot.collect_garbage(now());
        if garbage.is_empty() {
            return Ok(());
        }

        self.stores
            .garbage
            .create(domain, &snapshot_hash, &garbage)
            .await?;
        tracing::info!(%domain, "recorded new pending garbage set");
        Ok(())
    }
}
