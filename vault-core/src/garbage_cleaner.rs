//! Periodic drain of pending garbage records: simulate, health-gate, apply.

use std::sync::Arc;

use tracing::instrument;
use vault_types::{Domain, GarbageRecord, GarbageSet, MAX_CLEANER_RETRIES};

use crate::{
    error::CleanerError,
    janitor::Janitor,
    metrics::METRICS_ID_CLEANER_RETRIES,
    stores::{SnapshotBuilder, Stores, now},
};

/// Drains `GarbageStore::find_pending`, applying each record's garbage set
/// only after a fresh snapshot proves the post-cleanup state stays healthy.
///
/// This is the system's primary safety invariant: no deletion is ever
/// executed unless the simulated post-state provably satisfies the six
/// global invariants.
pub struct GarbageCleaner {
    stores: Stores,
    janitor: Arc<Janitor>,
}

impl GarbageCleaner {
    /// Builds a cleaner over `stores`, applying deletions through `janitor`.
    pub fn new(stores: Stores, janitor: Arc<Janitor>) -> Self {
        Self { stores, janitor }
    }

    /// Runs one pass over every pending record, then best-effort invokes
    /// `clean_tmp_residue` on the key store, if it exposes that capability.
    #[instrument(level = "info", skip(self))]
    pub async fn run_once(&self) {
        let pending = match self.stores.garbage.find_pending().await {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(%err, "garbage cleaner could not list pending records");
                return;
            }
        };

        for record in pending {
            self.process_record(record).await;
        }

        if let Some(cleaner) = &self.stores.tmp_residue_cleaner
            && let Err(err) = cleaner.clean_tmp_residue().await
        {
            tracing::warn!(%err, "tmp residue cleanup failed");
        }
    }

    async fn process_record(&self, record: GarbageRecord) {
        let domain = record.domain.clone();
        match self.clean_record(&record).await {
            Ok(()) => {}
            Err(CleanerError::HealthGateFailure) => {
                if let Err(err) = self
                    .stores
                    .garbage
                    .mark_critical(record.id, "Cleanup simulation breaks domain health")
                    .await
                {
                    tracing::error!(%domain, %err, "failed to mark record critical after health gate trip");
                }
            }
            Err(CleanerError::Store(err)) => {
                let next_retries = record.retries + 1;
                if next_retries >= MAX_CLEANER_RETRIES {
                    if let Err(mark_err) = self
                        .stores
                        .garbage
                        .mark_critical(record.id, &err.to_string())
                        .await
                    {
                        tracing::error!(%domain, %mark_err, "failed to mark record critical after retries exhausted");
                    }
                } else if let Err(mark_err) =
                    self.stores.garbage.increment_retry(record.id, &err.to_string()).await
                {
                    tracing::error!(%domain, %mark_err, "failed to record retry");
                } else {
                    metrics::counter!(METRICS_ID_CLEANER_RETRIES).increment(1);
                }
            }
        }
    }

    async fn clean_record(&self, record: &GarbageRecord) -> Result<(), CleanerError> {
        let now = now();
        let snapshot = SnapshotBuilder::build(&self.stores, &record.domain).await?;
        let simulated = snapshot.simulate_cleanup(&record.garbage_set);

        if !simulated.is_healthy(now) && snapshot.active_kid().is_some() {
            return Err(CleanerError::HealthGateFailure);
        }

        let remaining = self.apply(&record.domain, &record.garbage_set).await;

        if remaining.is_empty() {
            self.stores.garbage.mark_cleaned(record.id).await?;
        } else {
            self.stores
                .garbage
                .increment_retry(record.id, "Partial cleanup")
                .await?;
            metrics::counter!(METRICS_ID_CLEANER_RETRIES).increment(1);
        }
        Ok(())
    }

    /// Applies every deletion in `garbage`, logging (and keeping, for the
    /// next pass) any kid whose individual delete failed.
    async fn apply(&self, domain: &Domain, garbage: &GarbageSet) -> GarbageSet {
        let mut remaining = GarbageSet::default();

        for kid in &garbage.private_keys {
            if let Err(err) = self.janitor.delete_private(domain, kid).await {
                tracing::warn!(%domain, %kid, %err, "failed to delete private key");
                remaining.private_keys.push(kid.clone());
            }
        }
        for kid in &garbage.public_keys {
            if let Err(err) = self.janitor.delete_public(domain, kid).await {
                tracing::warn!(%domain, %kid, %err, "failed to delete public key");
                remaining.public_keys.push(kid.clone());
            }
        }
        for kid in &garbage.origin_meta {
            if let Err(err) = self.janitor.delete_origin_metadata(domain, kid).await {
                tracing::warn!(%domain, %kid, %err, "failed to delete origin metadata");
                remaining.origin_meta.push(kid.clone());
            }
        }
        for kid in &garbage.archived_meta {
            if let Err(err) = self.janitor.delete_archived_metadata(kid).await {
                tracing::warn!(%domain, %kid, %err, "failed to delete archived metadata");
                remaining.archived_meta.push(kid.clone());
            }
        }

        remaining
    }
}
