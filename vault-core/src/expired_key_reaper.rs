//! Archives rotated-away keys, and drives the fast direct sweep of already-
//! expired archived metadata between garbage-collector passes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::instrument;
use vault_types::{ArchivedMeta, Domain, Kid};

use crate::{error::StoreError, janitor::Janitor, stores::Stores};

/// Moves a domain's just-rotated-away kid from origin to archived metadata,
/// and sweeps domains for archived entries whose grace window has elapsed.
pub struct ExpiredKeyReaper {
    stores: Stores,
    key_public_ttl: Duration,
    key_grace: Duration,
}

impl ExpiredKeyReaper {
    /// Builds a reaper using `key_public_ttl + key_grace` as the archive
    /// window applied to every newly archived kid.
    pub fn new(stores: Stores, key_public_ttl: Duration, key_grace: Duration) -> Self {
        Self {
            stores,
            key_public_ttl,
            key_grace,
        }
    }

    /// Moves `prev_kid`'s origin metadata to archived, computing
    /// `expires_at = now + key_public_ttl + key_grace`. Does not delete the
    /// private key here; the collector/cleaner pipeline does that once the
    /// key is confirmed unreachable.
    #[instrument(level = "info", skip(self), fields(domain = %domain, kid = %prev_kid))]
    pub async fn archive(&self, domain: &Domain, prev_kid: &Kid) -> Result<(), StoreError> {
        let now = Utc::now();
        let created_at = self
            .stores
            .metadata
            .read_origin(domain, prev_kid)
            .await?
            .map(|meta| meta.created_at)
            .unwrap_or(now);
        let expires_at = now
            + chrono::Duration::from_std(self.key_public_ttl)
                .expect("key_public_ttl is well within chrono's range")
            + chrono::Duration::from_std(self.key_grace).expect("key_grace is well within chrono's range");

        self.stores
            .metadata
            .write_archive(&ArchivedMeta {
                kid: prev_kid.clone(),
                domain: domain.clone(),
                created_at,
                expires_at,
            })
            .await?;
        self.stores.metadata.delete_origin(domain, prev_kid).await?;
        Ok(())
    }

    /// Runs the fast direct sweep across every enabled domain, removing
    /// archived entries (and their public keys) whose grace window has
    /// already elapsed. This is the `expired-key-cleanup` scheduled task;
    /// it complements, rather than replaces, the slower collector/cleaner
    /// pipeline, which would eventually reach the same kids via the
    /// health-gated path.
    #[instrument(level = "info", skip(self, janitor))]
    pub async fn sweep_due_domains(&self, janitor: &Janitor, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let domains = self.stores.policies.get_available_domains().await?;
        let mut total = 0;
        for domain in domains {
            match janitor.clean_domain(&domain, now).await {
                Ok(count) => total += count,
                Err(err) => tracing::warn!(%domain, %err, "expired-key sweep failed for domain"),
            }
        }
        Ok(total)
    }
}
