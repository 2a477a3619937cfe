//! The authoritative facade over signing, rotation, and JWKS publication.

use std::{collections::HashMap, sync::Arc, time::Duration};

use base64::Engine as _;
use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing::instrument;
use uuid::Uuid;
use vault_crypto::{CryptoEngine, ImportedSigningKey};
use vault_types::{Domain, Jwk, Jwks, Kid, OriginMeta, RotationPolicy};

use crate::{
    constants::{DEFAULT_LOCK_TTL_SECS, DEFAULT_MAX_PAYLOAD_BYTES},
    error::KeyManagerError,
    expired_key_reaper::ExpiredKeyReaper,
    metrics::{
        METRICS_ID_ROTATION_FAILURE, METRICS_ID_ROTATION_SKIPPED, METRICS_ID_ROTATION_SUCCESS,
        METRICS_ID_SIGN_DURATION,
    },
    stores::{Stores, now},
};

struct CacheSlot {
    kid: Kid,
    key: Arc<ImportedSigningKey>,
}

/// A successfully resolved signing key: the kid it belongs to, and the
/// already-imported key material ready to sign with.
pub struct SigningKey {
    /// The kid this key belongs to.
    pub kid: Kid,
    key: Arc<ImportedSigningKey>,
}

/// Outcome of [`KeyManager::rotate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotateOutcome {
    /// Rotation completed; carries the newly minted kid.
    Rotated(Kid),
    /// Another rotation or cleaning pass holds the lock; caller should retry
    /// later. Not an error.
    Skipped,
}

/// Facade over signing, rotation, and JWKS publication for every domain.
///
/// Holds the single-slot per-domain `CryptoKey` cache described by the
/// design: expensive to populate, invalidated wholesale on kid mismatch.
pub struct KeyManager {
    stores: Stores,
    crypto: Arc<dyn CryptoEngine>,
    cache: RwLock<HashMap<Domain, CacheSlot>>,
    max_payload_bytes: usize,
    lock_ttl_secs: u64,
    key_public_ttl: Duration,
    key_grace: Duration,
}

impl KeyManager {
    /// Builds a `KeyManager` over the given stores and crypto engine, using
    /// the provided timing/sizing configuration.
    pub fn new(
        stores: Stores,
        crypto: Arc<dyn CryptoEngine>,
        max_payload_bytes: usize,
        lock_ttl_secs: u64,
        key_public_ttl: Duration,
        key_grace: Duration,
    ) -> Self {
        Self {
            stores,
            crypto,
            cache: RwLock::new(HashMap::new()),
            max_payload_bytes: if max_payload_bytes == 0 {
                DEFAULT_MAX_PAYLOAD_BYTES
            } else {
                max_payload_bytes
            },
            lock_ttl_secs: if lock_ttl_secs == 0 {
                DEFAULT_LOCK_TTL_SECS
            } else {
                lock_ttl_secs
            },
            key_public_ttl,
            key_grace,
        }
    }

    /// Drops the cached `CryptoKey` for `domain`, if any, or for every
    /// domain when `domain` is `None`. Called by the janitor after deleting
    /// a private key that may have been cached.
    pub fn clear_cache(&self, domain: Option<&Domain>) {
        match domain {
            Some(domain) => {
                self.cache.write().remove(domain);
            }
            None => self.cache.write().clear(),
        }
    }

    /// Resolves the currently active signing key for `domain`, reusing the
    /// cached `CryptoKey` when its kid still matches the active policy.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_signing_key(&self, domain: &Domain) -> Result<SigningKey, KeyManagerError> {
        let policy = self
            .stores
            .policies
            .get(domain)
            .await?
            .ok_or_else(|| KeyManagerError::MissingKey(domain.clone()))?;
        let active_kid = policy
            .active_kid
            .ok_or_else(|| KeyManagerError::MissingKey(domain.clone()))?;

        if let Some(slot) = self.cache.read().get(domain)
            && slot.kid == active_kid
        {
            return Ok(SigningKey {
                kid: active_kid,
                key: slot.key.clone(),
            });
        }

        let pem = self
            .stores
            .keys
            .load_private(domain, &active_kid)
            .await?
            .ok_or_else(|| KeyManagerError::MissingKey(domain.clone()))?;
        let imported = Arc::new(
            self.crypto
                .import_private_key(&pem)
                .map_err(|_| KeyManagerError::CryptoImport)?,
        );
        self.cache.write().insert(
            domain.clone(),
            CacheSlot {
                kid: active_kid.clone(),
                key: imported.clone(),
            },
        );
        Ok(SigningKey {
            kid: active_kid,
            key: imported,
        })
    }

    /// Signs `payload` (merged into the JWT body alongside `iat`) for
    /// `domain` with its active key, returning a three-segment RS256 JWT.
    #[instrument(level = "info", skip(self, payload), fields(domain = %domain))]
    pub async fn sign(&self, domain: &Domain, payload: Value) -> Result<String, KeyManagerError> {
        let started_at = std::time::Instant::now();
        let result = self.sign_inner(domain, payload).await;
        metrics::histogram!(METRICS_ID_SIGN_DURATION).record(started_at.elapsed().as_secs_f64() * 1000.0);
        result
    }

    async fn sign_inner(&self, domain: &Domain, payload: Value) -> Result<String, KeyManagerError> {
        if !payload.is_object() {
            return Err(KeyManagerError::Validation(
                "payload must be a JSON object".to_owned(),
            ));
        }
        let encoded_len_estimate = serde_json::to_vec(&payload)
            .map(|v| v.len())
            .unwrap_or(usize::MAX);
        if encoded_len_estimate > self.max_payload_bytes {
            return Err(KeyManagerError::Validation(format!(
                "payload exceeds {} byte cap",
                self.max_payload_bytes
            )));
        }

        let signing_key = self.get_signing_key(domain).await?;

        let header = json!({"alg": "RS256", "typ": "JWT", "kid": signing_key.kid.as_str()});
        let mut body = payload;
        body.as_object_mut()
            .expect("validated object above")
            .insert("iat".to_owned(), json!(now().timestamp()));

        let header_b64 = base64url_json(&header);
        let body_b64 = base64url_json(&body);
        let signing_input = format!("{header_b64}.{body_b64}");

        let signature = self
            .crypto
            .sign(&signing_key.key, signing_input.as_bytes())
            .map_err(|_| KeyManagerError::SigningFailed)?;
        let signature_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(signature);

        Ok(format!("{signing_input}.{signature_b64}"))
    }

    /// Rotates `domain`'s active key: mints a new RSA-4096 pair, archives the
    /// predecessor, and advances the rotation policy. Returns
    /// [`RotateOutcome::Skipped`] if another pass already holds the lock.
    #[instrument(level = "info", skip(self), fields(domain = %domain))]
    pub async fn rotate(&self, domain: &Domain) -> Result<RotateOutcome, KeyManagerError> {
        let Some(token) = self.stores.lock.acquire(domain, self.lock_ttl_secs).await? else {
            metrics::counter!(METRICS_ID_ROTATION_SKIPPED).increment(1);
            return Ok(RotateOutcome::Skipped);
        };

        let result = self.rotate_under_lock(domain).await;
        self.stores.lock.release(domain, &token).await?;
        match &result {
            Ok(RotateOutcome::Rotated(_)) => metrics::counter!(METRICS_ID_ROTATION_SUCCESS).increment(1),
            Ok(RotateOutcome::Skipped) => metrics::counter!(METRICS_ID_ROTATION_SKIPPED).increment(1),
            Err(_) => metrics::counter!(METRICS_ID_ROTATION_FAILURE).increment(1),
        }
        result
    }

    async fn rotate_under_lock(&self, domain: &Domain) -> Result<RotateOutcome, KeyManagerError> {
        let policy = self.stores.policies.get(domain).await?;
        let prev_kid = policy.as_ref().and_then(|p| p.active_kid.clone());

        let pair = self
            .crypto
            .generate_keypair()
            .map_err(|_| KeyManagerError::CryptoImport)?;
        let entropy = Uuid::new_v4().simple().to_string()[..8].to_owned();
        let created_at = now();
        let new_kid = Kid::mint(domain, created_at, &entropy);

        self.stores
            .keys
            .save(domain, &new_kid, &pair.public_pem, &pair.private_pem)
            .await?;
        self.stores
            .metadata
            .write_origin(&OriginMeta {
                kid: new_kid.clone(),
                domain: domain.clone(),
                created_at,
            })
            .await?;

        if let Some(prev_kid) = prev_kid {
            ExpiredKeyReaper::new(self.stores.clone(), self.key_public_ttl, self.key_grace)
                .archive(domain, &prev_kid)
                .await?;
        }

        let rotation_interval = policy
            .as_ref()
            .map(|p| p.rotation_interval)
            .unwrap_or(vault_types::RotationInterval::ThirtyDays);
        let updated_policy = RotationPolicy {
            domain: domain.clone(),
            rotation_interval,
            rotated_at: Some(created_at),
            next_rotation_at: created_at
                + chrono::Duration::from_std(rotation_interval.as_duration())
                    .expect("rotation intervals are well within chrono's range"),
            enabled: policy.as_ref().map(|p| p.enabled).unwrap_or(true),
            active_kid: Some(new_kid.clone()),
        };
        self.stores.policies.put(&updated_policy).await?;

        self.clear_cache(Some(domain));

        Ok(RotateOutcome::Rotated(new_kid))
    }

    /// Loads every currently published public key for `domain` and converts
    /// it to a JWK, returning the set as served by the JWKS endpoint.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_jwks(&self, domain: &Domain) -> Result<Jwks, KeyManagerError> {
        let kids = self.stores.keys.list_public_kids(domain).await?;
        let mut keys = Vec::with_capacity(kids.len());
        for kid in kids {
            if let Some(jwk) = self.stores.jwks.find(&kid).await? {
                keys.push(jwk);
                continue;
            }
            let Some(pem) = self.stores.keys.load_public(domain, &kid).await? else {
                continue;
            };
            let jwk: Jwk = self
                .crypto
                .pem_to_jwk(&pem, kid.as_str())
                .map_err(|_| KeyManagerError::CryptoImport)?;
            self.stores.jwks.upsert(&jwk).await?;
            keys.push(jwk);
        }
        Ok(Jwks { keys })
    }

    /// Registers the periodic rotation sweep with `scheduler`, firing every
    /// `interval`: each tick rotates every enabled domain whose policy
    /// reports [`RotationPolicy::is_due`].
    pub fn schedule_rotation(self: &Arc<Self>, scheduler: &mut crate::scheduler::Scheduler, interval: Duration) {
        let key_manager = self.clone();
        scheduler.register("key-rotation", interval, move || {
            let key_manager = key_manager.clone();
            async move { key_manager.run_due_rotations().await }
        });
    }

    async fn run_due_rotations(&self) {
        let now = now();
        let domains = match self.stores.policies.get_available_domains().await {
            Ok(domains) => domains,
            Err(err) => {
                tracing::warn!(%err, "key-rotation task could not enumerate domains");
                return;
            }
        };

        for domain in domains {
            let due = match self.stores.policies.get(&domain).await {
                Ok(Some(policy)) => policy.is_due(now),
                Ok(None) => true,
                Err(err) => {
                    tracing::warn!(%domain, %err, "key-rotation task could not read policy");
                    continue;
                }
            };
            if !due {
                continue;
            }
            if let Err(err) = self.rotate(&domain).await {
                tracing::warn!(%domain, %err, "scheduled rotation failed");
            }
        }
    }

    /// Administrative on-demand rotation of a single domain, bypassing its
    /// rotation policy's due check. Equivalent to [`KeyManager::rotate`];
    /// exposed under its own name for callers that trigger rotation
    /// out-of-band rather than as part of the scheduled sweep.
    pub async fn trigger_domain_rotation(&self, domain: &Domain) -> Result<RotateOutcome, KeyManagerError> {
        self.rotate(domain).await
    }

    /// Administrative on-demand rotation of every enabled domain, bypassing
    /// each domain's due check. A failure rotating one domain does not stop
    /// the others; every outcome (or error) is reported back to the caller.
    pub async fn trigger_immediate_rotation(&self) -> Result<Vec<(Domain, Result<RotateOutcome, KeyManagerError>)>, KeyManagerError> {
        let domains = self.stores.policies.get_available_domains().await?;
        let mut results = Vec::with_capacity(domains.len());
        for domain in domains {
            let outcome = self.rotate(&domain).await;
            results.push((domain, outcome));
        }
        Ok(results)
    }
}

fn base64url_json(value: &Value) -> String {
    let bytes = serde_json::to_vec(value).expect("json values always serialize");
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
