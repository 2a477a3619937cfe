//! End-to-end scenarios over an in-memory store implementation, exercising
//! the rotation/garbage-collection/garbage-cleaning pipeline the way the
//! real filesystem/Postgres backends would be driven in production.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use vault_core::{
    GarbageCleaner, GarbageCollector, GarbageStore, Janitor, JwksStore, KeyManager, KeyStore,
    MetadataStore, RotateOutcome, RotationLock, RotationPolicyStore, Stores,
};
use vault_crypto::RsaCryptoEngine;
use vault_types::{
    ArchivedMeta, Domain, GarbageRecord, GarbageSet, GarbageStatus, Jwk, Kid, OriginMeta,
    RotationInterval, RotationPolicy,
};

#[derive(Default)]
struct InMemory {
    private: Mutex<HashMap<(Domain, Kid), String>>,
    public: Mutex<HashMap<(Domain, Kid), String>>,
    origin: Mutex<HashMap<(Domain, Kid), OriginMeta>>,
    archived: Mutex<HashMap<Kid, ArchivedMeta>>,
    jwks: Mutex<HashMap<Kid, Jwk>>,
    garbage: Mutex<Vec<GarbageRecord>>,
    policies: Mutex<HashMap<Domain, RotationPolicy>>,
    locks: Mutex<HashMap<Domain, (String, DateTime<Utc>)>>,
    next_id: Mutex<i64>,
}

impl InMemory {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl KeyStore for InMemory {
    async fn list_private_kids(&self, domain: &Domain) -> Result<Vec<Kid>, vault_core::error::StoreError> {
        Ok(self
            .private
            .lock()
            .unwrap()
            .keys()
            .filter(|(d, _)| d == domain)
            .map(|(_, k)| k.clone())
            .collect())
    }
    async fn list_public_kids(&self, domain: &Domain) -> Result<Vec<Kid>, vault_core::error::StoreError> {
        Ok(self
            .public
            .lock()
            .unwrap()
            .keys()
            .filter(|(d, _)| d == domain)
            .map(|(_, k)| k.clone())
            .collect())
    }
    async fn load_private(&self, domain: &Domain, kid: &Kid) -> Result<Option<String>, vault_core::error::StoreError> {
        Ok(self.private.lock().unwrap().get(&(domain.clone(), kid.clone())).cloned())
    }
    async fn load_public(&self, domain: &Domain, kid: &Kid) -> Result<Option<String>, vault_core::error::StoreError> {
        Ok(self.public.lock().unwrap().get(&(domain.clone(), kid.clone())).cloned())
    }
    async fn save(
        &self,
        domain: &Domain,
        kid: &Kid,
        public_pem: &str,
        private_pem: &str,
    ) -> Result<(), vault_core::error::StoreError> {
        self.public
            .lock()
            .unwrap()
            .insert((domain.clone(), kid.clone()), public_pem.to_owned());
        self.private
            .lock()
            .unwrap()
            .insert((domain.clone(), kid.clone()), private_pem.to_owned());
        Ok(())
    }
    async fn delete_private(&self, domain: &Domain, kid: &Kid) -> Result<(), vault_core::error::StoreError> {
        self.private.lock().unwrap().remove(&(domain.clone(), kid.clone()));
        Ok(())
    }
    async fn delete_public(&self, domain: &Domain, kid: &Kid) -> Result<(), vault_core::error::StoreError> {
        self.public.lock().unwrap().remove(&(domain.clone(), kid.clone()));
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for InMemory {
    async fn write_origin(&self, meta: &OriginMeta) -> Result<(), vault_core::error::StoreError> {
        self.origin
            .lock()
            .unwrap()
            .insert((meta.domain.clone(), meta.kid.clone()), meta.clone());
        Ok(())
    }
    async fn read_origin(&self, domain: &Domain, kid: &Kid) -> Result<Option<OriginMeta>, vault_core::error::StoreError> {
        Ok(self.origin.lock().unwrap().get(&(domain.clone(), kid.clone())).cloned())
    }
    async fn delete_origin(&self, domain: &Domain, kid: &Kid) -> Result<(), vault_core::error::StoreError> {
        self.origin.lock().unwrap().remove(&(domain.clone(), kid.clone()));
        Ok(())
    }
    async fn write_archive(&self, meta: &ArchivedMeta) -> Result<(), vault_core::error::StoreError> {
        self.archived.lock().unwrap().insert(meta.kid.clone(), meta.clone());
        Ok(())
    }
    async fn read_archive(&self, kid: &Kid) -> Result<Option<ArchivedMeta>, vault_core::error::StoreError> {
        Ok(self.archived.lock().unwrap().get(kid).cloned())
    }
    async fn delete_archive(&self, kid: &Kid) -> Result<(), vault_core::error::StoreError> {
        self.archived.lock().unwrap().remove(kid);
        Ok(())
    }
    async fn list_origin_kids(&self, domain: &Domain) -> Result<Vec<Kid>, vault_core::error::StoreError> {
        Ok(self
            .origin
            .lock()
            .unwrap()
            .keys()
            .filter(|(d, _)| d == domain)
            .map(|(_, k)| k.clone())
            .collect())
    }
    async fn list_archived_metas(&self, domain: &Domain) -> Result<Vec<ArchivedMeta>, vault_core::error::StoreError> {
        Ok(self
            .archived
            .lock()
            .unwrap()
            .values()
            .filter(|m| &m.domain == domain)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl JwksStore for InMemory {
    async fn upsert(&self, jwk: &Jwk) -> Result<(), vault_core::error::StoreError> {
        self.jwks.lock().unwrap().insert(Kid::from_raw(jwk.kid.clone()), jwk.clone());
        Ok(())
    }
    async fn find(&self, kid: &Kid) -> Result<Option<Jwk>, vault_core::error::StoreError> {
        Ok(self.jwks.lock().unwrap().get(kid).cloned())
    }
    async fn delete(&self, kid: &Kid) -> Result<(), vault_core::error::StoreError> {
        self.jwks.lock().unwrap().remove(kid);
        Ok(())
    }
}

#[async_trait]
impl GarbageStore for InMemory {
    async fn find_pending(&self) -> Result<Vec<GarbageRecord>, vault_core::error::StoreError> {
        Ok(self
            .garbage
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.status == GarbageStatus::Pending)
            .cloned()
            .collect())
    }
    async fn find_pending_by_domain(&self, domain: &Domain) -> Result<Option<GarbageRecord>, vault_core::error::StoreError> {
        Ok(self
            .garbage
            .lock()
            .unwrap()
            .iter()
            .find(|r| &r.domain == domain && r.status == GarbageStatus::Pending)
            .cloned())
    }
    async fn create(
        &self,
        domain: &Domain,
        snapshot_hash: &str,
        garbage_set: &GarbageSet,
    ) -> Result<(), vault_core::error::StoreError> {
        let mut records = self.garbage.lock().unwrap();
        let now = Utc::now();
        if let Some(existing) = records.iter_mut().find(|r| &r.domain == domain) {
            existing.snapshot_hash = snapshot_hash.to_owned();
            existing.garbage_set = garbage_set.clone();
            existing.status = GarbageStatus::Pending;
            existing.updated_at = now;
            return Ok(());
        }
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        records.push(GarbageRecord {
            id: *next_id,
            domain: domain.clone(),
            snapshot_hash: snapshot_hash.to_owned(),
            garbage_set: garbage_set.clone(),
            status: GarbageStatus::Pending,
            retries: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        });
        Ok(())
    }
    async fn mark_cleaned(&self, id: i64) -> Result<(), vault_core::error::StoreError> {
        if let Some(r) = self.garbage.lock().unwrap().iter_mut().find(|r| r.id == id) {
            r.status = GarbageStatus::Cleaned;
            r.updated_at = Utc::now();
        }
        Ok(())
    }
    async fn mark_critical(&self, id: i64, reason: &str) -> Result<(), vault_core::error::StoreError> {
        if let Some(r) = self.garbage.lock().unwrap().iter_mut().find(|r| r.id == id) {
            r.status = GarbageStatus::Critical;
            r.last_error = Some(reason.to_owned());
            r.updated_at = Utc::now();
        }
        Ok(())
    }
    async fn increment_retry(&self, id: i64, reason: &str) -> Result<(), vault_core::error::StoreError> {
        if let Some(r) = self.garbage.lock().unwrap().iter_mut().find(|r| r.id == id) {
            r.retries += 1;
            r.last_error = Some(reason.to_owned());
            r.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl RotationPolicyStore for InMemory {
    async fn get_available_domains(&self) -> Result<Vec<Domain>, vault_core::error::StoreError> {
        Ok(self
            .policies
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.enabled)
            .map(|p| p.domain.clone())
            .collect())
    }
    async fn get(&self, domain: &Domain) -> Result<Option<RotationPolicy>, vault_core::error::StoreError> {
        Ok(self.policies.lock().unwrap().get(domain).cloned())
    }
    async fn put(&self, policy: &RotationPolicy) -> Result<(), vault_core::error::StoreError> {
        self.policies.lock().unwrap().insert(policy.domain.clone(), policy.clone());
        Ok(())
    }
}

#[async_trait]
impl RotationLock for InMemory {
    async fn acquire(&self, domain: &Domain, ttl_secs: u64) -> Result<Option<String>, vault_core::error::StoreError> {
        let mut locks = self.locks.lock().unwrap();
        let now = Utc::now();
        if let Some((_, expires_at)) = locks.get(domain)
            && *expires_at > now
        {
            return Ok(None);
        }
        let token = uuid::Uuid::new_v4().to_string();
        locks.insert(
            domain.clone(),
            (token.clone(), now + chrono::Duration::seconds(ttl_secs as i64)),
        );
        Ok(Some(token))
    }
    async fn release(&self, domain: &Domain, token: &str) -> Result<(), vault_core::error::StoreError> {
        let mut locks = self.locks.lock().unwrap();
        if let Some((held_token, _)) = locks.get(domain)
            && held_token == token
        {
            locks.remove(domain);
        }
        Ok(())
    }
}

fn build_stores() -> (Stores, Arc<InMemory>) {
    let memory = InMemory::new();
    let stores = Stores {
        keys: memory.clone(),
        metadata: memory.clone(),
        jwks: memory.clone(),
        garbage: memory.clone(),
        policies: memory.clone(),
        lock: memory.clone(),
        tmp_residue_cleaner: None,
    };
    (stores, memory)
}

async fn enable_domain(stores: &Stores, domain: &Domain) {
    stores
        .policies
        .put(&RotationPolicy::new_enabled(domain.clone(), RotationInterval::ThirtyDays, Utc::now()))
        .await
        .unwrap();
}

#[tokio::test]
async fn s1_first_rotation_produces_keys_policy_and_signable_jwt() {
    let (stores, _memory) = build_stores();
    let domain = Domain::new("A");
    enable_domain(&stores, &domain).await;

    let crypto = Arc::new(RsaCryptoEngine);
    let key_manager = KeyManager::new(
        stores.clone(),
        crypto,
        4096,
        300,
        std::time::Duration::from_secs(3600),
        std::time::Duration::from_secs(60),
    );

    let outcome = key_manager.rotate(&domain).await.unwrap();
    let RotateOutcome::Rotated(new_kid) = outcome else {
        panic!("expected rotation to succeed on an empty domain");
    };

    let signing_key = key_manager.get_signing_key(&domain).await.unwrap();
    assert_eq!(signing_key.kid, new_kid);

    let jwks = key_manager.get_jwks(&domain).await.unwrap();
    assert_eq!(jwks.keys.len(), 1);

    let jwt = key_manager
        .sign(&domain, serde_json::json!({"sub": "user-1"}))
        .await
        .unwrap();
    let mut parts = jwt.split('.');
    let header_b64 = parts.next().unwrap();
    let header_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(header_b64)
        .unwrap();
    let header_json: serde_json::Value = serde_json::from_slice(&header_bytes).unwrap();
    assert_eq!(header_json["alg"], "RS256");
    assert_eq!(header_json["typ"], "JWT");
    assert_eq!(header_json["kid"], new_kid.as_str());
}

#[tokio::test]
async fn s2_through_s5_full_rotation_gc_clean_and_archive_expiry_cycle() {
    let (stores, _memory) = build_stores();
    let domain = Domain::new("B");
    enable_domain(&stores, &domain).await;

    let crypto: Arc<dyn vault_crypto::CryptoEngine> = Arc::new(RsaCryptoEngine);
    let key_manager = Arc::new(KeyManager::new(
        stores.clone(),
        crypto.clone(),
        4096,
        300,
        std::time::Duration::from_secs(3600),
        std::time::Duration::from_secs(60),
    ));

    let RotateOutcome::Rotated(k0) = key_manager.rotate(&domain).await.unwrap() else {
        panic!("first rotation must succeed");
    };

    // S2: rotate again, archiving K0.
    let RotateOutcome::Rotated(k1) = key_manager.rotate(&domain).await.unwrap() else {
        panic!("second rotation must succeed");
    };
    assert_ne!(k0, k1);

    let private_k0_before_gc = stores.keys.load_private(&domain, &k0).await.unwrap();
    assert!(private_k0_before_gc.is_some(), "K0 private key is garbage but not yet collected");

    let jwks = key_manager.get_jwks(&domain).await.unwrap();
    assert_eq!(jwks.keys.len(), 2, "both K0 and K1 remain published during the grace window");

    // S3: GC should record K0's private key (only) as pending garbage.
    let collector = GarbageCollector::new(stores.clone(), crypto.clone());
    collector.run_once().await;
    let pending = stores.garbage.find_pending_by_domain(&domain).await.unwrap().unwrap();
    assert_eq!(pending.garbage_set.private_keys, vec![k0.clone()]);
    assert!(pending.garbage_set.public_keys.is_empty());

    // S4: Clean should delete K0's private key only.
    let janitor = Arc::new(Janitor::new(stores.clone(), key_manager.clone()));
    let cleaner = GarbageCleaner::new(stores.clone(), janitor.clone());
    cleaner.run_once().await;

    assert!(stores.keys.load_private(&domain, &k0).await.unwrap().is_none());
    assert!(stores.keys.load_public(&domain, &k0).await.unwrap().is_some());
    let record = stores
        .garbage
        .find_pending()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.domain == domain);
    assert!(record.is_none(), "record should have left PENDING status");

    // S5: force K0's archive window to have already elapsed, then GC + clean again.
    {
        let mut archived = _memory.archived.lock().unwrap();
        if let Some(meta) = archived.get_mut(&k0) {
            meta.expires_at = Utc::now() - chrono::Duration::seconds(1);
        }
    }
    collector.run_once().await;
    cleaner.run_once().await;

    assert!(stores.keys.load_public(&domain, &k0).await.unwrap().is_none());
    assert!(stores.metadata.read_archive(&k0).await.unwrap().is_none());
    let jwks_after = key_manager.get_jwks(&domain).await.unwrap();
    assert_eq!(jwks_after.keys.len(), 1);
    assert_eq!(jwks_after.keys[0].kid, k1.as_str());
}

#[tokio::test]
async fn s6_health_gate_rejects_deletion_of_the_active_key() {
    let (stores, _memory) = build_stores();
    let domain = Domain::new("B");
    enable_domain(&stores, &domain).await;

    let crypto: Arc<dyn vault_crypto::CryptoEngine> = Arc::new(RsaCryptoEngine);
    let key_manager = Arc::new(KeyManager::new(
        stores.clone(),
        crypto,
        4096,
        300,
        std::time::Duration::from_secs(3600),
        std::time::Duration::from_secs(60),
    ));
    let RotateOutcome::Rotated(k1) = key_manager.rotate(&domain).await.unwrap() else {
        panic!("rotation must succeed");
    };

    // Inject a bogus garbage record listing the active key as garbage.
    stores
        .garbage
        .create(
            &domain,
            "bogus-hash",
            &GarbageSet {
                private_keys: vec![k1.clone()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let janitor = Arc::new(Janitor::new(stores.clone(), key_manager.clone()));
    let cleaner = GarbageCleaner::new(stores.clone(), janitor);
    cleaner.run_once().await;

    assert!(stores.keys.load_private(&domain, &k1).await.unwrap().is_some());
    let record = stores
        .garbage
        .find_pending_by_domain(&domain)
        .await
        .unwrap();
    assert!(record.is_none(), "the record left PENDING, moving to CRITICAL");
}
