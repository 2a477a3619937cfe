//! Exercises the HTTP surface against an in-memory key manager.

use std::{collections::HashMap, sync::Arc, sync::Mutex};

use async_trait::async_trait;
use axum_test::TestServer;
use chrono::Utc;
use vault_core::{
    GarbageStore, JwksStore, KeyManager, KeyStore, MetadataStore, RotateOutcome, RotationLock,
    RotationPolicyStore, Stores, error::StoreError,
};
use vault_crypto::RsaCryptoEngine;
use vault_types::{
    ArchivedMeta, Domain, GarbageRecord, GarbageSet, Jwk, Kid, OriginMeta, RotationInterval,
    RotationPolicy,
};

#[derive(Default)]
struct InMemory {
    private: Mutex<HashMap<(Domain, Kid), String>>,
    public: Mutex<HashMap<(Domain, Kid), String>>,
    origin: Mutex<HashMap<(Domain, Kid), OriginMeta>>,
    policies: Mutex<HashMap<Domain, RotationPolicy>>,
}

#[async_trait]
impl KeyStore for InMemory {
    async fn list_private_kids(&self, domain: &Domain) -> Result<Vec<Kid>, StoreError> {
        Ok(self.private.lock().unwrap().keys().filter(|(d, _)| d == domain).map(|(_, k)| k.clone()).collect())
    }
    async fn list_public_kids(&self, domain: &Domain) -> Result<Vec<Kid>, StoreError> {
        Ok(self.public.lock().unwrap().keys().filter(|(d, _)| d == domain).map(|(_, k)| k.clone()).collect())
    }
    async fn load_private(&self, domain: &Domain, kid: &Kid) -> Result<Option<String>, StoreError> {
        Ok(self.private.lock().unwrap().get(&(domain.clone(), kid.clone())).cloned())
    }
    async fn load_public(&self, domain: &Domain, kid: &Kid) -> Result<Option<String>, StoreError> {
        Ok(self.public.lock().unwrap().get(&(domain.clone(), kid.clone())).cloned())
    }
    async fn save(&self, domain: &Domain, kid: &Kid, public_pem: &str, private_pem: &str) -> Result<(), StoreError> {
        self.public.lock().unwrap().insert((domain.clone(), kid.clone()), public_pem.to_owned());
        self.private.lock().unwrap().insert((domain.clone(), kid.clone()), private_pem.to_owned());
        Ok(())
    }
    async fn delete_private(&self, domain: &Domain, kid: &Kid) -> Result<(), StoreError> {
        self.private.lock().unwrap().remove(&(domain.clone(), kid.clone()));
        Ok(())
    }
    async fn delete_public(&self, domain: &Domain, kid: &Kid) -> Result<(), StoreError> {
        self.public.lock().unwrap().remove(&(domain.clone(), kid.clone()));
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for InMemory {
    async fn write_origin(&self, meta: &OriginMeta) -> Result<(), StoreError> {
        self.origin.lock().unwrap().insert((meta.domain.clone(), meta.kid.clone()), meta.clone());
        Ok(())
    }
    async fn read_origin(&self, domain: &Domain, kid: &Kid) -> Result<Option<OriginMeta>, StoreError> {
        Ok(self.origin.lock().unwrap().get(&(domain.clone(), kid.clone())).cloned())
    }
    async fn delete_origin(&self, domain: &Domain, kid: &Kid) -> Result<(), StoreError> {
        self.origin.lock().unwrap().remove(&(domain.clone(), kid.clone()));
        Ok(())
    }
    async fn write_archive(&self, _meta: &ArchivedMeta) -> Result<(), StoreError> {
        Ok(())
    }
    async fn read_archive(&self, _kid: &Kid) -> Result<Option<ArchivedMeta>, StoreError> {
        Ok(None)
    }
    async fn delete_archive(&self, _kid: &Kid) -> Result<(), StoreError> {
        Ok(())
    }
    async fn list_origin_kids(&self, domain: &Domain) -> Result<Vec<Kid>, StoreError> {
        Ok(self.origin.lock().unwrap().keys().filter(|(d, _)| d == domain).map(|(_, k)| k.clone()).collect())
    }
    async fn list_archived_metas(&self, _domain: &Domain) -> Result<Vec<ArchivedMeta>, StoreError> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl JwksStore for InMemory {
    async fn upsert(&self, _jwk: &Jwk) -> Result<(), StoreError> {
        Ok(())
    }
    async fn find(&self, _kid: &Kid) -> Result<Option<Jwk>, StoreError> {
        Ok(None)
    }
    async fn delete(&self, _kid: &Kid) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl GarbageStore for InMemory {
    async fn find_pending(&self) -> Result<Vec<GarbageRecord>, StoreError> {
        Ok(Vec::new())
    }
    async fn find_pending_by_domain(&self, _domain: &Domain) -> Result<Option<GarbageRecord>, StoreError> {
        Ok(None)
    }
    async fn create(&self, _domain: &Domain, _snapshot_hash: &str, _garbage_set: &GarbageSet) -> Result<(), StoreError> {
        Ok(())
    }
    async fn mark_cleaned(&self, _id: i64) -> Result<(), StoreError> {
        Ok(())
    }
    async fn mark_critical(&self, _id: i64, _reason: &str) -> Result<(), StoreError> {
        Ok(())
    }
    async fn increment_retry(&self, _id: i64, _reason: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl RotationPolicyStore for InMemory {
    async fn get_available_domains(&self) -> Result<Vec<Domain>, StoreError> {
        Ok(self.policies.lock().unwrap().keys().cloned().collect())
    }
    async fn get(&self, domain: &Domain) -> Result<Option<RotationPolicy>, StoreError> {
        Ok(self.policies.lock().unwrap().get(domain).cloned())
    }
    async fn put(&self, policy: &RotationPolicy) -> Result<(), StoreError> {
        self.policies.lock().unwrap().insert(policy.domain.clone(), policy.clone());
        Ok(())
    }
}

#[async_trait]
impl RotationLock for InMemory {
    async fn acquire(&self, _domain: &Domain, _ttl_secs: u64) -> Result<Option<String>, StoreError> {
        Ok(Some("token".to_owned()))
    }
    async fn release(&self, _domain: &Domain, _token: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

fn build_key_manager() -> Arc<KeyManager> {
    let memory = Arc::new(InMemory::default());
    let stores = Stores {
        keys: memory.clone(),
        metadata: memory.clone(),
        jwks: memory.clone(),
        garbage: memory.clone(),
        policies: memory.clone(),
        lock: memory.clone(),
        tmp_residue_cleaner: None,
    };
    Arc::new(KeyManager::new(
        stores,
        Arc::new(RsaCryptoEngine),
        4096,
        300,
        std::time::Duration::from_secs(3600),
        std::time::Duration::from_secs(60),
    ))
}

#[tokio::test]
async fn health_returns_ok() {
    let server = TestServer::new(vault_http::router(build_key_manager())).unwrap();
    let response = server.get("/health").await;
    response.assert_status_ok();
    response.assert_json(&serde_json::json!({"status": "ok"}));
}

#[tokio::test]
async fn jwks_for_unknown_domain_returns_not_found() {
    let server = TestServer::new(vault_http::router(build_key_manager())).unwrap();
    let response = server.get("/jwks/unknown").await;
    response.assert_status_not_found();
}

#[tokio::test]
async fn jwks_reflects_the_active_key_after_rotation() {
    let key_manager = build_key_manager();
    let domain = Domain::new("acme");
    let outcome = key_manager.rotate(&domain).await.unwrap();
    assert!(matches!(outcome, RotateOutcome::Rotated(_)));

    let server = TestServer::new(vault_http::router(key_manager)).unwrap();
    let response = server.get("/jwks/acme").await;
    response.assert_status_ok();
    let body: vault_types::Jwks = response.json();
    assert_eq!(body.keys.len(), 1);
}
