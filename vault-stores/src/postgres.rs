//! Postgres-backed metadata, garbage-trail, rotation-policy and lock stores.
//!
//! Key material never lives here: [`crate::fs::FsBackend`] remains the only
//! [`vault_core::KeyStore`] implementation regardless of which metadata
//! backend is configured. Schema (see the design's storage section):
//!
//! ```sql
//! CREATE TABLE origin_meta (
//!     kid TEXT PRIMARY KEY,
//!     domain TEXT NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL
//! );
//! CREATE TABLE archived_meta (
//!     kid TEXT PRIMARY KEY,
//!     domain TEXT NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     expires_at TIMESTAMPTZ NOT NULL
//! );
//! CREATE TABLE rotation_policy (
//!     domain TEXT PRIMARY KEY,
//!     rotation_interval TEXT NOT NULL,
//!     rotated_at TIMESTAMPTZ,
//!     next_rotation_at TIMESTAMPTZ NOT NULL,
//!     enabled BOOLEAN NOT NULL,
//!     active_kid TEXT
//! );
//! CREATE TABLE garbage_record (
//!     id BIGSERIAL PRIMARY KEY,
//!     domain TEXT NOT NULL UNIQUE,
//!     snapshot_hash TEXT NOT NULL,
//!     garbage_set JSONB NOT NULL,
//!     status TEXT NOT NULL,
//!     retries INTEGER NOT NULL DEFAULT 0,
//!     last_error TEXT,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL
//! );
//! CREATE TABLE rotation_lock (
//!     domain TEXT PRIMARY KEY,
//!     token TEXT NOT NULL,
//!     expires_at TIMESTAMPTZ NOT NULL
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::Context as _;
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::instrument;
use vault_core::error::StoreError;
use vault_core::{GarbageStore, MetadataStore, RotationLock, RotationPolicyStore};
use vault_types::{
    ArchivedMeta, Domain, GarbageRecord, GarbageSet, GarbageStatus, Kid, OriginMeta, RotationInterval, RotationPolicy,
};

/// Postgres-backed implementation of every metadata-ish store port.
pub struct PostgresBackend(PgPool);

impl PostgresBackend {
    /// Connects to `connection_string`, capping the pool at `max_connections`.
    #[instrument(level = "info", skip_all)]
    pub async fn connect(connection_string: &str, max_connections: u32) -> eyre::Result<Self> {
        tracing::info!("connecting to postgres...");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await
            .context("while connecting to postgres")?;
        Ok(Self(pool))
    }
}

#[derive(sqlx::FromRow)]
struct OriginMetaRow {
    kid: String,
    domain: String,
    created_at: DateTime<Utc>,
}

impl From<OriginMetaRow> for OriginMeta {
    fn from(row: OriginMetaRow) -> Self {
        OriginMeta {
            kid: Kid::from_raw(row.kid),
            domain: Domain::new(row.domain),
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ArchivedMetaRow {
    kid: String,
    domain: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<ArchivedMetaRow> for ArchivedMeta {
    fn from(row: ArchivedMetaRow) -> Self {
        ArchivedMeta {
            kid: Kid::from_raw(row.kid),
            domain: Domain::new(row.domain),
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}

#[async_trait]
impl MetadataStore for PostgresBackend {
    #[instrument(level = "debug", skip(self))]
    async fn write_origin(&self, meta: &OriginMeta) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO origin_meta (kid, domain, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (kid) DO UPDATE SET domain = EXCLUDED.domain, created_at = EXCLUDED.created_at
            "#,
        )
        .bind(meta.kid.as_str())
        .bind(meta.domain.as_str())
        .bind(meta.created_at)
        .execute(&self.0)
        .await
        .context("writing origin metadata")?;
        Ok(())
    }

    async fn read_origin(&self, domain: &Domain, kid: &Kid) -> Result<Option<OriginMeta>, StoreError> {
        let row: Option<OriginMetaRow> = sqlx::query_as(
            "SELECT kid, domain, created_at FROM origin_meta WHERE kid = $1 AND domain = $2",
        )
        .bind(kid.as_str())
        .bind(domain.as_str())
        .fetch_optional(&self.0)
        .await
        .context("reading origin metadata")?;
        Ok(row.map(Into::into))
    }

    async fn delete_origin(&self, domain: &Domain, kid: &Kid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM origin_meta WHERE kid = $1 AND domain = $2")
            .bind(kid.as_str())
            .bind(domain.as_str())
            .execute(&self.0)
            .await
            .context("deleting origin metadata")?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    async fn write_archive(&self, meta: &ArchivedMeta) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO archived_meta (kid, domain, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (kid) DO UPDATE SET expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(meta.kid.as_str())
        .bind(meta.domain.as_str())
        .bind(meta.created_at)
        .bind(meta.expires_at)
        .execute(&self.0)
        .await
        .context("writing archived metadata")?;
        Ok(())
    }

    async fn read_archive(&self, kid: &Kid) -> Result<Option<ArchivedMeta>, StoreError> {
        let row: Option<ArchivedMetaRow> =
            sqlx::query_as("SELECT kid, domain, created_at, expires_at FROM archived_meta WHERE kid = $1")
                .bind(kid.as_str())
                .fetch_optional(&self.0)
                .await
                .context("reading archived metadata")?;
        Ok(row.map(Into::into))
    }

    async fn delete_archive(&self, kid: &Kid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM archived_meta WHERE kid = $1")
            .bind(kid.as_str())
            .execute(&self.0)
            .await
            .context("deleting archived metadata")?;
        Ok(())
    }

    async fn list_origin_kids(&self, domain: &Domain) -> Result<Vec<Kid>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT kid FROM origin_meta WHERE domain = $1")
            .bind(domain.as_str())
            .fetch_all(&self.0)
            .await
            .context("listing origin kids")?;
        Ok(rows.into_iter().map(|(kid,)| Kid::from_raw(kid)).collect())
    }

    async fn list_archived_metas(&self, domain: &Domain) -> Result<Vec<ArchivedMeta>, StoreError> {
        let rows: Vec<ArchivedMetaRow> =
            sqlx::query_as("SELECT kid, domain, created_at, expires_at FROM archived_meta WHERE domain = $1")
                .bind(domain.as_str())
                .fetch_all(&self.0)
                .await
                .context("listing archived metadata")?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[derive(sqlx::FromRow)]
struct RotationPolicyRow {
    domain: String,
    rotation_interval: String,
    rotated_at: Option<DateTime<Utc>>,
    next_rotation_at: DateTime<Utc>,
    enabled: bool,
    active_kid: Option<String>,
}

fn interval_to_db(interval: RotationInterval) -> &'static str {
    match interval {
        RotationInterval::OneDay => "one_day",
        RotationInterval::SevenDays => "seven_days",
        RotationInterval::ThirtyDays => "thirty_days",
        RotationInterval::NinetyDays => "ninety_days",
        RotationInterval::OneEightyDays => "one_eighty_days",
        RotationInterval::ThreeSixtyFiveDays => "three_sixty_five_days",
    }
}

fn interval_from_db(raw: &str) -> eyre::Result<RotationInterval> {
    match raw {
        "one_day" => Ok(RotationInterval::OneDay),
        "seven_days" => Ok(RotationInterval::SevenDays),
        "thirty_days" => Ok(RotationInterval::ThirtyDays),
        "ninety_days" => Ok(RotationInterval::NinetyDays),
        "one_eighty_days" => Ok(RotationInterval::OneEightyDays),
        "three_sixty_five_days" => Ok(RotationInterval::ThreeSixtyFiveDays),
        other => eyre::bail!("unknown rotation interval {other} in database"),
    }
}

impl TryFrom<RotationPolicyRow> for RotationPolicy {
    type Error = eyre::Report;

    fn try_from(row: RotationPolicyRow) -> Result<Self, Self::Error> {
        Ok(RotationPolicy {
            domain: Domain::new(row.domain),
            rotation_interval: interval_from_db(&row.rotation_interval)?,
            rotated_at: row.rotated_at,
            next_rotation_at: row.next_rotation_at,
            enabled: row.enabled,
            active_kid: row.active_kid.map(Kid::from_raw),
        })
    }
}

#[async_trait]
impl RotationPolicyStore for PostgresBackend {
    async fn get_available_domains(&self) -> Result<Vec<Domain>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT domain FROM rotation_policy WHERE enabled")
            .fetch_all(&self.0)
            .await
            .context("listing available domains")?;
        Ok(rows.into_iter().map(|(domain,)| Domain::new(domain)).collect())
    }

    async fn get(&self, domain: &Domain) -> Result<Option<RotationPolicy>, StoreError> {
        let row: Option<RotationPolicyRow> = sqlx::query_as(
            r#"
            SELECT domain, rotation_interval, rotated_at, next_rotation_at, enabled, active_kid
            FROM rotation_policy WHERE domain = $1
            "#,
        )
        .bind(domain.as_str())
        .fetch_optional(&self.0)
        .await
        .context("reading rotation policy")?;
        row.map(RotationPolicy::try_from)
            .transpose()
            .map_err(StoreError::from)
    }

    async fn put(&self, policy: &RotationPolicy) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO rotation_policy (domain, rotation_interval, rotated_at, next_rotation_at, enabled, active_kid)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (domain) DO UPDATE SET
                rotation_interval = EXCLUDED.rotation_interval,
                rotated_at = EXCLUDED.rotated_at,
                next_rotation_at = EXCLUDED.next_rotation_at,
                enabled = EXCLUDED.enabled,
                active_kid = EXCLUDED.active_kid
            "#,
        )
        .bind(policy.domain.as_str())
        .bind(interval_to_db(policy.rotation_interval))
        .bind(policy.rotated_at)
        .bind(policy.next_rotation_at)
        .bind(policy.enabled)
        .bind(policy.active_kid.as_ref().map(Kid::as_str))
        .execute(&self.0)
        .await
        .context("writing rotation policy")?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct GarbageRecordRow {
    id: i64,
    domain: String,
    snapshot_hash: String,
    garbage_set: serde_json::Value,
    status: String,
    retries: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn status_to_db(status: GarbageStatus) -> &'static str {
    match status {
        GarbageStatus::Pending => "PENDING",
        GarbageStatus::Cleaning => "CLEANING",
        GarbageStatus::Cleaned => "CLEANED",
        GarbageStatus::Critical => "CRITICAL",
    }
}

fn status_from_db(raw: &str) -> eyre::Result<GarbageStatus> {
    match raw {
        "PENDING" => Ok(GarbageStatus::Pending),
        "CLEANING" => Ok(GarbageStatus::Cleaning),
        "CLEANED" => Ok(GarbageStatus::Cleaned),
        "CRITICAL" => Ok(GarbageStatus::Critical),
        other => eyre::bail!("unknown garbage status {other} in database"),
    }
}

impl TryFrom<GarbageRecordRow> for GarbageRecord {
    type Error = eyre::Report;

    fn try_from(row: GarbageRecordRow) -> Result<Self, Self::Error> {
        Ok(GarbageRecord {
            id: row.id,
            domain: Domain::new(row.domain),
            snapshot_hash: row.snapshot_hash,
            garbage_set: serde_json::from_value(row.garbage_set).context("parsing garbage_set JSONB")?,
            status: status_from_db(&row.status)?,
            retries: row.retries as u32,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl GarbageStore for PostgresBackend {
    async fn find_pending(&self) -> Result<Vec<GarbageRecord>, StoreError> {
        let rows: Vec<GarbageRecordRow> = sqlx::query_as(
            r#"
            SELECT id, domain, snapshot_hash, garbage_set, status, retries, last_error, created_at, updated_at
            FROM garbage_record WHERE status = 'PENDING'
            "#,
        )
        .fetch_all(&self.0)
        .await
        .context("listing pending garbage records")?;
        rows.into_iter()
            .map(GarbageRecord::try_from)
            .collect::<eyre::Result<Vec<_>>>()
            .map_err(StoreError::from)
    }

    async fn find_pending_by_domain(&self, domain: &Domain) -> Result<Option<GarbageRecord>, StoreError> {
        let row: Option<GarbageRecordRow> = sqlx::query_as(
            r#"
            SELECT id, domain, snapshot_hash, garbage_set, status, retries, last_error, created_at, updated_at
            FROM garbage_record WHERE domain = $1 AND status = 'PENDING'
            "#,
        )
        .bind(domain.as_str())
        .fetch_optional(&self.0)
        .await
        .context("reading pending garbage record")?;
        row.map(GarbageRecord::try_from).transpose().map_err(StoreError::from)
    }

    async fn create(&self, domain: &Domain, snapshot_hash: &str, garbage_set: &GarbageSet) -> Result<(), StoreError> {
        let garbage_set_json = serde_json::to_value(garbage_set).context("serializing garbage_set")?;
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO garbage_record (domain, snapshot_hash, garbage_set, status, retries, last_error, created_at, updated_at)
            VALUES ($1, $2, $3, 'PENDING', 0, NULL, $4, $4)
            ON CONFLICT (domain) DO UPDATE SET
                snapshot_hash = EXCLUDED.snapshot_hash,
                garbage_set = EXCLUDED.garbage_set,
                status = 'PENDING',
                retries = 0,
                last_error = NULL,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(domain.as_str())
        .bind(snapshot_hash)
        .bind(garbage_set_json)
        .bind(now)
        .execute(&self.0)
        .await
        .context("creating garbage record")?;
        Ok(())
    }

    async fn mark_cleaned(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE garbage_record SET status = 'CLEANED', updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.0)
            .await
            .context("marking garbage record cleaned")?;
        Ok(())
    }

    async fn mark_critical(&self, id: i64, reason: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE garbage_record SET status = 'CRITICAL', last_error = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(reason)
        .bind(Utc::now())
        .execute(&self.0)
        .await
        .context("marking garbage record critical")?;
        Ok(())
    }

    async fn increment_retry(&self, id: i64, reason: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE garbage_record SET retries = retries + 1, last_error = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(reason)
        .bind(Utc::now())
        .execute(&self.0)
        .await
        .context("incrementing garbage record retry count")?;
        Ok(())
    }
}

#[async_trait]
impl RotationLock for PostgresBackend {
    async fn acquire(&self, domain: &Domain, ttl_secs: u64) -> Result<Option<String>, StoreError> {
        let token = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(std::time::Duration::from_secs(ttl_secs))
                .expect("lock TTLs are well within chrono's range");

        // NX+EX semantics via upsert-if-absent-or-expired in one round trip.
        let acquired: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO rotation_lock (domain, token, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (domain) DO UPDATE SET token = EXCLUDED.token, expires_at = EXCLUDED.expires_at
            WHERE rotation_lock.expires_at <= $4
            RETURNING token
            "#,
        )
        .bind(domain.as_str())
        .bind(&token)
        .bind(expires_at)
        .bind(now)
        .fetch_optional(&self.0)
        .await
        .context("acquiring rotation lock")?;

        Ok(acquired.map(|_| token))
    }

    async fn release(&self, domain: &Domain, token: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM rotation_lock WHERE domain = $1 AND token = $2")
            .bind(domain.as_str())
            .bind(token)
            .execute(&self.0)
            .await
            .context("releasing rotation lock")?;
        Ok(())
    }
}
