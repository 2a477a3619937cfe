//! Configuration for the vault server.
//!
//! Configurable via environment variables or command-line arguments using
//! `clap`, mirroring the rest of this stack's node configuration.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};
use secrecy::SecretString;

/// Which backend stores metadata, garbage records, rotation policy, and the
/// rotation lock. Key material is always filesystem-backed regardless of
/// this choice.
#[derive(Debug, Clone, Copy, ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum MetadataBackend {
    /// JSON files under the same base directory as key material.
    Fs,
    /// A Postgres database.
    Postgres,
}

/// The vault server's full configuration surface.
#[derive(Parser, Debug)]
pub struct VaultConfig {
    /// The bind address of the HTTP server.
    #[clap(long, env = "VAULT_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: SocketAddr,

    /// Base directory for filesystem-backed key material (and metadata, if
    /// `metadata_backend` is `fs`).
    #[clap(long, env = "VAULT_KEY_STORE_BASE_DIR", default_value = "./data/vault-keys")]
    pub key_store_base_dir: PathBuf,

    /// Which backend stores metadata/garbage/policy/lock state.
    #[clap(long, env = "VAULT_METADATA_BACKEND", default_value = "fs")]
    pub metadata_backend: MetadataBackend,

    /// Postgres connection string. Required when `metadata_backend = postgres`.
    #[clap(long, env = "VAULT_DB_CONNECTION_STRING")]
    pub db_connection_string: Option<SecretString>,

    /// Max number of pooled Postgres connections.
    #[clap(long, env = "VAULT_DB_MAX_CONNECTIONS", default_value = "5")]
    pub db_max_connections: u32,

    /// Max accepted `sign` payload size, in bytes.
    #[clap(long, env = "VAULT_MAX_PAYLOAD_BYTES", default_value = "4096")]
    pub max_payload_bytes: usize,

    /// TTL of the per-domain rotation lock, in seconds.
    #[clap(long, env = "VAULT_LOCK_TTL_SECS", default_value = "300")]
    pub lock_ttl_secs: u64,

    /// How long a rotated-out public key remains trusted before its grace
    /// window starts counting down.
    #[clap(
        long,
        env = "VAULT_KEY_PUBLIC_TTL",
        default_value = "30days",
        value_parser = humantime::parse_duration
    )]
    pub key_public_ttl: Duration,

    /// Extra grace period tacked onto `key_public_ttl`.
    #[clap(
        long,
        env = "VAULT_KEY_GRACE",
        default_value = "7days",
        value_parser = humantime::parse_duration
    )]
    pub key_grace: Duration,

    /// Interval between scheduled rotation passes.
    #[clap(
        long,
        env = "VAULT_ROTATION_INTERVAL",
        default_value = "24h",
        value_parser = humantime::parse_duration
    )]
    pub rotation_interval: Duration,

    /// Interval between expired-key cleanup sweeps.
    #[clap(
        long,
        env = "VAULT_EXPIRED_KEY_CLEANUP_INTERVAL",
        default_value = "6h",
        value_parser = humantime::parse_duration
    )]
    pub expired_key_cleanup_interval: Duration,

    /// Interval between garbage-collector passes.
    #[clap(
        long,
        env = "VAULT_GC_INTERVAL",
        default_value = "120days",
        value_parser = humantime::parse_duration
    )]
    pub gc_interval: Duration,

    /// Interval between garbage-cleaner passes.
    #[clap(
        long,
        env = "VAULT_CLEAN_INTERVAL",
        default_value = "120days 1h",
        value_parser = humantime::parse_duration
    )]
    pub clean_interval: Duration,

    /// Max time to wait for background tasks to wind down during shutdown.
    #[clap(
        long,
        env = "VAULT_MAX_WAIT_TIME_SHUTDOWN",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    pub max_wait_time_shutdown: Duration,
}
