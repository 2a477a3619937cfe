//! Binary entry point: wires stores, the key-lifecycle engine, the
//! scheduler, and the HTTP transport into one running process.

use std::sync::Arc;

use clap::Parser;
use eyre::Context as _;
use secrecy::ExposeSecret as _;
use tokio_util::sync::CancellationToken;
use vault_core::{
    ExpiredKeyReaper, GarbageCleaner, GarbageCollector, GarbageStore, Janitor, KeyManager,
    MetadataStore, RotationLock, RotationPolicyStore, Scheduler, Stores,
};
use vault_crypto::{CryptoEngine, RsaCryptoEngine};

mod config;

use config::{MetadataBackend, VaultConfig};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = VaultConfig::parse();
    tracing::info!(?config, "starting vault-server");

    vault_core::metrics::describe_metrics();

    let fs_backend = Arc::new(
        vault_stores::fs::FsBackend::init(&config.key_store_base_dir)
            .await
            .context("initializing filesystem key store")?,
    );

    let (metadata, garbage, policies, lock): (
        Arc<dyn MetadataStore>,
        Arc<dyn GarbageStore>,
        Arc<dyn RotationPolicyStore>,
        Arc<dyn RotationLock>,
    ) = match config.metadata_backend {
        MetadataBackend::Fs => (fs_backend.clone(), fs_backend.clone(), fs_backend.clone(), fs_backend.clone()),
        #[cfg(feature = "postgres")]
        MetadataBackend::Postgres => {
            let connection_string = config
                .db_connection_string
                .as_ref()
                .ok_or_else(|| eyre::eyre!("VAULT_DB_CONNECTION_STRING is required when metadata_backend=postgres"))?;
            let postgres = Arc::new(
                vault_stores::postgres::PostgresBackend::connect(
                    connection_string.expose_secret(),
                    config.db_max_connections,
                )
                .await
                .context("connecting to postgres")?,
            );
            (postgres.clone(), postgres.clone(), postgres.clone(), postgres)
        }
        #[cfg(not(feature = "postgres"))]
        MetadataBackend::Postgres => {
            eyre::bail!("this build was not compiled with the `postgres` feature");
        }
    };

    let stores = Stores {
        keys: fs_backend.clone(),
        metadata,
        jwks: fs_backend.clone(),
        garbage,
        policies,
        lock,
        tmp_residue_cleaner: Some(fs_backend.clone()),
    };

    let crypto: Arc<dyn CryptoEngine> = Arc::new(RsaCryptoEngine);

    let key_manager = Arc::new(KeyManager::new(
        stores.clone(),
        crypto.clone(),
        config.max_payload_bytes,
        config.lock_ttl_secs,
        config.key_public_ttl,
        config.key_grace,
    ));
    let janitor = Arc::new(Janitor::new(stores.clone(), key_manager.clone()));
    let garbage_collector = Arc::new(GarbageCollector::new(stores.clone(), crypto.clone()));
    let garbage_cleaner = Arc::new(GarbageCleaner::new(stores.clone(), janitor.clone()));
    let expired_key_reaper = Arc::new(ExpiredKeyReaper::new(stores.clone(), config.key_public_ttl, config.key_grace));

    let cancellation_token = CancellationToken::new();
    let scheduler = build_scheduler(
        &config,
        key_manager.clone(),
        janitor.clone(),
        garbage_collector,
        garbage_cleaner,
        expired_key_reaper,
    );
    scheduler.start(cancellation_token.clone());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .context("binding HTTP listener")?;
    tracing::info!(addr = %config.bind_addr, "starting HTTP server");
    let router = vault_http::router(key_manager);
    let axum_cancel_token = cancellation_token.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { axum_cancel_token.cancelled().await })
            .await;
        if let Err(err) = result {
            tracing::error!(%err, "axum server exited with error");
        }
    });

    tokio::select! {
        () = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
        () = cancellation_token.cancelled() => {}
    }
    cancellation_token.cancel();

    match tokio::time::timeout(config.max_wait_time_shutdown, server).await {
        Ok(_) => tracing::info!("server task finished"),
        Err(_) => tracing::warn!("server task did not finish within the shutdown window"),
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn build_scheduler(
    config: &VaultConfig,
    key_manager: Arc<KeyManager>,
    janitor: Arc<Janitor>,
    garbage_collector: Arc<GarbageCollector>,
    garbage_cleaner: Arc<GarbageCleaner>,
    expired_key_reaper: Arc<ExpiredKeyReaper>,
) -> Scheduler {
    let mut scheduler = Scheduler::new();

    key_manager.schedule_rotation(&mut scheduler, config.rotation_interval);

    scheduler.register(
        "expired-key-cleanup",
        config.expired_key_cleanup_interval,
        move || {
            let janitor = janitor.clone();
            let expired_key_reaper = expired_key_reaper.clone();
            async move {
                let now = vault_core::stores::now();
                if let Err(err) = expired_key_reaper.sweep_due_domains(&janitor, now).await {
                    tracing::warn!(%err, "expired-key-cleanup task failed");
                }
            }
        },
    );

    scheduler.register("garbage-collection", config.gc_interval, move || {
        let garbage_collector = garbage_collector.clone();
        async move { garbage_collector.run_once().await }
    });

    scheduler.register("garbage-cleaning", config.clean_interval, move || {
        let garbage_cleaner = garbage_cleaner.clone();
        async move { garbage_cleaner.run_once().await }
    });

    scheduler
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
