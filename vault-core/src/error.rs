//! Typed errors surfaced by the key-lifecycle engine.

use vault_types::Domain;

/// Errors a [`crate::KeyManager`] may return to a caller.
#[derive(Debug, thiserror::Error)]
pub enum KeyManagerError {
    /// The request failed basic validation (missing domain, oversize payload, ...).
    #[error("validation failed: {0}")]
    Validation(String),
    /// The domain has no active signing key.
    #[error("domain {0} has no active signing key")]
    MissingKey(Domain),
    /// A private key PEM could not be parsed into a usable `CryptoKey`.
    #[error("failed to import signing key")]
    CryptoImport,
    /// Signing itself failed at the crypto layer.
    #[error("signing failed")]
    SigningFailed,
    /// A store call returned a transient or persistent I/O error.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors a store implementation may return.
///
/// Distinguished from [`KeyManagerError`] because store errors are, inside
/// the collector/cleaner pipelines, logged and translated into a retry
/// rather than propagated — see `GarbageCollector`/`GarbageCleaner`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Ad-hoc I/O or serialization failure, carrying whatever context the
    /// failing store implementation attached via `eyre::Context`.
    #[error("{0}")]
    Io(String),
}

impl From<eyre::Report> for StoreError {
    fn from(report: eyre::Report) -> Self {
        StoreError::Io(format!("{report:#}"))
    }
}

/// Outcome of a single [`crate::GarbageCleaner`] pass over one record.
///
/// Not an error type in the usual sense — `HealthGateFailure` is terminal by
/// design (see invariant 4 of the design's testable properties), while a
/// thrown [`StoreError`] is retried up to [`vault_types::MAX_CLEANER_RETRIES`]
/// times before also becoming terminal.
#[derive(Debug, thiserror::Error)]
pub enum CleanerError {
    /// The post-cleanup simulated snapshot failed the six health invariants.
    #[error("cleanup simulation breaks domain health")]
    HealthGateFailure,
    /// A store call failed while building the snapshot or applying deletes.
    #[error(transparent)]
    Store(#[from] StoreError),
}
