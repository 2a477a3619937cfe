#![deny(missing_docs)]
//! The key-lifecycle engine at the heart of the multi-tenant signing vault.
//!
//! This crate owns the parts that must be right regardless of transport or
//! storage backend: [`DomainSnapshot`]'s pure garbage rules, the store
//! [ports](stores), [`KeyManager`]'s signing facade and `CryptoKey` cache,
//! [`Janitor`]'s ordered deletions, the [`GarbageCollector`]/[`GarbageCleaner`]
//! pipeline, the [`Scheduler`], and the [`ExpiredKeyReaper`].

pub mod constants;
pub mod error;
mod expired_key_reaper;
mod garbage_cleaner;
mod garbage_collector;
mod janitor;
mod key_manager;
pub mod metrics;
mod scheduler;
mod snapshot;
pub mod stores;

pub use expired_key_reaper::ExpiredKeyReaper;
pub use garbage_cleaner::GarbageCleaner;
pub use garbage_collector::GarbageCollector;
pub use janitor::Janitor;
pub use key_manager::{KeyManager, RotateOutcome, SigningKey};
pub use scheduler::Scheduler;
pub use snapshot::DomainSnapshot;
pub use stores::{
    GarbageStore, JwksStore, KeyStore, MetadataStore, RotationLock, RotationPolicyStore,
    SnapshotBuilder, Stores, TmpResidueCleaner,
};
