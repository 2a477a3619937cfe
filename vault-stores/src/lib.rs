#![deny(missing_docs)]
//! Concrete store backends for the signing vault's key-lifecycle engine.
//!
//! Key material always lives on the filesystem (see [`fs`]); metadata,
//! garbage records, rotation policy and the distributed lock may instead be
//! backed by Postgres (see [`postgres`], gated on the `postgres` feature).

#[cfg(feature = "fs")]
pub mod fs;
#[cfg(feature = "postgres")]
pub mod postgres;
