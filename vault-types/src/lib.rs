#![deny(missing_docs)]
//! Shared domain and wire types for the multi-tenant signing vault.
//!
//! This crate groups together the strongly-typed values used across the
//! vault's core, store implementations, and transport. It provides:
//!
//! * [`Domain`] and [`Kid`], the identifiers every other entity is scoped by.
//! * Metadata records ([`OriginMeta`], [`ArchivedMeta`]) describing a key
//!   pair's lifecycle position.
//! * [`RotationPolicy`], the per-domain rotation cadence and current state.
//! * [`GarbageRecord`]/[`GarbageSet`], the durable trail between the
//!   collector and the cleaner.
//! * [`Jwk`]/[`Jwks`], the public wire shape served by the JWKS endpoint.

mod domain;
mod garbage;
mod jwk;
mod meta;
mod policy;

pub use domain::{Domain, Kid};
pub use garbage::{GarbageRecord, GarbageSet, GarbageStatus, MAX_CLEANER_RETRIES};
pub use jwk::{Jwk, Jwks};
pub use meta::{ArchivedMeta, OriginMeta};
pub use policy::{RotationInterval, RotationPolicy};
