//! Tunable constants named by the external-interfaces section of the
//! design. All are overridable at construction time; these are the
//! defaults a [`crate::VaultTimings`] falls back to.

use std::time::Duration;

/// How long a verified public key remains trusted after rotation, before the
/// grace window starts counting down. Combined with [`DEFAULT_KEY_GRACE`] to
/// compute an archived kid's `expiresAt`.
pub const DEFAULT_KEY_PUBLIC_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 30);
/// Extra grace period tacked onto the public TTL to tolerate clock skew and
/// in-flight verifications using a just-retired key.
pub const DEFAULT_KEY_GRACE: Duration = Duration::from_secs(60 * 60 * 24 * 7);
/// Default TTL of the per-domain rotation lock.
pub const DEFAULT_LOCK_TTL_SECS: u64 = 300;
/// Default interval between scheduled rotation passes.
pub const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(60 * 60 * 24);
/// Default interval between expired-key cleanup passes.
pub const DEFAULT_EXPIRED_KEY_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60 * 6);
/// Default interval between garbage-collector passes (~4 months).
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(60 * 60 * 24 * 120);
/// Default interval between garbage-cleaner passes; trails the collector by
/// one hour so a freshly written record is never raced.
pub const DEFAULT_CLEAN_INTERVAL: Duration = Duration::from_secs(60 * 60 * 24 * 120 + 60 * 60);
/// Maximum accepted `sign` payload size, in bytes.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4 * 1024;
