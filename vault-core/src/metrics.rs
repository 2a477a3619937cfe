//! Metrics definitions for the signing vault's key-lifecycle engine.
//!
//! This module defines all metrics keys used by the core and provides
//! [`describe_metrics`] to set metadata for each metric using the `metrics`
//! crate, the same shape as the teacher's own `metrics.rs`.

/// Metrics key for the number of active keys currently tracked per domain.
pub const METRICS_ID_ACTIVE_KEYS: &str = "vault.keys.active";
/// Metrics key for successful rotations.
pub const METRICS_ID_ROTATION_SUCCESS: &str = "vault.rotation.success";
/// Metrics key for failed rotations.
pub const METRICS_ID_ROTATION_FAILURE: &str = "vault.rotation.failure";
/// Metrics key for rotations skipped because the lock was held elsewhere.
pub const METRICS_ID_ROTATION_SKIPPED: &str = "vault.rotation.skipped";
/// Metrics key for garbage records, labeled by status.
pub const METRICS_ID_GARBAGE_RECORDS: &str = "vault.garbage.records";
/// Metrics key for cleaner retry increments.
pub const METRICS_ID_CLEANER_RETRIES: &str = "vault.cleaner.retries";
/// Metrics key for the duration of a `sign` call.
pub const METRICS_ID_SIGN_DURATION: &str = "vault.sign.duration";

/// Describe all metrics used by the core, so dashboards see units and help
/// text even before the first observation.
pub fn describe_metrics() {
    metrics::describe_gauge!(
        METRICS_ID_ACTIVE_KEYS,
        metrics::Unit::Count,
        "Number of active signing keys tracked per domain"
    );

    metrics::describe_counter!(
        METRICS_ID_ROTATION_SUCCESS,
        metrics::Unit::Count,
        "Number of successful key rotations"
    );

    metrics::describe_counter!(
        METRICS_ID_ROTATION_FAILURE,
        metrics::Unit::Count,
        "Number of key rotations that failed"
    );

    metrics::describe_counter!(
        METRICS_ID_ROTATION_SKIPPED,
        metrics::Unit::Count,
        "Number of rotations skipped because the rotation lock was held elsewhere"
    );

    metrics::describe_gauge!(
        METRICS_ID_GARBAGE_RECORDS,
        metrics::Unit::Count,
        "Number of garbage records, labeled by status"
    );

    metrics::describe_counter!(
        METRICS_ID_CLEANER_RETRIES,
        metrics::Unit::Count,
        "Number of times the garbage cleaner retried a record after a thrown error"
    );

    metrics::describe_histogram!(
        METRICS_ID_SIGN_DURATION,
        metrics::Unit::Milliseconds,
        "Duration of a sign() call"
    );
}
