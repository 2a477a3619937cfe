//! Per-domain rotation policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Domain, Kid};

/// The allowed rotation cadences, in days.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationInterval {
    /// Rotate every day.
    OneDay,
    /// Rotate every week.
    SevenDays,
    /// Rotate every month (30 days).
    ThirtyDays,
    /// Rotate every quarter (90 days).
    NinetyDays,
    /// Rotate every half year (180 days).
    OneEightyDays,
    /// Rotate once a year (365 days).
    ThreeSixtyFiveDays,
}

impl RotationInterval {
    /// Returns the interval as a [`Duration`].
    pub fn as_duration(self) -> Duration {
        let days = match self {
            RotationInterval::OneDay => 1,
            RotationInterval::SevenDays => 7,
            RotationInterval::ThirtyDays => 30,
            RotationInterval::NinetyDays => 90,
            RotationInterval::OneEightyDays => 180,
            RotationInterval::ThreeSixtyFiveDays => 365,
        };
        Duration::from_secs(days * 24 * 60 * 60)
    }
}

/// The rotation policy for a single domain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationPolicy {
    /// The domain this policy governs.
    pub domain: Domain,
    /// How often keys are rotated.
    pub rotation_interval: RotationInterval,
    /// When the domain was last rotated, if ever.
    pub rotated_at: Option<DateTime<Utc>>,
    /// When the next rotation is due.
    pub next_rotation_at: DateTime<Utc>,
    /// Whether this domain currently participates in scheduled rotation and
    /// garbage-collection passes.
    pub enabled: bool,
    /// The currently active signing kid, if any key has ever been minted.
    pub active_kid: Option<Kid>,
}

impl RotationPolicy {
    /// Builds a fresh, never-rotated policy for `domain` with the given
    /// cadence, due to rotate immediately.
    pub fn new_enabled(domain: Domain, rotation_interval: RotationInterval, now: DateTime<Utc>) -> Self {
        Self {
            domain,
            rotation_interval,
            rotated_at: None,
            next_rotation_at: now,
            enabled: true,
            active_kid: None,
        }
    }

    /// Returns `true` iff `now` is at or past `next_rotation_at` and the
    /// policy is enabled.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && now >= self.next_rotation_at
    }
}
