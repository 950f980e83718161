use std::str::FromStr;

use chrono::Duration;

use crate::error::StevedoreError;

/// Grace windows and eligibility thresholds for destructive maintenance.
///
/// Safety is data, not a switch: code paths consult individual fields, so a
/// new profile is just another constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyParameters {
    /// A pack blob is deletable only when older than this. Protects packs a
    /// concurrent writer uploaded whose index entry is not yet visible.
    pub blob_delete_min_age: Duration,

    /// Added on top of `drop_deleted_content.min_age` before a tombstone may
    /// be physically dropped from the index.
    pub drop_content_from_index_extra_margin: Duration,

    /// Contents younger than this are not rewritten.
    pub rewrite_min_age: Duration,

    /// When set, blob GC re-verifies candidates against a second index scan
    /// and only deletes blobs unreferenced in both passes.
    pub require_two_queue_scan_passes: bool,
}

impl SafetyParameters {
    /// All grace periods zero. For tests and forced runs only.
    pub fn none() -> Self {
        SafetyParameters {
            blob_delete_min_age: Duration::zero(),
            drop_content_from_index_extra_margin: Duration::zero(),
            rewrite_min_age: Duration::zero(),
            require_two_queue_scan_passes: false,
        }
    }

    /// Conservative defaults, safe with concurrent writers.
    pub fn full() -> Self {
        SafetyParameters {
            blob_delete_min_age: Duration::hours(24),
            drop_content_from_index_extra_margin: Duration::hours(1),
            rewrite_min_age: Duration::hours(2),
            require_two_queue_scan_passes: true,
        }
    }
}

impl Default for SafetyParameters {
    fn default() -> Self {
        SafetyParameters::full()
    }
}

impl FromStr for SafetyParameters {
    type Err = StevedoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(SafetyParameters::none()),
            "full" => Ok(SafetyParameters::full()),
            other => Err(StevedoreError::Config(format!(
                "unknown safety level '{other}' (expected 'none' or 'full')"
            ))),
        }
    }
}
