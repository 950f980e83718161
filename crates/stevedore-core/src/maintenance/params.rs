use std::collections::BTreeMap;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ResultExt};
use crate::repo::MaintainableRepository;

/// Manifest label identifying the maintenance params record.
pub const PARAMS_MANIFEST_TYPE: &str = "maintenance-params";

/// One periodic maintenance cycle (quick or full).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleParams {
    pub enabled: bool,
    /// Interval between runs, persisted as integer seconds.
    pub interval_seconds: u64,
}

impl CycleParams {
    pub fn interval(&self) -> Duration {
        Duration::seconds(self.interval_seconds as i64)
    }
}

/// Eligibility threshold for physically dropping deletion tombstones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropDeletedContentParams {
    /// Minimum tombstone age, persisted as integer seconds. The safety
    /// profile's extra margin is added on top.
    pub min_age_seconds: u64,
}

impl DropDeletedContentParams {
    pub fn min_age(&self) -> Duration {
        Duration::seconds(self.min_age_seconds as i64)
    }
}

/// Persistent maintenance parameters, stored as a
/// `type:maintenance-params` manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceParams {
    /// `user@host` permitted to run maintenance. Empty disables maintenance
    /// everywhere.
    pub owner: String,
    pub quick_cycle: CycleParams,
    pub full_cycle: CycleParams,
    pub drop_deleted_content: DropDeletedContentParams,
}

impl Default for MaintenanceParams {
    fn default() -> Self {
        MaintenanceParams {
            owner: String::new(),
            quick_cycle: CycleParams {
                enabled: true,
                interval_seconds: 4 * 3600,
            },
            full_cycle: CycleParams {
                enabled: true,
                interval_seconds: 24 * 3600,
            },
            drop_deleted_content: DropDeletedContentParams {
                min_age_seconds: 24 * 3600,
            },
        }
    }
}

pub(crate) fn type_labels(manifest_type: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("type".to_string(), manifest_type.to_string());
    labels
}

/// Load the maintenance params. A repository without a params manifest gets
/// the defaults (empty owner, so nothing runs until an owner is recorded).
pub fn get_params(rep: &dyn MaintainableRepository) -> Result<MaintenanceParams> {
    let labels = type_labels(PARAMS_MANIFEST_TYPE);
    let mut found = rep
        .manifest_store()
        .find_manifests(&labels)
        .context("error looking up maintenance params manifest")?;
    found.sort_by(|a, b| a.mod_time.cmp(&b.mod_time));

    let Some(newest) = found.last() else {
        return Ok(MaintenanceParams::default());
    };

    // the manifest may have been replaced by a concurrent writer between
    // find and get; fall back to defaults like a missing manifest
    let Some(payload) = rep
        .manifest_store()
        .get_manifest(&newest.id)
        .context("error loading maintenance params manifest")?
    else {
        return Ok(MaintenanceParams::default());
    };

    Ok(serde_json::from_value(payload)?)
}

/// Persist the maintenance params, replacing any previous params manifest.
pub fn set_params(rep: &dyn MaintainableRepository, params: &MaintenanceParams) -> Result<()> {
    let labels = type_labels(PARAMS_MANIFEST_TYPE);
    let store = rep.manifest_store();

    let old = store
        .find_manifests(&labels)
        .context("error looking up maintenance params manifest")?;

    store
        .put_manifest(&labels, &serde_json::to_value(params)?)
        .context("error writing maintenance params manifest")?;

    for entry in old {
        store
            .delete_manifest(&entry.id)
            .context("error deleting stale maintenance params manifest")?;
    }
    Ok(())
}
