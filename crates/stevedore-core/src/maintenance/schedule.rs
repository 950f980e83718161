use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ResultExt};
use crate::repo::MaintainableRepository;

use super::params::type_labels;
use super::Mode;

/// Manifest label identifying the maintenance schedule record.
pub const SCHEDULE_MANIFEST_TYPE: &str = "maintenance-schedule";

/// Run history kept per mode.
pub const MAX_RUN_RECORDS_PER_MODE: usize = 5;

/// Outcome of one completed maintenance run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Persistent maintenance schedule, stored as a
/// `type:maintenance-schedule` manifest. Unset next-run times mean "due
/// now".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceSchedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_quick_maintenance_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_full_maintenance_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub runs: BTreeMap<String, Vec<RunRecord>>,
}

impl MaintenanceSchedule {
    /// True when `now` is past the stored next-run time (or none is stored).
    pub fn quick_due(&self, now: DateTime<Utc>) -> bool {
        self.next_quick_maintenance_time.map_or(true, |t| now > t)
    }

    pub fn full_due(&self, now: DateTime<Utc>) -> bool {
        self.next_full_maintenance_time.map_or(true, |t| now > t)
    }

    /// Append a run record for `mode`, keeping the newest
    /// [`MAX_RUN_RECORDS_PER_MODE`] records.
    pub fn report_run(&mut self, mode: Mode, record: RunRecord) {
        let records = self.runs.entry(mode.to_string()).or_default();
        records.push(record);
        if records.len() > MAX_RUN_RECORDS_PER_MODE {
            let excess = records.len() - MAX_RUN_RECORDS_PER_MODE;
            records.drain(..excess);
        }
    }
}

/// Load the maintenance schedule; a repository without one gets the default
/// (everything due).
pub fn get_schedule(rep: &dyn MaintainableRepository) -> Result<MaintenanceSchedule> {
    let labels = type_labels(SCHEDULE_MANIFEST_TYPE);
    let mut found = rep
        .manifest_store()
        .find_manifests(&labels)
        .context("error looking up maintenance schedule manifest")?;
    found.sort_by(|a, b| a.mod_time.cmp(&b.mod_time));

    let Some(newest) = found.last() else {
        return Ok(MaintenanceSchedule::default());
    };

    // replaced by a concurrent writer between find and get: same as missing
    let Some(payload) = rep
        .manifest_store()
        .get_manifest(&newest.id)
        .context("error loading maintenance schedule manifest")?
    else {
        return Ok(MaintenanceSchedule::default());
    };

    Ok(serde_json::from_value(payload)?)
}

/// Persist the schedule, replacing any previous schedule manifest.
pub fn set_schedule(
    rep: &dyn MaintainableRepository,
    schedule: &MaintenanceSchedule,
) -> Result<()> {
    let labels = type_labels(SCHEDULE_MANIFEST_TYPE);
    let store = rep.manifest_store();

    let old = store
        .find_manifests(&labels)
        .context("error looking up maintenance schedule manifest")?;

    store
        .put_manifest(&labels, &serde_json::to_value(schedule)?)
        .context("error writing maintenance schedule manifest")?;

    for entry in old {
        store
            .delete_manifest(&entry.id)
            .context("error deleting stale maintenance schedule manifest")?;
    }
    Ok(())
}
