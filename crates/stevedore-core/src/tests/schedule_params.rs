use std::collections::BTreeMap;

use chrono::Duration;

use crate::maintenance::params::{get_params, set_params, MaintenanceParams, PARAMS_MANIFEST_TYPE};
use crate::maintenance::schedule::{
    get_schedule, set_schedule, MaintenanceSchedule, RunRecord, SCHEDULE_MANIFEST_TYPE,
};
use crate::maintenance::Mode;
use crate::repo::{MaintainableRepository, ManifestStore};
use crate::testutil::test_repo;

fn type_filter(t: &str) -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    m.insert("type".to_string(), t.to_string());
    m
}

#[test]
fn missing_params_manifest_yields_defaults() {
    let repo = test_repo();
    // wipe the params manifest the fixture installed
    for entry in repo
        .rep
        .manifest_store()
        .find_manifests(&type_filter(PARAMS_MANIFEST_TYPE))
        .unwrap()
    {
        repo.rep.manifest_store().delete_manifest(&entry.id).unwrap();
    }

    let params = get_params(&repo.rep).unwrap();
    assert_eq!(params, MaintenanceParams::default());
    assert!(params.owner.is_empty(), "default params must not name an owner");
    assert!(params.quick_cycle.enabled);
    assert!(params.full_cycle.enabled);
}

#[test]
fn set_params_replaces_previous_manifest() {
    let repo = test_repo();

    let mut params = get_params(&repo.rep).unwrap();
    params.owner = "admin@box".to_string();
    params.quick_cycle.interval_seconds = 600;
    set_params(&repo.rep, &params).unwrap();

    let found = repo
        .rep
        .manifest_store()
        .find_manifests(&type_filter(PARAMS_MANIFEST_TYPE))
        .unwrap();
    assert_eq!(found.len(), 1, "stale params manifests must be deleted");

    let loaded = get_params(&repo.rep).unwrap();
    assert_eq!(loaded.owner, "admin@box");
    assert_eq!(loaded.quick_cycle.interval(), Duration::minutes(10));
}

#[test]
fn fresh_schedule_is_due_for_everything() {
    let repo = test_repo();
    let schedule = get_schedule(&repo.rep).unwrap();
    let now = repo.rep.now();
    assert!(schedule.quick_due(now));
    assert!(schedule.full_due(now));
}

#[test]
fn schedule_roundtrip_and_replacement() {
    let repo = test_repo();
    let now = repo.rep.now();

    let mut schedule = MaintenanceSchedule::default();
    schedule.next_quick_maintenance_time = Some(now + Duration::hours(4));
    schedule.next_full_maintenance_time = Some(now + Duration::hours(24));
    set_schedule(&repo.rep, &schedule).unwrap();

    let loaded = get_schedule(&repo.rep).unwrap();
    assert_eq!(loaded, schedule);
    assert!(!loaded.quick_due(now));
    assert!(loaded.quick_due(now + Duration::hours(5)));

    // second set replaces, not accumulates
    set_schedule(&repo.rep, &schedule).unwrap();
    let found = repo
        .rep
        .manifest_store()
        .find_manifests(&type_filter(SCHEDULE_MANIFEST_TYPE))
        .unwrap();
    assert_eq!(found.len(), 1);
}

#[test]
fn report_run_keeps_newest_records() {
    let repo = test_repo();
    let now = repo.rep.now();

    let mut schedule = MaintenanceSchedule::default();
    for i in 0..9 {
        schedule.report_run(
            Mode::Full,
            RunRecord {
                start: now + Duration::minutes(i),
                end: now + Duration::minutes(i + 1),
                success: true,
                error: None,
            },
        );
    }

    let records = &schedule.runs["full"];
    assert_eq!(records.len(), 5);
    // the oldest records were evicted
    assert_eq!(records[0].start, now + Duration::minutes(4));
    assert_eq!(records[4].start, now + Duration::minutes(8));

    set_schedule(&repo.rep, &schedule).unwrap();
    assert_eq!(get_schedule(&repo.rep).unwrap(), schedule);
}

#[test]
fn run_record_error_survives_serialization() {
    let repo = test_repo();
    let now = repo.rep.now();

    let mut schedule = MaintenanceSchedule::default();
    schedule.report_run(
        Mode::Quick,
        RunRecord {
            start: now,
            end: now + Duration::seconds(30),
            success: false,
            error: Some("error deleting unreferenced blobs: boom".to_string()),
        },
    );
    set_schedule(&repo.rep, &schedule).unwrap();

    let loaded = get_schedule(&repo.rep).unwrap();
    let record = &loaded.runs["quick"][0];
    assert!(!record.success);
    assert!(record.error.as_deref().unwrap().contains("boom"));
}
