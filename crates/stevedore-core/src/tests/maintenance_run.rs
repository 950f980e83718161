use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Duration;
use fs2::FileExt;

use crate::cancel::CancellationToken;
use crate::error::StevedoreError;
use crate::maintenance::{
    self, get_params, get_schedule, set_params, Mode, SafetyParameters,
};
use crate::repo::{ContentManager, MaintainableRepository};
use crate::testutil::{test_repo, TEST_HOSTNAME, TEST_USERNAME};

#[test]
fn declines_when_not_owner() {
    let repo = test_repo();
    let mut params = get_params(&repo.rep).unwrap();
    params.owner = "somebody@elsewhere".to_string();
    set_params(&repo.rep, &params).unwrap();

    let calls = AtomicUsize::new(0);
    maintenance::run_exclusive(&repo.rep, Mode::Full, &CancellationToken::new(), |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0, "non-owner must not run maintenance");
}

#[test]
fn forced_mode_runs_for_owner() {
    let repo = test_repo();
    let calls = AtomicUsize::new(0);

    maintenance::run_exclusive(&repo.rep, Mode::Quick, &CancellationToken::new(), |rp| {
        assert_eq!(rp.mode, Mode::Quick);
        assert_eq!(rp.params.owner, format!("{TEST_USERNAME}@{TEST_HOSTNAME}"));
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn auto_picks_full_first_then_nothing_until_due() {
    let repo = test_repo();

    let mut seen = Vec::new();
    maintenance::run_exclusive(&repo.rep, Mode::Auto, &CancellationToken::new(), |rp| {
        seen.push(rp.mode);
        Ok(())
    })
    .unwrap();
    // no schedule stored yet: the full cycle (checked first) is due
    assert_eq!(seen, vec![Mode::Full]);

    // immediately after, nothing is due
    maintenance::run_exclusive(&repo.rep, Mode::Auto, &CancellationToken::new(), |rp| {
        seen.push(rp.mode);
        Ok(())
    })
    .unwrap();
    assert_eq!(seen, vec![Mode::Full]);

    // past the full interval the (precedence-winning) full cycle fires again
    repo.clock.advance(Duration::hours(30));
    maintenance::run_exclusive(&repo.rep, Mode::Auto, &CancellationToken::new(), |rp| {
        seen.push(rp.mode);
        Ok(())
    })
    .unwrap();
    assert_eq!(seen, vec![Mode::Full, Mode::Full]);
}

#[test]
fn auto_falls_back_to_quick_when_full_disabled() {
    let repo = test_repo();
    let mut params = get_params(&repo.rep).unwrap();
    params.full_cycle.enabled = false;
    set_params(&repo.rep, &params).unwrap();

    let mut seen = Vec::new();
    maintenance::run_exclusive(&repo.rep, Mode::Auto, &CancellationToken::new(), |rp| {
        seen.push(rp.mode);
        Ok(())
    })
    .unwrap();
    assert_eq!(seen, vec![Mode::Quick]);
}

#[test]
fn schedule_advances_before_the_callback_runs() {
    let repo = test_repo();
    let start = repo.rep.now();

    maintenance::run_exclusive(&repo.rep, Mode::Full, &CancellationToken::new(), |rp| {
        let schedule = get_schedule(rp.rep()).unwrap();
        let next_full = schedule.next_full_maintenance_time.expect("next full must be set");
        assert!(next_full > start, "schedule must advance before work starts");
        Ok(())
    })
    .unwrap();
}

#[test]
fn failed_run_still_advances_schedule_and_is_recorded() {
    let repo = test_repo();
    let start = repo.rep.now();

    let err = maintenance::run_exclusive(&repo.rep, Mode::Full, &CancellationToken::new(), |_| {
        Err(StevedoreError::Other("synthetic failure".into()))
    })
    .unwrap_err();
    assert!(err.to_string().contains("synthetic failure"));

    let schedule = get_schedule(&repo.rep).unwrap();
    assert!(
        schedule.next_full_maintenance_time.unwrap() > start,
        "a crashed/failed run must not retry in a tight loop"
    );

    let records = &schedule.runs["full"];
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert!(records[0].error.as_deref().unwrap().contains("synthetic failure"));
}

#[test]
fn run_records_are_bounded() {
    let repo = test_repo();

    for _ in 0..8 {
        maintenance::run_exclusive(&repo.rep, Mode::Quick, &CancellationToken::new(), |_| Ok(()))
            .unwrap();
        repo.clock.advance(Duration::seconds(1));
    }

    let schedule = get_schedule(&repo.rep).unwrap();
    assert_eq!(schedule.runs["quick"].len(), 5, "history must stay bounded");
}

#[test]
fn held_lock_skips_silently() {
    let repo = test_repo();

    let lock_path = {
        let mut p = repo.rep.config_path().into_os_string();
        p.push(".mlock");
        std::path::PathBuf::from(p)
    };
    let holder = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .unwrap();
    holder.try_lock_exclusive().unwrap();

    let calls = AtomicUsize::new(0);
    maintenance::run_exclusive(&repo.rep, Mode::Full, &CancellationToken::new(), |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0, "second holder must skip silently");
    holder.unlock().unwrap();

    // once released, maintenance proceeds
    maintenance::run_exclusive(&repo.rep, Mode::Full, &CancellationToken::new(), |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn concurrent_runs_execute_exactly_one_callback() {
    let repo = Arc::new(test_repo());
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(std::sync::Barrier::new(2));

    let mut handles = Vec::new();
    for _ in 0..2 {
        let repo = Arc::clone(&repo);
        let calls = Arc::clone(&calls);
        let barrier = Arc::clone(&barrier);
        handles.push(std::thread::spawn(move || {
            barrier.wait();
            maintenance::run_exclusive(&repo.rep, Mode::Full, &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                // stay inside the lock long enough for the other thread to
                // attempt acquisition
                std::thread::sleep(std::time::Duration::from_millis(500));
                Ok(())
            })
        }));
    }

    for h in handles {
        h.join().unwrap().unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1, "exactly one run may execute");
}

#[test]
fn full_maintenance_end_to_end_preserves_live_contents() {
    let repo = test_repo();

    let mut live = Vec::new();
    for i in 0..3 {
        live.push((
            repo.write_session(None, format!("e2e-data-{i}").as_bytes()),
            format!("e2e-data-{i}"),
        ));
    }
    for i in 0..2 {
        live.push((
            repo.write_session(Some('k'), format!("e2e-meta-{i}").as_bytes()),
            format!("e2e-meta-{i}"),
        ));
    }
    let doomed = repo.write_session(None, b"e2e-doomed");
    repo.clock.advance(Duration::hours(1));
    repo.rep.engine.delete_content(&doomed).unwrap();
    repo.rep.engine.flush().unwrap();

    repo.clock.advance(Duration::hours(48));
    let cancel = CancellationToken::new();
    let safety = SafetyParameters::none();
    maintenance::run_exclusive(&repo.rep, Mode::Full, &cancel, |rp| {
        maintenance::run(rp, &safety, &cancel)
    })
    .unwrap();

    // every live content remains retrievable with byte-identical payload
    let manager = repo.rep.content_manager();
    for (id, expected) in &live {
        assert_eq!(manager.read_content(id).unwrap(), expected.as_bytes());
    }

    // the dropped tombstone's pack and the orphaned source packs are gone:
    // all that remains is one consolidated p pack and one q pack
    assert_eq!(repo.count_blobs("p"), 1);
    assert_eq!(repo.count_blobs("q"), 1);

    // a second full run right away is a no-op for pack counts
    repo.clock.advance(Duration::hours(48));
    maintenance::run_exclusive(&repo.rep, Mode::Full, &cancel, |rp| {
        maintenance::run(rp, &safety, &cancel)
    })
    .unwrap();
    assert_eq!(repo.count_blobs("p"), 1);
    assert_eq!(repo.count_blobs("q"), 1);
}

#[test]
fn quick_maintenance_only_touches_metadata_packs() {
    let repo = test_repo();
    for i in 0..2 {
        repo.write_session(None, format!("quick-data-{i}").as_bytes());
        repo.write_session(Some('k'), format!("quick-meta-{i}").as_bytes());
    }
    assert_eq!(repo.count_blobs("p"), 2);
    assert_eq!(repo.count_blobs("q"), 2);

    repo.clock.advance(Duration::hours(1));
    let cancel = CancellationToken::new();
    let safety = SafetyParameters::none();
    maintenance::run_exclusive(&repo.rep, Mode::Quick, &cancel, |rp| {
        maintenance::run(rp, &safety, &cancel)
    })
    .unwrap();

    // q packs consolidated and their orphans collected; p packs untouched
    assert_eq!(repo.count_blobs("q"), 1);
    assert_eq!(repo.count_blobs("p"), 2);
}
