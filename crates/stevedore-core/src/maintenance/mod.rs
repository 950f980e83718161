pub mod blob_gc;
pub mod drop_deleted;
pub mod params;
pub mod pool;
pub mod rewrite;
pub mod safety;
pub mod schedule;

use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use fs2::FileExt;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::error::{Result, ResultExt, StevedoreError};
use crate::id::PACK_BLOB_PREFIX_SPECIAL;
use crate::repo::MaintainableRepository;

pub use self::blob_gc::{delete_unreferenced_blobs, DeleteUnreferencedBlobsOptions};
pub use self::drop_deleted::{drop_deleted_contents, DropDeletedStats};
pub use self::params::{get_params, set_params, MaintenanceParams};
pub use self::rewrite::{rewrite_contents, RewriteContentsOptions, RewriteStats};
pub use self::safety::SafetyParameters;
pub use self::schedule::{get_schedule, set_schedule, MaintenanceSchedule, RunRecord};

/// Default worker count for rewrite and GC pools.
pub const DEFAULT_MAINTENANCE_PARALLELISM: usize = 16;

/// Maintenance scope requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Do nothing.
    None,
    /// Metadata-only cycle: cheap, runs often.
    Quick,
    /// Everything; strictly subsumes quick.
    Full,
    /// Pick quick or full based on the stored schedule.
    Auto,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::None => "none",
            Mode::Quick => "quick",
            Mode::Full => "full",
            Mode::Auto => "auto",
        };
        f.write_str(s)
    }
}

impl FromStr for Mode {
    type Err = StevedoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "none" => Ok(Mode::None),
            "quick" => Ok(Mode::Quick),
            "full" => Ok(Mode::Full),
            "auto" => Ok(Mode::Auto),
            other => Err(StevedoreError::Config(format!(
                "unknown maintenance mode '{other}'"
            ))),
        }
    }
}

/// Parameters handed to the [`run_exclusive`] callback. Only constructible
/// by `run_exclusive`, which guarantees the callback runs under the
/// exclusive lock.
pub struct RunParameters<'a> {
    rep: &'a dyn MaintainableRepository,
    pub mode: Mode,
    pub params: MaintenanceParams,
}

impl<'a> RunParameters<'a> {
    pub fn rep(&self) -> &'a dyn MaintainableRepository {
        self.rep
    }
}

/// Advisory lock file guaranteeing one local maintenance process. Released
/// on drop, including unwind.
struct MaintenanceLock {
    file: File,
    path: PathBuf,
}

impl MaintenanceLock {
    /// Try to acquire without blocking. `Ok(None)` means another local
    /// process holds the lock — a deliberate skip, not an error.
    fn try_acquire(path: &Path) -> Result<Option<MaintenanceLock>> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(MaintenanceLock {
                file,
                path: path.to_path_buf(),
            })),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for MaintenanceLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!(path = %self.path.display(), error = %e, "failed to release maintenance lock");
        }
    }
}

/// Decide whether periodic maintenance is due, and in which mode. Full is
/// checked first because it strictly subsumes quick.
fn should_run(rep: &dyn MaintainableRepository, p: &MaintenanceParams) -> Result<Mode> {
    let schedule = schedule::get_schedule(rep).context("error getting schedule")?;
    let now = rep.now();

    if p.full_cycle.enabled {
        if schedule.full_due(now) {
            debug!("due for full maintenance cycle");
            return Ok(Mode::Full);
        }
        debug!(next = ?schedule.next_full_maintenance_time, "not due for full maintenance cycle");
    } else {
        debug!("full maintenance cycle not enabled");
    }

    if p.quick_cycle.enabled {
        if schedule.quick_due(now) {
            debug!("due for quick maintenance cycle");
            return Ok(Mode::Quick);
        }
        debug!(next = ?schedule.next_quick_maintenance_time, "not due for quick maintenance cycle");
    } else {
        debug!("quick maintenance cycle not enabled");
    }

    Ok(Mode::None)
}

/// Advance the next-run times so a crashed process does not immediately
/// re-enter the same cycle.
fn update_schedule(run_params: &RunParameters<'_>) -> Result<()> {
    let rep = run_params.rep;
    let p = &run_params.params;

    let mut schedule = schedule::get_schedule(rep).context("error getting schedule")?;
    let now = rep.now();

    match run_params.mode {
        Mode::Full => {
            // a full cycle also covers the quick work, so push both out
            let next_full = now + p.full_cycle.interval();
            schedule.next_full_maintenance_time = Some(next_full);
            schedule.next_quick_maintenance_time = Some(next_full + p.quick_cycle.interval());
            debug!(?next_full, "scheduling next full cycle");
            schedule::set_schedule(rep, &schedule)
        }
        Mode::Quick => {
            let next_quick = now + p.quick_cycle.interval();
            schedule.next_quick_maintenance_time = Some(next_quick);
            debug!(?next_quick, "scheduling next quick cycle");
            schedule::set_schedule(rep, &schedule)
        }
        _ => Ok(()),
    }
}

/// Record the outcome of a finished run in the schedule manifest.
fn report_run(
    rep: &dyn MaintainableRepository,
    mode: Mode,
    record: RunRecord,
) -> Result<()> {
    let mut schedule = schedule::get_schedule(rep)?;
    schedule.report_run(mode, record);
    schedule::set_schedule(rep, &schedule)
}

/// Run `cb` under the maintenance ownership check, schedule gate, and local
/// file lock.
///
/// Returns success silently when work should not proceed: this host/user is
/// not the owner, no cycle is due (`Auto`), or another local process holds
/// the lock. The schedule is advanced *before* the callback so a crash
/// cannot cause a tight retry loop; a run record is appended afterwards
/// whether the callback succeeded or not.
pub fn run_exclusive<F>(
    rep: &dyn MaintainableRepository,
    mode: Mode,
    cancel: &CancellationToken,
    cb: F,
) -> Result<()>
where
    F: FnOnce(&RunParameters<'_>) -> Result<()>,
{
    cancel.check()?;

    let p = params::get_params(rep).context("unable to get maintenance params")?;

    let my_identity = format!("{}@{}", rep.username(), rep.hostname());
    if p.owner != my_identity {
        debug!(owner = %p.owner, "maintenance owned by another user");
        return Ok(());
    }

    let mode = if mode == Mode::Auto {
        should_run(rep, &p).context("unable to determine if maintenance is required")?
    } else {
        mode
    };

    if mode == Mode::None {
        debug!("not due for maintenance");
        return Ok(());
    }

    let run_params = RunParameters {
        rep,
        mode,
        params: p,
    };

    update_schedule(&run_params).context("error updating maintenance schedule")?;

    let mut lock_path = rep.config_path().into_os_string();
    lock_path.push(".mlock");
    let lock_path = PathBuf::from(lock_path);
    debug!(path = %lock_path.display(), "acquiring maintenance lock");

    let Some(_lock) = MaintenanceLock::try_acquire(&lock_path)
        .context("error acquiring maintenance lock")?
    else {
        debug!("maintenance is already in progress locally");
        return Ok(());
    };

    info!(%mode, "running maintenance");
    let start = rep.now();
    let result = cb(&run_params);
    let end = rep.now();
    info!(%mode, "finished maintenance");

    let record = RunRecord {
        start,
        end,
        success: result.is_ok(),
        error: result.as_ref().err().map(|e| e.to_string()),
    };
    if let Err(e) = report_run(rep, mode, record) {
        // don't mask the callback result
        warn!(error = %e, "failed to record maintenance run");
    }

    result
}

/// Perform the maintenance activities for an already-resolved mode.
pub fn run(
    run_params: &RunParameters<'_>,
    safety: &SafetyParameters,
    cancel: &CancellationToken,
) -> Result<()> {
    match run_params.mode {
        Mode::Quick => run_quick(run_params, safety, cancel),
        Mode::Full => run_full(run_params, safety, cancel),
        other => Err(StevedoreError::Config(format!(
            "unknown maintenance mode '{other}'"
        ))),
    }
}

/// Quick cycle: drop old tombstones, consolidate short metadata (`q`) packs,
/// collect orphaned metadata blobs.
fn run_quick(
    run_params: &RunParameters<'_>,
    safety: &SafetyParameters,
    cancel: &CancellationToken,
) -> Result<()> {
    let rep = run_params.rep;

    drop_deleted_contents(rep, &run_params.params.drop_deleted_content, safety, cancel)
        .context("error dropping deleted contents")?;

    rewrite_contents(
        rep,
        &RewriteContentsOptions::short_packs(Some(PACK_BLOB_PREFIX_SPECIAL.to_string())),
        safety,
        cancel,
    )
    .context("error rewriting metadata contents")?;

    delete_unreferenced_blobs(
        rep,
        &DeleteUnreferencedBlobsOptions {
            prefix: PACK_BLOB_PREFIX_SPECIAL.to_string(),
            ..Default::default()
        },
        safety,
        cancel,
    )
    .context("error deleting unreferenced metadata blobs")?;

    Ok(())
}

/// Full cycle: drop old tombstones, consolidate all short packs, collect all
/// orphaned packs.
fn run_full(
    run_params: &RunParameters<'_>,
    safety: &SafetyParameters,
    cancel: &CancellationToken,
) -> Result<()> {
    let rep = run_params.rep;

    drop_deleted_contents(rep, &run_params.params.drop_deleted_content, safety, cancel)
        .context("error dropping deleted contents")?;

    rewrite_contents(
        rep,
        &RewriteContentsOptions::short_packs(None),
        safety,
        cancel,
    )
    .context("error rewriting contents in short packs")?;

    delete_unreferenced_blobs(
        rep,
        &DeleteUnreferencedBlobsOptions::default(),
        safety,
        cancel,
    )
    .context("error deleting unreferenced blobs")?;

    Ok(())
}
