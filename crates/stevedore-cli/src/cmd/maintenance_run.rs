use stevedore_core::cancel::CancellationToken;
use stevedore_core::maintenance::{self, Mode, SafetyParameters};

use crate::cli::MaintenanceCommand;

use super::{open_repository, CmdResult};

pub(crate) fn run(repo: &str, command: &MaintenanceCommand, cancel: &CancellationToken) -> CmdResult {
    match command {
        MaintenanceCommand::Run { mode, safety } => run_maintenance(repo, mode, safety, cancel),
        MaintenanceCommand::Info => info(repo),
    }
}

fn run_maintenance(repo: &str, mode: &str, safety: &str, cancel: &CancellationToken) -> CmdResult {
    let mode: Mode = mode.parse()?;
    let safety: SafetyParameters = safety.parse()?;
    let rep = open_repository(repo)?;

    maintenance::run_exclusive(&rep, mode, cancel, |run_params| {
        maintenance::run(run_params, &safety, cancel)
    })?;
    Ok(())
}

fn info(repo: &str) -> CmdResult {
    let rep = open_repository(repo)?;
    let params = maintenance::get_params(&rep)?;
    let schedule = maintenance::get_schedule(&rep)?;

    println!("Owner: {}", if params.owner.is_empty() { "(not set)" } else { &params.owner });
    println!(
        "Quick cycle: {} every {}s",
        if params.quick_cycle.enabled { "enabled" } else { "disabled" },
        params.quick_cycle.interval_seconds,
    );
    println!(
        "Full cycle: {} every {}s",
        if params.full_cycle.enabled { "enabled" } else { "disabled" },
        params.full_cycle.interval_seconds,
    );
    println!(
        "Drop deleted contents after: {}s",
        params.drop_deleted_content.min_age_seconds,
    );

    match schedule.next_quick_maintenance_time {
        Some(t) => println!("Next quick maintenance: {t}"),
        None => println!("Next quick maintenance: due now"),
    }
    match schedule.next_full_maintenance_time {
        Some(t) => println!("Next full maintenance: {t}"),
        None => println!("Next full maintenance: due now"),
    }

    for (mode, records) in &schedule.runs {
        for record in records {
            let outcome = if record.success {
                "SUCCESS".to_string()
            } else {
                format!("ERROR: {}", record.error.as_deref().unwrap_or("unknown"))
            };
            println!("  {mode} {} .. {} {outcome}", record.start, record.end);
        }
    }
    Ok(())
}
