use stevedore_core::cancel::CancellationToken;
use stevedore_core::maintenance::{
    delete_unreferenced_blobs, DeleteUnreferencedBlobsOptions, SafetyParameters,
};

use crate::cli::BlobCommand;

use super::{open_repository, CmdResult};

pub(crate) fn run(repo: &str, command: &BlobCommand, cancel: &CancellationToken) -> CmdResult {
    match command {
        BlobCommand::Gc {
            delete,
            parallel,
            prefix,
            safety,
        } => gc(repo, delete, *parallel, prefix, safety, cancel),
    }
}

fn gc(
    repo: &str,
    delete: &str,
    parallel: usize,
    prefix: &str,
    safety: &str,
    cancel: &CancellationToken,
) -> CmdResult {
    let safety: SafetyParameters = safety.parse()?;
    let rep = open_repository(repo)?;

    let options = DeleteUnreferencedBlobsOptions {
        // anything but a literal "yes" stays a dry run
        dry_run: delete != "yes",
        parallel,
        prefix: prefix.to_string(),
    };

    let n = delete_unreferenced_blobs(&rep, &options, &safety, cancel)?;

    if options.dry_run {
        println!("{n} unreferenced blobs would be deleted.");
        if n > 0 {
            println!("Pass --delete=yes to delete.");
        }
    } else {
        println!("Deleted {n} unreferenced blobs.");
    }
    Ok(())
}
