use std::collections::HashSet;

use tracing::{info, warn};

use crate::cancel::CancellationToken;
use crate::error::{Result, ResultExt};
use crate::id::BlobId;
use crate::index::merge_entries;
use crate::repo::MaintainableRepository;
use crate::storage::BlobMetadata;

use super::pool::{run_parallel, FailurePolicy};
use super::safety::SafetyParameters;
use super::DEFAULT_MAINTENANCE_PARALLELISM;

/// Options for [`delete_unreferenced_blobs`].
#[derive(Debug, Clone, Default)]
pub struct DeleteUnreferencedBlobsOptions {
    /// Report candidates without deleting.
    pub dry_run: bool,
    /// Worker count; 0 means the default of 16.
    pub parallel: usize,
    /// Restrict both the candidate listing and the referenced-set
    /// computation to blob ids with this prefix.
    pub prefix: String,
}

/// Delete pack blobs no longer referenced by the logical index, honoring the
/// safety profile's minimum blob age. Returns the number of blobs deleted
/// (or that would be deleted under `dry_run`).
pub fn delete_unreferenced_blobs(
    rep: &dyn MaintainableRepository,
    options: &DeleteUnreferencedBlobsOptions,
    safety: &SafetyParameters,
    cancel: &CancellationToken,
) -> Result<usize> {
    cancel.check()?;

    let referenced = referenced_packs(rep, &options.prefix)?;

    let min_mod_time = rep.now() - safety.blob_delete_min_age;
    let mut candidates: Vec<BlobMetadata> = rep
        .blob_storage()
        .list(&options.prefix)
        .context("error listing pack blobs")?
        .into_iter()
        .filter(|meta| meta.id.is_pack() && !referenced.contains(&meta.id))
        .collect();

    let total_unreferenced = candidates.len();
    candidates.retain(|meta| meta.mod_time < min_mod_time);
    if candidates.len() < total_unreferenced {
        info!(
            skipped = total_unreferenced - candidates.len(),
            "leaving recently modified unreferenced blobs alone"
        );
    }

    // A blob must be observed unreferenced by two index scans before it is
    // destroyed: the second pass catches entries published between the first
    // scan and now.
    if safety.require_two_queue_scan_passes && !candidates.is_empty() {
        cancel.check()?;
        let second = referenced_packs(rep, &options.prefix)?;
        candidates.retain(|meta| !second.contains(&meta.id));
    }

    if options.dry_run {
        for meta in &candidates {
            info!(blob = %meta.id, length = meta.length, "would delete unreferenced blob");
        }
        return Ok(candidates.len());
    }

    let parallel = if options.parallel == 0 {
        DEFAULT_MAINTENANCE_PARALLELISM
    } else {
        options.parallel
    };

    let storage = rep.blob_storage();
    let deleted = run_parallel(
        parallel,
        candidates,
        cancel,
        FailurePolicy::Continue,
        |meta| {
            info!(blob = %meta.id, length = meta.length, "deleting unreferenced blob");
            storage.delete(&meta.id).map_err(|e| {
                warn!(blob = %meta.id, error = %e, "failed to delete blob");
                e
            })
        },
    )?;

    info!(deleted, "blob GC complete");
    Ok(deleted)
}

/// Pack blobs referenced by the merged logical index (tombstones still pin
/// their pack until dropped), restricted to `prefix`.
fn referenced_packs(
    rep: &dyn MaintainableRepository,
    prefix: &str,
) -> Result<HashSet<BlobId>> {
    let raw = rep
        .content_manager()
        .iter_contents()
        .context("error listing contents")?;

    Ok(merge_entries(raw)
        .into_values()
        .filter(|e| !e.pack_blob_id.as_str().is_empty())
        .map(|e| e.pack_blob_id)
        .filter(|id| id.has_prefix(prefix))
        .collect())
}
