use tracing::info;

use crate::cancel::CancellationToken;
use crate::error::{Result, ResultExt};
use crate::index::merge_entries;
use crate::repo::MaintainableRepository;

use super::params::DropDeletedContentParams;
use super::safety::SafetyParameters;

/// Statistics from one index-compaction pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DropDeletedStats {
    pub entries_examined: usize,
    pub entries_kept: usize,
    pub tombstones_dropped: usize,
}

/// Drop deletion tombstones older than `min_age + safety margin` from the
/// index and rewrite it.
///
/// The merged logical index is partitioned into live entries, tombstones
/// still inside the grace window, and tombstones past it; the rewritten
/// index keeps only the first two groups. A tombstone timestamped in the
/// future (clock skew) is never past the window. Orphaned pack blobs left
/// behind are reclaimed later by blob GC.
pub fn drop_deleted_contents(
    rep: &dyn MaintainableRepository,
    params: &DropDeletedContentParams,
    safety: &SafetyParameters,
    cancel: &CancellationToken,
) -> Result<DropDeletedStats> {
    cancel.check()?;

    let cutoff = rep.now() - params.min_age() - safety.drop_content_from_index_extra_margin;
    info!(%cutoff, "dropping contents deleted before cutoff");

    let raw = rep
        .content_manager()
        .iter_contents()
        .context("error listing contents")?;

    let mut stats = DropDeletedStats {
        entries_examined: raw.len(),
        ..Default::default()
    };

    let merged = merge_entries(raw);
    let mut kept = Vec::with_capacity(merged.len());
    for (_, entry) in merged {
        if entry.deleted && entry.timestamp < cutoff {
            stats.tombstones_dropped += 1;
        } else {
            kept.push(entry);
        }
    }
    stats.entries_kept = kept.len();

    cancel.check()?;

    if stats.tombstones_dropped == 0 && stats.entries_kept == stats.entries_examined {
        info!("no index entries to drop");
        return Ok(stats);
    }

    info!(
        dropped = stats.tombstones_dropped,
        kept = stats.entries_kept,
        "rewriting index"
    );
    rep.content_manager()
        .rewrite_index(&kept)
        .context("error rewriting index")?;

    Ok(stats)
}
