use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::error::{Result, ResultExt, StevedoreError};
use crate::id::{BlobId, ContentId, ContentIdRange};
use crate::index::{merge_entries, ContentInfo};
use crate::repo::MaintainableRepository;

use super::pool::{run_parallel, FailurePolicy};
use super::safety::SafetyParameters;
use super::DEFAULT_MAINTENANCE_PARALLELISM;

/// A pack is short when its live payload is below this percentage of the
/// target pack size.
pub const SHORT_PACK_THRESHOLD_PERCENT: u64 = 80;

/// Selection criteria for [`rewrite_contents`]. The selection set is the
/// union of the explicit ids, the members of short packs (when
/// `short_packs`), and the id-range/format-version enumeration; every source
/// is restricted by `pack_prefix`.
#[derive(Debug, Clone)]
pub struct RewriteContentsOptions {
    /// Explicit content ids to rewrite.
    pub content_ids: Vec<ContentId>,
    /// Enumerate live contents whose id falls in this inclusive range.
    pub content_id_range: Option<ContentIdRange>,
    /// Only rewrite contents residing in packs with this id prefix.
    pub pack_prefix: Option<String>,
    /// Rewrite members of packs under the short-pack threshold.
    pub short_packs: bool,
    /// When >= 0, only contents whose pack format is older than this
    /// version (applies to the range enumeration; defaults the range to all
    /// ids when none was given). Negative disables the filter.
    pub format_version: i32,
    /// Worker count; 0 means the default of 16.
    pub parallel: usize,
    /// Plan only, no mutation.
    pub dry_run: bool,
}

impl Default for RewriteContentsOptions {
    fn default() -> Self {
        RewriteContentsOptions {
            content_ids: Vec::new(),
            content_id_range: None,
            pack_prefix: None,
            short_packs: false,
            format_version: -1,
            parallel: 0,
            dry_run: false,
        }
    }
}

impl RewriteContentsOptions {
    /// Options used by the orchestrators: consolidate short packs, optionally
    /// restricted to one pack prefix.
    pub fn short_packs(pack_prefix: Option<String>) -> Self {
        RewriteContentsOptions {
            short_packs: true,
            pack_prefix,
            ..Default::default()
        }
    }
}

/// Statistics from one rewrite pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RewriteStats {
    pub contents_selected: usize,
    pub contents_rewritten: usize,
    pub bytes_selected: u64,
}

/// Rewrite contents matching the options into fresh consolidated packs,
/// orphaning their source packs once the new index is published.
pub fn rewrite_contents(
    rep: &dyn MaintainableRepository,
    options: &RewriteContentsOptions,
    safety: &SafetyParameters,
    cancel: &CancellationToken,
) -> Result<RewriteStats> {
    cancel.check()?;

    if options.short_packs {
        info!("rewriting contents from short packs...");
    } else {
        info!("rewriting contents...");
    }

    let raw = rep
        .content_manager()
        .iter_contents()
        .context("error listing contents")?;
    let merged = merge_entries(raw);

    let selection = select_contents(rep, options, &merged)?;

    // Leave very fresh contents alone: a concurrent writer may still be
    // referencing their packs from unpublished state.
    let min_timestamp = rep.now() - safety.rewrite_min_age;
    let selection: Vec<&ContentInfo> = selection
        .into_values()
        .filter(|entry| {
            if entry.timestamp > min_timestamp {
                debug!(content = %entry.content_id, "skipping too-recent content");
                return false;
            }
            true
        })
        .collect();

    let mut stats = RewriteStats {
        contents_selected: selection.len(),
        bytes_selected: selection.iter().map(|e| e.length).sum(),
        ..Default::default()
    };

    if options.dry_run {
        for entry in &selection {
            info!(
                content = %entry.content_id,
                pack = %entry.pack_blob_id,
                length = entry.length,
                "would rewrite"
            );
        }
        return Ok(stats);
    }

    let parallel = if options.parallel == 0 {
        DEFAULT_MAINTENANCE_PARALLELISM
    } else {
        options.parallel
    };

    let manager = rep.content_manager();
    let ids: Vec<ContentId> = selection.iter().map(|e| e.content_id.clone()).collect();
    stats.contents_rewritten = run_parallel(
        parallel,
        ids,
        cancel,
        FailurePolicy::Abort,
        |id| {
            debug!(content = %id, "rewriting content");
            manager.rewrite_content(&id)
        },
    )?;

    // Make sure everything rewritten is durably indexed before reporting
    // success; the source packs only become orphans once this lands.
    manager
        .flush()
        .context("error flushing rewritten contents")?;

    info!(
        rewritten = stats.contents_rewritten,
        bytes = stats.bytes_selected,
        "content rewrite complete"
    );
    Ok(stats)
}

/// Build the selection set from the merged logical index.
fn select_contents<'a>(
    rep: &dyn MaintainableRepository,
    options: &RewriteContentsOptions,
    merged: &'a BTreeMap<ContentId, ContentInfo>,
) -> Result<BTreeMap<ContentId, &'a ContentInfo>> {
    let prefix_matches = |entry: &ContentInfo| -> bool {
        options
            .pack_prefix
            .as_deref()
            .map_or(true, |p| entry.pack_blob_id.has_prefix(p))
    };

    let mut selection: BTreeMap<ContentId, &ContentInfo> = BTreeMap::new();

    if options.short_packs {
        for entry in short_pack_members(rep, options, merged) {
            selection.insert(entry.content_id.clone(), entry);
        }
    }

    // An explicit format version defaults the range to all ids.
    let range = match (&options.content_id_range, options.format_version) {
        (Some(r), _) => Some(r.clone()),
        (None, v) if v >= 0 => Some(ContentIdRange::all()),
        (None, _) => None,
    };
    if let Some(range) = range {
        for entry in merged.values() {
            if entry.deleted || !range.contains(&entry.content_id) || !prefix_matches(entry) {
                continue;
            }
            if options.format_version >= 0
                && entry.format_version >= options.format_version as u32
            {
                continue;
            }
            selection.insert(entry.content_id.clone(), entry);
        }
    }

    for id in &options.content_ids {
        let entry = merged
            .get(id)
            .filter(|e| !e.deleted)
            .ok_or_else(|| StevedoreError::ContentNotFound(id.clone()))?;
        if !prefix_matches(entry) {
            debug!(content = %id, "explicit id outside pack prefix, skipping");
            continue;
        }
        selection.insert(id.clone(), entry);
    }

    Ok(selection)
}

/// Live members of short packs, excluding prefixes with only a single short
/// pack (a lone short pack would just be rewritten to itself).
fn short_pack_members<'a>(
    rep: &dyn MaintainableRepository,
    options: &RewriteContentsOptions,
    merged: &'a BTreeMap<ContentId, ContentInfo>,
) -> Vec<&'a ContentInfo> {
    let target = rep.content_manager().target_pack_size();

    let mut live_bytes: HashMap<&BlobId, u64> = HashMap::new();
    for entry in merged.values() {
        if !entry.deleted {
            *live_bytes.entry(&entry.pack_blob_id).or_default() += entry.length;
        }
    }

    let mut short_packs_per_prefix: HashMap<char, Vec<&BlobId>> = HashMap::new();
    for (pack_id, bytes) in &live_bytes {
        let matches_prefix = options
            .pack_prefix
            .as_deref()
            .map_or(true, |p| pack_id.has_prefix(p));
        if !matches_prefix {
            continue;
        }
        if *bytes * 100 < target * SHORT_PACK_THRESHOLD_PERCENT {
            if let Some(prefix) = pack_id.prefix() {
                short_packs_per_prefix.entry(prefix).or_default().push(*pack_id);
            }
        }
    }

    let mut selected_packs: Vec<&BlobId> = Vec::new();
    for (prefix, packs) in short_packs_per_prefix {
        if packs.len() < 2 {
            debug!(%prefix, "single short pack for prefix, not rewriting");
            continue;
        }
        selected_packs.extend(packs);
    }

    merged
        .values()
        .filter(|entry| !entry.deleted && selected_packs.contains(&&entry.pack_blob_id))
        .collect()
}
