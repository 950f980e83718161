use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{BlobId, ContentId};

/// Format version stamped on newly written pack entries. Rewriting a content
/// always upgrades it to this version.
pub const CURRENT_FORMAT_VERSION: u32 = 2;

/// One persistent index entry: where a content lives and whether it is
/// deleted. Indexes are immutable blobs holding arrays of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentInfo {
    pub content_id: ContentId,
    pub pack_blob_id: BlobId,
    pub pack_offset: u64,
    pub length: u64,
    pub format_version: u32,
    pub deleted: bool,
    pub timestamp: DateTime<Utc>,
}

impl ContentInfo {
    /// A tombstone superseding `self` at `timestamp`. Location fields are
    /// kept so the pack stays referenced until the tombstone is dropped.
    pub fn deleted_at(&self, timestamp: DateTime<Utc>) -> Self {
        ContentInfo {
            deleted: true,
            timestamp,
            ..self.clone()
        }
    }
}

/// Merge raw index entries (possibly spanning several index generations)
/// into the logical index: per content id the newest timestamp wins, and on
/// a timestamp tie the deleted entry wins so content is never resurrected.
pub fn merge_entries<I>(entries: I) -> BTreeMap<ContentId, ContentInfo>
where
    I: IntoIterator<Item = ContentInfo>,
{
    let mut merged: BTreeMap<ContentId, ContentInfo> = BTreeMap::new();
    for entry in entries {
        match merged.get(&entry.content_id) {
            Some(existing)
                if existing.timestamp > entry.timestamp
                    || (existing.timestamp == entry.timestamp
                        && existing.deleted
                        && !entry.deleted) =>
            {
                // keep existing
            }
            _ => {
                merged.insert(entry.content_id.clone(), entry);
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(id: &str, ts: i64, deleted: bool) -> ContentInfo {
        ContentInfo {
            content_id: ContentId::new(id),
            pack_blob_id: BlobId::new("p00"),
            pack_offset: 0,
            length: 4,
            format_version: CURRENT_FORMAT_VERSION,
            deleted,
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
        }
    }

    #[test]
    fn newest_entry_wins() {
        let merged = merge_entries(vec![entry("aa", 100, false), entry("aa", 200, true)]);
        assert!(merged[&ContentId::new("aa")].deleted);

        let merged = merge_entries(vec![entry("aa", 200, true), entry("aa", 100, false)]);
        assert!(merged[&ContentId::new("aa")].deleted);
    }

    #[test]
    fn tie_prefers_deleted() {
        let merged = merge_entries(vec![entry("aa", 100, false), entry("aa", 100, true)]);
        assert!(merged[&ContentId::new("aa")].deleted);

        let merged = merge_entries(vec![entry("aa", 100, true), entry("aa", 100, false)]);
        assert!(merged[&ContentId::new("aa")].deleted);
    }

    #[test]
    fn distinct_ids_kept() {
        let merged = merge_entries(vec![entry("aa", 100, false), entry("bb", 100, false)]);
        assert_eq!(merged.len(), 2);
    }
}
