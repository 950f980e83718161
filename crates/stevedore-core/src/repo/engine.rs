use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::error::{Result, StevedoreError};
use crate::id::{BlobId, ContentId, ManifestId, INDEX_BLOB_PREFIX, MANIFEST_BLOB_PREFIX};
use crate::index::{merge_entries, ContentInfo, CURRENT_FORMAT_VERSION};
use crate::repo::{ContentManager, ManifestEntryMetadata, ManifestStore};
use crate::storage::BlobStorage;

/// Default target pack size (packs under 80% of this are "short").
pub const DEFAULT_TARGET_PACK_SIZE: u64 = 20 << 20;

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub target_pack_size: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            target_pack_size: DEFAULT_TARGET_PACK_SIZE,
        }
    }
}

/// A pack being accumulated in memory. Its blob id is assigned up front so
/// index entries can be produced as payloads are appended.
struct PendingPack {
    pack_id: BlobId,
    buffer: Vec<u8>,
    entries: Vec<ContentInfo>,
}

#[derive(Default)]
struct EngineState {
    /// One open pack per pack prefix character.
    pending_packs: BTreeMap<char, PendingPack>,
    /// Entries of sealed-but-unindexed packs, plus pending tombstones.
    pending_entries: Vec<ContentInfo>,
}

/// Reference content manager and manifest store over a [`BlobStorage`]:
/// raw concatenated packs, JSON index blobs (`n…`), JSON manifest blobs
/// (`m…`). Deliberately the simplest engine satisfying the maintenance
/// core's capability surface; internally synchronized.
pub struct PackEngine {
    storage: Arc<dyn BlobStorage>,
    clock: Arc<dyn Clock>,
    target_pack_size: u64,
    state: Mutex<EngineState>,
}

/// On-disk form of one manifest blob.
#[derive(Debug, Serialize, Deserialize)]
struct ManifestRecord {
    labels: BTreeMap<String, String>,
    mod_time: DateTime<Utc>,
    payload: serde_json::Value,
}

impl PackEngine {
    pub fn new(storage: Arc<dyn BlobStorage>, clock: Arc<dyn Clock>, options: EngineOptions) -> Self {
        PackEngine {
            storage,
            clock,
            target_pack_size: options.target_pack_size,
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Write a payload as a new content with an optional metadata prefix
    /// letter. Returns the (deduplicated) content id.
    pub fn write_content(&self, prefix: Option<char>, data: &[u8]) -> Result<ContentId> {
        let id = ContentId::from_payload(prefix, data);

        let merged = merge_entries(self.iter_contents()?);
        if merged.get(&id).is_some_and(|e| !e.deleted) {
            return Ok(id); // dedup hit
        }

        let mut state = self.state.lock().unwrap();
        self.append_payload(&mut state, id.clone(), data)?;
        Ok(id)
    }

    /// Mark a live content as deleted. The tombstone keeps the pack
    /// location so the pack stays referenced until the entry is dropped.
    pub fn delete_content(&self, id: &ContentId) -> Result<()> {
        let merged = merge_entries(self.iter_contents()?);
        let entry = merged
            .get(id)
            .filter(|e| !e.deleted)
            .ok_or_else(|| StevedoreError::ContentNotFound(id.clone()))?;

        let tombstone = entry.deleted_at(self.clock.now());
        self.state.lock().unwrap().pending_entries.push(tombstone);
        Ok(())
    }

    /// Append `data` to the open pack for this content's prefix, sealing the
    /// pack once it reaches the target size.
    fn append_payload(&self, state: &mut EngineState, id: ContentId, data: &[u8]) -> Result<()> {
        let pack_prefix = id.pack_prefix();
        let pack = state
            .pending_packs
            .entry(pack_prefix)
            .or_insert_with(|| PendingPack {
                pack_id: BlobId::random(pack_prefix),
                buffer: Vec::new(),
                entries: Vec::new(),
            });

        let offset = pack.buffer.len() as u64;
        pack.buffer.extend_from_slice(data);
        pack.entries.push(ContentInfo {
            content_id: id,
            pack_blob_id: pack.pack_id.clone(),
            pack_offset: offset,
            length: data.len() as u64,
            format_version: CURRENT_FORMAT_VERSION,
            deleted: false,
            timestamp: self.clock.now(),
        });

        if pack.buffer.len() as u64 >= self.target_pack_size {
            self.seal_pack(state, pack_prefix)?;
        }
        Ok(())
    }

    /// Write the open pack for `prefix` to storage and queue its entries for
    /// the next index blob.
    fn seal_pack(&self, state: &mut EngineState, prefix: char) -> Result<()> {
        let Some(pack) = state.pending_packs.remove(&prefix) else {
            return Ok(());
        };
        debug!(pack = %pack.pack_id, entries = pack.entries.len(), "sealing pack");
        self.storage.put(&pack.pack_id, &pack.buffer)?;
        state.pending_entries.extend(pack.entries);
        Ok(())
    }

    /// Entries persisted in index blobs (no pending state).
    fn load_index_entries(&self) -> Result<Vec<ContentInfo>> {
        let mut entries = Vec::new();
        for meta in self.storage.list(&INDEX_BLOB_PREFIX.to_string())? {
            let Some(data) = self.storage.get(&meta.id)? else {
                continue; // listed blob vanished mid-scan
            };
            let mut parsed: Vec<ContentInfo> = serde_json::from_slice(&data)?;
            entries.append(&mut parsed);
        }
        Ok(entries)
    }

    fn read_entry_bytes(&self, entry: &ContentInfo) -> Result<Vec<u8>> {
        // The pack may still be open in memory.
        {
            let state = self.state.lock().unwrap();
            for pack in state.pending_packs.values() {
                if pack.pack_id == entry.pack_blob_id {
                    let start = entry.pack_offset as usize;
                    let end = start + entry.length as usize;
                    return Ok(pack.buffer[start..end].to_vec());
                }
            }
        }

        let data = self
            .storage
            .get(&entry.pack_blob_id)?
            .ok_or_else(|| {
                StevedoreError::Integrity(format!(
                    "index entry for {} references missing pack blob {}",
                    entry.content_id, entry.pack_blob_id
                ))
            })?;

        let start = entry.pack_offset as usize;
        let end = start + entry.length as usize;
        if end > data.len() {
            return Err(StevedoreError::Integrity(format!(
                "pack blob {} shorter than index entry for {} ({}..{} of {})",
                entry.pack_blob_id,
                entry.content_id,
                start,
                end,
                data.len()
            )));
        }
        Ok(data[start..end].to_vec())
    }
}

impl ContentManager for PackEngine {
    fn iter_contents(&self) -> Result<Vec<ContentInfo>> {
        let mut entries = self.load_index_entries()?;
        let state = self.state.lock().unwrap();
        entries.extend(state.pending_entries.iter().cloned());
        for pack in state.pending_packs.values() {
            entries.extend(pack.entries.iter().cloned());
        }
        Ok(entries)
    }

    fn read_content(&self, id: &ContentId) -> Result<Vec<u8>> {
        let merged = merge_entries(self.iter_contents()?);
        let entry = merged
            .get(id)
            .filter(|e| !e.deleted)
            .ok_or_else(|| StevedoreError::ContentNotFound(id.clone()))?;
        self.read_entry_bytes(entry)
    }

    fn rewrite_content(&self, id: &ContentId) -> Result<()> {
        let merged = merge_entries(self.iter_contents()?);
        let entry = merged
            .get(id)
            .filter(|e| !e.deleted)
            .ok_or_else(|| StevedoreError::ContentNotFound(id.clone()))?;
        let data = self.read_entry_bytes(entry)?;

        let mut state = self.state.lock().unwrap();
        self.append_payload(&mut state, id.clone(), &data)
    }

    fn rewrite_index(&self, entries: &[ContentInfo]) -> Result<()> {
        let old: Vec<BlobId> = self
            .storage
            .list(&INDEX_BLOB_PREFIX.to_string())?
            .into_iter()
            .map(|m| m.id)
            .collect();

        let new_id = BlobId::random(INDEX_BLOB_PREFIX);
        self.storage.put(&new_id, &serde_json::to_vec(entries)?)?;

        for id in old {
            self.storage.delete(&id)?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let prefixes: Vec<char> = state.pending_packs.keys().copied().collect();
        for prefix in prefixes {
            self.seal_pack(&mut state, prefix)?;
        }

        if state.pending_entries.is_empty() {
            return Ok(());
        }
        let index_id = BlobId::random(INDEX_BLOB_PREFIX);
        self.storage
            .put(&index_id, &serde_json::to_vec(&state.pending_entries)?)?;
        debug!(index = %index_id, entries = state.pending_entries.len(), "published index");
        state.pending_entries.clear();
        Ok(())
    }

    fn target_pack_size(&self) -> u64 {
        self.target_pack_size
    }
}

impl ManifestStore for PackEngine {
    fn find_manifests(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ManifestEntryMetadata>> {
        let mut out = Vec::new();
        for meta in self.storage.list(&MANIFEST_BLOB_PREFIX.to_string())? {
            let Some(data) = self.storage.get(&meta.id)? else {
                continue;
            };
            let record: ManifestRecord = serde_json::from_slice(&data)?;
            let matches = labels
                .iter()
                .all(|(k, v)| record.labels.get(k) == Some(v));
            if matches {
                out.push(ManifestEntryMetadata {
                    id: ManifestId::new(meta.id.as_str()),
                    length: meta.length,
                    mod_time: record.mod_time,
                    labels: record.labels,
                });
            }
        }
        Ok(out)
    }

    fn get_manifest(&self, id: &ManifestId) -> Result<Option<serde_json::Value>> {
        let blob_id = BlobId::new(id.as_str());
        match self.storage.get(&blob_id)? {
            Some(data) => {
                let record: ManifestRecord = serde_json::from_slice(&data)?;
                Ok(Some(record.payload))
            }
            None => Ok(None),
        }
    }

    fn put_manifest(
        &self,
        labels: &BTreeMap<String, String>,
        payload: &serde_json::Value,
    ) -> Result<ManifestId> {
        let record = ManifestRecord {
            labels: labels.clone(),
            mod_time: self.clock.now(),
            payload: payload.clone(),
        };
        let blob_id = BlobId::random(MANIFEST_BLOB_PREFIX);
        self.storage.put(&blob_id, &serde_json::to_vec(&record)?)?;
        Ok(ManifestId::new(blob_id.as_str()))
    }

    fn delete_manifest(&self, id: &ManifestId) -> Result<()> {
        self.storage.delete(&BlobId::new(id.as_str()))
    }
}
