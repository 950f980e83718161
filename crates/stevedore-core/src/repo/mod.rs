pub mod engine;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::id::{ContentId, ManifestId};
use crate::index::ContentInfo;
use crate::platform;
use crate::storage::BlobStorage;

use self::engine::{EngineOptions, PackEngine};

/// Storage engine surface the maintenance core drives: enumerate the index,
/// read and re-pack contents, replace indexes, publish pending work.
pub trait ContentManager: Send + Sync {
    /// All index entries across every index generation, tombstones included.
    /// Entries for the same content id may repeat; callers merge as needed.
    fn iter_contents(&self) -> Result<Vec<ContentInfo>>;

    /// Read the payload bytes of a live content.
    fn read_content(&self, id: &ContentId) -> Result<Vec<u8>>;

    /// Copy a live content into a fresh pack destination. The engine assigns
    /// the new `(pack_blob_id, offset)` and stamps the current format
    /// version; the old pack becomes an orphan candidate once the new index
    /// is published.
    fn rewrite_content(&self, id: &ContentId) -> Result<()>;

    /// Replace the persisted indexes with exactly `entries`, retiring all
    /// older index blobs.
    fn rewrite_index(&self, entries: &[ContentInfo]) -> Result<()>;

    /// Durably publish pending packs and index entries.
    fn flush(&self) -> Result<()>;

    /// Target pack size used by the writer; packs under 80% of this are
    /// "short".
    fn target_pack_size(&self) -> u64;
}

/// Metadata of one manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntryMetadata {
    pub id: ManifestId,
    pub length: u64,
    pub mod_time: DateTime<Utc>,
    pub labels: BTreeMap<String, String>,
}

/// Persistence for opaque labeled records (maintenance params, schedule).
pub trait ManifestStore: Send + Sync {
    /// Find manifests whose labels contain every `labels` pair. An empty
    /// filter matches all manifests.
    fn find_manifests(&self, labels: &BTreeMap<String, String>)
        -> Result<Vec<ManifestEntryMetadata>>;

    /// Load a manifest payload. Returns `None` if not found.
    fn get_manifest(&self, id: &ManifestId) -> Result<Option<serde_json::Value>>;

    /// Store a new manifest, returning its id.
    fn put_manifest(
        &self,
        labels: &BTreeMap<String, String>,
        payload: &serde_json::Value,
    ) -> Result<ManifestId>;

    /// Delete a manifest. Deleting a missing manifest is not an error.
    fn delete_manifest(&self, id: &ManifestId) -> Result<()>;
}

/// The subset of a repository that maintenance tasks require.
pub trait MaintainableRepository: Send + Sync {
    fn username(&self) -> String;
    fn hostname(&self) -> String;
    fn now(&self) -> DateTime<Utc>;

    /// Path of the repository config file; the local maintenance lock lives
    /// next to it.
    fn config_path(&self) -> PathBuf;

    fn blob_storage(&self) -> &dyn BlobStorage;
    fn content_manager(&self) -> &dyn ContentManager;
    fn manifest_store(&self) -> &dyn ManifestStore;
}

/// A repository opened directly on a blob store, using the reference
/// [`PackEngine`] as its content manager and manifest store.
pub struct DirectRepository {
    pub storage: Arc<dyn BlobStorage>,
    pub engine: PackEngine,
    username: String,
    hostname: String,
    config_path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl DirectRepository {
    /// Open with the local user's identity and the system clock.
    pub fn open(storage: Arc<dyn BlobStorage>, config_path: impl AsRef<Path>) -> Self {
        Self::open_with(
            storage,
            config_path,
            Arc::new(SystemClock),
            EngineOptions::default(),
        )
    }

    pub fn open_with(
        storage: Arc<dyn BlobStorage>,
        config_path: impl AsRef<Path>,
        clock: Arc<dyn Clock>,
        options: EngineOptions,
    ) -> Self {
        let engine = PackEngine::new(Arc::clone(&storage), Arc::clone(&clock), options);
        DirectRepository {
            storage,
            engine,
            username: platform::username(),
            hostname: platform::hostname(),
            config_path: config_path.as_ref().to_path_buf(),
            clock,
        }
    }

    /// Override the identity reported to the owner check (tests, and
    /// administrative tooling acting on behalf of the configured owner).
    pub fn with_identity(mut self, username: impl Into<String>, hostname: impl Into<String>) -> Self {
        self.username = username.into();
        self.hostname = hostname.into();
        self
    }
}

impl MaintainableRepository for DirectRepository {
    fn username(&self) -> String {
        self.username.clone()
    }

    fn hostname(&self) -> String {
        self.hostname.clone()
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn config_path(&self) -> PathBuf {
        self.config_path.clone()
    }

    fn blob_storage(&self) -> &dyn BlobStorage {
        self.storage.as_ref()
    }

    fn content_manager(&self) -> &dyn ContentManager {
        &self.engine
    }

    fn manifest_store(&self) -> &dyn ManifestStore {
        &self.engine
    }
}
