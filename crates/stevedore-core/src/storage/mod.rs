pub mod local;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::id::BlobId;

/// Metadata of one blob as reported by a listing or a metadata probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMetadata {
    pub id: BlobId,
    pub length: u64,
    pub mod_time: DateTime<Utc>,
}

/// Abstract blob storage for repository objects. Blob ids are flat string
/// keys; implementations must be safe for concurrent use.
pub trait BlobStorage: Send + Sync {
    /// List metadata of all blobs whose id starts with `prefix`.
    fn list(&self, prefix: &str) -> Result<Vec<BlobMetadata>>;

    /// Read a blob by id. Returns `None` if not found.
    fn get(&self, id: &BlobId) -> Result<Option<Vec<u8>>>;

    /// Metadata of one blob. Returns `None` if not found.
    fn get_metadata(&self, id: &BlobId) -> Result<Option<BlobMetadata>>;

    /// Write a blob. Overwrites if it already exists.
    fn put(&self, id: &BlobId, data: &[u8]) -> Result<()>;

    /// Delete a blob. Deleting a missing blob is not an error.
    fn delete(&self, id: &BlobId) -> Result<()>;
}

impl BlobStorage for Arc<dyn BlobStorage> {
    fn list(&self, prefix: &str) -> Result<Vec<BlobMetadata>> {
        (**self).list(prefix)
    }
    fn get(&self, id: &BlobId) -> Result<Option<Vec<u8>>> {
        (**self).get(id)
    }
    fn get_metadata(&self, id: &BlobId) -> Result<Option<BlobMetadata>> {
        (**self).get_metadata(id)
    }
    fn put(&self, id: &BlobId, data: &[u8]) -> Result<()> {
        (**self).put(id, data)
    }
    fn delete(&self, id: &BlobId) -> Result<()> {
        (**self).delete(id)
    }
}
