use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::error::{Result, StevedoreError};
use crate::id::BlobId;
use crate::storage::{BlobMetadata, BlobStorage};

/// Directory-backed blob store: one file per blob, named by blob id.
/// Modification times come from filesystem metadata.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Open a store rooted at the given directory, creating it if missing.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn resolve(&self, id: &BlobId) -> Result<PathBuf> {
        let key = id.as_str();
        if key.is_empty() || key.contains('/') || key.contains('\\') || key.contains("..") {
            return Err(StevedoreError::Integrity(format!(
                "unsafe blob id '{key}'"
            )));
        }
        Ok(self.root.join(key))
    }

    fn metadata_of(&self, id: &BlobId, meta: &fs::Metadata) -> BlobMetadata {
        let mod_time: DateTime<Utc> = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        BlobMetadata {
            id: id.clone(),
            length: meta.len(),
            mod_time,
        }
    }
}

impl BlobStorage for LocalBlobStore {
    fn list(&self, prefix: &str) -> Result<Vec<BlobMetadata>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(prefix) {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let id = BlobId::new(name);
            out.push(self.metadata_of(&id, &meta));
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    fn get(&self, id: &BlobId) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(id)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn get_metadata(&self, id: &BlobId) -> Result<Option<BlobMetadata>> {
        let path = self.resolve(id)?;
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(Some(self.metadata_of(id, &meta))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, id: &BlobId, data: &[u8]) -> Result<()> {
        let path = self.resolve(id)?;
        // Write-then-rename so a crashed put never leaves a torn blob.
        let tmp = self.root.join(format!(".tmp-{}", id.as_str()));
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete(&self, id: &BlobId) -> Result<()> {
        let path = self.resolve(id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
