pub mod blob_gc;
pub mod content_rewrite;
pub mod init;
pub mod maintenance_run;
pub mod manifest_list;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use stevedore_core::repo::DirectRepository;
use stevedore_core::storage::local::LocalBlobStore;
use stevedore_core::storage::BlobStorage;

pub(crate) type CmdResult = Result<(), Box<dyn std::error::Error>>;

pub(crate) fn config_path(repo_path: &Path) -> PathBuf {
    repo_path.join("stevedore.config")
}

pub(crate) fn blobs_path(repo_path: &Path) -> PathBuf {
    repo_path.join("blobs")
}

/// Open an initialized repository rooted at `repo`.
pub(crate) fn open_repository(repo: &str) -> Result<DirectRepository, Box<dyn std::error::Error>> {
    let repo_path = Path::new(repo);
    let config = config_path(repo_path);
    if !config.is_file() {
        return Err(format!(
            "no repository at '{repo}' (run `stevedore init` first)"
        )
        .into());
    }

    tracing::debug!(repo, "opening repository");
    let storage: Arc<dyn BlobStorage> = Arc::new(LocalBlobStore::new(blobs_path(repo_path))?);
    Ok(DirectRepository::open(storage, config))
}
