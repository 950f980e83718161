use std::fs;
use std::path::Path;
use std::sync::Arc;

use stevedore_core::maintenance::{set_params, MaintenanceParams};
use stevedore_core::platform;
use stevedore_core::repo::DirectRepository;
use stevedore_core::storage::local::LocalBlobStore;
use stevedore_core::storage::BlobStorage;

use super::{blobs_path, config_path, CmdResult};

pub(crate) fn run(repo: &str, owner: Option<&str>) -> CmdResult {
    let repo_path = Path::new(repo);
    let config = config_path(repo_path);
    if config.exists() {
        return Err(format!("repository already exists at '{repo}'").into());
    }

    fs::create_dir_all(repo_path)?;
    let storage: Arc<dyn BlobStorage> = Arc::new(LocalBlobStore::new(blobs_path(repo_path))?);
    fs::write(&config, b"{\"format\":\"stevedore-repository\",\"version\":1}\n")?;

    let rep = DirectRepository::open(storage, &config);

    let params = MaintenanceParams {
        owner: owner
            .map(str::to_string)
            .unwrap_or_else(platform::local_owner),
        ..Default::default()
    };
    set_params(&rep, &params)?;

    println!("Repository initialized at: {repo}");
    println!("Maintenance owner: {}", params.owner);
    Ok(())
}
