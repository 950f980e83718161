use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use crate::clock::Clock;
use crate::error::Result;
use crate::id::{BlobId, ContentId};
use crate::maintenance::{set_params, MaintenanceParams};
use crate::repo::engine::EngineOptions;
use crate::repo::{ContentManager, DirectRepository};
use crate::storage::{BlobMetadata, BlobStorage};

pub const TEST_USERNAME: &str = "tester";
pub const TEST_HOSTNAME: &str = "testhost";

/// Manually advanced clock so grace-period logic is testable without
/// sleeping.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new() -> Arc<Self> {
        Arc::new(FixedClock {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
        })
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// In-memory blob store. Mod times come from the test clock.
pub struct MemoryBlobStore {
    clock: Arc<FixedClock>,
    data: Mutex<BTreeMap<String, (Vec<u8>, DateTime<Utc>)>>,
}

impl MemoryBlobStore {
    pub fn new(clock: Arc<FixedClock>) -> Self {
        MemoryBlobStore {
            clock,
            data: Mutex::new(BTreeMap::new()),
        }
    }

    /// Snapshot of the full store for byte-identical dry-run assertions.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.data
            .lock()
            .unwrap()
            .iter()
            .map(|(k, (v, _))| (k.clone(), v.clone()))
            .collect()
    }
}

impl BlobStorage for MemoryBlobStore {
    fn list(&self, prefix: &str) -> Result<Vec<BlobMetadata>> {
        let map = self.data.lock().unwrap();
        Ok(map
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, (v, t))| BlobMetadata {
                id: BlobId::new(k.clone()),
                length: v.len() as u64,
                mod_time: *t,
            })
            .collect())
    }

    fn get(&self, id: &BlobId) -> Result<Option<Vec<u8>>> {
        let map = self.data.lock().unwrap();
        Ok(map.get(id.as_str()).map(|(v, _)| v.clone()))
    }

    fn get_metadata(&self, id: &BlobId) -> Result<Option<BlobMetadata>> {
        let map = self.data.lock().unwrap();
        Ok(map.get(id.as_str()).map(|(v, t)| BlobMetadata {
            id: id.clone(),
            length: v.len() as u64,
            mod_time: *t,
        }))
    }

    fn put(&self, id: &BlobId, data: &[u8]) -> Result<()> {
        let mut map = self.data.lock().unwrap();
        map.insert(id.as_str().to_string(), (data.to_vec(), self.clock.now()));
        Ok(())
    }

    fn delete(&self, id: &BlobId) -> Result<()> {
        let mut map = self.data.lock().unwrap();
        map.remove(id.as_str());
        Ok(())
    }
}

/// A maintainable repository over [`MemoryBlobStore`], owned by the test
/// identity, with a small target pack size so every test pack is short.
pub struct TestRepo {
    pub rep: DirectRepository,
    pub storage: Arc<MemoryBlobStore>,
    pub clock: Arc<FixedClock>,
    _tmp: TempDir,
}

pub const TEST_TARGET_PACK_SIZE: u64 = 1 << 20;

pub fn test_repo() -> TestRepo {
    let clock = FixedClock::new();
    let storage = Arc::new(MemoryBlobStore::new(Arc::clone(&clock)));
    let tmp = tempfile::tempdir().expect("failed to create tempdir");

    let rep = DirectRepository::open_with(
        Arc::clone(&storage) as Arc<dyn BlobStorage>,
        tmp.path().join("repo.config"),
        Arc::clone(&clock) as Arc<dyn Clock>,
        EngineOptions {
            target_pack_size: TEST_TARGET_PACK_SIZE,
        },
    )
    .with_identity(TEST_USERNAME, TEST_HOSTNAME);

    let params = MaintenanceParams {
        owner: format!("{TEST_USERNAME}@{TEST_HOSTNAME}"),
        ..Default::default()
    };
    set_params(&rep, &params).expect("failed to store maintenance params");

    TestRepo {
        rep,
        storage,
        clock,
        _tmp: tmp,
    }
}

impl TestRepo {
    /// Write one content and publish it, like one writer session would.
    /// Advances the clock a second so timestamps stay strictly ordered.
    pub fn write_session(&self, prefix: Option<char>, data: &[u8]) -> ContentId {
        self.clock.advance(Duration::seconds(1));
        let id = self.rep.engine.write_content(prefix, data).unwrap();
        self.rep.engine.flush().unwrap();
        id
    }

    /// Count pack blobs with the given prefix.
    pub fn count_blobs(&self, prefix: &str) -> usize {
        self.storage.list(prefix).unwrap().len()
    }
}
