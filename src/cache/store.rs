use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::CacheEntry;
use crate::error::{Error, Result};

/// Durable backing for a [`super::MetadataCache`].
pub trait CacheStore: Send + Sync {
    fn load(&self) -> Result<Vec<CacheEntry>>;
    fn save(&self, entries: &[CacheEntry]) -> Result<()>;
}

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: Vec<CacheEntry>,
}

/// Whole-cache bincode snapshot, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheStore for SnapshotStore {
    fn load(&self) -> Result<Vec<CacheEntry>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(&self.path, e)),
        };
        let snapshot: Snapshot = bincode::deserialize_from(BufReader::new(file)).map_err(|e| {
            Error::CacheCorruption(format!("{}: {}", self.path.display(), e))
        })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::CacheCorruption(format!(
                "{}: unsupported snapshot version {}",
                self.path.display(),
                snapshot.version
            )));
        }
        Ok(snapshot.entries)
    }

    fn save(&self, entries: &[CacheEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            entries: entries.to_vec(),
        };
        {
            let file = fs::File::create(&tmp).map_err(|e| Error::io(&tmp, e))?;
            let mut writer = BufWriter::new(file);
            bincode::serialize_into(&mut writer, &snapshot)
                .map_err(|e| Error::CacheCorruption(e.to_string()))?;
            writer.flush().map_err(|e| Error::io(&tmp, e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| Error::io(&self.path, e))?;
        Ok(())
    }
}

#[cfg(feature = "rocksdb-cache")]
pub use rocks::RocksStore;

#[cfg(feature = "rocksdb-cache")]
mod rocks {
    use rocksdb::{IteratorMode, Options, WriteBatch, DB};
    use std::path::Path;
    use std::time::UNIX_EPOCH;
    use tracing::{debug, warn};

    use super::{CacheEntry, CacheStore};
    use crate::error::{Error, Result};

    /// One RocksDB key per file, `path|mtime` → bincode entry.
    pub struct RocksStore {
        db: DB,
    }

    impl RocksStore {
        pub fn open(path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();
            debug!("Using '{}' for metadata cache", path.display());
            let mut options = Options::default();
            options.create_if_missing(true);
            let db = DB::open(&options, path)
                .map_err(|e| Error::CacheCorruption(format!("{}: {}", path.display(), e)))?;
            Ok(Self { db })
        }

        fn key(entry: &CacheEntry) -> Vec<u8> {
            let secs = entry
                .identity
                .modified
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            format!("{}|{}", entry.identity.path.to_string_lossy(), secs).into_bytes()
        }
    }

    impl CacheStore for RocksStore {
        fn load(&self) -> Result<Vec<CacheEntry>> {
            let mut entries = Vec::new();
            for item in self.db.iterator(IteratorMode::Start) {
                let (key, value) = item.map_err(|e| Error::CacheCorruption(e.to_string()))?;
                match bincode::deserialize::<CacheEntry>(&value) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!(
                        "Skipping unreadable cache record '{}': {}",
                        String::from_utf8_lossy(&key),
                        e
                    ),
                }
            }
            Ok(entries)
        }

        fn save(&self, entries: &[CacheEntry]) -> Result<()> {
            let mut batch = WriteBatch::default();
            for item in self.db.iterator(IteratorMode::Start) {
                let (key, _) = item.map_err(|e| Error::CacheCorruption(e.to_string()))?;
                batch.delete(key);
            }
            for entry in entries {
                let value = bincode::serialize(entry)
                    .map_err(|e| Error::CacheCorruption(e.to_string()))?;
                batch.put(Self::key(entry), value);
            }
            self.db
                .write(batch)
                .map_err(|e| Error::CacheCorruption(e.to_string()))
        }
    }
}
