use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("store lock poisoned")]
    Poisoned,
}

/// A JSON array of records shared with another process.
///
/// File-backed collections are re-read on every operation so edits made by
/// the owning collaborator are picked up; writes go to a temp file that is
/// renamed over the original. In-memory collections keep their records in
/// the mutex.
pub struct JsonCollection<T> {
    path: Option<PathBuf>,
    records: Mutex<Vec<T>>,
}

impl<T> JsonCollection<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub fn file(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn read(&self) -> Result<Vec<T>, SyncError> {
        self.modify(|records| (records.clone(), false))
    }

    /// Run `f` over the current records. `f` returns its result and whether
    /// it changed anything; changes are written back before returning.
    pub fn modify<R>(&self, f: impl FnOnce(&mut Vec<T>) -> (R, bool)) -> Result<R, SyncError> {
        let mut cached = self.records.lock().map_err(|_| SyncError::Poisoned)?;
        let Some(path) = &self.path else {
            return Ok(f(&mut *cached).0);
        };
        let mut records = load(path)?;
        let (result, changed) = f(&mut records);
        if changed {
            save(path, &records)?;
        }
        *cached = records;
        Ok(result)
    }
}

fn load<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, SyncError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(SyncError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(&raw).map_err(|source| SyncError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn save<T: Serialize>(path: &Path, records: &[T]) -> Result<(), SyncError> {
    let io_err = |source: io::Error| SyncError::Io {
        path: path.to_path_buf(),
        source,
    };
    let tmp = path.with_extension("json.tmp");
    let mut writer = BufWriter::new(File::create(&tmp).map_err(io_err)?);
    serde_json::to_writer_pretty(&mut writer, records).map_err(|source| SyncError::Json {
        path: tmp.clone(),
        source,
    })?;
    writer.flush().map_err(io_err)?;
    writer.get_ref().sync_all().map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}
