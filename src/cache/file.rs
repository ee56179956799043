//! On-disk cache: one JSON file per key under a cache directory.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::{CacheEntry, CacheError, CacheStore};

pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| CacheError::Io {
                path: dir.clone(),
                source,
            })?;
        debug!(dir = %dir.display(), "Opened file cache");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keys are arbitrary strings, so file names come from their digest. The
    /// key itself is stored in the file and checked on read.
    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{digest:x}.json"))
    }

    async fn load(path: &Path) -> Result<Option<CacheEntry>, CacheError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CacheError::Io {
                    path: path.to_owned(),
                    source,
                });
            }
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn delete(path: &Path) -> Result<(), CacheError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CacheError::Io {
                path: path.to_owned(),
                source,
            }),
        }
    }
}

#[async_trait::async_trait]
impl CacheStore for FileStore {
    async fn read(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.path_for(key);
        match Self::load(&path).await? {
            Some(entry) if entry.key == key => Ok(Some(entry)),
            Some(entry) => {
                warn!(
                    path = %path.display(),
                    stored_key = entry.key,
                    "Cache file key mismatch, ignoring"
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn write(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let path = self.path_for(&entry.key);
        let bytes = serde_json::to_vec(entry)?;
        let dir = self.dir.clone();

        // Each writer gets its own temp file, so concurrent puts of one key
        // race only on the final rename.
        tokio::task::spawn_blocking(move || {
            let mut tmp = NamedTempFile::new_in(&dir).map_err(|source| CacheError::Io {
                path: dir.clone(),
                source,
            })?;
            tmp.write_all(&bytes).map_err(|source| CacheError::Io {
                path: tmp.path().to_owned(),
                source,
            })?;
            tmp.persist(&path).map_err(|e| CacheError::Io {
                path: path.clone(),
                source: e.error,
            })?;
            Ok(())
        })
        .await
        .map_err(|e| CacheError::Io {
            path: self.path_for(&entry.key),
            source: std::io::Error::other(e),
        })?
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        Self::delete(&self.path_for(key)).await
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, CacheError> {
        let io_err = |source| CacheError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut dir = tokio::fs::read_dir(&self.dir).await.map_err(io_err)?;
        let mut purged = 0;

        while let Some(item) = dir.next_entry().await.map_err(io_err)? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stale = match Self::load(&path).await {
                Ok(Some(entry)) => entry.stored_at < cutoff,
                Ok(None) => false,
                // Unreadable files can never produce a hit.
                Err(e) => {
                    debug!(path = %path.display(), error = ?e, "Dropping unreadable cache file");
                    true
                }
            };
            if stale {
                Self::delete(&path).await?;
                purged += 1;
            }
        }

        Ok(purged)
    }
}
