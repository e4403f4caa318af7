//! Digest-keyed disk cache
//!
//! Entries live at `<root>/<namespace>/<key>` and hold raw fetched bytes.
//! A key is always a content digest, so an entry never changes once
//! written: it is created on a miss and only read afterwards.
//!
//! A miss streams into a temp file beside the target and renames it into
//! place; the rename is the only commit point, so a failed fetch or copy
//! never leaves a visible entry. Two callers missing the same key at once
//! will both fetch and both rename identical bytes; the last rename wins.
//!
//! Entries are never evicted.
// TODO: evict least recently used entries once the cache has a size budget

use crate::error::{PorchletError, PorchletResult};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

/// Fetch-once, read-many cache of immutable blobs
#[derive(Debug, Clone)]
pub struct BlobCache {
    root: PathBuf,
}

impl BlobCache {
    /// Create a cache rooted at `root` (created lazily)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the entry for `key` in `namespace`.
    ///
    /// Keys and namespaces are restricted to digest-like characters so they
    /// cannot escape the cache root.
    pub fn entry_path(&self, namespace: &str, key: &str) -> PorchletResult<PathBuf> {
        validate_component(namespace)?;
        validate_component(key)?;
        Ok(self.root.join(namespace).join(key))
    }

    /// Open the entry for `key`, calling `fetch` to populate it on a miss.
    ///
    /// A hit returns the existing file without fetching or re-verifying it.
    pub async fn get_or_fetch<F, Fut, R>(
        &self,
        namespace: &str,
        key: &str,
        fetch: F,
    ) -> PorchletResult<File>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PorchletResult<R>>,
        R: AsyncRead + Unpin,
    {
        let path = self.entry_path(namespace, key)?;

        match File::open(&path).await {
            Ok(file) => {
                debug!("Cache hit: {}", path.display());
                return Ok(file);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(PorchletError::io(
                    format!("opening cache file {}", path.display()),
                    e,
                ))
            }
        }

        debug!("Cache miss: {}", path.display());
        let mut reader = fetch().await?;

        let dir = self.root.join(namespace);
        fs::create_dir_all(&dir).await.map_err(|e| {
            PorchletError::io(format!("creating cache directory {}", dir.display()), e)
        })?;

        let temp_path = dir.join(format!(".{}.{}.tmp", key, Uuid::new_v4()));

        if let Err(e) = write_temp(&temp_path, &mut reader).await {
            remove_temp(&temp_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, &path).await {
            remove_temp(&temp_path).await;
            return Err(PorchletError::io(
                format!(
                    "renaming temp file {} -> {}",
                    temp_path.display(),
                    path.display()
                ),
                e,
            ));
        }

        File::open(&path).await.map_err(|e| {
            PorchletError::io(
                format!("opening cache file {} (after fetch)", path.display()),
                e,
            )
        })
    }

    /// Read the entry for `key` fully into memory, fetching it on a miss
    pub async fn read_or_fetch<F, Fut, R>(
        &self,
        namespace: &str,
        key: &str,
        fetch: F,
    ) -> PorchletResult<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PorchletResult<R>>,
        R: AsyncRead + Unpin,
    {
        use tokio::io::AsyncReadExt;

        let mut file = self.get_or_fetch(namespace, key, fetch).await?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .await
            .map_err(|e| PorchletError::io(format!("reading cache entry {}", key), e))?;
        Ok(data)
    }
}

fn validate_component(component: &str) -> PorchletResult<()> {
    let valid = !component.is_empty()
        && !component.starts_with('.')
        && component
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(PorchletError::Internal(format!(
            "invalid cache key {:?}",
            component
        )))
    }
}

async fn write_temp<R: AsyncRead + Unpin>(path: &Path, reader: &mut R) -> PorchletResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|e| PorchletError::io(format!("creating temp file {}", path.display()), e))?;

    tokio::io::copy(reader, &mut file)
        .await
        .map_err(|e| PorchletError::io("error caching data", e))?;
    file.flush()
        .await
        .map_err(|e| PorchletError::io("error closing temp file", e))?;
    Ok(())
}

async fn remove_temp(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove temp file {}: {}", path.display(), e);
        }
    }
}
