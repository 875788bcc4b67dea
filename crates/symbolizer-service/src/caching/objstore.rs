use std::collections::BTreeMap;
use std::fmt::Debug;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::config::ObjectStoreConfig;

/// An error reading from or writing to an [`ObjectStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found")]
    NotFound,
    #[error("invalid object key {0:?}")]
    InvalidKey(String),
    #[error("{context}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    fn io(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Io { context, source }
    }
}

/// A flat key/value store of immutable blobs.
#[async_trait]
pub trait ObjectStore: Debug + Send + Sync {
    /// A short name used in logs and metric tags.
    fn name(&self) -> &'static str;

    /// Reads the object stored under `key`.
    async fn get(&self, key: &str) -> Result<Bytes, StoreError>;

    /// Stores `data` under `key`.
    async fn upload(&self, key: &str, data: Bytes) -> Result<(), StoreError>;
}

/// Creates the store described by `config`.
pub fn from_config(config: &ObjectStoreConfig) -> Arc<dyn ObjectStore> {
    match config {
        ObjectStoreConfig::Memory => Arc::new(MemoryStore::default()),
        ObjectStoreConfig::Filesystem { path } => Arc::new(FilesystemStore::new(path.clone())),
    }
}

/// Keeps objects in memory. Everything is lost with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
}

impl MemoryStore {
    fn objects(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Bytes>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        self.objects().get(key).cloned().ok_or(StoreError::NotFound)
    }

    async fn upload(&self, key: &str, data: Bytes) -> Result<(), StoreError> {
        self.objects().insert(key.to_owned(), data);
        Ok(())
    }
}

/// Stores every object as a file below a root directory.
///
/// Keys may contain `/` and map to nested directories. Files are written to a temporary file
/// first and moved into place, so readers never observe partial objects.
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    path: PathBuf,
}

impl FilesystemStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let is_plain = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !is_plain {
            return Err(StoreError::InvalidKey(key.to_owned()));
        }
        Ok(self.path.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let abspath = self.object_path(key)?;
        tracing::trace!("Fetching object from {}", abspath.display());
        match fs::read(&abspath).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(err) => Err(StoreError::io("failed to read object")(err)),
        }
    }

    async fn upload(&self, key: &str, data: Bytes) -> Result<(), StoreError> {
        let abspath = self.object_path(key)?;
        let parent_dir = abspath
            .parent()
            .ok_or_else(|| StoreError::InvalidKey(key.to_owned()))?;
        fs::create_dir_all(parent_dir)
            .await
            .map_err(StoreError::io("failed to create parent directories"))?;

        let temp_dir = parent_dir.join(".tmp");
        fs::create_dir_all(&temp_dir)
            .await
            .map_err(StoreError::io("failed to create tempdir"))?;
        let temp_file =
            NamedTempFile::new_in(&temp_dir).map_err(StoreError::io("failed to create tempfile"))?;
        let dup_file = temp_file
            .reopen()
            .map_err(StoreError::io("failed to dup filedescriptor"))?;
        let mut dest = File::from_std(dup_file);

        dest.write_all(&data)
            .await
            .map_err(StoreError::io("failed to copy data into file"))?;
        dest.flush()
            .await
            .map_err(StoreError::io("failed to copy data into file"))?;

        temp_file
            .persist(&abspath)
            .map_err(|e| StoreError::io("failed to save object")(e.error))?;
        Ok(())
    }
}
