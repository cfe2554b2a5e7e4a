//! File store: the registry plus blob storage, with create/fetch/delete semantics.
//!
//! The registry is guarded by a single mutex that is only ever held for
//! in-memory work, never across an await. Blob I/O runs on the blocking pool.
//! A create or delete handed to the pool always runs to completion, so an
//! aborted exchange never leaves a blob without its registry entry.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::blob::{BlobError, BlobStore};
use crate::codec::{Lookup, Response};
use crate::protocol::status;
use crate::registry::{FileId, Registry};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("creation forbidden: {0}")]
    Forbidden(#[source] BlobError),
    #[error("not found: {0}")]
    NotFound(String),
}

impl StoreError {
    pub fn status(&self) -> i32 {
        match self {
            StoreError::Forbidden(_) => status::FORBIDDEN,
            StoreError::NotFound(_) => status::NOT_FOUND,
        }
    }

    pub fn to_response(&self) -> Response {
        match self {
            StoreError::Forbidden(_) => Response::Forbidden,
            StoreError::NotFound(_) => Response::NotFound,
        }
    }
}

pub struct FileStore {
    blobs: BlobStore,
    registry: Arc<Mutex<Registry>>,
    registry_path: PathBuf,
    // Read side held by every create/delete until its blocking work ends;
    // persist takes the write side.
    mutations: Arc<RwLock<()>>,
}

impl FileStore {
    pub fn new(blobs: BlobStore, registry: Registry, registry_path: impl Into<PathBuf>) -> Self {
        Self {
            blobs,
            registry: Arc::new(Mutex::new(registry)),
            registry_path: registry_path.into(),
            mutations: Arc::new(RwLock::new(())),
        }
    }

    /// Create the blob root if needed and load the persisted listing.
    pub async fn open(data_dir: &Path, registry_path: &Path) -> Result<Self> {
        let blobs = BlobStore::new(data_dir);
        blobs
            .ensure_root()
            .with_context(|| format!("create data dir {}", data_dir.display()))?;
        let registry = Registry::load(registry_path);
        tracing::info!(
            entries = registry.len(),
            registry = %registry_path.display(),
            "registry loaded"
        );
        Ok(Self::new(blobs, registry, registry_path))
    }

    pub fn registry_path(&self) -> &Path {
        &self.registry_path
    }

    /// Copy of the registry as it is right now.
    pub fn snapshot(&self) -> Registry {
        self.registry.lock().clone()
    }

    /// Store `content` under a new name and assign it an id.
    pub async fn create(&self, filename: &str, content: Vec<u8>) -> Result<FileId, StoreError> {
        let gate = Arc::clone(&self.mutations).read_owned().await;
        let blobs = self.blobs.clone();
        let registry = Arc::clone(&self.registry);
        let filename = filename.to_string();
        tokio::task::spawn_blocking(move || -> Result<FileId, StoreError> {
            let _gate = gate;
            blobs
                .create(&filename, &content)
                .map_err(StoreError::Forbidden)?;
            Ok(registry.lock().allocate_id(&filename))
        })
        .await
        .map_err(|e| StoreError::Forbidden(join_failed(e)))?
    }

    /// Whole content of the resolved file. Anything unreadable or unsendable is NotFound.
    pub async fn fetch(&self, lookup: Lookup, identifier: &str) -> Result<Vec<u8>, StoreError> {
        let filename = self.resolve(lookup, identifier)?;
        let blobs = self.blobs.clone();
        tokio::task::spawn_blocking(move || {
            blobs
                .read(&filename)
                .map_err(|e| StoreError::NotFound(format!("{}: {}", filename, e)))
        })
        .await
        .map_err(|e| StoreError::NotFound(join_failed(e).to_string()))?
    }

    /// Remove the blob, then its registry entry. A blob that is gone while its
    /// entry is missing still reports NotFound; nothing is rolled back.
    pub async fn delete(&self, lookup: Lookup, identifier: &str) -> Result<(), StoreError> {
        let filename = self.resolve(lookup, identifier)?;
        let gate = Arc::clone(&self.mutations).read_owned().await;
        let blobs = self.blobs.clone();
        let registry = Arc::clone(&self.registry);
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let _gate = gate;
            blobs
                .delete(&filename)
                .map_err(|e| StoreError::NotFound(format!("{}: {}", filename, e)))?;

            let mut registry = registry.lock();
            let id = registry
                .lookup_id(&filename)
                .ok_or_else(|| StoreError::NotFound(format!("{} has no registry entry", filename)))?;
            registry.remove(id);
            Ok(())
        })
        .await
        .map_err(|e| StoreError::NotFound(join_failed(e).to_string()))?
    }

    fn resolve(&self, lookup: Lookup, identifier: &str) -> Result<String, StoreError> {
        match lookup {
            Lookup::ByName => Ok(identifier.to_string()),
            Lookup::ById => {
                let id: FileId = identifier
                    .trim()
                    .parse()
                    .map_err(|_| StoreError::NotFound(format!("bad id {:?}", identifier)))?;
                self.registry
                    .lock()
                    .lookup_filename(id)
                    .map(str::to_string)
                    .ok_or_else(|| StoreError::NotFound(format!("no file with id {}", id)))
            }
        }
    }

    /// Write the registry listing back to disk once every create or delete
    /// already on the blocking pool has finished.
    pub async fn persist(&self) -> Result<()> {
        let _quiet = self.mutations.write().await;
        let snapshot = self.snapshot();
        snapshot.save(&self.registry_path)
    }
}

fn join_failed(e: tokio::task::JoinError) -> BlobError {
    BlobError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}
