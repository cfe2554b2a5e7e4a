//! Byte storage addressed by filename under a single base directory.
//!
//! All calls are blocking; callers on the runtime go through `spawn_blocking`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

use crate::protocol::MAX_WIRE_BLOB;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid blob name {0:?}")]
    InvalidName(String),
    #[error("blob already exists")]
    AlreadyExists,
    #[error("blob not found")]
    NotFound,
    #[error("blob of {0} bytes cannot be sent")]
    TooLarge(u64),
    #[error("blob I/O failed: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for BlobError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::AlreadyExists => BlobError::AlreadyExists,
            std::io::ErrorKind::NotFound => BlobError::NotFound,
            _ => BlobError::Io(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn ensure_root(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    /// Map a name to its file directly under the root.
    /// Only a single plain path component is accepted.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, BlobError> {
        let invalid = || BlobError::InvalidName(name.to_string());
        if name.is_empty() || name.contains('\0') || name.contains('/') || name.contains('\\') {
            return Err(invalid());
        }
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(name)),
            _ => Err(invalid()),
        }
    }

    /// Write a new blob. Never overwrites: an existing name is `AlreadyExists`.
    /// A failed write removes what it left behind.
    pub fn create(&self, name: &str, content: &[u8]) -> Result<(), BlobError> {
        let path = self.path_for(name)?;
        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        if let Err(e) = file.write_all(content).and_then(|_| file.sync_all()) {
            drop(file);
            let _ = std::fs::remove_file(&path);
            return Err(BlobError::Io(e));
        }
        Ok(())
    }

    /// Read a whole blob. Files whose length cannot be framed on the wire are
    /// refused before anything is loaded.
    pub fn read(&self, name: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(name)?;
        let len = std::fs::metadata(&path)?.len();
        if len > MAX_WIRE_BLOB as u64 {
            return Err(BlobError::TooLarge(len));
        }
        Ok(std::fs::read(&path)?)
    }

    pub fn delete(&self, name: &str) -> Result<(), BlobError> {
        let path = self.path_for(name)?;
        Ok(std::fs::remove_file(&path)?)
    }
}
