//! File operations

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::DiscoveryError;

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parses the file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, DiscoveryError> {
        let contents = fs::read(&self.path).await?;
        self.parse(&contents)
    }

    /// Like [`read_json`](Self::read_json); a missing file yields `T::default()`
    pub async fn read_json_or_default<T: DeserializeOwned + Default>(
        &self,
    ) -> Result<T, DiscoveryError> {
        match fs::read(&self.path).await {
            Ok(contents) => self.parse(&contents),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn parse<T: DeserializeOwned>(&self, contents: &[u8]) -> Result<T, DiscoveryError> {
        serde_json::from_slice(contents).map_err(|e| {
            DiscoveryError::StorageError(format!("{}: {}", self.path.display(), e))
        })
    }

    /// Write JSON to file atomically
    pub async fn write_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), DiscoveryError> {
        let contents = serde_json::to_vec_pretty(value)?;
        self.write_atomic(&contents).await
    }

    /// Writes next to the target and renames over it
    async fn write_atomic(&self, contents: &[u8]) -> Result<(), DiscoveryError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp_path = self.path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}
