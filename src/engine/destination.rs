//! Durable storage for downloaded media.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::engine::task::sanitize_dir_name;

/// Error types for the destination directory
#[derive(Error, Debug)]
pub enum DestinationError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Directory is read-only: {0}")]
    ReadOnly(PathBuf),
}

/// Result type for destination operations
pub type DestinationResult<T> = Result<T, DestinationError>;

/// A directory the engine can create files in.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Opens (creating if needed) a subdirectory with a sanitized name.
    async fn child_directory(&self, name: &str) -> DestinationResult<Arc<dyn Destination>>;

    async fn contains(&self, name: &str) -> DestinationResult<bool>;

    /// Writes `bytes` to a new file. Returns `false` without touching
    /// anything when a file of that name already exists.
    async fn write_new_file(&self, name: &str, bytes: &[u8]) -> DestinationResult<bool>;

    /// Human-readable location, for logs and reports.
    fn location(&self) -> String;
}

/// Destination backed by a directory on the local file system
#[derive(Debug, Clone)]
pub struct LocalDirectory {
    path: PathBuf,
}

impl LocalDirectory {
    /// Creates the directory tree if needed and verifies it can be written to.
    pub async fn create_if_absent(path: impl AsRef<Path>) -> DestinationResult<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path).await?;

        let metadata = fs::metadata(&path).await?;
        if !metadata.is_dir() {
            return Err(DestinationError::NotADirectory(path));
        }
        if metadata.permissions().readonly() {
            return Err(DestinationError::ReadOnly(path));
        }

        debug!("Using destination directory {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Destination for LocalDirectory {
    async fn child_directory(&self, name: &str) -> DestinationResult<Arc<dyn Destination>> {
        let child = Self::create_if_absent(self.path.join(sanitize_dir_name(name))).await?;
        Ok(Arc::new(child))
    }

    async fn contains(&self, name: &str) -> DestinationResult<bool> {
        Ok(fs::try_exists(self.path.join(name)).await?)
    }

    async fn write_new_file(&self, name: &str, bytes: &[u8]) -> DestinationResult<bool> {
        let target = self.path.join(name);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&target).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let written = async {
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            drop(file);
            if let Err(remove_err) = fs::remove_file(&target).await {
                warn!("Failed to remove partial file {}: {}", target.display(), remove_err);
            }
            return Err(e.into());
        }
        Ok(true)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_create_if_absent_builds_nested_tree() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");

        let destination = LocalDirectory::create_if_absent(&nested).await.unwrap();
        assert!(nested.is_dir());
        assert_eq!(destination.path(), nested.as_path());
    }

    #[tokio::test]
    async fn test_create_if_absent_rejects_file_path() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("plain.txt");
        std::fs::write(&file_path, b"x").unwrap();

        assert!(LocalDirectory::create_if_absent(&file_path).await.is_err());
        assert!(LocalDirectory::create_if_absent(file_path.join("below")).await.is_err());
    }

    #[tokio::test]
    async fn test_write_new_file_never_overwrites() {
        let dir = tempdir().unwrap();
        let destination = LocalDirectory::create_if_absent(dir.path()).await.unwrap();

        assert!(!destination.contains("a.jpg").await.unwrap());
        assert!(destination.write_new_file("a.jpg", b"first").await.unwrap());
        assert!(destination.contains("a.jpg").await.unwrap());

        assert!(!destination.write_new_file("a.jpg", b"second").await.unwrap());
        assert_eq!(std::fs::read(dir.path().join("a.jpg")).unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_child_directory_is_sanitized() {
        let dir = tempdir().unwrap();
        let destination = LocalDirectory::create_if_absent(dir.path()).await.unwrap();

        let child = destination.child_directory("Some:Name?").await.unwrap();
        assert!(dir.path().join("Some_Name_").is_dir());
        assert!(child.write_new_file("x.jpg", b"x").await.unwrap());
        assert!(dir.path().join("Some_Name_").join("x.jpg").is_file());
    }
}
