//! Remote Hierarchy Client
//!
//! The media-collaboration service is consumed through the
//! [`RemoteHierarchy`] trait. [`FrameioClient`] talks to the real service,
//! [`InMemoryRemote`] backs dry runs and tests.

pub mod frameio;
pub mod memory;

pub use frameio::FrameioClient;
pub use memory::{InMemoryRemote, RemoteCall};
#[cfg(test)]
pub(crate) use memory::CancelDuringCreate;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::model::{IssueKind, NodeMetadata, ProjectInfo, RemoteId};

/// Errors reported by the media service or the way to it
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    /// Network failure or timeout. Safe for the caller to retry.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Still throttled after the client's own backoff
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// A node with this name already exists under the parent
    #[error("Name collision: {name} already exists")]
    Conflict {
        name: String,
        existing: Option<RemoteId>,
    },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Reading the local file failed
    #[error("I/O error: {0}")]
    Io(String),
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transport(_) | RemoteError::RateLimited(_))
    }

    /// How a folder carrying this failure should be flagged
    pub fn issue_kind(&self) -> IssueKind {
        match self {
            RemoteError::Conflict { .. } => IssueKind::NameCollision,
            RemoteError::Transport(_) | RemoteError::RateLimited(_) => IssueKind::Transport,
            _ => IssueKind::Rejected,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RemoteError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            RemoteError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            RemoteError::Transport(err.to_string())
        }
    }
}

impl From<std::io::Error> for RemoteError {
    fn from(err: std::io::Error) -> Self {
        RemoteError::Io(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteNodeKind {
    Folder,
    File,
    Other,
}

/// A child entry as listed by the media service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteNode {
    pub id: RemoteId,
    pub name: String,
    pub kind: RemoteNodeKind,
    pub parent: Option<RemoteId>,
}

/// A project as created on the media service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteProject {
    pub id: RemoteId,
    /// Folder every top-level node is created under
    pub root_asset_id: RemoteId,
    pub name: String,
}

/// Scoped read access to one local file for the duration of an upload.
///
/// The underlying descriptor is closed when the handle is dropped, which
/// happens as soon as `create_asset` returns, whatever the outcome.
#[derive(Debug)]
pub struct FileHandle {
    path: PathBuf,
    file: File,
    size: u64,
    mime_type: String,
}

impl FileHandle {
    pub async fn open(path: &Path) -> Result<Self, RemoteError> {
        let file = File::open(path)
            .await
            .map_err(|e| RemoteError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(RemoteError::Io(format!("Not a regular file: {}", path.display())));
        }

        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string();

        tracing::debug!(path = %path.display(), size = metadata.len(), "Opened file handle");

        Ok(Self {
            path: path.to_path_buf(),
            file,
            size: metadata.len(),
            mime_type,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Read up to `len` bytes; an empty result means end of file
    pub async fn read_chunk(&mut self, len: usize) -> Result<Vec<u8>, RemoteError> {
        let mut buf = Vec::with_capacity(len);
        (&mut self.file).take(len as u64).read_to_end(&mut buf).await?;
        Ok(buf)
    }

    pub async fn read_all(&mut self) -> Result<Vec<u8>, RemoteError> {
        let mut buf = Vec::with_capacity(self.size as usize);
        self.file.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        tracing::debug!(path = %self.path.display(), "Released file handle");
    }
}

/// Project/folder/asset operations of the media service
#[async_trait]
pub trait RemoteHierarchy: Send + Sync {
    /// Identity behind the configured token; used as a connection check
    async fn whoami(&self) -> Result<String, RemoteError>;

    async fn create_project(&self, name: &str) -> Result<RemoteProject, RemoteError>;

    async fn create_folder(&self, name: &str, parent: &RemoteId) -> Result<RemoteId, RemoteError>;

    /// Create a file asset and transfer its bytes. Takes the handle by value
    /// so it is released when the call finishes.
    async fn create_asset(
        &self,
        name: &str,
        parent: &RemoteId,
        file: FileHandle,
    ) -> Result<RemoteId, RemoteError>;

    async fn list_children(&self, parent: &RemoteId) -> Result<Vec<RemoteNode>, RemoteError>;

    async fn rename(&self, node: &RemoteId, name: &str) -> Result<(), RemoteError>;

    /// Replace a folder's or asset's description, tags and duration
    async fn update_metadata(&self, node: &RemoteId, metadata: &NodeMetadata) -> Result<(), RemoteError>;

    /// Replace the descriptive fields of a project
    async fn update_project(&self, project: &RemoteId, info: &ProjectInfo) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_issue_kind_mapping() {
        let conflict = RemoteError::Conflict {
            name: "seq01".to_string(),
            existing: None,
        };
        assert_eq!(conflict.issue_kind(), IssueKind::NameCollision);
        assert!(!conflict.is_retryable());

        let transport = RemoteError::Transport("timeout".to_string());
        assert_eq!(transport.issue_kind(), IssueKind::Transport);
        assert!(transport.is_retryable());

        let api = RemoteError::Api {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(api.issue_kind(), IssueKind::Rejected);
    }

    #[tokio::test]
    async fn test_file_handle_reads_in_chunks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shotA.mov");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut handle = FileHandle::open(&path).await.unwrap();
        assert_eq!(handle.size(), 10);
        assert_eq!(handle.mime_type(), "video/quicktime");
        assert_eq!(handle.read_chunk(4).await.unwrap(), b"0123");
        assert_eq!(handle.read_chunk(4).await.unwrap(), b"4567");
        assert_eq!(handle.read_chunk(4).await.unwrap(), b"89");
        assert!(handle.read_chunk(4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_handle_missing_file() {
        let dir = tempdir().unwrap();
        let result = FileHandle::open(&dir.path().join("missing.mov")).await;
        assert!(matches!(result, Err(RemoteError::Io(_))));
    }
}
