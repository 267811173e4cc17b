//! Folder and asset records
//!
//! Nodes never point at each other directly. A folder stores its parent's
//! local id and an ordered list of child references, and the owning
//! [`Project`](super::Project) resolves them through its arena.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

macro_rules! local_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

local_id!(
    /// Local identifier of a folder, assigned at creation
    FolderId
);
local_id!(
    /// Local identifier of an asset, assigned at creation
    AssetId
);
local_id!(
    /// Identifier of a naming suggestion
    SuggestionId
);

/// Identifier handed out by the media service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RemoteId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Reference to either kind of node in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum NodeRef {
    Folder(FolderId),
    Asset(AssetId),
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Folder(id) => write!(f, "folder:{}", id),
            NodeRef::Asset(id) => write!(f, "asset:{}", id),
        }
    }
}

/// Where a folder stands relative to the media service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Not created remotely yet, or renamed locally since the last sync
    LocalOnly,
    Synced,
    /// The last attempt failed; see [`Folder::issue`]
    Conflict,
}

/// Why a folder ended up in [`SyncStatus::Conflict`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// The remote already holds a node with this name under the same parent.
    /// Needs a caller decision, never retried on its own.
    NameCollision,
    /// Network failure, timeout or rate limit
    Transport,
    /// Someone renamed the node remotely while a different local rename was
    /// pending. Needs a caller decision.
    RemoteRenamed,
    /// The remote refused the request for another reason
    Rejected,
}

/// Details of the last failed sync attempt for a folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncIssue {
    pub kind: IssueKind,
    pub message: String,
    /// Remote node the collision refers to, when the service told us
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_remote_id: Option<RemoteId>,
    /// Name currently held remotely, for [`IssueKind::RemoteRenamed`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_name: Option<String>,
    pub at: DateTime<Utc>,
}

impl SyncIssue {
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            existing_remote_id: None,
            remote_name: None,
            at: Utc::now(),
        }
    }

    pub fn with_existing(mut self, remote_id: Option<RemoteId>) -> Self {
        self.existing_remote_id = remote_id;
        self
    }

    pub fn with_remote_name(mut self, name: impl Into<String>) -> Self {
        self.remote_name = Some(name.into());
        self
    }

    /// Retrying would hit the same wall; the caller has to choose
    pub fn needs_decision(&self) -> bool {
        matches!(self.kind, IssueKind::NameCollision | IssueKind::RemoteRenamed)
    }
}

/// Descriptive fields kept alongside a node and sent to the media service
/// once the node exists there
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Running time in seconds, for shots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl NodeMetadata {
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.tags.is_empty() && self.duration.is_none()
    }

    /// Split `wide, night,,hero` into trimmed, non-empty tags
    pub fn parse_tags(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// A sequence or shot grouping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub(super) id: FolderId,
    #[serde(default)]
    pub(super) remote_id: Option<RemoteId>,
    pub(super) name: String,
    /// Name last confirmed on the remote
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) synced_name: Option<String>,
    /// None only for the project root
    pub(super) parent: Option<FolderId>,
    #[serde(default)]
    pub(super) children: Vec<NodeRef>,
    pub(super) status: SyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) issue: Option<SyncIssue>,
    #[serde(default, skip_serializing_if = "NodeMetadata::is_empty")]
    pub(super) metadata: NodeMetadata,
    /// Metadata changed since it was last sent
    #[serde(default)]
    pub(super) metadata_pending: bool,
}

impl Folder {
    pub(super) fn new(name: String, parent: Option<FolderId>) -> Self {
        Self {
            id: FolderId::new(),
            remote_id: None,
            name,
            synced_name: None,
            parent,
            children: Vec::new(),
            status: SyncStatus::LocalOnly,
            issue: None,
            metadata: NodeMetadata::default(),
            metadata_pending: false,
        }
    }

    pub fn id(&self) -> FolderId {
        self.id
    }

    pub fn remote_id(&self) -> Option<&RemoteId> {
        self.remote_id.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn synced_name(&self) -> Option<&str> {
        self.synced_name.as_deref()
    }

    pub fn parent(&self) -> Option<FolderId> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Children in display order
    pub fn children(&self) -> &[NodeRef] {
        &self.children
    }

    pub fn child_folders(&self) -> impl Iterator<Item = FolderId> + '_ {
        self.children.iter().filter_map(|child| match child {
            NodeRef::Folder(id) => Some(*id),
            NodeRef::Asset(_) => None,
        })
    }

    pub fn child_assets(&self) -> impl Iterator<Item = AssetId> + '_ {
        self.children.iter().filter_map(|child| match child {
            NodeRef::Asset(id) => Some(*id),
            NodeRef::Folder(_) => None,
        })
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn is_synced(&self) -> bool {
        self.status == SyncStatus::Synced
    }

    pub fn issue(&self) -> Option<&SyncIssue> {
        self.issue.as_ref()
    }

    pub fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    pub fn metadata_pending(&self) -> bool {
        self.metadata_pending
    }
}

/// Upload progress of an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Uploaded,
    Failed,
}

/// Broad classification used to file loose assets into the standard layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetCategory {
    Script,
    Media,
}

impl AssetCategory {
    /// Name of the top-level folder this category lives in
    pub fn folder_name(&self) -> &'static str {
        match self {
            AssetCategory::Script => SCRIPTS_FOLDER,
            AssetCategory::Media => MEDIA_FOLDER,
        }
    }

    /// Guess the category from a file name. Screenplay and document formats
    /// are scripts, everything else is media.
    pub fn from_filename(filename: &str) -> Self {
        let ext = Path::new(filename)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());

        match ext.as_deref() {
            Some("fdx" | "fountain" | "celtx" | "pdf" | "doc" | "docx" | "txt" | "rtf" | "md") => {
                AssetCategory::Script
            }
            _ => AssetCategory::Media,
        }
    }
}

pub const SEQUENCES_FOLDER: &str = "Sequences";
pub const SCRIPTS_FOLDER: &str = "Scripts";
pub const MEDIA_FOLDER: &str = "Media";

/// An uploadable media file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub(super) id: AssetId,
    #[serde(default)]
    pub(super) remote_id: Option<RemoteId>,
    pub(super) filename: String,
    /// Name the uploaded copy carries remotely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) synced_filename: Option<String>,
    pub(super) folder: FolderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) source: Option<PathBuf>,
    /// Size in bytes, once the source has been read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) size: Option<u64>,
    pub(super) status: UploadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) last_error: Option<String>,
    #[serde(default, skip_serializing_if = "NodeMetadata::is_empty")]
    pub(super) metadata: NodeMetadata,
    #[serde(default)]
    pub(super) metadata_pending: bool,
    /// Renamed locally after upload; the next reconcile pushes the new name
    #[serde(default)]
    pub(super) rename_pending: bool,
}

impl Asset {
    pub(super) fn new(filename: String, folder: FolderId, source: Option<PathBuf>) -> Self {
        Self {
            id: AssetId::new(),
            remote_id: None,
            filename,
            synced_filename: None,
            folder,
            source,
            size: None,
            status: UploadStatus::Pending,
            last_error: None,
            metadata: NodeMetadata::default(),
            metadata_pending: false,
            rename_pending: false,
        }
    }

    pub fn id(&self) -> AssetId {
        self.id
    }

    pub fn remote_id(&self) -> Option<&RemoteId> {
        self.remote_id.as_ref()
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn folder(&self) -> FolderId {
        self.folder
    }

    /// Local file the bytes are read from at upload time
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn status(&self) -> UploadStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn synced_filename(&self) -> Option<&str> {
        self.synced_filename.as_deref()
    }

    pub fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    pub fn metadata_pending(&self) -> bool {
        self.metadata_pending
    }

    pub fn rename_pending(&self) -> bool {
        self.rename_pending
    }

    /// File extension including the dot, if any
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.filename)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_filename() {
        assert_eq!(AssetCategory::from_filename("draft-v3.fdx"), AssetCategory::Script);
        assert_eq!(AssetCategory::from_filename("Treatment.PDF"), AssetCategory::Script);
        assert_eq!(AssetCategory::from_filename("shotA.mov"), AssetCategory::Media);
        assert_eq!(AssetCategory::from_filename("no_extension"), AssetCategory::Media);
    }

    #[test]
    fn test_local_id_parse() {
        let id = FolderId::new();
        let parsed: FolderId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<AssetId>().is_err());
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!(
            NodeMetadata::parse_tags(" wide, night,,hero "),
            vec!["wide", "night", "hero"]
        );
        assert!(NodeMetadata::parse_tags(" , ").is_empty());
    }

    #[test]
    fn test_node_ref_serialization() {
        let id = AssetId::new();
        let json = serde_json::to_value(NodeRef::Asset(id)).unwrap();
        assert_eq!(json["kind"], "asset");
        assert_eq!(json["id"], id.to_string());
    }
}
