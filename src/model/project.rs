//! Project arena
//!
//! A [`Project`] owns every folder and asset of one production, keyed by
//! local id. Folders keep their parent's id plus an ordered child list, so
//! moves and removals only touch ids and nothing can dangle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use super::node::*;
use super::suggestion::Suggestion;

/// Errors raised by invalid model mutations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("Folder not found: {0}")]
    FolderNotFound(FolderId),

    #[error("Asset not found: {0}")]
    AssetNotFound(AssetId),

    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    /// A sibling with the same name already exists
    #[error("Name collision: {name} already exists in {parent}")]
    NameCollision { parent: String, name: String },

    #[error("Cycle detected: cannot move {folder} into {target}")]
    CycleDetected { folder: String, target: String },

    #[error("Cannot modify root: {0}")]
    CannotModifyRoot(String),

    #[error("Remote id already assigned to {0}")]
    RemoteIdAlreadyAssigned(String),

    /// Only local-only folders can be moved
    #[error("Folder already exists remotely: {0}")]
    AlreadySynced(String),

    #[error("Invalid child order for {0}")]
    InvalidOrder(String),

    #[error("Folder is not in conflict: {0}")]
    NotInConflict(String),

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    /// A loaded document breaks the tree invariants
    #[error("Inconsistent project: {0}")]
    Inconsistent(String),
}

/// Production details of the project itself
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub director: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
}

impl ProjectInfo {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// One film production and its folder/asset tree
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "ProjectDocument")]
pub struct Project {
    id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
    remote_id: Option<RemoteId>,
    #[serde(skip_serializing_if = "ProjectInfo::is_empty")]
    info: ProjectInfo,
    /// Info changed since it was last sent
    info_pending: bool,
    root: FolderId,
    folders: BTreeMap<FolderId, Folder>,
    assets: BTreeMap<AssetId, Asset>,
    suggestions: Vec<Suggestion>,
}

/// A project as read from disk, before its invariants are checked
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectDocument {
    id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    remote_id: Option<RemoteId>,
    #[serde(default)]
    info: ProjectInfo,
    #[serde(default)]
    info_pending: bool,
    root: FolderId,
    folders: BTreeMap<FolderId, Folder>,
    #[serde(default)]
    assets: BTreeMap<AssetId, Asset>,
    #[serde(default)]
    suggestions: Vec<Suggestion>,
}

impl TryFrom<ProjectDocument> for Project {
    type Error = ModelError;

    fn try_from(doc: ProjectDocument) -> Result<Self, Self::Error> {
        let project = Self {
            id: doc.id,
            name: doc.name,
            created_at: doc.created_at,
            remote_id: doc.remote_id,
            info: doc.info,
            info_pending: doc.info_pending,
            root: doc.root,
            folders: doc.folders,
            assets: doc.assets,
            suggestions: doc.suggestions,
        };
        project.validate()?;
        Ok(project)
    }
}

impl Project {
    /// Create a project with an empty root folder named after it
    pub fn new(name: impl Into<String>) -> Result<Self, ModelError> {
        let name = validate_name(&name.into())?;
        let root = Folder::new(name.clone(), None);
        let root_id = root.id;

        let mut folders = BTreeMap::new();
        folders.insert(root_id, root);

        Ok(Self {
            id: Uuid::new_v4(),
            name,
            created_at: Utc::now(),
            remote_id: None,
            info: ProjectInfo::default(),
            info_pending: false,
            root: root_id,
            folders,
            assets: BTreeMap::new(),
            suggestions: Vec::new(),
        })
    }

    /// Create a project with the standard `Sequences/`, `Scripts/` and
    /// `Media/` folders under the root
    pub fn with_film_layout(name: impl Into<String>) -> Result<Self, ModelError> {
        let mut project = Self::new(name)?;
        let root = project.root;
        for folder in [SEQUENCES_FOLDER, SCRIPTS_FOLDER, MEDIA_FOLDER] {
            project.add_folder(root, folder)?;
        }
        Ok(project)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Remote project id, once the project exists on the media service
    pub fn remote_id(&self) -> Option<&RemoteId> {
        self.remote_id.as_ref()
    }

    pub fn root(&self) -> FolderId {
        self.root
    }

    pub fn root_folder(&self) -> &Folder {
        // Inserted in `new`, never removed, and checked by `validate` on load
        &self.folders[&self.root]
    }

    pub fn info(&self) -> &ProjectInfo {
        &self.info
    }

    pub fn info_pending(&self) -> bool {
        self.info_pending
    }

    /// Metadata of a folder or asset
    pub fn metadata(&self, node: NodeRef) -> Option<&NodeMetadata> {
        match node {
            NodeRef::Folder(id) => self.folders.get(&id).map(|f| &f.metadata),
            NodeRef::Asset(id) => self.assets.get(&id).map(|a| &a.metadata),
        }
    }

    pub fn folder(&self, id: FolderId) -> Option<&Folder> {
        self.folders.get(&id)
    }

    pub fn asset(&self, id: AssetId) -> Option<&Asset> {
        self.assets.get(&id)
    }

    pub fn folders(&self) -> impl Iterator<Item = &Folder> {
        self.folders.values()
    }

    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    pub fn suggestions(&self) -> &[Suggestion] {
        &self.suggestions
    }

    pub fn suggestion(&self, id: SuggestionId) -> Option<&Suggestion> {
        self.suggestions.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, node: NodeRef) -> bool {
        match node {
            NodeRef::Folder(id) => self.folders.contains_key(&id),
            NodeRef::Asset(id) => self.assets.contains_key(&id),
        }
    }

    /// Current name of a folder or asset
    pub fn node_name(&self, node: NodeRef) -> Option<&str> {
        match node {
            NodeRef::Folder(id) => self.folders.get(&id).map(|f| f.name.as_str()),
            NodeRef::Asset(id) => self.assets.get(&id).map(|a| a.filename.as_str()),
        }
    }

    /// Assets directly inside a folder, in display order
    pub fn assets_in(&self, folder: FolderId) -> Vec<&Asset> {
        self.folders
            .get(&folder)
            .map(|f| f.child_assets().filter_map(|id| self.assets.get(&id)).collect())
            .unwrap_or_default()
    }

    /// Find a direct child folder by name
    pub fn find_child_folder(&self, parent: FolderId, name: &str) -> Option<FolderId> {
        let parent = self.folders.get(&parent)?;
        parent
            .child_folders()
            .find(|id| self.folders.get(id).is_some_and(|f| f.name == name))
    }

    /// Slash-separated path from the root, e.g. `Feature/Sequences/seq01`
    pub fn folder_path(&self, id: FolderId) -> Option<String> {
        let mut parts = Vec::new();
        let mut current = Some(id);
        while let Some(folder_id) = current {
            let folder = self.folders.get(&folder_id)?;
            parts.push(folder.name.as_str());
            current = folder.parent;
        }
        parts.reverse();
        Some(parts.join("/"))
    }

    /// Folders of the subtree rooted at `from`, parents before children and
    /// siblings in display order
    pub fn walk(&self, from: FolderId) -> Vec<FolderId> {
        let mut order = Vec::new();
        let mut stack = vec![from];

        while let Some(id) = stack.pop() {
            let Some(folder) = self.folders.get(&id) else {
                continue;
            };
            order.push(id);
            let children: Vec<FolderId> = folder.child_folders().collect();
            stack.extend(children.into_iter().rev());
        }

        order
    }

    /// Whether `node` lives in the subtree rooted at `root` (inclusive)
    pub fn in_subtree(&self, root: FolderId, node: NodeRef) -> bool {
        let mut current = match node {
            NodeRef::Folder(id) if self.folders.contains_key(&id) => Some(id),
            NodeRef::Asset(id) => self.assets.get(&id).map(|a| a.folder),
            NodeRef::Folder(_) => None,
        };

        while let Some(id) = current {
            if id == root {
                return true;
            }
            current = self.folders.get(&id).and_then(|f| f.parent);
        }
        false
    }

    /// Remote id of the folder's parent, if the parent has been synced
    pub fn parent_remote_id(&self, id: FolderId) -> Option<&RemoteId> {
        let parent = self.folders.get(&id)?.parent?;
        let parent = self.folders.get(&parent)?;
        if parent.is_synced() {
            parent.remote_id.as_ref()
        } else {
            None
        }
    }

    // ---- tree edits ----

    /// Add a folder at the end of `parent`'s children
    pub fn add_folder(&mut self, parent: FolderId, name: &str) -> Result<FolderId, ModelError> {
        let name = validate_name(name)?;
        self.ensure_folder(parent)?;
        self.ensure_unique(parent, &name, None)?;

        let folder = Folder::new(name, Some(parent));
        let id = folder.id;
        self.folders.insert(id, folder);
        self.folder_mut(parent)?.children.push(NodeRef::Folder(id));
        Ok(id)
    }

    /// Replace the project's production details. A change is sent on the
    /// next reconcile.
    pub fn set_info(&mut self, info: ProjectInfo) {
        let info = ProjectInfo {
            description: clean_text(info.description),
            genre: clean_text(info.genre),
            director: clean_text(info.director),
            producer: clean_text(info.producer),
        };
        if info != self.info {
            self.info = info;
            self.info_pending = true;
        }
    }

    /// Replace a node's metadata. A change is sent to the media service by
    /// the next reconcile, or right after the upload for a new asset.
    pub fn set_metadata(&mut self, node: NodeRef, metadata: NodeMetadata) -> Result<(), ModelError> {
        let metadata = clean_metadata(metadata)?;
        let (current, pending) = match node {
            NodeRef::Folder(id) => {
                let folder = self.folders.get_mut(&id).ok_or(ModelError::FolderNotFound(id))?;
                if folder.parent.is_none() {
                    return Err(ModelError::CannotModifyRoot(
                        "The project root carries project info, not metadata".to_string(),
                    ));
                }
                (&mut folder.metadata, &mut folder.metadata_pending)
            }
            NodeRef::Asset(id) => {
                let asset = self.asset_mut(id)?;
                (&mut asset.metadata, &mut asset.metadata_pending)
            }
        };
        if *current != metadata {
            *current = metadata;
            *pending = true;
        }
        Ok(())
    }

    /// Direct child of the root with the given name, created when missing
    pub fn top_level_folder(&mut self, name: &str) -> Result<FolderId, ModelError> {
        match self.find_child_folder(self.root, name) {
            Some(id) => Ok(id),
            None => self.add_folder(self.root, name),
        }
    }

    /// Add a sequence folder under `Sequences/`
    pub fn add_sequence(&mut self, name: &str) -> Result<FolderId, ModelError> {
        let sequences = self.top_level_folder(SEQUENCES_FOLDER)?;
        self.add_folder(sequences, name)
    }

    /// Add a pending asset to `folder`
    pub fn add_asset(
        &mut self,
        folder: FolderId,
        filename: &str,
        source: Option<PathBuf>,
    ) -> Result<AssetId, ModelError> {
        let filename = validate_name(filename)?;
        self.ensure_folder(folder)?;
        self.ensure_unique(folder, &filename, None)?;

        let asset = Asset::new(filename, folder, source);
        let id = asset.id;
        self.assets.insert(id, asset);
        self.folder_mut(folder)?.children.push(NodeRef::Asset(id));
        Ok(id)
    }

    /// Add an asset into `Scripts/` or `Media/` depending on its category
    pub fn file_asset(
        &mut self,
        filename: &str,
        source: Option<PathBuf>,
        category: AssetCategory,
    ) -> Result<AssetId, ModelError> {
        let folder = self.top_level_folder(category.folder_name())?;
        self.add_asset(folder, filename, source)
    }

    /// Rename a folder. A synced folder drops back to local-only so the next
    /// reconcile pushes the new name. A conflict is released for another
    /// attempt, except a remote rename which still needs an explicit retry or
    /// [`take_remote_name`](Self::take_remote_name).
    pub fn rename_folder(&mut self, id: FolderId, name: &str) -> Result<(), ModelError> {
        let name = validate_name(name)?;
        let folder = self.folders.get(&id).ok_or(ModelError::FolderNotFound(id))?;
        let Some(parent) = folder.parent else {
            return Err(ModelError::CannotModifyRoot(
                "Cannot rename the project root".to_string(),
            ));
        };
        if folder.name == name {
            return Ok(());
        }
        self.ensure_unique(parent, &name, Some(NodeRef::Folder(id)))?;

        let folder = self.folder_mut(id)?;
        folder.name = name;
        match folder.status {
            SyncStatus::Synced => folder.status = SyncStatus::LocalOnly,
            SyncStatus::Conflict
                if !matches!(
                    folder.issue.as_ref().map(|issue| issue.kind),
                    Some(IssueKind::RemoteRenamed)
                ) =>
            {
                folder.status = SyncStatus::LocalOnly;
                folder.issue = None;
            }
            _ => {}
        }
        Ok(())
    }

    /// Rename an asset. Uploaded assets get their remote name refreshed on
    /// the next reconcile; renaming back to the remote name cancels that.
    pub fn rename_asset(&mut self, id: AssetId, filename: &str) -> Result<(), ModelError> {
        let filename = validate_name(filename)?;
        let asset = self.assets.get(&id).ok_or(ModelError::AssetNotFound(id))?;
        if asset.filename == filename {
            return Ok(());
        }
        self.ensure_unique(asset.folder, &filename, Some(NodeRef::Asset(id)))?;

        let asset = self.asset_mut(id)?;
        if asset.remote_id.is_some() {
            asset.rename_pending = asset.synced_filename.as_deref() != Some(filename.as_str());
        }
        asset.filename = filename;
        Ok(())
    }

    /// Rename whichever node `node` points at
    pub fn rename_node(&mut self, node: NodeRef, name: &str) -> Result<(), ModelError> {
        match node {
            NodeRef::Folder(id) => self.rename_folder(id, name),
            NodeRef::Asset(id) => self.rename_asset(id, name),
        }
    }

    /// Move a local-only folder under a new parent
    pub fn move_folder(&mut self, id: FolderId, new_parent: FolderId) -> Result<(), ModelError> {
        let folder = self.folders.get(&id).ok_or(ModelError::FolderNotFound(id))?;
        let Some(old_parent) = folder.parent else {
            return Err(ModelError::CannotModifyRoot(
                "Cannot move the project root".to_string(),
            ));
        };
        if folder.remote_id.is_some() {
            return Err(ModelError::AlreadySynced(self.display_path(id)));
        }
        self.ensure_folder(new_parent)?;
        if new_parent == old_parent {
            return Ok(());
        }
        if self.in_subtree(id, NodeRef::Folder(new_parent)) {
            return Err(ModelError::CycleDetected {
                folder: self.display_path(id),
                target: self.display_path(new_parent),
            });
        }
        let name = folder.name.clone();
        self.ensure_unique(new_parent, &name, None)?;

        self.folder_mut(old_parent)?
            .children
            .retain(|c| *c != NodeRef::Folder(id));
        self.folder_mut(new_parent)?.children.push(NodeRef::Folder(id));
        self.folder_mut(id)?.parent = Some(new_parent);
        Ok(())
    }

    /// Remove a folder with everything below it. Suggestions aimed at any
    /// removed node go with it. Remote copies are left alone.
    pub fn remove_folder(&mut self, id: FolderId) -> Result<(), ModelError> {
        let folder = self.folders.get(&id).ok_or(ModelError::FolderNotFound(id))?;
        let Some(parent) = folder.parent else {
            return Err(ModelError::CannotModifyRoot(
                "Cannot remove the project root".to_string(),
            ));
        };

        let mut removed: HashSet<NodeRef> = HashSet::new();
        for folder_id in self.walk(id) {
            if let Some(folder) = self.folders.remove(&folder_id) {
                for asset_id in folder.child_assets() {
                    self.assets.remove(&asset_id);
                    removed.insert(NodeRef::Asset(asset_id));
                }
            }
            removed.insert(NodeRef::Folder(folder_id));
        }

        self.folder_mut(parent)?
            .children
            .retain(|c| *c != NodeRef::Folder(id));
        self.suggestions.retain(|s| !removed.contains(&s.target));
        Ok(())
    }

    pub fn remove_asset(&mut self, id: AssetId) -> Result<(), ModelError> {
        let asset = self.assets.remove(&id).ok_or(ModelError::AssetNotFound(id))?;
        if let Some(folder) = self.folders.get_mut(&asset.folder) {
            folder.children.retain(|c| *c != NodeRef::Asset(id));
        }
        self.suggestions.retain(|s| s.target != NodeRef::Asset(id));
        Ok(())
    }

    /// Replace a folder's child order. `order` must name every current child
    /// exactly once.
    pub fn reorder_children(&mut self, id: FolderId, order: &[NodeRef]) -> Result<(), ModelError> {
        let folder = self.folders.get(&id).ok_or(ModelError::FolderNotFound(id))?;

        let current: HashSet<&NodeRef> = folder.children.iter().collect();
        let requested: HashSet<&NodeRef> = order.iter().collect();
        if order.len() != folder.children.len() || requested != current {
            return Err(ModelError::InvalidOrder(self.display_path(id)));
        }

        self.folder_mut(id)?.children = order.to_vec();
        Ok(())
    }

    // ---- conflict resolution ----

    /// Clear a conflict so the next reconcile tries again with the local
    /// name. For a remote rename this means the local name wins.
    pub fn retry_folder(&mut self, id: FolderId) -> Result<(), ModelError> {
        let path = self.display_path(id);
        let folder = self.folder_mut(id)?;
        if folder.status != SyncStatus::Conflict {
            return Err(ModelError::NotInConflict(path));
        }
        if let Some(issue) = folder.issue.take() {
            if issue.kind == IssueKind::RemoteRenamed {
                folder.synced_name = issue.remote_name;
            }
        }
        folder.status = SyncStatus::LocalOnly;
        Ok(())
    }

    /// Resolve a remote rename by taking the remote name locally
    pub fn take_remote_name(&mut self, id: FolderId) -> Result<(), ModelError> {
        let path = self.display_path(id);
        let folder = self.folders.get(&id).ok_or(ModelError::FolderNotFound(id))?;
        let remote_name = match (&folder.issue, folder.parent) {
            (Some(issue), Some(parent)) if issue.kind == IssueKind::RemoteRenamed => {
                let name = issue
                    .remote_name
                    .clone()
                    .ok_or_else(|| ModelError::NotInConflict(path.clone()))?;
                self.ensure_unique(parent, &name, Some(NodeRef::Folder(id)))?;
                name
            }
            _ => return Err(ModelError::NotInConflict(path)),
        };

        let folder = self.folder_mut(id)?;
        folder.name = remote_name.clone();
        folder.synced_name = Some(remote_name);
        folder.status = SyncStatus::Synced;
        folder.issue = None;
        Ok(())
    }

    /// Resolve a name collision by binding the folder to a node that already
    /// exists remotely
    pub fn adopt_remote_folder(&mut self, id: FolderId, remote_id: RemoteId) -> Result<(), ModelError> {
        let path = self.display_path(id);
        let folder = self.folder_mut(id)?;
        if folder.status != SyncStatus::Conflict {
            return Err(ModelError::NotInConflict(path));
        }
        if folder.remote_id.is_some() {
            return Err(ModelError::RemoteIdAlreadyAssigned(path));
        }
        folder.remote_id = Some(remote_id);
        folder.synced_name = Some(folder.name.clone());
        folder.status = SyncStatus::Synced;
        folder.issue = None;
        Ok(())
    }

    /// Reset a failed asset so the next upload batch picks it up again
    pub fn retry_asset(&mut self, id: AssetId) -> Result<bool, ModelError> {
        let asset = self.asset_mut(id)?;
        if asset.status != UploadStatus::Failed {
            return Ok(false);
        }
        asset.status = UploadStatus::Pending;
        asset.last_error = None;
        Ok(true)
    }

    // ---- bookkeeping used by sync, upload and suggestions ----

    pub(crate) fn link_remote_project(
        &mut self,
        project_remote_id: RemoteId,
        root_remote_id: RemoteId,
    ) -> Result<(), ModelError> {
        if self.remote_id.is_some() {
            return Err(ModelError::RemoteIdAlreadyAssigned(self.name.clone()));
        }
        self.remote_id = Some(project_remote_id);
        let root = self.root;
        self.assign_folder_remote_id(root, root_remote_id)
    }

    /// Record the id returned by a successful create and mark the folder
    /// synced. A folder keeps its first remote id for good.
    pub(crate) fn assign_folder_remote_id(
        &mut self,
        id: FolderId,
        remote_id: RemoteId,
    ) -> Result<(), ModelError> {
        let path = self.display_path(id);
        let folder = self.folder_mut(id)?;
        if folder.remote_id.is_some() {
            return Err(ModelError::RemoteIdAlreadyAssigned(path));
        }
        folder.remote_id = Some(remote_id);
        folder.synced_name = Some(folder.name.clone());
        folder.status = SyncStatus::Synced;
        folder.issue = None;
        Ok(())
    }

    /// Mark a folder synced under its current name
    pub(crate) fn mark_folder_synced(&mut self, id: FolderId) -> Result<(), ModelError> {
        let folder = self.folder_mut(id)?;
        folder.synced_name = Some(folder.name.clone());
        folder.status = SyncStatus::Synced;
        folder.issue = None;
        Ok(())
    }

    pub(crate) fn mark_folder_conflict(
        &mut self,
        id: FolderId,
        issue: SyncIssue,
    ) -> Result<(), ModelError> {
        let folder = self.folder_mut(id)?;
        folder.status = SyncStatus::Conflict;
        folder.issue = Some(issue);
        Ok(())
    }

    pub(crate) fn mark_asset_uploading(&mut self, id: AssetId) -> Result<(), ModelError> {
        let asset = self.asset_mut(id)?;
        asset.status = UploadStatus::Uploading;
        asset.last_error = None;
        Ok(())
    }

    pub(crate) fn set_asset_size(&mut self, id: AssetId, size: u64) -> Result<(), ModelError> {
        self.asset_mut(id)?.size = Some(size);
        Ok(())
    }

    pub(crate) fn record_upload(&mut self, id: AssetId, remote_id: RemoteId) -> Result<(), ModelError> {
        let asset = self.asset_mut(id)?;
        if asset.remote_id.is_some() {
            return Err(ModelError::RemoteIdAlreadyAssigned(asset.filename.clone()));
        }
        asset.remote_id = Some(remote_id);
        asset.synced_filename = Some(asset.filename.clone());
        asset.status = UploadStatus::Uploaded;
        asset.last_error = None;
        asset.rename_pending = false;
        Ok(())
    }

    pub(crate) fn record_upload_failure(
        &mut self,
        id: AssetId,
        error: String,
    ) -> Result<(), ModelError> {
        let asset = self.asset_mut(id)?;
        asset.status = UploadStatus::Failed;
        asset.last_error = Some(error);
        Ok(())
    }

    pub(crate) fn clear_asset_rename(&mut self, id: AssetId) -> Result<(), ModelError> {
        let asset = self.asset_mut(id)?;
        asset.synced_filename = Some(asset.filename.clone());
        asset.rename_pending = false;
        Ok(())
    }

    pub(crate) fn clear_metadata_pending(&mut self, node: NodeRef) -> Result<(), ModelError> {
        match node {
            NodeRef::Folder(id) => self.folder_mut(id)?.metadata_pending = false,
            NodeRef::Asset(id) => self.asset_mut(id)?.metadata_pending = false,
        }
        Ok(())
    }

    pub(crate) fn clear_info_pending(&mut self) {
        self.info_pending = false;
    }

    pub(crate) fn push_suggestion(&mut self, suggestion: Suggestion) {
        self.suggestions.push(suggestion);
    }

    pub(crate) fn suggestion_mut(&mut self, id: SuggestionId) -> Option<&mut Suggestion> {
        self.suggestions.iter_mut().find(|s| s.id == id)
    }

    /// Counts by status
    pub fn stats(&self) -> ProjectStats {
        let mut stats = ProjectStats {
            folders: self.folders.len(),
            assets: self.assets.len(),
            ..Default::default()
        };
        for folder in self.folders.values() {
            match folder.status {
                SyncStatus::LocalOnly => stats.folders_local_only += 1,
                SyncStatus::Synced => stats.folders_synced += 1,
                SyncStatus::Conflict => stats.folders_conflicted += 1,
            }
        }
        for asset in self.assets.values() {
            match asset.status {
                UploadStatus::Pending | UploadStatus::Uploading => stats.assets_pending += 1,
                UploadStatus::Uploaded => stats.assets_uploaded += 1,
                UploadStatus::Failed => stats.assets_failed += 1,
            }
        }
        stats.open_suggestions = self.suggestions.iter().filter(|s| s.is_open()).count();
        stats
    }

    /// Check the arena invariants: a parentless root, parent links that
    /// agree with child lists, no cycles, unique sibling names and assets
    /// that sit in an existing folder. Run on every deserialized project.
    pub fn validate(&self) -> Result<(), ModelError> {
        let broken = |message: String| ModelError::Inconsistent(message);

        let root = self
            .folders
            .get(&self.root)
            .ok_or_else(|| broken(format!("root folder {} is missing", self.root)))?;
        if root.parent.is_some() {
            return Err(broken("root folder has a parent".to_string()));
        }

        for (id, folder) in &self.folders {
            if folder.id != *id {
                return Err(broken(format!("folder {} is stored under {}", folder.id, id)));
            }
            if *id != self.root {
                let parent = folder
                    .parent
                    .ok_or_else(|| broken(format!("folder {} has no parent", id)))?;
                let parent_folder = self
                    .folders
                    .get(&parent)
                    .ok_or_else(|| broken(format!("parent {} of folder {} is missing", parent, id)))?;
                if !parent_folder.children.contains(&NodeRef::Folder(*id)) {
                    return Err(broken(format!("folder {} is not listed by its parent", id)));
                }
            }

            let mut seen = HashSet::new();
            let mut names = HashSet::new();
            for child in &folder.children {
                if !seen.insert(*child) {
                    return Err(broken(format!("{} is listed twice in folder {}", child, id)));
                }
                let (owner, name) = match child {
                    NodeRef::Folder(child_id) => self
                        .folders
                        .get(child_id)
                        .map(|f| (f.parent, f.name.as_str())),
                    NodeRef::Asset(child_id) => self
                        .assets
                        .get(child_id)
                        .map(|a| (Some(a.folder), a.filename.as_str())),
                }
                .ok_or_else(|| broken(format!("folder {} lists missing {}", id, child)))?;
                if owner != Some(*id) {
                    return Err(broken(format!("{} is listed by folder {} but belongs elsewhere", child, id)));
                }
                if !names.insert(name) {
                    return Err(broken(format!("name {:?} appears twice in folder {}", name, id)));
                }
            }
        }

        for (id, asset) in &self.assets {
            if asset.id != *id {
                return Err(broken(format!("asset {} is stored under {}", asset.id, id)));
            }
            let folder = self
                .folders
                .get(&asset.folder)
                .ok_or_else(|| broken(format!("folder {} of asset {} is missing", asset.folder, id)))?;
            if !folder.children.contains(&NodeRef::Asset(*id)) {
                return Err(broken(format!("asset {} is not listed by its folder", id)));
            }
        }

        // Child lists now match parent links, so anything the walk misses
        // hangs off a parent cycle
        let reachable = self.walk(self.root).len();
        if reachable != self.folders.len() {
            return Err(broken(format!(
                "{} folders are not reachable from the root",
                self.folders.len() - reachable
            )));
        }
        Ok(())
    }

    fn folder_mut(&mut self, id: FolderId) -> Result<&mut Folder, ModelError> {
        self.folders.get_mut(&id).ok_or(ModelError::FolderNotFound(id))
    }

    fn asset_mut(&mut self, id: AssetId) -> Result<&mut Asset, ModelError> {
        self.assets.get_mut(&id).ok_or(ModelError::AssetNotFound(id))
    }

    fn ensure_folder(&self, id: FolderId) -> Result<(), ModelError> {
        if self.folders.contains_key(&id) {
            Ok(())
        } else {
            Err(ModelError::FolderNotFound(id))
        }
    }

    /// Folders and assets share one namespace per parent
    fn ensure_unique(
        &self,
        parent: FolderId,
        name: &str,
        except: Option<NodeRef>,
    ) -> Result<(), ModelError> {
        let folder = self.folders.get(&parent).ok_or(ModelError::FolderNotFound(parent))?;
        let taken = folder
            .children
            .iter()
            .filter(|child| Some(**child) != except)
            .any(|child| self.node_name(*child) == Some(name));

        if taken {
            return Err(ModelError::NameCollision {
                parent: self.display_path(parent),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn display_path(&self, id: FolderId) -> String {
        self.folder_path(id).unwrap_or_else(|| id.to_string())
    }
}

/// Status counts for a project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStats {
    pub folders: usize,
    pub folders_local_only: usize,
    pub folders_synced: usize,
    pub folders_conflicted: usize,
    pub assets: usize,
    pub assets_pending: usize,
    pub assets_uploaded: usize,
    pub assets_failed: usize,
    pub open_suggestions: usize,
}

fn clean_text(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

/// Trimmed description, deduplicated tags and a sane duration
fn clean_metadata(metadata: NodeMetadata) -> Result<NodeMetadata, ModelError> {
    if let Some(duration) = metadata.duration {
        if !duration.is_finite() || duration < 0.0 {
            return Err(ModelError::InvalidMetadata(format!("duration {}", duration)));
        }
    }
    let mut tags: Vec<String> = Vec::new();
    for tag in metadata.tags {
        let tag = tag.trim();
        if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    Ok(NodeMetadata {
        description: clean_text(metadata.description),
        tags,
        duration: metadata.duration,
    })
}

/// Trim a node name and reject ones the media service can't hold
pub fn validate_name(name: &str) -> Result<String, ModelError> {
    let trimmed = name.trim();
    let invalid = trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\'])
        || trimmed.chars().any(char::is_control);

    if invalid {
        return Err(ModelError::InvalidName(name.to_string()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_project() -> (Project, FolderId, FolderId) {
        let mut project = Project::with_film_layout("Nightfall").unwrap();
        let seq01 = project.add_sequence("seq01").unwrap();
        let seq02 = project.add_sequence("seq02").unwrap();
        (project, seq01, seq02)
    }

    #[test]
    fn test_film_layout() {
        let project = Project::with_film_layout("Nightfall").unwrap();
        let root = project.root_folder();
        assert!(root.is_root());
        let names: Vec<&str> = root
            .child_folders()
            .map(|id| project.folder(id).unwrap().name())
            .collect();
        assert_eq!(names, vec!["Sequences", "Scripts", "Media"]);
        assert_eq!(project.stats().folders, 4);
    }

    #[test]
    fn test_add_folder_rejects_sibling_collision() {
        let (mut project, seq01, _) = sample_project();
        project.add_asset(seq01, "shotA.mov", None).unwrap();

        let result = project.add_folder(seq01, "shotA.mov");
        assert!(matches!(result, Err(ModelError::NameCollision { .. })));

        let result = project.add_sequence("seq01");
        assert!(matches!(result, Err(ModelError::NameCollision { .. })));
    }

    #[test]
    fn test_invalid_names() {
        let (mut project, seq01, _) = sample_project();
        assert!(matches!(project.add_folder(seq01, "  "), Err(ModelError::InvalidName(_))));
        assert!(matches!(project.add_folder(seq01, "a/b"), Err(ModelError::InvalidName(_))));
        assert!(matches!(project.add_folder(seq01, ".."), Err(ModelError::InvalidName(_))));
        let id = project.add_folder(seq01, "  shot 010 ").unwrap();
        assert_eq!(project.folder(id).unwrap().name(), "shot 010");
    }

    #[test]
    fn test_walk_is_top_down_in_display_order() {
        let (mut project, seq01, seq02) = sample_project();
        let shot_a = project.add_folder(seq01, "shotA").unwrap();
        let shot_b = project.add_folder(seq01, "shotB").unwrap();

        let order = project.walk(project.root());
        let pos = |id| order.iter().position(|x| *x == id).unwrap();
        assert_eq!(order[0], project.root());
        assert!(pos(seq01) < pos(shot_a));
        assert!(pos(shot_a) < pos(shot_b));
        assert!(pos(shot_b) < pos(seq02));
    }

    #[test]
    fn test_folder_path() {
        let (project, seq01, _) = sample_project();
        assert_eq!(
            project.folder_path(seq01).unwrap(),
            "Nightfall/Sequences/seq01"
        );
    }

    #[test]
    fn test_move_folder_cycle_detected() {
        let (mut project, seq01, _) = sample_project();
        let shot = project.add_folder(seq01, "shotA").unwrap();

        let result = project.move_folder(seq01, shot);
        assert!(matches!(result, Err(ModelError::CycleDetected { .. })));

        let result = project.move_folder(project.root(), seq01);
        assert!(matches!(result, Err(ModelError::CannotModifyRoot(_))));
    }

    #[test]
    fn test_move_folder() {
        let (mut project, seq01, seq02) = sample_project();
        let shot = project.add_folder(seq01, "shotA").unwrap();

        project.move_folder(shot, seq02).unwrap();
        assert_eq!(project.folder(shot).unwrap().parent(), Some(seq02));
        assert_eq!(project.folder(seq01).unwrap().children().len(), 0);
        assert_eq!(
            project.folder(seq02).unwrap().children(),
            &[NodeRef::Folder(shot)]
        );
    }

    #[test]
    fn test_move_synced_folder_refused() {
        let (mut project, seq01, seq02) = sample_project();
        project
            .assign_folder_remote_id(seq01, RemoteId::from("R1"))
            .unwrap();
        let result = project.move_folder(seq01, seq02);
        assert!(matches!(result, Err(ModelError::AlreadySynced(_))));
    }

    #[test]
    fn test_remote_id_never_reassigned() {
        let (mut project, seq01, _) = sample_project();
        project
            .assign_folder_remote_id(seq01, RemoteId::from("R1"))
            .unwrap();
        let result = project.assign_folder_remote_id(seq01, RemoteId::from("R2"));
        assert!(matches!(result, Err(ModelError::RemoteIdAlreadyAssigned(_))));
        assert_eq!(
            project.folder(seq01).unwrap().remote_id(),
            Some(&RemoteId::from("R1"))
        );
    }

    #[test]
    fn test_rename_synced_folder_goes_local_only() {
        let (mut project, seq01, seq02) = sample_project();
        project
            .assign_folder_remote_id(seq01, RemoteId::from("R1"))
            .unwrap();
        project
            .assign_folder_remote_id(seq02, RemoteId::from("R2"))
            .unwrap();

        project.rename_folder(seq01, "seq01-opening").unwrap();

        let renamed = project.folder(seq01).unwrap();
        assert_eq!(renamed.name(), "seq01-opening");
        assert_eq!(renamed.status(), SyncStatus::LocalOnly);
        assert_eq!(renamed.remote_id(), Some(&RemoteId::from("R1")));
        assert_eq!(project.folder(seq02).unwrap().status(), SyncStatus::Synced);
    }

    #[test]
    fn test_rename_uploaded_asset_sets_pending() {
        let (mut project, seq01, _) = sample_project();
        let asset = project.add_asset(seq01, "shotA.mov", None).unwrap();
        project.rename_asset(asset, "shot-a.mov").unwrap();
        assert!(!project.asset(asset).unwrap().rename_pending());

        project.record_upload(asset, RemoteId::from("A1")).unwrap();
        project.rename_asset(asset, "shot-a-v2.mov").unwrap();
        assert!(project.asset(asset).unwrap().rename_pending());
    }

    #[test]
    fn test_remove_folder_drops_subtree_and_suggestions() {
        let (mut project, seq01, seq02) = sample_project();
        let shot = project.add_folder(seq01, "shotA").unwrap();
        let asset = project.add_asset(shot, "take1.mov", None).unwrap();
        project.push_suggestion(Suggestion::proposed(
            NodeRef::Asset(asset),
            "take1.mov",
            "shot-a-take-1.mov",
            None,
        ));
        project.push_suggestion(Suggestion::proposed(
            NodeRef::Folder(seq02),
            "seq02",
            "seq02-chase",
            None,
        ));

        project.remove_folder(seq01).unwrap();

        assert!(project.folder(seq01).is_none());
        assert!(project.folder(shot).is_none());
        assert!(project.asset(asset).is_none());
        assert_eq!(project.suggestions().len(), 1);
        assert_eq!(project.suggestions()[0].target, NodeRef::Folder(seq02));
    }

    #[test]
    fn test_reorder_children() {
        let (mut project, seq01, _) = sample_project();
        let a = project.add_asset(seq01, "shotA.mov", None).unwrap();
        let b = project.add_asset(seq01, "shotB.mov", None).unwrap();

        project
            .reorder_children(seq01, &[NodeRef::Asset(b), NodeRef::Asset(a)])
            .unwrap();
        assert_eq!(
            project.folder(seq01).unwrap().children(),
            &[NodeRef::Asset(b), NodeRef::Asset(a)]
        );

        let result = project.reorder_children(seq01, &[NodeRef::Asset(b)]);
        assert!(matches!(result, Err(ModelError::InvalidOrder(_))));

        let stranger = NodeRef::Asset(AssetId::new());
        let result = project.reorder_children(seq01, &[NodeRef::Asset(b), stranger]);
        assert!(matches!(result, Err(ModelError::InvalidOrder(_))));
    }

    #[test]
    fn test_adopt_remote_folder_requires_conflict() {
        let (mut project, seq01, _) = sample_project();
        let result = project.adopt_remote_folder(seq01, RemoteId::from("R9"));
        assert!(matches!(result, Err(ModelError::NotInConflict(_))));

        project
            .mark_folder_conflict(
                seq01,
                SyncIssue::new(IssueKind::NameCollision, "exists")
                    .with_existing(Some(RemoteId::from("R9"))),
            )
            .unwrap();
        project.adopt_remote_folder(seq01, RemoteId::from("R9")).unwrap();

        let folder = project.folder(seq01).unwrap();
        assert!(folder.is_synced());
        assert_eq!(folder.remote_id(), Some(&RemoteId::from("R9")));
        assert!(folder.issue().is_none());
    }

    #[test]
    fn test_remote_rename_resolution() {
        let (mut project, seq01, _) = sample_project();
        project
            .assign_folder_remote_id(seq01, RemoteId::from("R1"))
            .unwrap();
        project.rename_folder(seq01, "seq01-local").unwrap();
        let issue = SyncIssue::new(IssueKind::RemoteRenamed, "renamed remotely")
            .with_remote_name("seq01-remote");

        project.mark_folder_conflict(seq01, issue.clone()).unwrap();
        project.take_remote_name(seq01).unwrap();
        let folder = project.folder(seq01).unwrap();
        assert_eq!(folder.name(), "seq01-remote");
        assert_eq!(folder.synced_name(), Some("seq01-remote"));
        assert!(folder.is_synced());

        project.rename_folder(seq01, "seq01-local").unwrap();
        project.mark_folder_conflict(seq01, issue).unwrap();
        project.retry_folder(seq01).unwrap();
        let folder = project.folder(seq01).unwrap();
        assert_eq!(folder.name(), "seq01-local");
        assert_eq!(folder.synced_name(), Some("seq01-remote"));
        assert_eq!(folder.status(), SyncStatus::LocalOnly);
    }

    #[test]
    fn test_file_asset_by_category() {
        let mut project = Project::new("Shorts").unwrap();
        let script = project
            .file_asset("draft.fdx", None, AssetCategory::from_filename("draft.fdx"))
            .unwrap();
        let media = project
            .file_asset("b-roll.mp4", None, AssetCategory::from_filename("b-roll.mp4"))
            .unwrap();

        let script_folder = project.asset(script).unwrap().folder();
        let media_folder = project.asset(media).unwrap().folder();
        assert_eq!(project.folder(script_folder).unwrap().name(), "Scripts");
        assert_eq!(project.folder(media_folder).unwrap().name(), "Media");
    }

    #[test]
    fn test_in_subtree() {
        let (mut project, seq01, seq02) = sample_project();
        let asset = project.add_asset(seq01, "shotA.mov", None).unwrap();
        assert!(project.in_subtree(seq01, NodeRef::Asset(asset)));
        assert!(!project.in_subtree(seq02, NodeRef::Asset(asset)));
        assert!(project.in_subtree(project.root(), NodeRef::Folder(seq02)));
        assert!(!project.in_subtree(seq01, NodeRef::Folder(FolderId::new())));
    }

    #[test]
    fn test_serde_round_trip_keeps_tree() {
        let (mut project, seq01, _) = sample_project();
        project.add_asset(seq01, "shotA.mov", None).unwrap();

        let json = serde_json::to_string(&project).unwrap();
        let restored: Project = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.stats(), project.stats());
        assert_eq!(
            restored.folder_path(seq01),
            project.folder_path(seq01)
        );
    }

    fn rejected(doc: serde_json::Value) -> String {
        serde_json::from_value::<Project>(doc).unwrap_err().to_string()
    }

    #[test]
    fn test_load_rejects_missing_root() {
        let (project, _, _) = sample_project();
        let mut doc = serde_json::to_value(&project).unwrap();
        doc["folders"] = serde_json::json!({});

        assert!(rejected(doc).contains("root folder"));
    }

    #[test]
    fn test_load_rejects_root_with_parent() {
        let (project, seq01, _) = sample_project();
        let mut doc = serde_json::to_value(&project).unwrap();
        doc["folders"][project.root().to_string()]["parent"] = serde_json::json!(seq01.to_string());

        assert!(rejected(doc).contains("root folder has a parent"));
    }

    #[test]
    fn test_load_rejects_dangling_asset_folder() {
        let (mut project, seq01, _) = sample_project();
        let asset = project.add_asset(seq01, "shotA.mov", None).unwrap();
        let mut doc = serde_json::to_value(&project).unwrap();
        doc["assets"][asset.to_string()]["folder"] = serde_json::json!(FolderId::new().to_string());

        assert!(rejected(doc).contains("Inconsistent project"));
    }

    #[test]
    fn test_load_rejects_unlisted_and_duplicate_children() {
        let (project, seq01, seq02) = sample_project();
        let sequences = project.folder(seq01).unwrap().parent().unwrap();

        let mut doc = serde_json::to_value(&project).unwrap();
        doc["folders"][sequences.to_string()]["children"] =
            serde_json::to_value(vec![NodeRef::Folder(seq01)]).unwrap();
        assert!(rejected(doc).contains("not listed by its parent"));

        let mut doc = serde_json::to_value(&project).unwrap();
        doc["folders"][seq02.to_string()]["name"] = serde_json::json!("seq01");
        assert!(rejected(doc).contains("appears twice"));
    }

    #[test]
    fn test_load_rejects_parent_cycle() {
        let (project, seq01, seq02) = sample_project();
        let sequences = project.folder(seq01).unwrap().parent().unwrap();

        let mut doc = serde_json::to_value(&project).unwrap();
        let folders = &mut doc["folders"];
        folders[sequences.to_string()]["children"] = serde_json::json!([]);
        folders[seq01.to_string()]["parent"] = serde_json::json!(seq02.to_string());
        folders[seq01.to_string()]["children"] =
            serde_json::to_value(vec![NodeRef::Folder(seq02)]).unwrap();
        folders[seq02.to_string()]["parent"] = serde_json::json!(seq01.to_string());
        folders[seq02.to_string()]["children"] =
            serde_json::to_value(vec![NodeRef::Folder(seq01)]).unwrap();

        assert!(rejected(doc).contains("not reachable from the root"));
    }

    #[test]
    fn test_metadata_marks_pending_on_change() {
        let (mut project, seq01, _) = sample_project();
        let asset = project.add_asset(seq01, "shotA.mov", None).unwrap();

        project
            .set_metadata(
                NodeRef::Folder(seq01),
                NodeMetadata {
                    description: Some("  Rooftop chase ".to_string()),
                    duration: Some(42.5),
                    ..Default::default()
                },
            )
            .unwrap();
        let folder = project.folder(seq01).unwrap();
        assert!(folder.metadata_pending());
        assert_eq!(folder.metadata().description.as_deref(), Some("Rooftop chase"));
        assert_eq!(folder.metadata().duration, Some(42.5));

        let tags = NodeMetadata {
            tags: vec!["wide".to_string(), " night ".to_string(), "wide".to_string()],
            ..Default::default()
        };
        project.set_metadata(NodeRef::Asset(asset), tags.clone()).unwrap();
        assert_eq!(project.asset(asset).unwrap().metadata().tags, vec!["wide", "night"]);

        project.clear_metadata_pending(NodeRef::Asset(asset)).unwrap();
        project.set_metadata(NodeRef::Asset(asset), tags).unwrap();
        assert!(!project.asset(asset).unwrap().metadata_pending());

        let bad = NodeMetadata {
            duration: Some(-1.0),
            ..Default::default()
        };
        assert!(matches!(
            project.set_metadata(NodeRef::Folder(seq01), bad),
            Err(ModelError::InvalidMetadata(_))
        ));
        assert!(matches!(
            project.set_metadata(NodeRef::Folder(project.root()), NodeMetadata::default()),
            Err(ModelError::CannotModifyRoot(_))
        ));
    }

    #[test]
    fn test_project_info() {
        let mut project = Project::new("Nightfall").unwrap();
        project.set_info(ProjectInfo {
            director: Some(" A. Director ".to_string()),
            genre: Some("  ".to_string()),
            ..Default::default()
        });
        assert!(project.info_pending());
        assert_eq!(project.info().director.as_deref(), Some("A. Director"));
        assert_eq!(project.info().genre, None);

        let restored: Project =
            serde_json::from_value(serde_json::to_value(&project).unwrap()).unwrap();
        assert_eq!(restored.info(), project.info());
        assert!(restored.info_pending());
    }

    #[test]
    fn test_renaming_back_cancels_pending_rename() {
        let (mut project, seq01, _) = sample_project();
        let asset = project.add_asset(seq01, "shotA.mov", None).unwrap();
        project.record_upload(asset, RemoteId::from("A1")).unwrap();

        project.rename_asset(asset, "shotA-v2.mov").unwrap();
        assert!(project.asset(asset).unwrap().rename_pending());
        assert_eq!(project.asset(asset).unwrap().synced_filename(), Some("shotA.mov"));

        project.rename_asset(asset, "shotA.mov").unwrap();
        assert!(!project.asset(asset).unwrap().rename_pending());
    }
}
