//! In-memory media service
//!
//! Behaves like the real service for the operations this crate uses, records
//! every call, and can be told to fail specific requests. Used for dry runs
//! from the command line and as the test double throughout the crate.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{FileHandle, RemoteError, RemoteHierarchy, RemoteNode, RemoteNodeKind, RemoteProject};
use crate::model::{NodeMetadata, NodeRef, Project, ProjectInfo, RemoteId};

/// One request received by [`InMemoryRemote`]
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    Whoami,
    CreateProject { name: String },
    CreateFolder { name: String, parent: RemoteId },
    CreateAsset { name: String, parent: RemoteId, bytes: u64 },
    ListChildren { parent: RemoteId },
    Rename { node: RemoteId, name: String },
    UpdateMetadata { node: RemoteId, metadata: NodeMetadata },
    UpdateProject { project: RemoteId, info: ProjectInfo },
}

#[derive(Default)]
struct State {
    next_id: u64,
    next_project: u64,
    nodes: BTreeMap<RemoteId, RemoteNode>,
    /// Children in creation order
    children: HashMap<RemoteId, Vec<RemoteId>>,
    metadata: HashMap<RemoteId, NodeMetadata>,
    /// Project name and last received info
    projects: HashMap<RemoteId, (String, ProjectInfo)>,
    /// Errors returned once for the next create, rename or update naming
    /// this node
    failures: HashMap<String, Vec<RemoteError>>,
    calls: Vec<RemoteCall>,
}

impl State {
    fn take_failure(&mut self, name: &str) -> Option<RemoteError> {
        let queue = self.failures.get_mut(name)?;
        if queue.is_empty() {
            return None;
        }
        Some(queue.remove(0))
    }

    fn find_child(&self, parent: &RemoteId, name: &str) -> Option<RemoteId> {
        self.children.get(parent)?.iter().find_map(|id| {
            self.nodes
                .get(id)
                .filter(|node| node.name == name)
                .map(|node| node.id.clone())
        })
    }

    fn fresh_id(&mut self) -> RemoteId {
        loop {
            self.next_id += 1;
            let id = RemoteId::new(format!("R{}", self.next_id));
            if !self.nodes.contains_key(&id) {
                return id;
            }
        }
    }

    /// Record a node under a known id, bypassing name checks
    fn adopt(&mut self, id: RemoteId, name: &str, parent: Option<RemoteId>, kind: RemoteNodeKind) {
        if let Some(parent) = &parent {
            self.children.entry(parent.clone()).or_default().push(id.clone());
        }
        self.nodes.insert(
            id.clone(),
            RemoteNode {
                id,
                name: name.to_string(),
                kind,
                parent,
            },
        );
    }

    fn insert(&mut self, name: &str, parent: &RemoteId, kind: RemoteNodeKind) -> Result<RemoteId, RemoteError> {
        if !self.nodes.contains_key(parent) {
            return Err(RemoteError::Api {
                status: 404,
                message: format!("Parent not found: {}", parent),
            });
        }
        if let Some(existing) = self.find_child(parent, name) {
            return Err(RemoteError::Conflict {
                name: name.to_string(),
                existing: Some(existing),
            });
        }

        let id = self.fresh_id();
        self.nodes.insert(
            id.clone(),
            RemoteNode {
                id: id.clone(),
                name: name.to_string(),
                kind,
                parent: Some(parent.clone()),
            },
        );
        self.children.entry(parent.clone()).or_default().push(id.clone());
        Ok(id)
    }
}

/// Media service double keeping its hierarchy in memory
#[derive(Default)]
pub struct InMemoryRemote {
    state: Mutex<State>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the remote state a project already knows about: every
    /// folder and asset with a remote id, under its last synced name. Used
    /// for dry runs of projects that have been synced before.
    pub fn mirror(project: &Project) -> Self {
        let remote = Self::new();
        {
            let mut state = remote.lock();
            if let Some(project_id) = project.remote_id() {
                state
                    .projects
                    .insert(project_id.clone(), (project.name().to_string(), ProjectInfo::default()));
            }
            for folder_id in project.walk(project.root()) {
                let Some(folder) = project.folder(folder_id) else {
                    continue;
                };
                let parent = folder
                    .parent()
                    .and_then(|p| project.folder(p))
                    .and_then(|p| p.remote_id().cloned());
                if let Some(id) = folder.remote_id() {
                    let name = folder.synced_name().unwrap_or(folder.name());
                    state.adopt(id.clone(), name, parent, RemoteNodeKind::Folder);
                }

                let Some(folder_remote) = folder.remote_id() else {
                    continue;
                };
                for child in folder.children() {
                    if let NodeRef::Asset(asset_id) = child {
                        if let Some(asset) = project.asset(*asset_id) {
                            if let Some(id) = asset.remote_id() {
                                let name = asset.synced_filename().unwrap_or(asset.filename());
                                state.adopt(
                                    id.clone(),
                                    name,
                                    Some(folder_remote.clone()),
                                    RemoteNodeKind::File,
                                );
                            }
                        }
                    }
                }
            }
        }
        remote
    }

    /// Make the next create or rename for `name` fail with `error`. Queued
    /// failures are consumed in order.
    pub fn fail_next(&self, name: &str, error: RemoteError) {
        self.lock()
            .failures
            .entry(name.to_string())
            .or_default()
            .push(error);
    }

    /// Add a folder directly, as if another user had created it
    pub fn seed_folder(&self, parent: &RemoteId, name: &str) -> Result<RemoteId, RemoteError> {
        self.lock().insert(name, parent, RemoteNodeKind::Folder)
    }

    /// Delete a node behind the client's back
    pub fn forget(&self, id: &RemoteId) {
        let mut state = self.lock();
        if let Some(node) = state.nodes.remove(id) {
            if let Some(parent) = node.parent {
                if let Some(siblings) = state.children.get_mut(&parent) {
                    siblings.retain(|child| child != id);
                }
            }
        }
    }

    pub fn node(&self, id: &RemoteId) -> Option<RemoteNode> {
        self.lock().nodes.get(id).cloned()
    }

    /// Metadata last sent for a node
    pub fn metadata(&self, id: &RemoteId) -> Option<NodeMetadata> {
        self.lock().metadata.get(id).cloned()
    }

    /// Info last sent for a project
    pub fn project_info(&self, id: &RemoteId) -> Option<ProjectInfo> {
        self.lock().projects.get(id).map(|(_, info)| info.clone())
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    RemoteCall::CreateFolder { .. } | RemoteCall::CreateAsset { .. } | RemoteCall::CreateProject { .. }
                )
            })
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-call; the map is still usable
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RemoteHierarchy for InMemoryRemote {
    async fn whoami(&self) -> Result<String, RemoteError> {
        self.lock().calls.push(RemoteCall::Whoami);
        Ok("dry-run@localhost".to_string())
    }

    async fn create_project(&self, name: &str) -> Result<RemoteProject, RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::CreateProject {
            name: name.to_string(),
        });
        if let Some(err) = state.take_failure(name) {
            return Err(err);
        }

        state.next_project += 1;
        let project_id = RemoteId::new(format!("P{}", state.next_project));
        let root_id = RemoteId::new(format!("root-{}", state.next_project));
        state
            .projects
            .insert(project_id.clone(), (name.to_string(), ProjectInfo::default()));
        state.nodes.insert(
            root_id.clone(),
            RemoteNode {
                id: root_id.clone(),
                name: name.to_string(),
                kind: RemoteNodeKind::Folder,
                parent: None,
            },
        );

        Ok(RemoteProject {
            id: project_id,
            root_asset_id: root_id,
            name: name.to_string(),
        })
    }

    async fn create_folder(&self, name: &str, parent: &RemoteId) -> Result<RemoteId, RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::CreateFolder {
            name: name.to_string(),
            parent: parent.clone(),
        });
        if let Some(err) = state.take_failure(name) {
            return Err(err);
        }
        state.insert(name, parent, RemoteNodeKind::Folder)
    }

    async fn create_asset(
        &self,
        name: &str,
        parent: &RemoteId,
        mut file: FileHandle,
    ) -> Result<RemoteId, RemoteError> {
        let bytes = file.read_all().await?.len() as u64;

        let mut state = self.lock();
        state.calls.push(RemoteCall::CreateAsset {
            name: name.to_string(),
            parent: parent.clone(),
            bytes,
        });
        if let Some(err) = state.take_failure(name) {
            return Err(err);
        }
        state.insert(name, parent, RemoteNodeKind::File)
    }

    async fn list_children(&self, parent: &RemoteId) -> Result<Vec<RemoteNode>, RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::ListChildren {
            parent: parent.clone(),
        });
        if !state.nodes.contains_key(parent) {
            return Err(RemoteError::Api {
                status: 404,
                message: format!("Asset not found: {}", parent),
            });
        }

        Ok(state
            .children
            .get(parent)
            .map(|ids| ids.iter().filter_map(|id| state.nodes.get(id).cloned()).collect())
            .unwrap_or_default())
    }

    async fn rename(&self, node: &RemoteId, name: &str) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::Rename {
            node: node.clone(),
            name: name.to_string(),
        });
        if let Some(err) = state.take_failure(name) {
            return Err(err);
        }

        let parent = state
            .nodes
            .get(node)
            .ok_or_else(|| RemoteError::Api {
                status: 404,
                message: format!("Asset not found: {}", node),
            })?
            .parent
            .clone();
        if let Some(parent) = parent {
            if let Some(existing) = state.find_child(&parent, name).filter(|id| id != node) {
                return Err(RemoteError::Conflict {
                    name: name.to_string(),
                    existing: Some(existing),
                });
            }
        }

        if let Some(entry) = state.nodes.get_mut(node) {
            entry.name = name.to_string();
        }
        Ok(())
    }

    async fn update_metadata(&self, node: &RemoteId, metadata: &NodeMetadata) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::UpdateMetadata {
            node: node.clone(),
            metadata: metadata.clone(),
        });
        let name = state
            .nodes
            .get(node)
            .map(|entry| entry.name.clone())
            .ok_or_else(|| RemoteError::Api {
                status: 404,
                message: format!("Asset not found: {}", node),
            })?;
        if let Some(err) = state.take_failure(&name) {
            return Err(err);
        }
        state.metadata.insert(node.clone(), metadata.clone());
        Ok(())
    }

    async fn update_project(&self, project: &RemoteId, info: &ProjectInfo) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::UpdateProject {
            project: project.clone(),
            info: info.clone(),
        });
        let name = state
            .projects
            .get(project)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| RemoteError::Api {
                status: 404,
                message: format!("Project not found: {}", project),
            })?;
        if let Some(err) = state.take_failure(&name) {
            return Err(err);
        }
        if let Some(entry) = state.projects.get_mut(project) {
            entry.1 = info.clone();
        }
        Ok(())
    }
}

/// Raises a cancel token while serving every create, as if the user
/// interrupted during that request
#[cfg(test)]
pub(crate) struct CancelDuringCreate {
    pub(crate) inner: std::sync::Arc<InMemoryRemote>,
    cancel: crate::cancel::CancelToken,
}

#[cfg(test)]
impl CancelDuringCreate {
    pub(crate) fn new(inner: std::sync::Arc<InMemoryRemote>, cancel: crate::cancel::CancelToken) -> Self {
        Self { inner, cancel }
    }
}

#[cfg(test)]
#[async_trait]
impl RemoteHierarchy for CancelDuringCreate {
    async fn whoami(&self) -> Result<String, RemoteError> {
        self.inner.whoami().await
    }

    async fn create_project(&self, name: &str) -> Result<RemoteProject, RemoteError> {
        self.inner.create_project(name).await
    }

    async fn create_folder(&self, name: &str, parent: &RemoteId) -> Result<RemoteId, RemoteError> {
        self.cancel.cancel();
        self.inner.create_folder(name, parent).await
    }

    async fn create_asset(
        &self,
        name: &str,
        parent: &RemoteId,
        file: FileHandle,
    ) -> Result<RemoteId, RemoteError> {
        self.cancel.cancel();
        self.inner.create_asset(name, parent, file).await
    }

    async fn list_children(&self, parent: &RemoteId) -> Result<Vec<RemoteNode>, RemoteError> {
        self.inner.list_children(parent).await
    }

    async fn rename(&self, node: &RemoteId, name: &str) -> Result<(), RemoteError> {
        self.inner.rename(node, name).await
    }

    async fn update_metadata(&self, node: &RemoteId, metadata: &NodeMetadata) -> Result<(), RemoteError> {
        self.inner.update_metadata(node, metadata).await
    }

    async fn update_project(&self, project: &RemoteId, info: &ProjectInfo) -> Result<(), RemoteError> {
        self.inner.update_project(project, info).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_list() {
        let remote = InMemoryRemote::new();
        let project = remote.create_project("Nightfall").await.unwrap();
        let seq = remote
            .create_folder("seq01", &project.root_asset_id)
            .await
            .unwrap();
        assert_eq!(seq, RemoteId::from("R1"));

        let children = remote.list_children(&project.root_asset_id).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "seq01");
        assert_eq!(children[0].kind, RemoteNodeKind::Folder);
    }

    #[tokio::test]
    async fn test_duplicate_name_is_conflict() {
        let remote = InMemoryRemote::new();
        let project = remote.create_project("Nightfall").await.unwrap();
        let existing = remote.seed_folder(&project.root_asset_id, "seq01").unwrap();

        let result = remote.create_folder("seq01", &project.root_asset_id).await;
        assert_eq!(
            result,
            Err(RemoteError::Conflict {
                name: "seq01".to_string(),
                existing: Some(existing),
            })
        );
    }

    #[tokio::test]
    async fn test_mirror_knows_synced_nodes() {
        let mut project = Project::new("Nightfall").unwrap();
        let seq01 = project.add_folder(project.root(), "seq01").unwrap();
        project
            .link_remote_project(RemoteId::from("P9"), RemoteId::from("root-9"))
            .unwrap();
        project
            .assign_folder_remote_id(seq01, RemoteId::from("R1"))
            .unwrap();
        project.add_folder(seq01, "shotA").unwrap();

        let remote = InMemoryRemote::mirror(&project);
        let children = remote.list_children(&RemoteId::from("root-9")).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "seq01");

        // New ids never reuse a mirrored one
        let created = remote.create_folder("shotA", &RemoteId::from("R1")).await.unwrap();
        assert_eq!(created, RemoteId::from("R2"));
    }

    #[tokio::test]
    async fn test_mirror_keeps_last_synced_asset_name() {
        let mut project = Project::new("Nightfall").unwrap();
        let root = project.root();
        project
            .link_remote_project(RemoteId::from("P9"), RemoteId::from("root-9"))
            .unwrap();
        let clip = project.add_asset(root, "take1.mov", None).unwrap();
        project.record_upload(clip, RemoteId::from("R5")).unwrap();
        project.rename_asset(clip, "shotA_take1.mov").unwrap();
        assert!(project.asset(clip).unwrap().rename_pending());

        let remote = InMemoryRemote::mirror(&project);
        assert_eq!(remote.node(&RemoteId::from("R5")).unwrap().name, "take1.mov");
        assert!(remote.project_info(&RemoteId::from("P9")).is_some());
    }

    #[tokio::test]
    async fn test_metadata_updates_are_stored() {
        let remote = InMemoryRemote::new();
        let project = remote.create_project("Nightfall").await.unwrap();
        let seq = remote
            .create_folder("seq01", &project.root_asset_id)
            .await
            .unwrap();

        let metadata = NodeMetadata {
            description: Some("Night exterior".to_string()),
            tags: vec!["ext".to_string()],
            duration: None,
        };
        remote.update_metadata(&seq, &metadata).await.unwrap();
        assert_eq!(remote.metadata(&seq), Some(metadata.clone()));

        let info = ProjectInfo {
            director: Some("R. Vance".to_string()),
            ..Default::default()
        };
        remote.update_project(&project.id, &info).await.unwrap();
        assert_eq!(remote.project_info(&project.id), Some(info));

        remote.fail_next("seq01", RemoteError::Transport("reset".to_string()));
        assert!(remote.update_metadata(&seq, &NodeMetadata::default()).await.is_err());
        assert_eq!(remote.metadata(&seq), Some(metadata));

        let missing = remote
            .update_metadata(&RemoteId::from("R99"), &NodeMetadata::default())
            .await;
        assert!(matches!(missing, Err(RemoteError::Api { status: 404, .. })));
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed_once() {
        let remote = InMemoryRemote::new();
        let project = remote.create_project("Nightfall").await.unwrap();
        remote.fail_next("seq01", RemoteError::Transport("reset".to_string()));

        assert!(remote.create_folder("seq01", &project.root_asset_id).await.is_err());
        assert!(remote.create_folder("seq01", &project.root_asset_id).await.is_ok());
    }
}
