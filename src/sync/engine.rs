//! Sync Engine
//!
//! Pushes the local project tree to the media service one folder at a time,
//! parents before children, then asset renames and edited metadata. Every
//! failure is recorded on the node it belongs to and in the [`SyncReport`];
//! the pass itself never fails.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::model::{
    Folder, FolderId, IssueKind, ModelError, NodeMetadata, NodeRef, Project, RemoteId, SyncIssue,
    SyncStatus,
};
use crate::remote::{RemoteError, RemoteHierarchy, RemoteProject};

use super::report::{DriftEntry, DriftReport, SyncEntry, SyncReport, UnknownRemote};

/// What happened to one folder during a pass
enum Step {
    ProjectCreated(RemoteProject),
    Created(RemoteId),
    Renamed,
    Unchanged,
    Conflict(SyncIssue),
}

/// Reconciles a [`Project`] against a [`RemoteHierarchy`]
pub struct SyncEngine {
    remote: Arc<dyn RemoteHierarchy>,
    cancel: CancelToken,
}

impl SyncEngine {
    pub fn new(remote: Arc<dyn RemoteHierarchy>) -> Self {
        Self {
            remote,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Create missing folders, push pending renames and pending metadata.
    ///
    /// Folders are visited top-down. A folder whose own step leaves it
    /// unsynced blocks its whole subtree for this pass.
    pub async fn reconcile(&self, project: &mut Project) -> SyncReport {
        let mut report = SyncReport::default();
        let mut blocked: HashSet<FolderId> = HashSet::new();

        for id in project.walk(project.root()) {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let Some(folder) = project.folder(id) else {
                continue;
            };
            let path = project.folder_path(id).unwrap_or_default();

            if folder.parent().is_some_and(|p| blocked.contains(&p)) {
                tracing::debug!(path = %path, "Skipping folder under unsynced parent");
                blocked.insert(id);
                report.skipped.push(entry(NodeRef::Folder(id), path, folder.remote_id().cloned()));
                continue;
            }

            let step = self.step(project, id).await;
            match self.apply(project, id, step) {
                Ok(Step::ProjectCreated(created)) => {
                    report.project_created = true;
                    report.created.push(entry(NodeRef::Folder(id), path, Some(created.root_asset_id)));
                }
                Ok(Step::Created(remote_id)) => {
                    tracing::debug!(path = %path, remote_id = %remote_id, "Created folder");
                    report.created.push(entry(NodeRef::Folder(id), path, Some(remote_id)));
                }
                Ok(Step::Renamed) => {
                    tracing::debug!(path = %path, "Pushed folder rename");
                    let remote_id = project.folder(id).and_then(|f| f.remote_id().cloned());
                    report.renamed.push(entry(NodeRef::Folder(id), path, remote_id));
                }
                Ok(Step::Unchanged) => {
                    let remote_id = project.folder(id).and_then(|f| f.remote_id().cloned());
                    report.unchanged.push(entry(NodeRef::Folder(id), path, remote_id));
                }
                Ok(Step::Conflict(issue)) => {
                    tracing::warn!(path = %path, kind = ?issue.kind, "Folder in conflict: {}", issue.message);
                    blocked.insert(id);
                    let remote_id = project.folder(id).and_then(|f| f.remote_id().cloned());
                    report.conflicted.push(SyncEntry {
                        node: NodeRef::Folder(id),
                        path,
                        remote_id,
                        issue: Some(issue),
                    });
                }
                Err(err) => {
                    tracing::warn!(path = %path, "Could not record sync result: {}", err);
                    blocked.insert(id);
                    report.conflicted.push(SyncEntry {
                        node: NodeRef::Folder(id),
                        path,
                        remote_id: None,
                        issue: Some(SyncIssue::new(IssueKind::Rejected, err.to_string())),
                    });
                }
            }
        }

        if !report.cancelled {
            self.push_asset_renames(project, &blocked, &mut report).await;
        }
        if !report.cancelled {
            self.push_metadata(project, &blocked, &mut report).await;
        }

        tracing::info!(project = project.name(), "Reconcile finished: {}", report.summary());
        report
    }

    /// Decide and perform the remote call for one folder, without touching
    /// the model
    async fn step(&self, project: &Project, id: FolderId) -> Step {
        let Some(folder) = project.folder(id) else {
            return Step::Unchanged;
        };

        if folder.is_root() {
            if folder.remote_id().is_some() {
                return Step::Unchanged;
            }
            return match self.remote.create_project(project.name()).await {
                Ok(created) => {
                    tracing::info!(project = project.name(), remote_id = %created.id, "Created remote project");
                    Step::ProjectCreated(created)
                }
                Err(err) => Step::Conflict(issue_from(&err)),
            };
        }

        if folder.status() == SyncStatus::Conflict {
            if let Some(issue) = folder.issue().filter(|issue| issue.needs_decision()) {
                return Step::Conflict(issue.clone());
            }
        }

        match folder.remote_id() {
            Some(_) if folder.is_synced() => Step::Unchanged,
            Some(remote_id) => self.push_rename(project, folder, remote_id).await,
            None => {
                let Some(parent) = project.parent_remote_id(id) else {
                    return Step::Conflict(SyncIssue::new(
                        IssueKind::Rejected,
                        "Parent folder has no remote id",
                    ));
                };
                match self.remote.create_folder(folder.name(), parent).await {
                    Ok(remote_id) => Step::Created(remote_id),
                    Err(err) => Step::Conflict(issue_from(&err)),
                }
            }
        }
    }

    /// Push a local rename, unless the remote side was renamed to something
    /// else since the last sync
    async fn push_rename(&self, project: &Project, folder: &Folder, remote_id: &RemoteId) -> Step {
        let name = folder.name();
        let Some(synced_name) = folder.synced_name() else {
            return match self.remote.rename(remote_id, name).await {
                Ok(()) => Step::Renamed,
                Err(err) => Step::Conflict(issue_from(&err)),
            };
        };
        if synced_name == name {
            return Step::Unchanged;
        }

        if let Some(parent) = project.parent_remote_id(folder.id()) {
            let listing = match self.remote.list_children(parent).await {
                Ok(listing) => listing,
                Err(err) => return Step::Conflict(issue_from(&err)),
            };
            if let Some(node) = listing.iter().find(|node| &node.id == remote_id) {
                if node.name == name {
                    return Step::Renamed;
                }
                if node.name != synced_name {
                    let issue = SyncIssue::new(
                        IssueKind::RemoteRenamed,
                        format!(
                            "Renamed remotely to {:?} while renamed locally to {:?}",
                            node.name, name
                        ),
                    )
                    .with_remote_name(node.name.clone());
                    return Step::Conflict(issue);
                }
            }
        }

        match self.remote.rename(remote_id, name).await {
            Ok(()) => Step::Renamed,
            Err(err) => Step::Conflict(issue_from(&err)),
        }
    }

    /// Record a step on the model
    fn apply(&self, project: &mut Project, id: FolderId, step: Step) -> Result<Step, ModelError> {
        match &step {
            Step::ProjectCreated(created) => {
                project.link_remote_project(created.id.clone(), created.root_asset_id.clone())?
            }
            Step::Created(remote_id) => project.assign_folder_remote_id(id, remote_id.clone())?,
            Step::Renamed => project.mark_folder_synced(id)?,
            Step::Unchanged => {
                if project.folder(id).is_some_and(|f| !f.is_synced()) {
                    project.mark_folder_synced(id)?;
                }
            }
            Step::Conflict(issue) => project.mark_folder_conflict(id, issue.clone())?,
        }
        Ok(step)
    }

    async fn push_asset_renames(
        &self,
        project: &mut Project,
        blocked: &HashSet<FolderId>,
        report: &mut SyncReport,
    ) {
        let pending: Vec<_> = project
            .walk(project.root())
            .into_iter()
            .filter_map(|folder| project.folder(folder))
            .flat_map(|folder| folder.child_assets().collect::<Vec<_>>())
            .filter_map(|id| project.asset(id))
            .filter(|asset| asset.rename_pending())
            .filter_map(|asset| {
                asset
                    .remote_id()
                    .map(|rid| (asset.id(), asset.folder(), asset.filename().to_string(), rid.clone()))
            })
            .collect();

        for (id, folder, filename, remote_id) in pending {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                return;
            }
            let path = format!("{}/{}", project.folder_path(folder).unwrap_or_default(), filename);
            if blocked.contains(&folder) {
                report.skipped.push(entry(NodeRef::Asset(id), path, Some(remote_id)));
                continue;
            }

            match self.remote.rename(&remote_id, &filename).await {
                Ok(()) => {
                    if let Err(err) = project.clear_asset_rename(id) {
                        tracing::warn!(path = %path, "Could not record asset rename: {}", err);
                    }
                    tracing::debug!(path = %path, "Pushed asset rename");
                    report.renamed.push(entry(NodeRef::Asset(id), path, Some(remote_id)));
                }
                Err(err) => {
                    tracing::warn!(path = %path, "Asset rename failed: {}", err);
                    report.conflicted.push(SyncEntry {
                        node: NodeRef::Asset(id),
                        path,
                        remote_id: Some(remote_id),
                        issue: Some(issue_from(&err)),
                    });
                }
            }
        }
    }

    /// Send project info and node metadata edited since the last push. Nodes
    /// not yet known remotely keep their flag until they are.
    async fn push_metadata(
        &self,
        project: &mut Project,
        blocked: &HashSet<FolderId>,
        report: &mut SyncReport,
    ) {
        if let Some(project_id) = project.remote_id().cloned().filter(|_| project.info_pending()) {
            let root = project.root();
            let path = project.folder_path(root).unwrap_or_default();
            match self.remote.update_project(&project_id, project.info()).await {
                Ok(()) => {
                    project.clear_info_pending();
                    tracing::debug!(project = project.name(), "Pushed project info");
                    report
                        .metadata_updated
                        .push(entry(NodeRef::Folder(root), path, Some(project_id)));
                }
                Err(err) => {
                    tracing::warn!(project = project.name(), "Project info update failed: {}", err);
                    report.conflicted.push(SyncEntry {
                        node: NodeRef::Folder(root),
                        path,
                        remote_id: Some(project_id),
                        issue: Some(issue_from(&err)),
                    });
                }
            }
        }

        let pending: Vec<_> = project
            .walk(project.root())
            .into_iter()
            .filter(|id| !blocked.contains(id))
            .filter_map(|id| project.folder(id))
            .flat_map(|folder| {
                std::iter::once(NodeRef::Folder(folder.id()))
                    .chain(folder.child_assets().map(NodeRef::Asset))
                    .collect::<Vec<_>>()
            })
            .filter_map(|node| pending_metadata(&*project, node))
            .collect();

        for (node, path, remote_id, metadata) in pending {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                return;
            }
            match self.remote.update_metadata(&remote_id, &metadata).await {
                Ok(()) => {
                    if let Err(err) = project.clear_metadata_pending(node) {
                        tracing::warn!(path = %path, "Could not record metadata push: {}", err);
                    }
                    tracing::debug!(path = %path, "Pushed metadata");
                    report.metadata_updated.push(entry(node, path, Some(remote_id)));
                }
                Err(err) => {
                    tracing::warn!(path = %path, "Metadata update failed: {}", err);
                    report.conflicted.push(SyncEntry {
                        node,
                        path,
                        remote_id: Some(remote_id),
                        issue: Some(issue_from(&err)),
                    });
                }
            }
        }
    }

    /// Compare synced folders with their remote listings. Read-only.
    pub async fn audit(&self, project: &Project) -> DriftReport {
        let mut report = DriftReport::default();

        for id in project.walk(project.root()) {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let Some(folder) = project.folder(id) else {
                continue;
            };
            let Some(remote_id) = folder.remote_id().filter(|_| folder.is_synced()) else {
                continue;
            };
            let path = project.folder_path(id).unwrap_or_default();
            report.folders_checked += 1;

            let listing = match self.remote.list_children(remote_id).await {
                Ok(listing) => listing,
                Err(err) => {
                    tracing::warn!(path = %path, "Listing failed: {}", err);
                    report.unreachable.push((path, err.to_string()));
                    continue;
                }
            };
            let by_id: HashMap<&RemoteId, &str> =
                listing.iter().map(|node| (&node.id, node.name.as_str())).collect();
            let mut known: HashSet<&RemoteId> = HashSet::new();

            for child in folder.children() {
                let Some((child_remote, expected, child_path)) = expected_remote(project, *child) else {
                    continue;
                };
                known.insert(child_remote);
                match by_id.get(child_remote) {
                    None => report.missing_remote.push(DriftEntry {
                        node: *child,
                        path: child_path,
                        remote_id: child_remote.clone(),
                        remote_name: None,
                    }),
                    Some(remote_name) if expected.is_some_and(|name| name != *remote_name) => {
                        report.renamed_remote.push(DriftEntry {
                            node: *child,
                            path: child_path,
                            remote_id: child_remote.clone(),
                            remote_name: Some(remote_name.to_string()),
                        })
                    }
                    Some(_) => {}
                }
            }

            for node in &listing {
                if !known.contains(&node.id) {
                    report.unknown_remote.push(UnknownRemote {
                        parent_path: path.clone(),
                        node: node.clone(),
                    });
                }
            }
        }

        tracing::info!(
            project = project.name(),
            checked = report.folders_checked,
            missing = report.missing_remote.len(),
            renamed = report.renamed_remote.len(),
            unknown = report.unknown_remote.len(),
            "Audit finished"
        );
        report
    }
}

/// Remote id of a child plus the name it should carry remotely, if known
fn expected_remote(project: &Project, node: NodeRef) -> Option<(&RemoteId, Option<&str>, String)> {
    match node {
        NodeRef::Folder(id) => {
            let folder = project.folder(id)?;
            let remote_id = folder.remote_id()?;
            let path = project.folder_path(id).unwrap_or_default();
            Some((remote_id, folder.synced_name(), path))
        }
        NodeRef::Asset(id) => {
            let asset = project.asset(id)?;
            let remote_id = asset.remote_id()?;
            let path = format!(
                "{}/{}",
                project.folder_path(asset.folder()).unwrap_or_default(),
                asset.filename()
            );
            let expected = asset
                .synced_filename()
                .or_else(|| (!asset.rename_pending()).then(|| asset.filename()));
            Some((remote_id, expected, path))
        }
    }
}

/// Path, remote id and metadata of a node with an unsent metadata edit
fn pending_metadata(project: &Project, node: NodeRef) -> Option<(NodeRef, String, RemoteId, NodeMetadata)> {
    match node {
        NodeRef::Folder(id) => {
            let folder = project.folder(id).filter(|f| f.metadata_pending())?;
            let remote_id = folder.remote_id()?.clone();
            let path = project.folder_path(id).unwrap_or_default();
            Some((node, path, remote_id, folder.metadata().clone()))
        }
        NodeRef::Asset(id) => {
            let asset = project.asset(id).filter(|a| a.metadata_pending())?;
            let remote_id = asset.remote_id()?.clone();
            let path = format!(
                "{}/{}",
                project.folder_path(asset.folder()).unwrap_or_default(),
                asset.filename()
            );
            Some((node, path, remote_id, asset.metadata().clone()))
        }
    }
}

fn entry(node: NodeRef, path: String, remote_id: Option<RemoteId>) -> SyncEntry {
    SyncEntry {
        node,
        path,
        remote_id,
        issue: None,
    }
}

fn issue_from(err: &RemoteError) -> SyncIssue {
    let existing = match err {
        RemoteError::Conflict { existing, .. } => existing.clone(),
        _ => None,
    };
    SyncIssue::new(err.issue_kind(), err.to_string()).with_existing(existing)
}
