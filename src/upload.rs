//! Upload Coordinator
//!
//! Sends asset bytes to the media service one file at a time. An asset is
//! only uploaded into a folder that is already synced, and each failure is
//! kept on the asset rather than retried. Metadata edited before the upload
//! follows right after the create.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::model::{AssetId, NodeRef, Project, RemoteId, UploadStatus};
use crate::remote::{FileHandle, RemoteHierarchy};
use crate::utils::format_size;

pub const REASON_FOLDER_NOT_SYNCED: &str = "folder not synced";
pub const REASON_ALREADY_UPLOADED: &str = "already uploaded";

/// Outcome for one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadEntry {
    pub asset: AssetId,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<RemoteId>,
    /// Skip reason or error text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReport {
    pub uploaded: Vec<UploadEntry>,
    pub failed: Vec<UploadEntry>,
    pub skipped: Vec<UploadEntry>,
    pub bytes_sent: u64,
    pub cancelled: bool,
}

impl UploadReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty() && !self.cancelled
    }

    pub fn summary(&self) -> String {
        format!(
            "{} uploaded ({}), {} failed, {} skipped{}",
            self.uploaded.len(),
            format_size(self.bytes_sent),
            self.failed.len(),
            self.skipped.len(),
            if self.cancelled { " (cancelled)" } else { "" }
        )
    }
}

pub struct UploadCoordinator {
    remote: Arc<dyn RemoteHierarchy>,
    cancel: CancelToken,
}

impl UploadCoordinator {
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

    /// Upload every asset still pending. Failed assets wait for an explicit
    /// [`Project::retry_asset`].
    pub async fn upload_pending(&self, project: &mut Project) -> UploadReport {
        let pending: Vec<AssetId> = project
            .assets()
            .filter(|asset| asset.status() == UploadStatus::Pending)
            .map(|asset| asset.id())
            .collect();
        self.upload_all(project, &pending).await
    }

    /// Upload the given assets in folder path, then filename order
    pub async fn upload_all(&self, project: &mut Project, assets: &[AssetId]) -> UploadReport {
        let mut report = UploadReport::default();

        let mut seen = HashSet::new();
        let mut ordered: Vec<(String, String, AssetId)> = Vec::new();
        for id in assets {
            if !seen.insert(*id) {
                continue;
            }
            match project.asset(*id) {
                Some(asset) => ordered.push((
                    project.folder_path(asset.folder()).unwrap_or_default(),
                    asset.filename().to_string(),
                    *id,
                )),
                None => report.skipped.push(UploadEntry {
                    asset: *id,
                    path: id.to_string(),
                    remote_id: None,
                    detail: Some("not in project".to_string()),
                }),
            }
        }
        ordered.sort();

        for (folder_path, filename, id) in ordered {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let path = format!("{}/{}", folder_path, filename);
            self.upload_one(project, id, path, &mut report).await;
        }

        tracing::info!(project = project.name(), "Upload finished: {}", report.summary());
        report
    }

    async fn upload_one(&self, project: &mut Project, id: AssetId, path: String, report: &mut UploadReport) {
        let Some(asset) = project.asset(id) else {
            return;
        };

        if let Some(remote_id) = asset.remote_id() {
            report.skipped.push(UploadEntry {
                asset: id,
                path,
                remote_id: Some(remote_id.clone()),
                detail: Some(REASON_ALREADY_UPLOADED.to_string()),
            });
            return;
        }

        let parent = project
            .folder(asset.folder())
            .filter(|folder| folder.is_synced())
            .and_then(|folder| folder.remote_id())
            .cloned();
        let Some(parent) = parent else {
            tracing::debug!(path = %path, "Skipping asset in unsynced folder");
            report.skipped.push(UploadEntry {
                asset: id,
                path,
                remote_id: None,
                detail: Some(REASON_FOLDER_NOT_SYNCED.to_string()),
            });
            return;
        };

        let filename = asset.filename().to_string();
        let source = asset.source().map(|p| p.to_path_buf());

        if let Err(err) = project.mark_asset_uploading(id) {
            tracing::warn!(path = %path, "Could not mark asset uploading: {}", err);
            return;
        }

        let result = match source {
            None => Err("No source file recorded".to_string()),
            Some(source) => match FileHandle::open(&source).await {
                Err(err) => Err(err.to_string()),
                Ok(handle) => {
                    let size = handle.size();
                    tracing::debug!(path = %path, size = %format_size(size), "Uploading asset");
                    // The handle moves into the call and is closed when it returns
                    self.remote
                        .create_asset(&filename, &parent, handle)
                        .await
                        .map(|remote_id| (remote_id, size))
                        .map_err(|err| err.to_string())
                }
            },
        };

        match result {
            Ok((remote_id, size)) => {
                let recorded = project
                    .set_asset_size(id, size)
                    .and_then(|_| project.record_upload(id, remote_id.clone()));
                if let Err(err) = recorded {
                    tracing::warn!(path = %path, "Could not record upload: {}", err);
                }
                self.push_metadata(project, id, &remote_id, &path).await;
                report.bytes_sent += size;
                report.uploaded.push(UploadEntry {
                    asset: id,
                    path,
                    remote_id: Some(remote_id),
                    detail: None,
                });
            }
            Err(message) => {
                tracing::warn!(path = %path, "Upload failed: {}", message);
                if let Err(err) = project.record_upload_failure(id, message.clone()) {
                    tracing::warn!(path = %path, "Could not record upload failure: {}", err);
                }
                report.failed.push(UploadEntry {
                    asset: id,
                    path,
                    remote_id: None,
                    detail: Some(message),
                });
            }
        }
    }
}

impl UploadCoordinator {
    /// Send the asset's pending metadata. A failure leaves it pending for
    /// the next reconcile.
    async fn push_metadata(&self, project: &mut Project, id: AssetId, remote_id: &RemoteId, path: &str) {
        let Some(metadata) = project
            .asset(id)
            .filter(|asset| asset.metadata_pending())
            .map(|asset| asset.metadata().clone())
        else {
            return;
        };
        match self.remote.update_metadata(remote_id, &metadata).await {
            Ok(()) => {
                if let Err(err) = project.clear_metadata_pending(NodeRef::Asset(id)) {
                    tracing::warn!(path = %path, "Could not record metadata push: {}", err);
                }
            }
            Err(err) => tracing::warn!(path = %path, "Metadata update failed: {}", err),
        }
    }
}
