use serde::{Deserialize, Serialize};

use crate::model::{NodeRef, RemoteId, SyncIssue};
use crate::remote::RemoteNode;

/// Outcome for one node touched by a reconcile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEntry {
    pub node: NodeRef,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<RemoteId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<SyncIssue>,
}

/// Result of one reconcile pass. Failures are collected here per node
/// instead of aborting the pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// The project itself was created remotely during this pass
    pub project_created: bool,
    pub created: Vec<SyncEntry>,
    /// Local renames pushed to the remote
    pub renamed: Vec<SyncEntry>,
    /// Nodes whose description, tags or duration were sent; the root entry
    /// stands for the project info
    pub metadata_updated: Vec<SyncEntry>,
    pub unchanged: Vec<SyncEntry>,
    pub conflicted: Vec<SyncEntry>,
    /// Not attempted because an ancestor is not synced
    pub skipped: Vec<SyncEntry>,
    /// Stopped early; nodes after the stopping point are not listed
    pub cancelled: bool,
}

impl SyncReport {
    /// Nothing failed and nothing was left out
    pub fn is_clean(&self) -> bool {
        self.conflicted.is_empty() && self.skipped.is_empty() && !self.cancelled
    }

    pub fn summary(&self) -> String {
        format!(
            "{} created, {} renamed, {} metadata updated, {} unchanged, {} conflicted, {} skipped{}",
            self.created.len(),
            self.renamed.len(),
            self.metadata_updated.len(),
            self.unchanged.len(),
            self.conflicted.len(),
            self.skipped.len(),
            if self.cancelled { " (cancelled)" } else { "" }
        )
    }
}

/// Local node whose remote counterpart no longer matches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftEntry {
    pub node: NodeRef,
    pub path: String,
    pub remote_id: RemoteId,
    /// Name found remotely, for renamed nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_name: Option<String>,
}

/// Remote child with no local counterpart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnknownRemote {
    /// Local path of the folder it was listed under
    pub parent_path: String,
    pub node: RemoteNode,
}

/// Read-only comparison of the local tree against remote listings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub folders_checked: usize,
    /// Synced locally but absent from the parent's remote listing
    pub missing_remote: Vec<DriftEntry>,
    /// Present on both sides under different names
    pub renamed_remote: Vec<DriftEntry>,
    pub unknown_remote: Vec<UnknownRemote>,
    /// Folders whose listing failed: (path, error)
    pub unreachable: Vec<(String, String)>,
    pub cancelled: bool,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.missing_remote.is_empty()
            && self.renamed_remote.is_empty()
            && self.unknown_remote.is_empty()
            && self.unreachable.is_empty()
    }
}
