//! Suggestion Merger
//!
//! Two-phase naming suggestions. `suggest` asks the generative-text service
//! for better names inside one subtree and stores them as proposals; nothing
//! in the tree changes until `accept` turns a proposal into a local rename.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

use crate::ai::prompts::{build_naming_prompt, PromptEntry, MAX_LISTED_NODES};
use crate::ai::{extract_json, AiError, SuggestionClient};
use crate::model::{
    validate_name, FolderId, ModelError, NodeRef, Project, Suggestion, SuggestionId,
    SuggestionStatus,
};
use crate::utils::sanitize_name;

#[derive(Debug, Error)]
pub enum SuggestError {
    #[error("Suggestion service failed: {0}")]
    Ai(#[from] AiError),

    #[error("Suggestion not found: {0}")]
    NotFound(SuggestionId),

    #[error("Suggestion {id} is already {status:?}")]
    NotOpen {
        id: SuggestionId,
        status: SuggestionStatus,
    },

    #[error("Target of suggestion {0} no longer exists")]
    TargetGone(SuggestionId),

    /// The target was renamed after the suggestion was made
    #[error("Suggestion {id} is stale: target is now {current:?}, was {original:?}")]
    Stale {
        id: SuggestionId,
        original: String,
        current: String,
    },

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// One entry of the model's answer
#[derive(Debug, Deserialize)]
struct RawSuggestion {
    handle: String,
    name: String,
    #[serde(default)]
    reason: Option<String>,
}

/// A node offered to the model under a short handle
struct Listed {
    handle: String,
    node: NodeRef,
    kind: &'static str,
    path: String,
}

pub struct SuggestionMerger {
    client: Arc<dyn SuggestionClient>,
}

impl SuggestionMerger {
    pub fn new(client: Arc<dyn SuggestionClient>) -> Self {
        Self { client }
    }

    /// Ask for naming suggestions for the subtree under `subtree_root` and
    /// store them as proposals. Entries that can't be parsed or that address
    /// anything outside the subtree are dropped.
    pub async fn suggest(
        &self,
        project: &mut Project,
        subtree_root: FolderId,
    ) -> Result<Vec<Suggestion>, SuggestError> {
        if project.folder(subtree_root).is_none() {
            return Err(ModelError::FolderNotFound(subtree_root).into());
        }

        let listed = list_subtree(project, subtree_root);
        if listed.is_empty() {
            return Ok(Vec::new());
        }
        let entries: Vec<PromptEntry> = listed
            .iter()
            .map(|l| PromptEntry {
                handle: &l.handle,
                kind: l.kind,
                path: &l.path,
            })
            .collect();
        let prompt = build_naming_prompt(project.name(), &entries);

        tracing::debug!(nodes = listed.len(), "Requesting naming suggestions");
        let response = self.client.complete(&prompt).await?;

        // Only handles the model was actually shown
        let by_handle: HashMap<&str, NodeRef> = listed
            .iter()
            .take(MAX_LISTED_NODES)
            .map(|l| (l.handle.as_str(), l.node))
            .collect();
        let already_open: HashSet<NodeRef> = project
            .suggestions()
            .iter()
            .filter(|s| s.is_open())
            .map(|s| s.target)
            .collect();

        let mut taken: HashSet<NodeRef> = HashSet::new();
        let mut created = Vec::new();
        for raw in parse_entries(&response) {
            let Some(&node) = by_handle.get(raw.handle.trim()) else {
                tracing::debug!(handle = %raw.handle, "Dropping suggestion outside the subtree");
                continue;
            };
            if already_open.contains(&node) || !taken.insert(node) {
                continue;
            }
            let Some(current) = project.node_name(node).map(str::to_string) else {
                continue;
            };
            let Some(name) = clean_proposal(project, node, &raw.name) else {
                tracing::debug!(handle = %raw.handle, "Dropping unusable name {:?}", raw.name);
                continue;
            };
            if name == current {
                continue;
            }

            let reason = raw.reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
            let suggestion = Suggestion::proposed(node, current, name, reason);
            project.push_suggestion(suggestion.clone());
            created.push(suggestion);
        }

        tracing::info!(
            project = project.name(),
            proposed = created.len(),
            "Naming suggestions stored"
        );
        Ok(created)
    }

    /// Apply a proposal as a local rename. Refused without any change when
    /// the target is gone, was renamed since, or the name is taken.
    pub fn accept(&self, project: &mut Project, id: SuggestionId) -> Result<Suggestion, SuggestError> {
        let suggestion = open_suggestion(project, id)?;
        let current = project
            .node_name(suggestion.target)
            .ok_or(SuggestError::TargetGone(id))?;
        if current != suggestion.original_name {
            return Err(SuggestError::Stale {
                id,
                original: suggestion.original_name.clone(),
                current: current.to_string(),
            });
        }

        project.rename_node(suggestion.target, &suggestion.proposed_name)?;

        let accepted = project.suggestion_mut(id).ok_or(SuggestError::NotFound(id))?;
        accepted.status = SuggestionStatus::Accepted;
        tracing::info!(node = %accepted.target, name = %accepted.proposed_name, "Suggestion accepted");
        Ok(accepted.clone())
    }

    pub fn reject(&self, project: &mut Project, id: SuggestionId) -> Result<(), SuggestError> {
        open_suggestion(project, id)?;
        let rejected = project.suggestion_mut(id).ok_or(SuggestError::NotFound(id))?;
        rejected.status = SuggestionStatus::Rejected;
        tracing::debug!(suggestion = %id, "Suggestion rejected");
        Ok(())
    }
}

fn open_suggestion(project: &Project, id: SuggestionId) -> Result<Suggestion, SuggestError> {
    let suggestion = project.suggestion(id).ok_or(SuggestError::NotFound(id))?;
    if !suggestion.is_open() {
        return Err(SuggestError::NotOpen {
            id,
            status: suggestion.status,
        });
    }
    Ok(suggestion.clone())
}

/// Folders and assets of the subtree with their handles. The project root
/// itself can't be renamed and is left out.
fn list_subtree(project: &Project, subtree_root: FolderId) -> Vec<Listed> {
    let mut listed = Vec::new();
    let mut push = |node: NodeRef, kind: &'static str, path: String| {
        listed.push(Listed {
            handle: format!("n{}", listed.len() + 1),
            node,
            kind,
            path,
        });
    };

    for folder_id in project.walk(subtree_root) {
        let Some(path) = project.folder_path(folder_id) else {
            continue;
        };
        if folder_id != project.root() {
            push(NodeRef::Folder(folder_id), "folder", path.clone());
        }
        for asset in project.assets_in(folder_id) {
            push(
                NodeRef::Asset(asset.id()),
                "file",
                format!("{}/{}", path, asset.filename()),
            );
        }
    }
    listed
}

/// Entries of the response, tolerating a bare array and skipping entries
/// that don't have the expected fields
fn parse_entries(response: &str) -> Vec<RawSuggestion> {
    let value: Value = match extract_json(response) {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!("Ignoring unparseable suggestion response: {}", err);
            return Vec::new();
        }
    };

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("suggestions") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<RawSuggestion>(item) {
            Ok(raw) => Some(raw),
            Err(err) => {
                tracing::debug!("Skipping malformed suggestion entry: {}", err);
                None
            }
        })
        .collect()
}

/// Sanitized name, with the asset's extension kept
fn clean_proposal(project: &Project, node: NodeRef, raw: &str) -> Option<String> {
    let mut name = sanitize_name(raw)?;

    if let NodeRef::Asset(id) = node {
        if let Some(ext) = project.asset(id).and_then(|a| a.extension()) {
            let cut = name
                .len()
                .checked_sub(ext.len())
                .filter(|&at| name.get(at..).is_some_and(|tail| tail.eq_ignore_ascii_case(&ext)));
            if let Some(at) = cut {
                name.truncate(at);
            }
            let stem = name.trim_end_matches('.').trim_end();
            if stem.is_empty() {
                return None;
            }
            name = format!("{}{}", stem, ext);
        }
    }

    validate_name(&name).ok()
}
