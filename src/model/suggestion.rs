use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::node::{NodeRef, SuggestionId};

/// Lifecycle of a naming suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Proposed,
    Accepted,
    Rejected,
}

/// Producer of a suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionSource {
    GenerativeText,
}

/// A proposed rename. Inert until accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub id: SuggestionId,
    pub target: NodeRef,
    pub proposed_name: String,
    /// Name of the target when the suggestion was made. Accepting is refused
    /// once the user has renamed the node in the meantime.
    pub original_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub source: SuggestionSource,
    pub status: SuggestionStatus,
    pub created_at: DateTime<Utc>,
}

impl Suggestion {
    pub fn proposed(
        target: NodeRef,
        original_name: impl Into<String>,
        proposed_name: impl Into<String>,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: SuggestionId::new(),
            target,
            proposed_name: proposed_name.into(),
            original_name: original_name.into(),
            reason,
            source: SuggestionSource::GenerativeText,
            status: SuggestionStatus::Proposed,
            created_at: Utc::now(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == SuggestionStatus::Proposed
    }
}
