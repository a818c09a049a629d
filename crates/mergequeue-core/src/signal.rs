//! Refresh signals emitted after a train mutation (spec §5, §6.4).

use crate::embarked_pull::PrNumber;
use serde::{Deserialize, Serialize};

/// Who/what triggered the refresh that produced this signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshAction {
    Internal,
    User,
    Admin,
}

/// Emitted after `save()` returns so any reader sees the post-event state
/// (spec §5 "Ordering guarantees").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSignal {
    pub repo_id: i64,
    pub pr_number: PrNumber,
    pub action: RefreshAction,
    pub source: String,
}

impl RefreshSignal {
    pub fn new(repo_id: i64, pr_number: PrNumber, action: RefreshAction, source: impl Into<String>) -> Self {
        Self {
            repo_id,
            pr_number,
            action,
            source: source.into(),
        }
    }
}
