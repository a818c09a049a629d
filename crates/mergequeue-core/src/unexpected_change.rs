//! Sum type for externally-detected mutations that force a train `reset`
//! (spec §7 kind 5, §9 "External mutation detection").
//!
//! Detection lives in the surrounding engine (it requires webhook payload
//! inspection); the core only needs enough data to render the banner and
//! slice the train.

use crate::embarked_pull::{PrNumber, Sha};

#[derive(Debug, Clone)]
pub enum UnexpectedChange {
    /// The target branch moved to a SHA the train did not expect.
    BaseBranchChanged { expected_sha: Sha, actual_sha: Sha },
    /// A draft PR backing an in-flight car was edited outside the engine.
    DraftPrManuallyEdited { pr_number: PrNumber },
    /// An in-place-updated PR was pushed to outside the engine.
    UpdatedPrManuallyPushed { pr_number: PrNumber, sha: Sha },
}

impl UnexpectedChange {
    /// Human-readable banner prepended to the next summary (spec §6.3, §7 kind 5).
    pub fn banner(&self) -> String {
        match self {
            UnexpectedChange::BaseBranchChanged {
                expected_sha,
                actual_sha,
            } => format!(
                "The target branch was unexpectedly updated from `{expected_sha}` to `{actual_sha}`. \
                 This PR has been re-embarked soon."
            ),
            UnexpectedChange::DraftPrManuallyEdited { pr_number } => format!(
                "The merge queue's internal draft pull request #{pr_number} was manually edited. \
                 This PR has been re-embarked soon."
            ),
            UnexpectedChange::UpdatedPrManuallyPushed { pr_number, sha } => format!(
                "Pull request #{pr_number} was manually pushed to `{sha}` while being checked in place. \
                 This PR has been re-embarked soon."
            ),
        }
    }
}
