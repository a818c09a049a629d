//! The `HostAPI` capability contract (spec §1, §6.1).
//!
//! The core consumes this trait; it never talks to the hosting platform
//! directly. A concrete implementation (reqwest-backed, over the platform's
//! REST API) lives in a sibling crate.

use crate::embarked_pull::{PrNumber, Sha};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A view of a pull request as reported by the host (spec §6.1 `GET .../pulls/{n}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullView {
    pub number: PrNumber,
    pub state: String,
    pub merged: bool,
    pub merge_commit_sha: Option<Sha>,
    pub mergeable: Option<bool>,
    pub html_url: String,
    pub title: String,
    pub body: Option<String>,
    pub base_ref: String,
    pub head_ref: String,
    pub head_sha: Sha,
}

/// Parameters for `POST /repos/{owner}/{repo}/pulls` (spec §6.1).
#[derive(Debug, Clone)]
pub struct OpenPullRequest {
    pub title: String,
    pub body: String,
    pub base: String,
    pub head: String,
    pub draft: bool,
    /// Impersonates a configured bot account when set (spec §6.1).
    pub oauth_token: Option<String>,
}

/// One check or status snapshot, as rendered into the user-facing summary
/// (spec §4.2.4, §6.3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckSnapshot {
    pub name: String,
    pub conclusion: Option<String>,
    pub status: String,
}

/// Parameters for `POST .../check-runs` posting the "Merge queue summary"
/// check (spec §4.2.5, §6.3).
#[derive(Debug, Clone)]
pub struct CheckRunUpdate {
    pub name: String,
    pub conclusion: Option<String>,
    pub status: String,
    pub summary_title: String,
    pub summary_body: String,
}

/// Typed operations the core needs from the hosting platform (spec §1, §6.1).
/// Bit-exact request payloads are the concrete implementation's
/// responsibility; this trait only fixes the semantics and error taxonomy
/// (spec §7) the core reacts to.
#[async_trait]
pub trait HostApi: Send + Sync {
    /// `POST /repos/{owner}/{repo}/git/refs` — create synthetic branch.
    /// Must surface `Error::ReferenceAlreadyExists` on 422 "Reference already exists".
    async fn create_ref(&self, owner: &str, repo: &str, name: &str, sha: &Sha) -> Result<()>;

    /// `POST /repos/{owner}/{repo}/merges` — layer a PR into the synthetic branch.
    /// Must surface `Error::BaseDoesNotExist` / `Error::MergeConflict` / `Error::HostPermissionDenied`
    /// as distinguished variants (spec §4.2.2).
    async fn merge_into_ref(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        head: &str,
        commit_message: &str,
    ) -> Result<Sha>;

    /// `DELETE /repos/{owner}/{repo}/git/refs/heads/<name>`, tolerating 404 and
    /// 422 "Reference does not exist".
    async fn delete_ref(&self, owner: &str, repo: &str, name: &str) -> Result<()>;

    /// `POST /repos/{owner}/{repo}/pulls` — open the synthetic draft PR.
    async fn open_pull(&self, owner: &str, repo: &str, req: OpenPullRequest) -> Result<PrNumber>;

    /// `PATCH /repos/{owner}/{repo}/pulls/{n}` body `{state: "closed"}`.
    async fn close_pull(&self, owner: &str, repo: &str, number: PrNumber) -> Result<()>;

    /// `PATCH /repos/{owner}/{repo}/pulls/{n}` body `{body}`.
    async fn patch_pull_body(
        &self,
        owner: &str,
        repo: &str,
        number: PrNumber,
        body: &str,
    ) -> Result<()>;

    /// `POST /repos/{owner}/{repo}/issues/{n}/comments` body `{body}`.
    async fn post_comment(&self, owner: &str, repo: &str, number: PrNumber, body: &str) -> Result<()>;

    /// `GET /repos/{owner}/{repo}/branches/<ref>` → commit SHA.
    async fn get_branch_head_sha(&self, owner: &str, repo: &str, branch: &str) -> Result<Sha>;

    /// `GET /repos/{owner}/{repo}/pulls/{n}` → PR view.
    async fn get_pull(&self, owner: &str, repo: &str, number: PrNumber) -> Result<PullView>;

    /// Checks on a PR, excluding the platform-integration's own checks (spec §4.2.4).
    async fn list_checks(&self, owner: &str, repo: &str, number: PrNumber) -> Result<Vec<CheckSnapshot>>;

    /// Commit statuses on a PR (legacy status API, merged into the same snapshot shape).
    async fn list_statuses(&self, owner: &str, repo: &str, number: PrNumber) -> Result<Vec<CheckSnapshot>>;

    /// Posts the "Merge queue summary" check run.
    async fn post_check_run(
        &self,
        owner: &str,
        repo: &str,
        number: PrNumber,
        update: CheckRunUpdate,
    ) -> Result<()>;

    /// In-place check path (spec §4.2.2): updates a PR's head branch against
    /// its base. Returns `false` if the branch was already up to date and no
    /// update was triggered.
    async fn update_pull_branch(&self, owner: &str, repo: &str, number: PrNumber) -> Result<bool>;

    /// Grounded in `merge_train.py::is_behind`: true iff `branch`'s current
    /// head is not a descendant of `target_sha`.
    async fn is_branch_behind(&self, owner: &str, repo: &str, branch: &str, target_sha: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_snapshot_equality_ignores_nothing() {
        let a = CheckSnapshot {
            name: "ci".into(),
            conclusion: Some("success".into()),
            status: "completed".into(),
        };
        let b = a.clone();
        assert_eq!(a, b);
    }
}
