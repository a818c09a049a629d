//! `reqwest`-based `HostApi` issuing the bit-exact payloads of spec §6.1.

use crate::error::{from_response, from_transport};
use async_trait::async_trait;
use mergequeue_core::host_api::{CheckRunUpdate, CheckSnapshot, HostApi, OpenPullRequest, PullView};
use mergequeue_core::train_car::SUMMARY_CHECK_NAME;
use mergequeue_core::{Error, PrNumber, Result, RetryPolicy, Sha};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// A GitHub-shaped host, addressed relative to `base_url` (normally
/// `https://api.github.com`, overridable in tests against a mock server).
pub struct GitHubHost {
    client: Client,
    base_url: String,
    token: String,
}

impl GitHubHost {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, "https://api.github.com".to_string())
    }

    pub fn with_base_url(token: impl Into<String>, base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str, token: Option<&str>) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .bearer_auth(token.unwrap_or(&self.token))
            .header("accept", "application/vnd.github+json")
            .header("user-agent", "mergequeue")
    }

    fn retry_after(resp: &Response) -> Option<Duration> {
        resp.headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    async fn error_for(resp: Response) -> Error {
        let status = resp.status();
        let retry_after = Self::retry_after(&resp);
        let body = resp.text().await.unwrap_or_default();
        from_response(status, &body, retry_after)
    }

    /// Sends `builder`, classifying a non-2xx response through spec §7's
    /// taxonomy. Callers retry via `RetryPolicy::run_host_api`.
    async fn send(builder: reqwest::RequestBuilder) -> Result<Response> {
        let resp = builder.send().await.map_err(from_transport)?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(Self::error_for(resp).await)
        }
    }

    async fn send_json(builder: reqwest::RequestBuilder) -> Result<Value> {
        let resp = Self::send(builder).await?;
        resp.json::<Value>().await.map_err(from_transport)
    }
}

#[derive(Deserialize)]
struct BranchView {
    commit: CommitRef,
}

#[derive(Deserialize)]
struct CommitRef {
    sha: Sha,
}

#[derive(Deserialize)]
struct PullResponse {
    number: PrNumber,
    state: String,
    merged: bool,
    merge_commit_sha: Option<Sha>,
    mergeable: Option<bool>,
    html_url: String,
    title: String,
    body: Option<String>,
    base: RefView,
    head: RefView,
}

#[derive(Deserialize)]
struct RefView {
    #[serde(rename = "ref")]
    ref_name: String,
    sha: Sha,
}

impl From<PullResponse> for PullView {
    fn from(p: PullResponse) -> Self {
        PullView {
            number: p.number,
            state: p.state,
            merged: p.merged,
            merge_commit_sha: p.merge_commit_sha,
            mergeable: p.mergeable,
            html_url: p.html_url,
            title: p.title,
            body: p.body,
            base_ref: p.base.ref_name,
            head_ref: p.head.ref_name,
            head_sha: p.head.sha,
        }
    }
}

#[derive(Deserialize)]
struct CheckRunsResponse {
    check_runs: Vec<CheckRunEntry>,
}

#[derive(Deserialize)]
struct CheckRunEntry {
    name: String,
    conclusion: Option<String>,
    status: String,
}

#[derive(Deserialize)]
struct StatusEntry {
    context: String,
    state: String,
}

#[async_trait]
impl HostApi for GitHubHost {
    async fn create_ref(&self, owner: &str, repo: &str, name: &str, sha: &Sha) -> Result<()> {
        debug!(owner, repo, name, sha, "creating ref");
        RetryPolicy::run_host_api(|| async {
            let body = json!({"ref": format!("refs/heads/{name}"), "sha": sha});
            Self::send(
                self.request(Method::POST, &format!("/repos/{owner}/{repo}/git/refs"), None)
                    .json(&body),
            )
            .await?;
            Ok(())
        })
        .await
    }

    async fn merge_into_ref(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        head: &str,
        commit_message: &str,
    ) -> Result<Sha> {
        debug!(owner, repo, base, head, "merging into ref");
        RetryPolicy::run_host_api(|| async {
            let body = json!({
                "base": base,
                "head": head,
                "commit_message": commit_message,
            });
            let value = Self::send_json(
                self.request(Method::POST, &format!("/repos/{owner}/{repo}/merges"), None)
                    .json(&body),
            )
            .await?;
            value
                .get("sha")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::Other("merge response missing sha".into()))
        })
        .await
    }

    async fn delete_ref(&self, owner: &str, repo: &str, name: &str) -> Result<()> {
        debug!(owner, repo, name, "deleting ref");
        RetryPolicy::run_host_api(|| async {
            let path = format!(
                "/repos/{owner}/{repo}/git/refs/heads/{}",
                urlencoding::encode(name)
            );
            let resp = self
                .request(Method::DELETE, &path, None)
                .send()
                .await
                .map_err(from_transport)?;
            match resp.status() {
                StatusCode::NOT_FOUND => Ok(()),
                StatusCode::UNPROCESSABLE_ENTITY => {
                    let body = resp.text().await.unwrap_or_default();
                    if body.to_ascii_lowercase().contains("reference does not exist") {
                        Ok(())
                    } else {
                        Err(from_response(StatusCode::UNPROCESSABLE_ENTITY, &body, None))
                    }
                }
                s if s.is_success() => Ok(()),
                s => Err(Self::error_for_status(resp, s).await),
            }
        })
        .await
    }

    async fn open_pull(&self, owner: &str, repo: &str, req: OpenPullRequest) -> Result<PrNumber> {
        RetryPolicy::run_host_api(|| async {
            let body = json!({
                "title": req.title,
                "body": req.body,
                "base": req.base,
                "head": req.head,
                "draft": req.draft,
            });
            let value = Self::send_json(
                self.request(
                    Method::POST,
                    &format!("/repos/{owner}/{repo}/pulls"),
                    req.oauth_token.as_deref(),
                )
                .json(&body),
            )
            .await?;
            value
                .get("number")
                .and_then(Value::as_i64)
                .ok_or_else(|| Error::Other("pull response missing number".into()))
        })
        .await
    }

    async fn close_pull(&self, owner: &str, repo: &str, number: PrNumber) -> Result<()> {
        RetryPolicy::run_host_api(|| async {
            let body = json!({"state": "closed"});
            Self::send(
                self.request(Method::PATCH, &format!("/repos/{owner}/{repo}/pulls/{number}"), None)
                    .json(&body),
            )
            .await?;
            Ok(())
        })
        .await
    }

    async fn patch_pull_body(&self, owner: &str, repo: &str, number: PrNumber, body: &str) -> Result<()> {
        RetryPolicy::run_host_api(|| async {
            let payload = json!({"body": body});
            Self::send(
                self.request(Method::PATCH, &format!("/repos/{owner}/{repo}/pulls/{number}"), None)
                    .json(&payload),
            )
            .await?;
            Ok(())
        })
        .await
    }

    async fn post_comment(&self, owner: &str, repo: &str, number: PrNumber, body: &str) -> Result<()> {
        RetryPolicy::run_host_api(|| async {
            let payload = json!({"body": body});
            Self::send(
                self.request(
                    Method::POST,
                    &format!("/repos/{owner}/{repo}/issues/{number}/comments"),
                    None,
                )
                .json(&payload),
            )
            .await?;
            Ok(())
        })
        .await
    }

    async fn get_branch_head_sha(&self, owner: &str, repo: &str, branch: &str) -> Result<Sha> {
        RetryPolicy::run_host_api(|| async {
            let path = format!(
                "/repos/{owner}/{repo}/branches/{}",
                urlencoding::encode(branch)
            );
            let value = Self::send_json(self.request(Method::GET, &path, None)).await?;
            let view: BranchView = serde_json::from_value(value)?;
            Ok(view.commit.sha)
        })
        .await
    }

    async fn get_pull(&self, owner: &str, repo: &str, number: PrNumber) -> Result<PullView> {
        RetryPolicy::run_host_api(|| async {
            let value = Self::send_json(
                self.request(Method::GET, &format!("/repos/{owner}/{repo}/pulls/{number}"), None),
            )
            .await?;
            let pull: PullResponse = serde_json::from_value(value)?;
            Ok(pull.into())
        })
        .await
    }

    async fn list_checks(&self, owner: &str, repo: &str, number: PrNumber) -> Result<Vec<CheckSnapshot>> {
        let head_sha = self.get_pull(owner, repo, number).await?.head_sha;
        RetryPolicy::run_host_api(|| async {
            let path = format!("/repos/{owner}/{repo}/commits/{head_sha}/check-runs");
            let value = Self::send_json(self.request(Method::GET, &path, None)).await?;
            let response: CheckRunsResponse = serde_json::from_value(value)?;
            Ok(response
                .check_runs
                .into_iter()
                .filter(|c| c.name != SUMMARY_CHECK_NAME)
                .map(|c| CheckSnapshot {
                    name: c.name,
                    conclusion: c.conclusion,
                    status: c.status,
                })
                .collect())
        })
        .await
    }

    async fn list_statuses(&self, owner: &str, repo: &str, number: PrNumber) -> Result<Vec<CheckSnapshot>> {
        let head_sha = self.get_pull(owner, repo, number).await?.head_sha;
        RetryPolicy::run_host_api(|| async {
            let path = format!("/repos/{owner}/{repo}/commits/{head_sha}/statuses");
            let value = Self::send_json(self.request(Method::GET, &path, None)).await?;
            let entries: Vec<StatusEntry> = serde_json::from_value(value)?;
            Ok(entries
                .into_iter()
                .map(|s| CheckSnapshot {
                    name: s.context,
                    conclusion: Some(s.state.clone()),
                    status: if s.state == "pending" {
                        "in_progress".to_string()
                    } else {
                        "completed".to_string()
                    },
                })
                .collect())
        })
        .await
    }

    async fn post_check_run(
        &self,
        owner: &str,
        repo: &str,
        number: PrNumber,
        update: CheckRunUpdate,
    ) -> Result<()> {
        let head_sha = self.get_pull(owner, repo, number).await?.head_sha;
        RetryPolicy::run_host_api(|| async {
            let body = json!({
                "name": update.name,
                "head_sha": head_sha,
                "status": update.status,
                "conclusion": update.conclusion,
                "output": {
                    "title": update.summary_title,
                    "summary": update.summary_body,
                },
            });
            Self::send(
                self.request(Method::POST, &format!("/repos/{owner}/{repo}/check-runs"), None)
                    .json(&body),
            )
            .await?;
            Ok(())
        })
        .await
    }

    async fn update_pull_branch(&self, owner: &str, repo: &str, number: PrNumber) -> Result<bool> {
        RetryPolicy::run_host_api(|| async {
            let path = format!("/repos/{owner}/{repo}/pulls/{number}/update-branch");
            let resp = self
                .request(Method::PUT, &path, None)
                .send()
                .await
                .map_err(from_transport)?;
            match resp.status() {
                StatusCode::ACCEPTED => Ok(true),
                StatusCode::UNPROCESSABLE_ENTITY => Ok(false),
                s if s.is_success() => Ok(true),
                s => Err(Self::error_for_status(resp, s).await),
            }
        })
        .await
    }

    async fn is_branch_behind(&self, owner: &str, repo: &str, branch: &str, target_sha: &str) -> Result<bool> {
        RetryPolicy::run_host_api(|| async {
            let path = format!("/repos/{owner}/{repo}/compare/{target_sha}...{branch}");
            let value = Self::send_json(self.request(Method::GET, &path, None)).await?;
            let status = value
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("identical");
            Ok(matches!(status, "behind" | "diverged"))
        })
        .await
    }
}

impl GitHubHost {
    async fn error_for_status(resp: Response, status: StatusCode) -> Error {
        let retry_after = Self::retry_after(&resp);
        let body = resp.text().await.unwrap_or_default();
        from_response(status, &body, retry_after)
    }
}
