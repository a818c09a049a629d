//! Turns an inbound webhook into a `Train` operation call. The surrounding
//! event-intake system (not this crate) decides which GitHub event maps to
//! which operation; this endpoint only executes the operation it's told to.

use crate::error::WebError;
use crate::state::AppState;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use mergequeue_core::embarked_pull::{PrNumber, QueueConfig, Sha, UpdateStrategy};
use mergequeue_core::signal::RefreshSignal;
use mergequeue_core::unexpected_change::UnexpectedChange;
use mergequeue_core::Error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnexpectedChangeWire {
    BaseBranchChanged { expected_sha: Sha, actual_sha: Sha },
    DraftPrManuallyEdited { pr_number: PrNumber },
    UpdatedPrManuallyPushed { pr_number: PrNumber, sha: Sha },
}

impl From<UnexpectedChangeWire> for UnexpectedChange {
    fn from(wire: UnexpectedChangeWire) -> Self {
        match wire {
            UnexpectedChangeWire::BaseBranchChanged {
                expected_sha,
                actual_sha,
            } => UnexpectedChange::BaseBranchChanged {
                expected_sha,
                actual_sha,
            },
            UnexpectedChangeWire::DraftPrManuallyEdited { pr_number } => {
                UnexpectedChange::DraftPrManuallyEdited { pr_number }
            }
            UnexpectedChangeWire::UpdatedPrManuallyPushed { pr_number, sha } => {
                UnexpectedChange::UpdatedPrManuallyPushed { pr_number, sha }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum WebhookOperation {
    AddPull {
        installation_owner_id: i64,
        repo_id: i64,
        owner: String,
        repo: String,
        target_ref: String,
        pr_number: PrNumber,
        queue_name: String,
        priority: i32,
        #[serde(default)]
        update_strategy: Option<UpdateStrategy>,
        #[serde(default)]
        bot_account: Option<String>,
    },
    RemovePull {
        repo_id: i64,
        owner: String,
        repo: String,
        target_ref: String,
        pr_number: PrNumber,
        #[serde(default)]
        merge_commit_sha: Option<Sha>,
    },
    ForceRemovePull {
        installation_owner_id: i64,
        repo_id: i64,
        owner: String,
        repo: String,
        pr_number: PrNumber,
        #[serde(default)]
        exclude_ref: Option<String>,
    },
    RefreshTrain {
        repo_id: i64,
        owner: String,
        repo: String,
        target_ref: String,
    },
    ResetTrain {
        repo_id: i64,
        owner: String,
        repo: String,
        target_ref: String,
        change: UnexpectedChangeWire,
    },
    SweepInstallation {
        installation_owner_id: i64,
        owner: String,
        repo: String,
    },
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    pub signals: Vec<RefreshSignal>,
}

impl WebhookOperation {
    /// Low-cardinality label for `mergequeue_webhook_requests_total`.
    fn name(&self) -> &'static str {
        match self {
            WebhookOperation::AddPull { .. } => "add_pull",
            WebhookOperation::RemovePull { .. } => "remove_pull",
            WebhookOperation::ForceRemovePull { .. } => "force_remove_pull",
            WebhookOperation::RefreshTrain { .. } => "refresh_train",
            WebhookOperation::ResetTrain { .. } => "reset_train",
            WebhookOperation::SweepInstallation { .. } => "sweep_installation",
        }
    }
}

/// Handles an inbound merge-queue operation request. Signature verification
/// happens first via `state.auth` — see `crate::auth::WebhookAuth`.
pub async fn merge_queue_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, WebError> {
    if !state.auth.verify(&headers, &body).await {
        warn!("webhook request failed authorization");
        return Err(WebError::Unauthorized);
    }

    let op: WebhookOperation =
        serde_json::from_slice(&body).map_err(|e| WebError::BadRequest(e.to_string()))?;
    let operation_name = op.name();
    let started_at = std::time::Instant::now();

    let result = dispatch(&state, op).await;
    let status = match &result {
        Ok(_) => StatusCode::OK.as_u16(),
        Err(err) => err.status_code().as_u16(),
    };
    state
        .metrics
        .record_webhook_request(operation_name, status, started_at.elapsed().as_secs_f64());

    let signals = result?;
    info!(signal_count = signals.len(), operation = operation_name, "processed merge-queue webhook");
    Ok(Json(WebhookResponse {
        status: "ok",
        signals,
    }))
}

async fn dispatch(state: &AppState, op: WebhookOperation) -> Result<Vec<RefreshSignal>, WebError> {
    match op {
        WebhookOperation::AddPull {
            installation_owner_id,
            repo_id,
            owner,
            repo,
            target_ref,
            pr_number,
            queue_name,
            priority,
            update_strategy,
            bot_account,
        } => {
            let rule = state
                .queue_rules
                .read()
                .await
                .get(&queue_name)
                .cloned()
                .ok_or_else(|| WebError::from(Error::QueueRuleNotFound(queue_name)))?;
            let mut config = QueueConfig::new(rule, priority);
            if let Some(strategy) = update_strategy {
                config = config.with_update_strategy(strategy);
            }
            if let Some(bot) = bot_account {
                config = config.with_bot_account(bot);
            }
            let signals = state
                .engine
                .add_pull(
                    installation_owner_id,
                    repo_id,
                    &owner,
                    &repo,
                    &target_ref,
                    pr_number,
                    config,
                    Utc::now(),
                )
                .await?;
            record_train_size(state, repo_id, &owner, &repo, &target_ref).await;
            Ok(signals)
        }
        WebhookOperation::RemovePull {
            repo_id,
            owner,
            repo,
            target_ref,
            pr_number,
            merge_commit_sha,
        } => Ok(state
            .engine
            .remove_pull(repo_id, &owner, &repo, &target_ref, pr_number, merge_commit_sha)
            .await?),
        WebhookOperation::ForceRemovePull {
            installation_owner_id,
            repo_id,
            owner,
            repo,
            pr_number,
            exclude_ref,
        } => Ok(state
            .engine
            .force_remove_pull(
                installation_owner_id,
                repo_id,
                &owner,
                &repo,
                pr_number,
                exclude_ref.as_deref(),
            )
            .await?),
        WebhookOperation::RefreshTrain {
            repo_id,
            owner,
            repo,
            target_ref,
        } => {
            let rules = state.queue_rules.read().await.clone();
            let signals = state
                .engine
                .refresh(repo_id, &owner, &repo, &target_ref, &rules, Utc::now())
                .await?;
            record_train_size(state, repo_id, &owner, &repo, &target_ref).await;
            Ok(signals)
        }
        WebhookOperation::ResetTrain {
            repo_id,
            owner,
            repo,
            target_ref,
            change,
        } => {
            let signals = state
                .engine
                .reset(repo_id, &owner, &repo, &target_ref, change.into())
                .await?;
            record_train_size(state, repo_id, &owner, &repo, &target_ref).await;
            Ok(signals)
        }
        WebhookOperation::SweepInstallation {
            installation_owner_id,
            owner,
            repo,
        } => {
            let rules = state.queue_rules.read().await.clone();
            let report = state
                .orchestrator
                .refresh_trains(installation_owner_id, &owner, &repo, &rules, Utc::now())
                .await?;
            let repo_label = format!("{owner}/{repo}");
            for _ in 0..report.trains_refreshed {
                state.metrics.record_train_refreshed(&repo_label);
            }
            Ok(report.signals)
        }
    }
}

/// Refreshes the `mergequeue_train_cars`/`mergequeue_train_waiting_pulls`
/// gauges for one train after an operation that may have changed its size.
/// Best-effort: a lookup failure here shouldn't fail the request that
/// already succeeded.
async fn record_train_size(state: &AppState, repo_id: i64, owner: &str, repo: &str, target_ref: &str) {
    if let Ok(Some((cars, waiting))) = state.engine.train_size(repo_id, target_ref).await {
        let repo_label = format!("{owner}/{repo}");
        state.metrics.set_train_cars(&repo_label, target_ref, cars);
        state.metrics.set_train_waiting_pulls(&repo_label, target_ref, waiting);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AllowAll;
    use crate::metrics::MetricsCollector;
    use crate::router::build_router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use mergequeue_core::host_api::{CheckRunUpdate, CheckSnapshot, HostApi, OpenPullRequest, PullView};
    use mergequeue_core::rule_evaluator::{EvaluatedRule, QueueRuleEvaluator};
    use mergequeue_core::{MergeQueueEngine, RefreshOrchestrator, SqlitePersistence};
    use std::collections::HashMap;
    use tower::ServiceExt;

    struct FakeHost;

    #[async_trait::async_trait]
    impl HostApi for FakeHost {
        async fn create_ref(&self, _: &str, _: &str, _: &str, _: &Sha) -> mergequeue_core::Result<()> {
            Ok(())
        }
        async fn merge_into_ref(&self, _: &str, _: &str, _: &str, _: &str, _: &str) -> mergequeue_core::Result<Sha> {
            Ok("merged".into())
        }
        async fn delete_ref(&self, _: &str, _: &str, _: &str) -> mergequeue_core::Result<()> {
            Ok(())
        }
        async fn open_pull(&self, _: &str, _: &str, _: OpenPullRequest) -> mergequeue_core::Result<PrNumber> {
            Ok(1)
        }
        async fn close_pull(&self, _: &str, _: &str, _: PrNumber) -> mergequeue_core::Result<()> {
            Ok(())
        }
        async fn patch_pull_body(&self, _: &str, _: &str, _: PrNumber, _: &str) -> mergequeue_core::Result<()> {
            Ok(())
        }
        async fn post_comment(&self, _: &str, _: &str, _: PrNumber, _: &str) -> mergequeue_core::Result<()> {
            Ok(())
        }
        async fn get_branch_head_sha(&self, _: &str, _: &str, _: &str) -> mergequeue_core::Result<Sha> {
            Ok("base".into())
        }
        async fn get_pull(&self, _: &str, _: &str, number: PrNumber) -> mergequeue_core::Result<PullView> {
            Ok(PullView {
                number,
                state: "open".into(),
                merged: false,
                merge_commit_sha: None,
                mergeable: Some(true),
                html_url: String::new(),
                title: String::new(),
                body: None,
                base_ref: "main".into(),
                head_ref: "head".into(),
                head_sha: "sha".into(),
            })
        }
        async fn list_checks(&self, _: &str, _: &str, _: PrNumber) -> mergequeue_core::Result<Vec<CheckSnapshot>> {
            Ok(Vec::new())
        }
        async fn list_statuses(&self, _: &str, _: &str, _: PrNumber) -> mergequeue_core::Result<Vec<CheckSnapshot>> {
            Ok(Vec::new())
        }
        async fn post_check_run(
            &self,
            _: &str,
            _: &str,
            _: PrNumber,
            _: CheckRunUpdate,
        ) -> mergequeue_core::Result<()> {
            Ok(())
        }
        async fn update_pull_branch(&self, _: &str, _: &str, _: PrNumber) -> mergequeue_core::Result<bool> {
            Ok(true)
        }
        async fn is_branch_behind(&self, _: &str, _: &str, _: &str, _: &str) -> mergequeue_core::Result<bool> {
            Ok(false)
        }
    }

    struct FakeEvaluator;

    #[async_trait::async_trait]
    impl QueueRuleEvaluator for FakeEvaluator {
        async fn evaluate(
            &self,
            _: &mergequeue_core::QueueRule,
            _: &[PullView],
        ) -> mergequeue_core::Result<EvaluatedRule> {
            Ok(EvaluatedRule::pending("checks running"))
        }
    }

    async fn test_state() -> AppState {
        let persistence = Arc::new(SqlitePersistence::in_memory().await.unwrap());
        let host = Arc::new(FakeHost);
        let evaluator = Arc::new(FakeEvaluator);
        let engine = Arc::new(MergeQueueEngine::new(persistence.clone(), host.clone(), evaluator.clone()));
        let orchestrator = Arc::new(RefreshOrchestrator::new(persistence, host, evaluator));
        let mut rules = HashMap::new();
        rules.insert(
            "five".to_string(),
            mergequeue_core::QueueRule::new("five").with_speculative_checks(5),
        );
        AppState::new(
            engine,
            orchestrator,
            Arc::new(AllowAll),
            Arc::new(MetricsCollector::new().unwrap()),
            rules,
        )
    }

    #[tokio::test]
    async fn add_pull_webhook_embarks_the_pr() {
        let state = test_state().await;
        let router = build_router(state);

        let payload = serde_json::json!({
            "operation": "add_pull",
            "installation_owner_id": 1,
            "repo_id": 10,
            "owner": "acme",
            "repo": "widgets",
            "target_ref": "main",
            "pr_number": 41,
            "queue_name": "five",
            "priority": 0,
        });

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/merge-queue")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn unknown_queue_name_returns_bad_request_status() {
        let state = test_state().await;
        let router = build_router(state);

        let payload = serde_json::json!({
            "operation": "add_pull",
            "installation_owner_id": 1,
            "repo_id": 10,
            "owner": "acme",
            "repo": "widgets",
            "target_ref": "main",
            "pr_number": 41,
            "queue_name": "does-not-exist",
            "priority": 0,
        });

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/merge-queue")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
