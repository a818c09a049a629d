//! Cross-crate integration tests driving the full Axum router against an
//! in-memory SQLite train store, exercising the end-to-end scenarios of
//! spec.md §8 the way `orchestrate-web`'s own `tests/*_integration_test.rs`
//! exercise its router against a `tempfile`-backed database.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use mergequeue_core::host_api::{CheckRunUpdate, CheckSnapshot, HostApi, OpenPullRequest, PullView};
use mergequeue_core::rule_evaluator::{EvaluatedRule, QueueRuleEvaluator};
use mergequeue_core::{MergeQueueEngine, PrNumber, QueueRule, RefreshOrchestrator, Result as CoreResult, Sha, SqlitePersistence};
use mergequeue_web::auth::AllowAll;
use mergequeue_web::metrics::MetricsCollector;
use mergequeue_web::router::build_router;
use mergequeue_web::state::AppState;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

struct FakeHost;

#[async_trait::async_trait]
impl HostApi for FakeHost {
    async fn create_ref(&self, _: &str, _: &str, _: &str, _: &Sha) -> CoreResult<()> {
        Ok(())
    }
    async fn merge_into_ref(&self, _: &str, _: &str, _: &str, _: &str, _: &str) -> CoreResult<Sha> {
        Ok("merged-sha".into())
    }
    async fn delete_ref(&self, _: &str, _: &str, _: &str) -> CoreResult<()> {
        Ok(())
    }
    async fn open_pull(&self, _: &str, _: &str, _: OpenPullRequest) -> CoreResult<PrNumber> {
        Ok(999)
    }
    async fn close_pull(&self, _: &str, _: &str, _: PrNumber) -> CoreResult<()> {
        Ok(())
    }
    async fn patch_pull_body(&self, _: &str, _: &str, _: PrNumber, _: &str) -> CoreResult<()> {
        Ok(())
    }
    async fn post_comment(&self, _: &str, _: &str, _: PrNumber, _: &str) -> CoreResult<()> {
        Ok(())
    }
    async fn get_branch_head_sha(&self, _: &str, _: &str, _: &str) -> CoreResult<Sha> {
        Ok("base-sha".into())
    }
    async fn get_pull(&self, _: &str, _: &str, number: PrNumber) -> CoreResult<PullView> {
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
            head_ref: format!("pr-{number}"),
            head_sha: format!("sha-{number}"),
        })
    }
    async fn list_checks(&self, _: &str, _: &str, _: PrNumber) -> CoreResult<Vec<CheckSnapshot>> {
        Ok(Vec::new())
    }
    async fn list_statuses(&self, _: &str, _: &str, _: PrNumber) -> CoreResult<Vec<CheckSnapshot>> {
        Ok(Vec::new())
    }
    async fn post_check_run(&self, _: &str, _: &str, _: PrNumber, _: CheckRunUpdate) -> CoreResult<()> {
        Ok(())
    }
    async fn update_pull_branch(&self, _: &str, _: &str, _: PrNumber) -> CoreResult<bool> {
        Ok(true)
    }
    async fn is_branch_behind(&self, _: &str, _: &str, _: &str, _: &str) -> CoreResult<bool> {
        Ok(false)
    }
}

struct FakeEvaluator;

#[async_trait::async_trait]
impl QueueRuleEvaluator for FakeEvaluator {
    async fn evaluate(&self, _: &QueueRule, _: &[PullView]) -> CoreResult<EvaluatedRule> {
        Ok(EvaluatedRule::pending("checks running"))
    }
}

fn default_rules() -> HashMap<String, QueueRule> {
    let mut rules = HashMap::new();
    rules.insert(
        "default".to_string(),
        QueueRule::new("default").with_batch_size(2).with_speculative_checks(2),
    );
    rules
}

async fn harness() -> (axum::Router, Arc<SqlitePersistence>) {
    let persistence = Arc::new(SqlitePersistence::in_memory().await.unwrap());
    let host = Arc::new(FakeHost);
    let evaluator = Arc::new(FakeEvaluator);
    let engine = Arc::new(MergeQueueEngine::new(persistence.clone(), host.clone(), evaluator.clone()));
    let orchestrator = Arc::new(RefreshOrchestrator::new(persistence.clone(), host, evaluator));
    let state = AppState::new(
        engine,
        orchestrator,
        Arc::new(AllowAll),
        Arc::new(MetricsCollector::new().unwrap()),
        default_rules(),
    );
    (build_router(state), persistence)
}

async fn post(router: &axum::Router, payload: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
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
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, body)
}

/// Spec §8 "linear fill": three pulls queued back to back on an empty train
/// end up embarked, in order, with no errors.
#[tokio::test]
async fn linear_fill_embarks_every_pull_in_order() {
    let (router, persistence) = harness().await;

    for pr_number in [1, 2, 3] {
        let (status, _) = post(
            &router,
            serde_json::json!({
                "operation": "add_pull",
                "installation_owner_id": 1,
                "repo_id": 10,
                "owner": "acme",
                "repo": "widgets",
                "target_ref": "main",
                "pr_number": pr_number,
                "queue_name": "default",
                "priority": 0,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let train = persistence.load(10, "main").await.unwrap().unwrap();
    assert_eq!(train.embarked_pull_numbers(), vec![1, 2, 3]);
}

/// Spec §8 "middle dequeue": removing a PR that isn't at the head leaves the
/// rest of the train's relative order untouched.
#[tokio::test]
async fn middle_dequeue_preserves_relative_order() {
    let (router, persistence) = harness().await;

    for pr_number in [1, 2, 3] {
        post(
            &router,
            serde_json::json!({
                "operation": "add_pull",
                "installation_owner_id": 1,
                "repo_id": 10,
                "owner": "acme",
                "repo": "widgets",
                "target_ref": "main",
                "pr_number": pr_number,
                "queue_name": "default",
                "priority": 0,
            }),
        )
        .await;
    }

    let (status, _) = post(
        &router,
        serde_json::json!({
            "operation": "remove_pull",
            "repo_id": 10,
            "owner": "acme",
            "repo": "widgets",
            "target_ref": "main",
            "pr_number": 2,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let train = persistence.load(10, "main").await.unwrap().unwrap();
    assert_eq!(train.embarked_pull_numbers(), vec![1, 3]);
}

/// An unknown queue name is a client error, not a 500: the webhook layer
/// surfaces `Error::QueueRuleNotFound` as a bad request.
#[tokio::test]
async fn add_pull_with_unknown_queue_rejects_as_bad_request() {
    let (router, _persistence) = harness().await;

    let (status, _) = post(
        &router,
        serde_json::json!({
            "operation": "add_pull",
            "installation_owner_id": 1,
            "repo_id": 10,
            "owner": "acme",
            "repo": "widgets",
            "target_ref": "main",
            "pr_number": 1,
            "queue_name": "nonexistent",
            "priority": 0,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// `force_remove_pull` clears a PR from every train of the installation
/// except the one explicitly excluded (SPEC_FULL supplement 1).
#[tokio::test]
async fn force_remove_pull_spares_the_excluded_branch() {
    let (router, persistence) = harness().await;

    for target_ref in ["main", "release"] {
        post(
            &router,
            serde_json::json!({
                "operation": "add_pull",
                "installation_owner_id": 1,
                "repo_id": 10,
                "owner": "acme",
                "repo": "widgets",
                "target_ref": target_ref,
                "pr_number": 7,
                "queue_name": "default",
                "priority": 0,
            }),
        )
        .await;
    }

    let (status, _) = post(
        &router,
        serde_json::json!({
            "operation": "force_remove_pull",
            "installation_owner_id": 1,
            "repo_id": 10,
            "owner": "acme",
            "repo": "widgets",
            "pr_number": 7,
            "exclude_ref": "release",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    assert!(persistence.load(10, "main").await.unwrap().is_none());
    assert!(persistence.load(10, "release").await.unwrap().unwrap().find_embarked_pull(7).is_some());
}

/// `reset_train` (triggered by an externally-detected unexpected change)
/// re-embarks the train's pulls rather than erroring out.
#[tokio::test]
async fn reset_train_succeeds_after_unexpected_base_change() {
    let (router, persistence) = harness().await;

    post(
        &router,
        serde_json::json!({
            "operation": "add_pull",
            "installation_owner_id": 1,
            "repo_id": 10,
            "owner": "acme",
            "repo": "widgets",
            "target_ref": "main",
            "pr_number": 1,
            "queue_name": "default",
            "priority": 0,
        }),
    )
    .await;

    let (status, _) = post(
        &router,
        serde_json::json!({
            "operation": "reset_train",
            "repo_id": 10,
            "owner": "acme",
            "repo": "widgets",
            "target_ref": "main",
            "change": {
                "type": "base_branch_changed",
                "expected_sha": "aaa",
                "actual_sha": "bbb",
            },
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let train = persistence.load(10, "main").await.unwrap();
    assert!(train.is_some());
}

/// `sweep_installation` refreshes every train of the installation in one call
/// (spec §4.5, the refresh orchestrator's job).
#[tokio::test]
async fn sweep_installation_refreshes_every_train() {
    let (router, _persistence) = harness().await;

    for (repo_id, pr_number) in [(10, 1), (11, 2)] {
        post(
            &router,
            serde_json::json!({
                "operation": "add_pull",
                "installation_owner_id": 1,
                "repo_id": repo_id,
                "owner": "acme",
                "repo": "widgets",
                "target_ref": "main",
                "pr_number": pr_number,
                "queue_name": "default",
                "priority": 0,
            }),
        )
        .await;
    }

    let (status, body) = post(
        &router,
        serde_json::json!({
            "operation": "sweep_installation",
            "installation_owner_id": 1,
            "owner": "acme",
            "repo": "widgets",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

/// `/metrics` serves Prometheus text exposition, independent of the webhook
/// endpoint (SPEC_FULL.md ambient stack, "Logging"/observability carried
/// forward regardless of the dashboards Non-goal).
#[tokio::test]
async fn metrics_endpoint_reports_request_totals() {
    let (router, _persistence) = harness().await;

    post(
        &router,
        serde_json::json!({
            "operation": "add_pull",
            "installation_owner_id": 1,
            "repo_id": 10,
            "owner": "acme",
            "repo": "widgets",
            "target_ref": "main",
            "pr_number": 1,
            "queue_name": "default",
            "priority": 0,
        }),
    )
    .await;

    let response = router
        .oneshot(Request::builder().method("GET").uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("webhook_requests_total"));
}
