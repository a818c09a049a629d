//! Shared Axum router state.

use crate::auth::WebhookAuth;
use crate::metrics::MetricsCollector;
use mergequeue_core::{Error, MergeQueueEngine, QueueRule, RefreshOrchestrator, SqlitePersistence};
use mergequeue_github::GitHubHost;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MergeQueueEngine>,
    pub orchestrator: Arc<RefreshOrchestrator>,
    pub auth: Arc<dyn WebhookAuth>,
    pub metrics: Arc<MetricsCollector>,
    /// Live queue-rule configuration, reloadable without a restart the way
    /// `mergequeue-cli` reloads its `QueueRulesConfig` file.
    pub queue_rules: Arc<RwLock<HashMap<String, QueueRule>>>,
}

impl AppState {
    pub fn new(
        engine: Arc<MergeQueueEngine>,
        orchestrator: Arc<RefreshOrchestrator>,
        auth: Arc<dyn WebhookAuth>,
        metrics: Arc<MetricsCollector>,
        queue_rules: HashMap<String, QueueRule>,
    ) -> Self {
        Self {
            engine,
            orchestrator,
            auth,
            metrics,
            queue_rules: Arc::new(RwLock::new(queue_rules)),
        }
    }

    /// Wires the concrete GitHub `HostApi` and SQLite persistence together
    /// with the default mergeability-only evaluator (`HostApi` and
    /// `QueueRuleEvaluator` are contracts; this is one valid filling of both,
    /// the same one `mergequeue-cli` uses).
    pub async fn production(
        db_path: impl AsRef<Path>,
        github_token: impl Into<String>,
        auth: Arc<dyn WebhookAuth>,
        queue_rules: HashMap<String, QueueRule>,
    ) -> Result<Self, Error> {
        let persistence = Arc::new(SqlitePersistence::new(db_path).await?);
        let host = Arc::new(GitHubHost::new(github_token));
        let evaluator = Arc::new(mergequeue_github::MergeableConditionEvaluator);
        let engine = Arc::new(MergeQueueEngine::new(persistence.clone(), host.clone(), evaluator.clone()));
        let orchestrator = Arc::new(RefreshOrchestrator::new(persistence, host, evaluator));
        let metrics = Arc::new(MetricsCollector::new().map_err(|e| Error::Other(e.to_string()))?);
        Ok(Self::new(engine, orchestrator, auth, metrics, queue_rules))
    }
}
