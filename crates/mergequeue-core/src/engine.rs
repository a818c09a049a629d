//! Cross-train coordination (spec §4 top-level operations, §5).
//!
//! A `Train` only knows about its own `(repo, branch)`; anything that must
//! look across trains of the same installation — evicting a PR re-embarked
//! on a different target branch, or force-removing a PR everywhere — lives
//! here instead.

use crate::embarked_pull::{PrNumber, QueueConfig, QueueRule, Sha};
use crate::error::Result;
use crate::host_api::HostApi;
use crate::persistence::PersistenceAdapter;
use crate::rule_evaluator::QueueRuleEvaluator;
use crate::signal::RefreshSignal;
use crate::train::{Train, TrainContext};
use crate::unexpected_change::UnexpectedChange;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Wires a persistence backend, the host capability, and the rule evaluator
/// together into the operations spec §4 exposes at the top level.
pub struct MergeQueueEngine {
    persistence: Arc<dyn PersistenceAdapter>,
    host: Arc<dyn HostApi>,
    evaluator: Arc<dyn QueueRuleEvaluator>,
}

impl MergeQueueEngine {
    pub fn new(
        persistence: Arc<dyn PersistenceAdapter>,
        host: Arc<dyn HostApi>,
        evaluator: Arc<dyn QueueRuleEvaluator>,
    ) -> Self {
        Self {
            persistence,
            host,
            evaluator,
        }
    }

    fn ctx<'a>(&'a self, owner: &'a str, repo: &'a str) -> TrainContext<'a> {
        TrainContext {
            host: self.host.as_ref(),
            evaluator: self.evaluator.as_ref(),
            owner,
            repo,
        }
    }

    async fn load_or_new(
        &self,
        installation_owner_id: i64,
        repo_id: i64,
        target_ref: &str,
    ) -> Result<Train> {
        Ok(self
            .persistence
            .load(repo_id, target_ref)
            .await?
            .unwrap_or_else(|| Train::new(installation_owner_id, repo_id, target_ref)))
    }

    /// Spec §3.3: a train is erased from the store once both its cars and
    /// waiting list are empty, rather than persisted as a tombstone.
    async fn save_or_delete(&self, train: &Train) -> Result<()> {
        if train.is_empty() {
            self.persistence.delete(train.repo_id, &train.target_ref).await
        } else {
            self.persistence.save(train).await
        }
    }

    /// Spec §4.1 `add_pull` step 1: evicts `pr_number` from every other
    /// branch's train for this installation before embarking it on
    /// `target_ref` (a PR can only be queued on one branch at a time).
    pub async fn add_pull(
        &self,
        installation_owner_id: i64,
        repo_id: i64,
        owner: &str,
        repo: &str,
        target_ref: &str,
        pr_number: PrNumber,
        config: QueueConfig,
        queued_at: DateTime<Utc>,
    ) -> Result<Vec<RefreshSignal>> {
        let mut signals = Vec::new();
        for mut sibling in self.persistence.list_for_installation(installation_owner_id).await? {
            if sibling.target_ref == target_ref || sibling.repo_id != repo_id {
                continue;
            }
            if sibling.find_embarked_pull(pr_number).is_some() {
                let ctx = self.ctx(owner, repo);
                signals.extend(sibling.remove_pull(&ctx, pr_number, None).await?);
                self.save_or_delete(&sibling).await?;
            }
        }

        let mut train = self.load_or_new(installation_owner_id, repo_id, target_ref).await?;
        let ctx = self.ctx(owner, repo);
        signals.extend(train.add_pull(&ctx, pr_number, config, queued_at).await?);
        self.save_or_delete(&train).await?;
        Ok(signals)
    }

    /// Spec §4.1 `remove_pull`.
    pub async fn remove_pull(
        &self,
        repo_id: i64,
        owner: &str,
        repo: &str,
        target_ref: &str,
        pr_number: PrNumber,
        merge_commit_sha: Option<Sha>,
    ) -> Result<Vec<RefreshSignal>> {
        let Some(mut train) = self.persistence.load(repo_id, target_ref).await? else {
            return Ok(Vec::new());
        };
        let ctx = self.ctx(owner, repo);
        let signals = train.remove_pull(&ctx, pr_number, merge_commit_sha).await?;
        self.save_or_delete(&train).await?;
        Ok(signals)
    }

    /// Removes `pr_number` from every train of the installation except
    /// `exclude_ref` (spec §4 supplemented force-removal operation, used
    /// when a PR is closed without merging).
    pub async fn force_remove_pull(
        &self,
        installation_owner_id: i64,
        repo_id: i64,
        owner: &str,
        repo: &str,
        pr_number: PrNumber,
        exclude_ref: Option<&str>,
    ) -> Result<Vec<RefreshSignal>> {
        let mut signals = Vec::new();
        for mut train in self.persistence.list_for_installation(installation_owner_id).await? {
            if train.repo_id != repo_id || Some(train.target_ref.as_str()) == exclude_ref {
                continue;
            }
            if train.find_embarked_pull(pr_number).is_some() {
                let ctx = self.ctx(owner, repo);
                signals.extend(train.remove_pull(&ctx, pr_number, None).await?);
                self.save_or_delete(&train).await?;
            }
        }
        Ok(signals)
    }

    /// Spec §4.1.2 `refresh`.
    pub async fn refresh(
        &self,
        repo_id: i64,
        owner: &str,
        repo: &str,
        target_ref: &str,
        queue_rules: &HashMap<String, QueueRule>,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshSignal>> {
        let Some(mut train) = self.persistence.load(repo_id, target_ref).await? else {
            return Ok(Vec::new());
        };
        let ctx = self.ctx(owner, repo);
        let report = train.refresh(&ctx, queue_rules, now).await?;
        self.save_or_delete(&train).await?;
        Ok(report.signals)
    }

    /// Spec §4.1 `reset`, triggered by an externally-detected unexpected change.
    pub async fn reset(
        &self,
        repo_id: i64,
        owner: &str,
        repo: &str,
        target_ref: &str,
        change: UnexpectedChange,
    ) -> Result<Vec<RefreshSignal>> {
        let Some(mut train) = self.persistence.load(repo_id, target_ref).await? else {
            return Ok(Vec::new());
        };
        let ctx = self.ctx(owner, repo);
        let signals = train.reset(&ctx, change).await?;
        self.save_or_delete(&train).await?;
        Ok(signals)
    }

    /// `(cars, waiting pulls)` for one train, for the surrounding engine's
    /// size gauges; `None` if the train has no persisted state.
    pub async fn train_size(&self, repo_id: i64, target_ref: &str) -> Result<Option<(usize, usize)>> {
        Ok(self
            .persistence
            .load(repo_id, target_ref)
            .await?
            .map(|train| (train.cars.len(), train.waiting_pulls.len())))
    }
}
