//! `Train`: the ordered list of cars and waiting pulls for one `(repo, branch)` (spec §2 C3, §4.1).

use crate::embarked_pull::{EmbarkedPull, PrNumber, QueueConfig, QueueRule, Sha};
use crate::error::Result;
use crate::host_api::HostApi;
use crate::rule_evaluator::QueueRuleEvaluator;
use crate::signal::{RefreshAction, RefreshSignal};
use crate::train_car::{ChecksConclusion, CreationState, QueuePosition, StartOutcome, TrainCar};
use crate::unexpected_change::UnexpectedChange;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Bundles the external collaborators a train needs for one logical
/// operation, so methods don't thread four parameters individually.
pub struct TrainContext<'a> {
    pub host: &'a dyn HostApi,
    pub evaluator: &'a dyn QueueRuleEvaluator,
    pub owner: &'a str,
    pub repo: &'a str,
}

/// A delayed-refresh wake-up scheduled by batch selection (spec §4.1.4).
#[derive(Debug, Clone)]
pub struct DelayedRefresh {
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Train {
    pub installation_owner_id: i64,
    pub repo_id: i64,
    pub target_ref: String,
    pub cars: Vec<TrainCar>,
    pub waiting_pulls: Vec<EmbarkedPull>,
    pub current_base_sha: Option<Sha>,
}

impl Train {
    pub fn new(installation_owner_id: i64, repo_id: i64, target_ref: impl Into<String>) -> Self {
        Self {
            installation_owner_id,
            repo_id,
            target_ref: target_ref.into(),
            cars: Vec::new(),
            waiting_pulls: Vec::new(),
            current_base_sha: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cars.is_empty() && self.waiting_pulls.is_empty()
    }

    /// All PR numbers currently embarked, cars region then waiting region
    /// (spec SPEC_FULL supplement 4, grounded in `merge_train.py::get_pulls`).
    pub fn embarked_pull_numbers(&self) -> Vec<PrNumber> {
        self.logical_sequence().into_iter().map(|(_, p)| p.pr_number).collect()
    }

    /// Finds an embarked pull by number anywhere in the train (supplement 2,
    /// grounded in `merge_train.py::find_embarked_pull`).
    pub fn find_embarked_pull(&self, pr_number: PrNumber) -> Option<&EmbarkedPull> {
        self.logical_sequence()
            .into_iter()
            .find(|(_, p)| p.pr_number == pr_number)
            .map(|(_, p)| p)
    }

    /// True iff `pr_number` is the very first embarked pull in the train
    /// (supplement 3, grounded in `merge_train.py::is_first_pull`).
    pub fn is_first_pull(&self, pr_number: PrNumber) -> bool {
        self.logical_sequence()
            .first()
            .map(|(_, p)| p.pr_number == pr_number)
            .unwrap_or(false)
    }

    fn logical_sequence(&self) -> Vec<(Option<usize>, &EmbarkedPull)> {
        let mut seq = Vec::new();
        for (i, car) in self.cars.iter().enumerate() {
            for pull in &car.still_queued_embarked_pulls {
                seq.push((Some(i), pull));
            }
        }
        for pull in &self.waiting_pulls {
            seq.push((None, pull));
        }
        seq
    }

    fn cars_embarked_len(&self) -> usize {
        self.cars.iter().map(|c| c.still_queued_embarked_pulls.len()).sum()
    }

    fn refresh_signals_for_all(&self, source: &str) -> Vec<RefreshSignal> {
        self.embarked_pull_numbers()
            .into_iter()
            .map(|n| RefreshSignal::new(self.repo_id, n, RefreshAction::Internal, source))
            .collect()
    }

    /// Spec §4.1.5: true iff the train has no cars (nothing to desynchronize
    /// against), the base SHA matches the train's recorded base, or the SHA
    /// is the merge commit of the PR that was just merged at the head.
    pub fn is_synced_with_base(&self, sha: &str, just_merged_commit_sha: Option<&str>) -> bool {
        if self.cars.is_empty() {
            return true;
        }
        if self.current_base_sha.as_deref() == Some(sha) {
            return true;
        }
        just_merged_commit_sha == Some(sha)
    }

    // ---- 4.1 Train operations -------------------------------------------------

    /// Admits a PR (spec §4.1 `add_pull`, steps 2-6; step 1 — evicting the PR
    /// from every other branch's train — is a cross-train concern handled by
    /// the engine layer before this is called).
    pub async fn add_pull(
        &mut self,
        ctx: &TrainContext<'_>,
        pr_number: PrNumber,
        config: QueueConfig,
        queued_at: DateTime<Utc>,
    ) -> Result<Vec<RefreshSignal>> {
        if let Some(pos) = self.find_position(pr_number) {
            let existing = self.logical_sequence()[pos].1.clone();
            let differs = existing.queue_name() != config.queue_name
                || existing.effective_priority() != config.effective_priority;
            let interruptible = self.is_interruptible_at(pos, config.rule.allow_checks_interruption);
            if differs && interruptible {
                self.remove_embarked_at(ctx, pos, "re-embarked with a new configuration").await?;
            } else {
                return Ok(Vec::new());
            }
        }

        let best_position = self.find_best_position(&config);
        let pull = EmbarkedPull::new(pr_number, config, queued_at);
        let cars_len = self.cars_embarked_len();

        match best_position {
            Some(pos) if pos < cars_len => {
                self.slice(pos, ctx, "a higher-priority pull request was embarked").await?;
                self.waiting_pulls.insert(0, pull);
            }
            Some(pos) => {
                self.waiting_pulls.insert(pos - cars_len, pull);
            }
            None => self.waiting_pulls.push(pull),
        }

        Ok(self.refresh_signals_for_all("add_pull"))
    }

    fn find_position(&self, pr_number: PrNumber) -> Option<usize> {
        self.logical_sequence().iter().position(|(_, p)| p.pr_number == pr_number)
    }

    fn is_interruptible_at(&self, pos: usize, incoming_allows_interruption: bool) -> bool {
        match self.logical_sequence()[pos].0 {
            None => true,
            Some(car_idx) => {
                self.cars[car_idx].checks_conclusion == ChecksConclusion::Pending
                    && incoming_allows_interruption
            }
        }
    }

    fn find_best_position(&self, config: &QueueConfig) -> Option<usize> {
        let seq = self.logical_sequence();
        for pos in 0..seq.len() {
            if self.is_interruptible_at(pos, config.rule.allow_checks_interruption)
                && seq[pos].1.effective_priority() < config.effective_priority
            {
                return Some(pos);
            }
        }
        None
    }

    async fn remove_embarked_at(&mut self, ctx: &TrainContext<'_>, pos: usize, reason: &str) -> Result<()> {
        let cars_len = self.cars_embarked_len();
        if pos < cars_len {
            self.slice(pos, ctx, reason).await?;
        } else {
            self.waiting_pulls.remove(pos - cars_len);
        }
        Ok(())
    }

    /// Removes a PR from the train (spec §4.1 `remove_pull`).
    pub async fn remove_pull(
        &mut self,
        ctx: &TrainContext<'_>,
        pr_number: PrNumber,
        merge_commit_sha: Option<Sha>,
    ) -> Result<Vec<RefreshSignal>> {
        if let Some(sha) = &merge_commit_sha {
            let is_head_of_first_car = self
                .cars
                .first()
                .and_then(|c| c.still_queued_embarked_pulls.first())
                .map(|p| p.pr_number)
                == Some(pr_number);
            if is_head_of_first_car {
                let car = &mut self.cars[0];
                car.still_queued_embarked_pulls.remove(0);
                self.current_base_sha = Some(sha.clone());
                if car.still_queued_embarked_pulls.is_empty() {
                    let mut emptied = self.cars.remove(0);
                    emptied
                        .delete_pull(ctx.host, ctx.owner, ctx.repo, &self.target_ref, "merged")
                        .await?;
                }
                return Ok(self.refresh_signals_for_all("remove_pull:fast_path"));
            }
        }

        if let Some(pos) = self.find_position(pr_number) {
            self.slice(pos, ctx, "a pull request ahead in the queue was dequeued").await?;
            self.waiting_pulls.retain(|p| p.pr_number != pr_number);
        }
        Ok(self.refresh_signals_for_all("remove_pull:slow_path"))
    }

    /// Tears the train down to nothing because of an externally-detected
    /// unexpected change (spec §4.1 `reset`, §7 kind 5).
    pub async fn reset(&mut self, ctx: &TrainContext<'_>, change: UnexpectedChange) -> Result<Vec<RefreshSignal>> {
        self.slice(0, ctx, &change.banner()).await?;
        Ok(self.refresh_signals_for_all("reset"))
    }

    /// Spec §4.1.3: walks cars, tearing down the first car whose members
    /// straddle-or-follow `position` and every car after it; their
    /// still-queued pulls rejoin the front of `waiting_pulls`.
    async fn slice(&mut self, position: usize, ctx: &TrainContext<'_>, reason: &str) -> Result<()> {
        let mut cumulative = 0usize;
        let mut tear_from = self.cars.len();
        for (i, car) in self.cars.iter().enumerate() {
            let len = car.still_queued_embarked_pulls.len();
            if cumulative + len > position {
                tear_from = i;
                break;
            }
            cumulative += len;
        }

        let torn = self.cars.split_off(tear_from);
        let mut rollback = Vec::new();
        for mut car in torn {
            rollback.extend(car.still_queued_embarked_pulls.drain(..));
            car.delete_pull(ctx.host, ctx.owner, ctx.repo, &self.target_ref, reason).await?;
        }
        rollback.extend(self.waiting_pulls.drain(..));
        self.waiting_pulls = rollback;
        Ok(())
    }

    // ---- 4.1.2 Refresh ----------------------------------------------------

    /// Idempotent reconciliation: dedup → sync config → split failed
    /// batches → populate cars → (save is the caller's responsibility).
    pub async fn refresh(
        &mut self,
        ctx: &TrainContext<'_>,
        queue_rules: &HashMap<String, QueueRule>,
        now: DateTime<Utc>,
    ) -> Result<RefreshReport> {
        self.dedup(ctx).await?;
        self.sync_configuration_change(ctx, queue_rules).await?;
        self.evaluate_cars(ctx).await?;
        self.split_failed_batches(ctx).await?;
        let delayed = self.populate_cars(ctx, now).await?;

        Ok(RefreshReport {
            signals: self.refresh_signals_for_all("refresh"),
            delayed_refreshes: delayed,
        })
    }

    async fn dedup(&mut self, ctx: &TrainContext<'_>) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        let mut cumulative = 0usize;
        let mut duplicate_position = None;
        'outer: for car in &self.cars {
            for pull in &car.still_queued_embarked_pulls {
                if !seen.insert(pull.pr_number) {
                    duplicate_position = Some(cumulative);
                    break 'outer;
                }
                cumulative += 1;
            }
        }
        if let Some(pos) = duplicate_position {
            self.slice(pos, ctx, "duplicate pull request in queue").await?;
        }
        let mut seen = std::collections::HashSet::new();
        for car in &self.cars {
            for pull in &car.still_queued_embarked_pulls {
                seen.insert(pull.pr_number);
            }
        }
        self.waiting_pulls.retain(|p| seen.insert(p.pr_number));
        Ok(())
    }

    /// Re-consults the rule evaluator for every still-pending car's checked
    /// PR and records the verdict (spec §4.2.4). This is how a "speculative
    /// check concluded" event — the checks on a synthetic or in-place PR
    /// finishing — surfaces into `checks_conclusion`: the surrounding engine
    /// calls `refresh` again (directly or via a check-run webhook), and this
    /// step picks up whatever the evaluator now reports. Terminal cars
    /// (already `success`/`failure`/etc.) are left alone so their summary
    /// isn't re-posted on every subsequent refresh.
    async fn evaluate_cars(&mut self, ctx: &TrainContext<'_>) -> Result<()> {
        let total = self.cars.len();
        for (i, car) in self.cars.iter_mut().enumerate() {
            if matches!(car.creation_state, CreationState::Created | CreationState::Updated)
                && car.checks_conclusion == ChecksConclusion::Pending
            {
                let position = Some(QueuePosition { index: i, total });
                car.evaluate_and_record(ctx.host, ctx.evaluator, ctx.owner, ctx.repo, &self.target_ref, position)
                    .await?;
            }
        }
        Ok(())
    }

    async fn sync_configuration_change(
        &mut self,
        ctx: &TrainContext<'_>,
        queue_rules: &HashMap<String, QueueRule>,
    ) -> Result<()> {
        let mut cumulative = 0usize;
        for car in &self.cars {
            for pull in &car.still_queued_embarked_pulls {
                if !queue_rules.contains_key(pull.queue_name()) {
                    let reason = format!("queue named `{}` does not exist anymore", pull.queue_name());
                    self.slice(cumulative, ctx, &reason).await?;
                    return Ok(());
                }
                cumulative += 1;
            }
        }
        self.waiting_pulls.retain(|p| queue_rules.contains_key(p.queue_name()));
        Ok(())
    }

    // ---- 4.3 Bisection on batch failure ------------------------------------

    async fn split_failed_batches(&mut self, ctx: &TrainContext<'_>) -> Result<()> {
        if self.cars.len() == 1
            && self.cars[0].checks_conclusion == ChecksConclusion::Failure
            && self.cars[0].initial_embarked_pulls.len() == 1
        {
            return Ok(());
        }

        let mut split_index = None;
        for (i, car) in self.cars.iter().enumerate() {
            if car.checks_conclusion == ChecksConclusion::Failure && car.initial_embarked_pulls.len() > 1 {
                let previous_ok = self.cars[..i].iter().all(|c| c.checks_conclusion == ChecksConclusion::Success);
                if previous_ok {
                    split_index = Some(i);
                    break;
                }
            }
        }

        if let Some(index) = split_index {
            self.split_car_at(ctx, index).await?;
        }

        if let Some(first) = self.cars.first() {
            if !first.failure_history.is_empty() && first.creation_state == CreationState::Pending {
                let mut car = self.cars.remove(0);
                let position = Some(QueuePosition { index: 0, total: self.cars.len() + 1 });
                let _ = car
                    .start_checking(ctx.host, ctx.evaluator, ctx.owner, ctx.repo, &self.target_ref, true, position)
                    .await?;
                self.cars.insert(0, car);
            }
        }
        Ok(())
    }

    async fn split_car_at(&mut self, ctx: &TrainContext<'_>, index: usize) -> Result<()> {
        let tail = self.cars.split_off(index + 1);
        let mut rollback = Vec::new();
        for mut car in tail {
            rollback.extend(car.still_queued_embarked_pulls.drain(..));
            car.delete_pull(ctx.host, ctx.owner, ctx.repo, &self.target_ref, "train sliced for batch split")
                .await?;
        }
        rollback.extend(self.waiting_pulls.drain(..));
        self.waiting_pulls = rollback;

        let failed = self.cars.pop().expect("split_index always addresses the last remaining car");
        let pulls = failed.initial_embarked_pulls.clone();
        let parts = failed.speculative_checks().max(2);

        let mut failure_history = failed.failure_history.clone();
        failure_history.push(failed.clone());

        if pulls.len() < 2 {
            // Nothing left to bisect; put it back untouched.
            self.cars.push(failed);
            return Ok(());
        }

        let (head_pulls, last_pull) = pulls.split_at(pulls.len() - 1);
        let groups = split_list(head_pulls, parts);

        let mut accumulated_parents = failed.parent_pull_request_numbers.clone();
        let speculative_checks = failed.speculative_checks();
        let mut new_cars = Vec::new();

        for group in groups {
            if group.is_empty() {
                continue;
            }
            let mut car = TrainCar::new(group.to_vec(), accumulated_parents.clone(), failed.initial_base_sha.clone());
            car.failure_history = failure_history.clone();
            accumulated_parents.extend(group.iter().map(|p| p.pr_number));
            new_cars.push(car);
        }

        let base_index = self.cars.len();
        let total_after_split = base_index + new_cars.len() + if last_pull.first().is_some() { 1 } else { 0 };
        for (i, car) in new_cars.iter_mut().enumerate() {
            if speculative_checks > 1 || i == 0 {
                let is_first = self.cars.is_empty() && i == 0;
                let position = Some(QueuePosition { index: base_index + i, total: total_after_split });
                let _ = car
                    .start_checking(ctx.host, ctx.evaluator, ctx.owner, ctx.repo, &self.target_ref, is_first, position)
                    .await?;
            }
        }
        self.cars.extend(new_cars);

        if let Some(last) = last_pull.first() {
            // The last embarked pull's car is the original failed car itself,
            // narrowed to just this pull: its result is already known (if every
            // earlier group turns out to succeed, this one is the culprit), so
            // it keeps `failed`'s concluded state and is never re-checked. Its
            // `failure_history` is left as `failed`'s own (unchanged) — only the
            // new split cars record the batch that just failed.
            let mut residual = failed.clone();
            residual.initial_embarked_pulls = vec![last.clone()];
            residual.still_queued_embarked_pulls = vec![last.clone()];
            residual.parent_pull_request_numbers = accumulated_parents;
            self.cars.push(residual);
        }
        Ok(())
    }

    // ---- 4.1.4 Batch selection / 4.1.2 populate_cars -----------------------

    fn select_batch(&self, now: DateTime<Utc>) -> BatchSelection {
        let Some(head) = self.waiting_pulls.first() else {
            return BatchSelection::Empty;
        };
        let queue_name = head.queue_name().to_string();
        let batch_size = head.rule().batch_size;
        let batch_max_wait = head.rule().batch_max_wait_time;

        let prefix: Vec<EmbarkedPull> = self
            .waiting_pulls
            .iter()
            .take_while(|p| p.queue_name() == queue_name)
            .take(batch_size)
            .cloned()
            .collect();

        let oldest = prefix[0].queued_at;
        let elapsed = now.signed_duration_since(oldest).to_std().unwrap_or_default();
        if prefix.len() == batch_size || elapsed >= batch_max_wait {
            BatchSelection::Ready(prefix)
        } else {
            let wait = chrono::Duration::from_std(batch_max_wait).unwrap_or(chrono::Duration::zero());
            BatchSelection::NotReady { wake_at: oldest + wait }
        }
    }

    fn current_speculative_checks(&self) -> usize {
        self.cars
            .first()
            .map(|c| c.speculative_checks())
            .or_else(|| self.waiting_pulls.first().map(|p| p.rule().speculative_checks))
            .unwrap_or(1)
    }

    fn parent_numbers_for_new_car(&self) -> Vec<PrNumber> {
        self.cars
            .iter()
            .flat_map(|c| c.still_queued_embarked_pulls.iter().map(|p| p.pr_number))
            .collect()
    }

    async fn resolve_base_sha(&mut self, ctx: &TrainContext<'_>) -> Result<Sha> {
        if let Some(sha) = &self.current_base_sha {
            return Ok(sha.clone());
        }
        let sha = ctx.host.get_branch_head_sha(ctx.owner, ctx.repo, &self.target_ref).await?;
        self.current_base_sha = Some(sha.clone());
        Ok(sha)
    }

    async fn populate_cars(&mut self, ctx: &TrainContext<'_>, now: DateTime<Utc>) -> Result<Vec<DelayedRefresh>> {
        // We are searching for the responsible of a failure (the next
        // refresh's `split_failed_batches` will bisect or dequeue it); don't
        // pile new speculative cars on top of a tail that is already known
        // to have failed (spec §4.3).
        if let Some(last) = self.cars.last() {
            if last.creation_state == CreationState::Failed || last.checks_conclusion == ChecksConclusion::Failure {
                return Ok(Vec::new());
            }
        }

        let mut delayed = Vec::new();
        loop {
            if self.cars.len() >= self.current_speculative_checks() {
                break;
            }
            match self.select_batch(now) {
                BatchSelection::Empty => break,
                BatchSelection::NotReady { wake_at } => {
                    delayed.push(DelayedRefresh { at: wake_at });
                    break;
                }
                BatchSelection::Ready(batch) => {
                    let parents = self.parent_numbers_for_new_car();
                    let base_sha = self.resolve_base_sha(ctx).await?;
                    let n = batch.len();
                    self.waiting_pulls.drain(0..n);

                    let is_first = self.cars.is_empty();
                    let position = Some(QueuePosition { index: self.cars.len(), total: self.cars.len() + 1 });
                    let mut car = TrainCar::new(batch, parents, base_sha);
                    let outcome = car
                        .start_checking(ctx.host, ctx.evaluator, ctx.owner, ctx.repo, &self.target_ref, is_first, position)
                        .await?;

                    match outcome {
                        StartOutcome::Postponed(_) => {
                            let mut requeued = car.initial_embarked_pulls;
                            requeued.extend(self.waiting_pulls.drain(..));
                            self.waiting_pulls = requeued;
                            break;
                        }
                        StartOutcome::Failed(_) => {
                            // Terminal: the offending PR(s) are dropped; a
                            // later refresh continues with what remains.
                            break;
                        }
                        StartOutcome::Created | StartOutcome::Updated | StartOutcome::AlreadyUpToDate => {
                            self.cars.push(car);
                        }
                    }
                }
            }
        }
        Ok(delayed)
    }
}

enum BatchSelection {
    Ready(Vec<EmbarkedPull>),
    NotReady { wake_at: DateTime<Utc> },
    Empty,
}

/// Splits `xs` into `parts` contiguous sublists whose sizes differ by at most
/// 1; trailing empty partitions are skipped (spec §4.3.1).
fn split_list<T: Clone>(xs: &[T], parts: usize) -> Vec<Vec<T>> {
    if xs.is_empty() || parts == 0 {
        return Vec::new();
    }
    let base = xs.len() / parts;
    let rem = xs.len() % parts;
    let mut result = Vec::new();
    let mut idx = 0;
    for i in 0..parts {
        let size = base + if i < rem { 1 } else { 0 };
        if size == 0 {
            continue;
        }
        result.push(xs[idx..idx + size].to_vec());
        idx += size;
    }
    result
}

#[derive(Debug, Clone)]
pub struct RefreshReport {
    pub signals: Vec<RefreshSignal>,
    pub delayed_refreshes: Vec<DelayedRefresh>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule_evaluator::EvaluatedRule;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[test]
    fn split_list_distributes_remainder_to_leading_groups() {
        let xs: Vec<i32> = (1..=5).collect();
        let groups = split_list(&xs, 2);
        assert_eq!(groups, vec![vec![1, 2, 3], vec![4, 5]]);

        let groups = split_list(&xs, 3);
        assert_eq!(groups, vec![vec![1, 2], vec![3, 4], vec![5]]);
    }

    #[test]
    fn split_list_skips_empty_trailing_partitions() {
        let xs = vec![1, 2];
        let groups = split_list(&xs, 5);
        assert_eq!(groups, vec![vec![1], vec![2]]);
    }

    struct FakeHost {
        head_sha: Mutex<String>,
    }

    #[async_trait]
    impl HostApi for FakeHost {
        async fn create_ref(&self, _: &str, _: &str, _: &str, _: &Sha) -> Result<()> {
            Ok(())
        }
        async fn merge_into_ref(&self, _: &str, _: &str, _: &str, _: &str, _: &str) -> Result<Sha> {
            Ok("merged-sha".to_string())
        }
        async fn delete_ref(&self, _: &str, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn open_pull(&self, _: &str, _: &str, _: crate::host_api::OpenPullRequest) -> Result<PrNumber> {
            Ok(9000)
        }
        async fn close_pull(&self, _: &str, _: &str, _: PrNumber) -> Result<()> {
            Ok(())
        }
        async fn patch_pull_body(&self, _: &str, _: &str, _: PrNumber, _: &str) -> Result<()> {
            Ok(())
        }
        async fn post_comment(&self, _: &str, _: &str, _: PrNumber, _: &str) -> Result<()> {
            Ok(())
        }
        async fn get_branch_head_sha(&self, _: &str, _: &str, _: &str) -> Result<Sha> {
            Ok(self.head_sha.lock().unwrap().clone())
        }
        async fn get_pull(&self, _: &str, _: &str, number: PrNumber) -> Result<crate::host_api::PullView> {
            Ok(crate::host_api::PullView {
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
        async fn list_checks(&self, _: &str, _: &str, _: PrNumber) -> Result<Vec<crate::host_api::CheckSnapshot>> {
            Ok(Vec::new())
        }
        async fn list_statuses(&self, _: &str, _: &str, _: PrNumber) -> Result<Vec<crate::host_api::CheckSnapshot>> {
            Ok(Vec::new())
        }
        async fn post_check_run(&self, _: &str, _: &str, _: PrNumber, _: crate::host_api::CheckRunUpdate) -> Result<()> {
            Ok(())
        }
        async fn update_pull_branch(&self, _: &str, _: &str, _: PrNumber) -> Result<bool> {
            Ok(true)
        }
        async fn is_branch_behind(&self, _: &str, _: &str, _: &str, _: &str) -> Result<bool> {
            Ok(false)
        }
    }

    struct FakeEvaluator;

    #[async_trait]
    impl QueueRuleEvaluator for FakeEvaluator {
        async fn evaluate(&self, _: &QueueRule, _: &[crate::host_api::PullView]) -> Result<EvaluatedRule> {
            Ok(EvaluatedRule::pending("checks running"))
        }
    }

    fn rule(queue_name: &str) -> QueueRule {
        QueueRule::new(queue_name)
            .with_batch_size(1)
            .with_speculative_checks(5)
    }

    fn config(queue_name: &str, priority: i32) -> QueueConfig {
        QueueConfig::new(rule(queue_name), priority).with_effective_priority(priority)
    }

    async fn refresh(train: &mut Train, ctx: &TrainContext<'_>) {
        train
            .refresh(ctx, &HashMap::from([("five".to_string(), rule("five"))]), Utc::now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn scenario_linear_fill() {
        let host = FakeHost {
            head_sha: Mutex::new("base".to_string()),
        };
        let evaluator = FakeEvaluator;
        let ctx = TrainContext {
            host: &host,
            evaluator: &evaluator,
            owner: "acme",
            repo: "widgets",
        };

        let mut train = Train::new(1, 10, "main");
        train.add_pull(&ctx, 1, config("five", 0), Utc::now()).await.unwrap();
        refresh(&mut train, &ctx).await;
        assert_eq!(car_numbers(&train), vec![vec![1]]);

        train.add_pull(&ctx, 2, config("five", 0), Utc::now()).await.unwrap();
        refresh(&mut train, &ctx).await;
        assert_eq!(car_numbers(&train), vec![vec![1], vec![2]]);

        train.add_pull(&ctx, 3, config("five", 0), Utc::now()).await.unwrap();
        refresh(&mut train, &ctx).await;
        assert_eq!(car_numbers(&train), vec![vec![1], vec![2], vec![3]]);
        assert!(train.waiting_pulls.is_empty());
    }

    #[tokio::test]
    async fn scenario_middle_dequeue() {
        let host = FakeHost {
            head_sha: Mutex::new("base".to_string()),
        };
        let evaluator = FakeEvaluator;
        let ctx = TrainContext {
            host: &host,
            evaluator: &evaluator,
            owner: "acme",
            repo: "widgets",
        };

        let mut train = Train::new(1, 10, "main");
        for n in 1..=3 {
            train.add_pull(&ctx, n, config("five", 0), Utc::now()).await.unwrap();
            refresh(&mut train, &ctx).await;
        }
        assert_eq!(car_numbers(&train), vec![vec![1], vec![2], vec![3]]);

        train.remove_pull(&ctx, 2, None).await.unwrap();
        refresh(&mut train, &ctx).await;
        assert_eq!(car_numbers(&train), vec![vec![1], vec![3]]);
        assert!(train.waiting_pulls.is_empty());
    }

    #[tokio::test]
    async fn scenario_head_merge_fast_path_preserves_later_cars() {
        let host = FakeHost {
            head_sha: Mutex::new("base".to_string()),
        };
        let evaluator = FakeEvaluator;
        let ctx = TrainContext {
            host: &host,
            evaluator: &evaluator,
            owner: "acme",
            repo: "widgets",
        };

        let mut train = Train::new(1, 10, "main");
        for n in 1..=3 {
            train.add_pull(&ctx, n, config("five", 0), Utc::now()).await.unwrap();
            refresh(&mut train, &ctx).await;
        }
        assert_eq!(car_numbers(&train), vec![vec![1], vec![2], vec![3]]);

        train.remove_pull(&ctx, 1, Some("S1".to_string())).await.unwrap();
        assert_eq!(train.current_base_sha.as_deref(), Some("S1"));
        assert_eq!(car_numbers(&train), vec![vec![2], vec![3]]);
    }

    #[tokio::test]
    async fn priority_preemption_respects_non_interruptible_cars() {
        let host = FakeHost {
            head_sha: Mutex::new("base".to_string()),
        };
        let evaluator = FakeEvaluator;
        let ctx = TrainContext {
            host: &host,
            evaluator: &evaluator,
            owner: "acme",
            repo: "widgets",
        };

        let noint_rule = QueueRule::new("noint")
            .with_batch_size(1)
            .with_speculative_checks(5)
            .with_allow_checks_interruption(false);
        let cfg = |priority: i32| {
            QueueConfig::new(noint_rule.clone(), priority).with_effective_priority(priority)
        };

        let mut train = Train::new(1, 10, "main");
        for n in 1..=3 {
            train.add_pull(&ctx, n, cfg(100), Utc::now()).await.unwrap();
            refresh(&mut train, &ctx).await;
        }
        assert_eq!(car_numbers(&train), vec![vec![1], vec![2]]);
        assert_eq!(train.waiting_pulls.iter().map(|p| p.pr_number).collect::<Vec<_>>(), vec![3]);

        train.add_pull(&ctx, 4, cfg(20000), Utc::now()).await.unwrap();
        assert_eq!(car_numbers(&train), vec![vec![1], vec![2]]);
        assert_eq!(
            train.waiting_pulls.iter().map(|p| p.pr_number).collect::<Vec<_>>(),
            vec![4, 3]
        );
    }

    #[tokio::test]
    async fn scenario_batch_bisection_splits_a_failed_batch_by_speculative_checks() {
        let host = FakeHost {
            head_sha: Mutex::new("base".to_string()),
        };
        let evaluator = FakeEvaluator;
        let ctx = TrainContext {
            host: &host,
            evaluator: &evaluator,
            owner: "acme",
            repo: "widgets",
        };

        let batch_rule = QueueRule::new("five").with_batch_size(5).with_speculative_checks(1);
        let cfg = QueueConfig::new(batch_rule.clone(), 0).with_effective_priority(0);

        let mut train = Train::new(1, 10, "main");
        for n in 41..=45 {
            train.add_pull(&ctx, n, cfg.clone(), Utc::now()).await.unwrap();
        }
        train
            .refresh(&ctx, &HashMap::from([("five".to_string(), batch_rule.clone())]), Utc::now())
            .await
            .unwrap();
        assert_eq!(car_numbers(&train), vec![vec![41, 42, 43, 44, 45]]);
        assert_eq!(train.cars[0].creation_state, CreationState::Created);

        train.cars[0].checks_conclusion = ChecksConclusion::Failure;
        train
            .refresh(&ctx, &HashMap::from([("five".to_string(), batch_rule)]), Utc::now())
            .await
            .unwrap();

        assert_eq!(car_numbers(&train), vec![vec![41, 42], vec![43, 44], vec![45]]);
        assert_eq!(train.cars[0].parent_pull_request_numbers, Vec::<PrNumber>::new());
        assert_eq!(train.cars[1].parent_pull_request_numbers, vec![41, 42]);
        assert_eq!(train.cars[2].parent_pull_request_numbers, vec![41, 42, 43, 44]);

        // speculative_checks=1: only the first sub-batch is actually started.
        assert_eq!(train.cars[0].creation_state, CreationState::Created);
        assert_eq!(train.cars[1].creation_state, CreationState::Pending);
        // cars[2] is the residual holding just #45: the original failed car
        // itself, narrowed down, so it keeps its already-concluded state
        // instead of being reset to pending and re-checked.
        assert_eq!(train.cars[2].creation_state, CreationState::Created);
        assert_eq!(train.cars[2].checks_conclusion, ChecksConclusion::Failure);

        // the two new split cars remember the batch that failed (spec §4.3 step
        // 2); the residual is the same failed car, so its own history is left
        // untouched (empty here, since this is the first split).
        assert_eq!(train.cars[0].failure_history.len(), 1);
        assert_eq!(train.cars[1].failure_history.len(), 1);
        assert_eq!(train.cars[2].failure_history.len(), 0);
        assert_eq!(
            train.cars[0].failure_history[0].initial_embarked_pulls.len(),
            5
        );
    }

    #[tokio::test]
    async fn populate_cars_does_not_pile_new_cars_onto_an_unresolved_failure() {
        let host = FakeHost {
            head_sha: Mutex::new("base".to_string()),
        };
        let evaluator = FakeEvaluator;
        let ctx = TrainContext {
            host: &host,
            evaluator: &evaluator,
            owner: "acme",
            repo: "widgets",
        };

        // speculative_checks=5, batch_size=1: plenty of room for more cars,
        // but the tail car has already concluded failure and is awaiting
        // the bisection shortcut (single embarked pull, nothing to split).
        let mut train = Train::new(1, 10, "main");
        for n in 1..=2 {
            train.add_pull(&ctx, n, config("five", 0), Utc::now()).await.unwrap();
            refresh(&mut train, &ctx).await;
        }
        assert_eq!(car_numbers(&train), vec![vec![1], vec![2]]);

        train.cars[1].checks_conclusion = ChecksConclusion::Failure;
        train.add_pull(&ctx, 3, config("five", 0), Utc::now()).await.unwrap();
        refresh(&mut train, &ctx).await;

        // No third car was created on top of the still-failed tail; #3 stays
        // queued until the failure is resolved (dequeue happens outside the
        // core, driven by the `action_required` summary it already posted).
        assert_eq!(car_numbers(&train), vec![vec![1], vec![2]]);
        assert_eq!(train.waiting_pulls.iter().map(|p| p.pr_number).collect::<Vec<_>>(), vec![3]);
    }

    fn car_numbers(train: &Train) -> Vec<Vec<PrNumber>> {
        train
            .cars
            .iter()
            .map(|c| c.still_queued_embarked_pulls.iter().map(|p| p.pr_number).collect())
            .collect()
    }
}
