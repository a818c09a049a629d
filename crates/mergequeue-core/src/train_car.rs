//! `TrainCar`: one unit of speculative checking (spec §2 C2, §3.1, §4.2).

use crate::embarked_pull::{EmbarkedPull, PrNumber, Sha};
use crate::error::{Error, Result};
use crate::host_api::{CheckRunUpdate, HostApi, OpenPullRequest};
use crate::retry::RetryPolicy;
use crate::rule_evaluator::{EvaluatedRule, QueueRuleEvaluator, RuleConclusion};
use crate::summary;
use crate::unexpected_change::UnexpectedChange;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MERGE_QUEUE_PREFIX: &str = "merge-queue";
pub const SUMMARY_CHECK_NAME: &str = "Merge queue summary";

/// First 7 characters of a commit SHA, for the summary headline (spec §6.3).
fn short_sha(sha: &str) -> String {
    sha.chars().take(7).collect()
}

/// This car's place among its train's current cars, rendered into the
/// summary footer by `summary::render_footer`. `Train` computes this since
/// only it knows the full `cars` list; a car evaluated outside a train
/// (tests, a freshly-split car not yet appended) simply omits it.
#[derive(Debug, Clone, Copy)]
pub struct QueuePosition {
    pub index: usize,
    pub total: usize,
}

/// Tagged creation-state variant (spec §4.2.1). Transitions are explicit and
/// illegal ones are rejected rather than encoded as reachable states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationState {
    Pending,
    Created,
    Updated,
    Failed,
}

impl CreationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreationState::Pending => "pending",
            CreationState::Created => "created",
            CreationState::Updated => "updated",
            CreationState::Failed => "failed",
        }
    }

    /// Rejects any transition not in the state machine of spec §4.2.1.
    pub fn can_transition_to(&self, next: CreationState) -> bool {
        matches!(
            (self, next),
            (CreationState::Pending, CreationState::Created)
                | (CreationState::Pending, CreationState::Updated)
                | (CreationState::Pending, CreationState::Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksConclusion {
    Pending,
    Success,
    Failure,
    Cancelled,
    Neutral,
    ActionRequired,
}

impl ChecksConclusion {
    /// Check-run `conclusion` field, `None` while still in progress.
    pub fn as_check_conclusion(&self) -> Option<&'static str> {
        match self {
            ChecksConclusion::Pending => None,
            ChecksConclusion::Success => Some("success"),
            ChecksConclusion::Failure => Some("failure"),
            ChecksConclusion::Cancelled => Some("cancelled"),
            ChecksConclusion::Neutral => Some("neutral"),
            ChecksConclusion::ActionRequired => Some("action_required"),
        }
    }

    pub fn as_check_status(&self) -> &'static str {
        if matches!(self, ChecksConclusion::Pending) {
            "in_progress"
        } else {
            "completed"
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChecksConclusion::Pending)
    }
}

/// Outcome of attempting to start (or advance) a car, used by `Train` to
/// decide whether to keep populating, emit a refresh signal, or dequeue a PR
/// (spec §4.2.2, §7 kinds 3-4).
#[derive(Debug, Clone)]
pub enum StartOutcome {
    /// In-place car's PR branch was updated; transitioned to `updated`.
    Updated,
    /// Draft PR created; transitioned to `created`.
    Created,
    /// In-place car's PR was already up to date; no state change, caller
    /// should still emit a refresh signal so the PR re-renders.
    AlreadyUpToDate,
    /// Transient failure (permission, base still missing); car was torn
    /// down and should be retried on the next refresh (spec §7 kind 3).
    Postponed(String),
    /// Terminal failure; car transitioned to `failed` (spec §7 kind 4).
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainCar {
    pub initial_embarked_pulls: Vec<EmbarkedPull>,
    pub still_queued_embarked_pulls: Vec<EmbarkedPull>,
    pub parent_pull_request_numbers: Vec<PrNumber>,
    pub initial_base_sha: Sha,
    pub creation_date: DateTime<Utc>,
    pub creation_state: CreationState,
    pub checks_conclusion: ChecksConclusion,
    pub queue_pull_request_number: Option<PrNumber>,
    pub head_branch: Option<String>,
    pub failure_history: Vec<TrainCar>,
    pub last_checks: Vec<crate::host_api::CheckSnapshot>,
    pub last_evaluated_conditions: Option<String>,
    pub has_timed_out: bool,
}

/// Wire shape for `TrainCar`, permissive about the fields older persisted
/// documents are missing (spec §4.4). Before `initial_embarked_pulls` was a
/// list (back when every car held exactly one PR, `speculative_checks=1`
/// only), documents stored a single `embarked_pull` object instead; and
/// `creation_date`, `last_checks`, `has_timed_out` and `head_branch` were
/// added later, so older documents simply lack them.
#[derive(Debug, Deserialize)]
struct TrainCarWire {
    #[serde(default)]
    initial_embarked_pulls: Vec<EmbarkedPull>,
    #[serde(default)]
    embarked_pull: Option<EmbarkedPull>,
    #[serde(default)]
    still_queued_embarked_pulls: Option<Vec<EmbarkedPull>>,
    parent_pull_request_numbers: Vec<PrNumber>,
    initial_base_sha: Sha,
    #[serde(default = "Utc::now")]
    creation_date: DateTime<Utc>,
    creation_state: CreationState,
    checks_conclusion: ChecksConclusion,
    #[serde(default)]
    queue_pull_request_number: Option<PrNumber>,
    #[serde(default)]
    head_branch: Option<String>,
    #[serde(default)]
    failure_history: Vec<TrainCar>,
    #[serde(default)]
    last_checks: Vec<crate::host_api::CheckSnapshot>,
    #[serde(default)]
    last_evaluated_conditions: Option<String>,
    #[serde(default)]
    has_timed_out: bool,
}

impl<'de> Deserialize<'de> for TrainCar {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = TrainCarWire::deserialize(deserializer)?;
        let initial_embarked_pulls = if wire.initial_embarked_pulls.is_empty() {
            wire.embarked_pull.into_iter().collect()
        } else {
            wire.initial_embarked_pulls
        };
        let still_queued_embarked_pulls =
            wire.still_queued_embarked_pulls.unwrap_or_else(|| initial_embarked_pulls.clone());
        let mut car = TrainCar {
            head_branch: wire.head_branch,
            initial_embarked_pulls,
            still_queued_embarked_pulls,
            parent_pull_request_numbers: wire.parent_pull_request_numbers,
            initial_base_sha: wire.initial_base_sha,
            creation_date: wire.creation_date,
            creation_state: wire.creation_state,
            checks_conclusion: wire.checks_conclusion,
            queue_pull_request_number: wire.queue_pull_request_number,
            failure_history: wire.failure_history,
            last_checks: wire.last_checks,
            last_evaluated_conditions: wire.last_evaluated_conditions,
            has_timed_out: wire.has_timed_out,
        };
        if car.head_branch.is_none() && !car.initial_embarked_pulls.is_empty() {
            car.head_branch = Some(car.head_branch_name());
        }
        Ok(car)
    }
}

impl TrainCar {
    pub fn new(
        initial_embarked_pulls: Vec<EmbarkedPull>,
        parent_pull_request_numbers: Vec<PrNumber>,
        initial_base_sha: Sha,
    ) -> Self {
        Self {
            still_queued_embarked_pulls: initial_embarked_pulls.clone(),
            initial_embarked_pulls,
            parent_pull_request_numbers,
            initial_base_sha,
            creation_date: Utc::now(),
            creation_state: CreationState::Pending,
            checks_conclusion: ChecksConclusion::Pending,
            queue_pull_request_number: None,
            head_branch: None,
            failure_history: Vec::new(),
            last_checks: Vec::new(),
            last_evaluated_conditions: None,
            has_timed_out: false,
        }
    }

    /// Hyphen-join of `initial_embarked_pulls`'s PR numbers (spec §3.2 invariant 5).
    pub fn head_branch_name(&self) -> String {
        self.initial_embarked_pulls
            .iter()
            .map(|p| p.pr_number.to_string())
            .collect::<Vec<_>>()
            .join("-")
    }

    /// `"<merge-queue-prefix>/<target-ref>/<head_branch>"` (spec §3.2 invariant 5).
    pub fn synthetic_ref(&self, target_ref: &str) -> Option<String> {
        self.head_branch
            .as_ref()
            .map(|branch| format!("{MERGE_QUEUE_PREFIX}/{target_ref}/{branch}"))
    }

    /// Spec §4.2.2: in-place iff this is `cars[0]`, holds exactly one
    /// embarked pull, has no parents, and the rule allows it.
    pub fn is_inplace_candidate(&self, is_first_car: bool) -> bool {
        is_first_car
            && self.initial_embarked_pulls.len() == 1
            && self.parent_pull_request_numbers.is_empty()
            && self
                .initial_embarked_pulls
                .first()
                .map(|p| p.rule().allow_inplace_checks)
                .unwrap_or(false)
    }

    /// The `speculative_checks` fan-out of this car's queue rule (spec §3.2 invariant 3).
    pub fn speculative_checks(&self) -> usize {
        self.initial_embarked_pulls[0].rule().speculative_checks
    }

    fn checked_pr_number(&self) -> Option<PrNumber> {
        match self.creation_state {
            CreationState::Created => self.queue_pull_request_number,
            CreationState::Updated => self.initial_embarked_pulls.first().map(|p| p.pr_number),
            _ => None,
        }
    }

    /// Starts checking this car: in-place update or draft-PR creation (spec §4.2.2).
    pub async fn start_checking(
        &mut self,
        host: &dyn HostApi,
        evaluator: &dyn QueueRuleEvaluator,
        owner: &str,
        repo: &str,
        target_ref: &str,
        is_first_car: bool,
        position: Option<QueuePosition>,
    ) -> Result<StartOutcome> {
        if self.is_inplace_candidate(is_first_car) {
            self.start_inplace(host, evaluator, owner, repo, target_ref, position).await
        } else {
            self.start_draft(host, evaluator, owner, repo, target_ref, position).await
        }
    }

    async fn start_inplace(
        &mut self,
        host: &dyn HostApi,
        evaluator: &dyn QueueRuleEvaluator,
        owner: &str,
        repo: &str,
        target_ref: &str,
        position: Option<QueuePosition>,
    ) -> Result<StartOutcome> {
        let pr_number = self.initial_embarked_pulls[0].pr_number;
        let pull = host.get_pull(owner, repo, pr_number).await?;
        let behind = host
            .is_branch_behind(owner, repo, &pull.head_ref, &self.initial_base_sha)
            .await?;
        let updated = if behind {
            host.update_pull_branch(owner, repo, pr_number).await?
        } else {
            false
        };
        self.transition(CreationState::Updated)?;
        self.evaluate_and_record(host, evaluator, owner, repo, target_ref, position).await?;
        if updated {
            Ok(StartOutcome::Updated)
        } else {
            Ok(StartOutcome::AlreadyUpToDate)
        }
    }

    async fn start_draft(
        &mut self,
        host: &dyn HostApi,
        evaluator: &dyn QueueRuleEvaluator,
        owner: &str,
        repo: &str,
        target_ref: &str,
        position: Option<QueuePosition>,
    ) -> Result<StartOutcome> {
        let head_branch = self.head_branch_name();
        self.head_branch = Some(head_branch.clone());
        let synthetic_ref = format!("{MERGE_QUEUE_PREFIX}/{target_ref}/{head_branch}");

        match host
            .create_ref(owner, repo, &synthetic_ref, &self.initial_base_sha)
            .await
        {
            Ok(()) => {}
            Err(Error::ReferenceAlreadyExists(_)) => {
                let _ = host.delete_ref(owner, repo, &synthetic_ref).await;
                self.head_branch = None;
                self.transition(CreationState::Failed)?;
                return Ok(StartOutcome::Failed(
                    "a synthetic branch for this batch already existed".to_string(),
                ));
            }
            Err(err) => return Err(err),
        }

        let pr_numbers: Vec<PrNumber> = self
            .parent_pull_request_numbers
            .iter()
            .copied()
            .chain(self.still_queued_embarked_pulls.iter().map(|p| p.pr_number))
            .collect();

        for pr_number in &pr_numbers {
            let head = format!("refs/pull/{pr_number}/head");
            let commit_message = format!("Merge of #{pr_number}");
            let result = RetryPolicy::run_eventual_consistency(|| {
                host.merge_into_ref(owner, repo, &synthetic_ref, &head, &commit_message)
            })
            .await;

            if let Err(err) = result {
                let _ = host.delete_ref(owner, repo, &synthetic_ref).await;
                self.head_branch = None;
                return match &err {
                    Error::BaseDoesNotExist(_) | Error::HostPermissionDenied(_) => {
                        self.transition(CreationState::Failed)?;
                        Ok(StartOutcome::Postponed(err.to_string()))
                    }
                    Error::MergeConflict(_) => {
                        self.transition(CreationState::Failed)?;
                        Ok(StartOutcome::Failed(format!(
                            "#{pr_number} could not be merged into the speculative batch: {err}"
                        )))
                    }
                    _ => {
                        self.transition(CreationState::Failed)?;
                        Ok(StartOutcome::Failed(err.to_string()))
                    }
                };
            }
        }

        let title = summary::draft_pull_title(
            &self
                .initial_embarked_pulls
                .iter()
                .map(|p| p.pr_number)
                .collect::<Vec<_>>(),
        );
        let bot_account = self
            .initial_embarked_pulls
            .first()
            .and_then(|p| p.config.bot_account.clone());

        let open_result = host
            .open_pull(
                owner,
                repo,
                OpenPullRequest {
                    title,
                    body: String::new(),
                    base: target_ref.to_string(),
                    head: synthetic_ref.clone(),
                    draft: true,
                    oauth_token: bot_account,
                },
            )
            .await;

        let queue_pr_number = match open_result {
            Ok(n) => n,
            Err(err) => {
                let _ = host.delete_ref(owner, repo, &synthetic_ref).await;
                self.head_branch = None;
                self.transition(CreationState::Failed)?;
                return Ok(StartOutcome::Failed(err.to_string()));
            }
        };

        self.queue_pull_request_number = Some(queue_pr_number);
        self.transition(CreationState::Created)?;
        self.evaluate_and_record(host, evaluator, owner, repo, target_ref, position).await?;
        Ok(StartOutcome::Created)
    }

    fn transition(&mut self, next: CreationState) -> Result<()> {
        if !self.creation_state.can_transition_to(next) {
            return Err(Error::InvalidStateTransition(
                self.creation_state.as_str().to_string(),
                next.as_str().to_string(),
            ));
        }
        self.creation_state = next;
        Ok(())
    }

    /// Re-evaluates this car against the rule evaluator and posts the
    /// resulting summary (spec §4.2.2 "evaluate rule, post an initial
    /// summary"; spec §4.2.4/§4.2.5). Called once right after the car starts
    /// checking, and again by `Train::refresh` for as long as the car's
    /// conclusion stays `pending`, so a speculative check's conclusion is
    /// picked up on the next refresh after it completes.
    pub(crate) async fn evaluate_and_record(
        &mut self,
        host: &dyn HostApi,
        evaluator: &dyn QueueRuleEvaluator,
        owner: &str,
        repo: &str,
        target_ref: &str,
        position: Option<QueuePosition>,
    ) -> Result<()> {
        if let Some(n) = self.checked_pr_number() {
            let pull = host.get_pull(owner, repo, n).await?;
            let rule = self.initial_embarked_pulls[0].rule().clone();
            let evaluated = evaluator.evaluate(&rule, &[pull]).await?;
            self.update_state(&evaluated);
            self.refresh_checks_snapshot(host, owner, repo).await?;
            let short_sha = short_sha(&self.initial_base_sha);
            self.update_summaries(host, owner, repo, target_ref, &short_sha, None, position)
                .await?;
        }
        Ok(())
    }

    /// Records the evaluator's verdict (spec §4.2.4).
    pub fn update_state(&mut self, evaluated: &EvaluatedRule) {
        self.checks_conclusion = match evaluated.conclusion {
            RuleConclusion::Pending => ChecksConclusion::Pending,
            RuleConclusion::Success => ChecksConclusion::Success,
            RuleConclusion::Failure => ChecksConclusion::Failure,
        };
        self.last_evaluated_conditions = Some(evaluated.conditions_report.clone());
        self.has_timed_out =
            evaluated.conclusion == RuleConclusion::Failure && evaluated.checks_timed_out;
    }

    /// Snapshots external checks/statuses from the checked PR, excluding the
    /// platform-integration's own summary check (spec §4.2.4).
    pub async fn refresh_checks_snapshot(
        &mut self,
        host: &dyn HostApi,
        owner: &str,
        repo: &str,
    ) -> Result<()> {
        let Some(n) = self.checked_pr_number() else {
            return Ok(());
        };
        let mut checks = host.list_checks(owner, repo, n).await?;
        checks.extend(host.list_statuses(owner, repo, n).await?);
        checks.retain(|c| c.name != SUMMARY_CHECK_NAME);
        self.last_checks = checks;
        Ok(())
    }

    /// Tears down the car's synthetic artifacts (spec §4.2.3).
    pub async fn delete_pull(
        &mut self,
        host: &dyn HostApi,
        owner: &str,
        repo: &str,
        target_ref: &str,
        reason: &str,
    ) -> Result<()> {
        if self.creation_state == CreationState::Created && self.checks_conclusion == ChecksConclusion::Pending {
            if let Some(n) = self.queue_pull_request_number {
                let _ = host
                    .patch_pull_body(owner, repo, n, &format!("# This pull request has been re-embarked\n\n{reason}"))
                    .await;
                let _ = host
                    .post_check_run(
                        owner,
                        repo,
                        n,
                        CheckRunUpdate {
                            name: SUMMARY_CHECK_NAME.to_string(),
                            conclusion: Some("cancelled".to_string()),
                            status: "completed".to_string(),
                            summary_title: "This pull request has been re-embarked".to_string(),
                            summary_body: reason.to_string(),
                        },
                    )
                    .await;
            }
        }
        if let Some(ref_name) = self.synthetic_ref(target_ref) {
            host.delete_ref(owner, repo, &ref_name).await?;
        }
        Ok(())
    }

    /// Renders and posts the user-facing summary (spec §4.2.5).
    pub async fn update_summaries(
        &mut self,
        host: &dyn HostApi,
        owner: &str,
        repo: &str,
        target_ref: &str,
        base_short_sha: &str,
        unexpected_change: Option<&UnexpectedChange>,
        position: Option<QueuePosition>,
    ) -> Result<()> {
        let title = summary::title_for(self);
        let mut body = summary::render_body(self, target_ref, base_short_sha, unexpected_change);
        if let Some(pos) = position {
            body.push_str(&summary::render_footer(pos.index, pos.total));
        }

        for pull in self.still_queued_embarked_pulls.clone() {
            host.post_check_run(
                owner,
                repo,
                pull.pr_number,
                CheckRunUpdate {
                    name: SUMMARY_CHECK_NAME.to_string(),
                    conclusion: self.checks_conclusion.as_check_conclusion().map(str::to_string),
                    status: self.checks_conclusion.as_check_status().to_string(),
                    summary_title: title.clone(),
                    summary_body: body.clone(),
                },
            )
            .await?;
        }

        if self.creation_state == CreationState::Created {
            if let Some(n) = self.queue_pull_request_number {
                host.post_check_run(
                    owner,
                    repo,
                    n,
                    CheckRunUpdate {
                        name: SUMMARY_CHECK_NAME.to_string(),
                        conclusion: self.checks_conclusion.as_check_conclusion().map(str::to_string),
                        status: self.checks_conclusion.as_check_status().to_string(),
                        summary_title: title,
                        summary_body: body.clone(),
                    },
                )
                .await?;

                if matches!(self.checks_conclusion, ChecksConclusion::Success | ChecksConclusion::Failure) {
                    host.post_comment(owner, repo, n, &body).await?;
                    host.close_pull(owner, repo, n).await?;
                }
            }
        }
        Ok(())
    }
}
