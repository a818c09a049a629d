//! Default `QueueRuleEvaluator`: mergeability-only conditions (spec §2 C7).
//!
//! `HostApi::get_pull` is the only signal the core threads through to the
//! evaluator today (`PullView::mergeable`); installations with richer
//! condition DSLs (required reviews, label gates, required status checks)
//! substitute their own evaluator, same as any other `QueueRuleEvaluator`.

use async_trait::async_trait;
use mergequeue_core::host_api::PullView;
use mergequeue_core::rule_evaluator::{EvaluatedRule, QueueRuleEvaluator};
use mergequeue_core::{QueueRule, Result};

pub struct MergeableConditionEvaluator;

#[async_trait]
impl QueueRuleEvaluator for MergeableConditionEvaluator {
    async fn evaluate(&self, rule: &QueueRule, pulls: &[PullView]) -> Result<EvaluatedRule> {
        let unmergeable: Vec<_> = pulls
            .iter()
            .filter(|p| p.mergeable == Some(false))
            .map(|p| p.number)
            .collect();
        if !unmergeable.is_empty() {
            return Ok(EvaluatedRule::failure(
                format!(
                    "pull(s) {:?} are not mergeable under queue `{}`",
                    unmergeable, rule.queue_name
                ),
                false,
            ));
        }

        if pulls.iter().any(|p| p.mergeable.is_none()) {
            return Ok(EvaluatedRule::pending(format!(
                "waiting on mergeability status for queue `{}`",
                rule.queue_name
            )));
        }

        Ok(EvaluatedRule::success(format!(
            "all pulls mergeable under queue `{}`",
            rule.queue_name
        )))
    }
}
