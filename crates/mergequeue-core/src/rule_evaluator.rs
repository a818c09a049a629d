//! The `QueueRuleEvaluator` capability contract (spec §1, §2 C7).
//!
//! Mergeability conditions and the checks-timeout decision are policy the
//! core delegates to the surrounding engine; the core only reacts to the
//! evaluated conclusion.

use crate::embarked_pull::QueueRule;
use crate::error::Result;
use crate::host_api::PullView;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The evaluator's verdict for a car's current check state (spec §1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleConclusion {
    Pending,
    Success,
    Failure,
}

/// Result of evaluating a queue rule's conditions against a car's pulls
/// (spec §1, §4.2.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatedRule {
    pub conclusion: RuleConclusion,
    pub conditions_report: String,
    /// True iff conclusion is failure because a checks-timeout condition did
    /// not match in time (spec §4.2.4).
    pub checks_timed_out: bool,
}

impl EvaluatedRule {
    pub fn pending(conditions_report: impl Into<String>) -> Self {
        Self {
            conclusion: RuleConclusion::Pending,
            conditions_report: conditions_report.into(),
            checks_timed_out: false,
        }
    }

    pub fn success(conditions_report: impl Into<String>) -> Self {
        Self {
            conclusion: RuleConclusion::Success,
            conditions_report: conditions_report.into(),
            checks_timed_out: false,
        }
    }

    pub fn failure(conditions_report: impl Into<String>, checks_timed_out: bool) -> Self {
        Self {
            conclusion: RuleConclusion::Failure,
            conditions_report: conditions_report.into(),
            checks_timed_out,
        }
    }
}

/// Evaluates mergeability conditions for a batch of pulls under a queue rule.
#[async_trait]
pub trait QueueRuleEvaluator: Send + Sync {
    async fn evaluate(&self, rule: &QueueRule, pulls: &[PullView]) -> Result<EvaluatedRule>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluated_rule_constructors_set_conclusion() {
        assert_eq!(EvaluatedRule::pending("x").conclusion, RuleConclusion::Pending);
        assert_eq!(EvaluatedRule::success("x").conclusion, RuleConclusion::Success);
        let failure = EvaluatedRule::failure("timed out", true);
        assert_eq!(failure.conclusion, RuleConclusion::Failure);
        assert!(failure.checks_timed_out);
    }
}
