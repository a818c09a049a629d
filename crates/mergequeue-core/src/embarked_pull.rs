//! Embarked pull requests and the queue rule snapshot they carry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub type PrNumber = i64;
pub type Sha = String;

/// How a car's head branch is kept current with its base (spec §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStrategy {
    Merge,
    Rebase,
}

impl UpdateStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStrategy::Merge => "merge",
            UpdateStrategy::Rebase => "rebase",
        }
    }
}

impl Default for UpdateStrategy {
    fn default() -> Self {
        UpdateStrategy::Merge
    }
}

/// Queue-level parameters shared by every pull embarked under the same queue
/// name (spec §2 C1, §6.2 `speculative_checks`/`batch_size`/...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRule {
    pub queue_name: String,
    pub batch_size: usize,
    #[serde(with = "duration_secs")]
    pub batch_max_wait_time: Duration,
    pub speculative_checks: usize,
    pub allow_checks_interruption: bool,
    pub allow_inplace_checks: bool,
}

impl QueueRule {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            batch_size: 1,
            batch_max_wait_time: Duration::from_secs(0),
            speculative_checks: 1,
            allow_checks_interruption: true,
            allow_inplace_checks: true,
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_batch_max_wait_time(mut self, wait: Duration) -> Self {
        self.batch_max_wait_time = wait;
        self
    }

    pub fn with_speculative_checks(mut self, n: usize) -> Self {
        self.speculative_checks = n.max(1);
        self
    }

    pub fn with_allow_checks_interruption(mut self, allow: bool) -> Self {
        self.allow_checks_interruption = allow;
        self
    }

    pub fn with_allow_inplace_checks(mut self, allow: bool) -> Self {
        self.allow_inplace_checks = allow;
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// The config snapshot frozen into an `EmbarkedPull` at enqueue time (spec
/// §3.1). `effective_priority` combines the PR's priority with a per-queue
/// offset resolved by the caller before `add_pull`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub queue_name: String,
    pub priority: i32,
    pub effective_priority: i32,
    pub update_strategy: UpdateStrategy,
    pub bot_account: Option<String>,
    pub rule: QueueRule,
}

impl QueueConfig {
    pub fn new(rule: QueueRule, priority: i32) -> Self {
        Self {
            queue_name: rule.queue_name.clone(),
            priority,
            effective_priority: priority,
            update_strategy: UpdateStrategy::default(),
            bot_account: None,
            rule,
        }
    }

    pub fn with_effective_priority(mut self, effective_priority: i32) -> Self {
        self.effective_priority = effective_priority;
        self
    }

    pub fn with_update_strategy(mut self, strategy: UpdateStrategy) -> Self {
        self.update_strategy = strategy;
        self
    }

    pub fn with_bot_account(mut self, bot_account: impl Into<String>) -> Self {
        self.bot_account = Some(bot_account.into());
        self
    }
}

/// A PR that has been admitted to a train (spec §3.1 C1). Immutable once
/// created except by being dequeued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbarkedPull {
    pub pr_number: PrNumber,
    pub config: QueueConfig,
    pub queued_at: DateTime<Utc>,
}

impl EmbarkedPull {
    pub fn new(pr_number: PrNumber, config: QueueConfig, queued_at: DateTime<Utc>) -> Self {
        Self {
            pr_number,
            config,
            queued_at,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.config.queue_name
    }

    pub fn effective_priority(&self) -> i32 {
        self.config.effective_priority
    }

    pub fn rule(&self) -> &QueueRule {
        &self.config.rule
    }
}
