//! The merge-train scheduler core.
//!
//! This crate owns the train/car state machine and the algorithms that
//! decide batching, speculative checking and bisection. It has no opinion on
//! how PRs arrive, how conditions are evaluated, or how the hosting platform
//! is actually called — those are the `HostApi` and `QueueRuleEvaluator`
//! capability traits, implemented elsewhere (`mergequeue-github`).

pub mod embarked_pull;
pub mod engine;
pub mod error;
pub mod host_api;
pub mod persistence;
pub mod refresh_orchestrator;
pub mod retry;
pub mod rule_evaluator;
pub mod signal;
pub mod summary;
pub mod train;
pub mod train_car;
pub mod unexpected_change;

pub use embarked_pull::{EmbarkedPull, PrNumber, QueueConfig, QueueRule, Sha, UpdateStrategy};
pub use engine::MergeQueueEngine;
pub use error::{Error, Result};
pub use host_api::{CheckRunUpdate, CheckSnapshot, HostApi, OpenPullRequest, PullView};
pub use persistence::{PersistenceAdapter, SqlitePersistence};
pub use refresh_orchestrator::{RefreshOrchestrator, SweepReport};
pub use retry::RetryPolicy;
pub use rule_evaluator::{EvaluatedRule, QueueRuleEvaluator, RuleConclusion};
pub use signal::{RefreshAction, RefreshSignal};
pub use train::{DelayedRefresh, RefreshReport, Train, TrainContext};
pub use train_car::{ChecksConclusion, CreationState, StartOutcome, TrainCar};
pub use unexpected_change::UnexpectedChange;
