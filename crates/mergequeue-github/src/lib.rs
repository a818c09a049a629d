//! Concrete `HostApi` for a GitHub-shaped hosting platform (spec §6.1).
//!
//! This crate owns the HTTP wire format; `mergequeue-core` only ever sees the
//! `HostApi` capability trait and the error taxonomy of spec §7.

pub mod client;
pub mod error;
pub mod evaluator;

pub use client::GitHubHost;
pub use evaluator::MergeableConditionEvaluator;
