//! Error types for mergequeue-core

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("host API transport error: {0}")]
    HostTransport(String),

    #[error("host API server error: status {0}")]
    HostServer(u16),

    #[error("host API rate limited, retry after {0:?}")]
    HostRateLimited(Option<Duration>),

    #[error("host API permission denied: {0}")]
    HostPermissionDenied(String),

    #[error("base does not exist: {0}")]
    BaseDoesNotExist(String),

    #[error("merge conflict: {0}")]
    MergeConflict(String),

    #[error("reference already exists: {0}")]
    ReferenceAlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("car creation postponed: {0}")]
    CarCreationPostponed(String),

    #[error("invalid state transition: {0} -> {1}")]
    InvalidStateTransition(String, String),

    #[error("queue rule not found: {0}")]
    QueueRuleNotFound(String),

    #[error("train not found for repo {0} ref {1}")]
    TrainNotFound(i64, String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for errors the general HostAPI retry policy should retry on:
    /// transport errors, 5xx, and rate limiting (spec §6.1/§7.1).
    pub fn is_host_transient(&self) -> bool {
        matches!(
            self,
            Error::HostTransport(_) | Error::HostServer(_) | Error::HostRateLimited(_)
        )
    }

    /// True for the narrower eventual-consistency condition retried by the
    /// car-starting merge loop (spec §4.2.2, §7.2).
    pub fn is_base_does_not_exist(&self) -> bool {
        matches!(self, Error::BaseDoesNotExist(_))
    }

    /// Retry-After value carried by a rate-limited response, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::HostRateLimited(d) => *d,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
