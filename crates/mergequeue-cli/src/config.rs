//! Loads queue-rule configuration from a YAML or TOML file on disk.
//!
//! This is the concrete, operator-facing edge of the queue-rule
//! configuration surface: the engine itself only knows about
//! `HashMap<String, QueueRule>`, and this module is where that map is
//! produced from a file the operator edits.

use mergequeue_core::QueueRule;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path} as YAML: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to parse {path} as TOML: {source}")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("{path} has no recognized extension (expected .yml, .yaml or .toml)")]
    UnknownExtension { path: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// One entry of a queue-rules file. `batch_max_wait_time_secs` mirrors
/// `QueueRule::batch_max_wait_time`'s wire representation (`duration_secs`
/// in `embarked_pull.rs`) but is spelled out with a unit suffix here since
/// operators edit this file by hand.
#[derive(Debug, Clone, Deserialize)]
struct QueueRuleEntry {
    #[serde(default = "default_batch_size")]
    batch_size: usize,
    #[serde(default)]
    batch_max_wait_time_secs: u64,
    #[serde(default = "default_speculative_checks")]
    speculative_checks: usize,
    #[serde(default = "default_true")]
    allow_checks_interruption: bool,
    #[serde(default = "default_true")]
    allow_inplace_checks: bool,
}

fn default_batch_size() -> usize {
    1
}

fn default_speculative_checks() -> usize {
    1
}

fn default_true() -> bool {
    true
}

/// The file shape: a top-level `queues` map from queue name to rule entry,
/// the same `orchestrate-cli` pipeline/schedule config files use for their
/// named-section layout.
#[derive(Debug, Deserialize)]
struct QueueRulesFile {
    queues: HashMap<String, QueueRuleEntry>,
}

/// A loaded, ready-to-use set of queue rules keyed by queue name.
#[derive(Debug, Clone, Default)]
pub struct QueueRulesConfig {
    pub rules: HashMap<String, QueueRule>,
}

impl QueueRulesConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path_str.clone(),
            source,
        })?;

        let file = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yml") | Some("yaml") => {
                serde_yaml::from_str::<QueueRulesFile>(&contents).map_err(|source| ConfigError::Yaml {
                    path: path_str.clone(),
                    source,
                })?
            }
            Some("toml") => {
                toml::from_str::<QueueRulesFile>(&contents).map_err(|source| ConfigError::Toml {
                    path: path_str.clone(),
                    source,
                })?
            }
            _ => return Err(ConfigError::UnknownExtension { path: path_str }),
        };

        let rules = file
            .queues
            .into_iter()
            .map(|(name, entry)| {
                let rule = QueueRule::new(&name)
                    .with_batch_size(entry.batch_size)
                    .with_batch_max_wait_time(Duration::from_secs(entry.batch_max_wait_time_secs))
                    .with_speculative_checks(entry.speculative_checks)
                    .with_allow_checks_interruption(entry.allow_checks_interruption)
                    .with_allow_inplace_checks(entry.allow_inplace_checks);
                (name, rule)
            })
            .collect();

        Ok(Self { rules })
    }
}
