//! Request topics of discovery repositories

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::DiscoveryError;

/// Lower bound of the reply collection window, in milliseconds
pub const MIN_TIMEOUT_MS: u64 = 10;
/// Upper bound of the reply collection window, in milliseconds
pub const MAX_TIMEOUT_MS: u64 = 60_000;

/// A topic under which discovery repositories receive requests
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestTopic {
    pub id: String,

    /// User owning the topic; part of the full topic path
    pub owner: String,

    pub suffix: String,

    /// Reply collection window in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,

    /// Number of replies after which collection stops early; `None` waits for the full window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_replies: Option<usize>,
}

fn default_timeout_ms() -> u64 {
    MAX_TIMEOUT_MS
}

impl RequestTopic {
    pub fn new(id: impl Into<String>, owner: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            suffix: suffix.into(),
            timeout: default_timeout_ms(),
            expected_replies: None,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = timeout_ms;
        self
    }

    pub fn with_expected_replies(mut self, expected_replies: usize) -> Self {
        self.expected_replies = Some(expected_replies);
        self
    }

    /// Full topic path: `{owner}/discovery/{suffix}`
    pub fn full_topic(&self) -> String {
        format!("{}/discovery/{}", self.owner, self.suffix)
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.owner.trim().is_empty() || self.suffix.trim().is_empty() {
            return Err(DiscoveryError::invalid_argument(format!(
                "request topic '{}' needs an owner and a suffix",
                self.id
            )));
        }
        if self.suffix.contains(['+', '#']) {
            return Err(DiscoveryError::invalid_argument(format!(
                "request topic suffix '{}' must not contain wildcards",
                self.suffix
            )));
        }
        if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&self.timeout) {
            return Err(DiscoveryError::invalid_argument(format!(
                "request topic '{}' timeout {} ms is outside {}..={} ms",
                self.id, self.timeout, MIN_TIMEOUT_MS, MAX_TIMEOUT_MS
            )));
        }
        if self.expected_replies == Some(0) {
            return Err(DiscoveryError::invalid_argument(format!(
                "request topic '{}' must expect at least one reply",
                self.id
            )));
        }
        Ok(())
    }
}
