//! User facing record of what a discovery task did

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::epoch_millis;

/// What caused a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogTrigger {
    User,
    System,
    DiscoveryRepository,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogMessageType {
    Info,
    Success,
    Undesirable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMessage {
    #[serde(rename = "type")]
    pub message_type: LogMessageType,
    pub message: String,
    #[serde(with = "epoch_millis")]
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryLog {
    pub trigger: LogTrigger,
    pub description: String,
    #[serde(with = "epoch_millis")]
    pub start: DateTime<Utc>,
    #[serde(with = "epoch_millis::option", default)]
    pub end: Option<DateTime<Utc>>,
    pub messages: Vec<LogMessage>,
}

impl DiscoveryLog {
    pub fn new(trigger: LogTrigger, description: impl Into<String>) -> Self {
        Self {
            trigger,
            description: description.into(),
            start: Utc::now(),
            end: None,
            messages: Vec::new(),
        }
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(LogMessageType::Info, message);
    }

    pub fn success(&mut self, message: impl Into<String>) {
        self.push(LogMessageType::Success, message);
    }

    pub fn undesirable(&mut self, message: impl Into<String>) {
        self.push(LogMessageType::Undesirable, message);
    }

    pub fn finish(&mut self) {
        self.end = Some(Utc::now());
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn push(&mut self, message_type: LogMessageType, message: impl Into<String>) {
        self.messages.push(LogMessage {
            message_type,
            message: message.into(),
            time: Utc::now(),
        });
    }
}

/// Most recent logs per dynamic deployment
#[derive(Debug)]
pub struct DiscoveryLogBook {
    capacity: usize,
    logs: HashMap<String, VecDeque<DiscoveryLog>>,
}

impl DiscoveryLogBook {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            logs: HashMap::new(),
        }
    }

    /// Stores a log, dropping the oldest one of the deployment when full
    pub fn record(&mut self, deployment_id: &str, log: DiscoveryLog) {
        let logs = self.logs.entry(deployment_id.to_string()).or_default();
        if logs.len() == self.capacity {
            logs.pop_front();
        }
        logs.push_back(log);
    }

    /// Oldest first
    pub fn logs(&self, deployment_id: &str) -> Vec<DiscoveryLog> {
        self.logs
            .get(deployment_id)
            .map(|logs| logs.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn remove(&mut self, deployment_id: &str) {
        self.logs.remove(deployment_id);
    }
}
