//! Envelopes and bodies of the discovery repository protocol

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::models::candidates::CandidateDevicesRevision;
use crate::models::template::{DeviceRequirement, DeviceTemplate, ScoringCriterion};
use crate::utils::{epoch_millis, now_millis};

/// Body of a protocol message
pub trait MessageBody: Serialize + DeserializeOwned + Send + Sync {
    /// Value of the envelope's `type` field
    const TYPE_NAME: &'static str;

    /// Appended to a request topic when the body is published there
    const TOPIC_SUFFIX: &'static str = "";
}

/// Request sent to discovery repositories; replies go to `return_topic`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMessage<T> {
    #[serde(rename = "type")]
    pub type_name: String,

    pub message: T,

    #[serde(with = "epoch_millis")]
    pub time: DateTime<Utc>,

    pub return_topic: String,

    pub correlation_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
}

impl<T: MessageBody> RequestMessage<T> {
    pub fn new(body: T, return_topic: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            type_name: T::TYPE_NAME.to_string(),
            message: body,
            time: now_millis(),
            return_topic: return_topic.into(),
            correlation_id: correlation_id.into(),
            sender_name: None,
        }
    }
}

/// Reply of a discovery repository, either to a request or as a notification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyMessage<T> {
    #[serde(rename = "type", default)]
    pub type_name: String,

    pub message: T,

    #[serde(with = "epoch_millis::option", default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,

    /// Name of the replying repository
    #[serde(default)]
    pub sender_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl<T: MessageBody> ReplyMessage<T> {
    pub fn new(body: T, sender_name: impl Into<String>, correlation_id: Option<String>) -> Self {
        Self {
            type_name: T::TYPE_NAME.to_string(),
            message: body,
            time: Some(now_millis()),
            sender_name: sender_name.into(),
            correlation_id,
        }
    }
}

/// One-way message without a reply
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMessage<T> {
    #[serde(rename = "type")]
    pub type_name: String,

    pub message: T,

    #[serde(with = "epoch_millis")]
    pub time: DateTime<Utc>,
}

impl<T: MessageBody> CommandMessage<T> {
    pub fn new(body: T) -> Self {
        Self {
            type_name: T::TYPE_NAME.to_string(),
            message: body,
            time: now_millis(),
        }
    }
}

/// Query for the candidate devices of one device template
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateDevicesRequest {
    /// Template id; repositories echo it in the revisions they send
    pub reference_id: String,

    pub requirements: Vec<DeviceRequirement>,

    pub scoring_criteria: Vec<ScoringCriterion>,

    /// Set when the repository should keep notifying about changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_topic: Option<String>,
}

impl CandidateDevicesRequest {
    pub fn for_template(template: &DeviceTemplate, notification_topic: Option<String>) -> Self {
        Self {
            reference_id: template.id.clone(),
            requirements: template.requirements.clone(),
            scoring_criteria: template.scoring_criteria.clone(),
            notification_topic,
        }
    }
}

impl MessageBody for CandidateDevicesRequest {
    const TYPE_NAME: &'static str = "query";
    const TOPIC_SUFFIX: &'static str = "query";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateDevicesReply {
    #[serde(default)]
    pub revisions: Vec<CandidateDevicesRevision>,
}

impl CandidateDevicesReply {
    pub fn first_revision(&self) -> Option<&CandidateDevicesRevision> {
        self.revisions.first()
    }
}

impl MessageBody for CandidateDevicesReply {
    const TYPE_NAME: &'static str = "query_reply";
}

/// Ends the standing subscriptions of the referenced templates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelSubscriptionsMessage {
    pub reference_ids: BTreeSet<String>,
}

impl CancelSubscriptionsMessage {
    pub fn new(reference_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            reference_ids: reference_ids.into_iter().collect(),
        }
    }
}

impl MessageBody for CancelSubscriptionsMessage {
    const TYPE_NAME: &'static str = "cancel_subscriptions";
    const TOPIC_SUFFIX: &'static str = "cancel";
}

/// Asks repositories to identify themselves
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryTestRequest {}

impl MessageBody for RepositoryTestRequest {
    const TYPE_NAME: &'static str = "test";
    const TOPIC_SUFFIX: &'static str = "test";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryTestReply {
    #[serde(default)]
    pub devices_count: usize,
}

impl MessageBody for RepositoryTestReply {
    const TYPE_NAME: &'static str = "test_reply";
}
