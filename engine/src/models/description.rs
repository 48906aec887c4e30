//! Device descriptions as supplied by discovery repositories

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::utils::epoch_millis;

/// Description of one physical device, as returned by a discovery repository
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceDescription {
    pub name: Option<String>,

    /// Free text, indexed for text-relevance scoring
    pub description: Option<String>,

    pub keywords: Vec<String>,

    /// Informal location text
    pub location: Option<String>,

    pub identifiers: DeviceIdentifiers,

    pub capabilities: Vec<DeviceCapability>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshDetails>,

    #[serde(
        rename = "lastUpdate",
        alias = "last_update",
        with = "epoch_millis::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_update: Option<DateTime<Utc>>,
}

impl DeviceDescription {
    /// MAC address in lower case, the identity of a description
    pub fn mac_key(&self) -> Option<String> {
        self.identifiers
            .mac_address
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_lowercase)
    }

    /// A description is usable only when it can be identified
    pub fn is_valid(&self) -> bool {
        self.mac_key().is_some()
    }

    pub fn capability(&self, name: &str) -> Option<&CapabilityValue> {
        self.capabilities
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .map(|c| &c.value)
    }

    pub fn same_device(&self, other: &DeviceDescription) -> bool {
        match (self.mac_key(), other.mac_key()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Whether both descriptions carry timestamps and this one is strictly older
    pub fn is_older_than(&self, other: &DeviceDescription) -> bool {
        match (self.last_update, other.last_update) {
            (Some(this), Some(other)) => this < other,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceIdentifiers {
    pub mac_address: Option<String>,
    #[serde(rename = "type")]
    pub device_type: Option<String>,
    pub model_name: Option<String>,
    pub manufacturer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCapability {
    pub name: String,
    pub value: CapabilityValue,
}

/// Capability value; repositories send plain JSON scalars
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    Boolean(bool),
    Number(f64),
    Text(String),
}

impl CapabilityValue {
    pub fn as_text(&self) -> String {
        match self {
            CapabilityValue::Boolean(b) => b.to_string(),
            CapabilityValue::Number(n) => n.to_string(),
            CapabilityValue::Text(s) => s.clone(),
        }
    }

    /// Numeric view; text is parsed leniently
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CapabilityValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            CapabilityValue::Number(n) => Some(*n),
            CapabilityValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CapabilityValue::Boolean(b) => Some(*b),
            CapabilityValue::Number(n) => Some(*n != 0.0),
            CapabilityValue::Text(s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
        }
    }
}

/// SSH connection details of a candidate device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshDetails {
    pub ip_address: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    pub username: String,

    #[serde(default, serialize_with = "serialize_secret_opt")]
    pub password: Option<SecretString>,

    #[serde(default, serialize_with = "serialize_secret_opt")]
    pub private_key: Option<SecretString>,
}

fn default_ssh_port() -> u16 {
    22
}

pub(crate) fn serialize_secret_opt<S>(
    value: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(secret) => serializer.serialize_some(secret.expose_secret()),
        None => serializer.serialize_none(),
    }
}
