//! Dynamic deployment models

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::models::description::{serialize_secret_opt, DeviceDescription};

/// Last known state of a dynamic deployment; written by the engine only
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DynamicDeploymentState {
    #[default]
    Disabled,
    InProgress,
    NoCandidate,
    AllFailed,
    Deployed,
}

impl fmt::Display for DynamicDeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DynamicDeploymentState::Disabled => "DISABLED",
            DynamicDeploymentState::InProgress => "IN_PROGRESS",
            DynamicDeploymentState::NoCandidate => "NO_CANDIDATE",
            DynamicDeploymentState::AllFailed => "ALL_FAILED",
            DynamicDeploymentState::Deployed => "DEPLOYED",
        };
        f.write_str(s)
    }
}

/// Snapshot of the device an operator is (or was last) deployed to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDetails {
    pub mac_address: String,
    pub ip_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default, serialize_with = "serialize_secret_opt")]
    pub password: Option<SecretString>,
    #[serde(default, serialize_with = "serialize_secret_opt")]
    pub private_key: Option<SecretString>,
}

fn default_port() -> u16 {
    22
}

impl DeviceDetails {
    /// Connection details of a candidate; `None` when it exposes no SSH access
    pub fn from_description(description: &DeviceDescription) -> Option<Self> {
        let mac_address = description.mac_key()?;
        let ssh = description.ssh.as_ref()?;
        if ssh.ip_address.trim().is_empty() {
            return None;
        }
        Some(Self {
            mac_address,
            ip_address: ssh.ip_address.clone(),
            port: ssh.port,
            username: ssh.username.clone(),
            password: ssh.password.clone(),
            private_key: ssh.private_key.clone(),
        })
    }

    pub fn is_device(&self, description: &DeviceDescription) -> bool {
        description
            .mac_key()
            .is_some_and(|mac| mac.eq_ignore_ascii_case(&self.mac_address))
    }
}

impl PartialEq for DeviceDetails {
    fn eq(&self, other: &Self) -> bool {
        self.mac_address.eq_ignore_ascii_case(&other.mac_address)
            && self.ip_address == other.ip_address
            && self.port == other.port
            && self.username == other.username
            && secret_eq(&self.password, &other.password)
            && secret_eq(&self.private_key, &other.private_key)
    }
}

fn secret_eq(a: &Option<SecretString>, b: &Option<SecretString>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.expose_secret() == b.expose_secret(),
        (None, None) => true,
        _ => false,
    }
}

/// Deployment of an operator that follows the best-ranked candidate device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicDeployment {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub owner: String,

    /// Operator to install on the selected device
    pub operator: String,

    /// Id of the device template used to find candidates
    pub device_template: String,

    /// User intent: the deployment should be active
    #[serde(default)]
    pub activating_intended: bool,

    #[serde(default)]
    pub last_state: DynamicDeploymentState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_device_details: Option<DeviceDetails>,
}

impl DynamicDeployment {
    pub fn new(
        id: impl Into<String>,
        owner: impl Into<String>,
        operator: impl Into<String>,
        device_template: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            owner: owner.into(),
            operator: operator.into(),
            device_template: device_template.into(),
            activating_intended: false,
            last_state: DynamicDeploymentState::Disabled,
            last_device_details: None,
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}
