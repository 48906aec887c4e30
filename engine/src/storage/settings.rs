//! Settings file management

use serde::{Deserialize, Serialize};

use crate::errors::DiscoveryError;
use crate::logs::LogLevel;

/// Daemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// MQTT broker configuration; an empty host selects the in-process bus
    #[serde(default)]
    pub mqtt_broker: MqttBrokerSettings,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub deployer: DeployerSettings,

    /// Write repository changes back to the repositories directory
    #[serde(default = "default_true")]
    pub persist_repositories: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            mqtt_broker: MqttBrokerSettings::default(),
            engine: EngineSettings::default(),
            deployer: DeployerSettings::default(),
            persist_repositories: true,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.engine.worker_pool_size == 0 {
            return Err(DiscoveryError::ConfigError(
                "engine.worker_pool_size must be at least 1".to_string(),
            ));
        }
        if self.deployer.command_timeout_secs == 0 {
            return Err(DiscoveryError::ConfigError(
                "deployer.command_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// MQTT broker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttBrokerSettings {
    /// Broker host
    #[serde(default)]
    pub host: String,

    /// Broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Use TLS
    #[serde(default = "default_true")]
    pub tls: bool,

    /// Optional path to a PEM-encoded CA certificate for broker TLS verification.
    /// When absent, the system certificate store is used.
    #[serde(default)]
    pub ca_cert_path: Option<String>,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

fn default_mqtt_port() -> u16 {
    8883
}

fn default_client_id() -> String {
    "discoveryd".to_string()
}

impl Default for MqttBrokerSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_mqtt_port(),
            tls: true,
            ca_cert_path: None,
            client_id: default_client_id(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Tasks executed concurrently
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Resume deployments and subscriptions on startup
    #[serde(default = "default_true")]
    pub resume_on_startup: bool,

    /// Discovery logs kept per dynamic deployment
    #[serde(default = "default_discovery_log_capacity")]
    pub discovery_log_capacity: usize,
}

fn default_worker_pool_size() -> usize {
    5
}

fn default_discovery_log_capacity() -> usize {
    50
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            resume_on_startup: true,
            discovery_log_capacity: default_discovery_log_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployerSettings {
    #[serde(default)]
    pub deploy_command: String,

    #[serde(default)]
    pub undeploy_command: String,

    #[serde(default)]
    pub status_command: String,

    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_command_timeout_secs() -> u64 {
    120
}

impl Default for DeployerSettings {
    fn default() -> Self {
        Self {
            deploy_command: String::new(),
            undeploy_command: String::new(),
            status_command: String::new(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}
