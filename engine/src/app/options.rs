//! Application configuration options

use std::time::Duration;

use secrecy::SecretString;

use crate::deploy::command::CommandDeployerOptions;
use crate::engine::EngineOptions;
use crate::mqtt::client::MqttAddress;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::mqtt;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Use the broker; without it all traffic stays in-process
    pub enable_mqtt_worker: bool,

    /// MQTT worker options
    pub mqtt_worker: mqtt::Options,

    /// Discovery engine options
    pub engine: EngineOptions,

    /// Resume deployments and subscriptions on startup
    pub resume_on_startup: bool,

    /// Deployment commands
    pub deployer: CommandDeployerOptions,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions::default(),
            enable_mqtt_worker: true,
            mqtt_worker: mqtt::Options::default(),
            engine: EngineOptions::default(),
            resume_on_startup: true,
            deployer: CommandDeployerOptions::default(),
        }
    }
}

impl AppOptions {
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        let broker = &settings.mqtt_broker;
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions {
                layout,
                persist_repositories: settings.persist_repositories,
            },
            enable_mqtt_worker: !broker.host.is_empty(),
            mqtt_worker: mqtt::Options {
                broker_address: MqttAddress {
                    host: broker.host.clone(),
                    port: broker.port,
                    use_tls: broker.tls,
                    ca_cert_path: broker.ca_cert_path.clone(),
                    client_id: broker.client_id.clone(),
                    username: broker.username.clone(),
                    password: broker.password.clone().map(SecretString::from),
                },
                ..Default::default()
            },
            engine: EngineOptions {
                worker_pool_size: settings.engine.worker_pool_size,
                discovery_log_capacity: settings.engine.discovery_log_capacity,
            },
            resume_on_startup: settings.engine.resume_on_startup,
            deployer: CommandDeployerOptions {
                deploy_command: settings.deployer.deploy_command.clone(),
                undeploy_command: settings.deployer.undeploy_command.clone(),
                status_command: settings.deployer.status_command.clone(),
                command_timeout: Duration::from_secs(settings.deployer.command_timeout_secs),
            },
        }
    }
}

/// Lifecycle options for the daemon
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Write repository changes back to disk
    pub persist_repositories: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            layout: StorageLayout::default(),
            persist_repositories: true,
        }
    }
}
