//! Deployer running configured shell commands

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::deploy::Deployer;
use crate::errors::DiscoveryError;
use crate::models::deployment::{DeviceDetails, DynamicDeployment};

#[derive(Debug, Clone)]
pub struct CommandDeployerOptions {
    pub deploy_command: String,
    pub undeploy_command: String,
    /// Exit status 0 means the operator runs; empty trusts the last deployment
    pub status_command: String,
    pub command_timeout: Duration,
}

impl Default for CommandDeployerOptions {
    fn default() -> Self {
        Self {
            deploy_command: String::new(),
            undeploy_command: String::new(),
            status_command: String::new(),
            command_timeout: Duration::from_secs(120),
        }
    }
}

/// Runs `sh -c <command>` with the device and operator in the environment:
/// `DEVICE_MAC`, `DEVICE_IP`, `DEVICE_PORT`, `DEVICE_USER`, `DEVICE_PASSWORD`,
/// `DEVICE_PRIVATE_KEY`, `OPERATOR` and `DEPLOYMENT_ID`.
pub struct CommandDeployer {
    options: CommandDeployerOptions,
}

impl CommandDeployer {
    pub fn new(options: CommandDeployerOptions) -> Self {
        Self { options }
    }

    async fn run(
        &self,
        command: &str,
        deployment: &DynamicDeployment,
        device: &DeviceDetails,
    ) -> Result<bool, DiscoveryError> {
        if command.trim().is_empty() {
            return Err(DiscoveryError::ConfigError(
                "deployer command is not configured".to_string(),
            ));
        }

        let mut cmd = Command::new("sh");
        cmd.args(["-c", command])
            .env("DEVICE_MAC", &device.mac_address)
            .env("DEVICE_IP", &device.ip_address)
            .env("DEVICE_PORT", device.port.to_string())
            .env("DEVICE_USER", &device.username)
            .env("OPERATOR", &deployment.operator)
            .env("DEPLOYMENT_ID", &deployment.id)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(password) = &device.password {
            cmd.env("DEVICE_PASSWORD", password.expose_secret());
        }
        if let Some(private_key) = &device.private_key {
            cmd.env("DEVICE_PRIVATE_KEY", private_key.expose_secret());
        }

        debug!("Running deployer command for {}", device.mac_address);
        let child = cmd.spawn()?;
        let output = tokio::time::timeout(self.options.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                DiscoveryError::DeployError(format!(
                    "command timed out after {:?}",
                    self.options.command_timeout
                ))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                "Deployer command exited with {} for {}: {}",
                output.status,
                device.mac_address,
                stderr.trim()
            );
        }
        Ok(output.status.success())
    }
}

#[async_trait]
impl Deployer for CommandDeployer {
    async fn deploy(
        &self,
        deployment: &DynamicDeployment,
        device: &DeviceDetails,
    ) -> Result<bool, DiscoveryError> {
        self.run(&self.options.deploy_command, deployment, device).await
    }

    async fn undeploy(
        &self,
        deployment: &DynamicDeployment,
        device: &DeviceDetails,
    ) -> Result<(), DiscoveryError> {
        if self.run(&self.options.undeploy_command, deployment, device).await? {
            Ok(())
        } else {
            Err(DiscoveryError::DeployError(format!(
                "undeploy command failed for {}",
                device.mac_address
            )))
        }
    }

    async fn is_deployed(&self, deployment: &DynamicDeployment, device: &DeviceDetails) -> bool {
        if self.options.status_command.trim().is_empty() {
            return true;
        }
        match self.run(&self.options.status_command, deployment, device).await {
            Ok(running) => running,
            Err(e) => {
                warn!("Status check on {} failed: {}", device.mac_address, e);
                false
            }
        }
    }
}
