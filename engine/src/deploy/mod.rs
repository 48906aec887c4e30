//! Deployment of operators onto candidate devices

pub mod command;
pub mod executor;

use async_trait::async_trait;

use crate::errors::DiscoveryError;
use crate::models::deployment::{DeviceDetails, DynamicDeployment};

/// Installs and removes operators on devices
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Installs the deployment's operator; `Ok(true)` once it runs on the device
    async fn deploy(
        &self,
        deployment: &DynamicDeployment,
        device: &DeviceDetails,
    ) -> Result<bool, DiscoveryError>;

    async fn undeploy(
        &self,
        deployment: &DynamicDeployment,
        device: &DeviceDetails,
    ) -> Result<(), DiscoveryError>;

    async fn is_deployed(&self, deployment: &DynamicDeployment, device: &DeviceDetails) -> bool;
}
