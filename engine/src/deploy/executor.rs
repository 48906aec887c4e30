//! Walks a ranking until the operator runs somewhere

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::deploy::Deployer;
use crate::errors::DiscoveryError;
use crate::models::candidates::CandidateDevicesRanking;
use crate::models::deployment::{DeviceDetails, DynamicDeployment};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentResult {
    Deployed,
    AllFailed,
    EmptyRanking,
}

/// One deployment attempt on a ranked candidate
#[derive(Debug, Clone)]
pub struct DeploymentAttempt {
    pub mac_address: String,
    pub score: f64,
    pub error: Option<String>,
}

impl DeploymentAttempt {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct DeploymentOutcome {
    pub result: DeploymentResult,
    /// Device now running the operator
    pub device: Option<DeviceDetails>,
    pub attempts: Vec<DeploymentAttempt>,
}

impl DeploymentOutcome {
    fn new(result: DeploymentResult) -> Self {
        Self {
            result,
            device: None,
            attempts: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct DeploymentExecutor {
    deployer: Arc<dyn Deployer>,
}

impl DeploymentExecutor {
    pub fn new(deployer: Arc<dyn Deployer>) -> Self {
        Self { deployer }
    }

    /// Whether the operator runs on the deployment's last device
    pub async fn is_deployed(&self, deployment: &DynamicDeployment) -> bool {
        match &deployment.last_device_details {
            Some(device) => self.deployer.is_deployed(deployment, device).await,
            None => false,
        }
    }

    /// Deploys on the best candidate scoring above `min_score_exclusive`.
    ///
    /// The device in `last_device_details` is skipped and, after a successful
    /// deployment elsewhere, undeployed.
    pub async fn deploy_by_ranking(
        &self,
        deployment: &DynamicDeployment,
        ranking: &CandidateDevicesRanking,
        min_score_exclusive: f64,
    ) -> DeploymentOutcome {
        if ranking.is_empty() {
            return DeploymentOutcome::new(DeploymentResult::EmptyRanking);
        }

        let current = deployment.last_device_details.as_ref();
        let mut outcome = DeploymentOutcome::new(DeploymentResult::AllFailed);

        for candidate in ranking {
            if candidate.score <= min_score_exclusive {
                debug!(
                    "Stopping at score {} (must exceed {})",
                    candidate.score, min_score_exclusive
                );
                break;
            }
            if current.is_some_and(|c| c.is_device(&candidate.description)) {
                continue;
            }
            let mac_address = candidate.description.mac_key().unwrap_or_default();

            let Some(device) = DeviceDetails::from_description(&candidate.description) else {
                outcome.attempts.push(DeploymentAttempt {
                    mac_address,
                    score: candidate.score,
                    error: Some("no SSH access details".to_string()),
                });
                continue;
            };

            info!(
                "Deploying {} on {} (score {:.3})",
                deployment.display_name(),
                device.mac_address,
                candidate.score
            );
            let error = match self.deployer.deploy(deployment, &device).await {
                Ok(true) => None,
                Ok(false) => Some("operator did not start".to_string()),
                Err(e) => Some(e.to_string()),
            };
            let succeeded = error.is_none();
            if let Some(error) = &error {
                warn!("Deployment on {} failed: {}", device.mac_address, error);
            }
            outcome.attempts.push(DeploymentAttempt {
                mac_address,
                score: candidate.score,
                error,
            });

            if succeeded {
                if let Some(previous) = current {
                    if let Err(e) = self.deployer.undeploy(deployment, previous).await {
                        warn!("Failed to undeploy from {}: {}", previous.mac_address, e);
                    }
                }
                outcome.result = DeploymentResult::Deployed;
                outcome.device = Some(device);
                return outcome;
            }
        }

        outcome
    }

    /// Removes the operator from the deployment's last device
    pub async fn undeploy(&self, deployment: &DynamicDeployment) -> Result<(), DiscoveryError> {
        let Some(device) = &deployment.last_device_details else {
            return Ok(());
        };
        info!(
            "Undeploying {} from {}",
            deployment.display_name(),
            device.mac_address
        );
        self.deployer.undeploy(deployment, device).await
    }
}
