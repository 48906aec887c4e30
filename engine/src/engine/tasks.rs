//! Units of work scheduled by the discovery engine

use serde::Serialize;

use crate::engine::log::LogTrigger;
use crate::models::candidates::CandidateDevicesRevision;
use crate::models::template::DeviceTemplate;

/// Discovery task.
///
/// Template tasks own the candidate data of their template; deployment tasks
/// only read it.
#[derive(Debug, Clone)]
pub enum DiscoveryTask {
    /// Query the repositories and store the candidates, subscribing for changes
    UpdateCandidateDevices {
        template: DeviceTemplate,
        force: bool,
        trigger: LogTrigger,
    },

    /// Apply a repository's revision to the stored candidates
    ReviseCandidateDevices {
        template_id: String,
        repository_name: String,
        revision: CandidateDevicesRevision,
    },

    /// Drop the stored candidates and the subscription
    DeleteCandidateDevices {
        template: DeviceTemplate,
        force: bool,
        trigger: LogTrigger,
    },

    /// Deploy the operator on the best ranked candidate
    DeployByRanking {
        deployment_id: String,
        template_id: String,
        trigger: LogTrigger,
    },

    /// Remove the operator from its device
    Undeploy {
        deployment_id: String,
        template_id: String,
        trigger: LogTrigger,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    UpdateCandidateDevices,
    ReviseCandidateDevices,
    DeleteCandidateDevices,
    DeployByRanking,
    Undeploy,
}

impl DiscoveryTask {
    pub fn kind(&self) -> TaskKind {
        match self {
            DiscoveryTask::UpdateCandidateDevices { .. } => TaskKind::UpdateCandidateDevices,
            DiscoveryTask::ReviseCandidateDevices { .. } => TaskKind::ReviseCandidateDevices,
            DiscoveryTask::DeleteCandidateDevices { .. } => TaskKind::DeleteCandidateDevices,
            DiscoveryTask::DeployByRanking { .. } => TaskKind::DeployByRanking,
            DiscoveryTask::Undeploy { .. } => TaskKind::Undeploy,
        }
    }

    /// Template whose candidate data the task touches
    pub fn template_id(&self) -> &str {
        match self {
            DiscoveryTask::UpdateCandidateDevices { template, .. }
            | DiscoveryTask::DeleteCandidateDevices { template, .. } => &template.id,
            DiscoveryTask::ReviseCandidateDevices { template_id, .. }
            | DiscoveryTask::DeployByRanking { template_id, .. }
            | DiscoveryTask::Undeploy { template_id, .. } => template_id,
        }
    }

    /// Set for deployment level tasks
    pub fn deployment_id(&self) -> Option<&str> {
        match self {
            DiscoveryTask::DeployByRanking { deployment_id, .. }
            | DiscoveryTask::Undeploy { deployment_id, .. } => Some(deployment_id),
            _ => None,
        }
    }

    /// Whether the task reads the template's candidate devices
    pub fn reads_candidates(&self) -> bool {
        matches!(self, DiscoveryTask::DeployByRanking { .. })
    }

    pub fn trigger(&self) -> LogTrigger {
        match self {
            DiscoveryTask::UpdateCandidateDevices { trigger, .. }
            | DiscoveryTask::DeleteCandidateDevices { trigger, .. }
            | DiscoveryTask::DeployByRanking { trigger, .. }
            | DiscoveryTask::Undeploy { trigger, .. } => *trigger,
            DiscoveryTask::ReviseCandidateDevices { .. } => LogTrigger::DiscoveryRepository,
        }
    }

    pub fn is_user_created(&self) -> bool {
        self.trigger() == LogTrigger::User
    }

    pub fn description(&self) -> String {
        match self {
            DiscoveryTask::UpdateCandidateDevices { template, force, .. } => format!(
                "Update candidate devices of {}{}",
                template.display_name(),
                if *force { " (forced)" } else { "" }
            ),
            DiscoveryTask::ReviseCandidateDevices {
                repository_name,
                revision,
                ..
            } => format!(
                "Revise candidate devices from {}: {}",
                repository_name,
                revision.summary()
            ),
            DiscoveryTask::DeleteCandidateDevices { template, .. } => {
                format!("Delete candidate devices of {}", template.display_name())
            }
            DiscoveryTask::DeployByRanking { .. } => "Deploy by ranking".to_string(),
            DiscoveryTask::Undeploy { .. } => "Undeploy".to_string(),
        }
    }
}
