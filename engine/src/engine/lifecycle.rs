//! Finite state machine of a dynamic deployment

use crate::models::deployment::DynamicDeploymentState;

/// Lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// User enabled the deployment
    Activate,

    /// Ranking changed, deployment attempts follow
    Reevaluate,

    /// No candidate fulfils the template
    RankingEmpty,

    /// Every ranked candidate refused the operator
    AllFailed,

    /// Operator installed on a new device
    Deployed,

    /// Current device keeps the operator
    Retained,

    /// User disabled the deployment
    Deactivate,

    /// Operator removed after disabling
    Undeployed,
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DynamicDeploymentState,
}

impl DeploymentFsm {
    pub fn new(state: DynamicDeploymentState) -> Self {
        Self { state }
    }

    /// Get current state
    pub fn state(&self) -> DynamicDeploymentState {
        self.state
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: LifecycleEvent) -> Result<(), String> {
        self.state = Self::transition(self.state, event)?;
        Ok(())
    }

    /// Target state of `event` in `state`
    pub fn transition(
        state: DynamicDeploymentState,
        event: LifecycleEvent,
    ) -> Result<DynamicDeploymentState, String> {
        use DynamicDeploymentState::*;

        let next = match (state, event) {
            // From Disabled only an activation leads anywhere
            (Disabled, LifecycleEvent::Activate) => InProgress,

            (InProgress | NoCandidate | AllFailed | Deployed, LifecycleEvent::Reevaluate) => {
                InProgress
            }
            (InProgress | NoCandidate | AllFailed | Deployed, LifecycleEvent::RankingEmpty) => {
                NoCandidate
            }

            (InProgress, LifecycleEvent::AllFailed) => AllFailed,
            (InProgress, LifecycleEvent::Deployed) => Deployed,
            (InProgress | Deployed, LifecycleEvent::Retained) => Deployed,

            (InProgress | NoCandidate | AllFailed | Deployed, LifecycleEvent::Deactivate) => {
                InProgress
            }
            (InProgress, LifecycleEvent::Undeployed) => Disabled,

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {} -> {:?}", state, event));
            }
        };
        Ok(next)
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new(DynamicDeploymentState::Disabled)
    }
}
