//! Deployment lifecycle unit tests

use discovery_engine::engine::lifecycle::{DeploymentFsm, LifecycleEvent};
use discovery_engine::models::deployment::DynamicDeploymentState;

const ALL_STATES: [DynamicDeploymentState; 5] = [
    DynamicDeploymentState::Disabled,
    DynamicDeploymentState::InProgress,
    DynamicDeploymentState::NoCandidate,
    DynamicDeploymentState::AllFailed,
    DynamicDeploymentState::Deployed,
];

const ALL_EVENTS: [LifecycleEvent; 8] = [
    LifecycleEvent::Activate,
    LifecycleEvent::Reevaluate,
    LifecycleEvent::RankingEmpty,
    LifecycleEvent::AllFailed,
    LifecycleEvent::Deployed,
    LifecycleEvent::Retained,
    LifecycleEvent::Deactivate,
    LifecycleEvent::Undeployed,
];

#[test]
fn test_only_activation_leaves_disabled() {
    for event in ALL_EVENTS {
        let next = DeploymentFsm::transition(DynamicDeploymentState::Disabled, event);
        if event == LifecycleEvent::Activate {
            assert_eq!(next, Ok(DynamicDeploymentState::InProgress));
        } else {
            assert!(next.is_err(), "{:?} left DISABLED", event);
        }
    }
}

#[test]
fn test_only_undeployment_reaches_disabled() {
    for state in ALL_STATES {
        for event in ALL_EVENTS {
            if let Ok(DynamicDeploymentState::Disabled) = DeploymentFsm::transition(state, event) {
                assert_eq!(state, DynamicDeploymentState::InProgress);
                assert_eq!(event, LifecycleEvent::Undeployed);
            }
        }
    }
}

#[test]
fn test_attempt_results_require_in_progress() {
    for state in ALL_STATES {
        let deployed = DeploymentFsm::transition(state, LifecycleEvent::Deployed);
        let failed = DeploymentFsm::transition(state, LifecycleEvent::AllFailed);
        if state == DynamicDeploymentState::InProgress {
            assert_eq!(deployed, Ok(DynamicDeploymentState::Deployed));
            assert_eq!(failed, Ok(DynamicDeploymentState::AllFailed));
        } else {
            assert!(deployed.is_err());
            assert!(failed.is_err());
        }
    }
}

#[test]
fn test_redeployment_cycle() {
    let mut fsm = DeploymentFsm::new(DynamicDeploymentState::Deployed);

    // better candidate found
    fsm.process(LifecycleEvent::Reevaluate).unwrap();
    assert_eq!(fsm.state(), DynamicDeploymentState::InProgress);
    fsm.process(LifecycleEvent::Retained).unwrap();
    assert_eq!(fsm.state(), DynamicDeploymentState::Deployed);

    // all candidates vanished
    fsm.process(LifecycleEvent::RankingEmpty).unwrap();
    assert_eq!(fsm.state(), DynamicDeploymentState::NoCandidate);
    assert!(fsm.process(LifecycleEvent::Retained).is_err());
    assert_eq!(fsm.state(), DynamicDeploymentState::NoCandidate);

    fsm.process(LifecycleEvent::Reevaluate).unwrap();
    fsm.process(LifecycleEvent::AllFailed).unwrap();
    assert_eq!(fsm.state(), DynamicDeploymentState::AllFailed);

    fsm.process(LifecycleEvent::Deactivate).unwrap();
    fsm.process(LifecycleEvent::Undeployed).unwrap();
    assert_eq!(fsm.state(), DynamicDeploymentState::Disabled);
}

#[test]
fn test_invalid_transition_message() {
    let err = DeploymentFsm::transition(DynamicDeploymentState::Deployed, LifecycleEvent::Undeployed)
        .unwrap_err();
    assert!(err.starts_with("Invalid transition"));
}
