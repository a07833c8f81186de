//! FSM tests

use piped::deploy::fsm::{DeploymentEvent, DeploymentFsm, StageFsm, StageTransition};
use piped::deploy::DeploymentStatus;
use piped::sdk::StageStatus;

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::new();
    assert_eq!(fsm.state(), DeploymentStatus::Pending);
    assert!(fsm.reason().is_none());
    assert!(fsm.rollback_outcome().is_none());
}

#[test]
fn test_fsm_failure_without_rollback() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::Start).unwrap();
    fsm.process(DeploymentEvent::Fail("stage PLAN (0) failed".to_string()))
        .unwrap();

    assert_eq!(fsm.state(), DeploymentStatus::Failure);
    assert_eq!(fsm.reason(), Some("stage PLAN (0) failed"));
    assert!(fsm.rollback_outcome().is_none());
}

#[test]
fn test_fsm_restore_continues_rollback() {
    let mut fsm = DeploymentFsm::restore(
        DeploymentStatus::RollingBack,
        Some("apply failed".to_string()),
        None,
    );

    fsm.process(DeploymentEvent::FinishRollback("rollback completed".to_string()))
        .unwrap();

    assert_eq!(fsm.state(), DeploymentStatus::Failure);
    assert_eq!(fsm.reason(), Some("apply failed"));
    assert_eq!(fsm.rollback_outcome(), Some("rollback completed"));
}

#[test]
fn test_fsm_terminal_states_are_final() {
    let mut fsm = DeploymentFsm::new();
    fsm.process(DeploymentEvent::Start).unwrap();
    fsm.process(DeploymentEvent::Succeed).unwrap();

    assert!(fsm.process(DeploymentEvent::Start).is_err());
    assert!(fsm.process(DeploymentEvent::Fail("late".to_string())).is_err());
    assert_eq!(fsm.state(), DeploymentStatus::Success);
    assert!(fsm.reason().is_none());
}

#[test]
fn test_fsm_pending_cannot_succeed() {
    let mut fsm = DeploymentFsm::new();
    assert!(fsm.process(DeploymentEvent::Succeed).is_err());
    assert!(fsm
        .process(DeploymentEvent::StartRollback("x".to_string()))
        .is_err());
}

#[test]
fn test_stage_approval_flow() {
    let mut fsm = StageFsm::new(StageStatus::Pending);

    fsm.process(StageTransition::AwaitApproval).unwrap();
    assert_eq!(fsm.state(), StageStatus::WaitingApproval);

    // approval may only be awaited once
    assert!(fsm.process(StageTransition::AwaitApproval).is_err());

    fsm.process(StageTransition::Start).unwrap();
    fsm.process(StageTransition::Succeed).unwrap();
    assert_eq!(fsm.state(), StageStatus::Success);
}

#[test]
fn test_stage_skip_while_waiting() {
    let mut fsm = StageFsm::new(StageStatus::WaitingApproval);
    fsm.process(StageTransition::Skip("skipped by operator".to_string()))
        .unwrap();

    assert_eq!(fsm.state(), StageStatus::Skipped);
    assert_eq!(fsm.reason(), Some("skipped by operator"));
    assert!(fsm.process(StageTransition::Start).is_err());
}

#[test]
fn test_stage_resume_requires_running() {
    let mut fsm = StageFsm::new(StageStatus::Pending);
    assert!(fsm.process(StageTransition::Resume).is_err());

    let mut fsm = StageFsm::new(StageStatus::Running);
    fsm.process(StageTransition::Resume).unwrap();
    fsm.process(StageTransition::Fail("tofu apply exited with status 1".to_string()))
        .unwrap();
    assert_eq!(fsm.state(), StageStatus::Failure);
    assert_eq!(fsm.reason(), Some("tofu apply exited with status 1"));
}
