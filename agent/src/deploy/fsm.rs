//! Finite state machines for deployments and their stages

use crate::deploy::model::DeploymentStatus;
use crate::errors::AgentError;
use crate::sdk::StageStatus;

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Begin running forward stages
    Start,

    /// Every forward stage finished without failure
    Succeed,

    /// A forward stage failed and there is nothing to roll back
    Fail(String),

    /// A forward stage failed; rollback stages run next
    StartRollback(String),

    /// Rollback stages finished; carries their outcome
    FinishRollback(String),
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentStatus,
    reason: Option<String>,
    rollback_outcome: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self::restore(DeploymentStatus::Pending, None, None)
    }

    /// Continue from a persisted state
    pub fn restore(
        state: DeploymentStatus,
        reason: Option<String>,
        rollback_outcome: Option<String>,
    ) -> Self {
        Self {
            state,
            reason,
            rollback_outcome,
        }
    }

    pub fn state(&self) -> DeploymentStatus {
        self.state
    }

    /// The forward failure, once there is one
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn rollback_outcome(&self) -> Option<&str> {
        self.rollback_outcome.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<(), AgentError> {
        let new_state = match (&self.state, &event) {
            (DeploymentStatus::Pending, DeploymentEvent::Start) => DeploymentStatus::Running,

            (DeploymentStatus::Running, DeploymentEvent::Succeed) => DeploymentStatus::Success,
            (DeploymentStatus::Running, DeploymentEvent::Fail(reason)) => {
                self.reason = Some(reason.clone());
                DeploymentStatus::Failure
            }
            (DeploymentStatus::Running, DeploymentEvent::StartRollback(reason)) => {
                self.reason = Some(reason.clone());
                DeploymentStatus::RollingBack
            }

            // the forward failure stays the deployment's reason
            (DeploymentStatus::RollingBack, DeploymentEvent::FinishRollback(outcome)) => {
                self.rollback_outcome = Some(outcome.clone());
                DeploymentStatus::Failure
            }

            // a deployment that cannot proceed fails from any live state
            (DeploymentStatus::Pending, DeploymentEvent::Fail(reason))
            | (DeploymentStatus::RollingBack, DeploymentEvent::Fail(reason)) => {
                if self.reason.is_none() {
                    self.reason = Some(reason.clone());
                }
                DeploymentStatus::Failure
            }

            (state, event) => {
                return Err(AgentError::TransitionError(format!(
                    "deployment {:?} -> {:?}",
                    state, event
                )));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}

/// Stage event
#[derive(Debug, Clone)]
pub enum StageTransition {
    /// Hold until the operator approves
    AwaitApproval,

    /// Hand the stage to its plugin
    Start,

    /// Re-invoke a stage that was running when the agent stopped
    Resume,

    Succeed,

    Fail(String),

    Skip(String),
}

/// Stage FSM
#[derive(Debug, Clone)]
pub struct StageFsm {
    state: StageStatus,
    reason: Option<String>,
}

impl StageFsm {
    pub fn new(state: StageStatus) -> Self {
        Self {
            state,
            reason: None,
        }
    }

    pub fn state(&self) -> StageStatus {
        self.state
    }

    /// Reason attached by the last transition
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Process an event and transition state. Terminal states accept nothing.
    pub fn process(&mut self, event: StageTransition) -> Result<(), AgentError> {
        use StageStatus::*;

        let (new_state, reason) = match (&self.state, &event) {
            (Pending, StageTransition::AwaitApproval) => (WaitingApproval, None),

            (Pending, StageTransition::Start) | (WaitingApproval, StageTransition::Start) => {
                (Running, None)
            }
            (Running, StageTransition::Resume) => {
                (Running, Some("re-invoked after restart".to_string()))
            }

            (Running, StageTransition::Succeed) => (Success, None),

            (Pending | WaitingApproval | Running, StageTransition::Fail(reason)) => {
                (Failure, Some(reason.clone()))
            }
            (Pending | WaitingApproval | Running, StageTransition::Skip(reason)) => {
                (Skipped, Some(reason.clone()))
            }

            (state, event) => {
                return Err(AgentError::TransitionError(format!(
                    "stage {:?} -> {:?}",
                    state, event
                )));
            }
        };

        self.state = new_state;
        self.reason = reason;
        Ok(())
    }
}
