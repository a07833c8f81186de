//! Deployment module
//!
//! Records, state machines, pipeline planning and the engine that runs
//! stages through plugins.

pub mod engine;
pub mod fsm;
pub mod model;
pub mod planner;
pub mod store;

pub use engine::{Engine, EngineOptions, EngineParts, Submission};
pub use model::{Deployment, DeploymentStatus, Stage, StageEvent};
pub use store::DeploymentStore;
