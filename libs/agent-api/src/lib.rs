//! Wire models for the piped operator API.
//!
//! These types are shared by the agent's HTTP handlers and by any client
//! driving the agent (the control plane, CLI tooling, tests).

pub mod models;
