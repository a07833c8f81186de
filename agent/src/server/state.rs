//! Server state

use std::sync::Arc;

use crate::deploy::engine::Engine;

/// Server state shared across handlers
pub struct ServerState {
    pub engine: Arc<Engine>,
}

impl ServerState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}
