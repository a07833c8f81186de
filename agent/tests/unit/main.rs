//! Integration tests for piped

mod test_engine;
mod test_fsm;
mod test_opentofu;
mod test_server;
mod test_tools;
