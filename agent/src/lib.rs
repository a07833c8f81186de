//! piped library
//!
//! Core modules of the deployment agent: the plugin contract, the stage
//! execution engine and the registries plugins depend on.

pub mod app;
pub mod artifacts;
pub mod cache;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logpersister;
pub mod logs;
pub mod platform;
pub mod plugins;
pub mod process;
pub mod reconciler;
pub mod sdk;
pub mod server;
pub mod storage;
pub mod toolregistry;
pub mod utils;
pub mod workers;
