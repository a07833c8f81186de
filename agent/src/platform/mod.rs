//! Platform API clients

pub mod registry;

pub use registry::{ClientFactory, ClientRegistry};
