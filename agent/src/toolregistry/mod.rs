//! Versioned external tool installation

pub mod installer;
pub mod registry;
pub mod template;

pub use installer::{ScriptInstaller, ToolInstaller};
pub use registry::{InstalledTool, ToolRegistry, ToolSpec};
