//! Configuration module - Modular configuration management
//!
//! Configuration is split into focused modules:
//! - types/mod.rs: Core configuration types (Config, ServerConfig)
//! - types/orchestrator.rs: Session timing, buffering and monitoring
//! - types/sandbox.rs: Container engine, images and policy limits
//! - types/security.rs: Scan gate policy
//! - io.rs: Configuration loading and saving
//! - validation.rs: Configuration validation
//! - paths.rs: Configuration file paths

mod io;
mod paths;
mod types;
mod validation;

// Re-export core config types
pub use types::{Config, ServerConfig};

// Re-export orchestrator types
pub use types::orchestrator::{MonitorConfig, OrchestratorConfig};

// Re-export sandbox types
pub use types::sandbox::{ContainerConfig, EngineKind, PolicyConfig};

// Re-export security types
pub use types::security::ScanPolicy;

// Re-export IO and utilities
pub use io::{apply_env_overrides, load_config, load_config_from_path, save_config};
pub use paths::{config_dir, config_path};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};
