//! Configuration types module
//!
//! One file per concern, re-exported from `crate::config`.

pub mod orchestrator;
pub mod sandbox;
pub mod security;

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Control API / event channel server
    #[serde(default)]
    pub server: ServerConfig,

    /// Session lifecycle and monitoring
    #[serde(default)]
    pub orchestrator: orchestrator::OrchestratorConfig,

    /// Container engine and images
    #[serde(default)]
    pub container: sandbox::ContainerConfig,

    /// Resource policy defaults and ceilings
    #[serde(default)]
    pub policy: sandbox::PolicyConfig,

    /// Scan gate
    #[serde(default)]
    pub security: security::ScanPolicy,
}

impl Config {
    /// Load configuration from files and environment variables
    ///
    /// 1. Default values
    /// 2. Config file (if present)
    /// 3. Environment variable overrides
    pub fn from_env() -> crate::error::Result<Self> {
        crate::config::load_config()
    }
}

/// Control API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the WebSocket event channel
    #[serde(default = "default_true")]
    pub websocket: bool,
    /// Header carrying the authenticated principal id
    #[serde(default = "default_principal_header")]
    pub principal_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: default_port(),
            bind: default_bind(),
            websocket: true,
            principal_header: default_principal_header(),
        }
    }
}

fn default_port() -> u16 {
    18790
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_principal_header() -> String {
    "x-principal-id".to_string()
}
