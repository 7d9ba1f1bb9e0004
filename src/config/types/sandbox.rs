//! Sandbox configuration types
//!
//! Container engine selection, runtime images and the resource policy
//! defaults and ceilings applied to every session.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::sandbox::{Language, PolicyCeilings, ResourcePolicy};

/// Which container engine backs the orchestrator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Local Docker daemon
    #[default]
    Docker,
    /// In-memory scripted engine (no containers are run)
    Mock,
}

impl std::str::FromStr for EngineKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" | "container" => Ok(EngineKind::Docker),
            "mock" | "fake" => Ok(EngineKind::Mock),
            _ => Err(crate::error::Error::Config(format!(
                "Invalid container engine: {}. Valid: docker, mock",
                s
            ))),
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Docker => write!(f, "docker"),
            EngineKind::Mock => write!(f, "mock"),
        }
    }
}

/// Container (Docker) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Engine backing the orchestrator
    #[serde(default)]
    pub engine: EngineKind,
    /// Per-language image overrides
    #[serde(default)]
    pub images: HashMap<Language, String>,
    /// CPU limit (number of CPUs)
    #[serde(default = "default_cpu")]
    pub cpu_limit: f64,
    /// Relative CPU weight
    #[serde(default = "default_cpu_shares")]
    pub cpu_shares: i64,
    /// `uid:gid` for the sandboxed process
    #[serde(default = "default_user")]
    pub user: String,
    /// Directory the bundle is written into
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
    /// Container name and label prefix
    #[serde(default = "default_label_prefix")]
    pub label_prefix: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        ContainerConfig {
            engine: EngineKind::default(),
            images: HashMap::new(),
            cpu_limit: default_cpu(),
            cpu_shares: default_cpu_shares(),
            user: default_user(),
            working_dir: default_working_dir(),
            label_prefix: default_label_prefix(),
        }
    }
}

impl ContainerConfig {
    /// Image for a language, honoring overrides
    pub fn image_for(&self, language: Language) -> String {
        self.images
            .get(&language)
            .cloned()
            .unwrap_or_else(|| language.default_image().to_string())
    }
}

fn default_cpu() -> f64 {
    1.0
}

fn default_cpu_shares() -> i64 {
    512
}

fn default_user() -> String {
    "65534:65534".to_string()
}

fn default_working_dir() -> String {
    "/workspace".to_string()
}

fn default_label_prefix() -> String {
    "toolrun".to_string()
}

/// Resource policy defaults and ceilings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Policy applied when the caller does not override anything
    #[serde(default)]
    pub defaults: ResourcePolicy,
    /// Bounds on caller overrides
    #[serde(default)]
    pub ceilings: PolicyCeilings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_kind_parsing() {
        assert_eq!("docker".parse::<EngineKind>().unwrap(), EngineKind::Docker);
        assert_eq!("mock".parse::<EngineKind>().unwrap(), EngineKind::Mock);
        assert!("podman".parse::<EngineKind>().is_err());
    }

    #[test]
    fn test_image_overrides() {
        let mut config = ContainerConfig::default();
        assert_eq!(config.image_for(Language::Python), "python:3.12-alpine");
        config
            .images
            .insert(Language::Python, "registry.local/python:3.12".to_string());
        assert_eq!(config.image_for(Language::Python), "registry.local/python:3.12");
        assert_eq!(config.user, "65534:65534");
    }
}
