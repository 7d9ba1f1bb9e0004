//! Sandbox module - isolated container execution
//!
//! Everything between a tool bundle and a running, locked-down container:
//! - Bundles and language/entry detection
//! - Resource policies and the sandbox environment
//! - The container engine seam (Docker via bollard, plus an in-memory mock)
//! - Provisioning: image, create, file transfer, start

mod bundle;
mod container;
mod engine;
mod language;
pub mod mock;
mod policy;
mod provisioner;

pub use bundle::{BundleFile, ToolBundle, MAX_BUNDLE_BYTES, MAX_BUNDLE_FILES};
pub use container::DockerEngine;
pub use engine::{
    ContainerEngine, ContainerLimits, ContainerSpec, EngineStats, ExecOutput, LogChunk, LogStream,
};
pub use language::Language;
pub use mock::{MockBehavior, MockEngine, MockFailure};
pub use policy::{default_policy, PolicyCeilings, PolicyOverrides, ResourcePolicy, ScratchMount};
pub use provisioner::{
    bundle_archive, ContainerProvisioner, ProvisionRequest, ProvisionedContainer, LABEL_MANAGED,
    LABEL_SESSION, THREAD_HEADROOM,
};

use std::sync::Arc;

use crate::config::{ContainerConfig, EngineKind};
use crate::error::Result;

/// Create the container engine selected by the configuration
pub async fn create_engine(config: &ContainerConfig) -> Result<Arc<dyn ContainerEngine>> {
    match config.engine {
        EngineKind::Docker => {
            let engine = DockerEngine::connect().await?;
            Ok(Arc::new(engine))
        }
        EngineKind::Mock => Ok(Arc::new(MockEngine::with_default(
            MockBehavior::exits_with(0, &["mock execution finished"]),
        ))),
    }
}
