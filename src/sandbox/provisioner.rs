//! Turns a validated bundle and a resolved policy into a running container.
//!
//! Steps run strictly in order: image, create, file transfer, start. A
//! failure after the container exists removes it before the error is
//! returned, so a failed provisioning never leaves a container behind.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::bundle::ToolBundle;
use super::engine::{ContainerEngine, ContainerLimits, ContainerSpec};
use super::language::Language;
use super::policy::ResourcePolicy;
use crate::config::ContainerConfig;
use crate::error::ProvisioningError;

/// Process slots granted per allowed process (runtimes spawn helper threads,
/// and the kernel pids limit counts threads)
pub const THREAD_HEADROOM: i64 = 8;

/// Label marking containers owned by this service
pub const LABEL_MANAGED: &str = "managed";
/// Label carrying the owning session id
pub const LABEL_SESSION: &str = "session_id";

/// What the provisioner needs to know about one session
#[derive(Debug, Clone, Copy)]
pub struct ProvisionRequest<'a> {
    pub session_id: &'a str,
    pub policy: &'a ResourcePolicy,
    pub bundle: &'a ToolBundle,
    pub language: Language,
    pub env: &'a HashMap<String, String>,
}

/// A started container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedContainer {
    pub container_id: String,
    pub image: String,
    pub entry: String,
    pub command: Vec<String>,
}

pub struct ContainerProvisioner {
    engine: Arc<dyn ContainerEngine>,
    config: ContainerConfig,
}

impl ContainerProvisioner {
    pub fn new(engine: Arc<dyn ContainerEngine>, config: ContainerConfig) -> Self {
        ContainerProvisioner { engine, config }
    }

    /// Fully qualified label key, e.g. `toolrun.session_id`
    pub fn label(&self, key: &str) -> String {
        format!("{}.{}", self.config.label_prefix, key)
    }

    /// Container name for a session
    pub fn container_name(&self, session_id: &str) -> String {
        format!("{}-{}", self.config.label_prefix, session_id)
    }

    /// Translate a policy into an engine container spec
    pub fn container_spec(
        &self,
        request: &ProvisionRequest<'_>,
        image: &str,
        command: Vec<String>,
    ) -> ContainerSpec {
        let policy = request.policy;
        let processes = i64::from(policy.max_processes) * THREAD_HEADROOM;

        let mut labels = HashMap::new();
        labels.insert(self.label(LABEL_MANAGED), "true".to_string());
        labels.insert(self.label(LABEL_SESSION), request.session_id.to_string());

        let mut tmpfs = HashMap::new();
        tmpfs.insert(policy.scratch.path.clone(), policy.scratch.mount_options());

        ContainerSpec {
            name: self.container_name(request.session_id),
            image: image.to_string(),
            cmd: command,
            env: policy.sandbox_env(request.session_id, request.language, request.env),
            working_dir: self.config.working_dir.clone(),
            user: self.config.user.clone(),
            labels,
            limits: ContainerLimits {
                memory_bytes: i64::try_from(policy.max_memory_bytes).unwrap_or(i64::MAX),
                nano_cpus: (self.config.cpu_limit * 1_000_000_000.0) as i64,
                cpu_shares: self.config.cpu_shares,
                pids_limit: processes,
                nofile: i64::try_from(policy.max_open_files).unwrap_or(i64::MAX),
                // Counted per UID host-wide, so only a backstop; pids_limit is the per-session cap
                nproc: processes,
            },
            network_enabled: policy.network_access,
            exposed_ports: if policy.network_access {
                policy.allowed_ports.iter().copied().collect()
            } else {
                Vec::new()
            },
            tmpfs,
            read_only_paths: policy.read_only_paths.clone(),
            masked_paths: policy.blocked_paths.clone(),
        }
    }

    /// Provision and start a container for one session
    pub async fn provision(
        &self,
        request: ProvisionRequest<'_>,
    ) -> Result<ProvisionedContainer, ProvisioningError> {
        let image = self.config.image_for(request.language);
        self.engine
            .ensure_image(&image)
            .await
            .map_err(|e| ProvisioningError::ImageUnavailable(format!("{}: {}", image, e)))?;

        let entry = request.language.resolve_entry(request.bundle);
        let command = request.language.command(&entry);
        let spec = self.container_spec(&request, &image, command.clone());

        let container_id = self
            .engine
            .create(&spec)
            .await
            .map_err(|e| ProvisioningError::Create(e.to_string()))?;
        debug!(
            "Created container {} for session {}",
            container_id, request.session_id
        );

        if let Err(e) = self.transfer_and_start(&container_id, request.bundle).await {
            self.discard(&container_id).await;
            return Err(e);
        }

        info!(
            "Session {} running in container {} ({} {})",
            request.session_id, container_id, request.language, entry
        );
        Ok(ProvisionedContainer {
            container_id,
            image,
            entry,
            command,
        })
    }

    async fn transfer_and_start(
        &self,
        container_id: &str,
        bundle: &ToolBundle,
    ) -> Result<(), ProvisioningError> {
        let archive =
            bundle_archive(bundle).map_err(|e| ProvisioningError::Transfer(e.to_string()))?;
        self.engine
            .put_archive(container_id, &self.config.working_dir, archive)
            .await
            .map_err(|e| ProvisioningError::Transfer(e.to_string()))?;

        self.engine
            .start(container_id)
            .await
            .map_err(|e| ProvisioningError::Start(e.to_string()))
    }

    async fn discard(&self, container_id: &str) {
        match self.engine.remove(container_id).await {
            Ok(()) => debug!("Removed container {} after failed provisioning", container_id),
            Err(e) if e.is_already_gone() => {}
            Err(e) => warn!(
                "Failed to remove container {} after failed provisioning: {}",
                container_id, e
            ),
        }
    }
}

/// Pack the bundle into an in-memory tar archive, files mode 0644
pub fn bundle_archive(bundle: &ToolBundle) -> std::io::Result<Vec<u8>> {
    let mtime = chrono::Utc::now().timestamp().max(0) as u64;
    let mut builder = tar::Builder::new(Vec::new());
    for file in &bundle.files {
        let data = file.content.as_bytes();
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(mtime);
        header.set_cksum();
        builder.append_data(&mut header, &file.filename, data)?;
    }
    builder.into_inner()
}
