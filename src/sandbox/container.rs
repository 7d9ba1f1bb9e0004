//! Docker engine backed by bollard
//!
//! Translates [`ContainerSpec`]s into Docker create calls and exposes the
//! narrow [`ContainerEngine`] surface. "Already stopped" and "already gone"
//! responses are reported as success or [`Error::ContainerNotFound`] so
//! cleanup can be repeated safely.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, Stats, StatsOptions,
    StopContainerOptions, UploadToContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding, ResourcesUlimits};
use bollard::Docker;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::engine::{ContainerEngine, ContainerSpec, EngineStats, ExecOutput, LogChunk, LogStream};
use crate::error::{Error, Result};

/// Docker container engine
pub struct DockerEngine {
    /// Docker client, shared read-only by every session
    docker: Docker,
}

impl DockerEngine {
    /// Connect to the local Docker daemon and verify the connection
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Container(format!("Failed to connect to Docker: {}", e)))?;

        docker
            .ping()
            .await
            .map_err(|e| Error::Container(format!("Docker ping failed: {}", e)))?;

        info!("Container engine connected to Docker");

        Ok(DockerEngine { docker })
    }

    /// Wrap an existing client
    pub fn with_client(docker: Docker) -> Self {
        DockerEngine { docker }
    }

    fn host_config(spec: &ContainerSpec) -> HostConfig {
        let limits = &spec.limits;
        let port_bindings = if spec.network_enabled && !spec.exposed_ports.is_empty() {
            Some(
                spec.exposed_ports
                    .iter()
                    .map(|port| {
                        (
                            format!("{}/tcp", port),
                            Some(vec![PortBinding {
                                host_ip: Some("127.0.0.1".to_string()),
                                host_port: None,
                            }]),
                        )
                    })
                    .collect::<HashMap<_, _>>(),
            )
        } else {
            None
        };

        HostConfig {
            memory: Some(limits.memory_bytes),
            // Equal to memory: no swap
            memory_swap: Some(limits.memory_bytes),
            nano_cpus: Some(limits.nano_cpus),
            cpu_shares: Some(limits.cpu_shares),
            pids_limit: Some(limits.pids_limit),
            ulimits: Some(vec![
                ResourcesUlimits {
                    name: Some("nofile".to_string()),
                    soft: Some(limits.nofile),
                    hard: Some(limits.nofile),
                },
                ResourcesUlimits {
                    name: Some("nproc".to_string()),
                    soft: Some(limits.nproc),
                    hard: Some(limits.nproc),
                },
            ]),
            network_mode: Some(if spec.network_enabled { "bridge" } else { "none" }.to_string()),
            port_bindings,
            tmpfs: Some(spec.tmpfs.clone()),
            readonly_paths: Some(spec.read_only_paths.clone()),
            masked_paths: Some(spec.masked_paths.clone()),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges:true".to_string()]),
            privileged: Some(false),
            auto_remove: Some(false), // Removed explicitly during cleanup
            ..Default::default()
        }
    }

    fn parse_stats(stats: &Stats) -> EngineStats {
        let network_bytes = stats
            .networks
            .as_ref()
            .map(|networks| networks.values().map(|n| n.rx_bytes + n.tx_bytes).sum())
            .unwrap_or(0);

        let disk_bytes = stats
            .blkio_stats
            .io_service_bytes_recursive
            .as_ref()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| {
                        let op = e.op.to_ascii_lowercase();
                        op == "read" || op == "write"
                    })
                    .map(|e| e.value)
                    .sum()
            })
            .unwrap_or(0);

        let online_cpus = stats
            .cpu_stats
            .online_cpus
            .map(|n| n as u32)
            .or_else(|| {
                stats
                    .cpu_stats
                    .cpu_usage
                    .percpu_usage
                    .as_ref()
                    .map(|v| v.len() as u32)
            })
            .unwrap_or(1)
            .max(1);

        EngineStats {
            cpu_total_ns: stats.cpu_stats.cpu_usage.total_usage,
            system_cpu_ns: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            online_cpus,
            memory_usage_bytes: stats.memory_stats.usage.unwrap_or(0),
            memory_limit_bytes: stats.memory_stats.limit.unwrap_or(0),
            network_bytes,
            disk_bytes,
        }
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn name(&self) -> &str {
        "docker"
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!("Image {} already present", image);
            return Ok(());
        }

        info!("Pulling Docker image: {}", image);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(Error::Container(format!("Failed to pull image {}: {}", image, e)));
                }
            }
        }

        info!("Image {} pulled successfully", image);
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let exposed_ports = if spec.network_enabled && !spec.exposed_ports.is_empty() {
            Some(
                spec.exposed_ports
                    .iter()
                    .map(|port| (format!("{}/tcp", port), HashMap::new()))
                    .collect::<HashMap<_, _>>(),
            )
        } else {
            None
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            env: Some(spec.env.clone()),
            working_dir: Some(spec.working_dir.clone()),
            user: Some(spec.user.clone()),
            labels: Some(spec.labels.clone()),
            network_disabled: Some(!spec.network_enabled),
            exposed_ports,
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(Self::host_config(spec)),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self.docker.create_container(Some(options), config).await?;
        for warning in &response.warnings {
            warn!("Docker create warning for {}: {}", spec.name, warning);
        }

        debug!("Created container {} ({})", spec.name, response.id);
        Ok(response.id)
    }

    async fn put_archive(&self, id: &str, path: &str, archive: Vec<u8>) -> Result<()> {
        let options = UploadToContainerOptions {
            path: path.to_string(),
            ..Default::default()
        };

        self.docker
            .upload_to_container(id, Some(options), archive.into())
            .await?;
        Ok(())
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        debug!("Started container {}", id);
        Ok(())
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: grace.as_secs().max(1) as i64,
        };

        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // Already stopped
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn kill(&self, id: &str, signal: &str) -> Result<()> {
        let options = KillContainerOptions { signal };

        match self.docker.kill_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // Not running
            Err(BollardError::DockerResponseServerError {
                status_code: 409, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        self.docker.remove_container(id, Some(options)).await?;
        debug!("Removed container {}", id);
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(id, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports non-zero exits as an error carrying the code
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => Err(Error::Container("Container wait stream ended".to_string())),
        }
    }

    async fn stats(&self, id: &str) -> Result<EngineStats> {
        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };

        let mut stream = self.docker.stats(id, Some(options));

        match stream.next().await {
            Some(Ok(stats)) => Ok(Self::parse_stats(&stats)),
            Some(Err(e)) => Err(e.into()),
            None => Err(Error::ContainerNotFound(id.to_string())),
        }
    }

    fn logs(&self, id: &str) -> BoxStream<'static, Result<LogChunk>> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        self.docker
            .logs(id, Some(options))
            .filter_map(|item| async move {
                match item {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        Some(Ok(LogChunk {
                            stream: LogStream::Stdout,
                            data: String::from_utf8_lossy(&message).into_owned(),
                        }))
                    }
                    Ok(LogOutput::StdErr { message }) => Some(Ok(LogChunk {
                        stream: LogStream::Stderr,
                        data: String::from_utf8_lossy(&message).into_owned(),
                    })),
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(e) => Some(Err(Error::from(e))),
                }
            })
            .boxed()
    }

    async fn exec(&self, id: &str, cmd: Vec<String>) -> Result<ExecOutput> {
        let options = CreateExecOptions {
            cmd: Some(cmd),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self.docker.create_exec(id, options).await?;

        let mut output = ExecOutput::default();
        match self.docker.start_exec(&exec.id, None).await? {
            StartExecResults::Attached { output: mut stream, .. } => {
                while let Some(msg) = stream.next().await {
                    match msg {
                        Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                            output.stdout.push_str(&String::from_utf8_lossy(&message))
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            output.stderr.push_str(&String::from_utf8_lossy(&message))
                        }
                        Ok(_) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(Error::Container("Exec was detached unexpectedly".to_string()));
            }
        }

        output.exit_code = self.docker.inspect_exec(&exec.id).await?.exit_code;
        Ok(output)
    }

    async fn list_labelled(&self, label: &str, value: &str) -> Result<Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{}={}", label, value)]);

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::engine::ContainerLimits;

    #[test]
    fn test_host_config_without_network() {
        let spec = ContainerSpec {
            limits: ContainerLimits {
                memory_bytes: 512 * 1024 * 1024,
                nano_cpus: 1_000_000_000,
                cpu_shares: 512,
                pids_limit: 80,
                nofile: 100,
                nproc: 80,
            },
            network_enabled: false,
            exposed_ports: vec![3000],
            ..Default::default()
        };
        let host = DockerEngine::host_config(&spec);
        assert_eq!(host.memory, Some(512 * 1024 * 1024));
        assert_eq!(host.memory_swap, host.memory);
        assert_eq!(host.pids_limit, Some(80));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert!(host.port_bindings.is_none());
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
        assert_eq!(host.ulimits.as_ref().map(|u| u.len()), Some(2));
    }

    #[tokio::test]
    #[ignore] // Requires Docker daemon
    async fn test_connect_docker() {
        let engine = DockerEngine::connect().await;
        assert!(engine.is_ok(), "Failed to connect to Docker");
    }
}
