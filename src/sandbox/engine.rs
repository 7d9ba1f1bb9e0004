//! Container engine interface
//!
//! The orchestrator only ever talks to a container engine through
//! [`ContainerEngine`]. [`DockerEngine`](super::DockerEngine) implements it on
//! top of bollard; [`MockEngine`](super::MockEngine) implements it in memory.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::Result;

/// Everything needed to create one sandbox container
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Container name (unique per session)
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    /// `KEY=VALUE` pairs
    pub env: Vec<String>,
    pub working_dir: String,
    /// `uid:gid` the process runs as
    pub user: String,
    pub labels: HashMap<String, String>,
    pub limits: ContainerLimits,
    /// No network at all when false
    pub network_enabled: bool,
    /// Ports exposed when the network is enabled
    pub exposed_ports: Vec<u16>,
    /// Mount point -> tmpfs options
    pub tmpfs: HashMap<String, String>,
    pub read_only_paths: Vec<String>,
    pub masked_paths: Vec<String>,
}

/// Engine-native resource limits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerLimits {
    pub memory_bytes: i64,
    /// CPU quota in units of 1e-9 CPUs
    pub nano_cpus: i64,
    /// Relative CPU weight
    pub cpu_shares: i64,
    pub pids_limit: i64,
    pub nofile: i64,
    pub nproc: i64,
}

/// Raw cumulative counters from one stats read
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Cumulative container CPU time in nanoseconds
    pub cpu_total_ns: u64,
    /// Cumulative host CPU time in nanoseconds
    pub system_cpu_ns: u64,
    pub online_cpus: u32,
    pub memory_usage_bytes: u64,
    /// Memory limit as seen by the engine (0 when unknown)
    pub memory_limit_bytes: u64,
    /// rx + tx across all interfaces
    pub network_bytes: u64,
    /// Block I/O read + write
    pub disk_bytes: u64,
}

/// Which stream a log chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// One chunk of container output (may hold several lines)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    pub stream: LogStream,
    pub data: String,
}

/// Output of a one-off command run inside a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
}

/// Narrow container engine surface the orchestrator depends on.
///
/// Implementations must be shareable across sessions; no method may hold
/// engine-wide exclusive state.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Engine name for logs
    fn name(&self) -> &str;

    /// Make sure `image` is present locally, pulling if needed
    async fn ensure_image(&self, image: &str) -> Result<()>;

    /// Create a container, returning its id
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    /// Extract a tar archive into `path` inside the container
    async fn put_archive(&self, id: &str, path: &str, archive: Vec<u8>) -> Result<()>;

    async fn start(&self, id: &str) -> Result<()>;

    /// SIGTERM, then SIGKILL after `grace`
    async fn stop(&self, id: &str, grace: Duration) -> Result<()>;

    /// Send a signal (`SIGTERM`, `SIGKILL`, ...)
    async fn kill(&self, id: &str, signal: &str) -> Result<()>;

    /// Force-remove the container and its anonymous volumes
    async fn remove(&self, id: &str) -> Result<()>;

    /// Wait for the container to stop, returning its exit code
    async fn wait(&self, id: &str) -> Result<i64>;

    /// Read one stats sample
    async fn stats(&self, id: &str) -> Result<EngineStats>;

    /// Follow stdout/stderr until the container exits
    fn logs(&self, id: &str) -> BoxStream<'static, Result<LogChunk>>;

    /// Run a command inside a running container
    async fn exec(&self, id: &str, cmd: Vec<String>) -> Result<ExecOutput>;

    /// Ids of all containers carrying `label=value`
    async fn list_labelled(&self, label: &str, value: &str) -> Result<Vec<String>>;
}
