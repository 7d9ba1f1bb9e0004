//! In-memory container engine
//!
//! Behaves like a container engine without running anything: each created
//! container follows a scripted [`MockBehavior`] (log output, exit code and
//! delay, CPU and memory load, signal handling). Used by the test suite and
//! for running the gateway on hosts without Docker.

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

use super::engine::{ContainerEngine, ContainerSpec, EngineStats, ExecOutput, LogChunk, LogStream};
use crate::error::{Error, Result};

const NS_PER_SAMPLE: u64 = 1_000_000_000;

/// Exit code of a process ended by SIGTERM
pub const EXIT_SIGTERM: i64 = 143;
/// Exit code of a process ended by SIGKILL
pub const EXIT_SIGKILL: i64 = 137;

/// Step that should fail instead of succeeding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Pull,
    Create,
    Transfer,
    Start,
}

/// Script followed by one mock container
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Output emitted right after start
    pub logs: Vec<(LogStream, String)>,
    /// Exit on its own after a delay with a code; `None` runs until signalled
    pub exit: Option<(Duration, i64)>,
    /// Reported CPU load
    pub cpu_percent: f64,
    /// Reported memory usage
    pub memory_bytes: u64,
    /// Survive SIGTERM (only SIGKILL ends it)
    pub ignore_sigterm: bool,
    pub fail_at: Option<MockFailure>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        MockBehavior {
            logs: Vec::new(),
            exit: Some((Duration::from_millis(20), 0)),
            cpu_percent: 1.0,
            memory_bytes: 16 * 1024 * 1024,
            ignore_sigterm: false,
            fail_at: None,
        }
    }
}

impl MockBehavior {
    /// Print `lines` to stdout and exit with `code`
    pub fn exits_with(code: i64, lines: &[&str]) -> Self {
        MockBehavior {
            logs: lines
                .iter()
                .map(|l| (LogStream::Stdout, format!("{}\n", l)))
                .collect(),
            exit: Some((Duration::from_millis(20), code)),
            ..Default::default()
        }
    }

    /// Never exits on its own
    pub fn runs_forever() -> Self {
        MockBehavior {
            exit: None,
            ..Default::default()
        }
    }

    /// Never exits and burns CPU at `cpu_percent`
    pub fn spins(cpu_percent: f64) -> Self {
        MockBehavior {
            exit: None,
            cpu_percent,
            ..Default::default()
        }
    }

    pub fn failing_at(step: MockFailure) -> Self {
        MockBehavior {
            fail_at: Some(step),
            ..Default::default()
        }
    }
}

struct MockContainer {
    spec: ContainerSpec,
    behavior: MockBehavior,
    files: Vec<String>,
    started: bool,
    signals: Vec<String>,
    samples: u64,
    exit_tx: Arc<watch::Sender<Option<i64>>>,
}

impl MockContainer {
    fn exit_code(&self) -> Option<i64> {
        *self.exit_tx.borrow()
    }

    fn is_running(&self) -> bool {
        self.started && self.exit_code().is_none()
    }

    fn exit(&self, code: i64) {
        self.exit_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(code);
                true
            } else {
                false
            }
        });
    }
}

#[derive(Default)]
struct MockState {
    containers: HashMap<String, MockContainer>,
    pulled: Vec<String>,
    created_total: usize,
    removed: Vec<String>,
}

/// Scripted in-memory engine
pub struct MockEngine {
    state: Mutex<MockState>,
    queued: Mutex<VecDeque<MockBehavior>>,
    default_behavior: Mutex<MockBehavior>,
    next_id: AtomicU64,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        MockEngine {
            state: Mutex::new(MockState::default()),
            queued: Mutex::new(VecDeque::new()),
            default_behavior: Mutex::new(MockBehavior::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Engine whose containers all follow `behavior` unless one is queued
    pub fn with_default(behavior: MockBehavior) -> Self {
        let engine = Self::new();
        *lock(&engine.default_behavior) = behavior;
        engine
    }

    /// Behavior for the next created container
    pub fn push_behavior(&self, behavior: MockBehavior) {
        lock(&self.queued).push_back(behavior);
    }

    fn next_behavior(&self) -> MockBehavior {
        lock(&self.queued)
            .pop_front()
            .unwrap_or_else(|| lock(&self.default_behavior).clone())
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    /// Containers currently present (created and not removed)
    pub fn container_count(&self) -> usize {
        self.state().containers.len()
    }

    /// Containers currently running
    pub fn running_count(&self) -> usize {
        self.state()
            .containers
            .values()
            .filter(|c| c.is_running())
            .count()
    }

    /// Containers ever created
    pub fn created_total(&self) -> usize {
        self.state().created_total
    }

    pub fn exists(&self, id: &str) -> bool {
        self.state().containers.contains_key(id)
    }

    /// Ids removed so far, in order
    pub fn removed(&self) -> Vec<String> {
        self.state().removed.clone()
    }

    /// Signals delivered to a container
    pub fn signals(&self, id: &str) -> Vec<String> {
        self.state()
            .containers
            .get(id)
            .map(|c| c.signals.clone())
            .unwrap_or_default()
    }

    /// Paths written into a container via `put_archive`
    pub fn files(&self, id: &str) -> Vec<String> {
        self.state()
            .containers
            .get(id)
            .map(|c| c.files.clone())
            .unwrap_or_default()
    }

    /// Create spec of a container
    pub fn spec(&self, id: &str) -> Option<ContainerSpec> {
        self.state().containers.get(id).map(|c| c.spec.clone())
    }

    /// Images pulled so far
    pub fn pulled(&self) -> Vec<String> {
        self.state().pulled.clone()
    }

    /// Make a container exit as if its process ended with `code`
    pub fn finish(&self, id: &str, code: i64) {
        if let Some(container) = self.state().containers.get(id) {
            container.exit(code);
        }
    }

    /// Drop a container behind the orchestrator's back
    pub fn remove_externally(&self, id: &str) {
        if let Some(container) = self.state().containers.remove(id) {
            container.exit(EXIT_SIGKILL);
        }
    }

    fn fails_at(&self, id: &str, step: MockFailure) -> bool {
        self.state()
            .containers
            .get(id)
            .map(|c| c.behavior.fail_at == Some(step))
            .unwrap_or(false)
    }

    fn exit_receiver(&self, id: &str) -> Result<watch::Receiver<Option<i64>>> {
        self.state()
            .containers
            .get(id)
            .map(|c| c.exit_tx.subscribe())
            .ok_or_else(|| Error::ContainerNotFound(id.to_string()))
    }

    fn deliver(&self, id: &str, signal: &str) -> Result<()> {
        let mut state = self.state();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| Error::ContainerNotFound(id.to_string()))?;
        if !container.is_running() {
            return Ok(());
        }
        container.signals.push(signal.to_string());
        match signal {
            "SIGKILL" => container.exit(EXIT_SIGKILL),
            "SIGTERM" if !container.behavior.ignore_sigterm => container.exit(EXIT_SIGTERM),
            _ => {}
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn archive_paths(archive: &[u8]) -> Result<Vec<String>> {
    let mut reader = tar::Archive::new(archive);
    let mut paths = Vec::new();
    for entry in reader.entries()? {
        let entry = entry?;
        paths.push(entry.path()?.to_string_lossy().into_owned());
    }
    Ok(paths)
}

#[async_trait]
impl ContainerEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        let behavior = lock(&self.queued)
            .front()
            .cloned()
            .unwrap_or_else(|| lock(&self.default_behavior).clone());
        if behavior.fail_at == Some(MockFailure::Pull) {
            lock(&self.queued).pop_front();
            return Err(Error::Container(format!("pull access denied for {}", image)));
        }
        self.state().pulled.push(image.to_string());
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let behavior = self.next_behavior();
        if behavior.fail_at == Some(MockFailure::Create) {
            return Err(Error::Container("create refused".to_string()));
        }

        let id = format!("mock-{:06}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let (exit_tx, _) = watch::channel(None);
        let mut state = self.state();
        state.created_total += 1;
        state.containers.insert(
            id.clone(),
            MockContainer {
                spec: spec.clone(),
                behavior,
                files: Vec::new(),
                started: false,
                signals: Vec::new(),
                samples: 0,
                exit_tx: Arc::new(exit_tx),
            },
        );
        Ok(id)
    }

    async fn put_archive(&self, id: &str, path: &str, archive: Vec<u8>) -> Result<()> {
        if self.fails_at(id, MockFailure::Transfer) {
            return Err(Error::Container("archive extraction failed".to_string()));
        }
        let paths = archive_paths(&archive)?;
        let mut state = self.state();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| Error::ContainerNotFound(id.to_string()))?;
        let base = path.trim_end_matches('/');
        container
            .files
            .extend(paths.into_iter().map(|p| format!("{}/{}", base, p)));
        Ok(())
    }

    async fn start(&self, id: &str) -> Result<()> {
        if self.fails_at(id, MockFailure::Start) {
            return Err(Error::Container("OCI runtime create failed".to_string()));
        }

        let (exit, exit_tx) = {
            let mut state = self.state();
            let container = state
                .containers
                .get_mut(id)
                .ok_or_else(|| Error::ContainerNotFound(id.to_string()))?;
            container.started = true;
            (container.behavior.exit, container.exit_tx.clone())
        };

        if let Some((after, code)) = exit {
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                exit_tx.send_if_modified(|current| {
                    if current.is_none() {
                        *current = Some(code);
                        true
                    } else {
                        false
                    }
                });
            });
        }
        Ok(())
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<()> {
        self.deliver(id, "SIGTERM")?;
        let mut exit_rx = self.exit_receiver(id)?;
        let exited = tokio::time::timeout(grace, exit_rx.wait_for(|c| c.is_some()))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);
        if !exited {
            self.deliver(id, "SIGKILL")?;
        }
        Ok(())
    }

    async fn kill(&self, id: &str, signal: &str) -> Result<()> {
        self.deliver(id, signal)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut state = self.state();
        match state.containers.remove(id) {
            Some(container) => {
                container.exit(EXIT_SIGKILL);
                state.removed.push(id.to_string());
                Ok(())
            }
            None => Err(Error::ContainerNotFound(id.to_string())),
        }
    }

    async fn wait(&self, id: &str) -> Result<i64> {
        let mut exit_rx = self.exit_receiver(id)?;
        let code = *exit_rx
            .wait_for(|c| c.is_some())
            .await
            .map_err(|_| Error::ContainerNotFound(id.to_string()))?;
        Ok(code.unwrap_or(EXIT_SIGKILL))
    }

    async fn stats(&self, id: &str) -> Result<EngineStats> {
        let mut state = self.state();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| Error::ContainerNotFound(id.to_string()))?;
        if !container.is_running() {
            return Err(Error::Container(format!("container {} is not running", id)));
        }
        container.samples += 1;
        let samples = container.samples;
        let load = (container.behavior.cpu_percent / 100.0).max(0.0);
        Ok(EngineStats {
            cpu_total_ns: (samples as f64 * NS_PER_SAMPLE as f64 * load) as u64,
            system_cpu_ns: samples * NS_PER_SAMPLE,
            online_cpus: 1,
            memory_usage_bytes: container.behavior.memory_bytes,
            memory_limit_bytes: container.spec.limits.memory_bytes.max(0) as u64,
            network_bytes: 0,
            disk_bytes: 0,
        })
    }

    fn logs(&self, id: &str) -> BoxStream<'static, Result<LogChunk>> {
        let state = self.state();
        let Some(container) = state.containers.get(id) else {
            return stream::once(async { Err(Error::ContainerNotFound(String::new())) }).boxed();
        };

        let chunks: Vec<Result<LogChunk>> = container
            .behavior
            .logs
            .iter()
            .map(|(stream, data)| {
                Ok(LogChunk {
                    stream: *stream,
                    data: data.clone(),
                })
            })
            .collect();
        let mut exit_rx = container.exit_tx.subscribe();

        let until_exit = stream::once(async move {
            let _ = exit_rx.wait_for(|c| c.is_some()).await;
        })
        .filter_map(|_| async { None::<Result<LogChunk>> });

        stream::iter(chunks).chain(until_exit).boxed()
    }

    async fn exec(&self, id: &str, cmd: Vec<String>) -> Result<ExecOutput> {
        let state = self.state();
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| Error::ContainerNotFound(id.to_string()))?;
        if !container.is_running() {
            return Err(Error::Container(format!("container {} is not running", id)));
        }
        Ok(ExecOutput {
            exit_code: Some(0),
            stdout: format!("{}\n", cmd.join(" ")),
            stderr: String::new(),
        })
    }

    async fn list_labelled(&self, label: &str, value: &str) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .state()
            .containers
            .iter()
            .filter(|(_, c)| c.spec.labels.get(label).map(String::as_str) == Some(value))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_exit_and_logs() {
        let engine = MockEngine::with_default(MockBehavior::exits_with(0, &["ok"]));
        let id = engine.create(&ContainerSpec::default()).await.unwrap();
        engine.start(&id).await.unwrap();

        let chunks: Vec<_> = engine.logs(&id).collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap().data, "ok\n");
        assert_eq!(engine.wait(&id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stop_escalates_when_sigterm_ignored() {
        let engine = MockEngine::with_default(MockBehavior {
            ignore_sigterm: true,
            ..MockBehavior::runs_forever()
        });
        let id = engine.create(&ContainerSpec::default()).await.unwrap();
        engine.start(&id).await.unwrap();

        engine.stop(&id, Duration::from_millis(50)).await.unwrap();
        assert_eq!(engine.wait(&id).await.unwrap(), EXIT_SIGKILL);
        assert_eq!(engine.signals(&id), vec!["SIGTERM", "SIGKILL"]);
    }

    #[tokio::test]
    async fn test_remove_twice_reports_not_found() {
        let engine = MockEngine::new();
        let id = engine.create(&ContainerSpec::default()).await.unwrap();
        engine.remove(&id).await.unwrap();
        let err = engine.remove(&id).await.unwrap_err();
        assert!(err.is_already_gone());
    }

    #[tokio::test]
    async fn test_finish_and_exec() {
        let engine = MockEngine::with_default(MockBehavior::runs_forever());
        engine.ensure_image("python:3.12-alpine").await.unwrap();
        let id = engine.create(&ContainerSpec::default()).await.unwrap();
        engine.start(&id).await.unwrap();

        let output = engine
            .exec(&id, vec!["echo".to_string(), "hi".to_string()])
            .await
            .unwrap();
        assert_eq!(output.stdout, "echo hi\n");

        engine.finish(&id, 7);
        assert_eq!(engine.wait(&id).await.unwrap(), 7);
        assert!(engine.exec(&id, vec!["true".to_string()]).await.is_err());
        assert_eq!(engine.pulled(), vec!["python:3.12-alpine"]);

        engine.remove(&id).await.unwrap();
        assert_eq!(engine.removed(), vec![id.clone()]);
        assert!(!engine.exists(&id));
    }

    #[tokio::test]
    async fn test_stats_are_cumulative() {
        let engine = MockEngine::with_default(MockBehavior::spins(50.0));
        let id = engine.create(&ContainerSpec::default()).await.unwrap();
        engine.start(&id).await.unwrap();
        let first = engine.stats(&id).await.unwrap();
        let second = engine.stats(&id).await.unwrap();
        assert_eq!(second.system_cpu_ns - first.system_cpu_ns, NS_PER_SAMPLE);
        assert_eq!(second.cpu_total_ns - first.cpu_total_ns, NS_PER_SAMPLE / 2);
    }
}
