//! Execution sessions
//!
//! An [`ExecutionSession`] is one execution attempt: its bundle, the policy
//! in effect, the single container it owns, its logs and latest stats. All
//! mutable state sits behind the session's own locks so unrelated sessions
//! never contend.

mod logs;
mod registry;
mod state;

pub use logs::{LogBuffer, LogLine};
pub use registry::SessionRegistry;
pub use state::SessionState;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::sandbox::{Language, LogStream, ResourcePolicy, ToolBundle};
use crate::security::{ScanResult, SecurityFinding};

/// Point-in-time resource usage of a session's container
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStats {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_bytes: u64,
    pub network_bytes: u64,
    pub disk_bytes: u64,
    pub sampled_at: DateTime<Utc>,
}

/// Why a session is being ended from outside the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopCause {
    /// Owner asked for it
    Requested,
    /// Process shutdown
    Shutdown,
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    container_id: Option<String>,
    image: Option<String>,
    entry: Option<String>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    exit_code: Option<i64>,
    reason: Option<String>,
    stats: Option<ResourceStats>,
    max_memory_bytes: u64,
}

/// One execution attempt
#[derive(Debug)]
pub struct ExecutionSession {
    id: String,
    principal: String,
    language: Language,
    bundle: ToolBundle,
    policy: ResourcePolicy,
    scan: ScanResult,
    created_at: DateTime<Utc>,
    inner: RwLock<SessionInner>,
    logs: Mutex<LogBuffer>,
    /// Flipped once, on the first terminal transition
    cancel_tx: watch::Sender<bool>,
    stop_tx: watch::Sender<Option<StopCause>>,
    cleaned_up: AtomicBool,
}

impl ExecutionSession {
    pub fn new(
        id: impl Into<String>,
        principal: impl Into<String>,
        language: Language,
        bundle: ToolBundle,
        policy: ResourcePolicy,
        scan: ScanResult,
        log_capacity: usize,
    ) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        let (stop_tx, _) = watch::channel(None);
        ExecutionSession {
            id: id.into(),
            principal: principal.into(),
            language,
            bundle,
            policy,
            scan,
            created_at: Utc::now(),
            inner: RwLock::new(SessionInner {
                state: SessionState::Created,
                container_id: None,
                image: None,
                entry: None,
                started_at: None,
                ended_at: None,
                exit_code: None,
                reason: None,
                stats: None,
                max_memory_bytes: 0,
            }),
            logs: Mutex::new(LogBuffer::new(log_capacity)),
            cancel_tx,
            stop_tx,
            cleaned_up: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn bundle(&self) -> &ToolBundle {
        &self.bundle
    }

    pub fn policy(&self) -> &ResourcePolicy {
        &self.policy
    }

    pub fn findings(&self) -> &[SecurityFinding] {
        &self.scan.findings
    }

    pub fn scan(&self) -> &ScanResult {
        &self.scan
    }

    pub async fn state(&self) -> SessionState {
        self.inner.read().await.state
    }

    pub async fn container_id(&self) -> Option<String> {
        self.inner.read().await.container_id.clone()
    }

    pub async fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().await.ended_at
    }

    pub async fn stats(&self) -> Option<ResourceStats> {
        self.inner.read().await.stats
    }

    /// Move to `to`.
    ///
    /// Returns `Ok(true)` when the state changed and `Ok(false)` when the
    /// session was already terminal (repeated requests are no-ops). Any other
    /// illegal transition is an error.
    pub async fn transition(&self, to: SessionState, reason: Option<String>) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let from = inner.state;
        if from.is_terminal() {
            debug!(
                "Session {} already {}, ignoring transition to {}",
                self.id, from, to
            );
            return Ok(false);
        }
        if !from.can_transition(to) {
            return Err(Error::InvalidInput(format!(
                "Illegal session transition {} -> {}",
                from, to
            )));
        }

        inner.state = to;
        let now = Utc::now();
        if to == SessionState::Running {
            inner.started_at = Some(now);
        }
        if to.is_terminal() {
            inner.ended_at = Some(now);
            if reason.is_some() {
                inner.reason = reason;
            }
            self.cancel_tx.send_replace(true);
        }
        drop(inner);

        info!("Session {} {} -> {}", self.id, from, to);
        Ok(true)
    }

    /// Record the container this session owns.
    ///
    /// A session owns at most one container for its whole life.
    pub(crate) async fn attach_container(
        &self,
        container_id: &str,
        image: &str,
        entry: &str,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = &inner.container_id {
            return Err(Error::Internal(format!(
                "Session {} already owns container {}",
                self.id, existing
            )));
        }
        inner.container_id = Some(container_id.to_string());
        inner.image = Some(image.to_string());
        inner.entry = Some(entry.to_string());
        Ok(())
    }

    pub async fn record_exit(&self, code: i64) {
        let mut inner = self.inner.write().await;
        if inner.exit_code.is_none() {
            inner.exit_code = Some(code);
        }
    }

    /// Replace the latest stats and raise the memory high-water mark
    pub async fn update_stats(&self, stats: ResourceStats) {
        let mut inner = self.inner.write().await;
        inner.max_memory_bytes = inner.max_memory_bytes.max(stats.memory_bytes);
        inner.stats = Some(stats);
    }

    fn logs(&self) -> std::sync::MutexGuard<'_, LogBuffer> {
        self.logs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append container output, returning the complete lines it produced
    pub fn append_logs(&self, stream: LogStream, data: &str) -> Vec<LogLine> {
        self.logs().push_chunk(stream, data)
    }

    /// Flush unterminated output as final lines
    pub fn flush_logs(&self) -> Vec<LogLine> {
        self.logs().flush()
    }

    pub fn log_tail(&self, n: usize) -> Vec<LogLine> {
        self.logs().tail(n)
    }

    /// Resolves to `true` once the session is terminal
    pub fn cancelled(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Ask the supervisor to end the session.
    ///
    /// Returns `false` if a stop was already requested.
    pub fn request_stop(&self, cause: StopCause) -> bool {
        self.stop_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(cause);
                true
            } else {
                false
            }
        })
    }

    pub fn stop_requests(&self) -> watch::Receiver<Option<StopCause>> {
        self.stop_tx.subscribe()
    }

    pub fn stop_cause(&self) -> Option<StopCause> {
        self.stop_tx.borrow().clone()
    }

    /// Claim the one-time cleanup. Only the first caller gets `true`.
    pub fn claim_cleanup(&self) -> bool {
        !self.cleaned_up.swap(true, Ordering::SeqCst)
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up.load(Ordering::SeqCst)
    }

    /// Wall-clock run time in milliseconds, once started
    pub async fn duration_ms(&self) -> Option<i64> {
        let inner = self.inner.read().await;
        let started = inner.started_at?;
        let ended = inner.ended_at.unwrap_or_else(Utc::now);
        Some((ended - started).num_milliseconds().max(0))
    }

    /// Serializable snapshot
    pub async fn view(&self) -> SessionView {
        let inner = self.inner.read().await;
        let logs = self.logs();
        SessionView {
            session_id: self.id.clone(),
            principal: self.principal.clone(),
            status: inner.state,
            language: self.language,
            image: inner.image.clone(),
            entry: inner.entry.clone(),
            container_id: inner.container_id.clone(),
            created_at: self.created_at,
            started_at: inner.started_at,
            ended_at: inner.ended_at,
            duration_ms: inner.started_at.map(|started| {
                (inner.ended_at.unwrap_or_else(Utc::now) - started)
                    .num_milliseconds()
                    .max(0)
            }),
            exit_code: inner.exit_code,
            reason: inner.reason.clone(),
            stats: inner.stats,
            max_memory_bytes: inner.max_memory_bytes,
            policy: PolicySummary::from(&self.policy),
            findings: self.scan.findings.clone(),
            risk_score: self.scan.risk_score,
            file_count: self.bundle.len(),
            log_lines: logs.total(),
        }
    }
}

/// Limits a session runs under, as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySummary {
    pub max_memory_bytes: u64,
    pub max_cpu_seconds: u64,
    pub max_processes: u32,
    pub max_open_files: u64,
    pub network_access: bool,
    pub allowed_ports: BTreeSet<u16>,
}

impl From<&ResourcePolicy> for PolicySummary {
    fn from(policy: &ResourcePolicy) -> Self {
        PolicySummary {
            max_memory_bytes: policy.max_memory_bytes,
            max_cpu_seconds: policy.max_cpu_seconds,
            max_processes: policy.max_processes,
            max_open_files: policy.max_open_files,
            network_access: policy.network_access,
            allowed_ports: policy.allowed_ports.clone(),
        }
    }
}

/// What callers see of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: String,
    pub principal: String,
    pub status: SessionState,
    pub language: Language,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub exit_code: Option<i64>,
    pub reason: Option<String>,
    pub stats: Option<ResourceStats>,
    pub max_memory_bytes: u64,
    pub policy: PolicySummary,
    pub findings: Vec<SecurityFinding>,
    pub risk_score: u32,
    pub file_count: usize,
    pub log_lines: u64,
}
