//! Orchestrator
//!
//! Accepts execution requests, runs the scan gate, resolves the policy and
//! hands each session to its own supervisor task. The supervisor drives the
//! session through provisioning and running, races the container exit
//! against the time budget, monitor violations and stop requests, and then
//! performs the one-time cleanup.

mod metrics;

pub use metrics::{Metrics, MetricsTracker};

use chrono::Utc;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Config, OrchestratorConfig, PolicyConfig, ScanPolicy};
use crate::error::{Error, Result};
use crate::gateway::protocol::{ExecuteOptions, ExecuteResponse, StopResponse};
use crate::gateway::{EventBroadcaster, SessionEvent};
use crate::monitor::{ResourceMonitor, Violation};
use crate::sandbox::{
    ContainerEngine, ContainerProvisioner, Language, ProvisionRequest, ToolBundle, LABEL_MANAGED,
};
use crate::security;
use crate::session::{ExecutionSession, SessionRegistry, SessionState, SessionView, StopCause};

/// Longest pause between retention sweeps
const JANITOR_MAX_PERIOD: Duration = Duration::from_secs(60);

/// How a running session ended, before cleanup
struct Outcome {
    state: SessionState,
    reason: Option<String>,
}

impl Outcome {
    fn new(state: SessionState, reason: impl Into<String>) -> Self {
        Outcome {
            state,
            reason: Some(reason.into()),
        }
    }
}

/// Tasks tied to one running container
struct SessionTasks {
    logs: JoinHandle<()>,
    monitor: JoinHandle<()>,
}

pub struct Orchestrator {
    engine: Arc<dyn ContainerEngine>,
    provisioner: ContainerProvisioner,
    registry: SessionRegistry,
    broadcaster: Arc<EventBroadcaster>,
    metrics: MetricsTracker,
    config: OrchestratorConfig,
    policy: PolicyConfig,
    scan_policy: ScanPolicy,
    /// Supervisor task per session, joined on shutdown
    supervisors: Mutex<HashMap<String, JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn ContainerEngine>, config: &Config) -> Self {
        Orchestrator {
            provisioner: ContainerProvisioner::new(engine.clone(), config.container.clone()),
            engine,
            registry: SessionRegistry::new(),
            broadcaster: Arc::new(EventBroadcaster::new()),
            metrics: MetricsTracker::new(),
            config: config.orchestrator.clone(),
            policy: config.policy.clone(),
            scan_policy: config.security.clone(),
            supervisors: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    fn supervisors(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.supervisors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Accept a bundle for execution.
    ///
    /// Returns as soon as the session exists; provisioning and everything
    /// after it happen on the session's supervisor task.
    pub async fn execute(
        self: &Arc<Self>,
        principal: &str,
        bundle: ToolBundle,
        options: ExecuteOptions,
    ) -> Result<ExecuteResponse> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(Error::Internal("Orchestrator is shutting down".to_string()));
        }
        if principal.trim().is_empty() {
            return Err(Error::Unauthorized("Missing principal".to_string()));
        }

        bundle.validate()?;
        let language = options
            .language
            .or_else(|| Language::detect(&bundle))
            .ok_or_else(|| {
                Error::InvalidInput(
                    "Could not determine language from bundle; set options.language".to_string(),
                )
            })?;

        let session_id = Uuid::new_v4().to_string();
        let scan = security::scan(&bundle);
        security::log_findings(&session_id, &scan);
        if let Some(reason) = self.scan_policy.evaluate(&scan) {
            warn!("Rejected execution for {}: {}", principal, reason);
            self.metrics.record_blocked();
            return Err(Error::SecurityBlocked(reason));
        }

        let policy = match &options.policy {
            Some(overrides) => self
                .policy
                .defaults
                .with_overrides(overrides, &self.policy.ceilings)?,
            None => self.policy.defaults.clone(),
        };

        let session = Arc::new(ExecutionSession::new(
            session_id.clone(),
            principal,
            language,
            bundle,
            policy,
            scan,
            self.config.log_buffer_lines,
        ));
        self.registry.insert(session.clone()).await?;
        self.metrics.record_started();
        info!(
            "Session {} created for {} ({}, {} files)",
            session_id,
            principal,
            language,
            session.bundle().len()
        );

        self.set_state(&session, SessionState::Provisioning, None)
            .await?;

        // The guard is held across spawn so the supervisor's own removal
        // always lands after this insert.
        let orchestrator = self.clone();
        let supervised = session.clone();
        {
            let mut supervisors = self.supervisors();
            let handle = tokio::spawn(async move {
                orchestrator.supervise(supervised, options.env).await;
            });
            supervisors.insert(session_id.clone(), handle);
        }

        Ok(ExecuteResponse {
            session_id,
            status: session.state().await,
        })
    }

    /// Ask a session to stop. Repeated calls and terminal sessions are no-ops.
    pub async fn stop_execution(&self, session_id: &str) -> Result<StopResponse> {
        let session = self
            .registry
            .get(session_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Session {}", session_id)))?;

        let state = session.state().await;
        if !state.is_terminal() && session.request_stop(StopCause::Requested) {
            info!("Stop requested for session {} ({})", session_id, state);
        }
        Ok(StopResponse {
            session_id: session_id.to_string(),
            status: session.state().await,
        })
    }

    /// [`stop_execution`](Self::stop_execution) on behalf of `principal`,
    /// which must own the session
    pub async fn stop_execution_as(&self, principal: &str, session_id: &str) -> Result<StopResponse> {
        let session = self
            .registry
            .get(session_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Session {}", session_id)))?;
        if session.principal() != principal {
            return Err(Error::Unauthorized(format!(
                "Session {} belongs to another principal",
                session_id
            )));
        }
        self.stop_execution(session_id).await
    }

    pub async fn get_session_status(&self, session_id: &str) -> Option<SessionView> {
        match self.registry.get(session_id).await {
            Some(session) => Some(session.view().await),
            None => None,
        }
    }

    /// Sessions owned by `principal`, including retained terminal ones
    pub async fn list_sessions(&self, principal: &str) -> Vec<SessionView> {
        let mut views = Vec::new();
        for session in self.registry.for_principal(principal).await {
            views.push(session.view().await);
        }
        views.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        views
    }

    pub async fn get_system_metrics(&self) -> Metrics {
        self.metrics.snapshot(self.registry.active_count().await)
    }

    /// Stop every active session and wait for cleanup, bounded by the
    /// shutdown grace. Containers still present afterwards are force-removed.
    pub async fn cleanup(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let active = self.registry.active().await;
        info!("Shutting down, stopping {} active sessions", active.len());
        for session in &active {
            session.request_stop(StopCause::Shutdown);
        }

        let handles: Vec<JoinHandle<()>> = self.supervisors().drain().map(|(_, h)| h).collect();
        let joined = tokio::time::timeout(
            self.config.shutdown_grace,
            futures::future::join_all(handles),
        )
        .await;
        if joined.is_err() {
            warn!(
                "Sessions still running after {:?}, forcing container removal",
                self.config.shutdown_grace
            );
        }

        for session in self.registry.all().await {
            let Some(container_id) = session.container_id().await else {
                continue;
            };
            if session.is_cleaned_up() && joined.is_ok() {
                continue;
            }
            if let Err(e) = self.engine.kill(&container_id, "SIGKILL").await {
                if !e.is_already_gone() {
                    warn!(
                        "Failed to kill container {} of session {}: {}",
                        container_id,
                        session.id(),
                        e
                    );
                }
            }
            self.remove_container(session.id(), &container_id).await;
        }
        info!("Shutdown complete");
    }

    /// Remove labelled containers that no live session owns, e.g. left
    /// behind by a crashed process. Returns how many were removed.
    pub async fn reap_orphans(&self) -> Result<usize> {
        let ids = self
            .engine
            .list_labelled(&self.provisioner.label(LABEL_MANAGED), "true")
            .await?;

        let mut owned = Vec::new();
        for session in self.registry.all().await {
            if let Some(id) = session.container_id().await {
                owned.push(id);
            }
        }

        let mut removed = 0;
        for id in ids.into_iter().filter(|id| !owned.contains(id)) {
            match self.engine.remove(&id).await {
                Ok(()) => removed += 1,
                Err(e) if e.is_already_gone() => {}
                Err(e) => warn!("Failed to remove orphaned container {}: {}", id, e),
            }
        }
        if removed > 0 {
            info!("Removed {} orphaned containers", removed);
        }
        Ok(removed)
    }

    /// Periodically evict terminal sessions past the retention window
    pub fn spawn_janitor(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        let period = (self.config.session_retention / 2)
            .clamp(Duration::from_millis(10), JANITOR_MAX_PERIOD);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if orchestrator.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                let retention = chrono::Duration::from_std(orchestrator.config.session_retention)
                    .unwrap_or_else(|_| chrono::Duration::minutes(10));
                let evicted = orchestrator
                    .registry
                    .evict_expired(retention, Utc::now())
                    .await;
                for id in &evicted {
                    orchestrator.broadcaster.discard(id);
                }
                if !evicted.is_empty() {
                    debug!("Evicted {} expired sessions", evicted.len());
                }
            }
        })
    }

    // ------------------------------------------------------------------
    // Supervisor
    // ------------------------------------------------------------------

    async fn supervise(self: Arc<Self>, session: Arc<ExecutionSession>, env: HashMap<String, String>) {
        let request = ProvisionRequest {
            session_id: session.id(),
            policy: session.policy(),
            bundle: session.bundle(),
            language: session.language(),
            env: &env,
        };

        let outcome = match self.provisioner.provision(request).await {
            Ok(provisioned) => {
                match self
                    .registry
                    .bind_container(
                        &session,
                        &provisioned.container_id,
                        &provisioned.image,
                        &provisioned.entry,
                    )
                    .await
                {
                    Ok(()) => self.run(&session, &provisioned.container_id).await,
                    Err(e) => {
                        error!("Session {}: {}", session.id(), e);
                        self.remove_container(session.id(), &provisioned.container_id)
                            .await;
                        (Outcome::new(SessionState::Failed, e.to_string()), None)
                    }
                }
            }
            Err(e) => {
                warn!("Session {} provisioning failed: {}", session.id(), e);
                (Outcome::new(SessionState::Failed, e.to_string()), None)
            }
        };

        let (outcome, tasks) = outcome;
        if let Err(e) = self.set_state(&session, outcome.state, outcome.reason).await {
            error!("Session {}: {}", session.id(), e);
        }
        self.finalize(&session, tasks).await;
        self.supervisors().remove(session.id());
    }

    /// Enter `Running` and wait for whatever ends the session first
    async fn run(
        &self,
        session: &Arc<ExecutionSession>,
        container_id: &str,
    ) -> (Outcome, Option<SessionTasks>) {
        if let Some(cause) = session.stop_cause() {
            return (Outcome::new(SessionState::Stopped, stop_reason(&cause)), None);
        }
        match self.set_state(session, SessionState::Running, None).await {
            Ok(true) => {}
            Ok(false) => {
                let state = session.state().await;
                return (
                    Outcome {
                        state,
                        reason: None,
                    },
                    None,
                );
            }
            Err(e) => return (Outcome::new(SessionState::Failed, e.to_string()), None),
        }

        let (violation_tx, mut violations) = mpsc::channel::<Violation>(1);
        let tasks = SessionTasks {
            logs: self.spawn_log_pump(session.clone(), container_id.to_string()),
            monitor: ResourceMonitor::new(
                self.engine.clone(),
                self.broadcaster.clone(),
                self.config.monitor.clone(),
            )
            .spawn(session.clone(), container_id.to_string(), violation_tx),
        };

        let budget = session.policy().time_budget(self.config.execution_timeout);
        let deadline = tokio::time::sleep(budget);
        tokio::pin!(deadline);
        let exit = self.engine.wait(container_id);
        tokio::pin!(exit);
        let stop = stop_requested(session.stop_requests());
        tokio::pin!(stop);

        let outcome = tokio::select! {
            result = &mut exit => match result {
                Ok(0) => {
                    session.record_exit(0).await;
                    Outcome { state: SessionState::Completed, reason: None }
                }
                Ok(code) => {
                    session.record_exit(code).await;
                    Outcome::new(SessionState::Failed, format!("exited with code {}", code))
                }
                Err(e) => Outcome::new(SessionState::Failed, format!("lost container: {}", e)),
            },
            _ = &mut deadline => {
                warn!("Session {} exceeded its {:?} time budget", session.id(), budget);
                Outcome::new(
                    SessionState::TimedOut,
                    format!("exceeded time budget of {}s", budget.as_secs_f64()),
                )
            }
            Some(violation) = violations.recv() => {
                Outcome::new(SessionState::ResourceKilled, violation.to_string())
            }
            cause = &mut stop => Outcome::new(SessionState::Stopped, stop_reason(&cause)),
        };
        (outcome, Some(tasks))
    }

    fn spawn_log_pump(&self, session: Arc<ExecutionSession>, container_id: String) -> JoinHandle<()> {
        let mut stream = self.engine.logs(&container_id);
        let broadcaster = self.broadcaster.clone();
        tokio::spawn(async move {
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(chunk) => {
                        for line in session.append_logs(chunk.stream, &chunk.data) {
                            broadcaster.publish(SessionEvent::Log {
                                session_id: session.id().to_string(),
                                log: line,
                            });
                        }
                    }
                    Err(e) => {
                        debug!("Log stream for session {} ended: {}", session.id(), e);
                        break;
                    }
                }
            }
        })
    }

    /// Transition and publish the change
    async fn set_state(
        &self,
        session: &ExecutionSession,
        to: SessionState,
        reason: Option<String>,
    ) -> Result<bool> {
        let changed = session.transition(to, reason.clone()).await?;
        if changed {
            self.broadcaster.publish(SessionEvent::Status {
                session_id: session.id().to_string(),
                status: to,
                reason,
            });
        }
        Ok(changed)
    }

    /// Terminate and remove the container, drain logs, count the session
    /// and close its event hub. Runs once per session.
    async fn finalize(&self, session: &ExecutionSession, tasks: Option<SessionTasks>) {
        if !session.claim_cleanup() {
            return;
        }
        let container_id = session.container_id().await;

        if let Some(id) = &container_id {
            match self.engine.stop(id, self.config.termination_grace).await {
                Ok(()) => {}
                Err(e) if e.is_already_gone() => {}
                Err(e) => warn!("Failed to stop container {}: {}", id, e),
            }
            if let Ok(Ok(code)) =
                tokio::time::timeout(self.config.log_drain_timeout, self.engine.wait(id)).await
            {
                session.record_exit(code).await;
            }
        }

        if let Some(tasks) = tasks {
            tasks.monitor.abort();
            let mut logs = tasks.logs;
            if tokio::time::timeout(self.config.log_drain_timeout, &mut logs)
                .await
                .is_err()
            {
                debug!("Log drain for session {} timed out", session.id());
                logs.abort();
            }
        }
        for line in session.flush_logs() {
            self.broadcaster.publish(SessionEvent::Log {
                session_id: session.id().to_string(),
                log: line,
            });
        }

        if let Some(id) = &container_id {
            self.remove_container(session.id(), id).await;
        }

        let state = session.state().await;
        self.metrics
            .record_finished(state, session.duration_ms().await);
        self.broadcaster.publish(SessionEvent::Closed {
            session_id: session.id().to_string(),
            status: state,
        });
        info!("Session {} cleaned up ({})", session.id(), state);
    }

    async fn remove_container(&self, session_id: &str, container_id: &str) {
        match self.engine.remove(container_id).await {
            Ok(()) => debug!(
                "Removed container {} of session {}",
                container_id, session_id
            ),
            Err(e) if e.is_already_gone() => {
                debug!("Container {} already gone", container_id)
            }
            Err(e) => warn!(
                "Failed to remove container {} of session {}: {}",
                container_id, session_id, e
            ),
        }
    }
}

/// Resolves with the first stop cause
async fn stop_requested(mut requests: watch::Receiver<Option<StopCause>>) -> StopCause {
    loop {
        let current = requests.borrow_and_update().clone();
        if let Some(cause) = current {
            return cause;
        }
        if requests.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn stop_reason(cause: &StopCause) -> &'static str {
    match cause {
        StopCause::Requested => "stopped by request",
        StopCause::Shutdown => "orchestrator shutdown",
    }
}
