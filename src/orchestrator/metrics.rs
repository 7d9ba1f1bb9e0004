//! Process-wide execution metrics (reset on restart)

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

use crate::session::SessionState;

/// Weight of the newest completion in the running average
const AVERAGE_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    /// Accepted executions
    pub total_executions: u64,
    /// Sessions not yet terminal (live from the registry)
    pub active_executions: u64,
    /// Failed, timed out or resource-killed sessions
    pub failed_executions: u64,
    pub average_execution_time_ms: f64,
    pub completed_executions: u64,
    pub stopped_executions: u64,
    pub timed_out_executions: u64,
    pub resource_killed_executions: u64,
    /// Requests refused by the scan gate
    pub blocked_executions: u64,
}

#[derive(Debug, Default)]
pub struct MetricsTracker {
    inner: Mutex<Metrics>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Metrics> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_started(&self) {
        self.lock().total_executions += 1;
    }

    pub fn record_blocked(&self) {
        self.lock().blocked_executions += 1;
    }

    /// Count one terminal session; `duration_ms` is `None` if it never ran
    pub fn record_finished(&self, state: SessionState, duration_ms: Option<i64>) {
        let mut metrics = self.lock();
        match state {
            SessionState::Completed => metrics.completed_executions += 1,
            SessionState::Stopped => metrics.stopped_executions += 1,
            SessionState::TimedOut => metrics.timed_out_executions += 1,
            SessionState::ResourceKilled => metrics.resource_killed_executions += 1,
            _ => {}
        }
        if state.is_failure() {
            metrics.failed_executions += 1;
        }

        if let Some(duration) = duration_ms {
            let sample = duration.max(0) as f64;
            let finished_with_duration = metrics.completed_executions
                + metrics.stopped_executions
                + metrics.failed_executions;
            metrics.average_execution_time_ms = if finished_with_duration <= 1
                || metrics.average_execution_time_ms == 0.0
            {
                sample
            } else {
                metrics.average_execution_time_ms * (1.0 - AVERAGE_WEIGHT) + sample * AVERAGE_WEIGHT
            };
        }
    }

    /// Snapshot with the live active count filled in
    pub fn snapshot(&self, active: usize) -> Metrics {
        let mut metrics = self.lock().clone();
        metrics.active_executions = active as u64;
        metrics
    }
}
