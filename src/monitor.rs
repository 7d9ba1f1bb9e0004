//! Resource monitor
//!
//! One polling task per running session. Each sample replaces the session's
//! stats, is published to observers and is checked against the kill
//! threshold. A sustained violation is reported to the session supervisor,
//! which owns termination.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::config::MonitorConfig;
use crate::gateway::{EventBroadcaster, SessionEvent};
use crate::sandbox::{ContainerEngine, EngineStats};
use crate::session::{ExecutionSession, ResourceStats, SessionState};

/// Which limit was exceeded, with the observed percentage
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Violation {
    Cpu(f64),
    Memory(f64),
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::Cpu(pct) => write!(f, "CPU usage {:.1}% above limit", pct),
            Violation::Memory(pct) => write!(f, "memory usage {:.1}% above limit", pct),
        }
    }
}

/// CPU share of the host between two cumulative samples, scaled by online CPUs
pub fn cpu_percent(previous: &EngineStats, current: &EngineStats) -> f64 {
    let cpu_delta = current.cpu_total_ns.saturating_sub(previous.cpu_total_ns) as f64;
    let system_delta = current.system_cpu_ns.saturating_sub(previous.system_cpu_ns) as f64;
    if system_delta <= 0.0 || cpu_delta <= 0.0 {
        return 0.0;
    }
    let cpus = current.online_cpus.max(1) as f64;
    (cpu_delta / system_delta) * cpus * 100.0
}

/// Usage against the policy ceiling, not the engine-reported limit
pub fn memory_percent(usage_bytes: u64, ceiling_bytes: u64) -> f64 {
    if ceiling_bytes == 0 {
        return 0.0;
    }
    usage_bytes as f64 / ceiling_bytes as f64 * 100.0
}

/// Counts consecutive violating samples
#[derive(Debug, Clone)]
pub struct ViolationTracker {
    threshold: f64,
    required: u32,
    consecutive: u32,
}

impl ViolationTracker {
    pub fn new(threshold_percent: f64, required_samples: u32) -> Self {
        ViolationTracker {
            threshold: threshold_percent,
            required: required_samples.max(1),
            consecutive: 0,
        }
    }

    /// Feed one sample; returns the violation once it has been sustained
    pub fn observe(&mut self, cpu: f64, memory: f64) -> Option<Violation> {
        let violation = if memory > self.threshold {
            Some(Violation::Memory(memory))
        } else if cpu > self.threshold {
            Some(Violation::Cpu(cpu))
        } else {
            None
        };

        match violation {
            Some(v) => {
                self.consecutive += 1;
                (self.consecutive >= self.required).then_some(v)
            }
            None => {
                self.consecutive = 0;
                None
            }
        }
    }
}

pub struct ResourceMonitor {
    engine: Arc<dyn ContainerEngine>,
    broadcaster: Arc<EventBroadcaster>,
    config: MonitorConfig,
}

impl ResourceMonitor {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        broadcaster: Arc<EventBroadcaster>,
        config: MonitorConfig,
    ) -> Self {
        ResourceMonitor {
            engine,
            broadcaster,
            config,
        }
    }

    /// Start polling `container_id` for `session` until it leaves `Running`.
    ///
    /// At most one violation is sent on `violations`.
    pub fn spawn(
        self,
        session: Arc<ExecutionSession>,
        container_id: String,
        violations: mpsc::Sender<Violation>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(session, container_id, violations).await })
    }

    async fn run(
        self,
        session: Arc<ExecutionSession>,
        container_id: String,
        violations: mpsc::Sender<Violation>,
    ) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cancelled = session.cancelled();
        let mut tracker =
            ViolationTracker::new(self.config.kill_threshold_percent, self.config.sustained_samples);
        let mut previous: Option<EngineStats> = None;
        let ceiling = session.policy().max_memory_bytes;

        loop {
            tokio::select! {
                _ = cancelled.changed() => break,
                _ = ticker.tick() => {}
            }
            if session.state().await != SessionState::Running {
                break;
            }

            let raw = match self.engine.stats(&container_id).await {
                Ok(raw) => raw,
                Err(e) if e.is_already_gone() => break,
                Err(e) => {
                    debug!("Stats read failed for session {}: {}", session.id(), e);
                    continue;
                }
            };

            let cpu = previous
                .as_ref()
                .map(|prev| cpu_percent(prev, &raw))
                .unwrap_or(0.0);
            let memory = memory_percent(raw.memory_usage_bytes, ceiling);
            previous = Some(raw);

            let stats = ResourceStats {
                cpu_percent: cpu,
                memory_percent: memory,
                memory_bytes: raw.memory_usage_bytes,
                network_bytes: raw.network_bytes,
                disk_bytes: raw.disk_bytes,
                sampled_at: Utc::now(),
            };
            session.update_stats(stats).await;
            self.broadcaster.publish(SessionEvent::Stats {
                session_id: session.id().to_string(),
                stats,
            });

            if let Some(violation) = tracker.observe(cpu, memory) {
                warn!("Session {} sustained violation: {}", session.id(), violation);
                let _ = violations.send(violation).await;
                break;
            }
        }
        debug!("Monitor for session {} exited", session.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{ContainerSpec, MockBehavior, MockEngine, ResourcePolicy, ToolBundle};
    use crate::sandbox::Language;
    use crate::security::ScanResult;
    use std::time::Duration;

    fn sample(cpu_ns: u64, system_ns: u64, cpus: u32) -> EngineStats {
        EngineStats {
            cpu_total_ns: cpu_ns,
            system_cpu_ns: system_ns,
            online_cpus: cpus,
            ..Default::default()
        }
    }

    #[test]
    fn test_cpu_percent_from_deltas() {
        let prev = sample(1_000, 10_000, 4);
        let cur = sample(2_000, 20_000, 4);
        assert!((cpu_percent(&prev, &cur) - 40.0).abs() < 1e-9);
        assert_eq!(cpu_percent(&cur, &cur), 0.0);
        assert_eq!(cpu_percent(&cur, &prev), 0.0);
    }

    #[test]
    fn test_memory_percent_against_policy() {
        assert_eq!(memory_percent(256, 512), 50.0);
        assert_eq!(memory_percent(10, 0), 0.0);
    }

    #[test]
    fn test_single_spike_is_tolerated() {
        let mut tracker = ViolationTracker::new(80.0, 2);
        assert_eq!(tracker.observe(95.0, 10.0), None);
        assert_eq!(tracker.observe(10.0, 10.0), None);
        assert_eq!(tracker.observe(95.0, 10.0), None);
        assert_eq!(tracker.observe(96.0, 10.0), Some(Violation::Cpu(96.0)));
    }

    #[test]
    fn test_memory_reported_first() {
        let mut tracker = ViolationTracker::new(80.0, 1);
        assert_eq!(tracker.observe(99.0, 90.0), Some(Violation::Memory(90.0)));
    }

    #[tokio::test]
    async fn test_monitor_reports_sustained_cpu() {
        let engine = Arc::new(MockEngine::with_default(MockBehavior::spins(95.0)));
        let container_id = engine.create(&ContainerSpec::default()).await.unwrap();
        engine.start(&container_id).await.unwrap();

        let session = Arc::new(ExecutionSession::new(
            "s-1",
            "alice",
            Language::JavaScript,
            ToolBundle::single("index.js", "while(true){}"),
            ResourcePolicy::default(),
            ScanResult::default(),
            10,
        ));
        session.transition(SessionState::Provisioning, None).await.unwrap();
        session.transition(SessionState::Running, None).await.unwrap();

        let config = MonitorConfig {
            interval: Duration::from_millis(10),
            kill_threshold_percent: 80.0,
            sustained_samples: 2,
        };
        let (tx, mut rx) = mpsc::channel(1);
        let handle = ResourceMonitor::new(engine, Arc::new(EventBroadcaster::new()), config)
            .spawn(session.clone(), container_id, tx);

        let violation = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(violation, Violation::Cpu(pct) if pct > 80.0));
        handle.await.unwrap();
        assert!(session.stats().await.is_some());
    }

    #[tokio::test]
    async fn test_monitor_stops_on_cancel() {
        let engine = Arc::new(MockEngine::with_default(MockBehavior::runs_forever()));
        let container_id = engine.create(&ContainerSpec::default()).await.unwrap();
        engine.start(&container_id).await.unwrap();

        let session = Arc::new(ExecutionSession::new(
            "s-2",
            "alice",
            Language::Python,
            ToolBundle::single("main.py", "pass"),
            ResourcePolicy::default(),
            ScanResult::default(),
            10,
        ));
        session.transition(SessionState::Provisioning, None).await.unwrap();
        session.transition(SessionState::Running, None).await.unwrap();

        let (tx, _rx) = mpsc::channel(1);
        let handle = ResourceMonitor::new(
            engine,
            Arc::new(EventBroadcaster::new()),
            MonitorConfig {
                interval: Duration::from_secs(3600),
                ..Default::default()
            },
        )
        .spawn(session.clone(), container_id, tx);

        session.transition(SessionState::Stopped, None).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
