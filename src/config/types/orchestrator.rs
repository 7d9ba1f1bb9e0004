//! Orchestrator and resource monitor settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session lifecycle timing and buffering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Wall-clock budget per session (also capped by the policy CPU budget)
    #[serde(default = "default_execution_timeout", with = "humantime_serde")]
    pub execution_timeout: Duration,
    /// SIGTERM to SIGKILL grace period
    #[serde(default = "default_termination_grace", with = "humantime_serde")]
    pub termination_grace: Duration,
    /// Overall deadline for stopping everything at shutdown
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,
    /// How long a finished session's logs may keep arriving
    #[serde(default = "default_log_drain_timeout", with = "humantime_serde")]
    pub log_drain_timeout: Duration,
    /// How long terminal sessions stay queryable
    #[serde(default = "default_session_retention", with = "humantime_serde")]
    pub session_retention: Duration,
    /// Lines kept per session
    #[serde(default = "default_log_buffer_lines")]
    pub log_buffer_lines: usize,
    /// Lines replayed to a new subscriber
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            execution_timeout: default_execution_timeout(),
            termination_grace: default_termination_grace(),
            shutdown_grace: default_shutdown_grace(),
            log_drain_timeout: default_log_drain_timeout(),
            session_retention: default_session_retention(),
            log_buffer_lines: default_log_buffer_lines(),
            log_tail_lines: default_log_tail_lines(),
            monitor: MonitorConfig::default(),
        }
    }
}

fn default_execution_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_termination_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(30)
}

fn default_log_drain_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_session_retention() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_log_buffer_lines() -> usize {
    1000
}

fn default_log_tail_lines() -> usize {
    100
}

/// Resource monitor polling and enforcement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Poll interval (1-5s)
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,
    /// CPU or memory percentage that counts as a violation
    #[serde(default = "default_kill_threshold")]
    pub kill_threshold_percent: f64,
    /// Consecutive violating samples before the session is killed
    #[serde(default = "default_sustained_samples")]
    pub sustained_samples: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            interval: default_interval(),
            kill_threshold_percent: default_kill_threshold(),
            sustained_samples: default_sustained_samples(),
        }
    }
}

fn default_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_kill_threshold() -> f64 {
    80.0
}

fn default_sustained_samples() -> u32 {
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_humantime_fields() {
        let config: OrchestratorConfig = toml::from_str(
            r#"
            execution_timeout = "90s"
            termination_grace = "500ms"

            [monitor]
            interval = "1s"
            kill_threshold_percent = 90.0
            "#,
        )
        .unwrap();
        assert_eq!(config.execution_timeout, Duration::from_secs(90));
        assert_eq!(config.termination_grace, Duration::from_millis(500));
        assert_eq!(config.monitor.interval, Duration::from_secs(1));
        assert_eq!(config.monitor.sustained_samples, 2);
        assert_eq!(config.log_buffer_lines, 1000);
    }
}
