//! Configuration validation
//!
//! Validates configuration and reports issues.

use std::time::Duration;

use super::types::Config;
use super::types::sandbox::EngineKind;

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({})", suggestion)?;
        }
        Ok(())
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    result = validate_orchestrator_config(config, result);
    result = validate_policy_config(config, result);
    result = validate_container_config(config, result);
    result = validate_security_config(config, result);

    result
}

fn validate_orchestrator_config(
    config: &Config,
    mut result: ConfigValidationResult,
) -> ConfigValidationResult {
    let orchestrator = &config.orchestrator;
    let monitor = &orchestrator.monitor;

    if monitor.interval < Duration::from_secs(1) || monitor.interval > Duration::from_secs(5) {
        result = result.with_error(
            ValidationIssue::new(
                "orchestrator.monitor.interval",
                format!(
                    "Monitor interval must be between 1s and 5s, got {:?}",
                    monitor.interval
                ),
            )
            .with_suggestion("Use the default of 2s"),
        );
    }

    if !(monitor.kill_threshold_percent > 0.0 && monitor.kill_threshold_percent <= 100.0) {
        result = result.with_error(ValidationIssue::new(
            "orchestrator.monitor.kill_threshold_percent",
            "Kill threshold must be in (0, 100]",
        ));
    }

    if monitor.sustained_samples == 0 {
        result = result.with_error(ValidationIssue::new(
            "orchestrator.monitor.sustained_samples",
            "At least one violating sample is required before killing a session",
        ));
    }

    if orchestrator.execution_timeout.is_zero() {
        result = result.with_error(ValidationIssue::new(
            "orchestrator.execution_timeout",
            "Execution timeout must be positive",
        ));
    }

    if orchestrator.log_buffer_lines == 0 {
        result = result.with_error(ValidationIssue::new(
            "orchestrator.log_buffer_lines",
            "Log buffer must hold at least one line",
        ));
    }

    if orchestrator.log_tail_lines > orchestrator.log_buffer_lines {
        result = result.with_warning(ValidationIssue::new(
            "orchestrator.log_tail_lines",
            "Log tail is larger than the log buffer and will be truncated",
        ));
    }

    if orchestrator.termination_grace > orchestrator.shutdown_grace {
        result = result.with_warning(
            ValidationIssue::new(
                "orchestrator.termination_grace",
                "Termination grace exceeds the shutdown deadline",
            )
            .with_suggestion("Raise orchestrator.shutdown_grace"),
        );
    }

    result
}

fn validate_policy_config(
    config: &Config,
    mut result: ConfigValidationResult,
) -> ConfigValidationResult {
    let defaults = &config.policy.defaults;
    let ceilings = &config.policy.ceilings;

    if let Err(e) = defaults.check() {
        result = result.with_error(ValidationIssue::new("policy.defaults", e.to_string()));
    }

    if defaults.max_memory_bytes > ceilings.max_memory_bytes
        || defaults.max_cpu_seconds > ceilings.max_cpu_seconds
        || defaults.max_processes > ceilings.max_processes
        || defaults.max_open_files > ceilings.max_open_files
    {
        result = result.with_error(
            ValidationIssue::new("policy.defaults", "Default policy exceeds policy ceilings")
                .with_suggestion("Lower the defaults or raise policy.ceilings"),
        );
    }

    if defaults.network_access && !ceilings.allow_network {
        result = result.with_error(ValidationIssue::new(
            "policy.defaults.network_access",
            "Default policy enables network but ceilings forbid it",
        ));
    }

    if defaults.network_access {
        result = result.with_warning(ValidationIssue::new(
            "policy.defaults.network_access",
            "Every session will get network access",
        ));
    }

    if Duration::from_secs(defaults.max_cpu_seconds) < config.orchestrator.execution_timeout {
        result = result.with_warning(ValidationIssue::new(
            "policy.defaults.maxCpuSeconds",
            "CPU budget is shorter than the execution timeout and will cap it",
        ));
    }

    result
}

fn validate_container_config(
    config: &Config,
    mut result: ConfigValidationResult,
) -> ConfigValidationResult {
    let container = &config.container;

    if container.cpu_limit <= 0.0 {
        result = result.with_error(ValidationIssue::new(
            "container.cpu_limit",
            "CPU limit must be positive",
        ));
    }

    for (language, image) in &container.images {
        if image.trim().is_empty() {
            result = result.with_error(ValidationIssue::new(
                format!("container.images.{}", language),
                "Image override is empty",
            ));
        }
    }

    if container.user.starts_with("0:") || container.user == "0" || container.user == "root" {
        result = result.with_warning(
            ValidationIssue::new("container.user", "Sandboxed processes will run as root")
                .with_suggestion("Use an unprivileged uid:gid such as 65534:65534"),
        );
    }

    if container.engine == EngineKind::Mock {
        result = result.with_warning(ValidationIssue::new(
            "container.engine",
            "Mock engine selected; no code will actually run",
        ));
    }

    result
}

fn validate_security_config(
    config: &Config,
    mut result: ConfigValidationResult,
) -> ConfigValidationResult {
    if let Some(threshold) = config.security.block_risk_score {
        if threshold >= 100 {
            result = result.with_warning(ValidationIssue::new(
                "security.block_risk_score",
                "Risk scores never exceed 100, so this threshold never blocks",
            ));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        let result = validate_config(&config);
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_monitor_interval_bounds() {
        let mut config = Config::default();
        config.orchestrator.monitor.interval = Duration::from_millis(200);
        let result = validate_config(&config);
        assert!(!result.valid);
        assert_eq!(result.errors[0].path, "orchestrator.monitor.interval");
    }

    #[test]
    fn test_defaults_above_ceilings() {
        let mut config = Config::default();
        config.policy.defaults.max_processes = 1000;
        let result = validate_config(&config);
        assert!(result
            .errors
            .iter()
            .any(|issue| issue.path == "policy.defaults"));
    }

    #[test]
    fn test_mock_engine_warns() {
        let mut config = Config::default();
        config.container.engine = EngineKind::Mock;
        let result = validate_config(&config);
        assert!(result.valid);
        assert!(result
            .warnings
            .iter()
            .any(|issue| issue.path == "container.engine"));
    }
}
