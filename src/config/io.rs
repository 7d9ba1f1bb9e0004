//! Configuration I/O - Loading and saving configuration
//!
//! Handles reading configuration from files and environment variables.

use std::path::Path;
use std::time::Duration;
use tracing::warn;

use super::types::Config;
use crate::error::{Error, Result};

/// Load configuration with layered precedence:
/// 1. Config file (config.json / config.toml) if it exists, otherwise defaults
/// 2. Environment variable overrides (includes .env)
pub fn load_config() -> Result<Config> {
    // Load .env first so TOOLRUN_CONFIG from it is honored
    dotenvy::dotenv().ok();

    let config_path = super::paths::config_path();

    let mut config = if config_path.exists() {
        load_config_from_path(&config_path)?
    } else {
        Config::default()
    };

    // Apply environment variable overrides (highest precedence)
    apply_env_overrides(&mut config);

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    // Detect format by extension
    let config: Config = if path.extension().is_some_and(|ext| ext == "json") {
        // Parse as JSON5 (more lenient than strict JSON)
        json5::from_str(&content).map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))?
    } else if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))?
    } else {
        // Try JSON5 first, then TOML
        json5::from_str(&content)
            .or_else(|_| toml::from_str(&content).map_err(|e| Error::Config(e.to_string())))
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?
    };

    Ok(config)
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_duration(name: &str, value: &str) -> Option<Duration> {
    let text = serde_json::Value::String(value.trim().to_string());
    match humantime_serde::deserialize::<Duration, _>(text) {
        Ok(duration) => Some(duration),
        Err(_) => match value.trim().parse::<u64>() {
            Ok(secs) => Some(Duration::from_secs(secs)),
            Err(e) => {
                warn!("Ignoring {}={}: {}", name, value, e);
                None
            }
        },
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Apply environment variable overrides to an existing config.
///
/// Overlays any set `TOOLRUN_*` variable onto the config. Unparseable
/// values are logged and ignored.
pub fn apply_env_overrides(config: &mut Config) {
    // Server overrides
    if let Some(bind) = env_var("TOOLRUN_BIND") {
        config.server.bind = bind;
    }
    if let Some(port) = env_var("TOOLRUN_PORT") {
        match port.parse() {
            Ok(port) => config.server.port = port,
            Err(e) => warn!("Ignoring TOOLRUN_PORT={}: {}", port, e),
        }
    }

    // Orchestrator overrides
    if let Some(timeout) = env_var("TOOLRUN_EXECUTION_TIMEOUT") {
        if let Some(duration) = parse_duration("TOOLRUN_EXECUTION_TIMEOUT", &timeout) {
            config.orchestrator.execution_timeout = duration;
        }
    }
    if let Some(interval) = env_var("TOOLRUN_MONITOR_INTERVAL") {
        if let Some(duration) = parse_duration("TOOLRUN_MONITOR_INTERVAL", &interval) {
            config.orchestrator.monitor.interval = duration;
        }
    }
    if let Some(threshold) = env_var("TOOLRUN_KILL_THRESHOLD") {
        match threshold.parse() {
            Ok(v) => config.orchestrator.monitor.kill_threshold_percent = v,
            Err(e) => warn!("Ignoring TOOLRUN_KILL_THRESHOLD={}: {}", threshold, e),
        }
    }

    // Container overrides
    if let Some(engine) = env_var("TOOLRUN_ENGINE") {
        match engine.parse() {
            Ok(kind) => config.container.engine = kind,
            Err(e) => warn!("Ignoring TOOLRUN_ENGINE: {}", e),
        }
    }

    // Scan gate overrides
    if let Some(score) = env_var("TOOLRUN_BLOCK_RISK_SCORE") {
        match score.parse() {
            Ok(v) => config.security.block_risk_score = Some(v),
            Err(e) => warn!("Ignoring TOOLRUN_BLOCK_RISK_SCORE={}: {}", score, e),
        }
    }
    if let Some(flag) = env_var("TOOLRUN_BLOCK_CRITICAL") {
        config.security.block_on_critical = parse_flag(&flag);
    }
}

/// Save configuration to a file
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let content = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    } else {
        serde_json::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.server.port = 19000;
        config.orchestrator.execution_timeout = Duration::from_secs(42);
        save_config(&config, &path).unwrap();

        let loaded = load_config_from_path(&path).unwrap();
        assert_eq!(loaded.server.port, 19000);
        assert_eq!(loaded.orchestrator.execution_timeout, Duration::from_secs(42));
    }

    #[test]
    fn test_load_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [server]
            port = 8088

            [orchestrator]
            execution_timeout = "2m"

            [security]
            block_risk_score = 50

            [policy.defaults]
            max_memory_bytes = 268435456
            network_access = false

            [policy.ceilings]
            max_processes = 32
            "#,
        )
        .unwrap();

        let loaded = load_config_from_path(&path).unwrap();
        assert_eq!(loaded.server.port, 8088);
        assert_eq!(loaded.orchestrator.execution_timeout, Duration::from_secs(120));
        assert_eq!(loaded.security.block_risk_score, Some(50));
        assert_eq!(loaded.policy.defaults.max_memory_bytes, 256 * 1024 * 1024);
        assert_eq!(loaded.policy.defaults.max_processes, 10);
        assert_eq!(loaded.policy.ceilings.max_processes, 32);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ server: ").unwrap();
        assert!(matches!(
            load_config_from_path(&path),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_duration_and_flag_parsing() {
        assert_eq!(parse_duration("X", "90s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("X", "30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("X", "soon"), None);
        assert!(parse_flag("TRUE"));
        assert!(!parse_flag("0"));
    }
}
