//! Configuration paths
//!
//! Utilities for resolving configuration file paths.

use std::path::{Path, PathBuf};

/// Get the configuration directory
pub fn config_dir() -> PathBuf {
    // Check for explicit override
    if let Ok(dir) = std::env::var("TOOLRUN_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    // Use XDG config directory or fallback
    dirs::config_dir()
        .map(|d| d.join("toolrun"))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".config").join("toolrun"))
                .unwrap_or_else(|| PathBuf::from(".toolrun"))
        })
}

/// Get the main configuration file path.
///
/// `TOOLRUN_CONFIG` wins; otherwise `config.json`, or `config.toml` when
/// only that one exists.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("TOOLRUN_CONFIG") {
        return PathBuf::from(path);
    }
    config_file_in(&config_dir())
}

/// `config.json` in `dir`, or `config.toml` when only that one exists
fn config_file_in(dir: &Path) -> PathBuf {
    let json = dir.join("config.json");
    let toml = dir.join("config.toml");
    if !json.exists() && toml.exists() {
        toml
    } else {
        json
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    // Tests in this module share the process environment
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_config_dir_override() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempdir().unwrap();
        std::env::set_var("TOOLRUN_CONFIG_DIR", dir.path());
        std::env::remove_var("TOOLRUN_CONFIG");

        assert_eq!(config_dir(), dir.path());
        assert_eq!(config_path(), dir.path().join("config.json"));

        std::env::remove_var("TOOLRUN_CONFIG_DIR");
    }

    #[test]
    fn test_config_file_override_wins() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempdir().unwrap();
        let file = dir.path().join("custom.toml");
        std::env::set_var("TOOLRUN_CONFIG_DIR", dir.path());
        std::env::set_var("TOOLRUN_CONFIG", &file);

        assert_eq!(config_path(), file);

        std::env::remove_var("TOOLRUN_CONFIG");
        std::env::remove_var("TOOLRUN_CONFIG_DIR");
    }

    #[test]
    fn test_toml_fallback() {
        let dir = tempdir().unwrap();
        assert_eq!(config_file_in(dir.path()), dir.path().join("config.json"));

        std::fs::write(dir.path().join("config.toml"), "").unwrap();
        assert_eq!(config_file_in(dir.path()), dir.path().join("config.toml"));

        std::fs::write(dir.path().join("config.json"), "{}").unwrap();
        assert_eq!(config_file_in(dir.path()), dir.path().join("config.json"));
    }
}
