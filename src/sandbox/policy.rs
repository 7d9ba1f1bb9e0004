//! Resource and isolation policy for sessions
//!
//! A [`ResourcePolicy`] is plain data. It is resolved once per session from
//! the configured defaults plus optional caller overrides (clamped to the
//! configured ceilings) and never changes after provisioning.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::warn;

use super::language::Language;
use crate::error::{Error, Result};

const MB: u64 = 1024 * 1024;

/// Per-session resource and isolation limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcePolicy {
    /// Memory ceiling in bytes
    pub max_memory_bytes: u64,
    /// CPU budget in seconds; also caps the wall-clock budget
    pub max_cpu_seconds: u64,
    /// Process limit
    pub max_processes: u32,
    /// Open file descriptor limit
    pub max_open_files: u64,
    /// Whether the container gets a network at all
    pub network_access: bool,
    /// Ports a tool may listen on when previewed as a web server
    pub allowed_ports: BTreeSet<u16>,
    /// System paths remounted read-only
    pub read_only_paths: Vec<String>,
    /// Paths masked from the sandboxed process
    pub blocked_paths: Vec<String>,
    /// Writable scratch mount
    pub scratch: ScratchMount,
    /// Environment variable names that must never reach the sandbox
    pub env_denylist: Vec<String>,
}

/// tmpfs scratch directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScratchMount {
    pub path: String,
    pub size_bytes: u64,
    pub options: String,
}

impl Default for ScratchMount {
    fn default() -> Self {
        ScratchMount {
            path: "/tmp".to_string(),
            size_bytes: 64 * MB,
            options: "rw,noexec,nosuid,nodev".to_string(),
        }
    }
}

impl ScratchMount {
    /// Mount options in engine tmpfs syntax
    pub fn mount_options(&self) -> String {
        format!("{},size={}", self.options, self.size_bytes)
    }
}

impl Default for ResourcePolicy {
    fn default() -> Self {
        ResourcePolicy {
            max_memory_bytes: 512 * MB,
            max_cpu_seconds: 300,
            max_processes: 10,
            max_open_files: 100,
            network_access: false,
            allowed_ports: [3000, 5000, 8000, 8080].into_iter().collect(),
            read_only_paths: default_read_only_paths(),
            blocked_paths: default_blocked_paths(),
            scratch: ScratchMount::default(),
            env_denylist: default_env_denylist(),
        }
    }
}

fn default_read_only_paths() -> Vec<String> {
    ["/bin", "/sbin", "/usr", "/lib", "/etc"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// Whole /proc, /sys and /dev cannot be hidden without breaking every runtime,
// so the sensitive subtrees are masked instead.
fn default_blocked_paths() -> Vec<String> {
    [
        "/proc/kcore",
        "/proc/keys",
        "/proc/kmsg",
        "/proc/sysrq-trigger",
        "/proc/timer_list",
        "/proc/sched_debug",
        "/proc/acpi",
        "/proc/scsi",
        "/sys/firmware",
        "/sys/kernel",
        "/sys/fs/cgroup",
        "/dev/mem",
        "/dev/kmem",
        "/dev/port",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_env_denylist() -> Vec<String> {
    [
        "PATH",
        "HOME",
        "USER",
        "SHELL",
        "SESSION_ID",
        "EXECUTION_MODE",
        "LD_*",
        "DYLD_*",
        "NODE_OPTIONS",
        "PYTHONPATH",
        "PYTHONSTARTUP",
        "RUBYLIB",
        "BASH_ENV",
        "ENV",
        "AWS_*",
        "GOOGLE_*",
        "AZURE_*",
        "DOCKER_*",
        "*SECRET*",
        "*TOKEN*",
        "*PASSWORD*",
        "*PASSWD*",
        "*CREDENTIAL*",
        "*_KEY",
        "*APIKEY*",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Optional caller-supplied adjustments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyOverrides {
    #[serde(default)]
    pub max_memory_bytes: Option<u64>,
    #[serde(default)]
    pub max_cpu_seconds: Option<u64>,
    #[serde(default)]
    pub max_processes: Option<u32>,
    #[serde(default)]
    pub max_open_files: Option<u64>,
    #[serde(default)]
    pub network_access: Option<bool>,
    #[serde(default)]
    pub allowed_ports: Option<BTreeSet<u16>>,
}

/// Upper bounds no override may exceed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyCeilings {
    pub max_memory_bytes: u64,
    pub max_cpu_seconds: u64,
    pub max_processes: u32,
    pub max_open_files: u64,
    pub allow_network: bool,
}

impl Default for PolicyCeilings {
    fn default() -> Self {
        PolicyCeilings {
            max_memory_bytes: 2048 * MB,
            max_cpu_seconds: 600,
            max_processes: 64,
            max_open_files: 1024,
            allow_network: false,
        }
    }
}

/// Default policy
pub fn default_policy() -> ResourcePolicy {
    ResourcePolicy::default()
}

fn clamp<T: PartialOrd + Copy + std::fmt::Display>(field: &str, value: T, ceiling: T) -> T {
    if value > ceiling {
        warn!("Policy override {}={} exceeds ceiling {}, clamping", field, value, ceiling);
        ceiling
    } else {
        value
    }
}

impl ResourcePolicy {
    /// Apply caller overrides to this policy, bounded by `ceilings`.
    ///
    /// Values above a ceiling are clamped; zero limits are rejected.
    pub fn with_overrides(
        &self,
        overrides: &PolicyOverrides,
        ceilings: &PolicyCeilings,
    ) -> Result<ResourcePolicy> {
        let mut policy = self.clone();

        if let Some(v) = overrides.max_memory_bytes {
            policy.max_memory_bytes = clamp("maxMemoryBytes", v, ceilings.max_memory_bytes);
        }
        if let Some(v) = overrides.max_cpu_seconds {
            policy.max_cpu_seconds = clamp("maxCpuSeconds", v, ceilings.max_cpu_seconds);
        }
        if let Some(v) = overrides.max_processes {
            policy.max_processes = clamp("maxProcesses", v, ceilings.max_processes);
        }
        if let Some(v) = overrides.max_open_files {
            policy.max_open_files = clamp("maxOpenFiles", v, ceilings.max_open_files);
        }
        if let Some(network) = overrides.network_access {
            if network && !ceilings.allow_network {
                warn!("Network access requested but not permitted by ceilings");
            }
            policy.network_access = network && ceilings.allow_network;
        }
        if let Some(ports) = &overrides.allowed_ports {
            policy.allowed_ports = ports.iter().copied().filter(|p| *p >= 1024).collect();
        }

        policy.check()?;
        Ok(policy)
    }

    /// Reject limits the engine cannot express
    pub fn check(&self) -> Result<()> {
        if self.max_memory_bytes < 4 * MB {
            return Err(Error::InvalidInput(
                "maxMemoryBytes must be at least 4MB".to_string(),
            ));
        }
        if self.max_cpu_seconds == 0 {
            return Err(Error::InvalidInput("maxCpuSeconds must be positive".to_string()));
        }
        if self.max_processes == 0 {
            return Err(Error::InvalidInput("maxProcesses must be positive".to_string()));
        }
        if self.max_open_files < 16 {
            return Err(Error::InvalidInput(
                "maxOpenFiles must be at least 16".to_string(),
            ));
        }
        Ok(())
    }

    /// Wall-clock budget: the configured timeout, never longer than the CPU budget
    pub fn time_budget(&self, wall_clock: Duration) -> Duration {
        wall_clock.min(Duration::from_secs(self.max_cpu_seconds))
    }

    /// Whether `name` may be passed to the sandboxed process
    pub fn is_env_denied(&self, name: &str) -> bool {
        let name = name.to_ascii_uppercase();
        self.env_denylist.iter().any(|pattern| {
            let pattern = pattern.to_ascii_uppercase();
            match (pattern.strip_prefix('*'), pattern.strip_suffix('*')) {
                (Some(_), Some(_)) => name.contains(pattern.trim_matches('*')),
                (Some(suffix), None) => name.ends_with(suffix),
                (None, Some(prefix)) => name.starts_with(prefix),
                (None, None) => name == pattern,
            }
        })
    }

    /// Build the complete sandbox environment.
    ///
    /// Fixed minimal base, session markers, language defaults, then caller
    /// variables that survive the denylist. Nothing is read from the host.
    pub fn sandbox_env(
        &self,
        session_id: &str,
        language: Language,
        caller_env: &HashMap<String, String>,
    ) -> Vec<String> {
        let mut env = vec![
            "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string(),
            "HOME=/tmp".to_string(),
            "USER=sandbox".to_string(),
            "SHELL=/bin/sh".to_string(),
            format!("SESSION_ID={}", session_id),
            "EXECUTION_MODE=isolated".to_string(),
            format!(
                "SANDBOX_NETWORK={}",
                if self.network_access { "enabled" } else { "disabled" }
            ),
        ];
        env.extend(
            language
                .runtime_env()
                .iter()
                .map(|(k, v)| format!("{}={}", k, v)),
        );

        let mut names: Vec<&String> = caller_env.keys().collect();
        names.sort();
        for name in names {
            if name.is_empty() || name.contains('=') || self.is_env_denied(name) {
                warn!("Dropping denied environment variable {}", name);
                continue;
            }
            env.push(format!("{}={}", name, caller_env[name]));
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_values() {
        let policy = default_policy();
        assert_eq!(policy.max_memory_bytes, 512 * MB);
        assert_eq!(policy.max_cpu_seconds, 300);
        assert_eq!(policy.max_processes, 10);
        assert_eq!(policy.max_open_files, 100);
        assert!(!policy.network_access);
        assert!(policy.scratch.mount_options().contains("noexec"));
        assert!(policy.scratch.mount_options().contains("nosuid"));
    }

    #[test]
    fn test_overrides_clamped_to_ceilings() {
        let overrides = PolicyOverrides {
            max_memory_bytes: Some(64 * 1024 * MB),
            max_cpu_seconds: Some(2),
            network_access: Some(true),
            ..Default::default()
        };
        let policy = default_policy()
            .with_overrides(&overrides, &PolicyCeilings::default())
            .unwrap();
        assert_eq!(policy.max_memory_bytes, 2048 * MB);
        assert_eq!(policy.max_cpu_seconds, 2);
        assert!(!policy.network_access);

        let zero = PolicyOverrides {
            max_processes: Some(0),
            ..Default::default()
        };
        assert!(default_policy()
            .with_overrides(&zero, &PolicyCeilings::default())
            .is_err());
    }

    #[test]
    fn test_time_budget() {
        let mut policy = default_policy();
        assert_eq!(
            policy.time_budget(Duration::from_secs(60)),
            Duration::from_secs(60)
        );
        policy.max_cpu_seconds = 2;
        assert_eq!(
            policy.time_budget(Duration::from_secs(300)),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_env_denylist() {
        let policy = default_policy();
        assert!(policy.is_env_denied("LD_PRELOAD"));
        assert!(policy.is_env_denied("ld_library_path"));
        assert!(policy.is_env_denied("PATH"));
        assert!(policy.is_env_denied("GITHUB_TOKEN"));
        assert!(policy.is_env_denied("STRIPE_SECRET_KEY"));
        assert!(policy.is_env_denied("AWS_REGION"));
        assert!(!policy.is_env_denied("GREETING"));
    }

    #[test]
    fn test_sandbox_env() {
        let policy = default_policy();
        let mut caller = HashMap::new();
        caller.insert("GREETING".to_string(), "hi".to_string());
        caller.insert("LD_PRELOAD".to_string(), "/evil.so".to_string());
        caller.insert("PATH".to_string(), "/attacker".to_string());

        let env = policy.sandbox_env("sess-1", Language::Python, &caller);
        assert!(env.contains(&"SESSION_ID=sess-1".to_string()));
        assert!(env.contains(&"EXECUTION_MODE=isolated".to_string()));
        assert!(env.contains(&"PYTHONUNBUFFERED=1".to_string()));
        assert!(env.contains(&"GREETING=hi".to_string()));
        assert!(!env.iter().any(|e| e.starts_with("LD_PRELOAD")));
        assert_eq!(env.iter().filter(|e| e.starts_with("PATH=")).count(), 1);
        assert!(!env.iter().any(|e| e.contains("/attacker")));
    }
}
