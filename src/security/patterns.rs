//! Versioned detection pattern table.
//!
//! Changing any entry (adding, removing, re-weighting) must bump
//! [`PATTERN_TABLE_VERSION`] so stored scan results can be told apart.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Version of the pattern table below
pub const PATTERN_TABLE_VERSION: u32 = 3;

/// Files above this size are flagged (possible DoS)
pub const OVERSIZED_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Finding severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Contribution of one finding to the risk score
    pub fn weight(&self) -> u32 {
        match self {
            Severity::Low => 2,
            Severity::Medium => 4,
            Severity::High => 7,
            Severity::Critical => 10,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// One compiled detection rule
#[derive(Debug)]
pub struct Pattern {
    pub id: &'static str,
    pub severity: Severity,
    pub description: &'static str,
    pub regex: Regex,
}

type RawPattern = (&'static str, Severity, &'static str, &'static str);

/// Rules applied to file contents
const CONTENT_RULES: &[RawPattern] = &[
    (
        "eval",
        Severity::Critical,
        "Dynamic code evaluation",
        r#"\beval\s*[("'`$]"#,
    ),
    (
        "function-constructor",
        Severity::Critical,
        "Code built at runtime via the Function constructor",
        r"\bnew\s+Function\s*\(",
    ),
    (
        "destructive-delete",
        Severity::Critical,
        "Recursive delete of the filesystem root",
        r"(?m)\brm\s+-(?:rf|fr|r\s+-f|f\s+-r)\s+/(?:\s|\*|$)",
    ),
    (
        "exec",
        Severity::High,
        "Direct exec call",
        r"\bexec(?:Sync|File|FileSync|v|vp|l|lp)?\s*\(",
    ),
    (
        "process-spawn",
        Severity::High,
        "Child process or shell spawning",
        r"\b(?:child_process|subprocess|os\.system|os\.popen|spawnSync|Deno\.Command|Process\.spawn|IO\.popen)\b",
    ),
    (
        "raw-socket",
        Severity::High,
        "Raw network socket",
        r"\b(?:socket\.socket|SOCK_RAW|dgram\.createSocket|net\.createConnection|net\.Socket|Deno\.connect|TCPSocket)\b",
    ),
    (
        "filesystem-escape",
        Severity::High,
        "Access to host-sensitive paths",
        r"/etc/(?:passwd|shadow|sudoers)|/proc/self|/var/run/docker\.sock|/sys/fs/cgroup",
    ),
    (
        "privilege-escalation",
        Severity::High,
        "Privilege escalation attempt",
        r"\b(?:sudo|setuid|setgid|chmod\s+[ugo]*\+s|nsenter|unshare)\b",
    ),
    (
        "path-traversal",
        Severity::Medium,
        "Path traversal",
        r"\.\.[/\\]",
    ),
    (
        "script-injection",
        Severity::Medium,
        "Markup or script injection",
        r"(?i)\binnerHTML\s*=|<script\b|document\.write\s*\(",
    ),
    (
        "remote-fetch",
        Severity::Low,
        "Downloads remote content",
        r"\b(?:curl|wget)\s",
    ),
    (
        "environment-read",
        Severity::Low,
        "Reads the process environment",
        r"\b(?:process\.env|os\.environ|Deno\.env|ENV\[)",
    ),
];

/// Rules applied to filenames
const FILENAME_RULES: &[RawPattern] = &[(
    "executable-file",
    Severity::Medium,
    "Executable or native binary in bundle",
    r"(?i)\.(?:exe|dll|so|dylib|bin|elf|msi|bat|cmd|com|scr|jar)$",
)];

fn compile(rules: &[RawPattern]) -> Vec<Pattern> {
    rules
        .iter()
        .filter_map(|(id, severity, description, source)| match Regex::new(source) {
            Ok(regex) => Some(Pattern {
                id,
                severity: *severity,
                description,
                regex,
            }),
            Err(e) => {
                error!("Invalid scan pattern {}: {}", id, e);
                None
            }
        })
        .collect()
}

/// Compiled content rules, in table order
pub static CONTENT_PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| compile(CONTENT_RULES));

/// Compiled filename rules, in table order
pub static FILENAME_PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| compile(FILENAME_RULES));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_patterns_compile() {
        assert_eq!(CONTENT_PATTERNS.len(), CONTENT_RULES.len());
        assert_eq!(FILENAME_PATTERNS.len(), FILENAME_RULES.len());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::Critical.weight(), 10);
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"high\"");
    }

    fn matches(id: &str, text: &str) -> bool {
        CONTENT_PATTERNS
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.regex.is_match(text))
            .unwrap_or(false)
    }

    #[test]
    fn test_pattern_samples() {
        assert!(matches("eval", "eval(input)"));
        assert!(matches("eval", "eval \"$CMD\""));
        assert!(!matches("eval", "evaluate(x)"));
        assert!(matches("destructive-delete", "rm -rf /"));
        assert!(!matches("destructive-delete", "rm -rf /tmp/build"));
        assert!(matches("exec", "execSync('ls')"));
        assert!(matches("process-spawn", "import subprocess"));
        assert!(matches("filesystem-escape", "open('/etc/passwd')"));
        assert!(matches("path-traversal", "../../secret"));
        assert!(matches("script-injection", "el.innerHTML = data"));
        assert!(matches("remote-fetch", "curl http://x"));
    }
}
