//! Static scan of a tool bundle.
//!
//! Pure functions over the bundle: the same bundle always yields the same
//! findings in the same order (file order, then table order).

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::patterns::{
    Pattern, Severity, CONTENT_PATTERNS, FILENAME_PATTERNS, OVERSIZED_FILE_BYTES,
    PATTERN_TABLE_VERSION,
};
use crate::sandbox::{BundleFile, ToolBundle};

/// Highest possible risk score
pub const MAX_RISK_SCORE: u32 = 100;

/// One pattern match against a bundle file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityFinding {
    pub file: String,
    pub severity: Severity,
    pub description: String,
    /// Rule id that matched
    pub matched_pattern: String,
    /// 1-based line of the first match, for content rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

/// Findings plus the derived risk score
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub findings: Vec<SecurityFinding>,
    pub risk_score: u32,
    pub pattern_version: u32,
}

impl ScanResult {
    fn from_findings(findings: Vec<SecurityFinding>) -> Self {
        let risk_score = risk_score(&findings);
        ScanResult {
            findings,
            risk_score,
            pattern_version: PATTERN_TABLE_VERSION,
        }
    }

    /// Number of findings with exactly `severity`
    pub fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }

    pub fn has_critical(&self) -> bool {
        self.count(Severity::Critical) > 0
    }

    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Most severe finding, if any
    pub fn max_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }
}

/// `min(100, 10·critical + 7·high + 4·medium + 2·low)`
pub fn risk_score(findings: &[SecurityFinding]) -> u32 {
    findings
        .iter()
        .map(|f| f.severity.weight())
        .sum::<u32>()
        .min(MAX_RISK_SCORE)
}

/// Scan every file of a bundle
pub fn scan(bundle: &ToolBundle) -> ScanResult {
    let findings = bundle.files.iter().flat_map(scan_file).collect();
    ScanResult::from_findings(findings)
}

/// Scan one file: filename rules, size, then content rules
pub fn scan_file(file: &BundleFile) -> Vec<SecurityFinding> {
    let mut findings = Vec::new();

    for pattern in FILENAME_PATTERNS.iter() {
        if pattern.regex.is_match(&file.filename) {
            findings.push(finding(file, pattern, None));
        }
    }

    if file.effective_size() > OVERSIZED_FILE_BYTES {
        findings.push(SecurityFinding {
            file: file.filename.clone(),
            severity: Severity::Medium,
            description: format!(
                "File larger than {}MB (possible resource exhaustion)",
                OVERSIZED_FILE_BYTES / (1024 * 1024)
            ),
            matched_pattern: "oversized-file".to_string(),
            line: None,
        });
    }

    for pattern in CONTENT_PATTERNS.iter() {
        if let Some(m) = pattern.regex.find(&file.content) {
            let line = file.content[..m.start()].matches('\n').count() + 1;
            findings.push(finding(file, pattern, Some(line)));
        }
    }

    findings
}

fn finding(file: &BundleFile, pattern: &Pattern, line: Option<usize>) -> SecurityFinding {
    SecurityFinding {
        file: file.filename.clone(),
        severity: pattern.severity,
        description: pattern.description.to_string(),
        matched_pattern: pattern.id.to_string(),
        line,
    }
}

/// Log a scan result against the session it belongs to
pub fn log_findings(session_id: &str, result: &ScanResult) {
    if result.is_clean() {
        return;
    }
    info!(
        "Session {} scan: {} finding(s), risk score {}",
        session_id,
        result.findings.len(),
        result.risk_score
    );
    for f in &result.findings {
        if f.severity >= Severity::High {
            warn!(
                "Session {} {} finding in {}: {} ({})",
                session_id, f.severity, f.file, f.description, f.matched_pattern
            );
        } else {
            info!(
                "Session {} {} finding in {}: {} ({})",
                session_id, f.severity, f.file, f.description, f.matched_pattern
            );
        }
    }
}
