//! Security scan gate configuration

use serde::{Deserialize, Serialize};

use crate::security::ScanResult;

/// Whether scan findings may stop an execution.
///
/// Both knobs are off by default, which makes the scanner advisory only:
/// findings are logged and attached to the session but never block it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPolicy {
    /// Block when the risk score is strictly above this value
    #[serde(default)]
    pub block_risk_score: Option<u32>,
    /// Block when any finding is critical
    #[serde(default)]
    pub block_on_critical: bool,
}

impl ScanPolicy {
    /// Advisory-only policy
    pub fn advisory() -> Self {
        ScanPolicy::default()
    }

    pub fn is_advisory(&self) -> bool {
        self.block_risk_score.is_none() && !self.block_on_critical
    }

    /// Reason to refuse the execution, if this policy blocks `result`
    pub fn evaluate(&self, result: &ScanResult) -> Option<String> {
        if self.block_on_critical && result.has_critical() {
            return Some(format!(
                "{} critical finding(s)",
                result.count(crate::security::Severity::Critical)
            ));
        }
        match self.block_risk_score {
            Some(threshold) if result.risk_score > threshold => Some(format!(
                "risk score {} exceeds threshold {}",
                result.risk_score, threshold
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ToolBundle;
    use crate::security::scan;

    fn critical_scan() -> ScanResult {
        scan(&ToolBundle::single("hack.sh", "eval(\"$X\")"))
    }

    #[test]
    fn test_advisory_never_blocks() {
        let policy = ScanPolicy::advisory();
        assert!(policy.is_advisory());
        assert_eq!(policy.evaluate(&critical_scan()), None);
    }

    #[test]
    fn test_block_on_critical() {
        let policy = ScanPolicy {
            block_on_critical: true,
            ..Default::default()
        };
        assert!(policy.evaluate(&critical_scan()).is_some());
        assert_eq!(policy.evaluate(&ScanResult::default()), None);
    }

    #[test]
    fn test_threshold_is_strict() {
        let policy = ScanPolicy {
            block_risk_score: Some(10),
            ..Default::default()
        };
        assert_eq!(policy.evaluate(&critical_scan()), None);
        let policy = ScanPolicy {
            block_risk_score: Some(9),
            ..Default::default()
        };
        assert!(policy.evaluate(&critical_scan()).is_some());
    }
}
