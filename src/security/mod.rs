//! Security module - static analysis of submitted bundles
//!
//! The scanner is advisory unless a [`ScanPolicy`](crate::config::ScanPolicy)
//! says otherwise; it is never an isolation boundary.

mod patterns;
mod scanner;

pub use patterns::{Severity, OVERSIZED_FILE_BYTES, PATTERN_TABLE_VERSION};
pub use scanner::{log_findings, risk_score, scan, scan_file, ScanResult, SecurityFinding};
