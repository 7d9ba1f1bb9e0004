//! Control API request/response types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::sandbox::{Language, PolicyOverrides, ToolBundle};
use crate::session::{SessionState, SessionView};

// ============================================================================
// Execute
// ============================================================================

/// Caller options for one execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOptions {
    /// Runtime language; detected from the bundle when absent
    #[serde(default)]
    pub language: Option<Language>,
    /// Policy adjustments, bounded by the configured ceilings
    #[serde(default)]
    pub policy: Option<PolicyOverrides>,
    /// Extra environment for the tool (denylisted names are dropped)
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// `POST /api/v1/execute`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub bundle: ToolBundle,
    #[serde(default)]
    pub options: ExecuteOptions,
}

/// Accepted execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub session_id: String,
    pub status: SessionState,
}

// ============================================================================
// Stop / sessions
// ============================================================================

/// `POST /api/v1/stop/{id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResponse {
    pub session_id: String,
    pub status: SessionState,
}

/// `GET /api/v1/sessions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsListResponse {
    pub sessions: Vec<SessionView>,
    pub total: usize,
}

/// Error body for every non-2xx Control API response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_request_minimal() {
        let request: ExecuteRequest = serde_json::from_str(
            r#"{"bundle":{"files":[{"filename":"index.js","content":"console.log(\"ok\")"}]}}"#,
        )
        .unwrap();
        assert_eq!(request.bundle.len(), 1);
        assert_eq!(request.options, ExecuteOptions::default());
    }

    #[test]
    fn test_execute_request_with_options() {
        let request: ExecuteRequest = serde_json::from_str(
            r#"{
                "bundle": {"files": [{"filename": "main.py", "content": "print(1)"}]},
                "options": {
                    "language": "python",
                    "policy": {"maxCpuSeconds": 2},
                    "env": {"MODE": "fast"}
                }
            }"#,
        )
        .unwrap();
        assert_eq!(request.options.language, Some(Language::Python));
        assert_eq!(
            request.options.policy.unwrap().max_cpu_seconds,
            Some(2)
        );
        assert_eq!(request.options.env["MODE"], "fast");
    }
}
