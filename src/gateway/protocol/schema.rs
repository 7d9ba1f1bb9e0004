//! Event channel wire format
//!
//! Clients send `{action, sessionId}` messages; the server pushes
//! `{event, sessionId, ...}` messages. Anything a client sends that does not
//! parse is answered with [`ErrorMessage`] and the connection stays open.

use serde::{Deserialize, Serialize};

use crate::gateway::broadcaster::SessionEvent;
use crate::session::{LogLine, ResourceStats, SessionState, SessionView};

/// Protocol version
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Reply to anything that is not a valid client message
pub const INVALID_MESSAGE_FORMAT: &str = "Invalid message format";

/// Get the protocol version
pub fn protocol_version() -> &'static str {
    PROTOCOL_VERSION
}

/// Client -> server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Start receiving a session's events
    #[serde(rename_all = "camelCase")]
    Subscribe { session_id: String },
    /// One-off status snapshot
    #[serde(rename_all = "camelCase")]
    GetStatus { session_id: String },
    /// Stop a session owned by the connection's principal
    #[serde(rename_all = "camelCase")]
    StopExecution { session_id: String },
    /// Stop receiving a session's events
    #[serde(rename_all = "camelCase")]
    Unsubscribe { session_id: String },
}

impl ClientMessage {
    pub fn session_id(&self) -> &str {
        match self {
            ClientMessage::Subscribe { session_id }
            | ClientMessage::GetStatus { session_id }
            | ClientMessage::StopExecution { session_id }
            | ClientMessage::Unsubscribe { session_id } => session_id,
        }
    }

    /// Parse one text frame
    pub fn parse(text: &str) -> Result<Self, ErrorMessage> {
        serde_json::from_str(text).map_err(|_| ErrorMessage::invalid_format())
    }
}

/// Server -> client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Subscribed { session_id: String },
    #[serde(rename_all = "camelCase")]
    Unsubscribed { session_id: String },
    #[serde(rename_all = "camelCase")]
    StatusUpdate {
        session_id: String,
        status: SessionState,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    StatsUpdate {
        session_id: String,
        stats: ResourceStats,
    },
    #[serde(rename_all = "camelCase")]
    LogUpdate { session_id: String, log: LogLine },
    /// Session reached a terminal state and was cleaned up
    #[serde(rename_all = "camelCase")]
    ExecutionStopped {
        session_id: String,
        status: SessionState,
    },
    /// Reply to `getStatus`
    #[serde(rename_all = "camelCase")]
    Status {
        session_id: String,
        session: Box<SessionView>,
    },
}

impl From<SessionEvent> for ServerMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::Status {
                session_id,
                status,
                reason,
            } => ServerMessage::StatusUpdate {
                session_id,
                status,
                reason,
            },
            SessionEvent::Log { session_id, log } => ServerMessage::LogUpdate { session_id, log },
            SessionEvent::Stats { session_id, stats } => {
                ServerMessage::StatsUpdate { session_id, stats }
            }
            SessionEvent::Closed { session_id, status } => {
                ServerMessage::ExecutionStopped { session_id, status }
            }
        }
    }
}

/// Error reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ErrorMessage {
    pub fn new(error: impl Into<String>) -> Self {
        ErrorMessage {
            error: error.into(),
            session_id: None,
        }
    }

    pub fn invalid_format() -> Self {
        Self::new(INVALID_MESSAGE_FORMAT)
    }

    /// Set the session ID
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_parsing() {
        let msg = ClientMessage::parse(r#"{"action":"subscribe","sessionId":"abc"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                session_id: "abc".to_string()
            }
        );
        let msg = ClientMessage::parse(r#"{"action":"stopExecution","sessionId":"abc"}"#).unwrap();
        assert_eq!(msg.session_id(), "abc");
    }

    #[test]
    fn test_malformed_messages() {
        for text in [
            "not json",
            r#"{"action":"explode","sessionId":"abc"}"#,
            r#"{"action":"subscribe"}"#,
            r#"{"sessionId":"abc"}"#,
        ] {
            let err = ClientMessage::parse(text).unwrap_err();
            assert_eq!(
                serde_json::to_value(&err).unwrap(),
                json!({"error": "Invalid message format"})
            );
        }
    }

    #[test]
    fn test_server_message_shapes() {
        let msg = ServerMessage::Subscribed {
            session_id: "abc".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"event": "subscribed", "sessionId": "abc"})
        );

        let msg: ServerMessage = SessionEvent::Closed {
            session_id: "abc".to_string(),
            status: SessionState::Stopped,
        }
        .into();
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"event": "executionStopped", "sessionId": "abc", "status": "stopped"})
        );
    }
}
