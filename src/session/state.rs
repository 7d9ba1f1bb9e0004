//! Session lifecycle states

use serde::{Deserialize, Serialize};

/// Lifecycle state of an execution session.
///
/// `Created -> Provisioning -> Running -> terminal`. A stop request can
/// also end a session that has not reached `Running` yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Created,
    Provisioning,
    Running,
    Completed,
    Stopped,
    TimedOut,
    ResourceKilled,
    Failed,
}

impl SessionState {
    /// Final states; nothing leaves them
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed
                | SessionState::Stopped
                | SessionState::TimedOut
                | SessionState::ResourceKilled
                | SessionState::Failed
        )
    }

    /// Terminal states counted as failed executions
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SessionState::Failed | SessionState::TimedOut | SessionState::ResourceKilled
        )
    }

    /// Whether `self -> to` is a legal transition
    pub fn can_transition(&self, to: SessionState) -> bool {
        use SessionState::*;
        match (self, to) {
            (Created, Provisioning | Failed | Stopped) => true,
            (Provisioning, Running | Failed | Stopped) => true,
            (Running, Completed | Failed | Stopped | TimedOut | ResourceKilled) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Provisioning => "provisioning",
            SessionState::Running => "running",
            SessionState::Completed => "completed",
            SessionState::Stopped => "stopped",
            SessionState::TimedOut => "timedOut",
            SessionState::ResourceKilled => "resourceKilled",
            SessionState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        assert!(SessionState::Created.can_transition(SessionState::Provisioning));
        assert!(SessionState::Provisioning.can_transition(SessionState::Running));
        assert!(SessionState::Running.can_transition(SessionState::Completed));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let terminal = [
            SessionState::Completed,
            SessionState::Stopped,
            SessionState::TimedOut,
            SessionState::ResourceKilled,
            SessionState::Failed,
        ];
        for from in terminal {
            assert!(from.is_terminal());
            for to in terminal {
                assert!(!from.can_transition(to), "{} -> {}", from, to);
            }
            assert!(!from.can_transition(SessionState::Running));
        }
    }

    #[test]
    fn test_running_only_after_provisioning() {
        assert!(!SessionState::Created.can_transition(SessionState::Running));
        assert!(!SessionState::Provisioning.can_transition(SessionState::TimedOut));
        assert!(!SessionState::Running.can_transition(SessionState::Provisioning));
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_string(&SessionState::ResourceKilled).unwrap(),
            "\"resourceKilled\""
        );
        assert_eq!(SessionState::TimedOut.to_string(), "timedOut");
        assert!(SessionState::TimedOut.is_failure());
        assert!(!SessionState::Stopped.is_failure());
    }
}
