//! Job mode and lifecycle state.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

/// How the backend should treat a user message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum JobMode {
    /// Multi-step planning agent that may touch several sheets.
    #[default]
    Agent,
    /// Direct edit of the selected range, no planning stage.
    Edit,
}

impl JobMode {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobMode::Agent => "agent",
            JobMode::Edit => "edit",
        }
    }
}

impl std::fmt::Display for JobMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of one job.
///
/// ```text
/// Pending → Planned → Executing → { Completed | Failed | Cancelled | TimedOut }
/// ```
///
/// Any non-terminal state may jump straight to a terminal one. Terminal
/// states are final.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum JobState {
    /// Registered, no backend signal yet.
    #[default]
    Pending,
    /// Backend announced its plan.
    Planned,
    /// Backend reported progress on an already planned job.
    Executing,
    Completed,
    Failed,
    Cancelled,
    #[strum(serialize = "timed_out", serialize = "timeout")]
    TimedOut,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Planned => "planned",
            JobState::Executing => "executing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
            JobState::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled | JobState::TimedOut
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse_case_insensitive() {
        assert_eq!(JobMode::from_str("AGENT"), Some(JobMode::Agent));
        assert_eq!(JobMode::from_str("edit"), Some(JobMode::Edit));
        assert_eq!(JobMode::from_str("chat"), None);
    }

    #[test]
    fn test_mode_wire_form_is_lowercase() {
        assert_eq!(serde_json::to_string(&JobMode::Edit).unwrap(), "\"edit\"");
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Planned.is_terminal());
        assert!(!JobState::Executing.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(JobState::TimedOut.is_terminal());
    }

    #[test]
    fn test_state_aliases() {
        assert_eq!(JobState::from_str("timeout").unwrap(), JobState::TimedOut);
        assert_eq!(JobState::TimedOut.to_string(), "timed_out");
    }
}
