use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a work instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkState {
    /// No instance is known for the identity
    Unknown,
    /// Waiting in its category queue
    Scheduled,
    /// Body is executing
    Running,
    /// Suspension requested; the body may still be winding down
    Suspended,
    /// Body returned normally
    Completed,
    /// Body returned an error or panicked
    Failed,
}

impl WorkState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Queued or executing
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Running)
    }
}

impl fmt::Display for WorkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Running => write!(f, "running"),
            Self::Suspended => write!(f, "suspended"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for WorkState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "scheduled" => Ok(Self::Scheduled),
            "running" => Ok(Self::Running),
            "suspended" => Ok(Self::Suspended),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid work state: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_and_active() {
        assert!(WorkState::Completed.is_terminal());
        assert!(WorkState::Failed.is_terminal());
        assert!(!WorkState::Suspended.is_terminal());
        assert!(WorkState::Running.is_active());
        assert!(!WorkState::Suspended.is_active());
    }

    #[test]
    fn test_display_parse() {
        for state in [
            WorkState::Unknown,
            WorkState::Scheduled,
            WorkState::Running,
            WorkState::Suspended,
            WorkState::Completed,
            WorkState::Failed,
        ] {
            assert_eq!(state.to_string().parse::<WorkState>().unwrap(), state);
        }
        assert!("paused".parse::<WorkState>().is_err());
    }
}
