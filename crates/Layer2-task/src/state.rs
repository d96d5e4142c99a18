//! Job state machine

use serde::{Deserialize, Serialize};

/// Lifecycle states of a dispatched job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Create request accepted by the cluster
    Submitted,

    /// Create collided with an existing job of the same name; watching it
    AttachedExisting,

    /// Pods are scheduled or running
    Running,

    /// All containers completed successfully
    Succeeded,

    /// Init or main stage failed
    Failed,

    /// Deadline elapsed; job deleted
    TimedOut,
}

impl JobState {
    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::TimedOut)
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;

        match (self, next) {
            (Submitted, AttachedExisting | Running | Succeeded | Failed | TimedOut) => true,
            (AttachedExisting, Running | Succeeded | Failed | TimedOut) => true,
            (Running, Running | Succeeded | Failed | TimedOut) => true,
            _ => false,
        }
    }

    /// Get display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            JobState::Submitted => "Submitted",
            JobState::AttachedExisting => "AttachedExisting",
            JobState::Running => "Running",
            JobState::Succeeded => "Succeeded",
            JobState::Failed => "Failed",
            JobState::TimedOut => "TimedOut",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
