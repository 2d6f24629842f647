use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of a document run.
///
/// Transitions only move forward: `pending -> processing -> {completed | failed | skipped}`.
/// Skipping `processing` is allowed (a run can fail during planning), moving
/// backwards or out of a terminal state is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl ProcessingStatus {
    /// Check if the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Completed | Self::Failed | Self::Skipped => 2,
        }
    }

    /// Whether moving from `self` to `next` respects the lifecycle.
    ///
    /// `processing -> processing` is allowed so the current stage can advance.
    pub fn can_transition_to(&self, next: ProcessingStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() > self.rank() || (*self == Self::Processing && next == Self::Processing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected status change on a [`crate::DocumentState`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid status transition {from} -> {to} at stage '{stage}'")]
pub struct StatusTransitionError {
    pub from: ProcessingStatus,
    pub to: ProcessingStatus,
    pub stage: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_allowed() {
        assert!(ProcessingStatus::Pending.can_transition_to(ProcessingStatus::Processing));
        assert!(ProcessingStatus::Processing.can_transition_to(ProcessingStatus::Completed));
        assert!(ProcessingStatus::Processing.can_transition_to(ProcessingStatus::Processing));
        assert!(ProcessingStatus::Pending.can_transition_to(ProcessingStatus::Failed));
    }

    #[test]
    fn terminal_states_are_frozen() {
        for terminal in [
            ProcessingStatus::Completed,
            ProcessingStatus::Failed,
            ProcessingStatus::Skipped,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(ProcessingStatus::Processing));
            assert!(!terminal.can_transition_to(ProcessingStatus::Failed));
        }
    }

    #[test]
    fn backwards_transition_is_rejected() {
        assert!(!ProcessingStatus::Processing.can_transition_to(ProcessingStatus::Pending));
        assert!(!ProcessingStatus::Pending.can_transition_to(ProcessingStatus::Pending));
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&ProcessingStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }
}
