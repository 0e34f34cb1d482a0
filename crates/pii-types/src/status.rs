use serde::{Deserialize, Serialize};

use crate::error::{TypesError, TypesResult};

/// Lifecycle status shared by [`crate::ScanCheckpoint`] rows.
///
/// `Completed` and `Failed` are terminal. The allowed transition arcs are:
/// `Running ↔ Paused`, `Running|Paused → Completed`, `Running|Paused →
/// Failed`. Any other arc is rejected by [`ScanStatus::validate_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScanStatus {
    /// Actively processing items.
    Running,
    /// Suspended by an operator; resumable.
    Paused,
    /// Finished successfully; terminal.
    Completed,
    /// Finished with an unrecoverable error; terminal.
    Failed,
}

impl ScanStatus {
    /// `true` for `Completed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }

    /// Validate that transitioning from `self` to `to` is one of the
    /// allowed arcs, returning `TypesError::IllegalTransition` otherwise.
    pub fn validate_transition(self, to: ScanStatus) -> TypesResult<()> {
        use ScanStatus::*;
        let allowed = matches!(
            (self, to),
            (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Paused, Completed)
                | (Running, Failed)
                | (Paused, Failed)
        );
        if allowed {
            Ok(())
        } else {
            Err(TypesError::IllegalTransition {
                from: format!("{self:?}"),
                to: format!("{to:?}"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_can_pause_and_resume() {
        assert!(ScanStatus::Running.validate_transition(ScanStatus::Paused).is_ok());
        assert!(ScanStatus::Paused.validate_transition(ScanStatus::Running).is_ok());
    }

    #[test]
    fn running_and_paused_can_terminate() {
        assert!(ScanStatus::Running.validate_transition(ScanStatus::Completed).is_ok());
        assert!(ScanStatus::Paused.validate_transition(ScanStatus::Failed).is_ok());
    }

    #[test]
    fn terminal_states_reject_all_transitions() {
        assert!(ScanStatus::Completed.validate_transition(ScanStatus::Running).is_err());
        assert!(ScanStatus::Failed.validate_transition(ScanStatus::Paused).is_err());
    }

    #[test]
    fn self_transition_on_terminal_state_is_illegal() {
        assert!(ScanStatus::Completed.validate_transition(ScanStatus::Completed).is_err());
    }
}
