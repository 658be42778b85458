//! Action state machine with validated transitions.
//!
//! Pending -> AwaitingApproval -> Processing -> Completed/Failed/Conflict
//! Failed -> Processing (retry), Conflict -> Processing/Rejected (resolution)
//! Any -> Archived

use crate::error::TesseraError;
use crate::types::ActionStatus;

/// Validate that a status transition is allowed.
///
/// Valid transitions:
/// - Pending -> AwaitingApproval | Processing | Rejected
/// - AwaitingApproval -> Processing | Rejected
/// - Processing -> Completed | Failed | Conflict
/// - Failed -> Processing
/// - Conflict -> Processing | Rejected
/// - any -> Archived
pub fn validate_transition(from: ActionStatus, to: ActionStatus) -> Result<(), TesseraError> {
    use ActionStatus::*;

    let valid = matches!(
        (from, to),
        (Pending, AwaitingApproval)
            | (Pending, Processing)
            | (Pending, Rejected)
            | (AwaitingApproval, Processing)
            | (AwaitingApproval, Rejected)
            | (Processing, Completed)
            | (Processing, Failed)
            | (Processing, Conflict)
            | (Failed, Processing)
            | (Conflict, Processing)
            | (Conflict, Rejected)
    ) || (to == Archived && from != Archived);

    if valid {
        Ok(())
    } else {
        Err(TesseraError::InvalidTransition(from, to))
    }
}
