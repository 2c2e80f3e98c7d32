//! Split error types

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result type for split operations
pub type Result<T> = std::result::Result<T, SplitError>;

/// Errors surfaced by the split subsystem.
///
/// The enum doubles as the persisted abort reason: terminal variants
/// (`Aborted`, `ExceededTimeLimit`, `SyncFailed`) are written into the
/// durable record, so the whole enum is serde round-trippable.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitError {
    // ==================== Terminal Abort Reasons ====================
    #[error("split aborted by request")]
    Aborted,

    #[error("split exceeded its configured time limit")]
    ExceededTimeLimit,

    #[error("initial data sync failed: {0}")]
    SyncFailed(String),

    // ==================== Non-Terminal Interruptions ====================
    /// Cancellation token fired on a dependent wait.
    #[error("operation was canceled")]
    Canceled,

    /// The topology monitor (or its hosting executor) was torn down while
    /// a wait was outstanding.
    #[error("shutdown in progress")]
    ShutdownInProgress,

    /// Leadership was lost mid-run. The durable record is untouched and the
    /// operation is eligible for resumption on the next leader.
    #[error("interrupted due to leadership change")]
    SteppedDown,

    // ==================== Caller Errors ====================
    #[error("split {0} already exists with different options")]
    ConflictingOptions(Uuid),

    #[error("split {0} not found")]
    NotFound(Uuid),

    // ==================== Storage Errors ====================
    #[error("storage error: {0}")]
    Storage(String),
}

impl SplitError {
    /// Check whether this error is a valid persisted abort reason.
    ///
    /// Only these variants may appear in an `Aborted` record; everything
    /// else is an in-memory interruption or a caller error.
    pub fn is_abort_reason(&self) -> bool {
        matches!(
            self,
            SplitError::Aborted | SplitError::ExceededTimeLimit | SplitError::SyncFailed(_)
        )
    }

    /// Check whether the operation is eligible for resumption after this
    /// error (the run was interrupted without reaching a terminal state).
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            SplitError::SteppedDown | SplitError::ShutdownInProgress | SplitError::Storage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_reasons() {
        assert!(SplitError::Aborted.is_abort_reason());
        assert!(SplitError::ExceededTimeLimit.is_abort_reason());
        assert!(SplitError::SyncFailed("copy stalled".into()).is_abort_reason());
        assert!(!SplitError::SteppedDown.is_abort_reason());
        assert!(!SplitError::Canceled.is_abort_reason());
    }

    #[test]
    fn test_resumable_errors() {
        assert!(SplitError::SteppedDown.is_resumable());
        assert!(SplitError::ShutdownInProgress.is_resumable());
        assert!(!SplitError::Aborted.is_resumable());
        assert!(!SplitError::NotFound(Uuid::new_v4()).is_resumable());
    }
}
