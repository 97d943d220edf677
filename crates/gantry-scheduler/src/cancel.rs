//! Run cancellation handles.

use gantry_core::run::CancelReason;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

/// A cancellation token that remembers why it was first cancelled.
///
/// Cancelling a parent cancels every child token; a child reports
/// [`CancelReason::ParentCancelled`] unless it was cancelled directly first.
#[derive(Debug, Clone)]
pub struct RunCancellation {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

impl RunCancellation {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(OnceLock::new()),
        }
    }

    /// A handle cancelled whenever `parent` is.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            reason: Arc::new(OnceLock::new()),
        }
    }

    /// Cancel with `reason`. Later calls keep the first reason.
    pub fn cancel(&self, reason: CancelReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    pub fn reason(&self) -> Option<CancelReason> {
        if let Some(reason) = self.reason.get() {
            return Some(*reason);
        }
        self.token
            .is_cancelled()
            .then_some(CancelReason::ParentCancelled)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for RunCancellation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reason_wins() {
        let cancel = RunCancellation::new();
        assert_eq!(cancel.reason(), None);

        cancel.cancel(CancelReason::Superseded);
        cancel.cancel(CancelReason::UserRequested);
        assert!(cancel.is_cancelled());
        assert_eq!(cancel.reason(), Some(CancelReason::Superseded));
    }

    #[test]
    fn test_child_reports_parent_cancelled() {
        let parent = RunCancellation::new();
        let child = RunCancellation::child_of(parent.token());

        parent.cancel(CancelReason::UserRequested);
        assert!(child.is_cancelled());
        assert_eq!(child.reason(), Some(CancelReason::ParentCancelled));
    }

    #[test]
    fn test_child_cancel_does_not_propagate_up() {
        let parent = RunCancellation::new();
        let child = RunCancellation::child_of(parent.token());

        child.cancel(CancelReason::FailFast);
        assert!(!parent.is_cancelled());
        assert_eq!(child.reason(), Some(CancelReason::FailFast));
    }
}
