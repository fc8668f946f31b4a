//! Transient-vs-fatal classification of store errors.

use crate::error::{StoreError, TRANSIENT_TRANSACTION_LABEL};

/// Decides whether a store error is worth retrying the unit of work for.
///
/// Classification is store-specific, so integrators supply their own.
/// Any `Fn(&StoreError) -> bool` closure is a classifier.
pub trait TransientClassifier: Send + Sync {
    /// `true` if the unit of work may succeed when run again.
    fn is_transient(&self, err: &StoreError) -> bool;
}

impl<F> TransientClassifier for F
where
    F: Fn(&StoreError) -> bool + Send + Sync,
{
    fn is_transient(&self, err: &StoreError) -> bool {
        self(err)
    }
}

/// Classifier used when none is supplied.
///
/// Transient: write conflicts, connection errors, timeouts and errors
/// labelled `TransientTransactionError`. Everything else is fatal.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl TransientClassifier for DefaultClassifier {
    fn is_transient(&self, err: &StoreError) -> bool {
        match err {
            StoreError::WriteConflict(_) | StoreError::Connection(_) | StoreError::Timeout(_) => true,
            StoreError::Labeled { .. } => err.has_label(TRANSIENT_TRANSACTION_LABEL),
            _ => false,
        }
    }
}
