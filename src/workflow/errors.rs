use crate::domain::order::OrderError;
use crate::utils::IsTransient;

use super::collaborators::{CollaboratorError, StockError};

// ============================================================================
// Workflow Errors
// ============================================================================
//
// Business failures (insufficient stock, declined payment) are NOT errors:
// the coordinator turns them into state transitions. What remains is
// rejected input and infrastructure trouble.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Invalid order: {0}")]
    Validation(#[from] OrderError),

    #[error("Failed to publish {what}: {source}")]
    Publish {
        what: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Order store failure: {0}")]
    Store(#[source] anyhow::Error),

    #[error("Stock ledger failure: {0}")]
    Stock(#[from] StockError),

    #[error("Collaborator failure: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("Order state violation: {0}")]
    StateViolation(#[source] OrderError),
}

impl IsTransient for WorkflowError {
    fn is_transient(&self) -> bool {
        match self {
            WorkflowError::Validation(_) | WorkflowError::StateViolation(_) => false,
            WorkflowError::Collaborator(CollaboratorError::Rejected(..)) => false,
            WorkflowError::Stock(StockError::Insufficient(_) | StockError::AlreadyReleased(_)) => false,
            WorkflowError::Publish { .. }
            | WorkflowError::Store(_)
            | WorkflowError::Stock(StockError::Unavailable(_))
            | WorkflowError::Collaborator(CollaboratorError::Unavailable(_))
            | WorkflowError::Timeout(_) => true,
        }
    }
}
