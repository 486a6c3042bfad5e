// ============================================================================
// Workflow - the order saga and the seams it talks through
// ============================================================================

pub mod collaborators;
pub mod coordinator;
pub mod errors;
pub mod in_memory;
pub mod simulation;

#[cfg(test)]
mod tests;

pub use collaborators::{
    CollaboratorError, EventBus, NotificationSink, OrderStore, PaymentGateway, ShipmentService,
    StockError, StockLedger,
};
pub use coordinator::{Collaborators, DropReason, HandlerOutcome, OrderWorkflowCoordinator, WorkflowSettings};
pub use errors::WorkflowError;
