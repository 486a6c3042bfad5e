// ============================================================================
// Order Domain
// ============================================================================
//
// - Value objects (OrderItem, OrderStage, PaymentMethod)
// - Events published on the order-lifecycle stream
// - Commands (SubmitOrder)
// - Errors (OrderError)
// - The Order record and its state machine
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;

pub use value_objects::*;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
