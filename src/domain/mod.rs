// ============================================================================
// Domain Layer
// ============================================================================
//
// Plain data and business rules for the order workflow. Nothing in here
// talks to a broker, a database or a clock other than `Utc::now()`.
//
// ============================================================================

pub mod order;
pub mod inventory;
pub mod payment;
pub mod shipment;
pub mod notification;
