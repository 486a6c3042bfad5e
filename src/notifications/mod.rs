// ============================================================================
// Notifications
// ============================================================================
//
// Fan-out of workflow notifications to live subscribers and to the durable
// notification stream.
//
// ============================================================================

mod hub;

pub use hub::{NotificationHub, Subscription};
