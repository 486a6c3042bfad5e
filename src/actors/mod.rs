// ============================================================================
// Actors Module
// ============================================================================
//
// Actor-based infrastructure around the workflow coordinator.
//
// Structure:
// - core/           - Health types shared by components
// - infrastructure/ - DLQ and health monitor actors
//
// The coordinator itself is not an actor: per-order ordering comes from the
// transport's partitioning plus a per-order lock, not from a mailbox.
//
// ============================================================================

mod core;
mod infrastructure;

pub use self::core::HealthStatus;
pub use infrastructure::{
    AddToDlq,
    DeadLetter,
    DlqActor,
    DlqStats,
    GetDlqStats,
    GetRecentDeadLetters,
    GetSystemHealth,
    HealthMonitorActor,
    RecentDeadLetters,
    SystemHealth,
    UpdateHealth,
};
