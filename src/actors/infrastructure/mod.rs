// ============================================================================
// Infrastructure Actors
// ============================================================================
//
// - Dead letter queue for events the coordinator could not handle
// - Health monitoring
//
// ============================================================================

mod dlq;
mod health_monitor;

pub use dlq::{AddToDlq, DeadLetter, DlqActor, DlqStats, GetDlqStats, GetRecentDeadLetters, RecentDeadLetters};
pub use health_monitor::{GetSystemHealth, HealthMonitorActor, SystemHealth, UpdateHealth};
