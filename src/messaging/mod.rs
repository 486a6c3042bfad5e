// ============================================================================
// Messaging - envelopes, the Redpanda producer, and the consumer side
// ============================================================================

pub mod consumer;
pub mod envelope;
pub mod redpanda;

pub use consumer::{run_local, DispatchResult, EventDispatcher, RedpandaConsumer};
pub use envelope::{EventEnvelope, Stream, WorkflowEvent};
pub use redpanda::RedpandaClient;
