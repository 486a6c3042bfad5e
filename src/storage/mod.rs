// ============================================================================
// Storage - ScyllaDB-backed order store and schema bootstrap
// ============================================================================

mod order_store;

pub use order_store::{connect, ensure_schema, ScyllaOrderStore};
