use anyhow::{Context, Result};
use async_trait::async_trait;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use std::sync::Arc;

use crate::config::ScyllaSettings;
use crate::domain::order::Order;
use crate::workflow::OrderStore;

// ============================================================================
// Scylla Order Store
// ============================================================================
//
// One row per order. `stage` is kept as its own column for ad-hoc queries;
// the full record travels as JSON in `record`. A save overwrites the row,
// which is the last write for that order under its lock.
//
// ============================================================================

const ORDERS_TABLE: &str = "CREATE TABLE IF NOT EXISTS orders (
    id text PRIMARY KEY,
    user_id text,
    stage text,
    record text,
    updated_at timestamp
)";

const DEAD_LETTER_TABLE: &str = "CREATE TABLE IF NOT EXISTS dead_letter_events (
    event_id uuid PRIMARY KEY,
    stream text,
    partition_key text,
    event_kind text,
    payload text,
    error_message text,
    attempts int,
    first_failed_at timestamp,
    dead_lettered_at timestamp
)";

pub async fn connect(settings: &ScyllaSettings) -> Result<Arc<Session>> {
    tracing::info!(node = %settings.known_node, "Connecting to ScyllaDB");

    let session: Session = SessionBuilder::new()
        .known_node(&settings.known_node)
        .build()
        .await
        .with_context(|| format!("Failed to connect to ScyllaDB at {}", settings.known_node))?;

    ensure_schema(&session, settings).await?;
    Ok(Arc::new(session))
}

/// Create the keyspace and tables if missing, then switch to the keyspace
pub async fn ensure_schema(session: &Session, settings: &ScyllaSettings) -> Result<()> {
    let keyspace = &settings.keyspace;

    session
        .query_unpaged(
            format!(
                "CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = \
                 {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
                keyspace, settings.replication_factor
            ),
            &[],
        )
        .await?;

    session.use_keyspace(keyspace, false).await?;

    session.query_unpaged(ORDERS_TABLE, &[]).await?;
    session.query_unpaged(DEAD_LETTER_TABLE, &[]).await?;

    tracing::info!(keyspace = %keyspace, "ScyllaDB schema ready");
    Ok(())
}

pub struct ScyllaOrderStore {
    session: Arc<Session>,
}

impl ScyllaOrderStore {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    async fn write(&self, order: &Order) -> Result<()> {
        let record = serde_json::to_string(order)?;

        self.session
            .query_unpaged(
                "INSERT INTO orders (id, user_id, stage, record, updated_at) VALUES (?, ?, ?, ?, ?)",
                (
                    &order.id,
                    &order.user_id,
                    order.stage.as_str(),
                    record,
                    order.updated_at,
                ),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for ScyllaOrderStore {
    /// Order ids are time-ordered UUIDs minted at submission, so a plain
    /// insert cannot collide with another order.
    async fn insert(&self, order: &Order) -> Result<()> {
        self.write(order).await?;
        tracing::debug!(order_id = %order.id, "Order row created");
        Ok(())
    }

    async fn load(&self, order_id: &str) -> Result<Option<Order>> {
        let result = self
            .session
            .query_unpaged("SELECT record FROM orders WHERE id = ?", (order_id,))
            .await?;

        let rows = result
            .into_rows_result()
            .with_context(|| format!("Unexpected response loading order {}", order_id))?;

        match rows.maybe_first_row::<(String,)>()? {
            Some((record,)) => {
                let order: Order = serde_json::from_str(&record)
                    .with_context(|| format!("Corrupt order record for {}", order_id))?;
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, order: &Order) -> Result<()> {
        self.write(order).await?;
        tracing::debug!(order_id = %order.id, stage = %order.stage, "Order row updated");
        Ok(())
    }
}
