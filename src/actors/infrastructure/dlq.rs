use kameo::Actor;
use kameo::Reply;
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::message::{Context, Message};
use scylla::client::session::Session;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;
use chrono::{DateTime, Utc};
use serde::Serialize;

// ============================================================================
// Dead Letter Queue Actor
// ============================================================================
//
// Receives consumed events the coordinator could not handle after the
// redelivery policy gave up (or that failed permanently). Entries are
// written to ScyllaDB when a session is configured; the most recent ones
// are also kept in memory for stats and inspection.
//
// ============================================================================

const DEFAULT_RETAINED: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    pub event_id: Uuid,
    pub stream: String,
    pub key: String,
    pub event_kind: String,
    pub payload: String,
    pub error_message: String,
    pub attempts: u32,
    pub first_failed_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
}

pub struct DlqActor {
    session: Option<Arc<Session>>,
    recent: VecDeque<DeadLetter>,
    by_stream: HashMap<String, u64>,
    total: u64,
    retained: usize,
}

impl DlqActor {
    pub fn new(session: Option<Arc<Session>>) -> Self {
        Self {
            session,
            recent: VecDeque::new(),
            by_stream: HashMap::new(),
            total: 0,
            retained: DEFAULT_RETAINED,
        }
    }

    async fn persist(session: &Session, entry: &DeadLetter) -> anyhow::Result<()> {
        session
            .query_unpaged(
                "INSERT INTO dead_letter_events (
                    event_id, stream, partition_key, event_kind, payload,
                    error_message, attempts, first_failed_at, dead_lettered_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    entry.event_id,
                    &entry.stream,
                    &entry.key,
                    &entry.event_kind,
                    &entry.payload,
                    &entry.error_message,
                    entry.attempts as i32,
                    entry.first_failed_at,
                    entry.dead_lettered_at,
                ),
            )
            .await?;
        Ok(())
    }
}

impl Actor for DlqActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, _actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!(
            persistent = state.session.is_some(),
            "DlqActor started - Dead Letter Queue ready"
        );
        Ok(state)
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone)]
pub struct AddToDlq(pub DeadLetter);

#[derive(Debug)]
pub struct GetDlqStats;

#[derive(Debug)]
pub struct GetRecentDeadLetters {
    pub limit: usize,
}

#[derive(Debug, Clone, Default, Reply)]
pub struct DlqStats {
    pub total: u64,
    pub by_stream: HashMap<String, u64>,
}

#[derive(Debug, Clone, Reply)]
pub struct RecentDeadLetters(pub Vec<DeadLetter>);

// ============================================================================
// Handlers
// ============================================================================

impl Message<AddToDlq> for DlqActor {
    type Reply = ();

    async fn handle(&mut self, msg: AddToDlq, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let entry = msg.0;

        tracing::error!(
            event_id = %entry.event_id,
            stream = %entry.stream,
            key = %entry.key,
            kind = %entry.event_kind,
            error = %entry.error_message,
            attempts = entry.attempts,
            "💀 Adding event to Dead Letter Queue"
        );

        if let Some(session) = &self.session {
            if let Err(e) = Self::persist(session, &entry).await {
                tracing::error!(
                    event_id = %entry.event_id,
                    error = %e,
                    "Failed to persist dead letter, keeping it in memory only"
                );
            }
        }

        self.total += 1;
        *self.by_stream.entry(entry.stream.clone()).or_insert(0) += 1;

        self.recent.push_back(entry);
        while self.recent.len() > self.retained {
            self.recent.pop_front();
        }
    }
}

impl Message<GetDlqStats> for DlqActor {
    type Reply = DlqStats;

    async fn handle(&mut self, _msg: GetDlqStats, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        DlqStats {
            total: self.total,
            by_stream: self.by_stream.clone(),
        }
    }
}

impl Message<GetRecentDeadLetters> for DlqActor {
    type Reply = RecentDeadLetters;

    async fn handle(
        &mut self,
        msg: GetRecentDeadLetters,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        RecentDeadLetters(self.recent.iter().rev().take(msg.limit).cloned().collect())
    }
}
