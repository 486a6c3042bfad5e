use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::task::JoinHandle;

use crate::domain::notification::Notification;
use crate::messaging::{EventEnvelope, WorkflowEvent};
use crate::workflow::{EventBus, NotificationSink};

// ============================================================================
// Notification Hub
// ============================================================================
//
// Live delivery: user id -> set of subscriber channels, held in a sharded
// concurrent map. A send to a closed channel removes that subscriber; a full
// channel drops the message for that subscriber only.
//
// Durable delivery: every notification is queued for a background writer
// that appends it to the notification stream, so `notify` never waits on
// the broker.
//
// ============================================================================

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Notification>,
}

pub struct Subscription {
    pub id: u64,
    pub user_id: String,
    rx: mpsc::Receiver<Notification>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Notification> {
        match self.rx.try_recv() {
            Ok(n) => Some(n),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

pub struct NotificationHub {
    subscribers: DashMap<String, Vec<Subscriber>>,
    durable: Option<mpsc::UnboundedSender<Notification>>,
    buffer: usize,
    next_id: AtomicU64,
}

impl NotificationHub {
    /// Live delivery only
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            durable: None,
            buffer: buffer.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Live delivery plus a durable log on the notification stream
    pub fn with_durable_log(bus: Arc<dyn EventBus>, buffer: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_durable_log(bus, rx));

        let mut hub = Self::new(buffer);
        hub.durable = Some(tx);
        (hub, writer)
    }

    pub fn subscribe(&self, user_id: impl Into<String>) -> Subscription {
        let user_id = user_id.into();
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers
            .entry(user_id.clone())
            .or_default()
            .push(Subscriber { id, tx });

        tracing::debug!(user_id = %user_id, subscriber_id = id, "Notification subscriber registered");

        Subscription { id, user_id, rx }
    }

    pub fn unsubscribe(&self, user_id: &str, subscriber_id: u64) {
        if let Some(mut subs) = self.subscribers.get_mut(user_id) {
            subs.retain(|s| s.id != subscriber_id);
        }
        self.subscribers.remove_if(user_id, |_, subs| subs.is_empty());
    }

    pub fn subscriber_count(&self, user_id: &str) -> usize {
        self.subscribers.get(user_id).map(|subs| subs.len()).unwrap_or(0)
    }

    /// Drop subscribers whose receiving side has gone away. Returns how many.
    pub fn prune(&self) -> usize {
        let mut removed = 0;
        for mut entry in self.subscribers.iter_mut() {
            let before = entry.len();
            entry.retain(|s| !s.tx.is_closed());
            removed += before - entry.len();
        }
        self.subscribers.retain(|_, subs| !subs.is_empty());
        removed
    }

    fn push_live(&self, notification: &Notification) {
        let Some(mut subs) = self.subscribers.get_mut(&notification.user_id) else {
            return;
        };

        subs.retain(|sub| match sub.tx.try_send(notification.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    user_id = %notification.user_id,
                    subscriber_id = sub.id,
                    "Subscriber lagging, notification dropped for it"
                );
                true
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(subscriber_id = sub.id, "Subscriber closed, removing");
                false
            }
        });

        let now_empty = subs.is_empty();
        drop(subs);

        if now_empty {
            self.subscribers
                .remove_if(&notification.user_id, |_, subs| subs.is_empty());
        }
    }
}

#[async_trait]
impl NotificationSink for NotificationHub {
    async fn notify(&self, notification: Notification) {
        tracing::debug!(
            user_id = %notification.user_id,
            category = notification.category.as_str(),
            order_id = ?notification.related_order_id,
            "Notification emitted"
        );

        self.push_live(&notification);

        if let Some(durable) = &self.durable {
            if durable.send(notification).is_err() {
                tracing::warn!("Durable notification writer has stopped");
            }
        }
    }
}

async fn write_durable_log(bus: Arc<dyn EventBus>, mut rx: mpsc::UnboundedReceiver<Notification>) {
    while let Some(notification) = rx.recv().await {
        let notification_id = notification.id;
        let envelope = EventEnvelope::new(WorkflowEvent::Notification(notification));

        if let Err(e) = bus.publish(&envelope).await {
            tracing::warn!(
                notification_id = %notification_id,
                error = %e,
                "Failed to append notification to the durable log"
            );
        }
    }
    tracing::debug!("Durable notification writer finished");
}
