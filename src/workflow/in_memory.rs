use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, Mutex};

use crate::domain::inventory::{InventoryAdjustment, StockShortfall};
use crate::domain::order::{Order, OrderItem};
use crate::messaging::{EventEnvelope, Stream};

use super::collaborators::{EventBus, OrderStore, StockError, StockLedger};

// ============================================================================
// In-memory collaborators
// ============================================================================
//
// Used by local mode and by the tests. They honour the same contracts as
// the real ones: the ledger is atomic across an order's lines and
// compensation is idempotent per order id.
//
// ============================================================================

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: DashMap<String, Order>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: &Order) -> anyhow::Result<()> {
        if self.orders.contains_key(&order.id) {
            anyhow::bail!("Order {} already exists", order.id);
        }
        self.orders.insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn load(&self, order_id: &str) -> anyhow::Result<Option<Order>> {
        Ok(self.orders.get(order_id).map(|entry| entry.value().clone()))
    }

    async fn save(&self, order: &Order) -> anyhow::Result<()> {
        self.orders.insert(order.id.clone(), order.clone());
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Stock ledger
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StockEntry {
    name: String,
    on_hand: u64,
}

#[derive(Debug, Clone)]
struct Reservation {
    lines: Vec<(String, u64)>,
    adjustments: Vec<InventoryAdjustment>,
    released: bool,
}

#[derive(Default)]
struct LedgerState {
    stock: HashMap<String, StockEntry>,
    reservations: HashMap<String, Reservation>,
}

#[derive(Default)]
pub struct InMemoryStockLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryStockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn restock(&self, product_id: impl Into<String>, name: impl Into<String>, quantity: u64) {
        let mut state = self.state.lock().await;
        let entry = state.stock.entry(product_id.into()).or_insert_with(|| StockEntry {
            name: String::new(),
            on_hand: 0,
        });
        entry.name = name.into();
        entry.on_hand += quantity;
    }

    pub async fn on_hand(&self, product_id: &str) -> u64 {
        let state = self.state.lock().await;
        state.stock.get(product_id).map(|e| e.on_hand).unwrap_or(0)
    }

    /// Sum repeated product ids so a split line cannot dodge the check
    fn requested_per_product(items: &[OrderItem]) -> Vec<(String, u64)> {
        let mut totals: Vec<(String, u64)> = Vec::new();
        for item in items {
            match totals.iter_mut().find(|(id, _)| *id == item.product_id) {
                Some((_, qty)) => *qty += u64::from(item.quantity),
                None => totals.push((item.product_id.clone(), u64::from(item.quantity))),
            }
        }
        totals
    }
}

#[async_trait]
impl StockLedger for InMemoryStockLedger {
    async fn reserve_stock(
        &self,
        order_id: &str,
        items: &[OrderItem],
    ) -> Result<Vec<InventoryAdjustment>, StockError> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.reservations.get(order_id) {
            if existing.released {
                return Err(StockError::AlreadyReleased(order_id.to_string()));
            }
            return Ok(existing.adjustments.clone());
        }

        let requested = Self::requested_per_product(items);

        let shortfalls: Vec<StockShortfall> = requested
            .iter()
            .filter_map(|(product_id, qty)| {
                let available = state.stock.get(product_id).map(|e| e.on_hand).unwrap_or(0);
                (available < *qty).then(|| StockShortfall {
                    product_id: product_id.clone(),
                    requested: *qty,
                    available,
                })
            })
            .collect();

        if !shortfalls.is_empty() {
            return Err(StockError::Insufficient(shortfalls));
        }

        let mut adjustments = Vec::with_capacity(requested.len());
        for (product_id, qty) in &requested {
            if let Some(entry) = state.stock.get_mut(product_id) {
                entry.on_hand -= qty;
                adjustments.push(InventoryAdjustment {
                    product_id: product_id.clone(),
                    product_name: entry.name.clone(),
                    delta_qty: -(*qty as i64),
                    remaining_qty: entry.on_hand,
                });
            }
        }

        state.reservations.insert(
            order_id.to_string(),
            Reservation {
                lines: requested,
                adjustments: adjustments.clone(),
                released: false,
            },
        );

        Ok(adjustments)
    }

    async fn compensate_stock(&self, order_id: &str) -> Result<Vec<InventoryAdjustment>, StockError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let lines = match state.reservations.get_mut(order_id) {
            Some(reservation) if !reservation.released => {
                reservation.released = true;
                reservation.lines.clone()
            }
            _ => return Ok(Vec::new()),
        };

        let mut adjustments = Vec::with_capacity(lines.len());
        for (product_id, qty) in lines {
            let entry = state.stock.entry(product_id.clone()).or_insert_with(|| StockEntry {
                name: String::new(),
                on_hand: 0,
            });
            entry.on_hand += qty;
            adjustments.push(InventoryAdjustment {
                product_id,
                product_name: entry.name.clone(),
                delta_qty: qty as i64,
                remaining_qty: entry.on_hand,
            });
        }

        Ok(adjustments)
    }
}

// ----------------------------------------------------------------------------
// Event bus
// ----------------------------------------------------------------------------

/// Records every envelope and either forwards it to a local dispatch loop
/// or queues it for a test to pull with `take_pending`.
#[derive(Default)]
pub struct InMemoryEventBus {
    published: Mutex<Vec<EventEnvelope>>,
    pending: Mutex<VecDeque<EventEnvelope>>,
    forward: Option<mpsc::UnboundedSender<EventEnvelope>>,
    fail_publishes: AtomicBool,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forwarding(forward: mpsc::UnboundedSender<EventEnvelope>) -> Self {
        Self {
            forward: Some(forward),
            ..Self::default()
        }
    }

    /// Make every publish fail until switched off
    pub fn set_failing(&self, failing: bool) {
        self.fail_publishes.store(failing, Ordering::SeqCst);
    }

    pub async fn published(&self) -> Vec<EventEnvelope> {
        self.published.lock().await.clone()
    }

    pub async fn published_on(&self, stream: Stream) -> Vec<EventEnvelope> {
        self.published
            .lock()
            .await
            .iter()
            .filter(|e| e.stream == stream)
            .cloned()
            .collect()
    }

    pub async fn take_pending(&self) -> Vec<EventEnvelope> {
        self.pending.lock().await.drain(..).collect()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            anyhow::bail!("in-memory bus is failing publishes");
        }

        self.published.lock().await.push(envelope.clone());

        match &self.forward {
            Some(tx) => tx
                .send(envelope.clone())
                .map_err(|_| anyhow::anyhow!("local dispatch loop has stopped"))?,
            None => self.pending.lock().await.push_back(envelope.clone()),
        }

        Ok(())
    }
}
