use serde::{Deserialize, Serialize};

// ============================================================================
// Inventory Value Objects
// ============================================================================

/// One stock change, published on the inventory-adjustment stream keyed by
/// product id. `remaining_qty` is never negative.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct InventoryAdjustment {
    pub product_id: String,
    pub product_name: String,
    pub delta_qty: i64,
    pub remaining_qty: u64,
}

/// A line that could not be reserved
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StockShortfall {
    pub product_id: String,
    pub requested: u64,
    pub available: u64,
}
