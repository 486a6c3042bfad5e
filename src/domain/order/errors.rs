use super::value_objects::OrderStage;

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("User id cannot be empty")]
    EmptyUserId,

    #[error("Order items cannot be empty")]
    EmptyItems,

    #[error("Product id cannot be empty")]
    EmptyProductId,

    #[error("Invalid quantity for product {product_id}: {quantity}")]
    InvalidQuantity { product_id: String, quantity: u32 },

    #[error("Delivery address cannot be empty")]
    MissingDeliveryAddress,

    #[error("Order total overflows")]
    TotalOverflow,

    #[error("Cannot move order from {from} to {to}")]
    InvalidStageTransition { from: OrderStage, to: OrderStage },
}
