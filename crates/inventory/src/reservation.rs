//! Reservation state of an order item.
//!
//! An item either has its units reserved against a product, or is waiting
//! for an alias to appear for its SKU. The ledger resolves the second case
//! when the alias is registered.

use serde::{Deserialize, Serialize};

use orderflow_core::RetailerId;

use crate::product::ProductId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReservationState {
    Reserved {
        product_id: ProductId,
        sku_quantity: u32,
        /// Product units currently held (`qty_ordered × sku_quantity` minus returns).
        units: i64,
    },
    PendingAliasResolution {
        retailer_id: RetailerId,
        merchant_sku: String,
        qty_ordered: u32,
    },
}

impl ReservationState {
    pub fn is_pending(&self) -> bool {
        matches!(self, ReservationState::PendingAliasResolution { .. })
    }

    pub fn product_id(&self) -> Option<ProductId> {
        match self {
            ReservationState::Reserved { product_id, .. } => Some(*product_id),
            ReservationState::PendingAliasResolution { .. } => None,
        }
    }
}

/// Product units consumed by `qty` alias-units.
pub fn reservation_units(qty: u32, sku_quantity: u32) -> i64 {
    i64::from(qty) * i64::from(sku_quantity)
}
