//! Retailer purchase orders (event-sourced).
//!
//! Owns the order status lifecycle and its append-only history. Every status
//! change is one `StatusChanged` event, so status and history cannot drift.

pub mod history;
pub mod order;
pub mod status;

pub use history::HistoryEntry;
pub use order::{
    Address, ImportOrder, NewOrderItem, OrderHeader, OrderImported, OrderItem, PurchaseOrder,
    PurchaseOrderCommand, PurchaseOrderEvent, PurchaseOrderId, StatusChanged, TransitionStatus,
};
pub use status::OrderStatus;
