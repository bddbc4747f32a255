//! Inventory ledger domain (event-sourced).
//!
//! A [`Product`] owns its `qty_on_hand` / `qty_pending` counters; every change
//! is a delta event, never an overwrite. [`ProductAlias`] maps a retailer SKU
//! to a product and says how many product units one ordered unit consumes.

pub mod alias;
pub mod product;
pub mod reservation;

pub use alias::{Availability, ProductAlias};
pub use product::{
    AdjustStock, Product, ProductCommand, ProductEvent, ProductId, ProductRegistered,
    RegisterProduct, ReleaseStock, ReserveStock, StockAdjusted, StockReleased, StockReserved,
};
pub use reservation::{ReservationState, reservation_units};
