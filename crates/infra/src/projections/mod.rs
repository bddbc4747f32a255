//! Read models fed from published envelopes.

pub mod order_status;

pub use order_status::{OrderStatusProjection, OrderStatusView, ProjectionError};
