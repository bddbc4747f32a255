use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::order::PurchaseOrderId;
use crate::status::OrderStatus;

/// One row of the order's status log. Rows are only ever appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub order_id: PurchaseOrderId,
    pub status: OrderStatus,
    pub recorded_at: DateTime<Utc>,
}
