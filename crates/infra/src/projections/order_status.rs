use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use orderflow_core::{AggregateId, RetailerId, TenantId};
use orderflow_events::EventEnvelope;
use orderflow_orders::{HistoryEntry, OrderStatus, PurchaseOrderEvent, PurchaseOrderId};

use crate::fulfillment::ORDER_AGGREGATE;

/// Current status and status log of one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderStatusView {
    pub order_id: PurchaseOrderId,
    pub retailer_id: RetailerId,
    pub po_number: String,
    pub status: OrderStatus,
    pub history: Vec<HistoryEntry>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize order event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("status change for unknown order {0}")]
    UnknownOrder(PurchaseOrderId),

    #[error("projection lock poisoned")]
    Poisoned,
}

/// Order status read model.
///
/// Envelopes of other aggregate types are ignored. Delivery is at least
/// once, so each `(tenant, order)` stream keeps a cursor and anything at or
/// below it is dropped.
#[derive(Debug, Default)]
pub struct OrderStatusProjection {
    views: RwLock<HashMap<(TenantId, PurchaseOrderId), OrderStatusView>>,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl OrderStatusProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tenant_id: TenantId, order_id: PurchaseOrderId) -> Option<OrderStatusView> {
        self.views.read().ok()?.get(&(tenant_id, order_id)).cloned()
    }

    /// Orders of a tenant currently in `status`, oldest change first.
    pub fn in_status(&self, tenant_id: TenantId, status: OrderStatus) -> Vec<OrderStatusView> {
        let Ok(views) = self.views.read() else {
            return vec![];
        };
        let mut out: Vec<OrderStatusView> = views
            .iter()
            .filter(|((t, _), v)| *t == tenant_id && v.status == status)
            .map(|(_, v)| v.clone())
            .collect();
        out.sort_by_key(|v| v.updated_at);
        out
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != ORDER_AGGREGATE {
            return Ok(());
        }
        let tenant_id = envelope.tenant_id();
        let key = CursorKey {
            tenant_id,
            aggregate_id: envelope.aggregate_id(),
        };
        let seq = envelope.sequence_number();

        let mut cursors = self.cursors.write().map_err(|_| ProjectionError::Poisoned)?;
        let last = cursors.get(&key).copied().unwrap_or(0);
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let event: PurchaseOrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
        let (event_tenant, order_id) = match &event {
            PurchaseOrderEvent::OrderImported(e) => (e.tenant_id, e.order_id),
            PurchaseOrderEvent::StatusChanged(e) => (e.tenant_id, e.order_id),
        };
        if event_tenant != tenant_id || order_id.0 != key.aggregate_id {
            return Err(ProjectionError::TenantIsolation(
                "event does not belong to the envelope's stream".to_string(),
            ));
        }

        let mut views = self.views.write().map_err(|_| ProjectionError::Poisoned)?;
        match event {
            PurchaseOrderEvent::OrderImported(e) => {
                views.insert(
                    (tenant_id, order_id),
                    OrderStatusView {
                        order_id,
                        retailer_id: e.retailer_id,
                        po_number: e.header.po_number,
                        status: OrderStatus::Opened,
                        history: vec![HistoryEntry {
                            order_id,
                            status: OrderStatus::Opened,
                            recorded_at: e.occurred_at,
                        }],
                        updated_at: e.occurred_at,
                    },
                );
            }
            PurchaseOrderEvent::StatusChanged(e) => {
                let view = views
                    .get_mut(&(tenant_id, order_id))
                    .ok_or(ProjectionError::UnknownOrder(order_id))?;
                view.status = e.to;
                view.history.push(HistoryEntry {
                    order_id,
                    status: e.to,
                    recorded_at: e.occurred_at,
                });
                view.updated_at = e.occurred_at;
            }
        }

        cursors.insert(key, seq);
        Ok(())
    }

    /// Drop everything and replay.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        self.cursors.write().map_err(|_| ProjectionError::Poisoned)?.clear();
        self.views.write().map_err(|_| ProjectionError::Poisoned)?.clear();

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (e.tenant_id(), e.aggregate_id(), e.sequence_number()));
        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderflow_orders::{OrderHeader, OrderImported, StatusChanged};
    use uuid::Uuid;

    fn envelope(seq: u64, event: &PurchaseOrderEvent, tenant_id: TenantId, order_id: PurchaseOrderId) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            order_id.0,
            ORDER_AGGREGATE,
            seq,
            "orders.purchase_order",
            Utc::now(),
            serde_json::to_value(event).unwrap(),
        )
    }

    fn stream(tenant_id: TenantId, order_id: PurchaseOrderId) -> Vec<EventEnvelope<JsonValue>> {
        let imported = PurchaseOrderEvent::OrderImported(OrderImported {
            tenant_id,
            order_id,
            retailer_id: RetailerId::new(),
            header: OrderHeader {
                po_number: "PO-1001".to_string(),
                ..OrderHeader::default()
            },
            items: vec![],
            occurred_at: Utc::now(),
        });
        let acked = PurchaseOrderEvent::StatusChanged(StatusChanged {
            tenant_id,
            order_id,
            from: OrderStatus::Opened,
            to: OrderStatus::Acknowledged,
            occurred_at: Utc::now(),
        });
        vec![
            envelope(1, &imported, tenant_id, order_id),
            envelope(2, &acked, tenant_id, order_id),
        ]
    }

    #[test]
    fn follows_status_and_ignores_redelivery() {
        let projection = OrderStatusProjection::new();
        let tenant = TenantId::new();
        let order_id = PurchaseOrderId::new(AggregateId::new());
        let envs = stream(tenant, order_id);

        for env in envs.iter().chain(envs.iter()) {
            projection.apply_envelope(env).unwrap();
        }

        let view = projection.get(tenant, order_id).unwrap();
        assert_eq!(view.status, OrderStatus::Acknowledged);
        assert_eq!(view.history.len(), 2);
        assert_eq!(view.po_number, "PO-1001");
        assert_eq!(projection.in_status(tenant, OrderStatus::Acknowledged).len(), 1);
        assert!(projection.in_status(TenantId::new(), OrderStatus::Acknowledged).is_empty());
    }

    #[test]
    fn gap_in_stream_is_rejected() {
        let projection = OrderStatusProjection::new();
        let tenant = TenantId::new();
        let order_id = PurchaseOrderId::new(AggregateId::new());
        let envs = stream(tenant, order_id);

        let err = projection.apply_envelope(&envs[1]).unwrap_err();
        assert!(matches!(err, ProjectionError::NonMonotonicSequence { last: 0, found: 2 }));
    }

    #[test]
    fn rebuild_sorts_by_sequence() {
        let projection = OrderStatusProjection::new();
        let tenant = TenantId::new();
        let order_id = PurchaseOrderId::new(AggregateId::new());
        let mut envs = stream(tenant, order_id);
        envs.reverse();

        projection.rebuild_from_scratch(envs).unwrap();
        assert_eq!(
            projection.get(tenant, order_id).unwrap().status,
            OrderStatus::Acknowledged
        );
    }
}
