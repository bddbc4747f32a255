use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use orderflow_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, Entity, OrderItemId, RetailerId, TenantId,
};
use orderflow_events::Event;

use crate::history::HistoryEntry;
use crate::status::OrderStatus;

/// Purchase order identifier (one event stream per order).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseOrderId(pub AggregateId);

impl PurchaseOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PurchaseOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub name: String,
    pub address1: String,
    pub address2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

/// Header fields as they arrive on the EDI/XML document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderHeader {
    pub retailer_purchase_order_id: String,
    pub po_number: String,
    pub order_date: Option<NaiveDate>,
    pub ship_date: Option<NaiveDate>,
    pub ship_to: Option<Address>,
    pub bill_to: Option<Address>,
    pub invoice_to: Option<Address>,
    pub customer: Option<Address>,
    pub verified_ship_to: Option<Address>,
    pub carrier: Option<String>,
    pub shipping_method: Option<String>,
    pub warehouse: Option<String>,
}

/// Ordered line before it has an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub merchant_sku: String,
    pub vendor_sku: Option<String>,
    pub qty_ordered: u32,
    /// Smallest currency unit (cents).
    pub unit_cost: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub merchant_sku: String,
    pub vendor_sku: Option<String>,
    pub qty_ordered: u32,
    pub unit_cost: u64,
}

impl Entity for OrderItem {
    type Id = OrderItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Aggregate root: PurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    tenant_id: Option<TenantId>,
    retailer_id: Option<RetailerId>,
    header: OrderHeader,
    status: OrderStatus,
    items: Vec<OrderItem>,
    history: Vec<HistoryEntry>,
    version: u64,
    created: bool,
}

impl PurchaseOrder {
    /// Not-yet-imported instance used for rehydration.
    pub fn empty(id: PurchaseOrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            retailer_id: None,
            header: OrderHeader::default(),
            status: OrderStatus::Opened,
            items: Vec::new(),
            history: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn retailer_id(&self) -> Option<RetailerId> {
        self.retailer_id
    }

    pub fn header(&self) -> &OrderHeader {
        &self.header
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn item(&self, item_id: OrderItemId) -> Option<&OrderItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn is_imported(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ImportOrder (inbound EDI document).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOrder {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub retailer_id: RetailerId,
    pub header: OrderHeader,
    pub items: Vec<NewOrderItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: TransitionStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionStatus {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub target: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderCommand {
    ImportOrder(ImportOrder),
    TransitionStatus(TransitionStatus),
}

/// Event: OrderImported. Item ids are assigned at decision time so replay is stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderImported {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub retailer_id: RetailerId,
    pub header: OrderHeader,
    pub items: Vec<OrderItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StatusChanged. Also the history row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderEvent {
    OrderImported(OrderImported),
    StatusChanged(StatusChanged),
}

impl Event for PurchaseOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseOrderEvent::OrderImported(_) => "orders.purchase_order.imported",
            PurchaseOrderEvent::StatusChanged(_) => "orders.purchase_order.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseOrderEvent::OrderImported(e) => e.occurred_at,
            PurchaseOrderEvent::StatusChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseOrder {
    type Command = PurchaseOrderCommand;
    type Event = PurchaseOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseOrderEvent::OrderImported(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.retailer_id = Some(e.retailer_id);
                self.header = e.header.clone();
                self.items = e.items.clone();
                self.status = OrderStatus::Opened;
                self.history = vec![HistoryEntry {
                    order_id: e.order_id,
                    status: OrderStatus::Opened,
                    recorded_at: e.occurred_at,
                }];
                self.created = true;
            }
            PurchaseOrderEvent::StatusChanged(e) => {
                self.status = e.to;
                self.history.push(HistoryEntry {
                    order_id: e.order_id,
                    status: e.to,
                    recorded_at: e.occurred_at,
                });
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseOrderCommand::ImportOrder(cmd) => self.handle_import(cmd),
            PurchaseOrderCommand::TransitionStatus(cmd) => self.handle_transition(cmd),
        }
    }
}

impl PurchaseOrder {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: PurchaseOrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn handle_import(&self, cmd: &ImportOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase order already imported"));
        }
        if cmd.header.po_number.trim().is_empty() {
            return Err(DomainError::validation("po_number cannot be empty"));
        }
        for line in &cmd.items {
            if line.merchant_sku.trim().is_empty() {
                return Err(DomainError::validation("merchant_sku cannot be empty"));
            }
            if line.qty_ordered == 0 {
                return Err(DomainError::validation(format!(
                    "qty_ordered must be positive (sku {})",
                    line.merchant_sku
                )));
            }
        }

        let items = cmd
            .items
            .iter()
            .map(|line| OrderItem {
                id: OrderItemId::new(),
                merchant_sku: line.merchant_sku.clone(),
                vendor_sku: line.vendor_sku.clone(),
                qty_ordered: line.qty_ordered,
                unit_cost: line.unit_cost,
            })
            .collect();

        Ok(vec![PurchaseOrderEvent::OrderImported(OrderImported {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            retailer_id: cmd.retailer_id,
            header: cmd.header.clone(),
            items,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_transition(
        &self,
        cmd: &TransitionStatus,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_order_id(cmd.order_id)?;

        if !self.status.can_transition_to(cmd.target) {
            return Err(DomainError::invalid_transition(
                self.status.as_str(),
                cmd.target.as_str(),
            ));
        }

        Ok(vec![PurchaseOrderEvent::StatusChanged(StatusChanged {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            from: self.status,
            to: cmd.target,
            occurred_at: cmd.occurred_at,
        })])
    }
}
