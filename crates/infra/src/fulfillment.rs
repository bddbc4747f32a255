//! Fulfillment workflow: import, reserve, divide, pack, ship, return.
//!
//! `FulfillmentService` is the single entry point the outer surfaces call.
//! It owns the order streams (through the dispatcher), the inventory ledger,
//! the packaging catalog and the package store, and decides which order
//! statuses allow which packaging operations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use orderflow_core::{
    AggregateId, BoxId, DomainError, ItemPackageId, OrderItemId, OrderPackageId, RetailerId,
    ShipmentId, TenantId,
};
use orderflow_events::{EventBus, EventEnvelope};
use orderflow_inventory::{Product, ProductAlias, RegisterProduct};
use orderflow_orders::{
    HistoryEntry, ImportOrder, NewOrderItem, OrderHeader, OrderItem, OrderStatus, PurchaseOrder,
    PurchaseOrderCommand, PurchaseOrderId, TransitionStatus,
};
use orderflow_packaging::{PackageRule, ProductSeries};

use crate::catalog_store::{CatalogError, CatalogStore};
use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::config::FulfillmentConfig;
use crate::event_store::EventStore;
use crate::ledger::{InventoryLedger, LedgerError};
use crate::package_store::{
    ItemProfile, OrderItemPackage, PackableLine, PackageStore, PackageSummary, PackageView,
    PackagingError,
};
use crate::projections::{OrderStatusProjection, ProjectionError};

pub const ORDER_AGGREGATE: &str = "orders.purchase_order";

#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Packaging(#[from] PackagingError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error("order {0} not found")]
    OrderNotFound(PurchaseOrderId),

    #[error("order item {0} not found")]
    OrderItemNotFound(OrderItemId),

    #[error("returned quantity {returned} exceeds ordered quantity {ordered}")]
    OverReturn { returned: u32, ordered: u32 },

    #[error("order index lock poisoned")]
    Poisoned,
}

impl From<DomainError> for FulfillmentError {
    fn from(value: DomainError) -> Self {
        FulfillmentError::Dispatch(value.into())
    }
}

impl FulfillmentError {
    /// HTTP-style status for the outer surfaces.
    pub fn status_code(&self) -> u16 {
        match self {
            FulfillmentError::Dispatch(e) => dispatch_status(e),
            FulfillmentError::Packaging(e) => e.status_code(),
            FulfillmentError::Ledger(LedgerError::Dispatch(e)) => dispatch_status(e),
            FulfillmentError::Ledger(
                LedgerError::ProductAliasNotFound { .. }
                | LedgerError::NoReservation(_)
                | LedgerError::OverRelease { .. }
                | LedgerError::ZeroQuantity,
            ) => 400,
            FulfillmentError::Ledger(LedgerError::Catalog(e)) | FulfillmentError::Catalog(e) => catalog_status(e),
            FulfillmentError::OrderNotFound(_) | FulfillmentError::OrderItemNotFound(_) => 404,
            FulfillmentError::OverReturn { .. } => 400,
            _ => 500,
        }
    }
}

fn catalog_status(e: &CatalogError) -> u16 {
    match e {
        CatalogError::Domain(DomainError::Conflict(_)) => 409,
        CatalogError::Domain(_) => 400,
        CatalogError::Poisoned => 500,
    }
}

fn dispatch_status(e: &DispatchError) -> u16 {
    match e {
        DispatchError::Validation(_)
        | DispatchError::InvariantViolation(_)
        | DispatchError::InvalidTransition { .. } => 400,
        DispatchError::NotFound => 404,
        DispatchError::Concurrency(_) | DispatchError::Conflict(_) => 409,
        DispatchError::Unauthorized => 403,
        _ => 500,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivideRequest {
    pub order_id: PurchaseOrderId,
    #[serde(default)]
    pub reset: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DivideResponse {
    Packed { status: u16, packages: Vec<PackageSummary> },
    Failed { status: u16, message: String },
}

impl DivideResponse {
    pub fn status(&self) -> u16 {
        match self {
            DivideResponse::Packed { status, .. } | DivideResponse::Failed { status, .. } => *status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualPackageRequest {
    pub order_item_id: OrderItemId,
    pub box_id: BoxId,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManualPackageResponse {
    pub status: u16,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipRequest {
    pub order_id: PurchaseOrderId,
    pub shipment_id: ShipmentId,
    /// Empty ships every package of the order not shipped yet.
    #[serde(default)]
    pub package_ids: Vec<OrderPackageId>,
}

/// Inbound notice that goods came back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnEvent {
    pub order_item_id: OrderItemId,
    pub returned_qty: u32,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnOutcome {
    pub order: PurchaseOrder,
    pub released_units: i64,
}

pub struct FulfillmentService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    catalog: Arc<CatalogStore>,
    ledger: InventoryLedger<S, B>,
    packages: PackageStore,
    config: FulfillmentConfig,
    item_orders: RwLock<HashMap<OrderItemId, (TenantId, PurchaseOrderId)>>,
}

impl<S, B> FulfillmentService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: S, bus: B, config: FulfillmentConfig) -> Self {
        let dispatcher = Arc::new(CommandDispatcher::new(store, bus));
        let catalog = Arc::new(CatalogStore::new());
        let ledger = InventoryLedger::new(
            dispatcher.clone(),
            catalog.clone(),
            config.max_append_retries,
            config.release_pending_on_return,
        );
        Self {
            dispatcher,
            catalog,
            ledger,
            packages: PackageStore::new(config.divider_settings()),
            config,
            item_orders: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &FulfillmentConfig {
        &self.config
    }

    pub fn ledger(&self) -> &InventoryLedger<S, B> {
        &self.ledger
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    pub fn register_product(&self, cmd: RegisterProduct) -> Result<Product, FulfillmentError> {
        Ok(self.ledger.register_product(cmd)?)
    }

    /// Returns the order items whose pending reservation this alias resolved.
    pub fn register_alias(&self, tenant_id: TenantId, alias: ProductAlias) -> Result<Vec<OrderItemId>, FulfillmentError> {
        Ok(self.ledger.register_alias(tenant_id, alias)?)
    }

    pub fn add_series(&self, tenant_id: TenantId, series: ProductSeries) -> Result<(), FulfillmentError> {
        Ok(self.catalog.add_series(tenant_id, series)?)
    }

    pub fn add_package_rule(&self, tenant_id: TenantId, rule: PackageRule) -> Result<(), FulfillmentError> {
        Ok(self.catalog.add_rule(tenant_id, rule)?)
    }

    /// Create the order in `Opened` and reserve stock for every item.
    ///
    /// Items are checked before anything is written: an alias pointing at an
    /// unregistered product rejects the import. If a reservation still fails
    /// after the order was committed, the reservations made so far are
    /// dropped and the order is cancelled.
    #[instrument(skip(self, header, items), fields(po_number = %header.po_number, items = items.len()))]
    pub fn import_order(
        &self,
        tenant_id: TenantId,
        retailer_id: RetailerId,
        header: OrderHeader,
        items: Vec<NewOrderItem>,
    ) -> Result<PurchaseOrder, FulfillmentError> {
        for item in &items {
            self.ledger.ensure_reservable(tenant_id, retailer_id, &item.merchant_sku)?;
        }

        let order_id = PurchaseOrderId::new(AggregateId::new());
        let cmd = PurchaseOrderCommand::ImportOrder(ImportOrder {
            tenant_id,
            order_id,
            retailer_id,
            header,
            items,
            occurred_at: Utc::now(),
        });
        let order = self
            .dispatcher
            .dispatch(tenant_id, order_id.0, ORDER_AGGREGATE, cmd, make_order)?
            .aggregate;

        for item in order.items() {
            if let Err(e) = self.ledger.reserve(tenant_id, retailer_id, item) {
                error!(%order_id, order_item_id = %item.id, error = %e, "reservation failed, abandoning import");
                self.abandon_import(tenant_id, &order);
                return Err(e.into());
            }
        }
        {
            let mut index = self.item_orders.write().map_err(|_| FulfillmentError::Poisoned)?;
            for item in order.items() {
                index.insert(item.id, (tenant_id, order_id));
            }
        }

        info!(%order_id, "order imported");
        Ok(order)
    }

    pub fn order(&self, tenant_id: TenantId, order_id: PurchaseOrderId) -> Result<PurchaseOrder, FulfillmentError> {
        let order: PurchaseOrder = self.dispatcher.load(tenant_id, order_id.0, make_order)?;
        if !order.is_imported() {
            return Err(FulfillmentError::OrderNotFound(order_id));
        }
        Ok(order)
    }

    pub fn history(&self, tenant_id: TenantId, order_id: PurchaseOrderId) -> Result<Vec<HistoryEntry>, FulfillmentError> {
        Ok(self.order(tenant_id, order_id)?.history().to_vec())
    }

    /// Move the order to `target`; the status and its history row are one event.
    #[instrument(skip(self))]
    pub fn transition(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        target: OrderStatus,
    ) -> Result<PurchaseOrder, FulfillmentError> {
        let cmd = PurchaseOrderCommand::TransitionStatus(TransitionStatus {
            tenant_id,
            order_id,
            target,
            occurred_at: Utc::now(),
        });
        match self.dispatcher.dispatch(tenant_id, order_id.0, ORDER_AGGREGATE, cmd, make_order) {
            Ok(out) => {
                info!(%order_id, status = %target, "order status changed");
                Ok(out.aggregate)
            }
            Err(DispatchError::NotFound) => Err(FulfillmentError::OrderNotFound(order_id)),
            Err(e) => {
                warn!(%order_id, error = %e, "status change rejected");
                Err(e.into())
            }
        }
    }

    /// Divide an order into packages; failures become a status and message.
    pub fn divide(&self, tenant_id: TenantId, request: DivideRequest) -> DivideResponse {
        match self.try_divide(tenant_id, request) {
            Ok(packages) => DivideResponse::Packed { status: 200, packages },
            Err(e) => {
                let status = if e.status_code() >= 500 { 500 } else { 400 };
                if status >= 500 {
                    error!(order_id = %request.order_id, error = %e, "divide failed");
                } else {
                    warn!(order_id = %request.order_id, error = %e, "divide rejected");
                }
                DivideResponse::Failed {
                    status,
                    message: e.to_string(),
                }
            }
        }
    }

    #[instrument(skip(self), fields(order_id = %request.order_id, reset = request.reset))]
    pub fn try_divide(&self, tenant_id: TenantId, request: DivideRequest) -> Result<Vec<PackageSummary>, FulfillmentError> {
        let order = self.packable_order(tenant_id, request.order_id)?;
        let lines = order
            .items()
            .iter()
            .map(|item| self.packable_line(tenant_id, &order, item))
            .collect::<Result<Vec<_>, _>>()?;
        let catalog = self.catalog.packaging(tenant_id)?;
        Ok(self
            .packages
            .plan_and_persist(request.order_id, &lines, request.reset, &catalog)?)
    }

    /// Manual packing; failures become a status and message.
    pub fn manual_pack(&self, tenant_id: TenantId, request: ManualPackageRequest) -> ManualPackageResponse {
        match self.try_manual_pack(tenant_id, request) {
            Ok(view) => ManualPackageResponse {
                status: 200,
                message: format!("package {} created", view.package.id),
            },
            Err(e) => {
                warn!(order_item_id = %request.order_item_id, error = %e, "manual packing rejected");
                ManualPackageResponse {
                    status: 400,
                    message: e.to_string(),
                }
            }
        }
    }

    #[instrument(skip(self), fields(order_item_id = %request.order_item_id, quantity = request.quantity))]
    pub fn try_manual_pack(&self, tenant_id: TenantId, request: ManualPackageRequest) -> Result<PackageView, FulfillmentError> {
        let order_id = self.order_of(tenant_id, request.order_item_id)?;
        let order = self.packable_order(tenant_id, order_id)?;
        let item = find_item(&order, request.order_item_id)?;
        let line = self.packable_line(tenant_id, &order, item)?;
        let box_def = self
            .catalog
            .find_box(tenant_id, request.box_id)?
            .ok_or(PackagingError::BoxNotFound(request.box_id))?;
        Ok(self.packages.add_manual(order_id, &line, &box_def, request.quantity)?)
    }

    #[instrument(skip(self))]
    pub fn update_manual(
        &self,
        tenant_id: TenantId,
        item_package_id: ItemPackageId,
        new_quantity: u32,
    ) -> Result<OrderItemPackage, FulfillmentError> {
        let line = self.allocation_line(tenant_id, item_package_id)?;
        Ok(self.packages.update_manual(item_package_id, &line, new_quantity)?)
    }

    #[instrument(skip(self))]
    pub fn delete_manual(&self, tenant_id: TenantId, item_package_id: ItemPackageId) -> Result<(), FulfillmentError> {
        let line = self.allocation_line(tenant_id, item_package_id)?;
        Ok(self.packages.delete_manual(item_package_id, &line)?)
    }

    pub fn packages_for_order(&self, tenant_id: TenantId, order_id: PurchaseOrderId) -> Result<Vec<PackageView>, FulfillmentError> {
        self.order(tenant_id, order_id)?;
        Ok(self.packages.packages_for_order(order_id)?)
    }

    /// Attach a shipment to the order's packages and move the order to `Shipped`.
    ///
    /// The status change is the last step; if it fails the shipment is
    /// detached again.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, shipment_id = %request.shipment_id))]
    pub fn ship(&self, tenant_id: TenantId, request: ShipRequest) -> Result<PurchaseOrder, FulfillmentError> {
        let order = self.order(tenant_id, request.order_id)?;
        ensure_transition(&order, OrderStatus::Shipped)?;

        let shipped = self
            .packages
            .attach_shipment(request.order_id, request.shipment_id, &request.package_ids)?;
        match self.transition(tenant_id, request.order_id, OrderStatus::Shipped) {
            Ok(order) => {
                info!(packages = shipped.len(), "order shipped");
                Ok(order)
            }
            Err(e) => {
                self.packages.detach_shipment(request.shipment_id)?;
                Err(e)
            }
        }
    }

    /// Put returned goods back on hand and mark the order `Returned`.
    ///
    /// Further returns against an order already in `Returned` release stock
    /// without another status change.
    #[instrument(skip(self, event), fields(order_item_id = %event.order_item_id, returned_qty = event.returned_qty))]
    pub fn process_return(&self, tenant_id: TenantId, event: ReturnEvent) -> Result<ReturnOutcome, FulfillmentError> {
        let order_id = self.order_of(tenant_id, event.order_item_id)?;
        let order = self.order(tenant_id, order_id)?;
        let item = find_item(&order, event.order_item_id)?;
        if event.returned_qty > item.qty_ordered {
            return Err(FulfillmentError::OverReturn {
                returned: event.returned_qty,
                ordered: item.qty_ordered,
            });
        }
        let already_returned = order.status() == OrderStatus::Returned;
        if !already_returned {
            ensure_transition(&order, OrderStatus::Returned)?;
        }
        let retailer_id = retailer_of(&order)?;

        let order_item_id = item.id;
        let released_units = self.ledger.release(tenant_id, retailer_id, item, event.returned_qty)?;
        info!(released_units, reason = event.reason.as_deref().unwrap_or(""), "return received");

        if already_returned {
            return Ok(ReturnOutcome { order, released_units });
        }
        match self.transition(tenant_id, order_id, OrderStatus::Returned) {
            Ok(order) => Ok(ReturnOutcome { order, released_units }),
            Err(e) => {
                self.ledger.undo_release(tenant_id, order_item_id, released_units)?;
                Err(e)
            }
        }
    }

    /// Rebuild `projection` from every order stream of the tenant.
    pub fn replay_orders(&self, tenant_id: TenantId, projection: &OrderStatusProjection) -> Result<(), FulfillmentError> {
        let events = self
            .dispatcher
            .store()
            .load_by_type(tenant_id, ORDER_AGGREGATE)
            .map_err(DispatchError::from)?;
        projection.rebuild_from_scratch(events.iter().map(|e| e.to_envelope()))?;
        Ok(())
    }

    fn packable_order(&self, tenant_id: TenantId, order_id: PurchaseOrderId) -> Result<PurchaseOrder, FulfillmentError> {
        let order = self.order(tenant_id, order_id)?;
        if !self.config.is_packable(order.status()) {
            return Err(PackagingError::PackagingLocked { status: order.status() }.into());
        }
        Ok(order)
    }

    fn order_of(&self, tenant_id: TenantId, order_item_id: OrderItemId) -> Result<PurchaseOrderId, FulfillmentError> {
        let index = self.item_orders.read().map_err(|_| FulfillmentError::Poisoned)?;
        match index.get(&order_item_id) {
            Some((tenant, order_id)) if *tenant == tenant_id => Ok(*order_id),
            _ => Err(FulfillmentError::OrderItemNotFound(order_item_id)),
        }
    }

    /// The line behind an existing allocation, checking the order is still packable.
    fn allocation_line(&self, tenant_id: TenantId, item_package_id: ItemPackageId) -> Result<PackableLine, FulfillmentError> {
        let allocation = self.packages.item_package(item_package_id)?;
        let order = self.packable_order(tenant_id, allocation.order_id)?;
        let item = find_item(&order, allocation.order_item_id)?;
        self.packable_line(tenant_id, &order, item)
    }

    /// Resolve an item to its product's series, pack size and weight.
    fn packable_line(&self, tenant_id: TenantId, order: &PurchaseOrder, item: &OrderItem) -> Result<PackableLine, FulfillmentError> {
        let retailer_id = retailer_of(order)?;
        let profile = match self.catalog.alias(tenant_id, retailer_id, &item.merchant_sku)? {
            Some(alias) => match self.ledger.product(tenant_id, alias.product_id) {
                Ok(product) => product.series_id().map(|series_id| ItemProfile {
                    series_id,
                    sku_quantity: alias.sku_quantity,
                    unit_weight: product.weight(),
                }),
                Err(LedgerError::Dispatch(DispatchError::NotFound)) => None,
                Err(e) => return Err(e.into()),
            },
            None => None,
        };
        Ok(PackableLine {
            order_item_id: item.id,
            qty_ordered: item.qty_ordered,
            profile,
        })
    }

    fn abandon_import(&self, tenant_id: TenantId, order: &PurchaseOrder) {
        let order_id = order.id_typed();
        for item in order.items() {
            if let Err(e) = self.ledger.unreserve(tenant_id, item.id) {
                error!(%order_id, order_item_id = %item.id, error = %e, "could not drop reservation");
            }
        }
        if let Err(e) = self.transition(tenant_id, order_id, OrderStatus::Cancelled) {
            error!(%order_id, error = %e, "could not cancel abandoned order");
        }
    }
}

fn make_order(_: TenantId, id: AggregateId) -> PurchaseOrder {
    PurchaseOrder::empty(PurchaseOrderId::new(id))
}

fn find_item(order: &PurchaseOrder, order_item_id: OrderItemId) -> Result<&OrderItem, FulfillmentError> {
    order
        .item(order_item_id)
        .ok_or(FulfillmentError::OrderItemNotFound(order_item_id))
}

fn retailer_of(order: &PurchaseOrder) -> Result<RetailerId, FulfillmentError> {
    order
        .retailer_id()
        .ok_or(FulfillmentError::OrderNotFound(order.id_typed()))
}

fn ensure_transition(order: &PurchaseOrder, target: OrderStatus) -> Result<(), FulfillmentError> {
    if !order.status().can_transition_to(target) {
        return Err(DomainError::invalid_transition(order.status().as_str(), target.as_str()).into());
    }
    Ok(())
}
