//! Inventory ledger: order-item reservations against product counters.
//!
//! Counters live on the `Product` aggregate and only move through
//! `StockReserved` / `StockReleased` deltas appended with the revision they
//! were decided against. A lost race surfaces as a concurrency error and the
//! command is re-run on fresh state, up to `max_append_retries` times.
//!
//! Items whose SKU has no alias yet are parked as
//! `ReservationState::PendingAliasResolution` and reserved when the alias is
//! registered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, instrument, warn};

use orderflow_core::{AggregateId, OrderItemId, RetailerId, TenantId};
use orderflow_events::{EventBus, EventEnvelope};
use orderflow_inventory::{
    AdjustStock, Product, ProductAlias, ProductCommand, ProductId, RegisterProduct, ReleaseStock,
    ReservationState, ReserveStock, reservation_units,
};
use orderflow_orders::OrderItem;

use crate::catalog_store::{CatalogError, CatalogStore};
use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;

pub const PRODUCT_AGGREGATE: &str = "inventory.product";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no product alias for merchant sku '{merchant_sku}'")]
    ProductAliasNotFound { merchant_sku: String },

    #[error("order item {0} has no reservation")]
    NoReservation(OrderItemId),

    #[error("cannot release {requested} units, only {held} are held")]
    OverRelease { requested: i64, held: i64 },

    #[error("returned quantity must be positive")]
    ZeroQuantity,

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("reservation table lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone)]
struct Reservation {
    tenant_id: TenantId,
    state: ReservationState,
}

pub struct InventoryLedger<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    catalog: Arc<CatalogStore>,
    reservations: Mutex<HashMap<OrderItemId, Reservation>>,
    max_append_retries: u32,
    release_pending_on_return: bool,
}

impl<S, B> InventoryLedger<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        catalog: Arc<CatalogStore>,
        max_append_retries: u32,
        release_pending_on_return: bool,
    ) -> Self {
        Self {
            dispatcher,
            catalog,
            reservations: Mutex::new(HashMap::new()),
            max_append_retries,
            release_pending_on_return,
        }
    }

    pub fn register_product(&self, cmd: RegisterProduct) -> Result<Product, LedgerError> {
        let (tenant_id, product_id) = (cmd.tenant_id, cmd.product_id);
        Ok(self.run(tenant_id, product_id, ProductCommand::RegisterProduct(cmd))?)
    }

    pub fn adjust_stock(&self, cmd: AdjustStock) -> Result<Product, LedgerError> {
        let (tenant_id, product_id) = (cmd.tenant_id, cmd.product_id);
        Ok(self.run(tenant_id, product_id, ProductCommand::AdjustStock(cmd))?)
    }

    pub fn product(&self, tenant_id: TenantId, product_id: ProductId) -> Result<Product, LedgerError> {
        let product: Product = self
            .dispatcher
            .load(tenant_id, product_id.0, |_, id| Product::empty(ProductId::new(id)))?;
        if !product.is_registered() {
            return Err(DispatchError::NotFound.into());
        }
        Ok(product)
    }

    pub fn reservation(&self, order_item_id: OrderItemId) -> Result<Option<ReservationState>, LedgerError> {
        let reservations = self.reservations.lock().map_err(|_| LedgerError::Poisoned)?;
        Ok(reservations.get(&order_item_id).map(|r| r.state.clone()))
    }

    /// Reserve `qty_ordered × sku_quantity` units for an imported item.
    ///
    /// Reserving an item twice returns the existing state without touching
    /// the counters.
    #[instrument(skip(self, item), fields(order_item_id = %item.id, merchant_sku = %item.merchant_sku))]
    pub fn reserve(
        &self,
        tenant_id: TenantId,
        retailer_id: RetailerId,
        item: &OrderItem,
    ) -> Result<ReservationState, LedgerError> {
        let mut reservations = self.reservations.lock().map_err(|_| LedgerError::Poisoned)?;
        if let Some(existing) = reservations.get(&item.id) {
            return Ok(existing.state.clone());
        }

        let state = match self.catalog.alias(tenant_id, retailer_id, &item.merchant_sku)? {
            Some(alias) => self.reserve_with(tenant_id, item.id, &alias, item.qty_ordered)?,
            None => {
                warn!("no alias for merchant sku, reservation pending");
                ReservationState::PendingAliasResolution {
                    retailer_id,
                    merchant_sku: item.merchant_sku.clone(),
                    qty_ordered: item.qty_ordered,
                }
            }
        };
        reservations.insert(
            item.id,
            Reservation {
                tenant_id,
                state: state.clone(),
            },
        );
        Ok(state)
    }

    /// Register an alias and reserve every item that was waiting for it.
    ///
    /// The alias must point at a registered product; otherwise nothing is
    /// stored. Returns the items that got reserved.
    #[instrument(skip(self, alias), fields(merchant_sku = %alias.merchant_sku, retailer_id = %alias.retailer_id))]
    pub fn register_alias(
        &self,
        tenant_id: TenantId,
        alias: ProductAlias,
    ) -> Result<Vec<OrderItemId>, LedgerError> {
        self.product(tenant_id, alias.product_id)?;
        self.catalog.register_alias(tenant_id, alias.clone())?;
        self.reconcile(tenant_id, alias.retailer_id, &alias.merchant_sku)
    }

    /// Reserve the items still pending on `(retailer_id, merchant_sku)`
    /// through its registered alias.
    ///
    /// Items reserved before a failure stay reserved; the others stay
    /// pending for the next call.
    #[instrument(skip(self))]
    pub fn reconcile(
        &self,
        tenant_id: TenantId,
        retailer_id: RetailerId,
        merchant_sku: &str,
    ) -> Result<Vec<OrderItemId>, LedgerError> {
        let Some(alias) = self.catalog.alias(tenant_id, retailer_id, merchant_sku)? else {
            return Ok(vec![]);
        };

        let mut reservations = self.reservations.lock().map_err(|_| LedgerError::Poisoned)?;
        let waiting: Vec<(OrderItemId, u32)> = reservations
            .iter()
            .filter(|(_, r)| r.tenant_id == tenant_id)
            .filter_map(|(id, r)| match &r.state {
                ReservationState::PendingAliasResolution {
                    retailer_id,
                    merchant_sku,
                    qty_ordered,
                } if *retailer_id == alias.retailer_id && *merchant_sku == alias.merchant_sku => {
                    Some((*id, *qty_ordered))
                }
                _ => None,
            })
            .collect();

        let mut resolved = Vec::with_capacity(waiting.len());
        for (order_item_id, qty_ordered) in waiting {
            let state = self.reserve_with(tenant_id, order_item_id, &alias, qty_ordered)?;
            reservations.insert(order_item_id, Reservation { tenant_id, state });
            resolved.push(order_item_id);
        }
        if !resolved.is_empty() {
            info!(resolved = resolved.len(), "pending reservations resolved");
        }
        Ok(resolved)
    }

    /// Fails when `merchant_sku` has an alias whose product is not registered.
    /// An unknown SKU is fine; its reservation is deferred.
    pub fn ensure_reservable(
        &self,
        tenant_id: TenantId,
        retailer_id: RetailerId,
        merchant_sku: &str,
    ) -> Result<(), LedgerError> {
        if let Some(alias) = self.catalog.alias(tenant_id, retailer_id, merchant_sku)? {
            self.product(tenant_id, alias.product_id)?;
        }
        Ok(())
    }

    /// Drop an item's reservation and give its held units back.
    #[instrument(skip(self))]
    pub fn unreserve(&self, tenant_id: TenantId, order_item_id: OrderItemId) -> Result<(), LedgerError> {
        let mut reservations = self.reservations.lock().map_err(|_| LedgerError::Poisoned)?;
        let Some(reservation) = reservations.get(&order_item_id) else {
            return Ok(());
        };
        if let (Some(product_id), ReservationState::Reserved { units, .. }) =
            (reservation.state.product_id(), &reservation.state)
        {
            let units = *units;
            if units > 0 {
                let cmd = ProductCommand::ReleaseStock(ReleaseStock {
                    tenant_id,
                    product_id,
                    order_item_id,
                    units,
                    release_pending: true,
                    occurred_at: Utc::now(),
                });
                self.run(tenant_id, product_id, cmd)?;
            }
        }
        reservations.remove(&order_item_id);
        info!("reservation dropped");
        Ok(())
    }

    /// Put `returned_qty` alias-units back on hand.
    ///
    /// The product is found through the item's current alias. Returns the
    /// number of product units released.
    #[instrument(skip(self, item), fields(order_item_id = %item.id))]
    pub fn release(
        &self,
        tenant_id: TenantId,
        retailer_id: RetailerId,
        item: &OrderItem,
        returned_qty: u32,
    ) -> Result<i64, LedgerError> {
        if returned_qty == 0 {
            return Err(LedgerError::ZeroQuantity);
        }
        let alias = self
            .catalog
            .alias(tenant_id, retailer_id, &item.merchant_sku)?
            .ok_or_else(|| LedgerError::ProductAliasNotFound {
                merchant_sku: item.merchant_sku.clone(),
            })?;
        let units = reservation_units(returned_qty, alias.sku_quantity);

        let mut reservations = self.reservations.lock().map_err(|_| LedgerError::Poisoned)?;
        let held = match reservations.get(&item.id).map(|r| &r.state) {
            Some(ReservationState::Reserved { units, .. }) => *units,
            _ => return Err(LedgerError::NoReservation(item.id)),
        };
        if units > held {
            return Err(LedgerError::OverRelease {
                requested: units,
                held,
            });
        }

        let cmd = ProductCommand::ReleaseStock(ReleaseStock {
            tenant_id,
            product_id: alias.product_id,
            order_item_id: item.id,
            units,
            release_pending: self.release_pending_on_return,
            occurred_at: Utc::now(),
        });
        self.run(tenant_id, alias.product_id, cmd)?;

        if let Some(Reservation {
            state: ReservationState::Reserved { units: remaining, .. },
            ..
        }) = reservations.get_mut(&item.id)
        {
            *remaining -= units;
        }
        info!(units, "stock released");
        Ok(units)
    }

    /// Hold `units` again after a [`release`](Self::release) whose follow-up
    /// step failed. Mirrors exactly what the release moved.
    #[instrument(skip(self))]
    pub fn undo_release(
        &self,
        tenant_id: TenantId,
        order_item_id: OrderItemId,
        units: i64,
    ) -> Result<(), LedgerError> {
        if units <= 0 {
            return Ok(());
        }
        let mut reservations = self.reservations.lock().map_err(|_| LedgerError::Poisoned)?;
        let Some(product_id) = reservations.get(&order_item_id).and_then(|r| r.state.product_id()) else {
            return Err(LedgerError::NoReservation(order_item_id));
        };

        let cmd = if self.release_pending_on_return {
            ProductCommand::ReserveStock(ReserveStock {
                tenant_id,
                product_id,
                order_item_id,
                units,
                occurred_at: Utc::now(),
            })
        } else {
            ProductCommand::AdjustStock(AdjustStock {
                tenant_id,
                product_id,
                delta: -units,
                occurred_at: Utc::now(),
            })
        };
        self.run(tenant_id, product_id, cmd)?;

        if let Some(Reservation {
            state: ReservationState::Reserved { units: held, .. },
            ..
        }) = reservations.get_mut(&order_item_id)
        {
            *held += units;
        }
        warn!(units, "release undone");
        Ok(())
    }

    fn reserve_with(
        &self,
        tenant_id: TenantId,
        order_item_id: OrderItemId,
        alias: &ProductAlias,
        qty_ordered: u32,
    ) -> Result<ReservationState, LedgerError> {
        let units = reservation_units(qty_ordered, alias.sku_quantity);
        let cmd = ProductCommand::ReserveStock(ReserveStock {
            tenant_id,
            product_id: alias.product_id,
            order_item_id,
            units,
            occurred_at: Utc::now(),
        });
        self.run(tenant_id, alias.product_id, cmd)?;
        Ok(ReservationState::Reserved {
            product_id: alias.product_id,
            sku_quantity: alias.sku_quantity,
            units,
        })
    }

    fn run(&self, tenant_id: TenantId, product_id: ProductId, cmd: ProductCommand) -> Result<Product, DispatchError> {
        let aggregate_id: AggregateId = product_id.0;
        let mut attempt = 0;
        loop {
            let result = self.dispatcher.dispatch(
                tenant_id,
                aggregate_id,
                PRODUCT_AGGREGATE,
                cmd.clone(),
                |_, id| Product::empty(ProductId::new(id)),
            );
            match result {
                Ok(out) => return Ok(out.aggregate),
                Err(err) if err.is_retryable() && attempt < self.max_append_retries => {
                    attempt += 1;
                    warn!(%product_id, attempt, "product stream moved, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }
}
