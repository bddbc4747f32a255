//! End-to-end runs through `FulfillmentService`:
//! import -> reserve -> divide / manual pack -> ship -> return,
//! with the status projection fed from the bus.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;

use orderflow_core::{
    AggregateId, BoxId, DimensionUnit, Dimensions, OrderPackageId, RetailerId, SeriesId,
    ShipmentId, TenantId, Weight,
};
use orderflow_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use orderflow_inventory::{ProductAlias, ProductId, RegisterProduct};
use orderflow_orders::{NewOrderItem, OrderHeader, OrderStatus, PurchaseOrder};
use orderflow_packaging::{BoxDefinition, PackageRule, ProductSeries};

use crate::config::FulfillmentConfig;
use crate::event_store::InMemoryEventStore;
use crate::fulfillment::{
    DivideRequest, DivideResponse, FulfillmentError, FulfillmentService, ManualPackageRequest,
    ReturnEvent, ShipRequest,
};
use crate::package_store::PackagingError;
use crate::projections::OrderStatusProjection;

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Service = FulfillmentService<Arc<InMemoryEventStore>, Bus>;

struct World {
    service: Service,
    bus: Bus,
    tenant: TenantId,
    retailer: RetailerId,
    product: ProductId,
    small_box: BoxId,
}

fn boxed(max_quantity: u32) -> BoxDefinition {
    BoxDefinition {
        id: BoxId::new(),
        name: format!("carton-{max_quantity}"),
        max_quantity,
        dimensions: Dimensions::new(20.0, 16.0, 12.0, DimensionUnit::In),
    }
}

/// One product (0.4 lb) in one series packed into 50- or 100-unit cartons,
/// sold as a 5-pack (`WIDGET-5PK`) and as a single (`WIDGET-1`).
fn world() -> World {
    orderflow_observability::init_with_filter("orderflow_infra=debug");
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let service = FulfillmentService::new(
        Arc::new(InMemoryEventStore::new()),
        bus.clone(),
        FulfillmentConfig::default(),
    );
    let tenant = TenantId::new();
    let retailer = RetailerId::new();
    let series = SeriesId::new();
    let product = ProductId::new(AggregateId::new());
    let small = boxed(50);
    let small_box = small.id;

    service
        .add_series(
            tenant,
            ProductSeries {
                id: series,
                name: "widgets".to_string(),
            },
        )
        .unwrap();
    service
        .add_package_rule(
            tenant,
            PackageRule {
                series_id: series,
                name: "widget cartons".to_string(),
                boxes: vec![small, boxed(100)],
            },
        )
        .unwrap();
    service
        .register_product(RegisterProduct {
            tenant_id: tenant,
            product_id: product,
            sku: "WIDGET".to_string(),
            series_id: series,
            weight: Weight::pounds(0.4),
            qty_on_hand: 1_000,
            occurred_at: Utc::now(),
        })
        .unwrap();
    for (sku, pack) in [("WIDGET-5PK", 5), ("WIDGET-1", 1)] {
        service
            .register_alias(tenant, ProductAlias::new(retailer, sku, product, pack).unwrap())
            .unwrap();
    }

    World {
        service,
        bus,
        tenant,
        retailer,
        product,
        small_box,
    }
}

impl World {
    fn import(&self, lines: &[(&str, u32)]) -> PurchaseOrder {
        let items = lines
            .iter()
            .map(|(sku, qty)| NewOrderItem {
                merchant_sku: sku.to_string(),
                vendor_sku: None,
                qty_ordered: *qty,
                unit_cost: 1_250,
            })
            .collect();
        let header = OrderHeader {
            retailer_purchase_order_id: "R-77".to_string(),
            po_number: "PO-4411".to_string(),
            ..OrderHeader::default()
        };
        self.service
            .import_order(self.tenant, self.retailer, header, items)
            .unwrap()
    }

    fn counters(&self) -> (i64, i64) {
        let p = self.service.ledger().product(self.tenant, self.product).unwrap();
        (p.qty_on_hand(), p.qty_pending())
    }

    fn divide(&self, order: &PurchaseOrder, reset: bool) -> DivideResponse {
        self.service.divide(
            self.tenant,
            DivideRequest {
                order_id: order.id_typed(),
                reset,
            },
        )
    }
}

fn packages(response: &DivideResponse) -> Vec<(OrderPackageId, u32)> {
    match response {
        DivideResponse::Packed { packages, .. } => packages
            .iter()
            .map(|p| (p.order_package_id, p.box_max_quantity))
            .collect(),
        DivideResponse::Failed { message, .. } => panic!("divide failed: {message}"),
    }
}

fn message(response: &DivideResponse) -> &str {
    match response {
        DivideResponse::Failed { message, .. } => message,
        DivideResponse::Packed { .. } => panic!("divide unexpectedly succeeded"),
    }
}

fn feed(projection: &OrderStatusProjection, sub: &Subscription<EventEnvelope<JsonValue>>) {
    for env in sub.drain() {
        projection.apply_envelope(&env).unwrap();
    }
}

#[test]
fn import_reserves_alias_units() {
    let w = world();
    let order = w.import(&[("WIDGET-5PK", 25), ("WIDGET-1", 3)]);

    assert_eq!(order.status(), OrderStatus::Opened);
    assert_eq!(order.history().len(), 1);
    assert_eq!(w.counters(), (1_000 - 125 - 3, 128));
}

#[test]
fn twenty_five_five_packs_fill_a_hundred_and_a_fifty() {
    let w = world();
    let order = w.import(&[("WIDGET-5PK", 25)]);

    let response = w.divide(&order, false);
    assert_eq!(response.status(), 200);
    let caps: Vec<u32> = packages(&response).iter().map(|(_, c)| *c).collect();
    assert_eq!(caps, vec![100, 50]);

    let views = w.service.packages_for_order(w.tenant, order.id_typed()).unwrap();
    let pieces: Vec<u32> = views.iter().map(|v| v.items[0].quantity).collect();
    assert_eq!(pieces, vec![20, 5]);
    assert_eq!(views[0].package.weight, Weight::pounds(40.0));
    assert_eq!(views[1].package.weight, Weight::pounds(10.0));
}

#[test]
fn divide_is_idempotent_until_reset() {
    let w = world();
    let order = w.import(&[("WIDGET-5PK", 25), ("WIDGET-1", 30)]);

    let first = packages(&w.divide(&order, false));
    let again = packages(&w.divide(&order, false));
    assert_eq!(first, again);

    let reset = packages(&w.divide(&order, true));
    assert!(first.iter().all(|(a, _)| reset.iter().all(|(b, _)| a != b)));

    // Conservation after the reset.
    let views = w.service.packages_for_order(w.tenant, order.id_typed()).unwrap();
    for item in order.items() {
        let packed: u32 = views
            .iter()
            .flat_map(|v| v.items.iter())
            .filter(|ip| ip.order_item_id == item.id)
            .map(|ip| ip.quantity)
            .sum();
        assert_eq!(packed, item.qty_ordered);
    }

    // A plain divide right after the reset hands back the fresh plan.
    assert_eq!(reset, packages(&w.divide(&order, false)));
}

#[test]
fn manual_packing_cannot_exceed_order() {
    let w = world();
    let order = w.import(&[("WIDGET-1", 10)]);
    let item_id = order.items()[0].id;
    let request = |quantity| ManualPackageRequest {
        order_item_id: item_id,
        box_id: w.small_box,
        quantity,
    };

    assert_eq!(w.service.manual_pack(w.tenant, request(7)).status, 200);
    let rejected = w.service.manual_pack(w.tenant, request(5));
    assert_eq!(rejected.status, 400);
    assert_eq!(rejected.message, "quantity 5 exceeds remaining quantity 3");
    assert_eq!(w.service.manual_pack(w.tenant, request(3)).status, 200);
}

#[test]
fn manual_allocations_can_be_edited_before_shipping() {
    let w = world();
    let order = w.import(&[("WIDGET-1", 10)]);
    let item_id = order.items()[0].id;
    let view = w
        .service
        .try_manual_pack(
            w.tenant,
            ManualPackageRequest {
                order_item_id: item_id,
                box_id: w.small_box,
                quantity: 4,
            },
        )
        .unwrap();
    assert_eq!(view.package.weight, Weight::pounds(1.6));
    let ip = view.items[0].id;

    assert_eq!(w.service.update_manual(w.tenant, ip, 10).unwrap().quantity, 10);
    assert!(matches!(
        w.service.update_manual(w.tenant, ip, 11),
        Err(FulfillmentError::Packaging(PackagingError::OverQuantity { requested: 11, remain: 10 }))
    ));

    w.service.delete_manual(w.tenant, ip).unwrap();
    let views = w.service.packages_for_order(w.tenant, order.id_typed()).unwrap();
    assert_eq!(views[0].package.weight, Weight::zero());
    assert!(views[0].items.is_empty());
}

#[test]
fn illegal_transition_leaves_order_untouched() {
    let w = world();
    let order = w.import(&[("WIDGET-1", 1)]);

    let err = w
        .service
        .transition(w.tenant, order.id_typed(), OrderStatus::Invoiced)
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert_eq!(err.to_string(), "invalid transition from 'Opened' to 'Invoiced'");

    let order = w.service.order(w.tenant, order.id_typed()).unwrap();
    assert_eq!(order.status(), OrderStatus::Opened);
    assert_eq!(order.history().len(), 1);
}

#[test]
fn shipping_locks_packaging() {
    let w = world();
    let order = w.import(&[("WIDGET-5PK", 25)]);
    let order_id = order.id_typed();
    w.service
        .transition(w.tenant, order_id, OrderStatus::Acknowledged)
        .unwrap();
    assert_eq!(w.divide(&order, false).status(), 200);

    let shipped = w
        .service
        .ship(
            w.tenant,
            ShipRequest {
                order_id,
                shipment_id: ShipmentId::new(),
                package_ids: vec![],
            },
        )
        .unwrap();
    assert_eq!(shipped.status(), OrderStatus::Shipped);
    assert_eq!(shipped.history().len(), 3);

    let response = w.divide(&order, true);
    assert_eq!(response.status(), 400);
    assert_eq!(message(&response), "order in status 'Shipped' cannot be packaged");

    let manual = w.service.manual_pack(
        w.tenant,
        ManualPackageRequest {
            order_item_id: order.items()[0].id,
            box_id: w.small_box,
            quantity: 1,
        },
    );
    assert_eq!(manual.status, 400);
    assert!(
        w.service
            .packages_for_order(w.tenant, order_id)
            .unwrap()
            .iter()
            .all(|v| v.package.is_shipped())
    );
}

#[test]
fn cancelled_order_cannot_ship() {
    let w = world();
    let order = w.import(&[("WIDGET-1", 2)]);
    w.divide(&order, false);
    w.service
        .transition(w.tenant, order.id_typed(), OrderStatus::Cancelled)
        .unwrap();

    let err = w
        .service
        .ship(
            w.tenant,
            ShipRequest {
                order_id: order.id_typed(),
                shipment_id: ShipmentId::new(),
                package_ids: vec![],
            },
        )
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert!(
        w.service
            .packages_for_order(w.tenant, order.id_typed())
            .unwrap()
            .iter()
            .all(|v| !v.package.is_shipped())
    );
}

#[test]
fn return_releases_stock_and_marks_order_returned() {
    let w = world();
    let order = w.import(&[("WIDGET-5PK", 25)]);
    let order_id = order.id_typed();
    let item_id = order.items()[0].id;
    w.service
        .transition(w.tenant, order_id, OrderStatus::Acknowledged)
        .unwrap();
    w.divide(&order, false);
    w.service
        .ship(
            w.tenant,
            ShipRequest {
                order_id,
                shipment_id: ShipmentId::new(),
                package_ids: vec![],
            },
        )
        .unwrap();
    assert_eq!(w.counters(), (875, 125));

    let outcome = w
        .service
        .process_return(
            w.tenant,
            ReturnEvent {
                order_item_id: item_id,
                returned_qty: 2,
                reason: Some("damaged".to_string()),
            },
        )
        .unwrap();
    assert_eq!(outcome.released_units, 10);
    assert_eq!(outcome.order.status(), OrderStatus::Returned);
    assert_eq!(w.counters(), (885, 115));

    // A second return releases stock but adds no history row.
    let rows = outcome.order.history().len();
    let again = w
        .service
        .process_return(
            w.tenant,
            ReturnEvent {
                order_item_id: item_id,
                returned_qty: 1,
                reason: None,
            },
        )
        .unwrap();
    assert_eq!(again.order.history().len(), rows);
    assert_eq!(w.counters(), (890, 110));
}

#[test]
fn return_before_shipping_is_rejected() {
    let w = world();
    let order = w.import(&[("WIDGET-1", 4)]);

    let err = w
        .service
        .process_return(
            w.tenant,
            ReturnEvent {
                order_item_id: order.items()[0].id,
                returned_qty: 1,
                reason: None,
            },
        )
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert_eq!(w.counters(), (996, 4));
}

#[test]
fn unknown_sku_blocks_divide_until_alias_arrives() {
    let w = world();
    let order = w.import(&[("WIDGET-10PK", 3)]);
    assert!(
        w.service
            .ledger()
            .reservation(order.items()[0].id)
            .unwrap()
            .unwrap()
            .is_pending()
    );

    let response = w.divide(&order, false);
    assert_eq!(response.status(), 400);
    assert!(message(&response).starts_with("no product series found"));

    let resolved = w
        .service
        .register_alias(
            w.tenant,
            ProductAlias::new(w.retailer, "WIDGET-10PK", w.product, 10).unwrap(),
        )
        .unwrap();
    assert_eq!(resolved, vec![order.items()[0].id]);
    assert_eq!(w.counters(), (970, 30));
    assert_eq!(packages(&w.divide(&order, false)).len(), 1);
}

#[test]
fn import_with_a_dangling_alias_writes_nothing() {
    let w = world();
    // Planted straight in the catalog; the ledger refuses such aliases.
    w.service
        .catalog()
        .register_alias(
            w.tenant,
            ProductAlias::new(w.retailer, "GHOST", ProductId::new(AggregateId::new()), 1).unwrap(),
        )
        .unwrap();

    let items = [("WIDGET-1", 7), ("GHOST", 1)]
        .into_iter()
        .map(|(sku, qty)| NewOrderItem {
            merchant_sku: sku.to_string(),
            vendor_sku: None,
            qty_ordered: qty,
            unit_cost: 100,
        })
        .collect();
    let result = w
        .service
        .import_order(w.tenant, w.retailer, OrderHeader::default(), items);
    assert!(result.is_err());
    assert_eq!(w.counters(), (1_000, 0));

    let replayed = OrderStatusProjection::new();
    w.service.replay_orders(w.tenant, &replayed).unwrap();
    for status in OrderStatus::ALL {
        assert!(replayed.in_status(w.tenant, status).is_empty(), "{status}");
    }
}

#[test]
fn missing_and_incompatible_rules_are_reported() {
    let w = world();
    let bare_series = SeriesId::new();
    let tiny = ProductId::new(AggregateId::new());
    w.service
        .register_product(RegisterProduct {
            tenant_id: w.tenant,
            product_id: tiny,
            sku: "GASKET".to_string(),
            series_id: bare_series,
            weight: Weight::pounds(0.1),
            qty_on_hand: 500,
            occurred_at: Utc::now(),
        })
        .unwrap();
    w.service
        .register_alias(w.tenant, ProductAlias::new(w.retailer, "GASKET-1", tiny, 1).unwrap())
        .unwrap();
    let order = w.import(&[("GASKET-1", 2)]);

    let response = w.divide(&order, false);
    assert_eq!(response.status(), 400);
    assert_eq!(
        message(&response),
        format!("no package rule found for series {bare_series}")
    );

    // A 60-pack cannot fit the 50-unit carton of the widget rule.
    w.service
        .register_alias(w.tenant, ProductAlias::new(w.retailer, "WIDGET-60PK", w.product, 60).unwrap())
        .unwrap();
    let order = w.import(&[("WIDGET-60PK", 1)]);
    assert_eq!(w.divide(&order, false).status(), 500);
    assert!(
        w.service
            .packages_for_order(w.tenant, order.id_typed())
            .unwrap()
            .is_empty()
    );
}

#[test]
fn duplicate_alias_is_a_conflict() {
    let w = world();
    let err = w
        .service
        .register_alias(w.tenant, ProductAlias::new(w.retailer, "WIDGET-1", w.product, 1).unwrap())
        .unwrap_err();
    assert_eq!(err.status_code(), 409);
}

#[test]
fn orders_are_tenant_scoped() {
    let w = world();
    let order = w.import(&[("WIDGET-1", 1)]);

    let err = w.service.order(TenantId::new(), order.id_typed()).unwrap_err();
    assert!(matches!(err, FulfillmentError::OrderNotFound(_)));
    assert_eq!(err.status_code(), 404);

    let response = w.service.manual_pack(
        TenantId::new(),
        ManualPackageRequest {
            order_item_id: order.items()[0].id,
            box_id: w.small_box,
            quantity: 1,
        },
    );
    assert_eq!(response.status, 400);
}

#[test]
fn status_projection_follows_the_bus_and_replays() {
    let w = world();
    let sub = w.bus.subscribe();
    let live = OrderStatusProjection::new();

    let order = w.import(&[("WIDGET-1", 6)]);
    let order_id = order.id_typed();
    w.service
        .transition(w.tenant, order_id, OrderStatus::Acknowledged)
        .unwrap();
    w.service
        .transition(w.tenant, order_id, OrderStatus::Backorder)
        .unwrap();
    feed(&live, &sub);

    let view = live.get(w.tenant, order_id).unwrap();
    assert_eq!(view.status, OrderStatus::Backorder);
    assert_eq!(view.po_number, "PO-4411");
    let statuses: Vec<OrderStatus> = view.history.iter().map(|h| h.status).collect();
    assert_eq!(
        statuses,
        vec![OrderStatus::Opened, OrderStatus::Acknowledged, OrderStatus::Backorder]
    );

    let rebuilt = OrderStatusProjection::new();
    w.service.replay_orders(w.tenant, &rebuilt).unwrap();
    assert_eq!(rebuilt.get(w.tenant, order_id), Some(view));
}
