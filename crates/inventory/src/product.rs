use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderflow_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, OrderItemId, SeriesId, TenantId, Weight,
};
use orderflow_events::Event;

/// Product identifier (one event stream per product).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: Product.
///
/// Counters are plain signed integers. A negative `qty_on_hand` means the
/// product is oversold; that is a valid state, not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    id: ProductId,
    tenant_id: Option<TenantId>,
    sku: String,
    series_id: Option<SeriesId>,
    weight: Weight,
    qty_on_hand: i64,
    qty_pending: i64,
    version: u64,
    created: bool,
}

impl Product {
    /// Not-yet-registered instance used for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            tenant_id: None,
            sku: String::new(),
            series_id: None,
            weight: Weight::zero(),
            qty_on_hand: 0,
            qty_pending: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn series_id(&self) -> Option<SeriesId> {
        self.series_id
    }

    /// Weight of a single product unit, in the unit it was registered with.
    pub fn weight(&self) -> Weight {
        self.weight
    }

    pub fn qty_on_hand(&self) -> i64 {
        self.qty_on_hand
    }

    pub fn qty_pending(&self) -> i64 {
        self.qty_pending
    }

    pub fn is_registered(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterProduct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sku: String,
    pub series_id: SeriesId,
    pub weight: Weight,
    pub qty_on_hand: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReserveStock. Moves `units` from on-hand to pending for one order item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub order_item_id: OrderItemId,
    pub units: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseStock. Puts returned units back on hand.
///
/// With `release_pending` the same amount leaves `qty_pending`, mirroring the
/// reservation; without it only `qty_on_hand` moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseStock {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub order_item_id: OrderItemId,
    pub units: i64,
    pub release_pending: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustStock (receiving, cycle counts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub delta: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProductCommand {
    RegisterProduct(RegisterProduct),
    ReserveStock(ReserveStock),
    ReleaseStock(ReleaseStock),
    AdjustStock(AdjustStock),
}

/// Event: ProductRegistered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRegistered {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sku: String,
    pub series_id: SeriesId,
    pub weight: Weight,
    pub qty_on_hand: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReserved. Carries both deltas so replay never re-derives them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub order_item_id: OrderItemId,
    pub on_hand_delta: i64,
    pub pending_delta: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReleased {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub order_item_id: OrderItemId,
    pub on_hand_delta: i64,
    pub pending_delta: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjusted {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub delta: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductRegistered(ProductRegistered),
    StockReserved(StockReserved),
    StockReleased(StockReleased),
    StockAdjusted(StockAdjusted),
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductRegistered(_) => "inventory.product.registered",
            ProductEvent::StockReserved(_) => "inventory.product.stock_reserved",
            ProductEvent::StockReleased(_) => "inventory.product.stock_released",
            ProductEvent::StockAdjusted(_) => "inventory.product.stock_adjusted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductRegistered(e) => e.occurred_at,
            ProductEvent::StockReserved(e) => e.occurred_at,
            ProductEvent::StockReleased(e) => e.occurred_at,
            ProductEvent::StockAdjusted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductRegistered(e) => {
                self.id = e.product_id;
                self.tenant_id = Some(e.tenant_id);
                self.sku = e.sku.clone();
                self.series_id = Some(e.series_id);
                self.weight = e.weight;
                self.qty_on_hand = e.qty_on_hand;
                self.qty_pending = 0;
                self.created = true;
            }
            ProductEvent::StockReserved(e) => {
                self.qty_on_hand += e.on_hand_delta;
                self.qty_pending += e.pending_delta;
            }
            ProductEvent::StockReleased(e) => {
                self.qty_on_hand += e.on_hand_delta;
                self.qty_pending += e.pending_delta;
            }
            ProductEvent::StockAdjusted(e) => {
                self.qty_on_hand += e.delta;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::RegisterProduct(cmd) => self.handle_register(cmd),
            ProductCommand::ReserveStock(cmd) => self.handle_reserve(cmd),
            ProductCommand::ReleaseStock(cmd) => self.handle_release(cmd),
            ProductCommand::AdjustStock(cmd) => self.handle_adjust(cmd),
        }
    }
}

impl Product {
    fn ensure_target(&self, tenant_id: TenantId, product_id: ProductId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already registered"));
        }
        if cmd.sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if cmd.weight.value < 0.0 {
            return Err(DomainError::validation("weight cannot be negative"));
        }
        Ok(vec![ProductEvent::ProductRegistered(ProductRegistered {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            sku: cmd.sku.clone(),
            series_id: cmd.series_id,
            weight: cmd.weight,
            qty_on_hand: cmd.qty_on_hand,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &ReserveStock) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.product_id)?;
        if cmd.units < 0 {
            return Err(DomainError::validation("reserved units cannot be negative"));
        }
        // A zero-quantity line reserves nothing; no event, no version bump.
        if cmd.units == 0 {
            return Ok(vec![]);
        }
        Ok(vec![ProductEvent::StockReserved(StockReserved {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            order_item_id: cmd.order_item_id,
            on_hand_delta: -cmd.units,
            pending_delta: cmd.units,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseStock) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.product_id)?;
        if cmd.units <= 0 {
            return Err(DomainError::validation("released units must be positive"));
        }
        let pending_delta = if cmd.release_pending { -cmd.units } else { 0 };
        Ok(vec![ProductEvent::StockReleased(StockReleased {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            order_item_id: cmd.order_item_id,
            on_hand_delta: cmd.units,
            pending_delta,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust(&self, cmd: &AdjustStock) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.product_id)?;
        if cmd.delta == 0 {
            return Err(DomainError::validation("delta cannot be zero"));
        }
        Ok(vec![ProductEvent::StockAdjusted(StockAdjusted {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            delta: cmd.delta,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderflow_core::WeightUnit;
    use proptest::prelude::*;

    fn registered(tenant_id: TenantId, product_id: ProductId, on_hand: i64) -> Product {
        let mut product = Product::empty(product_id);
        let events = product
            .handle(&ProductCommand::RegisterProduct(RegisterProduct {
                tenant_id,
                product_id,
                sku: "BOLT-M8".to_string(),
                series_id: SeriesId::new(),
                weight: Weight::new(0.5, WeightUnit::Kg),
                qty_on_hand: on_hand,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        product.apply(&events[0]);
        product
    }

    fn reserve(tenant_id: TenantId, product_id: ProductId, units: i64) -> ProductCommand {
        ProductCommand::ReserveStock(ReserveStock {
            tenant_id,
            product_id,
            order_item_id: OrderItemId::new(),
            units,
            occurred_at: Utc::now(),
        })
    }

    fn release(
        tenant_id: TenantId,
        product_id: ProductId,
        units: i64,
        release_pending: bool,
    ) -> ProductCommand {
        ProductCommand::ReleaseStock(ReleaseStock {
            tenant_id,
            product_id,
            order_item_id: OrderItemId::new(),
            units,
            release_pending,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn reservation_moves_units_from_on_hand_to_pending() {
        let tenant_id = TenantId::new();
        let product_id = ProductId::new(AggregateId::new());
        let mut product = registered(tenant_id, product_id, 200);

        let events = product.handle(&reserve(tenant_id, product_id, 125)).unwrap();
        for e in &events {
            product.apply(e);
        }

        assert_eq!(product.qty_on_hand(), 75);
        assert_eq!(product.qty_pending(), 125);
        assert_eq!(product.version(), 2);
    }

    #[test]
    fn overselling_leaves_a_negative_on_hand() {
        let tenant_id = TenantId::new();
        let product_id = ProductId::new(AggregateId::new());
        let mut product = registered(tenant_id, product_id, 10);

        let events = product.handle(&reserve(tenant_id, product_id, 30)).unwrap();
        product.apply(&events[0]);

        assert_eq!(product.qty_on_hand(), -20);
        assert_eq!(product.qty_pending(), 30);
    }

    #[test]
    fn release_without_pending_keeps_pending_untouched() {
        let tenant_id = TenantId::new();
        let product_id = ProductId::new(AggregateId::new());
        let mut product = registered(tenant_id, product_id, 50);

        for cmd in [reserve(tenant_id, product_id, 20), release(tenant_id, product_id, 5, false)] {
            let events = product.handle(&cmd).unwrap();
            product.apply(&events[0]);
        }

        assert_eq!(product.qty_on_hand(), 35);
        assert_eq!(product.qty_pending(), 20);
    }

    #[test]
    fn zero_reservation_emits_nothing() {
        let tenant_id = TenantId::new();
        let product_id = ProductId::new(AggregateId::new());
        let product = registered(tenant_id, product_id, 5);

        assert!(product.handle(&reserve(tenant_id, product_id, 0)).unwrap().is_empty());
    }

    #[test]
    fn unregistered_product_cannot_reserve() {
        let tenant_id = TenantId::new();
        let product_id = ProductId::new(AggregateId::new());
        let product = Product::empty(product_id);

        let err = product.handle(&reserve(tenant_id, product_id, 1)).unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn other_tenant_cannot_touch_counters() {
        let product_id = ProductId::new(AggregateId::new());
        let product = registered(TenantId::new(), product_id, 5);

        let err = product.handle(&reserve(TenantId::new(), product_id, 1)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(msg) if msg.contains("tenant")));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: with symmetric release, reserving and then returning the
        /// same units restores both counters exactly.
        #[test]
        fn symmetric_release_undoes_reservations(
            start in -1_000i64..1_000,
            units in prop::collection::vec(1i64..500, 1..12)
        ) {
            let tenant_id = TenantId::new();
            let product_id = ProductId::new(AggregateId::new());
            let mut product = registered(tenant_id, product_id, start);

            for u in &units {
                for e in product.handle(&reserve(tenant_id, product_id, *u)).unwrap() {
                    product.apply(&e);
                }
            }
            let total: i64 = units.iter().sum();
            prop_assert_eq!(product.qty_on_hand(), start - total);
            prop_assert_eq!(product.qty_pending(), total);

            for u in &units {
                for e in product.handle(&release(tenant_id, product_id, *u, true)).unwrap() {
                    product.apply(&e);
                }
            }
            prop_assert_eq!(product.qty_on_hand(), start);
            prop_assert_eq!(product.qty_pending(), 0);
        }
    }
}
