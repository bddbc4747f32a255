//! Packages and their item allocations.
//!
//! One `Mutex` guards both tables, so every mutation below (divide, reset,
//! manual add/update/delete, shipment attach) is a single critical section:
//! readers never observe half a plan, and two manual adds for the same item
//! cannot both pass the remaining-quantity check.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use orderflow_core::{
    BoxId, Dimensions, Entity, ItemPackageId, OrderItemId, OrderPackageId, SeriesId, ShipmentId,
    Weight, round_half_up,
};
use orderflow_orders::{OrderStatus, PurchaseOrderId};
use orderflow_packaging::{
    BoxAssignment, BoxDefinition, DivideError, DivideItem, DividerSettings, PackagingCatalog, divide,
};

#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("no order items found for order {order_id}")]
    NoOrderItems { order_id: PurchaseOrderId },

    #[error("no product series found for order {order_id}")]
    NoProductSeries { order_id: PurchaseOrderId },

    #[error("no package rule found for series {series_id}")]
    NoPackageRule { series_id: SeriesId },

    #[error("package rule for series {series_id} does not fit the order: {source}")]
    IncompatiblePackageRule {
        series_id: SeriesId,
        #[source]
        source: DivideError,
    },

    #[error("quantity {requested} exceeds remaining quantity {remain}")]
    OverQuantity { requested: u32, remain: u32 },

    #[error("package {package_id} is already shipped")]
    PackageAlreadyShipped { package_id: OrderPackageId },

    #[error("order in status '{status}' cannot be packaged")]
    PackagingLocked { status: OrderStatus },

    #[error("order {order_id} has no packages to ship")]
    NothingToShip { order_id: PurchaseOrderId },

    #[error("item package {0} not found")]
    ItemPackageNotFound(ItemPackageId),

    #[error("package {0} not found")]
    PackageNotFound(OrderPackageId),

    #[error("box {0} not found")]
    BoxNotFound(BoxId),

    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("package store lock poisoned")]
    Poisoned,
}

impl PackagingError {
    /// 400 for requests that cannot be honoured as sent, 500 for broken
    /// configuration or stored data.
    pub fn status_code(&self) -> u16 {
        match self {
            PackagingError::IncompatiblePackageRule { .. }
            | PackagingError::DataIntegrity(_)
            | PackagingError::Poisoned => 500,
            _ => 400,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageSource {
    Divided,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPackage {
    pub id: OrderPackageId,
    pub order_id: PurchaseOrderId,
    pub box_id: BoxId,
    pub box_max_quantity: u32,
    pub dimensions: Dimensions,
    /// Always in pounds.
    pub weight: Weight,
    pub shipment_id: Option<ShipmentId>,
    pub source: PackageSource,
    pub created_at: DateTime<Utc>,
}

impl OrderPackage {
    pub fn is_shipped(&self) -> bool {
        self.shipment_id.is_some()
    }
}

impl Entity for OrderPackage {
    type Id = OrderPackageId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// `quantity` alias-units of one order item inside one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemPackage {
    pub id: ItemPackageId,
    pub order_id: PurchaseOrderId,
    pub package_id: OrderPackageId,
    pub order_item_id: OrderItemId,
    pub quantity: u32,
}

impl Entity for OrderItemPackage {
    type Id = ItemPackageId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Entry of a divide response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSummary {
    pub order_package_id: OrderPackageId,
    pub box_max_quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageView {
    pub package: OrderPackage,
    pub items: Vec<OrderItemPackage>,
}

/// What packing needs to know about the product behind an order item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemProfile {
    pub series_id: SeriesId,
    pub sku_quantity: u32,
    pub unit_weight: Weight,
}

/// An order item as the package store sees it. `profile` is `None` when
/// the item's SKU does not resolve to a product yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PackableLine {
    pub order_item_id: OrderItemId,
    pub qty_ordered: u32,
    pub profile: Option<ItemProfile>,
}

#[derive(Debug, Default)]
struct Tables {
    packages: Vec<OrderPackage>,
    item_packages: Vec<OrderItemPackage>,
}

impl Tables {
    fn order_packages(&self, order_id: PurchaseOrderId) -> impl Iterator<Item = &OrderPackage> {
        self.packages.iter().filter(move |p| p.order_id == order_id)
    }

    fn package_mut(&mut self, package_id: OrderPackageId) -> Result<&mut OrderPackage, PackagingError> {
        self.packages
            .iter_mut()
            .find(|p| p.id == package_id)
            .ok_or(PackagingError::PackageNotFound(package_id))
    }

    fn packed(&self, order_item_id: OrderItemId) -> u32 {
        self.item_packages
            .iter()
            .filter(|ip| ip.order_item_id == order_item_id)
            .map(|ip| ip.quantity)
            .sum()
    }

    /// `qty_ordered − packed`; packed beyond ordered means the tables are corrupt.
    fn remaining(&self, line: &PackableLine) -> Result<u32, PackagingError> {
        let packed = self.packed(line.order_item_id);
        line.qty_ordered.checked_sub(packed).ok_or_else(|| {
            PackagingError::DataIntegrity(format!(
                "item {} has {packed} packed but only {} ordered",
                line.order_item_id, line.qty_ordered
            ))
        })
    }

    fn view(&self, package: &OrderPackage) -> PackageView {
        PackageView {
            package: package.clone(),
            items: self
                .item_packages
                .iter()
                .filter(|ip| ip.package_id == package.id)
                .cloned()
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
pub struct PackageStore {
    tables: Mutex<Tables>,
    settings: DividerSettings,
}

impl PackageStore {
    pub fn new(settings: DividerSettings) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            settings,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>, PackagingError> {
        self.tables.lock().map_err(|_| PackagingError::Poisoned)
    }

    /// Divide an order into boxes and store the result.
    ///
    /// Without `reset`, an order that already has packages gets them back
    /// unchanged. With `reset`, the old packages are replaced in the same
    /// critical section, and only after the new plan has been computed, so a
    /// failing division leaves the previous packages in place.
    pub fn plan_and_persist(
        &self,
        order_id: PurchaseOrderId,
        lines: &[PackableLine],
        reset: bool,
        catalog: &PackagingCatalog,
    ) -> Result<Vec<PackageSummary>, PackagingError> {
        let mut tables = self.lock()?;

        if !reset {
            let existing: Vec<PackageSummary> = tables.order_packages(order_id).map(summary).collect();
            if !existing.is_empty() {
                debug!(%order_id, packages = existing.len(), "returning existing packages");
                return Ok(existing);
            }
        }

        let plan = self.plan(order_id, lines, catalog)?;

        if reset {
            if let Some(shipped) = tables.order_packages(order_id).find(|p| p.is_shipped()) {
                return Err(PackagingError::PackageAlreadyShipped {
                    package_id: shipped.id,
                });
            }
            tables.packages.retain(|p| p.order_id != order_id);
            tables.item_packages.retain(|ip| ip.order_id != order_id);
        }

        let now = Utc::now();
        let mut out = Vec::with_capacity(plan.len());
        for assignment in plan {
            let package = OrderPackage {
                id: OrderPackageId::new(),
                order_id,
                box_id: assignment.box_id,
                box_max_quantity: assignment.max_quantity,
                dimensions: assignment.dimensions,
                weight: assignment.weight,
                shipment_id: None,
                source: PackageSource::Divided,
                created_at: now,
            };
            for placed in &assignment.contents {
                tables.item_packages.push(OrderItemPackage {
                    id: ItemPackageId::new(),
                    order_id,
                    package_id: package.id,
                    order_item_id: placed.order_item_id,
                    quantity: placed.quantity,
                });
            }
            out.push(summary(&package));
            tables.packages.push(package);
        }

        info!(%order_id, packages = out.len(), reset, "order divided");
        Ok(out)
    }

    fn plan(
        &self,
        order_id: PurchaseOrderId,
        lines: &[PackableLine],
        catalog: &PackagingCatalog,
    ) -> Result<Vec<BoxAssignment>, PackagingError> {
        if lines.is_empty() {
            return Err(PackagingError::NoOrderItems { order_id });
        }

        let mut by_series: BTreeMap<SeriesId, Vec<DivideItem>> = BTreeMap::new();
        for line in lines {
            let profile = line.profile.ok_or(PackagingError::NoProductSeries { order_id })?;
            by_series.entry(profile.series_id).or_default().push(DivideItem {
                order_item_id: line.order_item_id,
                sku_quantity: profile.sku_quantity,
                quantity: line.qty_ordered,
                unit_weight: profile.unit_weight,
            });
        }

        let mut plan = Vec::new();
        for (series_id, items) in by_series {
            let boxes = catalog.candidates(series_id);
            if boxes.is_empty() {
                return Err(PackagingError::NoPackageRule { series_id });
            }
            match divide(&items, boxes, &self.settings) {
                Ok(assignments) => plan.extend(assignments),
                Err(DivideError::NoCandidateBoxes) => return Err(PackagingError::NoPackageRule { series_id }),
                Err(source) => return Err(PackagingError::IncompatiblePackageRule { series_id, source }),
            }
        }
        Ok(plan)
    }

    /// Put `quantity` alias-units of one item into a new package of `box_def`.
    pub fn add_manual(
        &self,
        order_id: PurchaseOrderId,
        line: &PackableLine,
        box_def: &BoxDefinition,
        quantity: u32,
    ) -> Result<PackageView, PackagingError> {
        let mut tables = self.lock()?;
        let remain = tables.remaining(line)?;
        if quantity == 0 || quantity > remain {
            return Err(PackagingError::OverQuantity {
                requested: quantity,
                remain,
            });
        }

        let package = OrderPackage {
            id: OrderPackageId::new(),
            order_id,
            box_id: box_def.id,
            box_max_quantity: box_def.max_quantity,
            dimensions: box_def.dimensions,
            weight: Weight::pounds(self.line_pounds(line, quantity)),
            shipment_id: None,
            source: PackageSource::Manual,
            created_at: Utc::now(),
        };
        let item_package = OrderItemPackage {
            id: ItemPackageId::new(),
            order_id,
            package_id: package.id,
            order_item_id: line.order_item_id,
            quantity,
        };
        info!(%order_id, order_item_id = %line.order_item_id, quantity, "manual package added");

        tables.packages.push(package.clone());
        tables.item_packages.push(item_package.clone());
        Ok(PackageView {
            package,
            items: vec![item_package],
        })
    }

    /// Change the quantity of an allocation. Decreases are always accepted;
    /// increases must fit in what the other allocations leave of the order.
    pub fn update_manual(
        &self,
        item_package_id: ItemPackageId,
        line: &PackableLine,
        new_quantity: u32,
    ) -> Result<OrderItemPackage, PackagingError> {
        let mut tables = self.lock()?;
        let current = find_item_package(&tables, item_package_id)?;
        ensure_unshipped(&tables, current.package_id)?;

        if new_quantity == 0 {
            return Err(PackagingError::OverQuantity {
                requested: 0,
                remain: tables.remaining(line)?,
            });
        }
        if new_quantity > current.quantity {
            let others = tables.packed(line.order_item_id) - current.quantity;
            let remain = line.qty_ordered.checked_sub(others).ok_or_else(|| {
                PackagingError::DataIntegrity(format!(
                    "item {} has {others} packed elsewhere but only {} ordered",
                    line.order_item_id, line.qty_ordered
                ))
            })?;
            if new_quantity > remain {
                return Err(PackagingError::OverQuantity {
                    requested: new_quantity,
                    remain,
                });
            }
        }

        let grown = self.line_pounds(line, new_quantity.abs_diff(current.quantity));
        let delta = if new_quantity >= current.quantity { grown } else { -grown };
        let places = self.settings.weight_precision;
        let factor = self.settings.kg_to_lb;
        let package = tables.package_mut(current.package_id)?;
        package.weight = Weight::pounds(round_half_up((package.weight.pounds_raw(factor) + delta).max(0.0), places));

        let updated = OrderItemPackage {
            quantity: new_quantity,
            ..current
        };
        if let Some(slot) = tables.item_packages.iter_mut().find(|ip| ip.id == item_package_id) {
            *slot = updated.clone();
        }
        debug!(%item_package_id, new_quantity, "allocation updated");
        Ok(updated)
    }

    /// Remove one allocation. The package stays; its weight drops to zero
    /// when this was its only allocation, otherwise by the allocation's share.
    pub fn delete_manual(&self, item_package_id: ItemPackageId, line: &PackableLine) -> Result<(), PackagingError> {
        let mut tables = self.lock()?;
        let target = find_item_package(&tables, item_package_id)?;
        ensure_unshipped(&tables, target.package_id)?;

        let siblings = tables
            .item_packages
            .iter()
            .filter(|ip| ip.package_id == target.package_id)
            .count();
        let share = self.line_pounds(line, target.quantity);
        let (factor, places) = (self.settings.kg_to_lb, self.settings.weight_precision);
        let package = tables.package_mut(target.package_id)?;
        package.weight = if siblings == 1 {
            Weight::zero()
        } else {
            Weight::pounds(round_half_up((package.weight.pounds_raw(factor) - share).max(0.0), places))
        };

        tables.item_packages.retain(|ip| ip.id != item_package_id);
        info!(%item_package_id, order_item_id = %target.order_item_id, "allocation deleted");
        Ok(())
    }

    /// Stamp `shipment_id` on the given packages, or on every unshipped
    /// package of the order when `package_ids` is empty.
    pub fn attach_shipment(
        &self,
        order_id: PurchaseOrderId,
        shipment_id: ShipmentId,
        package_ids: &[OrderPackageId],
    ) -> Result<Vec<OrderPackageId>, PackagingError> {
        let mut tables = self.lock()?;
        let targets: Vec<OrderPackageId> = if package_ids.is_empty() {
            tables
                .order_packages(order_id)
                .filter(|p| !p.is_shipped())
                .map(|p| p.id)
                .collect()
        } else {
            for id in package_ids {
                let package = tables
                    .order_packages(order_id)
                    .find(|p| p.id == *id)
                    .ok_or(PackagingError::PackageNotFound(*id))?;
                if package.is_shipped() {
                    return Err(PackagingError::PackageAlreadyShipped { package_id: *id });
                }
            }
            package_ids.to_vec()
        };
        if targets.is_empty() {
            return Err(PackagingError::NothingToShip { order_id });
        }

        for package in tables.packages.iter_mut().filter(|p| targets.contains(&p.id)) {
            package.shipment_id = Some(shipment_id);
        }
        Ok(targets)
    }

    /// Undo [`attach_shipment`](Self::attach_shipment).
    pub fn detach_shipment(&self, shipment_id: ShipmentId) -> Result<(), PackagingError> {
        let mut tables = self.lock()?;
        for package in tables
            .packages
            .iter_mut()
            .filter(|p| p.shipment_id == Some(shipment_id))
        {
            package.shipment_id = None;
        }
        Ok(())
    }

    pub fn packages_for_order(&self, order_id: PurchaseOrderId) -> Result<Vec<PackageView>, PackagingError> {
        let tables = self.lock()?;
        Ok(tables.order_packages(order_id).map(|p| tables.view(p)).collect())
    }

    pub fn item_package(&self, item_package_id: ItemPackageId) -> Result<OrderItemPackage, PackagingError> {
        let tables = self.lock()?;
        find_item_package(&tables, item_package_id)
    }

    /// Alias-units of an item currently allocated to packages.
    pub fn packed_quantity(&self, order_item_id: OrderItemId) -> Result<u32, PackagingError> {
        Ok(self.lock()?.packed(order_item_id))
    }

    /// Unrounded pounds of `quantity` alias-units of the line's product.
    fn line_pounds(&self, line: &PackableLine, quantity: u32) -> f64 {
        line.profile.map_or(0.0, |p| {
            p.unit_weight.pounds_raw(self.settings.kg_to_lb) * f64::from(quantity) * f64::from(p.sku_quantity)
        })
    }
}

fn summary(package: &OrderPackage) -> PackageSummary {
    PackageSummary {
        order_package_id: package.id,
        box_max_quantity: package.box_max_quantity,
    }
}

fn find_item_package(tables: &Tables, id: ItemPackageId) -> Result<OrderItemPackage, PackagingError> {
    tables
        .item_packages
        .iter()
        .find(|ip| ip.id == id)
        .cloned()
        .ok_or(PackagingError::ItemPackageNotFound(id))
}

fn ensure_unshipped(tables: &Tables, package_id: OrderPackageId) -> Result<(), PackagingError> {
    let package = tables
        .packages
        .iter()
        .find(|p| p.id == package_id)
        .ok_or(PackagingError::PackageNotFound(package_id))?;
    if package.is_shipped() {
        return Err(PackagingError::PackageAlreadyShipped { package_id });
    }
    Ok(())
}
