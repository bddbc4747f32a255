//! First-fit box divider.
//!
//! Items are placed bulkiest first (largest `sku_quantity`). Each placement
//! goes into the first open box that still fits one alias-unit, otherwise a
//! new box of the largest size is opened. A box never holds a fraction of an
//! alias-unit. When everything is placed, under-filled boxes are moved to a
//! smaller size that is at least half full.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use orderflow_core::{
    BoxId, Dimensions, KG_TO_LB, OrderItemId, WEIGHT_PRECISION, Weight, round_half_up,
};

use crate::catalog::BoxDefinition;

/// One order line to be packed.
#[derive(Debug, Clone, PartialEq)]
pub struct DivideItem {
    pub order_item_id: OrderItemId,
    /// Product units per alias-unit.
    pub sku_quantity: u32,
    /// Outstanding alias-units.
    pub quantity: u32,
    /// Weight of one product unit.
    pub unit_weight: Weight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedItem {
    pub order_item_id: OrderItemId,
    /// Alias-units in this box.
    pub quantity: u32,
    /// Product units in this box (`quantity × sku_quantity`).
    pub units: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxAssignment {
    pub box_id: BoxId,
    pub max_quantity: u32,
    pub dimensions: Dimensions,
    /// Total weight in pounds.
    pub weight: Weight,
    pub contents: Vec<PlacedItem>,
}

impl BoxAssignment {
    /// Product units packed in this box.
    pub fn fill(&self) -> u64 {
        self.contents.iter().map(|c| c.units).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DividerSettings {
    pub kg_to_lb: f64,
    pub weight_precision: u32,
}

impl Default for DividerSettings {
    fn default() -> Self {
        Self {
            kg_to_lb: KG_TO_LB,
            weight_precision: WEIGHT_PRECISION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DivideError {
    #[error("no candidate boxes to divide into")]
    NoCandidateBoxes,

    /// Some box of the rule cannot hold a single alias-unit of the bulkiest item.
    #[error(
        "package rule incompatible: item {order_item_id} needs {sku_quantity} units per piece \
         but box {box_id} holds {max_quantity}"
    )]
    IncompatiblePackageRule {
        order_item_id: OrderItemId,
        sku_quantity: u32,
        box_id: BoxId,
        max_quantity: u32,
    },
}

#[derive(Debug)]
struct OpenBox {
    remaining: u64,
    contents: Vec<PlacedItem>,
}

/// Divide `items` into boxes chosen from `boxes`.
///
/// Every item's `quantity` is distributed exactly: summing `PlacedItem::quantity`
/// over the result gives back the input quantity per item. Nothing is
/// returned on error.
pub fn divide(
    items: &[DivideItem],
    boxes: &[BoxDefinition],
    settings: &DividerSettings,
) -> Result<Vec<BoxAssignment>, DivideError> {
    let mut sizes: Vec<&BoxDefinition> = boxes.iter().collect();
    // Ascending by capacity; ties keep catalog order.
    sizes.sort_by_key(|b| b.max_quantity);
    let (Some(smallest), Some(largest)) = (sizes.first().copied(), sizes.last().copied()) else {
        return Err(DivideError::NoCandidateBoxes);
    };
    // Among equal largest capacities, the first listed wins.
    let largest = sizes
        .iter()
        .copied()
        .find(|b| b.max_quantity == largest.max_quantity)
        .unwrap_or(largest);

    let mut queue: Vec<&DivideItem> = items
        .iter()
        .filter(|i| i.quantity > 0 && i.sku_quantity > 0)
        .collect();
    queue.sort_by(|a, b| b.sku_quantity.cmp(&a.sku_quantity));

    if let Some(bulkiest) = queue.first() {
        if smallest.max_quantity < bulkiest.sku_quantity {
            return Err(DivideError::IncompatiblePackageRule {
                order_item_id: bulkiest.order_item_id,
                sku_quantity: bulkiest.sku_quantity,
                box_id: smallest.id,
                max_quantity: smallest.max_quantity,
            });
        }
    }

    let mut queue: VecDeque<(&DivideItem, u32)> = queue.into_iter().map(|i| (i, i.quantity)).collect();
    let mut open: Vec<OpenBox> = Vec::new();
    let capacity = u64::from(largest.max_quantity);

    while let Some((item, outstanding)) = queue.front_mut() {
        let sku = u64::from(item.sku_quantity);
        let slot = match open.iter().position(|b| b.remaining >= sku) {
            Some(pos) => pos,
            None => {
                open.push(OpenBox {
                    remaining: capacity,
                    contents: Vec::new(),
                });
                open.len() - 1
            }
        };
        let target = &mut open[slot];

        let requested = u64::from(*outstanding) * sku;
        let mut placed = target.remaining.min(requested);
        placed -= placed % sku;

        target.remaining -= placed;
        let pieces = (placed / sku) as u32;
        *outstanding -= pieces;
        target.contents.push(PlacedItem {
            order_item_id: item.order_item_id,
            quantity: pieces,
            units: placed,
        });
        debug!(
            order_item_id = %item.order_item_id,
            box_index = slot,
            pieces,
            units = placed,
            "placed item into box"
        );

        if *outstanding == 0 {
            queue.pop_front();
        }
    }

    let weights: Vec<(OrderItemId, Weight)> =
        items.iter().map(|i| (i.order_item_id, i.unit_weight)).collect();

    let plan = open
        .into_iter()
        .map(|b| {
            let fill = capacity - b.remaining;
            let chosen = if b.remaining > 0 {
                refit(&sizes, fill).unwrap_or(largest)
            } else {
                largest
            };
            let weight = box_weight(&b.contents, &weights, settings);
            BoxAssignment {
                box_id: chosen.id,
                max_quantity: chosen.max_quantity,
                dimensions: chosen.dimensions,
                weight,
                contents: b.contents,
            }
        })
        .collect::<Vec<_>>();

    debug!(boxes = plan.len(), "divide finished");
    Ok(plan)
}

/// Smallest size strictly larger than `fill` that is at least half full,
/// else the smallest size that still holds `fill`.
fn refit<'a>(sizes: &[&'a BoxDefinition], fill: u64) -> Option<&'a BoxDefinition> {
    sizes
        .iter()
        .copied()
        .find(|b| {
            let max = u64::from(b.max_quantity);
            max > fill && fill * 2 >= max
        })
        .or_else(|| {
            sizes
                .iter()
                .copied()
                .find(|b| u64::from(b.max_quantity) >= fill)
        })
}

fn box_weight(
    contents: &[PlacedItem],
    weights: &[(OrderItemId, Weight)],
    settings: &DividerSettings,
) -> Weight {
    let pounds: f64 = contents
        .iter()
        .filter_map(|c| {
            weights
                .iter()
                .find(|(id, _)| *id == c.order_item_id)
                .map(|(_, w)| w.pounds_raw(settings.kg_to_lb) * c.units as f64)
        })
        .sum();
    Weight::pounds(round_half_up(pounds, settings.weight_precision))
}
