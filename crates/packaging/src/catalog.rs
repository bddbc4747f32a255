use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use orderflow_core::{BoxId, Dimensions, DomainError, DomainResult, Entity, SeriesId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSeries {
    pub id: SeriesId,
    pub name: String,
}

/// A physical box size. `max_quantity` is counted in product units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxDefinition {
    pub id: BoxId,
    pub name: String,
    pub max_quantity: u32,
    pub dimensions: Dimensions,
}

impl Entity for BoxDefinition {
    type Id = BoxId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Boxes allowed for one product series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageRule {
    pub series_id: SeriesId,
    pub name: String,
    pub boxes: Vec<BoxDefinition>,
}

/// Read-only lookup from series to candidate boxes.
#[derive(Debug, Clone, Default)]
pub struct PackagingCatalog {
    series: HashMap<SeriesId, ProductSeries>,
    rules: HashMap<SeriesId, PackageRule>,
}

impl PackagingCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_series(&mut self, series: ProductSeries) {
        self.series.insert(series.id, series);
    }

    pub fn series(&self, id: SeriesId) -> Option<&ProductSeries> {
        self.series.get(&id)
    }

    /// Register the rule for a series. One rule per series; box capacities must be positive.
    pub fn add_rule(&mut self, rule: PackageRule) -> DomainResult<()> {
        if self.rules.contains_key(&rule.series_id) {
            return Err(DomainError::conflict(format!(
                "series {} already has a package rule",
                rule.series_id
            )));
        }
        if let Some(b) = rule.boxes.iter().find(|b| b.max_quantity == 0) {
            return Err(DomainError::validation(format!(
                "box {} has zero capacity",
                b.id
            )));
        }
        self.rules.insert(rule.series_id, rule);
        Ok(())
    }

    pub fn rule_for(&self, series_id: SeriesId) -> Option<&PackageRule> {
        self.rules.get(&series_id)
    }

    /// Candidate boxes for a series; empty when there is no rule or it lists no boxes.
    pub fn candidates(&self, series_id: SeriesId) -> &[BoxDefinition] {
        self.rules
            .get(&series_id)
            .map(|r| r.boxes.as_slice())
            .unwrap_or(&[])
    }

    pub fn find_box(&self, box_id: BoxId) -> Option<&BoxDefinition> {
        self.rules
            .values()
            .flat_map(|r| r.boxes.iter())
            .find(|b| b.id == box_id)
    }
}
