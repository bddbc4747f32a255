use serde::{Deserialize, Serialize};

use orderflow_core::{AliasId, DomainError, DomainResult, Entity, RetailerId};

use crate::product::ProductId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Availability {
    Available,
    Unavailable,
    Discontinued,
}

/// Retailer-facing name for a product.
///
/// One ordered alias-unit consumes `sku_quantity` product units (a case of 12
/// maps to `sku_quantity = 12`). Unique per `(retailer_id, merchant_sku)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductAlias {
    pub id: AliasId,
    pub retailer_id: RetailerId,
    pub merchant_sku: String,
    pub vendor_sku: Option<String>,
    pub product_id: ProductId,
    pub sku_quantity: u32,
    pub availability: Availability,
}

impl ProductAlias {
    pub fn new(
        retailer_id: RetailerId,
        merchant_sku: impl Into<String>,
        product_id: ProductId,
        sku_quantity: u32,
    ) -> DomainResult<Self> {
        let merchant_sku = merchant_sku.into();
        if merchant_sku.trim().is_empty() {
            return Err(DomainError::validation("merchant_sku cannot be empty"));
        }
        if sku_quantity == 0 {
            return Err(DomainError::validation("sku_quantity must be at least 1"));
        }
        Ok(Self {
            id: AliasId::new(),
            retailer_id,
            merchant_sku,
            vendor_sku: None,
            product_id,
            sku_quantity,
            availability: Availability::Available,
        })
    }

    pub fn with_vendor_sku(mut self, vendor_sku: impl Into<String>) -> Self {
        self.vendor_sku = Some(vendor_sku.into());
        self
    }

    pub fn with_availability(mut self, availability: Availability) -> Self {
        self.availability = availability;
        self
    }

    /// Lookup key used by the catalog.
    pub fn key(&self) -> (RetailerId, String) {
        (self.retailer_id, self.merchant_sku.clone())
    }
}

impl Entity for ProductAlias {
    type Id = AliasId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
