//! Tenant-scoped master data: product aliases and packaging rules.
//!
//! Both change rarely and are read on every reservation and division, so
//! they live behind `RwLock`s and readers get clones.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use orderflow_core::{BoxId, DomainError, RetailerId, SeriesId, TenantId};
use orderflow_inventory::ProductAlias;
use orderflow_packaging::{BoxDefinition, PackageRule, PackagingCatalog, ProductSeries};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("catalog lock poisoned")]
    Poisoned,
}

type AliasKey = (TenantId, RetailerId, String);

#[derive(Debug, Default)]
pub struct CatalogStore {
    aliases: RwLock<HashMap<AliasKey, ProductAlias>>,
    packaging: RwLock<HashMap<TenantId, PackagingCatalog>>,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// One alias per `(retailer, merchant_sku)` within a tenant.
    pub fn register_alias(&self, tenant_id: TenantId, alias: ProductAlias) -> Result<(), CatalogError> {
        let mut aliases = self.aliases.write().map_err(|_| CatalogError::Poisoned)?;
        let key = (tenant_id, alias.retailer_id, alias.merchant_sku.clone());
        if aliases.contains_key(&key) {
            return Err(DomainError::conflict(format!(
                "alias for merchant sku '{}' already exists for retailer {}",
                alias.merchant_sku, alias.retailer_id
            ))
            .into());
        }
        aliases.insert(key, alias);
        Ok(())
    }

    pub fn alias(
        &self,
        tenant_id: TenantId,
        retailer_id: RetailerId,
        merchant_sku: &str,
    ) -> Result<Option<ProductAlias>, CatalogError> {
        let aliases = self.aliases.read().map_err(|_| CatalogError::Poisoned)?;
        Ok(aliases
            .get(&(tenant_id, retailer_id, merchant_sku.to_string()))
            .cloned())
    }

    pub fn add_series(&self, tenant_id: TenantId, series: ProductSeries) -> Result<(), CatalogError> {
        let mut packaging = self.packaging.write().map_err(|_| CatalogError::Poisoned)?;
        packaging.entry(tenant_id).or_default().add_series(series);
        Ok(())
    }

    pub fn add_rule(&self, tenant_id: TenantId, rule: PackageRule) -> Result<(), CatalogError> {
        let mut packaging = self.packaging.write().map_err(|_| CatalogError::Poisoned)?;
        packaging.entry(tenant_id).or_default().add_rule(rule)?;
        Ok(())
    }

    /// Snapshot of a tenant's packaging catalog, empty when nothing is configured.
    pub fn packaging(&self, tenant_id: TenantId) -> Result<PackagingCatalog, CatalogError> {
        let packaging = self.packaging.read().map_err(|_| CatalogError::Poisoned)?;
        Ok(packaging.get(&tenant_id).cloned().unwrap_or_default())
    }

    pub fn candidates(&self, tenant_id: TenantId, series_id: SeriesId) -> Result<Vec<BoxDefinition>, CatalogError> {
        let packaging = self.packaging.read().map_err(|_| CatalogError::Poisoned)?;
        Ok(packaging
            .get(&tenant_id)
            .map(|c| c.candidates(series_id).to_vec())
            .unwrap_or_default())
    }

    pub fn find_box(&self, tenant_id: TenantId, box_id: BoxId) -> Result<Option<BoxDefinition>, CatalogError> {
        let packaging = self.packaging.read().map_err(|_| CatalogError::Poisoned)?;
        Ok(packaging
            .get(&tenant_id)
            .and_then(|c| c.find_box(box_id))
            .cloned())
    }
}
