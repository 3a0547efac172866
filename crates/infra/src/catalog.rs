//! Product catalog port.
//!
//! Product identity and the per-product minimum stock threshold belong to an
//! external catalog. The ledger only reads them, for low-stock checks and
//! analytics.

use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, TenantId};
use stockledger_inventory::ProductId;

use crate::read_model::{InMemoryTenantStore, TenantStore};

/// Catalog entry as seen by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub product_id: ProductId,
    pub tenant_id: TenantId,
    pub min_stock_threshold: i64,
}

/// Read-only view of the external product catalog.
pub trait ProductCatalog: Send + Sync {
    fn get_product(&self, tenant_id: TenantId, product_id: ProductId) -> Option<CatalogProduct>;

    fn list_products(&self, tenant_id: TenantId) -> Vec<CatalogProduct>;
}

impl<C> ProductCatalog for std::sync::Arc<C>
where
    C: ProductCatalog + ?Sized,
{
    fn get_product(&self, tenant_id: TenantId, product_id: ProductId) -> Option<CatalogProduct> {
        (**self).get_product(tenant_id, product_id)
    }

    fn list_products(&self, tenant_id: TenantId) -> Vec<CatalogProduct> {
        (**self).list_products(tenant_id)
    }
}

/// In-memory catalog for tests and the dev server.
#[derive(Debug, Default)]
pub struct InMemoryProductCatalog {
    products: InMemoryTenantStore<ProductId, CatalogProduct>,
}

impl InMemoryProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a product's threshold.
    pub fn upsert(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        min_stock_threshold: i64,
    ) -> Result<CatalogProduct, DomainError> {
        if min_stock_threshold < 0 {
            return Err(DomainError::validation("min_stock_threshold cannot be negative"));
        }

        let product = CatalogProduct {
            product_id,
            tenant_id,
            min_stock_threshold,
        };
        self.products.upsert(tenant_id, product_id, product.clone());
        Ok(product)
    }
}

impl ProductCatalog for InMemoryProductCatalog {
    fn get_product(&self, tenant_id: TenantId, product_id: ProductId) -> Option<CatalogProduct> {
        self.products.get(tenant_id, &product_id)
    }

    fn list_products(&self, tenant_id: TenantId) -> Vec<CatalogProduct> {
        self.products.list(tenant_id)
    }
}
