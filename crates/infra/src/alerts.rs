//! Stock alert port (low-stock and dead-stock signals).
//!
//! The core emits signals; delivering them (email, push, chat) is the
//! notification collaborator's job. Delivery failures never roll back the
//! movement that triggered them.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use stockledger_core::TenantId;
use stockledger_inventory::ProductId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StockAlert {
    /// On-hand dropped to or below the product's minimum threshold.
    LowStock {
        product_id: ProductId,
        on_hand_qty: i64,
        min_stock_threshold: i64,
        /// Movement that crossed the threshold; `None` for sweep findings.
        movement_id: Option<u64>,
    },
    /// Positive stock with no outbound movement inside the window.
    DeadStock {
        product_id: ProductId,
        on_hand_qty: i64,
        last_outbound_at: Option<DateTime<Utc>>,
        window_days: u32,
    },
}

impl StockAlert {
    pub fn product_id(&self) -> ProductId {
        match self {
            StockAlert::LowStock { product_id, .. } | StockAlert::DeadStock { product_id, .. } => *product_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert delivery failed: {0}")]
    Delivery(String),
}

/// Consumer of stock signals (fire-and-forget from the caller's view).
pub trait StockAlertSink: Send + Sync {
    fn emit(&self, tenant_id: TenantId, alert: StockAlert) -> Result<(), AlertError>;
}

impl<S> StockAlertSink for std::sync::Arc<S>
where
    S: StockAlertSink + ?Sized,
{
    fn emit(&self, tenant_id: TenantId, alert: StockAlert) -> Result<(), AlertError> {
        (**self).emit(tenant_id, alert)
    }
}

/// Sink that only writes a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl StockAlertSink for TracingAlertSink {
    fn emit(&self, tenant_id: TenantId, alert: StockAlert) -> Result<(), AlertError> {
        info!(tenant = %tenant_id, product = %alert.product_id(), alert = ?alert, "stock alert");
        Ok(())
    }
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAlertSink {
    inner: Mutex<Vec<(TenantId, StockAlert)>>,
}

impl InMemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<(TenantId, StockAlert)> {
        self.inner.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl StockAlertSink for InMemoryAlertSink {
    fn emit(&self, tenant_id: TenantId, alert: StockAlert) -> Result<(), AlertError> {
        self.inner
            .lock()
            .map_err(|_| AlertError::Delivery("sink lock poisoned".to_string()))?
            .push((tenant_id, alert));
        Ok(())
    }
}
