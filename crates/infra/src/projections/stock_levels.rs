use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use stockledger_core::{AggregateId, TenantId};
use stockledger_events::EventEnvelope;
use stockledger_inventory::{ProductId, STOCK_AGGREGATE_TYPE, StockEvent, StockMovement};

use crate::event_store::{EventStore, EventStoreError};
use crate::read_model::TenantStore;

/// Current-state row per product (the ledger's materialized view).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockLevel {
    pub product_id: ProductId,
    pub on_hand_qty: i64,
    pub avg_unit_cost: Decimal,
    /// Id of the last movement folded into this row.
    pub last_movement_id: u64,
    pub last_movement_at: DateTime<Utc>,
    /// Most recent `OUT` or sale-referenced movement, if any.
    pub last_outbound_at: Option<DateTime<Utc>>,
}

impl StockLevel {
    fn from_movement(movement: &StockMovement) -> Self {
        Self {
            product_id: movement.product_id,
            on_hand_qty: movement.resulting_on_hand_qty,
            avg_unit_cost: movement.avg_unit_cost_after,
            last_movement_id: movement.movement_id,
            last_movement_at: movement.created_at,
            last_outbound_at: movement.is_outbound().then_some(movement.created_at),
        }
    }

    fn fold(&mut self, movement: &StockMovement) {
        self.on_hand_qty = movement.resulting_on_hand_qty;
        self.avg_unit_cost = movement.avg_unit_cost_after;
        self.last_movement_id = movement.movement_id;
        // Movements may be backdated; timestamps only move forward.
        self.last_movement_at = self.last_movement_at.max(movement.created_at);
        if movement.is_outbound() {
            self.last_outbound_at = self.last_outbound_at.max(Some(movement.created_at));
        }
    }
}

#[derive(Debug, Error)]
pub enum StockProjectionError {
    #[error("failed to deserialize stock event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// A sequence number arrived ahead of the cursor; catch up from the store.
    #[error("sequence gap (last={last}, found={found})")]
    SequenceGap { last: u64, found: u64 },

    #[error(transparent)]
    Store(#[from] EventStoreError),
}

type StreamKey = (TenantId, AggregateId);

/// Stock level + movement history projection.
///
/// Consumes committed stock envelopes and maintains two tenant-isolated
/// views: the current [`StockLevel`] per product and the ordered list of
/// movements per product. Idempotent for at-least-once delivery (sequence
/// numbers at or below the cursor are ignored) and rebuildable from the store.
#[derive(Debug)]
pub struct StockLevelsProjection<S>
where
    S: TenantStore<ProductId, StockLevel>,
{
    levels: S,
    history: RwLock<HashMap<StreamKey, Vec<StockMovement>>>,
    cursors: RwLock<HashMap<StreamKey, u64>>,
}

impl<S> StockLevelsProjection<S>
where
    S: TenantStore<ProductId, StockLevel>,
{
    pub fn new(levels: S) -> Self {
        Self {
            levels,
            history: RwLock::new(HashMap::new()),
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, tenant_id: TenantId, product_id: &ProductId) -> Option<StockLevel> {
        self.levels.get(tenant_id, product_id)
    }

    /// All stock rows for a tenant, ordered by product id.
    pub fn list(&self, tenant_id: TenantId) -> Vec<StockLevel> {
        let mut rows = self.levels.list(tenant_id);
        rows.sort_by_key(|r| r.product_id);
        rows
    }

    /// Run `f` over the product's movements (ascending `movement_id`) without cloning them.
    pub fn with_history<R>(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        f: impl FnOnce(&[StockMovement]) -> R,
    ) -> R {
        let history = match self.history.read() {
            Ok(h) => h,
            Err(_) => return f(&[]),
        };
        match history.get(&(tenant_id, product_id.0)) {
            Some(movements) => f(movements),
            None => f(&[]),
        }
    }

    /// Apply a published envelope into the projection.
    ///
    /// Non-stock envelopes are ignored so the projection can sit on a shared bus.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), StockProjectionError> {
        if envelope.aggregate_type() != STOCK_AGGREGATE_TYPE {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        let key = (tenant_id, aggregate_id);

        let mut cursors = match self.cursors.write() {
            Ok(c) => c,
            Err(_) => return Ok(()),
        };
        let last = *cursors.get(&key).unwrap_or(&0);

        if seq <= last {
            // Duplicate or replay; safe to ignore.
            return Ok(());
        }
        if seq != last + 1 {
            return Err(StockProjectionError::SequenceGap { last, found: seq });
        }

        let event: StockEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| StockProjectionError::Deserialize(e.to_string()))?;

        if event.tenant_id() != tenant_id {
            return Err(StockProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if event.product_id().0 != aggregate_id {
            return Err(StockProjectionError::TenantIsolation(
                "event product_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match event {
            StockEvent::MovementRecorded(e) => {
                let movement = e.movement;
                let level = match self.levels.get(tenant_id, &movement.product_id) {
                    Some(mut level) => {
                        level.fold(&movement);
                        level
                    }
                    None => StockLevel::from_movement(&movement),
                };
                self.levels.upsert(tenant_id, movement.product_id, level);

                if let Ok(mut history) = self.history.write() {
                    history.entry(key).or_default().push(movement);
                }
            }
        }

        cursors.insert(key, seq);
        Ok(())
    }

    /// Bring one product's rows up to date with its stream in the store.
    pub fn catch_up<E: EventStore>(
        &self,
        store: &E,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<(), StockProjectionError> {
        for stored in store.load_stream(tenant_id, product_id.0)? {
            self.apply_envelope(&stored.to_envelope())?;
        }
        Ok(())
    }

    /// Drop and rebuild every stock row of the tenant from the store.
    pub fn rebuild<E: EventStore>(&self, store: &E, tenant_id: TenantId) -> Result<usize, StockProjectionError> {
        self.levels.clear_tenant(tenant_id);
        if let Ok(mut history) = self.history.write() {
            history.retain(|(t, _), _| *t != tenant_id);
        }
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.retain(|(t, _), _| *t != tenant_id);
        }

        let mut ids = store.stream_ids(tenant_id, STOCK_AGGREGATE_TYPE)?;
        ids.sort();
        for id in &ids {
            self.catch_up(store, tenant_id, ProductId::new(*id))?;
        }
        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::{InMemoryEventStore, UncommittedEvent};
    use crate::read_model::InMemoryTenantStore;
    use rust_decimal_macros::dec;
    use stockledger_core::{ExpectedVersion, UserId};
    use stockledger_inventory::{MovementRecorded, MovementType, ReferenceType, StockDirection};
    use uuid::Uuid;

    fn projection() -> StockLevelsProjection<InMemoryTenantStore<ProductId, StockLevel>> {
        StockLevelsProjection::new(InMemoryTenantStore::new())
    }

    fn movement_event(tenant_id: TenantId, product_id: ProductId, seq: u64, qty_after: i64, outbound: bool) -> StockEvent {
        StockEvent::MovementRecorded(MovementRecorded {
            tenant_id,
            on_hand_before: 0,
            movement: StockMovement {
                movement_id: seq,
                product_id,
                movement_type: if outbound { MovementType::Out } else { MovementType::In },
                direction: if outbound { StockDirection::Decrease } else { StockDirection::Increase },
                quantity: 1,
                cost_per_unit: (!outbound).then_some(dec!(3)),
                reference_type: if outbound { ReferenceType::Sale } else { ReferenceType::Purchase },
                reference_id: format!("ref-{seq}"),
                resulting_on_hand_qty: qty_after,
                avg_unit_cost_after: dec!(3),
                note: None,
                created_at: Utc::now(),
                created_by: UserId::new(),
            },
        })
    }

    fn append(store: &InMemoryEventStore, tenant_id: TenantId, product_id: ProductId, event: &StockEvent) {
        let version = store.load_stream(tenant_id, product_id.0).unwrap().len() as u64;
        let uncommitted =
            UncommittedEvent::from_typed(tenant_id, product_id.0, STOCK_AGGREGATE_TYPE, Uuid::now_v7(), event).unwrap();
        store.append(vec![uncommitted], ExpectedVersion::Exact(version)).unwrap();
    }

    #[test]
    fn duplicates_are_ignored_and_gaps_reported() {
        let store = InMemoryEventStore::new();
        let projection = projection();
        let tenant_id = TenantId::new();
        let product_id = ProductId::new(AggregateId::new());

        append(&store, tenant_id, product_id, &movement_event(tenant_id, product_id, 1, 1, false));
        append(&store, tenant_id, product_id, &movement_event(tenant_id, product_id, 2, 2, false));
        let stream = store.load_stream(tenant_id, product_id.0).unwrap();

        let err = projection.apply_envelope(&stream[1].to_envelope()).unwrap_err();
        assert!(matches!(err, StockProjectionError::SequenceGap { last: 0, found: 2 }));

        projection.apply_envelope(&stream[0].to_envelope()).unwrap();
        projection.apply_envelope(&stream[0].to_envelope()).unwrap();
        projection.apply_envelope(&stream[1].to_envelope()).unwrap();

        assert_eq!(projection.get(tenant_id, &product_id).unwrap().on_hand_qty, 2);
        assert_eq!(projection.with_history(tenant_id, product_id, |h| h.len()), 2);
    }

    #[test]
    fn catch_up_and_rebuild_match_the_store() {
        let store = InMemoryEventStore::new();
        let projection = projection();
        let tenant_id = TenantId::new();
        let product_id = ProductId::new(AggregateId::new());

        append(&store, tenant_id, product_id, &movement_event(tenant_id, product_id, 1, 1, false));
        append(&store, tenant_id, product_id, &movement_event(tenant_id, product_id, 2, 0, true));

        projection.catch_up(&store, tenant_id, product_id).unwrap();
        let level = projection.get(tenant_id, &product_id).unwrap();
        assert_eq!(level.on_hand_qty, 0);
        assert_eq!(level.last_movement_id, 2);
        assert!(level.last_outbound_at.is_some());

        assert_eq!(projection.rebuild(&store, tenant_id).unwrap(), 1);
        assert_eq!(projection.get(tenant_id, &product_id), Some(level));
        assert_eq!(projection.with_history(tenant_id, product_id, |h| h.len()), 2);
    }
}
