//! Stock opname (physical count) reconciliation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

use stockledger_core::{AggregateId, AggregateRoot, DomainError, TenantId, UserId};
use stockledger_events::{EventBus, EventEnvelope};
use stockledger_inventory::{MovementType, ProductId, ReferenceType};
use stockledger_opname::{
    CreateOpname, MarkProcessed, OPNAME_AGGREGATE_TYPE, OpnameCommand, OpnameId, OpnameOutcome, StockOpname,
    UpdateOpname,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::locks::KeyedLocks;
use crate::read_model::{InMemoryTenantStore, TenantStore};

use super::ledger::{MovementRequest, StockLedger};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewOpname {
    pub product_id: ProductId,
    pub actual_qty: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OpnamePatch {
    pub actual_qty: Option<i64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpnameView {
    pub opname_id: OpnameId,
    pub product_id: Option<ProductId>,
    pub system_qty: i64,
    pub actual_qty: i64,
    pub discrepancy: i64,
    pub notes: Option<String>,
    pub processed: bool,
    pub outcome: Option<OpnameOutcome>,
    pub created_by: Option<UserId>,
    pub created_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl From<&StockOpname> for OpnameView {
    fn from(o: &StockOpname) -> Self {
        Self {
            opname_id: o.id_typed(),
            product_id: o.product_id(),
            system_qty: o.system_qty(),
            actual_qty: o.actual_qty(),
            discrepancy: o.discrepancy(),
            notes: o.notes().map(str::to_string),
            processed: o.processed(),
            outcome: o.outcome().cloned(),
            created_by: o.created_by(),
            created_at: o.created_at(),
            version: o.version(),
        }
    }
}

/// Reconciles counted quantities with the ledger.
///
/// `process` is idempotent per session: the first call posts at most one
/// `ADJUSTMENT` movement and stores the outcome, later calls return it.
pub struct OpnameReconciler<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    ledger: Arc<StockLedger<S, B>>,
    locks: KeyedLocks<(TenantId, OpnameId)>,
    views: InMemoryTenantStore<OpnameId, OpnameView>,
}

impl<S, B> OpnameReconciler<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: CommandDispatcher<S, B>, ledger: Arc<StockLedger<S, B>>) -> Self {
        Self {
            dispatcher,
            ledger,
            locks: KeyedLocks::new(),
            views: InMemoryTenantStore::new(),
        }
    }

    /// Open a session, capturing the ledger's current on-hand as `system_qty`.
    pub fn create(&self, tenant_id: TenantId, input: NewOpname, actor: UserId) -> Result<OpnameView, DispatchError> {
        let opname_id = OpnameId::new(AggregateId::new());
        let system_qty = self.ledger.on_hand(tenant_id, input.product_id)?;

        let command = OpnameCommand::CreateOpname(CreateOpname {
            tenant_id,
            opname_id,
            product_id: input.product_id,
            system_qty,
            actual_qty: input.actual_qty,
            notes: input.notes,
            actor,
            occurred_at: Utc::now(),
        });
        self.locks
            .with_lock(&(tenant_id, opname_id), || self.execute(tenant_id, opname_id, command))
    }

    pub fn update(&self, tenant_id: TenantId, opname_id: OpnameId, patch: OpnamePatch) -> Result<OpnameView, DispatchError> {
        let command = OpnameCommand::UpdateOpname(UpdateOpname {
            tenant_id,
            opname_id,
            actual_qty: patch.actual_qty,
            notes: patch.notes,
            occurred_at: Utc::now(),
        });
        self.locks
            .with_lock(&(tenant_id, opname_id), || self.execute(tenant_id, opname_id, command))
    }

    pub fn process(&self, tenant_id: TenantId, opname_id: OpnameId, actor: UserId) -> Result<OpnameOutcome, DispatchError> {
        self.locks.with_lock(&(tenant_id, opname_id), || {
            let session = self.load(tenant_id, opname_id)?;
            if let Some(outcome) = session.outcome() {
                return Ok(outcome.clone());
            }
            let product_id = session
                .product_id()
                .ok_or_else(|| DomainError::invariant("opname session has no product"))?;

            let movement_id = match session.adjustment() {
                None => None,
                Some((direction, quantity)) => {
                    // A previous attempt may have posted the movement but not the outcome.
                    let reference_id = opname_id.to_string();
                    let existing = self
                        .ledger
                        .find_by_reference(tenant_id, product_id, ReferenceType::Opname, &reference_id);
                    let movement = match existing {
                        Some(movement) => movement,
                        None => self.ledger.append_movement(
                            tenant_id,
                            MovementRequest {
                                product_id,
                                movement_type: MovementType::Adjustment,
                                direction: Some(direction),
                                quantity,
                                cost_per_unit: None,
                                reference_type: ReferenceType::Opname,
                                reference_id,
                                actor,
                                note: Some(format!("stock opname {opname_id}")),
                                occurred_at: None,
                            },
                        )?,
                    };
                    Some(movement.movement_id)
                }
            };

            let command = OpnameCommand::MarkProcessed(MarkProcessed {
                tenant_id,
                opname_id,
                movement_id,
                occurred_at: Utc::now(),
            });
            let view = self.execute(tenant_id, opname_id, command)?;
            let outcome = view
                .outcome
                .ok_or_else(|| DomainError::invariant("processed opname has no outcome"))?;

            info!(
                tenant = %tenant_id,
                opname = %opname_id,
                product = %product_id,
                discrepancy = outcome.discrepancy,
                movement_id = ?outcome.movement_id,
                "opname processed"
            );
            Ok(outcome)
        })
    }

    /// Process several sessions; one failure never blocks the others.
    pub fn bulk_process(
        &self,
        tenant_id: TenantId,
        opname_ids: &[OpnameId],
        actor: UserId,
    ) -> Vec<(OpnameId, Result<OpnameOutcome, DispatchError>)> {
        opname_ids
            .iter()
            .map(|id| (*id, self.process(tenant_id, *id, actor)))
            .collect()
    }

    pub fn get(&self, tenant_id: TenantId, opname_id: OpnameId) -> Result<OpnameView, DispatchError> {
        self.load(tenant_id, opname_id).map(|o| OpnameView::from(&o))
    }

    /// Sessions of the tenant, newest first.
    pub fn list(&self, tenant_id: TenantId, processed: Option<bool>) -> Vec<OpnameView> {
        let mut views: Vec<_> = self
            .views
            .list(tenant_id)
            .into_iter()
            .filter(|v| processed.is_none_or(|p| v.processed == p))
            .collect();
        views.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.opname_id.cmp(&b.opname_id)));
        views
    }

    fn load(&self, tenant_id: TenantId, opname_id: OpnameId) -> Result<StockOpname, DispatchError> {
        self.dispatcher
            .load(tenant_id, opname_id.0, |_, id| StockOpname::empty(OpnameId::new(id)))?
            .ok_or_else(|| DomainError::not_found().into())
    }

    fn execute(&self, tenant_id: TenantId, opname_id: OpnameId, command: OpnameCommand) -> Result<OpnameView, DispatchError> {
        self.dispatcher.dispatch(
            tenant_id,
            opname_id.0,
            OPNAME_AGGREGATE_TYPE,
            command,
            |_, id| StockOpname::empty(OpnameId::new(id)),
        )?;

        let view = OpnameView::from(&self.load(tenant_id, opname_id)?);
        self.views.upsert(tenant_id, opname_id, view.clone());
        Ok(view)
    }
}
