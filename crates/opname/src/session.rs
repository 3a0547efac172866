use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId, UserId};
use stockledger_events::Event;
use stockledger_inventory::{ProductId, StockDirection};

/// Stream/aggregate type name for opname sessions.
pub const OPNAME_AGGREGATE_TYPE: &str = "opname.session";

/// Opname session identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpnameId(pub AggregateId);

impl OpnameId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OpnameId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for OpnameId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Result of processing an opname, stored with the session so a retried
/// `process` returns exactly what the first call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpnameOutcome {
    pub opname_id: OpnameId,
    pub product_id: ProductId,
    pub system_qty: i64,
    pub actual_qty: i64,
    pub discrepancy: i64,
    /// Ledger movement created for the discrepancy, `None` when it was zero.
    pub movement_id: Option<u64>,
    pub processed_at: DateTime<Utc>,
}

/// Aggregate root: StockOpname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockOpname {
    id: OpnameId,
    tenant_id: Option<TenantId>,
    product_id: Option<ProductId>,
    system_qty: i64,
    actual_qty: i64,
    notes: Option<String>,
    outcome: Option<OpnameOutcome>,
    created_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl StockOpname {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OpnameId) -> Self {
        Self {
            id,
            tenant_id: None,
            product_id: None,
            system_qty: 0,
            actual_qty: 0,
            notes: None,
            outcome: None,
            created_by: None,
            created_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OpnameId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    pub fn system_qty(&self) -> i64 {
        self.system_qty
    }

    pub fn actual_qty(&self) -> i64 {
        self.actual_qty
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn processed(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn outcome(&self) -> Option<&OpnameOutcome> {
        self.outcome.as_ref()
    }

    /// `actual_qty - system_qty`.
    pub fn discrepancy(&self) -> i64 {
        self.actual_qty - self.system_qty
    }

    /// Direction and magnitude of the adjustment this count calls for.
    pub fn adjustment(&self) -> Option<(StockDirection, i64)> {
        match self.discrepancy() {
            0 => None,
            d if d > 0 => Some((StockDirection::Increase, d)),
            d => Some((StockDirection::Decrease, d.abs())),
        }
    }
}

impl AggregateRoot for StockOpname {
    type Id = OpnameId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateOpname.
///
/// `system_qty` is the ledger's on-hand quantity at the moment of the count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOpname {
    pub tenant_id: TenantId,
    pub opname_id: OpnameId,
    pub product_id: ProductId,
    pub system_qty: i64,
    pub actual_qty: i64,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateOpname (only while unprocessed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOpname {
    pub tenant_id: TenantId,
    pub opname_id: OpnameId,
    pub actual_qty: Option<i64>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkProcessed.
///
/// Issued after the adjustment (if any) has been appended to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkProcessed {
    pub tenant_id: TenantId,
    pub opname_id: OpnameId,
    pub movement_id: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpnameCommand {
    CreateOpname(CreateOpname),
    UpdateOpname(UpdateOpname),
    MarkProcessed(MarkProcessed),
}

/// Event: OpnameCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpnameCreated {
    pub tenant_id: TenantId,
    pub opname_id: OpnameId,
    pub product_id: ProductId,
    pub system_qty: i64,
    pub actual_qty: i64,
    pub notes: Option<String>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OpnameUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpnameUpdated {
    pub tenant_id: TenantId,
    pub opname_id: OpnameId,
    pub actual_qty: i64,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OpnameProcessed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpnameProcessed {
    pub tenant_id: TenantId,
    pub outcome: OpnameOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpnameEvent {
    OpnameCreated(OpnameCreated),
    OpnameUpdated(OpnameUpdated),
    OpnameProcessed(OpnameProcessed),
}

impl Event for OpnameEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OpnameEvent::OpnameCreated(_) => "opname.session.created",
            OpnameEvent::OpnameUpdated(_) => "opname.session.updated",
            OpnameEvent::OpnameProcessed(_) => "opname.session.processed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OpnameEvent::OpnameCreated(e) => e.occurred_at,
            OpnameEvent::OpnameUpdated(e) => e.occurred_at,
            OpnameEvent::OpnameProcessed(e) => e.outcome.processed_at,
        }
    }
}

impl Aggregate for StockOpname {
    type Command = OpnameCommand;
    type Event = OpnameEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OpnameEvent::OpnameCreated(e) => {
                self.id = e.opname_id;
                self.tenant_id = Some(e.tenant_id);
                self.product_id = Some(e.product_id);
                self.system_qty = e.system_qty;
                self.actual_qty = e.actual_qty;
                self.notes = e.notes.clone();
                self.created_by = Some(e.created_by);
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            OpnameEvent::OpnameUpdated(e) => {
                self.actual_qty = e.actual_qty;
                self.notes = e.notes.clone();
            }
            OpnameEvent::OpnameProcessed(e) => {
                self.outcome = Some(e.outcome.clone());
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OpnameCommand::CreateOpname(cmd) => self.handle_create(cmd),
            OpnameCommand::UpdateOpname(cmd) => self.handle_update(cmd),
            OpnameCommand::MarkProcessed(cmd) => self.handle_mark_processed(cmd),
        }
    }
}

impl StockOpname {
    fn ensure_existing(&self, tenant_id: TenantId, opname_id: OpnameId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != opname_id {
            return Err(DomainError::invariant("opname_id mismatch"));
        }
        Ok(())
    }

    fn ensure_unprocessed(&self) -> Result<(), DomainError> {
        if self.processed() {
            return Err(DomainError::invalid_transition("opname already processed"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateOpname) -> Result<Vec<OpnameEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("opname already exists"));
        }
        if self.id != cmd.opname_id {
            return Err(DomainError::invariant("opname_id mismatch"));
        }
        if cmd.system_qty < 0 {
            return Err(DomainError::invariant("system_qty cannot be negative"));
        }
        if cmd.actual_qty < 0 {
            return Err(DomainError::validation("actual_qty cannot be negative"));
        }

        Ok(vec![OpnameEvent::OpnameCreated(OpnameCreated {
            tenant_id: cmd.tenant_id,
            opname_id: cmd.opname_id,
            product_id: cmd.product_id,
            system_qty: cmd.system_qty,
            actual_qty: cmd.actual_qty,
            notes: cmd.notes.clone(),
            created_by: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateOpname) -> Result<Vec<OpnameEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.opname_id)?;
        self.ensure_unprocessed()?;

        let actual_qty = cmd.actual_qty.unwrap_or(self.actual_qty);
        if actual_qty < 0 {
            return Err(DomainError::validation("actual_qty cannot be negative"));
        }

        Ok(vec![OpnameEvent::OpnameUpdated(OpnameUpdated {
            tenant_id: cmd.tenant_id,
            opname_id: cmd.opname_id,
            actual_qty,
            notes: cmd.notes.clone().or_else(|| self.notes.clone()),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_processed(&self, cmd: &MarkProcessed) -> Result<Vec<OpnameEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.opname_id)?;
        self.ensure_unprocessed()?;

        let product_id = self
            .product_id
            .ok_or_else(|| DomainError::invariant("opname has no product"))?;

        match (self.discrepancy(), cmd.movement_id) {
            (0, Some(_)) => {
                return Err(DomainError::invariant(
                    "a zero discrepancy cannot reference a movement",
                ));
            }
            (d, None) if d != 0 => {
                return Err(DomainError::invariant(
                    "a non-zero discrepancy requires an adjustment movement",
                ));
            }
            _ => {}
        }

        Ok(vec![OpnameEvent::OpnameProcessed(OpnameProcessed {
            tenant_id: cmd.tenant_id,
            outcome: OpnameOutcome {
                opname_id: cmd.opname_id,
                product_id,
                system_qty: self.system_qty,
                actual_qty: self.actual_qty,
                discrepancy: self.discrepancy(),
                movement_id: cmd.movement_id,
                processed_at: cmd.occurred_at,
            },
        })])
    }
}
