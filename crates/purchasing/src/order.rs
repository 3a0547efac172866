use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId, UserId};
use stockledger_events::Event;
use stockledger_inventory::ProductId;

/// Stream/aggregate type name for purchase orders.
pub const PURCHASE_ORDER_AGGREGATE_TYPE: &str = "purchasing.order";

/// Purchase order identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseOrderId(pub AggregateId);

impl PurchaseOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PurchaseOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for PurchaseOrderId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Purchase order status lifecycle.
///
/// `DRAFT -> PENDING -> RECEIVED`, with `CANCELLED` reachable from `DRAFT` or
/// `PENDING` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseOrderStatus {
    Draft,
    Pending,
    Received,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "DRAFT",
            PurchaseOrderStatus::Pending => "PENDING",
            PurchaseOrderStatus::Received => "RECEIVED",
            PurchaseOrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PurchaseOrderStatus::Received | PurchaseOrderStatus::Cancelled)
    }
}

/// Requested line when creating or replacing a purchase order's items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInput {
    pub product_id: ProductId,
    pub quantity_ordered: i64,
    pub cost_per_unit: Decimal,
}

/// Purchase order line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLine {
    pub product_id: ProductId,
    pub quantity_ordered: i64,
    pub cost_per_unit: Decimal,
    /// Starts at 0 and only grows; never exceeds `quantity_ordered`.
    pub quantity_received: i64,
}

impl PurchaseOrderLine {
    pub fn remaining(&self) -> i64 {
        self.quantity_ordered - self.quantity_received
    }

    pub fn is_fully_received(&self) -> bool {
        self.quantity_received == self.quantity_ordered
    }
}

impl From<&LineInput> for PurchaseOrderLine {
    fn from(input: &LineInput) -> Self {
        Self {
            product_id: input.product_id,
            quantity_ordered: input.quantity_ordered,
            cost_per_unit: input.cost_per_unit,
            quantity_received: 0,
        }
    }
}

/// Quantity arriving for one product in a single receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Aggregate root: PurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    tenant_id: Option<TenantId>,
    supplier_name: String,
    po_date: Option<NaiveDate>,
    status: PurchaseOrderStatus,
    notes: Option<String>,
    items: Vec<PurchaseOrderLine>,
    created_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl PurchaseOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PurchaseOrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            supplier_name: String::new(),
            po_date: None,
            status: PurchaseOrderStatus::Draft,
            notes: None,
            items: Vec::new(),
            created_by: None,
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn supplier_name(&self) -> &str {
        &self.supplier_name
    }

    pub fn po_date(&self) -> Option<NaiveDate> {
        self.po_date
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn items(&self) -> &[PurchaseOrderLine] {
        &self.items
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn line(&self, product_id: ProductId) -> Option<&PurchaseOrderLine> {
        self.items.iter().find(|l| l.product_id == product_id)
    }

    pub fn has_receipts(&self) -> bool {
        self.items.iter().any(|l| l.quantity_received > 0)
    }

    pub fn is_fully_received(&self) -> bool {
        !self.items.is_empty() && self.items.iter().all(PurchaseOrderLine::is_fully_received)
    }

    /// Check a receipt against the order without producing events.
    ///
    /// Callers use this to reject a whole receipt before posting any stock.
    pub fn validate_receipt(&self, tenant_id: TenantId, lines: &[ReceiptLine]) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(tenant_id)?;

        match self.status {
            PurchaseOrderStatus::Pending => {}
            PurchaseOrderStatus::Draft => {
                return Err(DomainError::invalid_transition(
                    "purchase order must be submitted before receiving",
                ));
            }
            other => {
                return Err(DomainError::invalid_transition(format!(
                    "cannot receive a {} purchase order",
                    other.as_str()
                )));
            }
        }

        if lines.is_empty() {
            return Err(DomainError::validation("receipt must contain at least one line"));
        }

        let mut seen = HashSet::new();
        for line in lines {
            if !seen.insert(line.product_id) {
                return Err(DomainError::validation(format!(
                    "product {} appears more than once in receipt",
                    line.product_id
                )));
            }
            if line.quantity <= 0 {
                return Err(DomainError::validation("received quantity must be positive"));
            }

            let po_line = self.line(line.product_id).ok_or_else(|| {
                DomainError::validation(format!(
                    "product {} is not on this purchase order",
                    line.product_id
                ))
            })?;

            if line.quantity > po_line.remaining() {
                return Err(DomainError::OverReceipt {
                    product_id: line.product_id.0,
                    ordered: po_line.quantity_ordered,
                    received: po_line.quantity_received,
                    requested: line.quantity,
                });
            }
        }

        Ok(())
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchaseOrder {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub supplier_name: String,
    pub po_date: NaiveDate,
    pub items: Vec<LineInput>,
    pub notes: Option<String>,
    /// Persist directly as `PENDING` instead of `DRAFT`.
    pub submit: bool,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdatePurchaseOrder (only while `DRAFT` or `PENDING`).
///
/// `None` leaves a field as is. `items` replaces the whole list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePurchaseOrder {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub supplier_name: Option<String>,
    pub po_date: Option<NaiveDate>,
    /// `None` keeps the current notes; `Some(None)` clears them.
    pub notes: Option<Option<String>>,
    pub items: Option<Vec<LineInput>>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitPurchaseOrder (`DRAFT -> PENDING`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitPurchaseOrder {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordReceipt.
///
/// Records quantities that have already been posted to the stock ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordReceipt {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub lines: Vec<ReceiptLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelPurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPurchaseOrder {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderCommand {
    CreatePurchaseOrder(CreatePurchaseOrder),
    UpdatePurchaseOrder(UpdatePurchaseOrder),
    SubmitPurchaseOrder(SubmitPurchaseOrder),
    RecordReceipt(RecordReceipt),
    CancelPurchaseOrder(CancelPurchaseOrder),
}

/// Event: PurchaseOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCreated {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub supplier_name: String,
    pub po_date: NaiveDate,
    pub items: Vec<PurchaseOrderLine>,
    pub notes: Option<String>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderUpdated (carries the full post-update header and items).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderUpdated {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub supplier_name: String,
    pub po_date: NaiveDate,
    pub notes: Option<String>,
    pub items: Vec<PurchaseOrderLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderSubmitted {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: GoodsReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceived {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub lines: Vec<ReceiptLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderReceived (every line fully received).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderReceived {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCancelled {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderEvent {
    PurchaseOrderCreated(PurchaseOrderCreated),
    PurchaseOrderUpdated(PurchaseOrderUpdated),
    PurchaseOrderSubmitted(PurchaseOrderSubmitted),
    GoodsReceived(GoodsReceived),
    PurchaseOrderReceived(PurchaseOrderReceived),
    PurchaseOrderCancelled(PurchaseOrderCancelled),
}

impl Event for PurchaseOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(_) => "purchasing.order.created",
            PurchaseOrderEvent::PurchaseOrderUpdated(_) => "purchasing.order.updated",
            PurchaseOrderEvent::PurchaseOrderSubmitted(_) => "purchasing.order.submitted",
            PurchaseOrderEvent::GoodsReceived(_) => "purchasing.order.goods_received",
            PurchaseOrderEvent::PurchaseOrderReceived(_) => "purchasing.order.received",
            PurchaseOrderEvent::PurchaseOrderCancelled(_) => "purchasing.order.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderUpdated(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderSubmitted(e) => e.occurred_at,
            PurchaseOrderEvent::GoodsReceived(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderReceived(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseOrder {
    type Command = PurchaseOrderCommand;
    type Event = PurchaseOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.supplier_name = e.supplier_name.clone();
                self.po_date = Some(e.po_date);
                self.status = PurchaseOrderStatus::Draft;
                self.notes = e.notes.clone();
                self.items = e.items.clone();
                self.created_by = Some(e.created_by);
                self.created_at = Some(e.occurred_at);
                self.updated_at = Some(e.occurred_at);
                self.created = true;
            }
            PurchaseOrderEvent::PurchaseOrderUpdated(e) => {
                self.supplier_name = e.supplier_name.clone();
                self.po_date = Some(e.po_date);
                self.notes = e.notes.clone();
                self.items = e.items.clone();
                self.updated_at = Some(e.occurred_at);
            }
            PurchaseOrderEvent::PurchaseOrderSubmitted(e) => {
                self.status = PurchaseOrderStatus::Pending;
                self.updated_at = Some(e.occurred_at);
            }
            PurchaseOrderEvent::GoodsReceived(e) => {
                for received in &e.lines {
                    if let Some(line) = self
                        .items
                        .iter_mut()
                        .find(|l| l.product_id == received.product_id)
                    {
                        line.quantity_received += received.quantity;
                    }
                }
                self.updated_at = Some(e.occurred_at);
            }
            PurchaseOrderEvent::PurchaseOrderReceived(e) => {
                self.status = PurchaseOrderStatus::Received;
                self.updated_at = Some(e.occurred_at);
            }
            PurchaseOrderEvent::PurchaseOrderCancelled(e) => {
                self.status = PurchaseOrderStatus::Cancelled;
                self.updated_at = Some(e.occurred_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseOrderCommand::CreatePurchaseOrder(cmd) => self.handle_create(cmd),
            PurchaseOrderCommand::UpdatePurchaseOrder(cmd) => self.handle_update(cmd),
            PurchaseOrderCommand::SubmitPurchaseOrder(cmd) => self.handle_submit(cmd),
            PurchaseOrderCommand::RecordReceipt(cmd) => self.handle_receipt(cmd),
            PurchaseOrderCommand::CancelPurchaseOrder(cmd) => self.handle_cancel(cmd),
        }
    }
}

fn validate_supplier_name(name: &str) -> Result<(), DomainError> {
    if name.trim().is_empty() {
        return Err(DomainError::validation("supplier_name cannot be empty"));
    }
    Ok(())
}

fn validate_items(items: &[LineInput]) -> Result<Vec<PurchaseOrderLine>, DomainError> {
    if items.is_empty() {
        return Err(DomainError::validation(
            "purchase order must have at least one item",
        ));
    }

    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert(item.product_id) {
            return Err(DomainError::validation(format!(
                "product {} appears more than once",
                item.product_id
            )));
        }
        if item.quantity_ordered <= 0 {
            return Err(DomainError::validation("quantity_ordered must be positive"));
        }
        if item.cost_per_unit <= Decimal::ZERO {
            return Err(DomainError::validation("cost_per_unit must be positive"));
        }
    }

    // The order total must be representable.
    items
        .iter()
        .try_fold(Decimal::ZERO, |total, item| {
            item.cost_per_unit
                .checked_mul(Decimal::from(item.quantity_ordered))
                .and_then(|line_total| total.checked_add(line_total))
        })
        .ok_or_else(|| DomainError::validation("cost overflow"))?;

    Ok(items.iter().map(PurchaseOrderLine::from).collect())
}

impl PurchaseOrder {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: PurchaseOrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_existing(&self, tenant_id: TenantId, order_id: PurchaseOrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(tenant_id)?;
        self.ensure_order_id(order_id)
    }

    fn handle_create(
        &self,
        cmd: &CreatePurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase order already exists"));
        }
        self.ensure_order_id(cmd.order_id)?;
        validate_supplier_name(&cmd.supplier_name)?;
        let items = validate_items(&cmd.items)?;

        let mut events = vec![PurchaseOrderEvent::PurchaseOrderCreated(
            PurchaseOrderCreated {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                supplier_name: cmd.supplier_name.trim().to_string(),
                po_date: cmd.po_date,
                items,
                notes: cmd.notes.clone(),
                created_by: cmd.actor,
                occurred_at: cmd.occurred_at,
            },
        )];

        if cmd.submit {
            events.push(PurchaseOrderEvent::PurchaseOrderSubmitted(
                PurchaseOrderSubmitted {
                    tenant_id: cmd.tenant_id,
                    order_id: cmd.order_id,
                    occurred_at: cmd.occurred_at,
                },
            ));
        }

        Ok(events)
    }

    fn handle_update(
        &self,
        cmd: &UpdatePurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;

        if self.status.is_terminal() {
            return Err(DomainError::invalid_transition(format!(
                "cannot update a {} purchase order",
                self.status.as_str()
            )));
        }

        let supplier_name = match &cmd.supplier_name {
            Some(name) => {
                validate_supplier_name(name)?;
                name.trim().to_string()
            }
            None => self.supplier_name.clone(),
        };

        let items = match &cmd.items {
            Some(items) => {
                if self.has_receipts() {
                    return Err(DomainError::invalid_transition(
                        "items cannot change once receiving has started",
                    ));
                }
                validate_items(items)?
            }
            None => self.items.clone(),
        };

        let po_date = match (cmd.po_date, self.po_date) {
            (Some(d), _) | (None, Some(d)) => d,
            (None, None) => return Err(DomainError::invariant("po_date must be set")),
        };

        Ok(vec![PurchaseOrderEvent::PurchaseOrderUpdated(
            PurchaseOrderUpdated {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                supplier_name,
                po_date,
                notes: match &cmd.notes {
                    Some(notes) => notes.clone(),
                    None => self.notes.clone(),
                },
                items,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_submit(
        &self,
        cmd: &SubmitPurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;

        if self.status != PurchaseOrderStatus::Draft {
            return Err(DomainError::invalid_transition(format!(
                "only draft purchase orders can be submitted (status: {})",
                self.status.as_str()
            )));
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderSubmitted(
            PurchaseOrderSubmitted {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_receipt(&self, cmd: &RecordReceipt) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;
        self.validate_receipt(cmd.tenant_id, &cmd.lines)?;

        let received = PurchaseOrderEvent::GoodsReceived(GoodsReceived {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        });

        let mut after = self.clone();
        after.apply(&received);

        let mut events = vec![received];
        if after.is_fully_received() {
            events.push(PurchaseOrderEvent::PurchaseOrderReceived(
                PurchaseOrderReceived {
                    tenant_id: cmd.tenant_id,
                    order_id: cmd.order_id,
                    occurred_at: cmd.occurred_at,
                },
            ));
        }

        Ok(events)
    }

    fn handle_cancel(
        &self,
        cmd: &CancelPurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;

        // Posted partial receipts stay on the ledger; cancelling only stops
        // further receiving.
        if self.status.is_terminal() {
            return Err(DomainError::invalid_transition(format!(
                "cannot cancel a {} purchase order",
                self.status.as_str()
            )));
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCancelled(
            PurchaseOrderCancelled {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                reason: cmd.reason.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}
