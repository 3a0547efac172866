use std::collections::HashSet;
use std::io;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use stockledger_core::TenantId;
use stockledger_events::{EventBus, EventEnvelope};
use stockledger_inventory::ProductId;

use crate::alerts::{AlertError, StockAlert, StockAlertSink};
use crate::config::{DEFAULT_DEAD_STOCK_WINDOW_DAYS, DEFAULT_SWEEP_INTERVAL_SECS, InventoryConfig};
use crate::event_store::EventStore;
use crate::services::{DeadStockRow, InventoryAnalytics, LowStockRow};

/// What the sweep reads. Implemented by [`InventoryAnalytics`].
pub trait StockSweepSource: Send + Sync + 'static {
    fn low_stock(&self, tenant_id: TenantId) -> Vec<LowStockRow>;

    fn dead_stock(&self, tenant_id: TenantId, window_days: u32) -> Vec<DeadStockRow>;
}

impl<S, B> StockSweepSource for InventoryAnalytics<S, B>
where
    S: EventStore + 'static,
    B: EventBus<EventEnvelope<JsonValue>> + 'static,
{
    fn low_stock(&self, tenant_id: TenantId) -> Vec<LowStockRow> {
        InventoryAnalytics::low_stock(self, tenant_id)
    }

    fn dead_stock(&self, tenant_id: TenantId, window_days: u32) -> Vec<DeadStockRow> {
        InventoryAnalytics::dead_stock(self, tenant_id, Some(window_days))
    }
}

/// Periodic low-stock / dead-stock sweep.
///
/// Each product is signalled once when it enters a condition and again only
/// after it has left it and come back.
#[derive(Debug, Clone)]
pub struct StockSweepRunner {
    pub interval: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub dead_stock_window_days: u32,
}

impl Default for StockSweepRunner {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            max_retries: 5,
            base_backoff: Duration::from_millis(250),
            dead_stock_window_days: DEFAULT_DEAD_STOCK_WINDOW_DAYS,
        }
    }
}

/// Handle for a running sweep (shutdown + trigger hook).
#[derive(Debug)]
pub struct StockSweepHandle {
    shutdown: mpsc::Sender<()>,
    trigger: mpsc::SyncSender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl StockSweepHandle {
    /// Ask for a sweep now. Triggers coalesce while one is already pending.
    pub fn trigger(&self) {
        let _ = self.trigger.try_send(());
    }

    /// Stop the sweep thread and wait for it.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub low_stock: usize,
    pub dead_stock: usize,
    /// Alerts emitted this pass (new findings only).
    pub emitted: usize,
}

/// Products already signalled, per condition.
#[derive(Debug, Default)]
pub struct SweepState {
    low: HashSet<ProductId>,
    dead: HashSet<ProductId>,
}

impl StockSweepRunner {
    /// `None` when the sweep is disabled.
    pub fn from_config(config: &InventoryConfig) -> Option<Self> {
        config.sweep_interval.map(|interval| Self {
            interval,
            dead_stock_window_days: config.dead_stock_window_days,
            ..Self::default()
        })
    }

    /// Spawn a tenant-scoped sweep thread.
    ///
    /// Runs once at startup, then every `interval`. Delivery failures are
    /// logged and retried with bounded exponential backoff; they never stop
    /// the thread.
    pub fn spawn_for_tenant<R, K>(
        &self,
        name: &'static str,
        tenant_id: TenantId,
        source: Arc<R>,
        sink: Arc<K>,
    ) -> io::Result<StockSweepHandle>
    where
        R: StockSweepSource + ?Sized,
        K: StockAlertSink + ?Sized + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (trigger_tx, trigger_rx) = mpsc::sync_channel::<()>(1);

        let cfg = self.clone();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || sweep_loop(name, tenant_id, cfg, shutdown_rx, trigger_rx, source, sink))?;

        Ok(StockSweepHandle {
            shutdown: shutdown_tx,
            trigger: trigger_tx,
            join: Some(join),
        })
    }

    /// One pass: read both reports and emit alerts for new findings.
    ///
    /// State is only advanced for alerts that were delivered, so a failed
    /// pass re-emits on retry.
    pub fn sweep_once<R, K>(
        &self,
        tenant_id: TenantId,
        state: &mut SweepState,
        source: &R,
        sink: &K,
    ) -> Result<SweepSummary, AlertError>
    where
        R: StockSweepSource + ?Sized,
        K: StockAlertSink + ?Sized,
    {
        let low = source.low_stock(tenant_id);
        let dead = source.dead_stock(tenant_id, self.dead_stock_window_days);
        let mut summary = SweepSummary {
            low_stock: low.len(),
            dead_stock: dead.len(),
            emitted: 0,
        };

        let low_now: HashSet<ProductId> = low.iter().map(|r| r.product_id).collect();
        let dead_now: HashSet<ProductId> = dead.iter().map(|r| r.product_id).collect();
        state.low.retain(|p| low_now.contains(p));
        state.dead.retain(|p| dead_now.contains(p));

        let new_low: Vec<&LowStockRow> = low.iter().filter(|r| !state.low.contains(&r.product_id)).collect();
        for row in new_low {
            sink.emit(
                tenant_id,
                StockAlert::LowStock {
                    product_id: row.product_id,
                    on_hand_qty: row.on_hand_qty,
                    min_stock_threshold: row.min_stock_threshold,
                    movement_id: None,
                },
            )?;
            state.low.insert(row.product_id);
            summary.emitted += 1;
        }

        let new_dead: Vec<&DeadStockRow> = dead.iter().filter(|r| !state.dead.contains(&r.product_id)).collect();
        for row in new_dead {
            sink.emit(
                tenant_id,
                StockAlert::DeadStock {
                    product_id: row.product_id,
                    on_hand_qty: row.on_hand_qty,
                    last_outbound_at: row.last_outbound_at,
                    window_days: self.dead_stock_window_days,
                },
            )?;
            state.dead.insert(row.product_id);
            summary.emitted += 1;
        }

        Ok(summary)
    }
}

fn sweep_loop<R, K>(
    name: &'static str,
    tenant_id: TenantId,
    cfg: StockSweepRunner,
    shutdown_rx: mpsc::Receiver<()>,
    trigger_rx: mpsc::Receiver<()>,
    source: Arc<R>,
    sink: Arc<K>,
) where
    R: StockSweepSource + ?Sized,
    K: StockAlertSink + ?Sized,
{
    info!(runner = name, tenant = %tenant_id, "stock sweep started");

    let mut state = SweepState::default();
    let mut next_tick = Instant::now() + cfg.interval;
    let mut pending = true;
    let mut failures: u32 = 0;
    let mut backoff_until: Option<Instant> = None;

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let now = Instant::now();
        if now >= next_tick {
            pending = true;
            while next_tick <= now {
                next_tick += cfg.interval;
            }
        }

        while trigger_rx.try_recv().is_ok() {
            pending = true;
        }

        if let Some(until) = backoff_until {
            if Instant::now() < until {
                thread::sleep(Duration::from_millis(50));
                continue;
            }
            backoff_until = None;
        }

        if !pending {
            let sleep_for = next_tick
                .saturating_duration_since(Instant::now())
                .min(Duration::from_millis(250));
            thread::sleep(sleep_for);
            continue;
        }
        pending = false;

        match cfg.sweep_once(tenant_id, &mut state, source.as_ref(), sink.as_ref()) {
            Ok(summary) => {
                failures = 0;
                debug!(
                    runner = name,
                    tenant = %tenant_id,
                    low_stock = summary.low_stock,
                    dead_stock = summary.dead_stock,
                    emitted = summary.emitted,
                    "stock sweep finished"
                );
            }
            Err(e) => {
                warn!(runner = name, tenant = %tenant_id, error = %e, "stock sweep failed");
                failures += 1;
                if failures <= cfg.max_retries {
                    pending = true;
                    backoff_until = Some(Instant::now() + backoff(cfg.base_backoff, failures));
                } else {
                    failures = 0;
                }
            }
        }
    }

    info!(runner = name, tenant = %tenant_id, "stock sweep stopped");
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    // base * 2^(attempt-1), capped at 10s.
    let pow = 1u32 << attempt.saturating_sub(1).min(10);
    let ms = base.as_millis().saturating_mul(pow as u128);
    Duration::from_millis(ms.min(10_000) as u64)
}
