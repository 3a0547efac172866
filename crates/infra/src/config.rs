//! Configuration loading and representation.

use std::time::Duration;

use tracing::warn;

use crate::command_dispatcher::DEFAULT_MAX_ATTEMPTS;

pub const DEFAULT_DEAD_STOCK_WINDOW_DAYS: u32 = 90;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Inventory engine settings, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryConfig {
    /// Attempts per ledger append when the stream version moves underneath it.
    pub max_append_attempts: u32,
    /// Default window for dead-stock detection.
    pub dead_stock_window_days: u32,
    /// Background sweep cadence; `None` disables the sweep.
    pub sweep_interval: Option<Duration>,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            max_append_attempts: DEFAULT_MAX_ATTEMPTS,
            dead_stock_window_days: DEFAULT_DEAD_STOCK_WINDOW_DAYS,
            sweep_interval: Some(Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS)),
        }
    }
}

impl InventoryConfig {
    /// Read `LEDGER_MAX_APPEND_ATTEMPTS`, `DEAD_STOCK_WINDOW_DAYS` and
    /// `STOCK_SWEEP_INTERVAL_SECS` from the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to
    /// defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let max_append_attempts = parse_or(&lookup, "LEDGER_MAX_APPEND_ATTEMPTS", defaults.max_append_attempts).max(1);
        let dead_stock_window_days =
            parse_or(&lookup, "DEAD_STOCK_WINDOW_DAYS", defaults.dead_stock_window_days);
        let sweep_secs = parse_or(&lookup, "STOCK_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS);

        Self {
            max_append_attempts,
            dead_stock_window_days,
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy + std::fmt::Debug,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, value = %raw, default = ?default, "invalid config value, using default");
                default
            }
        },
    }
}
