//! Engine configuration.

use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maker rate applied to symbols without an explicit fee schedule.
    pub default_maker_rate: Decimal,
    /// Taker rate applied to symbols without an explicit fee schedule.
    pub default_taker_rate: Decimal,
    /// Per-symbol trade history ring size.
    pub trade_history_capacity: usize,
    /// Depth used by the periodic snapshot broadcaster.
    pub default_depth: usize,
    /// Broadcast channel capacity for each event stream.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_maker_rate: Decimal::new(1, 3), // 0.1%
            default_taker_rate: Decimal::new(2, 3), // 0.2%
            trade_history_capacity: 10_000,
            default_depth: 10,
            event_capacity: 1_024,
        }
    }
}

impl EngineConfig {
    /// Load configuration, layering `ENGINE_*` environment variables over the
    /// defaults (e.g. `ENGINE_DEFAULT_MAKER_RATE=0.0005`).
    pub fn load() -> anyhow::Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::with_prefix("ENGINE"))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }
}
