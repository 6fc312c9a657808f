//! Durable store interface.
//!
//! The engine consumes this interface but never implements it: it notifies
//! the store on every order-state change and every trade, and can dump or
//! seed its full state through it. With no store attached the engine runs
//! purely in memory and every guarantee still holds.

use rust_decimal::Decimal;

use crate::fees::FeeSchedule;
use crate::models::{Order, Trade};

/// Everything needed to rebuild the engine after a restart.
#[derive(Debug, Default)]
pub struct StoredState {
    /// Orders in any status; resting and pending ones are re-seeded, the rest
    /// only repopulate the order archive.
    pub orders: Vec<Order>,
    /// Recent trades, oldest first.
    pub trades: Vec<Trade>,
    pub fee_schedules: Vec<FeeSchedule>,
    pub default_rates: Option<(Decimal, Decimal)>,
}

pub trait EngineStore: Send + Sync {
    fn save_order(&self, order: &Order) -> anyhow::Result<()>;
    fn save_trade(&self, trade: &Trade) -> anyhow::Result<()>;
    fn save_fee_schedule(&self, schedule: &FeeSchedule) -> anyhow::Result<()>;
    fn save_default_rates(&self, maker_rate: Decimal, taker_rate: Decimal) -> anyhow::Result<()>;
    fn load_state(&self) -> anyhow::Result<StoredState>;
}
