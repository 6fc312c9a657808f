//! Maker/taker fee schedules.
//!
//! A process-wide default rate pair applies to any symbol without an explicit
//! schedule; looking a symbol up lazily materializes a schedule from the
//! defaults. Rates are validated non-negative when set, and schedule changes
//! are observed atomically by the matching path.

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::error::EngineError;
use crate::models::Trade;

/// Fee schedule for a single trading pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub symbol: String,
    pub maker_rate: Decimal,
    pub taker_rate: Decimal,
}

impl FeeSchedule {
    pub fn maker_fee(&self, notional: Decimal) -> Decimal {
        notional * self.maker_rate
    }

    pub fn taker_fee(&self, notional: Decimal) -> Decimal {
        notional * self.taker_rate
    }

    /// Stamp both fees and both rates onto a trade.
    pub fn apply(&self, trade: &mut Trade) {
        let notional = trade.notional();
        trade.maker_fee = self.maker_fee(notional);
        trade.taker_fee = self.taker_fee(notional);
        trade.maker_fee_rate = self.maker_rate;
        trade.taker_fee_rate = self.taker_rate;
    }
}

/// Per-symbol fee schedules plus the process-wide defaults.
#[derive(Debug)]
pub struct FeeEngine {
    default_rates: RwLock<(Decimal, Decimal)>,
    schedules: RwLock<HashMap<String, FeeSchedule>>,
}

impl FeeEngine {
    pub fn new(default_maker_rate: Decimal, default_taker_rate: Decimal) -> Self {
        Self {
            default_rates: RwLock::new((default_maker_rate, default_taker_rate)),
            schedules: RwLock::new(HashMap::new()),
        }
    }

    /// Get the schedule for a symbol, creating one from the default rates if
    /// none exists yet.
    pub fn schedule_for(&self, symbol: &str) -> FeeSchedule {
        if let Some(schedule) = self.schedules.read().get(symbol) {
            return schedule.clone();
        }

        let (maker_rate, taker_rate) = *self.default_rates.read();
        let schedule = FeeSchedule {
            symbol: symbol.to_string(),
            maker_rate,
            taker_rate,
        };
        self.schedules
            .write()
            .entry(symbol.to_string())
            .or_insert_with(|| schedule.clone())
            .clone()
    }

    /// Set a custom schedule for a symbol. Negative rates are rejected.
    pub fn set_schedule(
        &self,
        symbol: &str,
        maker_rate: Decimal,
        taker_rate: Decimal,
    ) -> Result<FeeSchedule, EngineError> {
        validate_rates(maker_rate, taker_rate)?;

        let schedule = FeeSchedule {
            symbol: symbol.to_string(),
            maker_rate,
            taker_rate,
        };
        self.schedules
            .write()
            .insert(symbol.to_string(), schedule.clone());
        info!(symbol, %maker_rate, %taker_rate, "fee schedule updated");
        Ok(schedule)
    }

    /// Set the default rates applied to symbols without a schedule.
    pub fn set_default_rates(
        &self,
        maker_rate: Decimal,
        taker_rate: Decimal,
    ) -> Result<(), EngineError> {
        validate_rates(maker_rate, taker_rate)?;
        *self.default_rates.write() = (maker_rate, taker_rate);
        info!(%maker_rate, %taker_rate, "default fee rates updated");
        Ok(())
    }

    pub fn default_rates(&self) -> (Decimal, Decimal) {
        *self.default_rates.read()
    }

    /// All explicit schedules, for bulk persistence.
    pub fn schedules(&self) -> Vec<FeeSchedule> {
        self.schedules.read().values().cloned().collect()
    }

    /// Seed a schedule without logging, used on state restore.
    pub fn insert_schedule(&self, schedule: FeeSchedule) {
        self.schedules
            .write()
            .insert(schedule.symbol.clone(), schedule);
    }
}

fn validate_rates(maker_rate: Decimal, taker_rate: Decimal) -> Result<(), EngineError> {
    if maker_rate < Decimal::ZERO {
        return Err(EngineError::InvalidRate(maker_rate));
    }
    if taker_rate < Decimal::ZERO {
        return Err(EngineError::InvalidRate(taker_rate));
    }
    Ok(())
}
