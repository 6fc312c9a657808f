use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::datetime_as_millis;
use super::order::Side;

/// An executed trade. Immutable once the fee engine has stamped it.
///
/// Price is always the resting (maker) order's price; the aggressor side is
/// the side of the incoming taker order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub symbol: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub aggressor_side: Side,
    pub maker_order_id: Uuid,
    pub taker_order_id: Uuid,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    pub maker_fee_rate: Decimal,
    pub taker_fee_rate: Decimal,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    /// Create a trade with zeroed fees; the fee engine fills them in before
    /// the trade is recorded or emitted.
    pub fn new(
        symbol: &str,
        price: Decimal,
        quantity: Decimal,
        aggressor_side: Side,
        maker_order_id: Uuid,
        taker_order_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            price,
            quantity,
            aggressor_side,
            maker_order_id,
            taker_order_id,
            maker_fee: Decimal::ZERO,
            taker_fee: Decimal::ZERO,
            maker_fee_rate: Decimal::ZERO,
            taker_fee_rate: Decimal::ZERO,
            timestamp: Utc::now(),
        }
    }

    /// Trade notional: price times quantity.
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}
