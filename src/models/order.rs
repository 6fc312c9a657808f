use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::datetime_as_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side an order matches against.
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Ioc,
    Fok,
    StopLoss,
    StopLimit,
    TakeProfit,
}

impl OrderType {
    /// Conditional variants rest in the trigger table until activated.
    pub fn is_conditional(&self) -> bool {
        matches!(
            self,
            OrderType::StopLoss | OrderType::StopLimit | OrderType::TakeProfit
        )
    }

    /// Variants that carry an executable limit price.
    pub fn has_price_cap(&self) -> bool {
        matches!(self, OrderType::Limit | OrderType::Ioc | OrderType::Fok)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "market"),
            OrderType::Limit => write!(f, "limit"),
            OrderType::Ioc => write!(f, "ioc"),
            OrderType::Fok => write!(f, "fok"),
            OrderType::StopLoss => write!(f, "stop_loss"),
            OrderType::StopLimit => write!(f, "stop_limit"),
            OrderType::TakeProfit => write!(f, "take_profit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    PendingTrigger,
}

impl OrderStatus {
    /// Terminal orders are never re-introduced to the book or trigger table.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Open => write!(f, "open"),
            OrderStatus::PartiallyFilled => write!(f, "partially_filled"),
            OrderStatus::Filled => write!(f, "filled"),
            OrderStatus::Canceled => write!(f, "canceled"),
            OrderStatus::Rejected => write!(f, "rejected"),
            OrderStatus::PendingTrigger => write!(f, "pending_trigger"),
        }
    }
}

/// An order admitted to the engine.
///
/// Mutated only by the matcher (fills), the cancel path, or the trigger
/// promoter (variant/price/status rewrite on activation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: Side,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub remaining_quantity: Decimal,
    /// Executable limit price. Required for limit/ioc/fok; set on a
    /// stop_limit when it is promoted.
    pub price: Option<Decimal>,
    /// Activation threshold for stop/take-profit variants.
    pub stop_price: Option<Decimal>,
    /// Post-trigger limit price for stop_limit orders.
    pub limit_price: Option<Decimal>,
    pub status: OrderStatus,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Build an order from a validated draft. Conditional variants start
    /// pending; everything else starts open.
    pub fn from_draft(draft: OrderDraft) -> Self {
        let status = if draft.order_type.is_conditional() {
            OrderStatus::PendingTrigger
        } else {
            OrderStatus::Open
        };

        Self {
            id: Uuid::new_v4(),
            symbol: draft.symbol,
            order_type: draft.order_type,
            side: draft.side,
            quantity: draft.quantity,
            filled_quantity: Decimal::ZERO,
            remaining_quantity: draft.quantity,
            price: draft.price,
            stop_price: draft.stop_price,
            limit_price: draft.limit_price,
            status,
            created_at: Utc::now(),
        }
    }

    /// The limit price the matcher must respect, if any.
    pub fn price_cap(&self) -> Option<Decimal> {
        if self.order_type.has_price_cap() {
            self.price
        } else {
            None
        }
    }

    /// Check whether this order crosses the given best opposite price.
    pub fn is_marketable(&self, best_price: Option<Decimal>) -> bool {
        if self.order_type == OrderType::Market {
            return true;
        }
        let (best, price) = match (best_price, self.price) {
            (Some(b), Some(p)) => (b, p),
            _ => return false,
        };
        match self.side {
            Side::Buy => price >= best,
            Side::Sell => price <= best,
        }
    }

    /// Apply a fill to this order.
    pub fn fill(&mut self, qty: Decimal) {
        self.filled_quantity += qty;
        self.remaining_quantity -= qty;

        if self.remaining_quantity <= Decimal::ZERO {
            self.status = OrderStatus::Filled;
        } else {
            self.status = OrderStatus::PartiallyFilled;
        }
    }

    /// Check whether a pending stop/take-profit order is activated by the
    /// last trade price.
    ///
    /// Stop orders arm against adverse movement: a buy stop fires when the
    /// price rises to or above the stop price, a sell stop when it falls to
    /// or below. Take-profits fire in the opposite direction.
    pub fn is_triggered(&self, last_price: Decimal) -> bool {
        if self.status != OrderStatus::PendingTrigger {
            return false;
        }
        let stop = match self.stop_price {
            Some(s) => s,
            None => return false,
        };

        match self.order_type {
            OrderType::StopLoss | OrderType::StopLimit => match self.side {
                Side::Buy => last_price >= stop,
                Side::Sell => last_price <= stop,
            },
            OrderType::TakeProfit => match self.side {
                Side::Buy => last_price <= stop,
                Side::Sell => last_price >= stop,
            },
            _ => false,
        }
    }
}

/// Order submission request, validated before an order identity is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDraft {
    pub symbol: String,
    pub order_type: OrderType,
    pub side: Side,
    pub quantity: Decimal,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
}

impl OrderDraft {
    /// Check required fields per variant. Returns the rejection reason.
    pub fn validate(&self) -> Result<(), String> {
        if self.symbol.is_empty() {
            return Err("missing symbol".to_string());
        }
        if self.quantity <= Decimal::ZERO {
            return Err(format!("non-positive quantity: {}", self.quantity));
        }

        // Price-like fields must be positive whenever present, required or not.
        for (name, value) in [
            ("price", self.price),
            ("stop_price", self.stop_price),
            ("limit_price", self.limit_price),
        ] {
            if let Some(v) = value {
                if v <= Decimal::ZERO {
                    return Err(format!("non-positive {name}: {v}"));
                }
            }
        }

        if self.order_type.has_price_cap() {
            match self.price {
                Some(p) if p > Decimal::ZERO => {}
                _ => {
                    return Err(format!(
                        "{} order requires a positive price",
                        self.order_type
                    ))
                }
            }
        }

        if self.order_type.is_conditional() {
            match self.stop_price {
                Some(p) if p > Decimal::ZERO => {}
                _ => {
                    return Err(format!(
                        "{} order requires a positive stop price",
                        self.order_type
                    ))
                }
            }
        }

        if self.order_type == OrderType::StopLimit {
            match self.limit_price {
                Some(p) if p > Decimal::ZERO => {}
                _ => return Err("stop_limit order requires a positive limit price".to_string()),
            }
        }

        Ok(())
    }
}
