use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::datetime_as_millis;

/// Best Bid and Offer for a symbol.
///
/// Cached on the book and recomputed after every mutation; `None` sides mean
/// that half of the book is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bbo {
    pub symbol: String,
    pub bid_price: Option<Decimal>,
    pub bid_quantity: Option<Decimal>,
    pub ask_price: Option<Decimal>,
    pub ask_quantity: Option<Decimal>,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub timestamp: DateTime<Utc>,
}

impl Bbo {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            bid_price: None,
            bid_quantity: None,
            ask_price: None,
            ask_quantity: None,
            timestamp: Utc::now(),
        }
    }

    /// Quote comparison, ignoring the timestamp.
    pub fn same_quotes(&self, other: &Bbo) -> bool {
        self.bid_price == other.bid_price
            && self.bid_quantity == other.bid_quantity
            && self.ask_price == other.ask_price
            && self.ask_quantity == other.ask_quantity
    }
}

/// Aggregated L2 depth view: per-price totals, no order identities.
///
/// Bids are sorted descending by price, asks ascending, each side truncated
/// to the requested depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub symbol: String,
    pub timestamp: i64,
    pub bids: Vec<[Decimal; 2]>,
    pub asks: Vec<[Decimal; 2]>,
}
