//! Domain models shared across the engine: orders, trades, and market data.

pub mod market_data;
pub mod order;
pub mod trade;

pub use market_data::{Bbo, DepthSnapshot};
pub use order::{Order, OrderDraft, OrderStatus, OrderType, Side};
pub use trade::Trade;

/// Serialize a `DateTime<Utc>` as a millisecond timestamp.
pub(crate) mod datetime_as_millis {
    use chrono::{DateTime, Utc};
    use serde::Serializer;

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(dt.timestamp_millis())
    }
}
