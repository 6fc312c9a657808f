use rust_decimal::Decimal;
use uuid::Uuid;

/// Errors surfaced by the engine API.
///
/// Validation and liquidity failures are not errors: they produce a terminal
/// (rejected or canceled) order returned from `submit`. Canceling an order
/// that is already terminal reports `OrderNotFound`, same as an unknown id.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("invalid fee rate: {0}")]
    InvalidRate(Decimal),
}
