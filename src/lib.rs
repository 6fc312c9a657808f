//! Central-limit order book matching core.
//!
//! Per-symbol price-time priority matching with market/limit/IOC/FOK orders,
//! a trigger table for stop-loss, stop-limit, and take-profit orders, a
//! maker/taker fee engine, and broadcast market-data streams. The HTTP/WS
//! edge, authentication, and the durable store live outside this crate and
//! consume it through [`MatchingEngine`] and the [`persistence::EngineStore`]
//! interface.
//!
//! # Usage
//!
//! ```rust
//! use clob_engine::{MatchingEngine, OrderDraft, OrderType, Side};
//! use rust_decimal_macros::dec;
//!
//! let engine = MatchingEngine::new();
//!
//! let (trades, order) = engine.submit(OrderDraft {
//!     symbol: "BTC-USDT".to_string(),
//!     order_type: OrderType::Limit,
//!     side: Side::Buy,
//!     quantity: dec!(1.0),
//!     price: Some(dec!(50000)),
//!     stop_price: None,
//!     limit_price: None,
//! });
//! assert!(trades.is_empty());
//!
//! let bbo = engine.bbo("BTC-USDT").unwrap();
//! assert_eq!(bbo.bid_price, Some(dec!(50000)));
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod fees;
pub mod models;
pub mod persistence;

pub use config::EngineConfig;
pub use engine::{EngineStats, MatchingEngine};
pub use error::EngineError;
pub use events::{spawn_depth_broadcaster, EventBus};
pub use fees::{FeeEngine, FeeSchedule};
pub use models::{Bbo, DepthSnapshot, Order, OrderDraft, OrderStatus, OrderType, Side, Trade};
pub use persistence::{EngineStore, StoredState};
