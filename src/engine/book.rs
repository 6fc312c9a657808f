//! Price-time priority order book for a single trading pair.
//!
//! Both sides are `BTreeMap` ladders keyed by a scaled-integer price; asks
//! iterate forward, bids through `next_back`/`rev`. Each price level keeps its
//! orders in arrival order and caches the sum of their remaining quantities.
//! An id index holding exactly the resting orders gives O(1) cancellation.

use chrono::Utc;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{Bbo, DepthSnapshot, Order, OrderStatus, OrderType, Side, Trade};

/// Price with 8 decimal precision for exact ordering and comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriceKey(i64);

impl PriceKey {
    const SCALE: i64 = 100_000_000;

    pub fn from_decimal(price: Decimal) -> Self {
        let scaled = price * Decimal::from(Self::SCALE);
        let truncated = scaled.trunc();
        let value = truncated.mantissa() / 10i128.pow(truncated.scale());
        PriceKey(value as i64)
    }

    pub fn to_decimal(&self) -> Decimal {
        Decimal::from(self.0) / Decimal::from(Self::SCALE)
    }
}

impl Ord for PriceKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for PriceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// All resting orders at one price on one side, in arrival order.
#[derive(Debug)]
pub struct PriceLevel {
    pub price: Decimal,
    orders: VecDeque<Order>,
    total: Decimal,
}

impl PriceLevel {
    fn new(price: Decimal) -> Self {
        Self {
            price,
            orders: VecDeque::new(),
            total: Decimal::ZERO,
        }
    }

    /// Cached sum of remaining quantities across members.
    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    fn push(&mut self, order: Order) {
        self.total += order.remaining_quantity;
        self.orders.push_back(order);
    }

    fn remove(&mut self, order_id: Uuid) -> Option<Order> {
        let pos = self.orders.iter().position(|o| o.id == order_id)?;
        let order = self.orders.remove(pos)?;
        self.total -= order.remaining_quantity;
        Some(order)
    }

    fn recompute_total(&mut self) {
        self.total = self.orders.iter().map(|o| o.remaining_quantity).sum();
    }
}

/// Result of pushing one order through the matcher.
#[derive(Debug)]
pub struct MatchOutcome {
    /// Final state of the incoming order.
    pub taker: Order,
    /// Trades in execution order, fees not yet stamped.
    pub trades: Vec<Trade>,
    /// Post-fill snapshots of every resting order touched by the walk.
    pub maker_updates: Vec<Order>,
}

/// A single-symbol order book.
pub struct OrderBook {
    symbol: String,
    bids: BTreeMap<PriceKey, PriceLevel>,
    asks: BTreeMap<PriceKey, PriceLevel>,
    /// id -> (side, level) for exactly the orders resting in the ladders.
    resting: HashMap<Uuid, (Side, PriceKey)>,
    /// Recent trades, oldest first, bounded by `trade_capacity`.
    trades: VecDeque<Trade>,
    trade_capacity: usize,
    bbo: Bbo,
}

impl OrderBook {
    pub fn new(symbol: &str, trade_capacity: usize) -> Self {
        info!(symbol, "order book initialized");
        Self {
            symbol: symbol.to_string(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            resting: HashMap::new(),
            trades: VecDeque::new(),
            trade_capacity,
            bbo: Bbo::new(symbol),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Best bid as (price, level total).
    pub fn best_bid(&self) -> Option<(Decimal, Decimal)> {
        self.bids
            .iter()
            .next_back()
            .map(|(_, level)| (level.price, level.total))
    }

    /// Best ask as (price, level total).
    pub fn best_ask(&self) -> Option<(Decimal, Decimal)> {
        self.asks
            .iter()
            .next()
            .map(|(_, level)| (level.price, level.total))
    }

    pub fn bbo(&self) -> Bbo {
        self.bbo.clone()
    }

    /// Number of orders resting in the ladders.
    pub fn resting_count(&self) -> usize {
        self.resting.len()
    }

    pub fn has_order(&self, order_id: &Uuid) -> bool {
        self.resting.contains_key(order_id)
    }

    /// Current state of a resting order.
    pub fn resting_order(&self, order_id: &Uuid) -> Option<&Order> {
        let (side, key) = self.resting.get(order_id)?;
        let level = match side {
            Side::Buy => self.bids.get(key)?,
            Side::Sell => self.asks.get(key)?,
        };
        level.orders.iter().find(|o| o.id == *order_id)
    }

    /// Push an incoming order through the matcher.
    ///
    /// Handles marketability, the FOK dry-walk, the price-time walk, and
    /// per-variant residual treatment, then refreshes the cached BBO. Trades
    /// come back fee-less; the engine stamps and records them.
    pub fn execute(&mut self, mut order: Order) -> MatchOutcome {
        let mut trades = Vec::new();
        let mut maker_updates = Vec::new();

        // A market order needs resting liquidity on the other side.
        if order.order_type == OrderType::Market && self.opposite_empty(order.side) {
            warn!(symbol = %self.symbol, order_id = %order.id, "market order rejected: no liquidity");
            order.status = OrderStatus::Rejected;
            return MatchOutcome {
                taker: order,
                trades,
                maker_updates,
            };
        }

        let best = self.best_opposite_price(order.side);
        if order.is_marketable(best) {
            if order.order_type == OrderType::Fok && !self.can_fully_fill(&order) {
                debug!(order_id = %order.id, "fok order unfillable, canceled untouched");
                order.status = OrderStatus::Canceled;
                return MatchOutcome {
                    taker: order,
                    trades,
                    maker_updates,
                };
            }

            self.match_into(&mut order, &mut trades, &mut maker_updates);

            // Any unfilled IOC residual is discarded.
            if order.order_type == OrderType::Ioc && order.remaining_quantity > Decimal::ZERO {
                order.status = if order.filled_quantity.is_zero() {
                    OrderStatus::Canceled
                } else {
                    OrderStatus::PartiallyFilled
                };
                order.remaining_quantity = Decimal::ZERO;
            }
        } else if matches!(order.order_type, OrderType::Ioc | OrderType::Fok) {
            // Nothing is immediately executable at the cap: zero fills.
            order.status = OrderStatus::Canceled;
            if order.order_type == OrderType::Ioc {
                order.remaining_quantity = Decimal::ZERO;
            }
            return MatchOutcome {
                taker: order,
                trades,
                maker_updates,
            };
        }

        if order.order_type == OrderType::Limit && order.remaining_quantity > Decimal::ZERO {
            self.insert(order.clone());
        }

        self.update_bbo();

        MatchOutcome {
            taker: order,
            trades,
            maker_updates,
        }
    }

    /// Cancel a resting order. Unknown ids return `None` without mutation.
    pub fn cancel(&mut self, order_id: Uuid) -> Option<Order> {
        let (side, key) = self.resting.remove(&order_id)?;

        let side_map = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        // The index and the ladders move together; a dangling entry means the
        // book is corrupt.
        let level = side_map
            .get_mut(&key)
            .expect("resting index points at a live level");
        let mut order = level
            .remove(order_id)
            .expect("resting index points at a live order");
        if level.is_empty() {
            side_map.remove(&key);
        }

        order.status = OrderStatus::Canceled;
        self.update_bbo();
        info!(symbol = %self.symbol, %order_id, "order canceled");
        Some(order)
    }

    /// Seed a resting order without matching, used on state restore.
    pub fn restore(&mut self, order: Order) {
        self.insert(order);
        self.update_bbo();
    }

    /// L2 snapshot: up to `depth` levels per side as [price, total] pairs,
    /// bids descending, asks ascending.
    pub fn depth_snapshot(&self, depth: usize) -> DepthSnapshot {
        let bids = self
            .bids
            .iter()
            .rev()
            .take(depth)
            .map(|(_, level)| [level.price, level.total])
            .collect();
        let asks = self
            .asks
            .iter()
            .take(depth)
            .map(|(_, level)| [level.price, level.total])
            .collect();

        DepthSnapshot {
            symbol: self.symbol.clone(),
            timestamp: Utc::now().timestamp_millis(),
            bids,
            asks,
        }
    }

    /// Append a fee-stamped trade to the bounded history ring.
    pub fn record_trade(&mut self, trade: Trade) {
        if self.trades.len() == self.trade_capacity {
            self.trades.pop_front();
        }
        self.trades.push_back(trade);
    }

    /// Recent trades, newest first.
    pub fn recent_trades(&self, limit: usize) -> Vec<Trade> {
        self.trades.iter().rev().take(limit).cloned().collect()
    }

    fn opposite_empty(&self, side: Side) -> bool {
        match side {
            Side::Buy => self.asks.is_empty(),
            Side::Sell => self.bids.is_empty(),
        }
    }

    fn best_opposite_price(&self, side: Side) -> Option<Decimal> {
        match side {
            Side::Buy => self.best_ask().map(|(price, _)| price),
            Side::Sell => self.best_bid().map(|(price, _)| price),
        }
    }

    /// Dry-walk the opposite side to decide whether a FOK order can be fully
    /// covered at acceptable prices.
    fn can_fully_fill(&self, order: &Order) -> bool {
        let mut required = order.remaining_quantity;
        let levels: Box<dyn Iterator<Item = &PriceLevel> + '_> = match order.side {
            Side::Buy => Box::new(self.asks.values()),
            Side::Sell => Box::new(self.bids.values().rev()),
        };

        for level in levels {
            if let Some(cap) = order.price_cap() {
                let acceptable = match order.side {
                    Side::Buy => level.price <= cap,
                    Side::Sell => level.price >= cap,
                };
                if !acceptable {
                    break;
                }
            }

            required -= level.total;
            if required <= Decimal::ZERO {
                return true;
            }
        }

        false
    }

    /// Walk the opposite side best-first, filling FIFO within each level.
    fn match_into(
        &mut self,
        order: &mut Order,
        trades: &mut Vec<Trade>,
        maker_updates: &mut Vec<Order>,
    ) {
        let symbol = self.symbol.clone();
        let keys: Vec<PriceKey> = match order.side {
            Side::Buy => self.asks.keys().cloned().collect(),
            Side::Sell => self.bids.keys().rev().cloned().collect(),
        };

        for key in keys {
            if order.remaining_quantity <= Decimal::ZERO {
                break;
            }

            let level_price = key.to_decimal();
            if let Some(cap) = order.price_cap() {
                let acceptable = match order.side {
                    Side::Buy => level_price <= cap,
                    Side::Sell => level_price >= cap,
                };
                if !acceptable {
                    break;
                }
            }

            let side_map = match order.side {
                Side::Buy => &mut self.asks,
                Side::Sell => &mut self.bids,
            };
            let level = match side_map.get_mut(&key) {
                Some(level) => level,
                None => continue,
            };

            while let Some(maker) = level.orders.front_mut() {
                if order.remaining_quantity <= Decimal::ZERO {
                    break;
                }

                let fill = order.remaining_quantity.min(maker.remaining_quantity);
                order.fill(fill);
                maker.fill(fill);

                let trade = Trade::new(&symbol, level_price, fill, order.side, maker.id, order.id);
                debug!(
                    trade_id = %trade.id,
                    price = %level_price,
                    quantity = %fill,
                    maker = %maker.id,
                    taker = %order.id,
                    "trade executed"
                );
                trades.push(trade);

                if maker.remaining_quantity <= Decimal::ZERO {
                    let filled = level.orders.pop_front().expect("front maker exists");
                    self.resting.remove(&filled.id);
                    maker_updates.push(filled);
                } else {
                    maker_updates.push(maker.clone());
                }
            }

            level.recompute_total();
            if level.is_empty() {
                side_map.remove(&key);
            }
        }
    }

    /// Rest an order at its price, appended behind earlier arrivals.
    fn insert(&mut self, order: Order) {
        let price = order.price.expect("resting order carries a price");
        let key = PriceKey::from_decimal(price);
        let side_map = match order.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };

        self.resting.insert(order.id, (order.side, key));
        debug!(symbol = %self.symbol, order_id = %order.id, %price, "order rested");
        side_map
            .entry(key)
            .or_insert_with(|| PriceLevel::new(price))
            .push(order);
    }

    /// Refresh the cached BBO from the heads of both sides.
    fn update_bbo(&mut self) {
        let (bid_price, bid_quantity) = match self.best_bid() {
            Some((price, total)) => (Some(price), Some(total)),
            None => (None, None),
        };
        let (ask_price, ask_quantity) = match self.best_ask() {
            Some((price, total)) => (Some(price), Some(total)),
            None => (None, None),
        };

        let changed = self.bbo.bid_price != bid_price
            || self.bbo.bid_quantity != bid_quantity
            || self.bbo.ask_price != ask_price
            || self.bbo.ask_quantity != ask_quantity;

        if changed {
            self.bbo.bid_price = bid_price;
            self.bbo.bid_quantity = bid_quantity;
            self.bbo.ask_price = ask_price;
            self.bbo.ask_quantity = ask_quantity;
            self.bbo.timestamp = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderDraft;
    use rust_decimal_macros::dec;

    fn order(
        order_type: OrderType,
        side: Side,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Order {
        Order::from_draft(OrderDraft {
            symbol: "BTC-USDT".to_string(),
            order_type,
            side,
            quantity,
            price,
            stop_price: None,
            limit_price: None,
        })
    }

    fn limit(side: Side, quantity: Decimal, price: Decimal) -> Order {
        order(OrderType::Limit, side, quantity, Some(price))
    }

    #[test]
    fn test_rest_and_cancel() {
        let mut book = OrderBook::new("BTC-USDT", 100);
        let o = limit(Side::Buy, dec!(1.0), dec!(100.0));
        let id = o.id;

        let outcome = book.execute(o);
        assert_eq!(outcome.taker.status, OrderStatus::Open);
        assert!(outcome.trades.is_empty());
        assert!(book.has_order(&id));
        assert_eq!(book.resting_count(), 1);

        let canceled = book.cancel(id).unwrap();
        assert_eq!(canceled.status, OrderStatus::Canceled);
        assert!(!book.has_order(&id));
        assert_eq!(book.best_bid(), None);

        // Unknown id: no-op.
        assert!(book.cancel(id).is_none());
    }

    #[test]
    fn test_best_bid_ask_and_bbo() {
        let mut book = OrderBook::new("BTC-USDT", 100);
        book.execute(limit(Side::Buy, dec!(1.0), dec!(100.0)));
        book.execute(limit(Side::Buy, dec!(2.0), dec!(101.0)));
        book.execute(limit(Side::Sell, dec!(1.0), dec!(102.0)));
        book.execute(limit(Side::Sell, dec!(1.0), dec!(103.0)));

        assert_eq!(book.best_bid(), Some((dec!(101.0), dec!(2.0))));
        assert_eq!(book.best_ask(), Some((dec!(102.0), dec!(1.0))));

        let bbo = book.bbo();
        assert_eq!(bbo.bid_price, Some(dec!(101.0)));
        assert_eq!(bbo.bid_quantity, Some(dec!(2.0)));
        assert_eq!(bbo.ask_price, Some(dec!(102.0)));
        assert_eq!(bbo.ask_quantity, Some(dec!(1.0)));
    }

    #[test]
    fn test_match_walks_price_levels() {
        let mut book = OrderBook::new("BTC-USDT", 100);
        let ask1 = limit(Side::Sell, dec!(1.0), dec!(100.0));
        let ask2 = limit(Side::Sell, dec!(2.0), dec!(101.0));
        let (ask1_id, ask2_id) = (ask1.id, ask2.id);
        book.execute(ask1);
        book.execute(ask2);

        let outcome = book.execute(limit(Side::Buy, dec!(1.5), dec!(101.0)));

        assert_eq!(outcome.trades.len(), 2);
        assert_eq!(outcome.trades[0].price, dec!(100.0));
        assert_eq!(outcome.trades[0].quantity, dec!(1.0));
        assert_eq!(outcome.trades[0].maker_order_id, ask1_id);
        assert_eq!(outcome.trades[1].price, dec!(101.0));
        assert_eq!(outcome.trades[1].quantity, dec!(0.5));
        assert_eq!(outcome.trades[1].maker_order_id, ask2_id);

        assert_eq!(outcome.taker.status, OrderStatus::Filled);
        assert!(!book.has_order(&ask1_id));
        assert!(book.has_order(&ask2_id));
        assert_eq!(
            book.resting_order(&ask2_id).unwrap().remaining_quantity,
            dec!(1.5)
        );
        // Cached level total tracks the partial fill.
        assert_eq!(book.best_ask(), Some((dec!(101.0), dec!(1.5))));
    }

    #[test]
    fn test_limit_respects_price_cap() {
        let mut book = OrderBook::new("BTC-USDT", 100);
        book.execute(limit(Side::Sell, dec!(1.0), dec!(100.0)));
        book.execute(limit(Side::Sell, dec!(1.0), dec!(105.0)));

        let outcome = book.execute(limit(Side::Buy, dec!(2.0), dec!(100.0)));

        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.taker.status, OrderStatus::PartiallyFilled);
        // Residual rests as the new best bid.
        assert_eq!(book.best_bid(), Some((dec!(100.0), dec!(1.0))));
        assert_eq!(book.best_ask(), Some((dec!(105.0), dec!(1.0))));
    }

    #[test]
    fn test_market_rejected_on_empty_book() {
        let mut book = OrderBook::new("BTC-USDT", 100);
        let outcome = book.execute(order(OrderType::Market, Side::Buy, dec!(1.0), None));
        assert_eq!(outcome.taker.status, OrderStatus::Rejected);
        assert!(outcome.trades.is_empty());
    }

    #[test]
    fn test_market_partial_on_exhausted_book() {
        let mut book = OrderBook::new("BTC-USDT", 100);
        book.execute(limit(Side::Sell, dec!(0.5), dec!(100.0)));

        let outcome = book.execute(order(OrderType::Market, Side::Buy, dec!(2.0), None));
        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.taker.status, OrderStatus::PartiallyFilled);
        assert_eq!(outcome.taker.filled_quantity, dec!(0.5));
        assert_eq!(outcome.taker.remaining_quantity, dec!(1.5));
        assert_eq!(book.best_ask(), None);
    }

    #[test]
    fn test_fok_dry_walk() {
        let mut book = OrderBook::new("BTC-USDT", 100);
        book.execute(limit(Side::Sell, dec!(0.5), dec!(100.0)));

        // Cannot cover 1.0: canceled untouched, book unchanged.
        let outcome = book.execute(order(OrderType::Fok, Side::Buy, dec!(1.0), Some(dec!(100.0))));
        assert!(outcome.trades.is_empty());
        assert_eq!(outcome.taker.status, OrderStatus::Canceled);
        assert_eq!(outcome.taker.remaining_quantity, dec!(1.0));
        assert_eq!(book.best_ask(), Some((dec!(100.0), dec!(0.5))));

        // Add liquidity beyond the cap: still unfillable at acceptable prices.
        book.execute(limit(Side::Sell, dec!(5.0), dec!(101.0)));
        let outcome = book.execute(order(OrderType::Fok, Side::Buy, dec!(1.0), Some(dec!(100.0))));
        assert_eq!(outcome.taker.status, OrderStatus::Canceled);

        // Fillable within the cap: fully filled atomically.
        book.execute(limit(Side::Sell, dec!(0.5), dec!(100.0)));
        let outcome = book.execute(order(OrderType::Fok, Side::Buy, dec!(1.0), Some(dec!(100.0))));
        assert_eq!(outcome.trades.len(), 2);
        assert_eq!(outcome.taker.status, OrderStatus::Filled);
    }

    #[test]
    fn test_ioc_residual_discarded() {
        let mut book = OrderBook::new("BTC-USDT", 100);
        book.execute(limit(Side::Sell, dec!(1.0), dec!(100.0)));

        let outcome = book.execute(order(OrderType::Ioc, Side::Buy, dec!(2.0), Some(dec!(100.0))));
        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.taker.status, OrderStatus::PartiallyFilled);
        assert_eq!(outcome.taker.filled_quantity, dec!(1.0));
        assert_eq!(outcome.taker.remaining_quantity, dec!(0));
        // Nothing rests.
        assert_eq!(book.resting_count(), 0);
    }

    #[test]
    fn test_ioc_unmarketable_cancels_with_zero_fills() {
        let mut book = OrderBook::new("BTC-USDT", 100);
        book.execute(limit(Side::Sell, dec!(1.0), dec!(101.0)));

        let outcome = book.execute(order(OrderType::Ioc, Side::Buy, dec!(1.0), Some(dec!(100.0))));
        assert!(outcome.trades.is_empty());
        assert_eq!(outcome.taker.status, OrderStatus::Canceled);
        assert_eq!(outcome.taker.filled_quantity, dec!(0));
    }

    #[test]
    fn test_time_priority_within_level() {
        let mut book = OrderBook::new("BTC-USDT", 100);
        let first = limit(Side::Sell, dec!(1.0), dec!(100.0));
        let second = limit(Side::Sell, dec!(1.0), dec!(100.0));
        let (first_id, second_id) = (first.id, second.id);
        book.execute(first);
        book.execute(second);

        let outcome = book.execute(order(OrderType::Market, Side::Buy, dec!(1.0), None));
        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].maker_order_id, first_id);
        assert!(!book.has_order(&first_id));
        assert!(book.has_order(&second_id));
    }

    #[test]
    fn test_depth_snapshot_ordering() {
        let mut book = OrderBook::new("BTC-USDT", 100);
        book.execute(limit(Side::Buy, dec!(1.0), dec!(99.0)));
        book.execute(limit(Side::Buy, dec!(2.0), dec!(100.0)));
        book.execute(limit(Side::Buy, dec!(3.0), dec!(100.0)));
        book.execute(limit(Side::Sell, dec!(1.5), dec!(102.0)));
        book.execute(limit(Side::Sell, dec!(1.0), dec!(103.0)));

        let snapshot = book.depth_snapshot(10);
        assert_eq!(
            snapshot.bids,
            vec![[dec!(100.0), dec!(5.0)], [dec!(99.0), dec!(1.0)]]
        );
        assert_eq!(
            snapshot.asks,
            vec![[dec!(102.0), dec!(1.5)], [dec!(103.0), dec!(1.0)]]
        );

        // Depth truncation.
        let snapshot = book.depth_snapshot(1);
        assert_eq!(snapshot.bids.len(), 1);
        assert_eq!(snapshot.asks.len(), 1);
    }

    #[test]
    fn test_trade_ring_bounded_newest_first() {
        let mut book = OrderBook::new("BTC-USDT", 2);
        for i in 1..=3u32 {
            book.execute(limit(Side::Sell, dec!(1.0), Decimal::from(100 + i)));
            let outcome = book.execute(order(OrderType::Market, Side::Buy, dec!(1.0), None));
            book.record_trade(outcome.trades[0].clone());
        }

        let recent = book.recent_trades(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].price, dec!(103));
        assert_eq!(recent[1].price, dec!(102));
    }

    #[test]
    fn test_price_key_roundtrip() {
        let price = dec!(97500.12345678);
        let key = PriceKey::from_decimal(price);
        assert_eq!(key.to_decimal(), price);

        assert!(PriceKey::from_decimal(dec!(100.0)) < PriceKey::from_decimal(dec!(200.0)));
        assert_eq!(
            PriceKey::from_decimal(dec!(100.0)),
            PriceKey::from_decimal(dec!(100.00))
        );
    }
}
