//! Order matching engine.
//!
//! # Architecture
//!
//! ```text
//! submit / cancel
//!   ↓
//! MatchingEngine (symbol registry, per-symbol serial point)
//!   ├→ OrderBook (price-time priority matching, one per symbol)
//!   ├→ TriggerTable (pending stop/take-profit orders, one per symbol)
//!   ├→ FeeEngine (stamps maker/taker fees on every trade)
//!   ├→ EventBus (trade / BBO / depth broadcast streams)
//!   └→ EngineStore (optional async-agnostic persistence sink)
//! ```
//!
//! All mutating operations on a symbol run under that symbol's mutex, so
//! matching plus the trigger drain form one critical section: trades from a
//! submit are emitted contiguously, and triggered orders re-enter the book
//! before the submit returns. Reads go through the lock-free order archive or
//! take the same mutex briefly.

mod book;
mod triggers;

pub use book::{MatchOutcome, OrderBook, PriceKey, PriceLevel};
pub use triggers::TriggerTable;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::EventBus;
use crate::fees::{FeeEngine, FeeSchedule};
use crate::models::{Bbo, DepthSnapshot, Order, OrderDraft, OrderStatus, Trade};
use crate::persistence::{EngineStore, StoredState};

/// Book plus trigger table for one symbol, guarded by one mutex.
struct SymbolState {
    book: OrderBook,
    triggers: TriggerTable,
}

impl SymbolState {
    fn new(symbol: &str, trade_capacity: usize) -> Self {
        Self {
            book: OrderBook::new(symbol, trade_capacity),
            triggers: TriggerTable::new(),
        }
    }
}

/// Engine-wide counters.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub symbols: usize,
    pub resting_orders: usize,
    pub pending_triggers: usize,
    pub total_orders: usize,
}

/// Multi-symbol matching engine: the single entry point for order flow.
pub struct MatchingEngine {
    config: EngineConfig,
    books: DashMap<String, Arc<Mutex<SymbolState>>>,
    /// Every admitted order in its latest observed state, keyed by id.
    orders: DashMap<Uuid, Order>,
    fees: FeeEngine,
    events: EventBus,
    store: RwLock<Option<Arc<dyn EngineStore>>>,
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchingEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let fees = FeeEngine::new(config.default_maker_rate, config.default_taker_rate);
        let events = EventBus::new(config.event_capacity);
        info!("matching engine initialized");
        Self {
            config,
            books: DashMap::new(),
            orders: DashMap::new(),
            fees,
            events,
            store: RwLock::new(None),
        }
    }

    /// Attach a durable store. Every subsequent order-state change and trade
    /// is forwarded to it.
    pub fn attach_store(&self, store: Arc<dyn EngineStore>) {
        *self.store.write() = Some(store);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe_trades(&self) -> broadcast::Receiver<Trade> {
        self.events.subscribe_trades()
    }

    pub fn subscribe_bbo(&self) -> broadcast::Receiver<Bbo> {
        self.events.subscribe_bbo()
    }

    pub fn subscribe_depth(&self) -> broadcast::Receiver<DepthSnapshot> {
        self.events.subscribe_depth()
    }

    // ========================================================================
    // Order flow
    // ========================================================================

    /// Submit an order.
    ///
    /// Invalid drafts come back as a `Rejected` order with no trades and no
    /// stored identity. Conditional variants park in the trigger table.
    /// Everything else goes through the matcher; returned trades are the
    /// aggressor's own, in execution order, fees stamped.
    pub fn submit(&self, draft: OrderDraft) -> (Vec<Trade>, Order) {
        if let Err(reason) = draft.validate() {
            warn!(symbol = %draft.symbol, %reason, "order rejected");
            let mut order = Order::from_draft(draft);
            order.status = OrderStatus::Rejected;
            return (Vec::new(), order);
        }

        let order = Order::from_draft(draft);
        info!(
            order_id = %order.id,
            symbol = %order.symbol,
            side = %order.side,
            order_type = %order.order_type,
            quantity = %order.quantity,
            "order admitted"
        );

        let state = self.state(&order.symbol);
        let mut state = state.lock();

        if order.order_type.is_conditional() {
            self.record_order(&order);
            state.triggers.insert(order.clone());
            return (Vec::new(), order);
        }

        let bbo_before = state.book.bbo();

        let outcome = state.book.execute(order);
        for maker in &outcome.maker_updates {
            self.record_order(maker);
        }
        if outcome.taker.status != OrderStatus::Rejected {
            self.record_order(&outcome.taker);
        }

        let trades = self.settle_trades(&mut state, outcome.trades);
        if let Some(last) = trades.last() {
            let last_price = last.price;
            self.drain_triggers(&mut state, last_price);
        }

        self.emit_bbo_change(&state, &bbo_before);
        (trades, outcome.taker)
    }

    /// Cancel an order by id.
    ///
    /// Works from the book or the trigger table; unknown ids and orders that
    /// already reached a terminal state report `OrderNotFound`.
    pub fn cancel(&self, order_id: Uuid) -> Result<Order, EngineError> {
        let archived = self
            .orders
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .ok_or(EngineError::OrderNotFound(order_id))?;
        if archived.status.is_terminal() {
            return Err(EngineError::OrderNotFound(order_id));
        }

        let state = self.state(&archived.symbol);
        let mut state = state.lock();

        let canceled = if archived.status == OrderStatus::PendingTrigger {
            state.triggers.cancel(order_id)
        } else {
            let bbo_before = state.book.bbo();
            let canceled = state.book.cancel(order_id);
            self.emit_bbo_change(&state, &bbo_before);
            canceled
        };

        // The archive may lag the book by one operation; the book is
        // authoritative.
        let canceled = canceled.ok_or(EngineError::OrderNotFound(order_id))?;
        self.record_order(&canceled);
        Ok(canceled)
    }

    // ========================================================================
    // Read-only views
    // ========================================================================

    /// Latest observed state of an order.
    pub fn get_order(&self, order_id: Uuid) -> Option<Order> {
        self.orders.get(&order_id).map(|entry| entry.value().clone())
    }

    pub fn bbo(&self, symbol: &str) -> Option<Bbo> {
        let state = self.existing_state(symbol)?;
        let state = state.lock();
        Some(state.book.bbo())
    }

    pub fn depth_snapshot(&self, symbol: &str, depth: usize) -> Option<DepthSnapshot> {
        let state = self.existing_state(symbol)?;
        let state = state.lock();
        Some(state.book.depth_snapshot(depth))
    }

    /// Recent trades for a symbol, newest first.
    pub fn recent_trades(&self, symbol: &str, limit: usize) -> Vec<Trade> {
        match self.existing_state(symbol) {
            Some(state) => {
                let state = state.lock();
                state.book.recent_trades(limit)
            }
            None => Vec::new(),
        }
    }

    /// Take an L2 snapshot and publish it on the depth stream.
    pub fn publish_depth(&self, symbol: &str, depth: usize) -> Option<DepthSnapshot> {
        let snapshot = self.depth_snapshot(symbol, depth)?;
        self.events.emit_depth(snapshot.clone());
        Some(snapshot)
    }

    pub fn stats(&self) -> EngineStats {
        let mut resting_orders = 0;
        let mut pending_triggers = 0;
        for entry in self.books.iter() {
            let state = entry.value().lock();
            resting_orders += state.book.resting_count();
            pending_triggers += state.triggers.len();
        }
        EngineStats {
            symbols: self.books.len(),
            resting_orders,
            pending_triggers,
            total_orders: self.orders.len(),
        }
    }

    // ========================================================================
    // Fee schedules
    // ========================================================================

    pub fn set_fee_schedule(
        &self,
        symbol: &str,
        maker_rate: Decimal,
        taker_rate: Decimal,
    ) -> Result<FeeSchedule, EngineError> {
        let schedule = self.fees.set_schedule(symbol, maker_rate, taker_rate)?;
        if let Some(store) = self.store.read().as_ref() {
            if let Err(e) = store.save_fee_schedule(&schedule) {
                error!(symbol, "failed to persist fee schedule: {e:#}");
            }
        }
        Ok(schedule)
    }

    pub fn get_fee_schedule(&self, symbol: &str) -> FeeSchedule {
        self.fees.schedule_for(symbol)
    }

    pub fn set_default_rates(
        &self,
        maker_rate: Decimal,
        taker_rate: Decimal,
    ) -> Result<(), EngineError> {
        self.fees.set_default_rates(maker_rate, taker_rate)?;
        if let Some(store) = self.store.read().as_ref() {
            if let Err(e) = store.save_default_rates(maker_rate, taker_rate) {
                error!("failed to persist default fee rates: {e:#}");
            }
        }
        Ok(())
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Dump the full engine state to the attached store.
    pub fn save_state(&self) -> anyhow::Result<()> {
        let guard = self.store.read();
        let store = match guard.as_ref() {
            Some(store) => store,
            None => return Ok(()),
        };

        for entry in self.orders.iter() {
            store.save_order(entry.value())?;
        }
        for entry in self.books.iter() {
            let state = entry.value().lock();
            // Oldest first, so a replaying store keeps chronological order.
            for trade in state.book.recent_trades(usize::MAX).into_iter().rev() {
                store.save_trade(&trade)?;
            }
        }
        for schedule in self.fees.schedules() {
            store.save_fee_schedule(&schedule)?;
        }
        let (maker_rate, taker_rate) = self.fees.default_rates();
        store.save_default_rates(maker_rate, taker_rate)?;

        info!("engine state saved");
        Ok(())
    }

    /// Rebuild the engine from the attached store.
    pub fn load_state(&self) -> anyhow::Result<()> {
        let stored = {
            let guard = self.store.read();
            match guard.as_ref() {
                Some(store) => store.load_state()?,
                None => return Ok(()),
            }
        };
        self.restore(stored);
        info!("engine state loaded");
        Ok(())
    }

    /// Seed books, trigger tables, fee schedules, and the order archive from
    /// a stored snapshot. Resting orders are placed without matching.
    pub fn restore(&self, stored: StoredState) {
        if let Some((maker_rate, taker_rate)) = stored.default_rates {
            if let Err(e) = self.fees.set_default_rates(maker_rate, taker_rate) {
                warn!("stored default rates ignored: {e}");
            }
        }
        for schedule in stored.fee_schedules {
            self.fees.insert_schedule(schedule);
        }

        for order in stored.orders {
            self.orders.insert(order.id, order.clone());
            match order.status {
                OrderStatus::PendingTrigger => {
                    let state = self.state(&order.symbol);
                    state.lock().triggers.insert(order);
                }
                OrderStatus::Open | OrderStatus::PartiallyFilled
                    if order.price.is_some() && !order.order_type.is_conditional() =>
                {
                    let state = self.state(&order.symbol);
                    state.lock().book.restore(order);
                }
                _ => {}
            }
        }

        for trade in stored.trades {
            let state = self.state(&trade.symbol);
            state.lock().book.record_trade(trade);
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn state(&self, symbol: &str) -> Arc<Mutex<SymbolState>> {
        if let Some(existing) = self.books.get(symbol) {
            return existing.value().clone();
        }
        self.books
            .entry(symbol.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(SymbolState::new(
                    symbol,
                    self.config.trade_history_capacity,
                )))
            })
            .clone()
    }

    fn existing_state(&self, symbol: &str) -> Option<Arc<Mutex<SymbolState>>> {
        self.books.get(symbol).map(|entry| entry.value().clone())
    }

    /// Update the archive and forward the change to the store, if any.
    fn record_order(&self, order: &Order) {
        self.orders.insert(order.id, order.clone());
        if let Some(store) = self.store.read().as_ref() {
            if let Err(e) = store.save_order(order) {
                error!(order_id = %order.id, "failed to persist order: {e:#}");
            }
        }
    }

    /// Stamp fees on a batch of trades, record them in the symbol's history,
    /// persist, and emit. Returns the finished trades.
    fn settle_trades(&self, state: &mut SymbolState, mut trades: Vec<Trade>) -> Vec<Trade> {
        if trades.is_empty() {
            return trades;
        }

        let schedule = self.fees.schedule_for(state.book.symbol());
        for trade in &mut trades {
            schedule.apply(trade);
            state.book.record_trade(trade.clone());
            if let Some(store) = self.store.read().as_ref() {
                if let Err(e) = store.save_trade(trade) {
                    error!(trade_id = %trade.id, "failed to persist trade: {e:#}");
                }
            }
            self.events.emit_trade(trade.clone());
        }
        trades
    }

    /// Iteratively promote triggered orders until the table is quiescent.
    ///
    /// Each promoted order re-enters the matcher; its trades move the
    /// evaluation price and may trigger further orders. The loop terminates
    /// because every order leaves the table at most once.
    fn drain_triggers(&self, state: &mut SymbolState, mut last_price: Decimal) {
        let mut queue: VecDeque<Order> = state.triggers.take_triggered(last_price).into();

        while let Some(order) = queue.pop_front() {
            let outcome = state.book.execute(order);
            for maker in &outcome.maker_updates {
                self.record_order(maker);
            }
            self.record_order(&outcome.taker);

            let trades = self.settle_trades(state, outcome.trades);
            if let Some(last) = trades.last() {
                last_price = last.price;
                queue.extend(state.triggers.take_triggered(last_price));
            }
        }
    }

    /// Emit a BBO event if the quotes moved since `before`.
    fn emit_bbo_change(&self, state: &SymbolState, before: &Bbo) {
        let after = state.book.bbo();
        if !after.same_quotes(before) {
            self.events.emit_bbo(after);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderType, Side};
    use rust_decimal_macros::dec;

    fn draft(
        order_type: OrderType,
        side: Side,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> OrderDraft {
        OrderDraft {
            symbol: "BTC-USDT".to_string(),
            order_type,
            side,
            quantity,
            price,
            stop_price: None,
            limit_price: None,
        }
    }

    #[test]
    fn test_submit_rests_open_order() {
        let engine = MatchingEngine::new();
        let (trades, order) = engine.submit(draft(
            OrderType::Limit,
            Side::Buy,
            dec!(1.0),
            Some(dec!(100.0)),
        ));

        assert!(trades.is_empty());
        assert_eq!(order.status, OrderStatus::Open);
        assert_eq!(engine.get_order(order.id).unwrap().status, OrderStatus::Open);
        assert_eq!(engine.bbo("BTC-USDT").unwrap().bid_price, Some(dec!(100.0)));
    }

    #[test]
    fn test_invalid_draft_rejected_without_identity() {
        let engine = MatchingEngine::new();
        let (trades, order) = engine.submit(draft(OrderType::Limit, Side::Buy, dec!(1.0), None));

        assert!(trades.is_empty());
        assert_eq!(order.status, OrderStatus::Rejected);
        assert!(engine.get_order(order.id).is_none());
        assert!(engine.bbo("BTC-USDT").is_none());
    }

    #[test]
    fn test_cancel_unknown_and_terminal() {
        let engine = MatchingEngine::new();
        assert!(matches!(
            engine.cancel(Uuid::new_v4()),
            Err(EngineError::OrderNotFound(_))
        ));

        let (_, order) = engine.submit(draft(
            OrderType::Limit,
            Side::Buy,
            dec!(1.0),
            Some(dec!(100.0)),
        ));
        engine.cancel(order.id).unwrap();

        // Second cancel sees a terminal order.
        assert!(matches!(
            engine.cancel(order.id),
            Err(EngineError::OrderNotFound(_))
        ));
    }

    #[test]
    fn test_stats() {
        let engine = MatchingEngine::new();
        engine.submit(draft(
            OrderType::Limit,
            Side::Buy,
            dec!(1.0),
            Some(dec!(100.0)),
        ));
        let mut stop = draft(OrderType::StopLoss, Side::Sell, dec!(1.0), None);
        stop.stop_price = Some(dec!(90.0));
        engine.submit(stop);

        let stats = engine.stats();
        assert_eq!(stats.symbols, 1);
        assert_eq!(stats.resting_orders, 1);
        assert_eq!(stats.pending_triggers, 1);
        assert_eq!(stats.total_orders, 2);
    }
}
